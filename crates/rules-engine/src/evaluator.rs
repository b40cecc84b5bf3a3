//! 表达式求值器
//!
//! 递归解释表达式树，实现各操作符的语义与类型转换规则：
//! - 数值比较把数字、数字字符串、布尔转换为数字；任一操作数为 null 时结果为 false；
//!   其他无法转换的操作数报错
//! - 相等比较为结构化深比较，不做跨类型转换
//! - 算术运算遇到无法转换的值（包括 null）报错，错误中指明操作符与参数位置
//! - `and` / `or` / `if` 短路求值，返回决定结果的那个子节点的值

use crate::error::ExpressionError;
use crate::expression::{Expression, is_valid_var_path};
use crate::models::{DataContext, lookup_path};
use crate::operators::Operator;
use serde_json::{Map, Number, Value};
use tracing::debug;

/// 可精确表示为整数的浮点上限（2^53）
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// 表达式求值器
pub struct Evaluator;

impl Evaluator {
    /// 对数据上下文求值
    pub fn evaluate(expr: &Expression, context: &DataContext) -> Result<Value, ExpressionError> {
        Interpreter { trace: None }.eval(expr, context.data())
    }

    /// 求值并记录每个操作符节点的评估追踪
    pub fn evaluate_with_trace(
        expr: &Expression,
        context: &DataContext,
    ) -> (Result<Value, ExpressionError>, Vec<String>) {
        let mut trace = Vec::new();
        let result = Interpreter {
            trace: Some(&mut trace),
        }
        .eval(expr, context.data());
        (result, trace)
    }

    /// 求值后按真值规则转换为布尔，用于规则匹配
    pub fn matches(expr: &Expression, context: &DataContext) -> Result<bool, ExpressionError> {
        Self::evaluate(expr, context).map(|v| truthy(&v))
    }

    /// 解析并求值 JSON 形式的表达式
    pub fn evaluate_json(rule: &Value, context: &DataContext) -> Result<Value, ExpressionError> {
        let expr = Expression::parse(rule)?;
        Self::evaluate(&expr, context)
    }
}

/// 真值规则：null、0、空序列、空字符串、false 为假，其余为真
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(_) => true,
    }
}

/// 结构化相等比较
///
/// 整数按整数精确比较，其他数值按浮点数比较（如 100 == 100.0）；
/// 非数值类型不做跨类型转换。
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(i1), Some(i2)) = (x.as_i64(), y.as_i64()) {
                i1 == i2
            } else if let (Some(u1), Some(u2)) = (x.as_u64(), y.as_u64()) {
                u1 == u2
            } else {
                x.as_f64() == y.as_f64()
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// 获取值的类型名称
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct Interpreter<'t> {
    trace: Option<&'t mut Vec<String>>,
}

impl Interpreter<'_> {
    fn record(&mut self, entry: impl FnOnce() -> String) {
        if let Some(trace) = self.trace.as_mut() {
            trace.push(entry());
        }
    }

    fn eval(&mut self, expr: &Expression, data: &Value) -> Result<Value, ExpressionError> {
        match expr {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Sequence(items) => items
                .iter()
                .map(|item| self.eval(item, data))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expression::Var { path, default } => self.eval_var(path, default.as_deref(), data),
            Expression::Apply {
                operator,
                args,
                path,
            } => {
                let result = if operator.is_lazy() {
                    self.apply_lazy(*operator, args, path, data)
                } else {
                    args.iter()
                        .map(|arg| self.eval(arg, data))
                        .collect::<Result<Vec<_>, _>>()
                        .and_then(|values| apply(*operator, &values, data))
                };

                match &result {
                    Ok(value) => self.record(|| format!("{}: {} => {}", path, operator, value)),
                    Err(e) => self.record(|| format!("{}: {} FAILED: {}", path, operator, e)),
                }
                result
            }
        }
    }

    /// 变量解析：路径缺失时返回默认值（默认值仅在需要时求值），否则返回 null
    fn eval_var(
        &mut self,
        path: &Expression,
        default: Option<&Expression>,
        data: &Value,
    ) -> Result<Value, ExpressionError> {
        let key = self.eval(path, data)?;
        let found = match &key {
            Value::Null => Some(data),
            Value::String(s) => lookup_path(data, s),
            Value::Number(n) => lookup_path(data, &n.to_string()),
            other => {
                debug_assert!(!is_valid_var_path(other));
                return Err(ExpressionError::InvalidVarPath {
                    path: Operator::Var.name().to_string(),
                    value: other.to_string(),
                });
            }
        };

        match found {
            Some(value) => Ok(value.clone()),
            None => match default {
                Some(default) => self.eval(default, data),
                None => Ok(Value::Null),
            },
        }
    }

    fn apply_lazy(
        &mut self,
        operator: Operator,
        args: &[Expression],
        path: &str,
        data: &Value,
    ) -> Result<Value, ExpressionError> {
        match operator {
            Operator::And => {
                // AND: 遇到假值立即返回该值
                let mut last = Value::Null;
                for (i, arg) in args.iter().enumerate() {
                    last = self.eval(arg, data)?;
                    if !truthy(&last) {
                        if i + 1 < args.len() {
                            self.record(|| format!("{}: and 短路 - 子节点 {} 为假", path, i));
                        }
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            Operator::Or => {
                // OR: 遇到真值立即返回该值
                let mut last = Value::Null;
                for (i, arg) in args.iter().enumerate() {
                    last = self.eval(arg, data)?;
                    if truthy(&last) {
                        if i + 1 < args.len() {
                            self.record(|| format!("{}: or 短路 - 子节点 {} 为真", path, i));
                        }
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            Operator::If => {
                // [cond1, then1, cond2, then2, ..., else]
                let mut i = 0;
                while i + 1 < args.len() {
                    if truthy(&self.eval(&args[i], data)?) {
                        return self.eval(&args[i + 1], data);
                    }
                    i += 2;
                }
                match args.len() % 2 {
                    1 => self.eval(&args[args.len() - 1], data),
                    _ => Ok(Value::Null),
                }
            }
            Operator::Map => {
                let items = self.scoped_items(operator, &args[0], data)?;
                items
                    .iter()
                    .map(|item| self.eval(&args[1], item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Operator::Filter => {
                let items = self.scoped_items(operator, &args[0], data)?;
                let mut kept = Vec::new();
                for item in items {
                    if truthy(&self.eval(&args[1], &item)?) {
                        kept.push(item);
                    }
                }
                Ok(Value::Array(kept))
            }
            Operator::Reduce => {
                let items = self.scoped_items(operator, &args[0], data)?;
                let mut accumulator = match args.get(2) {
                    Some(initial) => self.eval(initial, data)?,
                    None => Value::Null,
                };
                for item in items {
                    let mut scope = Map::new();
                    scope.insert("current".to_string(), item);
                    scope.insert("accumulator".to_string(), accumulator);
                    accumulator = self.eval(&args[1], &Value::Object(scope))?;
                }
                Ok(accumulator)
            }
            Operator::All => {
                let items = self.scoped_items(operator, &args[0], data)?;
                if items.is_empty() {
                    return Ok(Value::Bool(false));
                }
                for item in &items {
                    if !truthy(&self.eval(&args[1], item)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Operator::SomeOf | Operator::NoneOf => {
                let items = self.scoped_items(operator, &args[0], data)?;
                let mut found = false;
                for item in &items {
                    if truthy(&self.eval(&args[1], item)?) {
                        found = true;
                        break;
                    }
                }
                Ok(Value::Bool(found == (operator == Operator::SomeOf)))
            }
            _ => unreachable!("{} is not a lazy operator", operator),
        }
    }

    /// 迭代类操作符的序列参数：null 视为空序列，其他非数组类型报错
    fn scoped_items(
        &mut self,
        operator: Operator,
        arg: &Expression,
        data: &Value,
    ) -> Result<Vec<Value>, ExpressionError> {
        match self.eval(arg, data)? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(ExpressionError::type_mismatch(operator.name(), 0, &other)),
        }
    }
}

/// 对已求值的参数应用非惰性操作符
fn apply(operator: Operator, values: &[Value], data: &Value) -> Result<Value, ExpressionError> {
    let op = operator.name();

    match operator {
        Operator::Eq | Operator::StrictEq => Ok(Value::Bool(values_equal(&values[0], &values[1]))),
        Operator::Neq | Operator::StrictNeq => {
            Ok(Value::Bool(!values_equal(&values[0], &values[1])))
        }
        Operator::Gt => compare_chain(op, values, |a, b| a > b),
        Operator::Gte => compare_chain(op, values, |a, b| a >= b),
        Operator::Lt => compare_chain(op, values, |a, b| a < b),
        Operator::Lte => compare_chain(op, values, |a, b| a <= b),
        Operator::Not => Ok(Value::Bool(!truthy(&values[0]))),
        Operator::Truthy => Ok(Value::Bool(truthy(&values[0]))),
        Operator::Add => {
            let mut sum = 0.0;
            for (i, v) in values.iter().enumerate() {
                sum += to_number(op, i, v)?;
            }
            number_value(op, sum)
        }
        Operator::Sub => {
            let a = to_number(op, 0, &values[0])?;
            match values.get(1) {
                Some(b) => number_value(op, a - to_number(op, 1, b)?),
                None => number_value(op, -a),
            }
        }
        Operator::Mul => {
            let mut product = 1.0;
            for (i, v) in values.iter().enumerate() {
                product *= to_number(op, i, v)?;
            }
            number_value(op, product)
        }
        Operator::Div | Operator::Mod => {
            let a = to_number(op, 0, &values[0])?;
            let b = to_number(op, 1, &values[1])?;
            if b == 0.0 {
                return Err(ExpressionError::DivisionByZero {
                    operator: op.to_string(),
                });
            }
            number_value(op, if operator == Operator::Div { a / b } else { a % b })
        }
        Operator::Min | Operator::Max => {
            let mut best = to_number(op, 0, &values[0])?;
            for (i, v) in values.iter().enumerate().skip(1) {
                let n = to_number(op, i, v)?;
                best = if operator == Operator::Min {
                    best.min(n)
                } else {
                    best.max(n)
                };
            }
            number_value(op, best)
        }
        Operator::In => contains(op, &values[0], &values[1]),
        Operator::Cat => Ok(Value::String(values.iter().map(stringify).collect())),
        Operator::Substr => substr(op, values),
        Operator::Merge => {
            let mut merged = Vec::new();
            for v in values {
                match v {
                    Value::Array(items) => merged.extend(items.iter().cloned()),
                    other => merged.push(other.clone()),
                }
            }
            Ok(Value::Array(merged))
        }
        Operator::Missing => Ok(Value::Array(missing_keys(missing_arguments(values), data))),
        Operator::MissingSome => missing_some(op, values, data),
        Operator::Log => {
            debug!(value = %values[0], "表达式 log 输出");
            Ok(values[0].clone())
        }
        // var 在解析阶段被转换为 Expression::Var
        Operator::Var => Err(ExpressionError::Malformed {
            path: op.to_string(),
            reason: "var must be parsed as a variable reference".to_string(),
        }),
        Operator::And
        | Operator::Or
        | Operator::If
        | Operator::Map
        | Operator::Filter
        | Operator::Reduce
        | Operator::All
        | Operator::SomeOf
        | Operator::NoneOf => unreachable!("{} is a lazy operator", operator),
    }
}

/// 数值比较，三个参数时表示区间 `a op b op c`
fn compare_chain<F>(op: &str, values: &[Value], cmp: F) -> Result<Value, ExpressionError>
where
    F: Fn(f64, f64) -> bool,
{
    // 缺失的数据（null）使比较结果为 false 而不是报错
    if values.iter().any(Value::is_null) {
        return Ok(Value::Bool(false));
    }

    let mut numbers = Vec::with_capacity(values.len());
    for (i, v) in values.iter().enumerate() {
        numbers.push(to_number(op, i, v)?);
    }

    Ok(Value::Bool(numbers.windows(2).all(|w| cmp(w[0], w[1]))))
}

/// 尝试将值转换为 f64
fn to_number(op: &str, position: usize, value: &Value) -> Result<f64, ExpressionError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    number.ok_or_else(|| ExpressionError::type_mismatch(op, position, value))
}

/// 浮点结果转回 JSON 数字，整数值保持整数形式
fn number_value(op: &str, f: f64) -> Result<Value, ExpressionError> {
    if !f.is_finite() {
        return Err(ExpressionError::NonFinite {
            operator: op.to_string(),
        });
    }
    if f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER {
        return Ok(Value::from(f as i64));
    }
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::NonFinite {
            operator: op.to_string(),
        })
}

/// `in`：字符串子串或序列成员检查
fn contains(op: &str, needle: &Value, haystack: &Value) -> Result<Value, ExpressionError> {
    match haystack {
        Value::String(s) => {
            let needle = match needle {
                Value::String(n) => n.clone(),
                Value::Number(n) => n.to_string(),
                other => return Err(ExpressionError::type_mismatch(op, 0, other)),
            };
            Ok(Value::Bool(s.contains(needle.as_str())))
        }
        Value::Array(items) => Ok(Value::Bool(
            items.iter().any(|item| values_equal(item, needle)),
        )),
        other => Err(ExpressionError::type_mismatch(op, 1, other)),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `substr`：负起点从末尾计数，负长度表示从末尾去掉的字符数
///
/// 起止位置始终截断到 `0..=len`，超大或超小的参数不会越界。
fn substr(op: &str, values: &[Value]) -> Result<Value, ExpressionError> {
    let source = match &values[0] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(ExpressionError::type_mismatch(op, 0, other)),
    };
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len() as i64;

    let start = to_number(op, 1, &values[1])? as i64;
    let start = if start < 0 {
        len.saturating_add(start).max(0)
    } else {
        start.min(len)
    };

    let end = match values.get(2) {
        Some(length) => {
            let length = to_number(op, 2, length)? as i64;
            if length < 0 {
                len.saturating_add(length).max(start)
            } else {
                start.saturating_add(length).min(len)
            }
        }
        None => len,
    };

    let start = start.clamp(0, len) as usize;
    let end = end.clamp(0, len) as usize;
    Ok(Value::String(chars[start..end.max(start)].iter().collect()))
}

/// `missing` 的参数：首个参数为数组时以它作为键列表
fn missing_arguments(values: &[Value]) -> &[Value] {
    match values.first() {
        Some(Value::Array(items)) => items,
        _ => values,
    }
}

/// 缺失或值为 null / 空字符串的键
fn missing_keys(keys: &[Value], data: &Value) -> Vec<Value> {
    keys.iter()
        .filter(|key| {
            let path = match key {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return true,
            };
            match lookup_path(data, &path) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            }
        })
        .cloned()
        .collect()
}

fn missing_some(op: &str, values: &[Value], data: &Value) -> Result<Value, ExpressionError> {
    let need = to_number(op, 0, &values[0])?;
    let keys = match &values[1] {
        Value::Array(items) => items.as_slice(),
        other => return Err(ExpressionError::type_mismatch(op, 1, other)),
    };
    let missing = missing_keys(keys, data);
    let present = keys.len().saturating_sub(missing.len());

    if present as f64 >= need {
        Ok(Value::Array(Vec::new()))
    } else {
        Ok(Value::Array(missing))
    }
}
