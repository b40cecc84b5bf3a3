//! 表达式解析
//!
//! 将 JSON Logic 形式的规则解析为内存中的表达式树。
//! 解析器在遇到缺陷后继续遍历剩余节点，一次收集整棵树的全部结构性问题。

use crate::error::ExpressionError;
use crate::operators::Operator;
use serde_json::Value;
use std::collections::BTreeSet;

/// 根节点路径
pub const ROOT_PATH: &str = "root";

/// 表达式树节点
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// 字面量（字符串、数字、布尔、null、空对象）
    Literal(Value),
    /// 序列字面量，元素逐个求值
    Sequence(Vec<Expression>),
    /// 变量引用
    Var {
        path: Box<Expression>,
        default: Option<Box<Expression>>,
    },
    /// 操作符应用
    Apply {
        operator: Operator,
        args: Vec<Expression>,
        /// 节点在树中的位置，如 `root.and[1]`
        path: String,
    },
}

impl Expression {
    /// 解析表达式，返回遇到的第一个缺陷
    pub fn parse(value: &Value) -> Result<Self, ExpressionError> {
        Self::parse_all(value).map_err(|mut defects| defects.swap_remove(0))
    }

    /// 解析表达式，返回全部结构性缺陷
    pub fn parse_all(value: &Value) -> Result<Self, Vec<ExpressionError>> {
        let mut parser = Parser::default();
        match parser.parse(value, ROOT_PATH) {
            Some(expr) if parser.defects.is_empty() => Ok(expr),
            _ => Err(parser.defects),
        }
    }

    /// 字面量节点
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// 收集表达式中以字面量路径引用的所有字段
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut BTreeSet<String>) {
        match self {
            Self::Literal(_) => {}
            Self::Sequence(items) => items.iter().for_each(|e| e.collect_fields(fields)),
            Self::Var { path, default } => {
                match path.as_ref() {
                    Self::Literal(Value::String(s)) if !s.is_empty() => {
                        fields.insert(s.clone());
                    }
                    Self::Literal(Value::Number(n)) => {
                        fields.insert(n.to_string());
                    }
                    other => other.collect_fields(fields),
                }
                if let Some(default) = default {
                    default.collect_fields(fields);
                }
            }
            Self::Apply { operator, args, .. } => {
                // map/filter 等的主体在元素作用域中求值，其中的变量不属于顶层数据
                let scoped_body = matches!(
                    operator,
                    Operator::Map
                        | Operator::Filter
                        | Operator::Reduce
                        | Operator::All
                        | Operator::SomeOf
                        | Operator::NoneOf
                );
                for (i, arg) in args.iter().enumerate() {
                    if scoped_body && i == 1 {
                        continue;
                    }
                    arg.collect_fields(fields);
                }
            }
        }
    }
}

#[derive(Default)]
struct Parser {
    defects: Vec<ExpressionError>,
}

impl Parser {
    fn parse(&mut self, value: &Value, path: &str) -> Option<Expression> {
        match value {
            Value::Object(map) if map.is_empty() => Some(Expression::Literal(value.clone())),
            Value::Object(map) => {
                if map.len() > 1 {
                    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                    self.defects.push(ExpressionError::Malformed {
                        path: path.to_string(),
                        reason: format!(
                            "expected exactly one operator key, found {}: {:?}",
                            map.len(),
                            keys
                        ),
                    });
                    return None;
                }

                let (name, raw_args) = map.iter().next()?;
                self.parse_application(name, raw_args, path)
            }
            Value::Array(items) => {
                let mut parsed = Vec::with_capacity(items.len());
                let mut ok = true;
                for (i, item) in items.iter().enumerate() {
                    match self.parse(item, &format!("{}[{}]", path, i)) {
                        Some(expr) => parsed.push(expr),
                        None => ok = false,
                    }
                }
                ok.then_some(Expression::Sequence(parsed))
            }
            _ => Some(Expression::Literal(value.clone())),
        }
    }

    fn parse_application(&mut self, name: &str, raw_args: &Value, path: &str) -> Option<Expression> {
        // 非数组参数视为单个参数
        let raw_args: Vec<&Value> = match raw_args {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let operator = Operator::from_name(name);
        if operator.is_none() {
            self.defects.push(ExpressionError::UnknownOperator {
                operator: name.to_string(),
                path: path.to_string(),
            });
        }

        // 即使操作符未知也继续解析子节点，以便收集更多缺陷
        let mut args = Vec::with_capacity(raw_args.len());
        let mut ok = operator.is_some();
        for (i, raw) in raw_args.iter().enumerate() {
            match self.parse(raw, &format!("{}.{}[{}]", path, name, i)) {
                Some(expr) => args.push(expr),
                None => ok = false,
            }
        }

        let operator = operator?;
        let arity = operator.arity();
        if !arity.accepts(raw_args.len()) {
            self.defects.push(ExpressionError::Arity {
                operator: name.to_string(),
                path: path.to_string(),
                expected: arity.to_string(),
                actual: raw_args.len(),
            });
            return None;
        }

        if operator == Operator::Var {
            return ok.then(|| self.build_var(args, path)).flatten();
        }

        ok.then(|| Expression::Apply {
            operator,
            args,
            path: path.to_string(),
        })
    }

    fn build_var(&mut self, args: Vec<Expression>, path: &str) -> Option<Expression> {
        let mut args = args.into_iter();
        let var_path = args.next().unwrap_or(Expression::Literal(Value::Null));
        let default = args.next().map(Box::new);

        if let Expression::Literal(literal) = &var_path {
            if !is_valid_var_path(literal) {
                self.defects.push(ExpressionError::InvalidVarPath {
                    path: path.to_string(),
                    value: literal.to_string(),
                });
                return None;
            }
        }

        Some(Expression::Var {
            path: Box::new(var_path),
            default,
        })
    }
}

/// 变量路径必须是字符串、数字或 null
pub(crate) fn is_valid_var_path(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_comparison() {
        let expr = Expression::parse(&json!({">": [{"var": "age"}, 18]})).unwrap();

        match expr {
            Expression::Apply { operator, args, path } => {
                assert_eq!(operator, Operator::Gt);
                assert_eq!(path, "root");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0], Expression::Var { .. }));
                assert_eq!(args[1], Expression::literal(18));
            }
            other => panic!("unexpected expression: {:?}", other),
        }
    }

    #[test]
    fn test_single_argument_shorthand() {
        let expr = Expression::parse(&json!({"var": "user.tier"})).unwrap();
        assert_eq!(
            expr,
            Expression::Var {
                path: Box::new(Expression::literal("user.tier")),
                default: None,
            }
        );

        let expr = Expression::parse(&json!({"!": true})).unwrap();
        assert!(matches!(expr, Expression::Apply { operator: Operator::Not, .. }));
    }

    #[test]
    fn test_literals_and_sequences() {
        assert_eq!(Expression::parse(&json!(42)).unwrap(), Expression::literal(42));
        assert_eq!(Expression::parse(&json!({})).unwrap(), Expression::literal(json!({})));
        assert!(matches!(
            Expression::parse(&json!([1, {"var": "a"}])).unwrap(),
            Expression::Sequence(items) if items.len() == 2
        ));
    }

    #[test]
    fn test_unknown_operator() {
        let err = Expression::parse(&json!({"and": [true, {"xor": [1, 2]}]})).unwrap_err();
        assert_eq!(
            err,
            ExpressionError::UnknownOperator {
                operator: "xor".to_string(),
                path: "root.and[1]".to_string(),
            }
        );
    }

    #[test]
    fn test_collects_all_defects() {
        let defects = Expression::parse_all(&json!({
            "or": [
                {"frobnicate": [1]},
                {">": [1, 2, 3]},
                {"==": 1, "!=": 2},
                {"var": true}
            ]
        }))
        .unwrap_err();

        assert_eq!(defects.len(), 4);
        assert!(matches!(defects[0], ExpressionError::UnknownOperator { .. }));
        assert!(matches!(defects[1], ExpressionError::Arity { actual: 3, .. }));
        assert!(matches!(defects[2], ExpressionError::Malformed { .. }));
        assert!(matches!(defects[3], ExpressionError::InvalidVarPath { .. }));
    }

    #[test]
    fn test_defects_inside_unknown_operator_are_reported() {
        let defects = Expression::parse_all(&json!({"nope": [{"alsonope": []}]})).unwrap_err();
        assert_eq!(defects.len(), 2);
    }

    #[test]
    fn test_referenced_fields() {
        let expr = Expression::parse(&json!({
            "and": [
                {"==": [{"var": "user.tier"}, "platinum"]},
                {">": [{"var": ["order.total", 0]}, 500]},
                {"some": [{"var": "order.items"}, {"==": [{"var": "sku"}, "X"]}]}
            ]
        }))
        .unwrap();

        let fields: Vec<String> = expr.referenced_fields().into_iter().collect();
        assert_eq!(fields, vec!["order.items", "order.total", "user.tier"]);
    }
}
