//! 规则校验器
//!
//! 校验分两步：
//! 1. 结构检查：遍历整棵表达式树，收集全部结构性缺陷
//! 2. 结构无误时，在空数据上下文上试运行一次
//!
//! 试运行时所有变量都解析为 null，由此产生的类型错误取决于真实数据，不予报告。
//! 这只是启发式检查：仅在特定数据形状下才会出现的错误（例如某字段为字符串时的
//! 算术运算）无法在此发现，会在真实评估时以规则错误的形式出现。

use crate::error::{DispatchError, ExpressionError};
use crate::evaluator::Evaluator;
use crate::expression::Expression;
use crate::models::{ActionId, DataContext};
use serde::Serialize;
use serde_json::Value;

/// 表达式校验结果
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    /// 表达式引用的字段路径（排序去重）
    pub referenced_fields: Vec<String>,
}

impl ValidationResult {
    fn from_defects(defects: &[ExpressionError]) -> Self {
        Self {
            valid: defects.is_empty(),
            errors: defects.iter().map(ToString::to_string).collect(),
            referenced_fields: Vec::new(),
        }
    }
}

/// 校验表达式
pub fn validate(expression: &Value) -> ValidationResult {
    let expr = match Expression::parse_all(expression) {
        Ok(expr) => expr,
        Err(defects) => return ValidationResult::from_defects(&defects),
    };

    let mut result = match Evaluator::evaluate(&expr, &DataContext::empty()) {
        Err(e) if !e.is_data_dependent() => ValidationResult::from_defects(&[e]),
        _ => ValidationResult::from_defects(&[]),
    };
    result.referenced_fields = expr.referenced_fields().into_iter().collect();
    result
}

/// 词法校验动作标识，返回每个非法标识的错误文本
///
/// 不检查注册表中是否存在对应处理器。
pub fn validate_actions(actions: &[String]) -> Vec<String> {
    actions
        .iter()
        .filter_map(|action| ActionId::parse(action).err())
        .map(|e: DispatchError| e.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_rule() {
        let result = validate(&json!({
            "and": [
                {">": [{"var": "order.total"}, 100]},
                {"==": [{"var": "user.tier"}, "gold"]}
            ]
        }));

        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert_eq!(result.referenced_fields, vec!["order.total", "user.tier"]);
    }

    #[test]
    fn test_reports_every_structural_defect() {
        let result = validate(&json!({
            "and": [
                {"xor": [1, 2]},
                {"!": [1, 2]},
                {"var": {"nested": true}}
            ]
        }));

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
        assert!(result.errors[0].contains("xor"));
        assert!(result.errors[0].contains("root.and[0]"));
    }

    #[test]
    fn test_data_dependent_errors_are_ignored() {
        // 空上下文中 amount 为 null，乘法报错，但这取决于真实数据
        let result = validate(&json!({">": [{"*": [{"var": "amount"}, 2]}, 10]}));
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_data_independent_dry_run_errors_are_reported() {
        let result = validate(&json!({"/": [1, 0]}));
        assert!(!result.valid);
        assert!(result.errors[0].contains("division by zero"));

        let result = validate(&json!({"+": [1, "abc"]}));
        assert!(!result.valid);
    }

    #[test]
    fn test_validate_actions() {
        let errors = validate_actions(&[
            "NotificationActions.send_email".to_string(),
            "send_email".to_string(),
            "a.b.c".to_string(),
        ]);

        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors[0],
            "invalid action specification: send_email. Expected format: registry.handler"
        );
    }
}
