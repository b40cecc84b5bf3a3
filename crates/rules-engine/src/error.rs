//! 规则引擎错误类型

use thiserror::Error;

/// 表达式解析或求值失败
///
/// 求值阶段的所有错误都会被编排层就地消化为“未匹配 + 错误文本”，
/// 不会中断批量评估。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("unrecognized operation '{operator}' at {path}")]
    UnknownOperator { operator: String, path: String },

    #[error("operator '{operator}' at {path} expects {expected} argument(s), got {actual}")]
    Arity {
        operator: String,
        path: String,
        expected: String,
        actual: usize,
    },

    #[error("malformed expression at {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("invalid variable path at {path}: {value}")]
    InvalidVarPath { path: String, value: String },

    #[error("operator '{operator}' cannot handle {actual} value {value} at argument {position}")]
    TypeMismatch {
        operator: String,
        position: usize,
        actual: &'static str,
        value: String,
    },

    #[error("operator '{operator}': division by zero")]
    DivisionByZero { operator: String },

    #[error("operator '{operator}' produced a non-finite number")]
    NonFinite { operator: String },
}

impl ExpressionError {
    /// 错误是否仅由缺失数据（null 操作数）引起
    ///
    /// 空上下文试运行时所有变量都解析为 null，这类错误取决于真实数据，
    /// 校验器据此忽略它们。
    pub fn is_data_dependent(&self) -> bool {
        matches!(self, Self::TypeMismatch { actual: "null", .. })
    }

    pub(crate) fn type_mismatch(
        operator: &str,
        position: usize,
        value: &serde_json::Value,
    ) -> Self {
        Self::TypeMismatch {
            operator: operator.to_string(),
            position,
            actual: crate::evaluator::type_name(value),
            value: value.to_string(),
        }
    }
}

/// 动作处理器自身返回的失败
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("missing field '{0}' in data")]
    MissingField(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// 动作分发失败，最终全部转换为失败的 ActionOutcome
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid action specification: {action}. Expected format: registry.handler")]
    InvalidActionId { action: String },

    #[error("registry not found: {registry}")]
    RegistryNotFound { registry: String },

    #[error("handler not found: {handler} in registry {registry}")]
    HandlerNotFound { registry: String, handler: String },

    #[error("handler failed: {0}")]
    HandlerFailed(#[from] ActionError),

    #[error("handler timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("cancelled")]
    Cancelled,
}

/// 调用方可见的顶层错误
///
/// 仅在任何单条规则开始评估之前、输入本身不合法时返回。
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid rule definition: {0}")]
    InvalidRule(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;
