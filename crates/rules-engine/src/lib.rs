//! 规则引擎
//!
//! 提供 JSON Logic 规则评估与动作分发能力，支持：
//! - 表达式解析、结构校验与短路求值
//! - 按 `<registry>.<handler>` 注册和分发动作
//! - 规则批量评估，结果保持输入顺序
//! - 请求级取消与动作超时

pub mod actions;
pub mod cancellation;
pub mod catalog;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod models;
pub mod operators;
pub mod outcome;
pub mod tools;
pub mod validator;

pub use actions::{ActionHandler, ActionRegistry, ActionRegistryBuilder, SharedRegistry, handler_fn};
pub use cancellation::{CancelHandle, CancelSignal, cancellation};
pub use dispatcher::ActionDispatcher;
pub use engine::{EngineSettings, EvaluationScope, RuleEngine, ValidationReport};
pub use error::{ActionError, DispatchError, ExpressionError, Result, RuleError};
pub use evaluator::Evaluator;
pub use expression::Expression;
pub use models::{ActionId, DataContext, RuleDefinition, RulesetDefinition};
pub use operators::Operator;
pub use outcome::{
    ActionOutcome, ActionStatus, EvaluationOutcome, EvaluationStatus, RuleActionOutcome,
};
pub use tools::{ToolRequest, ToolResponse, ToolService};
pub use validator::ValidationResult;
