//! 评估与动作执行结果
//!
//! 结果记录在每次调用中新建，追加到结果集合后不再修改，
//! 可直接序列化返回给调用方。

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;

/// 耗时以毫秒浮点数输出
pub(crate) fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_nanos() as f64 / 1_000_000.0)
}

/// 规则评估的终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// 正常完成（匹配或不匹配）
    Completed,
    /// 表达式错误，按未匹配处理
    Failed,
    /// 调用被取消，规则未执行
    Cancelled,
}

/// 动作执行的终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// 单条规则的评估结果
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub rule_name: String,
    pub matched: bool,
    #[serde(rename = "execution_time_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub error: Option<String>,
    pub status: EvaluationStatus,
}

impl EvaluationOutcome {
    pub fn completed(rule_name: impl Into<String>, matched: bool, duration: Duration) -> Self {
        Self {
            rule_name: rule_name.into(),
            matched,
            duration,
            error: None,
            status: EvaluationStatus::Completed,
        }
    }

    pub fn failed(rule_name: impl Into<String>, error: String, duration: Duration) -> Self {
        Self {
            rule_name: rule_name.into(),
            matched: false,
            duration,
            error: Some(error),
            status: EvaluationStatus::Failed,
        }
    }

    pub fn cancelled(rule_name: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            matched: false,
            duration: Duration::ZERO,
            error: Some("cancelled".to_string()),
            status: EvaluationStatus::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == EvaluationStatus::Cancelled
    }
}

/// 单个动作的执行结果
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    #[serde(rename = "action")]
    pub action_id: String,
    pub success: bool,
    #[serde(rename = "result")]
    pub payload: Option<Value>,
    pub error: Option<String>,
    #[serde(rename = "execution_time_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub status: ActionStatus,
}

impl ActionOutcome {
    pub fn succeeded(action_id: impl Into<String>, payload: Value, duration: Duration) -> Self {
        Self {
            action_id: action_id.into(),
            success: true,
            payload: Some(payload),
            error: None,
            duration,
            status: ActionStatus::Succeeded,
        }
    }

    pub fn failed(
        action_id: impl Into<String>,
        status: ActionStatus,
        error: String,
        duration: Duration,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            success: false,
            payload: None,
            error: Some(error),
            duration,
            status,
        }
    }
}

/// 规则评估 + 动作执行的组合结果
#[derive(Debug, Clone, Serialize)]
pub struct RuleActionOutcome {
    pub rule_name: String,
    pub matched: bool,
    #[serde(rename = "rule_execution_time_ms", serialize_with = "as_millis")]
    pub rule_duration: Duration,
    #[serde(rename = "actions_executed")]
    pub actions: Vec<ActionOutcome>,
    pub rule_error: Option<String>,
    pub status: EvaluationStatus,
}

impl RuleActionOutcome {
    pub fn new(evaluation: EvaluationOutcome, actions: Vec<ActionOutcome>) -> Self {
        Self {
            rule_name: evaluation.rule_name,
            matched: evaluation.matched,
            rule_duration: evaluation.duration,
            actions,
            rule_error: evaluation.error,
            status: evaluation.status,
        }
    }

    /// 所有已执行动作是否都成功（无动作时为 true）
    pub fn all_actions_succeeded(&self) -> bool {
        self.actions.iter().all(|a| a.success)
    }
}
