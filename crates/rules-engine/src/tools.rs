//! 工具调用接口
//!
//! 将引擎的四个操作暴露为按名称分发的工具请求：
//! `evaluate_rule`、`evaluate_ruleset`、`execute_rule_actions`、`validate_rule`。
//! 请求与响应均为 JSON，每行一个请求（见 `main.rs`）。

use crate::engine::{EvaluationScope, RuleEngine};
use crate::error::{Result, RuleError};
use crate::models::{DataContext, RuleDefinition};
use crate::outcome::EvaluationOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// 工具请求，按 `tool` 字段区分
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolRequest {
    /// 评估单条表达式（不执行动作）
    EvaluateRule {
        rule: Value,
        #[serde(default)]
        data: DataContext,
    },
    /// 评估多条规则（不执行动作）
    EvaluateRuleset {
        rules: Vec<Value>,
        #[serde(default)]
        data: DataContext,
    },
    /// 评估规则并执行匹配规则的动作
    ExecuteRuleActions {
        rules: Vec<Value>,
        #[serde(default)]
        data: DataContext,
    },
    /// 校验表达式与动作标识
    ValidateRule {
        rule: Value,
        #[serde(default)]
        actions: Option<Vec<String>>,
    },
}

impl ToolRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EvaluateRule { .. } => "evaluate_rule",
            Self::EvaluateRuleset { .. } => "evaluate_ruleset",
            Self::ExecuteRuleActions { .. } => "execute_rule_actions",
            Self::ValidateRule { .. } => "validate_rule",
        }
    }
}

/// 带关联标识的请求
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub request: ToolRequest,
}

/// 工具响应，`result` 与 `error` 二选一
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<Value>, error: impl ToString) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// `evaluate_rule` 的响应
#[derive(Debug, Clone, Serialize)]
pub struct EvaluateRuleResponse {
    pub matched: bool,
    #[serde(serialize_with = "crate::outcome::as_millis")]
    pub execution_time_ms: Duration,
    pub error: Option<String>,
}

impl From<EvaluationOutcome> for EvaluateRuleResponse {
    fn from(outcome: EvaluationOutcome) -> Self {
        Self {
            matched: outcome.matched,
            execution_time_ms: outcome.duration,
            error: outcome.error,
        }
    }
}

/// `validate_rule` 的响应
///
/// `rule_error` 为第一条缺陷，`action_errors` 无缺陷时为 null。
#[derive(Debug, Clone, Serialize)]
pub struct ValidateRuleResponse {
    pub rule_valid: bool,
    pub rule_error: Option<String>,
    pub rule_errors: Vec<String>,
    pub actions_valid: bool,
    pub action_errors: Option<Vec<String>>,
}

/// 工具服务
#[derive(Clone)]
pub struct ToolService {
    engine: RuleEngine,
}

impl ToolService {
    pub fn new(engine: RuleEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// 执行一个工具请求，返回 JSON 结果
    pub async fn call(&self, request: ToolRequest, scope: &EvaluationScope) -> Result<Value> {
        debug!(tool = request.name(), "处理工具请求");

        let result = match request {
            ToolRequest::EvaluateRule { rule, data } => {
                let outcome = self.engine.evaluate_rule(&rule, &data);
                serde_json::to_value(EvaluateRuleResponse::from(outcome))?
            }
            ToolRequest::EvaluateRuleset { rules, data } => {
                let rules = parse_rules(rules)?;
                let outcomes = self.engine.evaluate_only(&rules, &data, scope).await?;
                serde_json::to_value(outcomes)?
            }
            ToolRequest::ExecuteRuleActions { rules, data } => {
                let rules = parse_rules(rules)?;
                let outcomes = self.engine.evaluate_and_act(&rules, &data, scope).await?;
                serde_json::to_value(outcomes)?
            }
            ToolRequest::ValidateRule { rule, actions } => {
                let report = self
                    .engine
                    .validate_rule(&rule, actions.as_deref().unwrap_or_default());
                serde_json::to_value(ValidateRuleResponse {
                    rule_valid: report.rule_valid,
                    rule_error: report.rule_errors.first().cloned(),
                    rule_errors: report.rule_errors,
                    actions_valid: report.actions_valid,
                    action_errors: (!report.action_errors.is_empty())
                        .then_some(report.action_errors),
                })?
            }
        };
        Ok(result)
    }

    /// 处理一行 JSON 请求，任何错误都转换为错误响应
    pub async fn handle_line(&self, line: &str, scope: &EvaluationScope) -> ToolResponse {
        let call: ToolCall = match serde_json::from_str(line) {
            Ok(call) => call,
            Err(e) => {
                warn!(error = %e, "无法解析工具请求");
                return ToolResponse::err(None, RuleError::InvalidRequest(e.to_string()));
            }
        };

        let tool = call.request.name();
        match self.call(call.request, scope).await {
            Ok(result) => ToolResponse::ok(call.id, result),
            Err(e) => {
                warn!(tool, error = %e, "工具请求失败");
                ToolResponse::err(call.id, e)
            }
        }
    }
}

/// 逐条解析规则定义，任一条非法则整个请求失败
fn parse_rules(rules: Vec<Value>) -> Result<Vec<RuleDefinition>> {
    rules
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            serde_json::from_value::<RuleDefinition>(raw)
                .map_err(|e| RuleError::InvalidRule(format!("rules[{}]: {}", i, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::SharedRegistry;
    use crate::catalog::catalog_registry;
    use crate::engine::EngineSettings;
    use serde_json::json;

    fn service() -> ToolService {
        let registry = SharedRegistry::new(catalog_registry());
        ToolService::new(RuleEngine::new(registry, EngineSettings::default()))
    }

    async fn call(request: Value) -> ToolResponse {
        service()
            .handle_line(&request.to_string(), &EvaluationScope::new())
            .await
    }

    #[tokio::test]
    async fn test_evaluate_rule_tool() {
        let response = call(json!({
            "id": 1,
            "tool": "evaluate_rule",
            "rule": {">": [{"var": "age"}, 18]},
            "data": {"age": 25}
        }))
        .await;

        assert_eq!(response.id, Some(json!(1)));
        let result = response.result.unwrap();
        assert_eq!(result["matched"], true);
        assert_eq!(result["error"], Value::Null);
        assert!(result["execution_time_ms"].is_f64());
    }

    #[tokio::test]
    async fn test_evaluate_ruleset_tool() {
        let response = call(json!({
            "tool": "evaluate_ruleset",
            "rules": [
                {"name": "adult", "rule": {">=": [{"var": "age"}, 18]}},
                {"name": "broken", "rule": {"xor": [1, 2]}}
            ],
            "data": {"age": 30}
        }))
        .await;

        let result = response.result.unwrap();
        assert_eq!(result[0]["rule_name"], "adult");
        assert_eq!(result[0]["matched"], true);
        assert_eq!(result[1]["matched"], false);
        assert!(result[1]["error"].as_str().unwrap().contains("xor"));
    }

    #[tokio::test]
    async fn test_execute_rule_actions_tool() {
        let response = call(json!({
            "tool": "execute_rule_actions",
            "rules": [{
                "name": "fraud",
                "rule": {">": [{"var": "risk_score"}, 80]},
                "actions": ["SecurityActions.block_user", "SecurityActions.require_mfa"]
            }],
            "data": {"risk_score": 95, "user_id": "u-42"}
        }))
        .await;

        let result = response.result.unwrap();
        let actions = result[0]["actions_executed"].as_array().unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0]["action"], "SecurityActions.block_user");
        assert_eq!(actions[0]["result"]["user_id"], "u-42");
        assert_eq!(actions[1]["result"]["mfa_method"], "sms");
        assert!(result[0]["rule_execution_time_ms"].is_f64());
    }

    #[tokio::test]
    async fn test_invalid_rule_definition_fails_whole_request() {
        let response = call(json!({
            "id": "req-7",
            "tool": "execute_rule_actions",
            "rules": [{"name": "ok", "rule": true}, {"rule": true}],
            "data": {}
        }))
        .await;

        assert_eq!(response.id, Some(json!("req-7")));
        assert!(response.result.is_none());
        assert!(response.error.unwrap().contains("rules[1]"));
    }

    #[tokio::test]
    async fn test_validate_rule_tool() {
        let response = call(json!({
            "tool": "validate_rule",
            "rule": {"==": [1, 1]},
            "actions": ["NotificationActions.send_email", "broken"]
        }))
        .await;

        let result = response.result.unwrap();
        assert_eq!(result["rule_valid"], true);
        assert_eq!(result["rule_error"], Value::Null);
        assert_eq!(result["actions_valid"], false);
        assert_eq!(result["action_errors"].as_array().unwrap().len(), 1);

        let response = call(json!({"tool": "validate_rule", "rule": {"xor": []}})).await;
        let result = response.result.unwrap();
        assert_eq!(result["rule_valid"], false);
        assert_eq!(result["actions_valid"], true);
        assert_eq!(result["action_errors"], Value::Null);
    }

    #[tokio::test]
    async fn test_unparseable_request() {
        let response = service()
            .handle_line("{not json", &EvaluationScope::new())
            .await;
        assert!(response.error.unwrap().starts_with("invalid request"));

        let response = call(json!({"tool": "drop_tables"})).await;
        assert!(response.error.is_some());
    }
}
