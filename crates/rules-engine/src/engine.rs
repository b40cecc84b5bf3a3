//! 评估编排
//!
//! 组合求值器与分发器，对一组规则逐条产出结果：
//! - 每条输入规则恰好对应一条结果，顺序与输入一致
//! - 单条规则的表达式错误只转换为该规则的“未匹配 + 错误文本”
//! - 仅在规则匹配且配置了动作时分发动作
//!
//! 只有在任何规则开始评估之前发现输入本身不合法时才返回 [`RuleError`]。

use crate::actions::SharedRegistry;
use crate::cancellation::CancelSignal;
use crate::dispatcher::ActionDispatcher;
use crate::error::{ExpressionError, Result};
use crate::evaluator::{Evaluator, truthy};
use crate::expression::Expression;
use crate::models::{DataContext, RuleDefinition, RulesetDefinition};
use crate::outcome::{EvaluationOutcome, EvaluationStatus, RuleActionOutcome};
use crate::validator;
use futures::stream::{self, StreamExt};
use rules_shared::config::EngineConfig;
use rules_shared::observability::metrics::{
    RULE_EVALUATION_DURATION_SECONDS, RULE_EVALUATIONS_TOTAL,
};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// 单条表达式评估时使用的规则名
pub const ANONYMOUS_RULE: &str = "anonymous";

/// 引擎运行参数
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub action_timeout: Duration,
    pub max_concurrent_rules: usize,
    pub max_concurrent_actions: usize,
    pub trace_enabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            action_timeout: Duration::from_millis(config.action_timeout_ms.max(1)),
            max_concurrent_rules: config.max_concurrent_rules.max(1),
            max_concurrent_actions: config.max_concurrent_actions.max(1),
            trace_enabled: config.trace_enabled,
        }
    }
}

/// 请求级评估作用域：取消信号与追踪开关
#[derive(Debug, Clone, Default)]
pub struct EvaluationScope {
    cancel: CancelSignal,
    trace: bool,
}

impl EvaluationScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn is_traced(&self) -> bool {
        self.trace
    }
}

/// 规则与动作的组合校验报告，从不提前失败
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub rule_valid: bool,
    pub rule_errors: Vec<String>,
    pub actions_valid: bool,
    pub action_errors: Vec<String>,
}

/// 规则引擎
#[derive(Clone)]
pub struct RuleEngine {
    dispatcher: ActionDispatcher,
    settings: EngineSettings,
}

impl RuleEngine {
    pub fn new(registry: SharedRegistry, settings: EngineSettings) -> Self {
        let dispatcher = ActionDispatcher::new(registry, settings.action_timeout)
            .with_max_concurrency(settings.max_concurrent_actions);
        Self {
            dispatcher,
            settings,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 评估单条表达式（不分发动作）
    pub fn evaluate_rule(&self, expression: &Value, context: &DataContext) -> EvaluationOutcome {
        self.evaluate_expression(ANONYMOUS_RULE, expression, context, self.settings.trace_enabled)
    }

    /// 评估一组规则，从不分发动作
    #[instrument(skip_all, fields(rules = rules.len()))]
    pub async fn evaluate_only(
        &self,
        rules: &[RuleDefinition],
        context: &DataContext,
        scope: &EvaluationScope,
    ) -> Result<Vec<EvaluationOutcome>> {
        rules.iter().try_for_each(RuleDefinition::check)?;

        let outcomes: Vec<EvaluationOutcome> = stream::iter(rules)
            .map(|rule| async move { self.evaluate_definition(rule, context, scope) })
            .buffered(self.settings.max_concurrent_rules)
            .collect()
            .await;

        let matched = outcomes.iter().filter(|o| o.matched).count();
        info!(rules = outcomes.len(), matched, "规则评估完成");
        Ok(outcomes)
    }

    /// 评估一组规则，对匹配的规则分发其动作
    #[instrument(skip_all, fields(rules = rules.len()))]
    pub async fn evaluate_and_act(
        &self,
        rules: &[RuleDefinition],
        context: &DataContext,
        scope: &EvaluationScope,
    ) -> Result<Vec<RuleActionOutcome>> {
        rules.iter().try_for_each(RuleDefinition::check)?;

        let outcomes: Vec<RuleActionOutcome> = stream::iter(rules)
            .map(|rule| self.evaluate_and_dispatch(rule, context, scope))
            .buffered(self.settings.max_concurrent_rules)
            .collect()
            .await;

        let dispatched: usize = outcomes.iter().map(|o| o.actions.len()).sum();
        info!(rules = outcomes.len(), dispatched, "规则评估与动作执行完成");
        Ok(outcomes)
    }

    /// 评估规则集
    #[instrument(skip_all, fields(ruleset = %ruleset.name))]
    pub async fn evaluate_ruleset(
        &self,
        ruleset: &RulesetDefinition,
        context: &DataContext,
        scope: &EvaluationScope,
    ) -> Result<Vec<EvaluationOutcome>> {
        ruleset.check()?;
        self.evaluate_only(&ruleset.rules, context, scope).await
    }

    /// 评估规则集并执行匹配规则的动作
    #[instrument(skip_all, fields(ruleset = %ruleset.name))]
    pub async fn execute_ruleset(
        &self,
        ruleset: &RulesetDefinition,
        context: &DataContext,
        scope: &EvaluationScope,
    ) -> Result<Vec<RuleActionOutcome>> {
        ruleset.check()?;
        self.evaluate_and_act(&ruleset.rules, context, scope).await
    }

    /// 校验表达式与动作标识
    pub fn validate_rule(&self, expression: &Value, actions: &[String]) -> ValidationReport {
        let rule = validator::validate(expression);
        let action_errors = validator::validate_actions(actions);

        ValidationReport {
            rule_valid: rule.valid,
            rule_errors: rule.errors,
            actions_valid: action_errors.is_empty(),
            action_errors,
        }
    }

    async fn evaluate_and_dispatch(
        &self,
        rule: &RuleDefinition,
        context: &DataContext,
        scope: &EvaluationScope,
    ) -> RuleActionOutcome {
        let evaluation = self.evaluate_definition(rule, context, scope);

        if !evaluation.matched || rule.actions.is_empty() {
            return RuleActionOutcome::new(evaluation, Vec::new());
        }

        debug!(rule_name = %rule.name, actions = rule.actions.len(), "规则匹配，开始执行动作");
        let actions = self
            .dispatcher
            .dispatch_all(&rule.actions, context, scope.cancel_signal())
            .await;
        RuleActionOutcome::new(evaluation, actions)
    }

    fn evaluate_definition(
        &self,
        rule: &RuleDefinition,
        context: &DataContext,
        scope: &EvaluationScope,
    ) -> EvaluationOutcome {
        if scope.cancel_signal().is_cancelled() {
            debug!(rule_name = %rule.name, "调用已取消，跳过规则");
            return EvaluationOutcome::cancelled(&rule.name);
        }

        let trace = scope.is_traced() || self.settings.trace_enabled;
        self.evaluate_expression(&rule.name, &rule.expression, context, trace)
    }

    fn evaluate_expression(
        &self,
        rule_name: &str,
        expression: &Value,
        context: &DataContext,
        trace: bool,
    ) -> EvaluationOutcome {
        let start = Instant::now();
        let result = Expression::parse(expression)
            .and_then(|expr| Self::run(rule_name, &expr, context, trace));
        let duration = start.elapsed();

        let outcome = match result {
            Ok(value) => EvaluationOutcome::completed(rule_name, truthy(&value), duration),
            Err(e) => {
                warn!(rule_name = %rule_name, error = %e, "规则评估失败");
                EvaluationOutcome::failed(rule_name, e.to_string(), duration)
            }
        };

        let status = match outcome.status {
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
            EvaluationStatus::Cancelled => "cancelled",
        };
        metrics::counter!(
            RULE_EVALUATIONS_TOTAL,
            "status" => status,
            "matched" => if outcome.matched { "true" } else { "false" }
        )
        .increment(1);
        metrics::histogram!(RULE_EVALUATION_DURATION_SECONDS).record(duration.as_secs_f64());

        outcome
    }

    fn run(
        rule_name: &str,
        expr: &Expression,
        context: &DataContext,
        trace: bool,
    ) -> std::result::Result<Value, ExpressionError> {
        if !trace {
            return Evaluator::evaluate(expr, context);
        }

        let (result, entries) = Evaluator::evaluate_with_trace(expr, context);
        debug!(rule_name = %rule_name, trace = ?entries, "表达式评估追踪");
        result
    }
}
