//! 指标定义
//!
//! 基于 metrics facade 描述规则引擎的指标。进程未安装 recorder 时，
//! 所有记录操作都是空操作，因此库代码可以无条件上报。

/// 规则评估次数，标签 `status`、`matched`
pub const RULE_EVALUATIONS_TOTAL: &str = "rule_evaluations_total";
/// 规则评估耗时（秒）
pub const RULE_EVALUATION_DURATION_SECONDS: &str = "rule_evaluation_duration_seconds";
/// 动作分发次数，标签 `status`
pub const ACTION_DISPATCHES_TOTAL: &str = "action_dispatches_total";
/// 动作执行耗时（秒）
pub const ACTION_DISPATCH_DURATION_SECONDS: &str = "action_dispatch_duration_seconds";

/// 注册规则引擎指标描述
pub fn describe_engine_metrics() {
    metrics::describe_counter!(RULE_EVALUATIONS_TOTAL, "Total number of rule evaluations");
    metrics::describe_histogram!(
        RULE_EVALUATION_DURATION_SECONDS,
        "Rule evaluation duration in seconds"
    );
    metrics::describe_counter!(ACTION_DISPATCHES_TOTAL, "Total number of action dispatches");
    metrics::describe_histogram!(
        ACTION_DISPATCH_DURATION_SECONDS,
        "Action dispatch duration in seconds"
    );
}
