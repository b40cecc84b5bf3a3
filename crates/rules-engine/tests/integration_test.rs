//! 规则引擎集成测试
//!
//! 通过公开 API 测试完整的规则评估、动作分发、取消与注册表替换流程。

use rules_engine::catalog::{NOTIFICATION_ACTIONS, catalog_registry};
use rules_engine::{
    ActionError, ActionRegistry, ActionStatus, DataContext, EngineSettings, EvaluationScope,
    EvaluationStatus, RuleDefinition, RuleEngine, RulesetDefinition, SharedRegistry, ToolService,
    cancellation, handler_fn,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 创建测试上下文：模拟一个下单事件
fn create_order_context() -> DataContext {
    DataContext::new(json!({
        "user": {
            "id": "user-67890",
            "tier": "gold",
            "email": "gold@example.com",
            "age": 25
        },
        "order": {
            "id": "order-12345",
            "total": 1500,
            "items": [
                {"sku": "TICKET-001", "price": 500, "quantity": 2},
                {"sku": "FOOD-001", "price": 500, "quantity": 1}
            ]
        },
        "email": "gold@example.com",
        "user_id": "user-67890"
    }))
}

fn catalog_engine() -> RuleEngine {
    RuleEngine::new(
        SharedRegistry::new(catalog_registry()),
        EngineSettings::default(),
    )
}

fn settings_with_timeout(timeout: Duration) -> EngineSettings {
    EngineSettings {
        action_timeout: timeout,
        ..EngineSettings::default()
    }
}

// ==================== 典型场景 ====================

#[test]
fn test_simple_comparison_matches() {
    let engine = catalog_engine();
    let ctx = DataContext::new(json!({"age": 25}));

    let outcome = engine.evaluate_rule(&json!({">": [{"var": "age"}, 18]}), &ctx);

    assert!(outcome.matched);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.status, EvaluationStatus::Completed);
}

#[test]
fn test_short_circuit_skips_second_child() {
    let engine = catalog_engine();
    let ctx = DataContext::new(json!({"user": {"tier": "gold"}, "order": {"total": "not a number"}}));

    // 第二个子节点对该数据会产生类型错误，短路后不会被求值
    let outcome = engine.evaluate_rule(
        &json!({"and": [
            {"==": [{"var": "user.tier"}, "platinum"]},
            {">": [{"var": "order.total"}, 500]}
        ]}),
        &ctx,
    );

    assert!(!outcome.matched);
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_missing_registry_yields_failed_action() {
    let engine = RuleEngine::new(SharedRegistry::default(), EngineSettings::default());
    let rules = vec![RuleDefinition::new("always", json!(true)).with_actions(["Notify.sendEmail"])];

    let outcomes = engine
        .evaluate_and_act(&rules, &DataContext::empty(), &EvaluationScope::new())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].matched);
    assert_eq!(outcomes[0].actions.len(), 1);
    assert!(!outcomes[0].actions[0].success);
    assert!(
        outcomes[0].actions[0]
            .error
            .as_deref()
            .unwrap()
            .contains("registry not found")
    );
}

#[tokio::test]
async fn test_expression_error_is_isolated_to_its_rule() {
    let engine = catalog_engine();
    let rules = vec![
        RuleDefinition::new("first", json!({">": [{"var": "order.total"}, 1000]})),
        RuleDefinition::new("second", json!({"frobnicate": [1, 2]})),
        RuleDefinition::new("third", json!({"==": [{"var": "user.tier"}, "gold"]})),
    ];

    let outcomes = engine
        .evaluate_only(&rules, &create_order_context(), &EvaluationScope::new())
        .await
        .unwrap();

    let names: Vec<&str> = outcomes.iter().map(|o| o.rule_name.as_str()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);

    assert!(outcomes[0].matched);
    assert!(!outcomes[1].matched);
    assert_eq!(outcomes[1].status, EvaluationStatus::Failed);
    assert!(outcomes[1].error.as_deref().unwrap().contains("frobnicate"));
    assert!(outcomes[2].matched);
}

#[tokio::test]
async fn test_extreme_numeric_arguments_do_not_abort_batch() {
    let engine = catalog_engine();
    let rules = vec![
        RuleDefinition::new("gold", json!({"==": [{"var": "user.tier"}, "gold"]})),
        RuleDefinition::new(
            "edges",
            json!({"and": [
                {"==": [{"substr": ["abc", 1, 1e300]}, "bc"]},
                {"==": [{"substr": ["abc", -1e300, -1e300]}, ""]},
                {"missing_some": [1, [["a", "b", "c"]]]}
            ]}),
        ),
        RuleDefinition::new("overflow", json!({">": [{"*": [1e300, 1e300]}, 0]})),
    ];

    let outcomes = engine
        .evaluate_and_act(&rules, &create_order_context(), &EvaluationScope::new())
        .await
        .unwrap();

    let names: Vec<&str> = outcomes.iter().map(|o| o.rule_name.as_str()).collect();
    assert_eq!(names, vec!["gold", "edges", "overflow"]);
    assert!(outcomes[0].matched);
    assert!(outcomes[1].matched);
    assert!(outcomes[1].rule_error.is_none());
    assert!(!outcomes[2].matched);
    assert_eq!(outcomes[2].status, EvaluationStatus::Failed);
    assert!(outcomes[2].rule_error.as_deref().unwrap().contains("non-finite"));
}

// ==================== 完整工作流测试 ====================

#[tokio::test]
async fn test_ruleset_with_catalog_actions() {
    let engine = catalog_engine();
    let ruleset: RulesetDefinition = serde_json::from_value(json!({
        "name": "order_rules",
        "rules": [
            {
                "name": "high_value_order",
                "rule": {">": [{"var": "order.total"}, 1000]},
                "actions": ["NotificationActions.send_email", "BusinessActions.apply_discount"]
            },
            {
                "name": "bulk_order",
                "rule": {">": [{"reduce": [
                    {"var": "order.items"},
                    {"+": [{"var": "current.quantity"}, {"var": "accumulator"}]},
                    0
                ]}, 10]},
                "actions": ["BusinessActions.update_inventory"]
            }
        ]
    }))
    .unwrap();

    let outcomes = engine
        .execute_ruleset(&ruleset, &create_order_context(), &EvaluationScope::new())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].matched);
    assert!(outcomes[0].all_actions_succeeded());
    assert_eq!(
        outcomes[0].actions[0].payload.as_ref().unwrap()["recipient"],
        "gold@example.com"
    );
    assert_eq!(outcomes[0].actions[1].payload.as_ref().unwrap()["discount_percent"], 10);

    assert!(!outcomes[1].matched);
    assert!(outcomes[1].actions.is_empty());

    let evaluations = engine
        .evaluate_ruleset(&ruleset, &create_order_context(), &EvaluationScope::new())
        .await
        .unwrap();
    assert_eq!(evaluations.len(), 2);
}

#[tokio::test]
async fn test_later_actions_run_after_failures() {
    let engine = catalog_engine();
    let rules = vec![RuleDefinition::new("r", json!(true)).with_actions([
        "not-an-action",
        "NotificationActions.does_not_exist",
        "SecurityActions.block_user",
    ])];

    let outcomes = engine
        .evaluate_and_act(&rules, &create_order_context(), &EvaluationScope::new())
        .await
        .unwrap();

    let actions = &outcomes[0].actions;
    assert_eq!(actions.len(), 3);
    assert!(!actions[0].success);
    assert!(!actions[1].success);
    assert!(actions[2].success);
    assert_eq!(actions[2].payload.as_ref().unwrap()["user_id"], "user-67890");
}

#[test]
fn test_evaluation_is_idempotent() {
    let engine = catalog_engine();
    let ctx = create_order_context();
    let rule = json!({"some": [{"var": "order.items"}, {"==": [{"var": "sku"}, "FOOD-001"]}]});

    let first = engine.evaluate_rule(&rule, &ctx);
    let second = engine.evaluate_rule(&rule, &ctx);
    assert_eq!(first.matched, second.matched);
    assert_eq!(first.error, second.error);
    assert!(first.matched);
}

#[test]
fn test_missing_nested_path_is_never_an_error() {
    let engine = catalog_engine();
    let ctx = DataContext::empty();

    let outcome = engine.evaluate_rule(&json!({"var": "a.b.c.d"}), &ctx);
    assert!(!outcome.matched);
    assert!(outcome.error.is_none());

    let outcome = engine.evaluate_rule(&json!({"==": [{"var": ["a.b", "dflt"]}, "dflt"]}), &ctx);
    assert!(outcome.matched);
}

#[test]
fn test_sync_callers_can_block_on_engine() {
    let engine = catalog_engine();
    let rules = vec![RuleDefinition::new("adult", json!({">=": [{"var": "user.age"}, 18]}))];

    let outcomes = tokio_test::block_on(engine.evaluate_only(
        &rules,
        &create_order_context(),
        &EvaluationScope::new(),
    ))
    .unwrap();
    assert!(outcomes[0].matched);
}

// ==================== 超时与取消 ====================

#[tokio::test]
async fn test_slow_handler_times_out_without_blocking_others() {
    let registry = ActionRegistry::builder()
        .register(
            "Ops",
            "slow",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Value::Null)
            }),
        )
        .register("Ops", "fast", handler_fn(|_| async { Ok(json!("done")) }))
        .build();
    let engine = RuleEngine::new(
        SharedRegistry::new(registry),
        settings_with_timeout(Duration::from_millis(50)),
    );

    let rules = vec![RuleDefinition::new("r", json!(true)).with_actions(["Ops.slow", "Ops.fast"])];
    let outcomes = engine
        .evaluate_and_act(&rules, &DataContext::empty(), &EvaluationScope::new())
        .await
        .unwrap();

    let actions = &outcomes[0].actions;
    assert_eq!(actions[0].status, ActionStatus::TimedOut);
    assert!(actions[0].error.as_deref().unwrap().contains("timed out"));
    assert_eq!(actions[1].status, ActionStatus::Succeeded);
}

#[tokio::test]
async fn test_cancellation_marks_in_flight_actions() {
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    let registry = ActionRegistry::builder()
        .register(
            "Ops",
            "wait",
            handler_fn(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, ActionError>(Value::Null)
                }
            }),
        )
        .build();
    let engine = RuleEngine::new(
        SharedRegistry::new(registry),
        settings_with_timeout(Duration::from_secs(30)),
    );

    let (handle, signal) = cancellation();
    let scope = EvaluationScope::new().with_cancel(signal);
    let rules = vec![RuleDefinition::new("r", json!(true)).with_actions(["Ops.wait", "Ops.wait"])];

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let outcomes = tokio::time::timeout(
        Duration::from_secs(5),
        engine.evaluate_and_act(&rules, &DataContext::empty(), &scope),
    )
    .await
    .expect("cancellation should end the call promptly")
    .unwrap();

    assert!(outcomes[0].matched);
    assert_eq!(outcomes[0].actions.len(), 2);
    assert!(outcomes[0]
        .actions
        .iter()
        .all(|a| a.status == ActionStatus::Cancelled && !a.success));
    assert!(started.load(Ordering::SeqCst) >= 1);
}

// ==================== 注册表替换 ====================

#[tokio::test]
async fn test_registry_replacement_applies_to_new_calls() {
    let shared = SharedRegistry::new(catalog_registry());
    let engine = RuleEngine::new(shared.clone(), EngineSettings::default());
    let rules = vec![
        RuleDefinition::new("r", json!(true))
            .with_actions([format!("{}.send_email", NOTIFICATION_ACTIONS)]),
    ];

    let before = engine
        .evaluate_and_act(&rules, &DataContext::empty(), &EvaluationScope::new())
        .await
        .unwrap();
    assert!(before[0].actions[0].success);

    shared.replace(
        ActionRegistry::builder()
            .register("Other", "noop", handler_fn(|_| async { Ok(Value::Null) }))
            .build(),
    );

    let after = engine
        .evaluate_and_act(&rules, &DataContext::empty(), &EvaluationScope::new())
        .await
        .unwrap();
    assert_eq!(
        after[0].actions[0].error.as_deref(),
        Some("registry not found: NotificationActions")
    );
}

// ==================== 工具接口 ====================

#[tokio::test]
async fn test_tool_service_round_trip() {
    let service = ToolService::new(catalog_engine());
    let scope = EvaluationScope::new();

    let response = service
        .handle_line(
            &json!({
                "id": 42,
                "tool": "execute_rule_actions",
                "rules": [{
                    "name": "vip",
                    "rule": {"in": [{"var": "user.tier"}, ["gold", "platinum"]]},
                    "actions": ["NotificationActions.log_event"]
                }],
                "data": {"user": {"tier": "gold"}}
            })
            .to_string(),
            &scope,
        )
        .await;

    let serialized = serde_json::to_value(&response).unwrap();
    assert_eq!(serialized["id"], 42);
    assert!(serialized.get("error").is_none());
    let outcome = &serialized["result"][0];
    assert_eq!(outcome["rule_name"], "vip");
    assert_eq!(outcome["matched"], true);
    assert_eq!(outcome["rule_error"], Value::Null);
    assert_eq!(outcome["actions_executed"][0]["result"]["status"], "logged");
}
