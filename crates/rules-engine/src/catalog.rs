//! 内置演示动作目录
//!
//! 提供通知、安全、业务三类模拟动作。当前版本仅记录日志并返回执行记录，
//! 便于在无外部依赖的情况下验证规则到动作的完整链路。
//! 替换为真实实现时只需实现同一 `ActionHandler` trait 并注册到注册表。

use crate::actions::{ActionHandler, ActionRegistry, ActionRegistryBuilder};
use crate::error::ActionError;
use crate::models::DataContext;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

pub const NOTIFICATION_ACTIONS: &str = "NotificationActions";
pub const SECURITY_ACTIONS: &str = "SecurityActions";
pub const BUSINESS_ACTIONS: &str = "BusinessActions";

/// 读取顶层字段，仅在键不存在时使用默认值（显式 null 原样保留）
fn field_or(data: &DataContext, key: &str, default: Value) -> Value {
    data.data().get(key).cloned().unwrap_or(default)
}

/// 读取用于展示的顶层文本字段
fn display_field(data: &DataContext, key: &str, default: &str) -> String {
    match data.data().get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => default.to_string(),
    }
}

// ---------------------------------------------------------------------------
// 通知类动作
// ---------------------------------------------------------------------------

/// 模拟邮件通知
pub struct SendEmail;

#[async_trait]
impl ActionHandler for SendEmail {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        let recipient = field_or(data, "email", json!("unknown@example.com"));
        let user = display_field(data, "user", "unknown user");

        info!(recipient = %recipient, user = %user, "模拟发送邮件通知");

        Ok(json!({
            "action": "send_email",
            "recipient": recipient,
            "subject": format!("Rule triggered for {}", user),
            "status": "sent"
        }))
    }
}

/// 模拟短信通知
pub struct SendSms;

#[async_trait]
impl ActionHandler for SendSms {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        let phone = field_or(data, "phone", json!("+1234567890"));
        let user = display_field(data, "user", "unknown user");

        info!(phone = %phone, user = %user, "模拟发送短信通知");

        Ok(json!({
            "action": "send_sms",
            "phone": phone,
            "message": format!("Alert: Rule triggered for {}", user),
            "status": "sent"
        }))
    }
}

/// 记录规则触发事件
pub struct LogEvent;

#[async_trait]
impl ActionHandler for LogEvent {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        info!(data = %data.data(), "记录规则触发事件");

        Ok(json!({
            "action": "log_event",
            "event_type": "rule_triggered",
            "data": data.data(),
            "timestamp": Utc::now().to_rfc3339(),
            "status": "logged"
        }))
    }
}

// ---------------------------------------------------------------------------
// 安全类动作
// ---------------------------------------------------------------------------

/// 模拟封禁用户
pub struct BlockUser;

#[async_trait]
impl ActionHandler for BlockUser {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        let user_id = field_or(data, "user_id", json!("unknown"));
        info!(user_id = %user_id, "模拟封禁用户");

        Ok(json!({
            "action": "block_user",
            "user_id": user_id,
            "reason": "Rule violation detected",
            "status": "blocked"
        }))
    }
}

/// 模拟要求多因素认证
pub struct RequireMfa;

#[async_trait]
impl ActionHandler for RequireMfa {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        let user_id = field_or(data, "user_id", json!("unknown"));
        info!(user_id = %user_id, "模拟要求多因素认证");

        Ok(json!({
            "action": "require_mfa",
            "user_id": user_id,
            "mfa_method": "sms",
            "status": "required"
        }))
    }
}

/// 模拟创建安全事件单
pub struct CreateIncident;

#[async_trait]
impl ActionHandler for CreateIncident {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        let incident_id = format!("INC-{}", Uuid::now_v7());
        let user = display_field(data, "user", "unknown user");

        info!(incident_id = %incident_id, user = %user, "模拟创建安全事件单");

        Ok(json!({
            "action": "create_incident",
            "incident_id": incident_id,
            "severity": "high",
            "description": format!("Security rule triggered for {}", user),
            "status": "created"
        }))
    }
}

// ---------------------------------------------------------------------------
// 业务类动作
// ---------------------------------------------------------------------------

/// 模拟订单折扣
pub struct ApplyDiscount;

#[async_trait]
impl ActionHandler for ApplyDiscount {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        let order_id = field_or(data, "order_id", json!("unknown"));
        let discount_percent = field_or(data, "discount_percent", json!(10));

        info!(order_id = %order_id, discount_percent = %discount_percent, "模拟应用订单折扣");

        Ok(json!({
            "action": "apply_discount",
            "order_id": order_id,
            "discount_percent": discount_percent,
            "status": "applied"
        }))
    }
}

/// 模拟工单升级
pub struct EscalateSupport;

#[async_trait]
impl ActionHandler for EscalateSupport {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        let ticket_id = field_or(data, "ticket_id", json!("unknown"));
        info!(ticket_id = %ticket_id, "模拟升级支持工单");

        Ok(json!({
            "action": "escalate_support",
            "ticket_id": ticket_id,
            "escalation_level": "manager",
            "status": "escalated"
        }))
    }
}

/// 模拟库存更新
pub struct UpdateInventory;

#[async_trait]
impl ActionHandler for UpdateInventory {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        let product_id = field_or(data, "product_id", json!("unknown"));
        let quantity = field_or(data, "quantity", json!(0));

        info!(product_id = %product_id, quantity = %quantity, "模拟更新库存");

        Ok(json!({
            "action": "update_inventory",
            "product_id": product_id,
            "quantity": quantity,
            "status": "updated"
        }))
    }
}

/// 将全部演示动作注册到构建器
pub fn register_catalog(builder: ActionRegistryBuilder) -> ActionRegistryBuilder {
    builder
        .register(NOTIFICATION_ACTIONS, "send_email", SendEmail)
        .register(NOTIFICATION_ACTIONS, "send_sms", SendSms)
        .register(NOTIFICATION_ACTIONS, "log_event", LogEvent)
        .register(SECURITY_ACTIONS, "block_user", BlockUser)
        .register(SECURITY_ACTIONS, "require_mfa", RequireMfa)
        .register(SECURITY_ACTIONS, "create_incident", CreateIncident)
        .register(BUSINESS_ACTIONS, "apply_discount", ApplyDiscount)
        .register(BUSINESS_ACTIONS, "escalate_support", EscalateSupport)
        .register(BUSINESS_ACTIONS, "update_inventory", UpdateInventory)
}

/// 仅包含演示动作的注册表
pub fn catalog_registry() -> ActionRegistry {
    register_catalog(ActionRegistry::builder()).build()
}
