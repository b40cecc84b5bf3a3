//! 规则引擎领域模型

use crate::error::{DispatchError, Result, RuleError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 动作标识的分隔符
pub const ACTION_SEPARATOR: char = '.';

/// 规则定义
///
/// 表达式保留原始 JSON 形式，在评估时才解析，
/// 单条规则的表达式错误只影响该规则自身的结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "rule", alias = "expression")]
    pub expression: Value,
    #[serde(default, deserialize_with = "deserialize_actions")]
    pub actions: Vec<String>,
}

impl RuleDefinition {
    pub fn new(name: impl Into<String>, expression: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            expression,
            actions: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    /// 顶层形状检查，在任何规则开始评估前执行
    pub fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RuleError::InvalidRule("规则名称不能为空".to_string()));
        }
        Ok(())
    }
}

/// `actions` 字段允许缺省或为 null
fn deserialize_actions<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// 规则集定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rules: Vec<RuleDefinition>,
}

impl RulesetDefinition {
    pub fn new(name: impl Into<String>, rules: Vec<RuleDefinition>) -> Self {
        Self {
            name: name.into(),
            description: None,
            rules,
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RuleError::InvalidRule("规则集名称不能为空".to_string()));
        }
        self.rules.iter().try_for_each(RuleDefinition::check)
    }
}

/// 动作标识 `<registry-key>.<handler-name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    registry: String,
    handler: String,
}

impl ActionId {
    /// 词法解析：恰好一个分隔符，两段均非空且不含空白
    pub fn parse(raw: &str) -> std::result::Result<Self, DispatchError> {
        let invalid = || DispatchError::InvalidActionId {
            action: raw.to_string(),
        };

        let mut parts = raw.split(ACTION_SEPARATOR);
        let (Some(registry), Some(handler), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let is_token = |s: &str| !s.is_empty() && !s.chars().any(char::is_whitespace);
        if !is_token(registry) || !is_token(handler) {
            return Err(invalid());
        }

        Ok(Self {
            registry: registry.to_string(),
            handler: handler.to_string(),
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }
}

impl FromStr for ActionId {
    type Err = DispatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.registry, ACTION_SEPARATOR, self.handler)
    }
}

/// 数据上下文 - 提供给规则引擎和动作处理器的只读数据
///
/// 内部以 `Arc` 共享，克隆开销恒定，可安全地传给并发执行的处理器。
#[derive(Debug, Clone, PartialEq)]
pub struct DataContext {
    data: Arc<Value>,
}

impl DataContext {
    pub fn new(data: Value) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// 空上下文（空对象）
    pub fn empty() -> Self {
        Self::new(Value::Object(Map::new()))
    }

    /// 从 JSON 对象创建
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// 获取字段值（支持点号分隔的路径，如 "user.tier" 或 "order.items.0.sku"）
    ///
    /// 空路径返回整个上下文。
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.data, path)
    }

    /// 读取顶层字符串字段
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_field(key).and_then(Value::as_str)
    }

    /// 获取底层数据
    pub fn data(&self) -> &Value {
        &self.data
    }
}

impl Default for DataContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for DataContext {
    fn from(data: Value) -> Self {
        Self::new(data)
    }
}

impl Serialize for DataContext {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::new)
    }
}

/// 逐段下钻解析路径，任何一段缺失都返回 None
pub(crate) fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                // 支持数组索引访问，如 "items.0.name"
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_deserialization() {
        let json = r#"
        {
            "name": "high_value_order",
            "description": "Detect high-value orders",
            "rule": {">": [{"var": "order.total"}, 1000]},
            "actions": ["NotificationActions.send_email"]
        }
        "#;

        let rule: RuleDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(rule.name, "high_value_order");
        assert_eq!(rule.description.as_deref(), Some("Detect high-value orders"));
        assert_eq!(rule.actions, vec!["NotificationActions.send_email"]);
    }

    #[test]
    fn test_rule_actions_null_or_absent() {
        let rule: RuleDefinition =
            serde_json::from_value(json!({"name": "a", "rule": true, "actions": null})).unwrap();
        assert!(rule.actions.is_empty());

        let rule: RuleDefinition =
            serde_json::from_value(json!({"name": "b", "expression": true})).unwrap();
        assert!(rule.actions.is_empty());
        assert_eq!(rule.expression, json!(true));
    }

    #[test]
    fn test_rule_check_rejects_empty_name() {
        let rule = RuleDefinition::new("  ", json!(true));
        assert!(rule.check().is_err());

        let ruleset = RulesetDefinition::new("set", vec![RuleDefinition::new("", json!(true))]);
        assert!(ruleset.check().is_err());
    }

    #[test]
    fn test_action_id_parse() {
        let id = ActionId::parse("NotificationActions.send_email").unwrap();
        assert_eq!(id.registry(), "NotificationActions");
        assert_eq!(id.handler(), "send_email");
        assert_eq!(id.to_string(), "NotificationActions.send_email");
    }

    #[test]
    fn test_action_id_rejects_malformed() {
        for raw in ["send_email", "a.b.c", ".send", "Notify.", "", "No tify.send", "a..b"] {
            assert!(ActionId::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_data_context() {
        let ctx = DataContext::new(json!({
            "user": {"tier": "gold", "tags": ["vip", "frequent"]},
            "order": {"items": [{"sku": "A-1"}]}
        }));

        assert_eq!(ctx.get_field("user.tier"), Some(&json!("gold")));
        assert_eq!(ctx.get_field("user.tags.1"), Some(&json!("frequent")));
        assert_eq!(ctx.get_field("order.items.0.sku"), Some(&json!("A-1")));
        assert_eq!(ctx.get_field("user.tier.name"), None);
        assert_eq!(ctx.get_field("nonexistent.deep.path"), None);
        assert_eq!(ctx.get_field(""), Some(ctx.data()));
        assert_eq!(ctx.get_str("user"), None);
    }
}
