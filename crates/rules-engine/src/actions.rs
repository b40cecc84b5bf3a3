//! 动作处理器与注册表
//!
//! 通过 `ActionHandler` trait 抽象动作的执行，注册表按
//! `<registry-key>.<handler-name>` 两级索引处理器。
//!
//! 注册表构建后不可变；运行时更新通过 [`SharedRegistry`] 整体替换，
//! 每批分发持有一份快照，替换不会影响正在进行的分发。

use crate::error::{ActionError, DispatchError};
use crate::models::{ActionId, DataContext};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// 动作处理器 trait
///
/// 处理器只能读取数据上下文，返回 JSON 结果或失败。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError>;
}

/// 闭包形式的处理器
pub struct FnHandler<F> {
    f: F,
}

/// 将异步闭包包装为处理器
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(DataContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(DataContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send,
{
    async fn handle(&self, data: &DataContext) -> Result<Value, ActionError> {
        (self.f)(data.clone()).await
    }
}

type HandlerTable = HashMap<String, Arc<dyn ActionHandler>>;

/// 两级动作注册表
#[derive(Clone, Default)]
pub struct ActionRegistry {
    registries: HashMap<String, HandlerTable>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// 按动作标识查找处理器
    pub fn resolve(&self, id: &ActionId) -> Result<Arc<dyn ActionHandler>, DispatchError> {
        let handlers =
            self.registries
                .get(id.registry())
                .ok_or_else(|| DispatchError::RegistryNotFound {
                    registry: id.registry().to_string(),
                })?;

        handlers
            .get(id.handler())
            .cloned()
            .ok_or_else(|| DispatchError::HandlerNotFound {
                registry: id.registry().to_string(),
                handler: id.handler().to_string(),
            })
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.resolve(id).is_ok()
    }

    /// 已注册的注册表键（排序后）
    pub fn registry_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.registries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// 某注册表下的处理器名称（排序后）
    pub fn handler_names(&self, registry: &str) -> Option<Vec<&str>> {
        self.registries.get(registry).map(|handlers| {
            let mut names: Vec<&str> = handlers.keys().map(String::as_str).collect();
            names.sort_unstable();
            names
        })
    }

    /// 处理器总数
    pub fn len(&self) -> usize {
        self.registries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for key in self.registry_keys() {
            map.entry(&key, &self.handler_names(key).unwrap_or_default());
        }
        map.finish()
    }
}

/// 注册表构建器
#[derive(Default)]
pub struct ActionRegistryBuilder {
    registries: HashMap<String, HandlerTable>,
}

impl ActionRegistryBuilder {
    /// 注册处理器，同名处理器后注册者覆盖先注册者
    pub fn register<H>(self, registry: impl Into<String>, handler: impl Into<String>, h: H) -> Self
    where
        H: ActionHandler + 'static,
    {
        self.register_arc(registry, handler, Arc::new(h))
    }

    pub fn register_arc(
        mut self,
        registry: impl Into<String>,
        handler: impl Into<String>,
        h: Arc<dyn ActionHandler>,
    ) -> Self {
        self.registries
            .entry(registry.into())
            .or_default()
            .insert(handler.into(), h);
        self
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            registries: self.registries,
        }
    }
}

/// 可整体替换的共享注册表
///
/// 读取仅一次原子 load；替换对新的分发批次生效。
#[derive(Clone)]
pub struct SharedRegistry {
    current: Arc<ArcSwap<ActionRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: ActionRegistry) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(registry)),
        }
    }

    /// 当前注册表快照
    pub fn snapshot(&self) -> Arc<ActionRegistry> {
        self.current.load_full()
    }

    /// 整体替换注册表，返回旧注册表
    pub fn replace(&self, registry: ActionRegistry) -> Arc<ActionRegistry> {
        let handlers = registry.len();
        let previous = self.current.swap(Arc::new(registry));
        info!(
            previous_handlers = previous.len(),
            handlers, "动作注册表已替换"
        );
        previous
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new(ActionRegistry::default())
    }
}

impl From<ActionRegistry> for SharedRegistry {
    fn from(registry: ActionRegistry) -> Self {
        Self::new(registry)
    }
}
