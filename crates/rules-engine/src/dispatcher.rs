//! 动作分发器
//!
//! 解析动作标识、查找处理器并在独立任务中执行。
//! 所有失败（标识非法、注册表或处理器缺失、处理器报错、超时、panic、取消）
//! 都转换为失败的 [`ActionOutcome`]，分发本身从不返回错误，
//! 一个动作的失败也不会影响同一批次的其他动作。

use crate::actions::{ActionRegistry, SharedRegistry};
use crate::cancellation::CancelSignal;
use crate::error::DispatchError;
use crate::models::{ActionId, DataContext};
use crate::outcome::{ActionOutcome, ActionStatus};
use futures::stream::{self, StreamExt};
use rules_shared::observability::metrics::{
    ACTION_DISPATCHES_TOTAL, ACTION_DISPATCH_DURATION_SECONDS,
};
use serde_json::Value;
use std::any::Any;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, warn};

/// 动作分发器
#[derive(Clone)]
pub struct ActionDispatcher {
    registry: SharedRegistry,
    timeout: Duration,
    max_concurrent_actions: usize,
}

impl ActionDispatcher {
    pub fn new(registry: SharedRegistry, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            max_concurrent_actions: 8,
        }
    }

    /// 单批次内同时执行的动作数上限
    pub fn with_max_concurrency(mut self, max_concurrent_actions: usize) -> Self {
        self.max_concurrent_actions = max_concurrent_actions.max(1);
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 分发单个动作
    pub async fn dispatch(
        &self,
        action: &str,
        data: &DataContext,
        cancel: &CancelSignal,
    ) -> ActionOutcome {
        let registry = self.registry.snapshot();
        self.dispatch_on(&registry, action, data, cancel).await
    }

    /// 分发一批动作，结果顺序与输入顺序一致
    ///
    /// 整批使用同一份注册表快照。
    pub async fn dispatch_all(
        &self,
        actions: &[String],
        data: &DataContext,
        cancel: &CancelSignal,
    ) -> Vec<ActionOutcome> {
        if actions.is_empty() {
            return Vec::new();
        }

        let registry = self.registry.snapshot();
        stream::iter(actions)
            .map(|action| self.dispatch_on(&registry, action, data, cancel))
            .buffered(self.max_concurrent_actions)
            .collect()
            .await
    }

    async fn dispatch_on(
        &self,
        registry: &ActionRegistry,
        action: &str,
        data: &DataContext,
        cancel: &CancelSignal,
    ) -> ActionOutcome {
        let start = Instant::now();
        let result = self.run(registry, action, data, cancel).await;
        let duration = start.elapsed();

        let outcome = match result {
            Ok(payload) => {
                debug!(action = %action, elapsed_ms = duration.as_millis() as u64, "动作执行成功");
                ActionOutcome::succeeded(action, payload, duration)
            }
            Err(e) => {
                let status = match e {
                    DispatchError::TimedOut { .. } => ActionStatus::TimedOut,
                    DispatchError::Cancelled => ActionStatus::Cancelled,
                    _ => ActionStatus::Failed,
                };
                warn!(action = %action, error = %e, ?status, "动作执行失败");
                ActionOutcome::failed(action, status, e.to_string(), duration)
            }
        };

        metrics::counter!(ACTION_DISPATCHES_TOTAL, "status" => status_label(outcome.status))
            .increment(1);
        metrics::histogram!(ACTION_DISPATCH_DURATION_SECONDS).record(duration.as_secs_f64());

        outcome
    }

    async fn run(
        &self,
        registry: &ActionRegistry,
        action: &str,
        data: &DataContext,
        cancel: &CancelSignal,
    ) -> Result<Value, DispatchError> {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let id = ActionId::parse(action)?;
        let handler = registry.resolve(&id)?;

        // 处理器在独立任务中运行，panic 被 JoinError 捕获，超时或取消时中止任务
        let data = data.clone();
        let mut task = tokio::spawn(async move { handler.handle(&data).await });

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                task.abort();
                Err(DispatchError::Cancelled)
            }

            joined = tokio::time::timeout(self.timeout, &mut task) => match joined {
                Ok(Ok(result)) => result.map_err(DispatchError::from),
                Ok(Err(e)) => Err(DispatchError::Panicked(join_error_message(e))),
                Err(_) => {
                    task.abort();
                    Err(DispatchError::TimedOut {
                        timeout_ms: self.timeout.as_millis() as u64,
                    })
                }
            },
        }
    }
}

fn status_label(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Succeeded => "succeeded",
        ActionStatus::Failed => "failed",
        ActionStatus::TimedOut => "timed_out",
        ActionStatus::Cancelled => "cancelled",
    }
}

fn join_error_message(e: JoinError) -> String {
    if !e.is_panic() {
        return "task aborted".to_string();
    }
    panic_message(e.into_panic())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
