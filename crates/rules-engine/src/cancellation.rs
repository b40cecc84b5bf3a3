//! 请求级取消信号
//!
//! 基于 `tokio::sync::watch`：调用方持有 [`CancelHandle`]，
//! 评估与分发过程持有可克隆的 [`CancelSignal`]。

use std::future::pending;
use tokio::sync::watch;

/// 创建一对取消句柄与信号
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

/// 取消句柄，由发起调用的一方持有
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// 触发取消，重复调用无副作用
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// 派生一个新的信号
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// 取消信号，可在并发任务间克隆传递
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// 永不触发的信号
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// 等待取消触发
    ///
    /// 句柄被丢弃且从未触发时永远挂起。
    pub async fn cancelled(&self) {
        let Some(rx) = self.rx.as_ref() else {
            return pending().await;
        };

        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            pending::<()>().await;
        }
    }
}
