//! 规则引擎服务
//!
//! 从 stdin 逐行读取 JSON 工具请求，向 stdout 逐行写出响应。

use anyhow::Result;
use rules_engine::catalog::catalog_registry;
use rules_engine::{
    CancelHandle, CancelSignal, EngineSettings, EvaluationScope, RuleEngine, SharedRegistry,
    ToolService, cancellation,
};
use rules_shared::config::AppConfig;
use rules_shared::observability;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "rules-engine";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let _guard = observability::init(&config.service_name, &config.observability)?;

    info!(
        environment = %config.environment,
        action_timeout_ms = config.engine.action_timeout_ms,
        "Starting rules-engine service..."
    );

    let registry = SharedRegistry::new(catalog_registry());
    info!(handlers = registry.snapshot().len(), "Action registry initialized");

    let engine = RuleEngine::new(registry, EngineSettings::from(&config.engine));
    let service = ToolService::new(engine);

    let (handle, signal) = cancellation();
    tokio::spawn(cancel_on_shutdown(handle));

    let scope = EvaluationScope::new()
        .with_cancel(signal.clone())
        .with_trace(config.engine.trace_enabled);

    serve(&service, &scope, &signal).await?;

    info!("Service shutdown complete");
    Ok(())
}

/// 逐行处理请求，直到 stdin 关闭或收到关闭信号
///
/// 关闭信号到达时正在处理的请求仍会写出响应（其中未完成的规则与动作标记为 cancelled）。
async fn serve(service: &ToolService, scope: &EvaluationScope, signal: &CancelSignal) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            biased;
            _ = signal.cancelled() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            info!("stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = service.handle_line(&line, scope).await;
        match serde_json::to_string(&response) {
            Ok(mut payload) => {
                payload.push('\n');
                stdout.write_all(payload.as_bytes()).await?;
                stdout.flush().await?;
            }
            Err(e) => error!(error = %e, "Failed to serialize response"),
        }
    }

    Ok(())
}

async fn cancel_on_shutdown(handle: CancelHandle) {
    shutdown_signal().await;
    handle.cancel();
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
