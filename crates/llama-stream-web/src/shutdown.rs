//! Process signal handling.

use std::sync::Arc;

use log::{error, info};

use llama_stream_engine::{SessionRegistry, ShutdownOutcome};

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Cancel generation and release the engine once `signal` resolves.
///
/// Meant for `Server::with_graceful_shutdown`: by the time it returns the
/// running session, if any, has been told to stop.
pub async fn shutdown_on<F>(signal: F, registry: Arc<SessionRegistry>)
where
    F: std::future::Future<Output = ()>,
{
    signal.await;
    match registry.request_shutdown() {
        ShutdownOutcome::ReleasedNow => info!("Engine released, no generation was running"),
        ShutdownOutcome::Deferred => info!("Waiting for the running generation to stop"),
        ShutdownOutcome::AlreadyReleased => info!("Engine was already released"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llama_stream_engine::dialect_for;
    use llama_stream_engine::mock::canned_engine;
    use llama_stream_types::DialectKind;

    #[tokio::test]
    async fn test_idle_engine_released_on_signal() {
        let dialect = dialect_for(DialectKind::Mistral);
        let registry = Arc::new(SessionRegistry::new(dialect, canned_engine(dialect, "x").unwrap()));
        shutdown_on(async {}, registry.clone()).await;
        assert!(registry.is_shutting_down());
        assert!(registry.is_released());
        assert_eq!(registry.request_shutdown(), ShutdownOutcome::AlreadyReleased);
    }
}
