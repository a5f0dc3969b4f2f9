use tracing::debug;

/// A signal that resolves when the process is asked to terminate,
/// either via SIGINT (ctrl-c) or SIGTERM (orchestrator shutdown).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownSignal;

impl ShutdownSignal {
    /// Creates a new [`ShutdownSignal`].
    pub const fn new() -> Self {
        Self
    }

    /// Waits until a termination signal is received.
    pub async fn wait(self) {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => debug!("Received SIGINT"),
            () = terminate => debug!("Received SIGTERM"),
        }
    }
}

/// Runs the given task until it completes or a shutdown signal is received,
/// whichever comes first. The `on_shutdown` hook runs on both exit paths.
pub async fn run_until_shutdown<E>(
    task: impl Future<Output = Result<(), E>>,
    signal: ShutdownSignal,
    on_shutdown: impl FnOnce(),
) -> Result<(), E> {
    let res = tokio::select! {
        res = task => res,
        () = signal.wait() => Ok(()),
    };

    on_shutdown();
    res
}
