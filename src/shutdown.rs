use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

/// Graceful shutdown coordinator for Switchboard.
///
/// Turns SIGINT/SIGTERM into a `watch` flag that the supervisor loop and worker
/// runtimes observe between units of work.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// A receiver that flips to `true` once shutdown is requested
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Request shutdown programmatically
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Install signal handlers in a background task; the first SIGINT/SIGTERM triggers shutdown
    pub fn install_signal_handlers(&self) -> Result<()> {
        let sender = self.sender.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = signal(SignalKind::terminate())?;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down gracefully"),
                    _ = terminate.recv() => info!("Received SIGTERM, shutting down gracefully"),
                }
                sender.send_replace(true);
            });
        }

        #[cfg(not(unix))]
        {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C, shutting down gracefully");
                }
                sender.send_replace(true);
            });
        }

        Ok(())
    }
}

/// Resolve once `receiver` reports shutdown (or its sender is gone)
pub async fn wait_for(receiver: &mut watch::Receiver<bool>) {
    // wait_for returns Err only when the sender is dropped, which also means shut down
    let _ = receiver.wait_for(|stop| *stop).await;
}
