use super::orchestrator::{deliver_shutdown, ShutdownSender};
use super::{ScanOrchestrator, ShutdownReason};
use crate::error::{BeaconError, Result};
use std::sync::Arc;
use tracing::{error, info};

impl ScanOrchestrator {
    /// Run until a signal or a shutdown request arrives, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("beacontrail is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| BeaconError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers();

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| BeaconError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("beacontrail shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self) {
        #[cfg(unix)]
        {
            let sender = Arc::clone(&self.shutdown_sender);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};

                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    signal_shutdown(&sender, "SIGTERM").await;
                }
            });
        }

        let sender = Arc::clone(&self.shutdown_sender);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT signal (Ctrl+C)");
                signal_shutdown(&sender, "SIGINT").await;
            }
        });
    }
}

async fn signal_shutdown(sender: &ShutdownSender, signal: &str) {
    deliver_shutdown(sender, ShutdownReason::Signal(signal.to_string())).await;
}
