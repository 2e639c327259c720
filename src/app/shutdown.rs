use super::{ComponentState, ScanOrchestrator};
use crate::error::{BeaconError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info};

/// Reverse start order: nothing is delivered once scanning stops, the
/// pipeline drains what was delivered, and storage flushes last.
const SHUTDOWN_ORDER: [&str; 6] = ["keyboard", "monitor", "watchdog", "scanner", "ingest", "storage"];

impl ScanOrchestrator {
    /// Stop every registered component; the exit code is 1 if any stop failed
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Background loops only; the ingest consumer has its own token
        self.cancellation_token.cancel();

        let mut exit_code = 0;
        for component in SHUTDOWN_ORDER {
            if self.get_component_state(component).await.is_none() {
                continue;
            }
            if let Err(e) = self.stop_component(component).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_component(&mut self, component: &str) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match component {
            "keyboard" => match &self.keyboard_handler {
                Some(handler) => {
                    self.stop_within(component, Duration::from_secs(2), handler.stop())
                        .await
                }
                None => self.mark_stopped(component).await,
            },
            "monitor" => {
                let task = self.monitor_task.take();
                self.stop_within(component, Duration::from_secs(2), join(component, task))
                    .await
            }
            "watchdog" => {
                // A resync in progress finishes before the task exits
                let task = self.watchdog_task.take();
                let limit = Duration::from_millis(self.config.watchdog.resync_delay_ms)
                    + Duration::from_secs(10);
                self.stop_within(component, limit, join(component, task))
                    .await
            }
            "scanner" => match self.scanner.clone() {
                Some(scanner) => {
                    let stop = async move {
                        scanner.stop().await;
                        Ok(())
                    };
                    self.stop_within(component, Duration::from_secs(5), stop)
                        .await
                }
                None => self.mark_stopped(component).await,
            },
            "ingest" => {
                self.pipeline_token.cancel();
                let task = self.pipeline_task.take();
                self.stop_within(component, Duration::from_secs(10), join(component, task))
                    .await
            }
            "storage" => match self.store.clone() {
                Some(store) => {
                    let flush = async move {
                        let flushed = store.flush().await?;
                        info!(
                            "Flushed {} pending records to {} storage",
                            flushed,
                            store.active_tier()
                        );
                        Ok::<_, BeaconError>(())
                    };
                    self.stop_within(component, Duration::from_secs(10), flush)
                        .await
                }
                None => self.mark_stopped(component).await,
            },
            _ => self.mark_stopped(component).await,
        }
    }

    async fn stop_within<F>(&self, component: &str, limit: Duration, stop: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match timeout(limit, stop).await {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(BeaconError::component(component, "stop timed out"))
            }
        }
    }

    async fn mark_stopped(&self, component: &str) -> Result<()> {
        self.set_component_state(component, ComponentState::Stopped)
            .await;
        Ok(())
    }
}

async fn join(component: &str, task: Option<JoinHandle<()>>) -> Result<()> {
    match task {
        Some(task) => task
            .await
            .map_err(|e| BeaconError::component(component, e.to_string())),
        None => Ok(()),
    }
}
