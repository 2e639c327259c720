use super::ScanProducer;
use crate::config::ScannerConfig;
use crate::decoder::{from_hex, parse_company_key};
use crate::error::ScannerError;
use crate::record::AdvertisementEvent;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One line of a JSON-lines capture
#[derive(Debug, Deserialize)]
struct CaptureLine {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uuids: Option<Vec<String>>,
    #[serde(default)]
    rssi: Option<f64>,
    #[serde(rename = "txPower", default)]
    tx_power: Option<f64>,
    #[serde(rename = "manufacturerData", default)]
    manufacturer_data: BTreeMap<String, String>,
    #[serde(rename = "serviceData", default)]
    service_data: BTreeMap<String, String>,
}

impl CaptureLine {
    fn into_event(self, line_no: usize) -> AdvertisementEvent {
        let mut manufacturer_data = BTreeMap::new();
        for (key, hex) in self.manufacturer_data {
            match (parse_company_key(&key), from_hex(&hex)) {
                (Some(company), Some(bytes)) => {
                    manufacturer_data.insert(company, bytes);
                }
                _ => warn!("Capture line {}: ignoring manufacturer entry {}", line_no, key),
            }
        }

        let mut service_data = BTreeMap::new();
        for (key, hex) in self.service_data {
            match from_hex(&hex) {
                Some(bytes) => {
                    service_data.insert(key, bytes);
                }
                None => warn!("Capture line {}: ignoring service entry {}", line_no, key),
            }
        }

        AdvertisementEvent {
            device_name: self.name,
            service_uuids: self.uuids,
            rssi: self.rssi,
            tx_power: self.tx_power,
            manufacturer_data,
            service_data,
        }
    }
}

/// Parse a capture, skipping blank and malformed lines
pub fn parse_capture(contents: &str) -> Vec<AdvertisementEvent> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<CaptureLine>(line) {
            Ok(parsed) => Some(parsed.into_event(index + 1)),
            Err(e) => {
                warn!("Skipping malformed capture line {}: {}", index + 1, e);
                None
            }
        })
        .collect()
}

struct ReplayRun {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Replays a recorded advertisement capture as if it came from the radio
pub struct ReplayScanner {
    path: PathBuf,
    interval: Duration,
    looped: bool,
    run: Mutex<Option<ReplayRun>>,
    active: Arc<AtomicBool>,
}

impl ReplayScanner {
    pub fn new<P: AsRef<Path>>(path: P, interval: Duration, looped: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            interval,
            looped,
            run: Mutex::new(None),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &ScannerConfig) -> Option<Self> {
        config.replay_path.as_ref().map(|path| {
            Self::new(
                path,
                Duration::from_millis(config.replay_interval_ms),
                config.replay_loop,
            )
        })
    }

    fn start_error(&self, details: String) -> ScannerError {
        ScannerError::StartFailed {
            producer: self.name().to_string(),
            details,
        }
    }
}

#[async_trait]
impl ScanProducer for ReplayScanner {
    fn name(&self) -> &str {
        "replay"
    }

    async fn start(&self, sink: mpsc::Sender<AdvertisementEvent>) -> Result<(), ScannerError> {
        let mut run = self.run.lock().await;
        if run.is_some() && self.is_active() {
            return Err(ScannerError::AlreadyRunning);
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.start_error(format!("{}: {}", self.path.display(), e)))?;
        let events = parse_capture(&contents);
        if events.is_empty() {
            return Err(self.start_error(format!(
                "{} contains no advertisements",
                self.path.display()
            )));
        }

        info!(
            "Replaying {} advertisements from {}",
            events.len(),
            self.path.display()
        );

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let interval = self.interval;
        let looped = self.looped;
        let active = self.active.clone();
        active.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            'replay: loop {
                for event in &events {
                    tokio::select! {
                        _ = task_cancel.cancelled() => break 'replay,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    if sink.send(event.clone()).await.is_err() {
                        debug!("Replay consumer gone");
                        break 'replay;
                    }
                }
                if !looped {
                    debug!("Replay capture exhausted");
                    break;
                }
            }
            active.store(false, Ordering::SeqCst);
            drop(sink);
        });

        *run = Some(ReplayRun { cancel, handle });
        Ok(())
    }

    async fn stop(&self) {
        let Some(run) = self.run.lock().await.take() else {
            return;
        };

        run.cancel.cancel();
        let abort = run.handle.abort_handle();
        if tokio::time::timeout(Duration::from_secs(2), run.handle)
            .await
            .is_err()
        {
            warn!("Replay task did not stop in time, aborting");
            abort.abort();
        }
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CAPTURE: &str = r#"{"name":"JBL Flip","uuids":["fe2c"],"rssi":-61,"txPower":-59}

not json at all
{"name":null,"rssi":-70,"manufacturerData":{"0x004c":"0215f7826da64fa24e988024bc5b71e0893e00010002c5"}}
{"serviceData":{"feaa":"10ee0061626300"}}
"#;

    fn capture_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_capture_skips_bad_lines() {
        let events = parse_capture(CAPTURE);
        assert_eq!(events.len(), 3);

        assert_eq!(events[0].device_name.as_deref(), Some("JBL Flip"));
        assert_eq!(events[0].tx_power, Some(-59.0));
        assert_eq!(events[0].service_uuids, Some(vec!["fe2c".to_string()]));

        assert!(events[1].device_name.is_none());
        assert_eq!(events[1].manufacturer_data.get(&0x004c).map(Vec::len), Some(23));

        assert_eq!(events[2].service_data.get("feaa").map(|b| b[0]), Some(0x10));
    }

    #[tokio::test]
    async fn test_replay_delivers_in_order_then_goes_idle() {
        let file = capture_file(CAPTURE);
        let scanner = ReplayScanner::new(file.path(), Duration::from_millis(1), false);
        let (tx, mut rx) = mpsc::channel(8);

        scanner.start(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.device_name.as_deref(), Some("JBL Flip"));
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        // Capture exhausted: the sink is released
        assert!(rx.recv().await.is_none());
        assert!(!scanner.is_active());
    }

    #[tokio::test]
    async fn test_stop_halts_delivery() {
        let file = capture_file(CAPTURE);
        let scanner = ReplayScanner::new(file.path(), Duration::from_millis(5), true);
        let (tx, mut rx) = mpsc::channel(64);

        scanner.start(tx).await.unwrap();
        assert!(scanner.is_active());
        assert!(rx.recv().await.is_some());

        scanner.stop().await;
        assert!(!scanner.is_active());

        // Drain whatever was already queued; the channel then closes
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_missing_capture_fails_start() {
        let scanner = ReplayScanner::new("/nonexistent/capture.jsonl", Duration::from_millis(1), false);
        let (tx, _rx) = mpsc::channel(1);

        match scanner.start(tx).await {
            Err(ScannerError::StartFailed { producer, .. }) => assert_eq!(producer, "replay"),
            other => panic!("Unexpected result: {:?}", other),
        }
        assert!(!scanner.is_active());
    }
}
