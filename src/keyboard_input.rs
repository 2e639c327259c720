use crate::error::Result;
use crate::events::{BeaconEvent, EventBus};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a hotkey asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Resync,
    Quit,
}

impl KeyAction {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char('r') | KeyCode::Char('R') => Some(KeyAction::Resync),
            KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
            _ => None,
        }
    }

    fn event(&self) -> BeaconEvent {
        match self {
            KeyAction::Resync => BeaconEvent::ResyncRequested {
                reason: "User requested via keyboard".to_string(),
            },
            KeyAction::Quit => BeaconEvent::shutdown("User requested via keyboard"),
        }
    }
}

/// Terminal hotkeys: `r` forces a full resync, `q`/Esc quits
pub struct KeyboardInputHandler {
    event_bus: Arc<EventBus>,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler - press 'r' to resync, 'q' to quit");

        let event_bus = Arc::clone(&self.event_bus);
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        let Some(action) = KeyAction::from_key(key_event.code) else {
                            debug!("Key pressed: {:?}", key_event.code);
                            continue;
                        };

                        info!("Hotkey pressed: {:?}", action);
                        let event_bus = Arc::clone(&event_bus);
                        let event = action.event();
                        runtime_handle.spawn(async move {
                            if let Err(e) = event_bus.publish(event).await {
                                warn!("Failed to publish keyboard event: {}", e);
                            }
                        });

                        if action == KeyAction::Quit {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }

            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the task a moment to clean up and disable raw mode
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(KeyAction::from_key(KeyCode::Char('r')), Some(KeyAction::Resync));
        assert_eq!(KeyAction::from_key(KeyCode::Esc), Some(KeyAction::Quit));
        assert_eq!(KeyAction::from_key(KeyCode::Char('q')), Some(KeyAction::Quit));
        assert_eq!(KeyAction::from_key(KeyCode::Char(' ')), None);

        assert_eq!(KeyAction::Resync.event().event_type(), "resync_requested");
        assert_eq!(KeyAction::Quit.event().event_type(), "shutdown_requested");
    }

    #[tokio::test]
    async fn test_keyboard_handler_stop() {
        let event_bus = Arc::new(EventBus::new(100));
        let handler = KeyboardInputHandler::new(event_bus);

        handler.stop().await.unwrap();
        assert!(handler.cancellation_token.is_cancelled());
    }
}
