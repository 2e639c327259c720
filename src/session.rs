use crate::config::SessionConfig;
use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

/// Timezone used to derive the calendar date embedded in session ids
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionZone {
    Local,
    Named(Tz),
}

impl SessionZone {
    /// `YYYYMMDD` of `now` in this zone
    pub fn date_key(&self, now: DateTime<Utc>) -> String {
        match self {
            SessionZone::Local => now.with_timezone(&Local).format("%Y%m%d").to_string(),
            SessionZone::Named(tz) => now.with_timezone(tz).format("%Y%m%d").to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct SessionState {
    id: String,
    date_key: String,
    ordinal: u32,
    last_event: DateTime<Utc>,
}

/// Result of one identity query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub id: String,
    /// A new session was minted by this query
    pub rolled: bool,
}

/// Partitions a scan run into logical visits
///
/// A new session starts on the first event of a calendar day or after an
/// inactivity gap longer than the configured threshold. Every query counts as
/// an observed event.
#[derive(Debug)]
pub struct SessionManager {
    zone: SessionZone,
    inactivity: ChronoDuration,
    state: Option<SessionState>,
}

impl SessionManager {
    pub fn new(zone: SessionZone, inactivity: ChronoDuration) -> Self {
        Self {
            zone,
            inactivity,
            state: None,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        let zone = match config.timezone.as_deref().map(str::parse::<Tz>) {
            Some(Ok(tz)) => SessionZone::Named(tz),
            Some(Err(e)) => {
                warn!("Invalid session timezone, using host local time: {}", e);
                SessionZone::Local
            }
            None => SessionZone::Local,
        };
        let inactivity = ChronoDuration::seconds(config.inactivity_seconds.min(u32::MAX as u64) as i64);

        Self::new(zone, inactivity)
    }

    /// Session id for an event observed at `now`, rolling over when needed
    pub fn session_id_at(&mut self, now: DateTime<Utc>) -> SessionIdentity {
        let date_key = self.zone.date_key(now);

        let next_ordinal = match &self.state {
            None => Some(1),
            Some(state) if state.date_key != date_key => Some(1),
            Some(state) if now - state.last_event > self.inactivity => Some(state.ordinal + 1),
            Some(_) => None,
        };

        if let (None, Some(state)) = (next_ordinal, self.state.as_mut()) {
            state.last_event = now;
            return SessionIdentity {
                id: state.id.clone(),
                rolled: false,
            };
        }

        let ordinal = next_ordinal.unwrap_or(1);
        let id = format!("{}-{}", date_key, ordinal);
        info!("Starting session {}", id);

        self.state = Some(SessionState {
            id: id.clone(),
            date_key,
            ordinal,
            last_event: now,
        });
        SessionIdentity { id, rolled: true }
    }

    /// Current session id without counting as an event
    pub fn current(&self) -> Option<&str> {
        self.state.as_ref().map(|state| state.id.as_str())
    }

    pub fn last_event(&self) -> Option<DateTime<Utc>> {
        self.state.as_ref().map(|state| state.last_event)
    }
}
