//! Last-known-good policy for the polling boundary.
//!
//! A single failed poll should not blank every entity, but a gateway that
//! stays unreachable must eventually surface as unavailable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::Error;

pub const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(600);

/// Outcome of one poll as seen by the host.
#[derive(Debug)]
pub enum PollResult<T> {
    Fresh(T),
    /// The poll failed; `data` is the last good value, `age` old.
    StaleFallback { data: T, error: Error, age: Duration },
    Unavailable(Error),
}

impl<T> PollResult<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            PollResult::Fresh(data) | PollResult::StaleFallback { data, .. } => Some(data),
            PollResult::Unavailable(_) => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            PollResult::Fresh(data) | PollResult::StaleFallback { data, .. } => Some(data),
            PollResult::Unavailable(_) => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            PollResult::Fresh(_) => None,
            PollResult::StaleFallback { error, .. } | PollResult::Unavailable(error) => Some(error),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, PollResult::Fresh(_))
    }

    /// Mirrors the host's `last_update_success` flag.
    pub fn last_update_success(&self) -> bool {
        self.is_fresh()
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, PollResult::Unavailable(_))
    }
}

/// Keeps the last successful value and decides how long it may stand in for
/// failed polls. `max_staleness: None` keeps it forever.
pub struct LastKnownGood<T> {
    last: Option<(T, Instant)>,
    max_staleness: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> LastKnownGood<T> {
    pub fn new(max_staleness: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            last: None,
            max_staleness,
            clock,
        }
    }

    pub fn last(&self) -> Option<&T> {
        self.last.as_ref().map(|(data, _)| data)
    }

    pub fn record(&mut self, result: crate::Result<T>) -> PollResult<T> {
        let now = self.clock.now();
        match result {
            Ok(data) => {
                self.last = Some((data.clone(), now));
                PollResult::Fresh(data)
            }
            Err(error) => match &self.last {
                Some((data, at)) => {
                    let age = now.saturating_duration_since(*at);
                    match self.max_staleness {
                        Some(max) if age > max => PollResult::Unavailable(error),
                        _ => PollResult::StaleFallback {
                            data: data.clone(),
                            error,
                            age,
                        },
                    }
                }
                None => PollResult::Unavailable(error),
            },
        }
    }
}
