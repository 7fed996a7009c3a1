mod client;
mod clock;
pub mod codec;
pub mod decoder;
mod diff;
mod error;
mod logger;
mod poll;
pub mod protocol;
mod topology;
mod transport;
mod types;

pub use client::{
    HisenseClient, HisenseClientBuilder, DEFAULT_POWER_SCAN_INTERVAL, DEFAULT_TIMEOUT,
    DEFAULT_UNIT_SCAN_INTERVAL,
};
pub use clock::{Clock, SystemClock};
pub use error::{DecodeError, Error, Result};
pub use logger::MessageLogMode;
pub use poll::{LastKnownGood, PollResult, DEFAULT_MAX_STALENESS};
pub use protocol::RegisterWrite;
pub use topology::{HubRules, TopologySnapshot, DEFAULT_HUB_ADDRESS, DEFAULT_TOPOLOGY_TTL};
pub use types::*;
