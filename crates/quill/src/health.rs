//! Health status types for the generation gateway.

use serde::{Deserialize, Serialize};

use crate::permit::PoolSnapshot;
use crate::version::VersionInfo;

/// Health status of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Free generation slots available
    Ready,
    /// All slots in use; new requests queue
    Busy,
    /// Shutdown requested; new requests are refused
    ShuttingDown,
}

impl Health {
    pub fn from_pool(snapshot: &PoolSnapshot, closed: bool) -> Self {
        if closed {
            Health::ShuttingDown
        } else if snapshot.available == 0 {
            Health::Busy
        } else {
            Health::Ready
        }
    }
}

/// Snapshot of service health for transports to report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: Health,
    pub pool: PoolSnapshot,
    pub version: VersionInfo,
}

impl HealthSnapshot {
    pub fn is_busy(&self) -> bool {
        self.status == Health::Busy
    }
}
