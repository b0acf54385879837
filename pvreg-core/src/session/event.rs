use std::{fmt, time::Duration};

use instrument_store::PvId;
use pv_classify::{DeviceType, DisplayType};
use pv_name::PvName;
use thiserror::Error;

use crate::metrics;

/// boxed source of a registration failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Opaque value identifying who asked for a connection. Handed back
/// unchanged in the [`Event`] for that connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Token {
    fn from(t: u64) -> Self {
        Self(t)
    }
}

/// A connected PV with its metadata and the display type it was committed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPv {
    /// id of the stored PV
    pub id: PvId,
    /// full name, including any field suffix
    pub name: PvName,
    /// how the PV should be shown
    pub display_type: DisplayType,
    /// the record's DESC field
    pub description: String,
    /// the record's RTYP field
    pub record_type: String,
    /// native type reported by the connected channel
    pub device_type: DeviceType,
}

/// Completion of a connection attempt. Exactly one is emitted for every
/// attempt that was not abandoned
#[derive(Debug)]
pub enum Event {
    /// connected, classified and committed
    Connected {
        /// token of the request that opened the attempt
        token: Token,
        /// the registered PV
        pv: ClassifiedPv,
    },
    /// the attempt was discarded, nothing was stored
    Failed {
        /// token of the request that opened the attempt
        token: Token,
        /// the name that failed
        name: PvName,
        /// reason
        error: RegistrationError,
    },
}

impl Event {
    /// token the event belongs to
    pub fn token(&self) -> Token {
        match self {
            Event::Connected { token, .. } | Event::Failed { token, .. } => *token,
        }
    }

    /// name of the PV the event belongs to
    pub fn name(&self) -> &PvName {
        match self {
            Event::Connected { pv, .. } => &pv.name,
            Event::Failed { name, .. } => name,
        }
    }
}

/// Why an attempt did not end up registered
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// channel never reported ready within the configured timeout
    #[error("connection not ready after {elapsed:?}")]
    ConnectionTimedOut {
        /// time spent pending
        elapsed: Duration,
    },
    /// DESC or RTYP could not be read
    #[error("failed to read metadata from {channel}")]
    MetadataFetch {
        /// the metadata channel, e.g. `IOC:m1.RTYP`
        channel: String,
        /// client error
        #[source]
        source: BoxError,
    },
    /// a step of the store transaction failed, it was rolled back
    #[error("failed to persist pv")]
    Persistence(#[source] BoxError),
}

impl RegistrationError {
    /// short label for logs & metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RegistrationError::ConnectionTimedOut { .. } => "timeout",
            RegistrationError::MetadataFetch { .. } => "metadata",
            RegistrationError::Persistence(_) => "persistence",
        }
    }

    pub(crate) fn record_metric(&self) {
        match self {
            RegistrationError::ConnectionTimedOut { .. } => metrics::FAILURE_COUNT.timeout.inc(),
            RegistrationError::MetadataFetch { .. } => metrics::FAILURE_COUNT.metadata.inc(),
            RegistrationError::Persistence(_) => metrics::FAILURE_COUNT.persistence.inc(),
        }
    }
}
