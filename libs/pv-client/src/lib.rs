//! # pv-client
//!
//! `pv-client` defines the trait [`ProtocolClient`], the capability the
//! registration engine needs from a control-system protocol library: open a
//! channel without blocking, check whether it has connected, read its native
//! field type and read record metadata.
//!
//! [`sim::SimClient`] implements it against a YAML description of records,
//! for tests and for running the engine without a live control system.
//!
//! [`ProtocolClient`]: crate::ProtocolClient
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::fmt;

use async_trait::async_trait;

pub use pv_classify::{DeviceType, FieldType};

pub mod sim;

/// Record metadata fields read during registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaField {
    /// free-text description
    Desc,
    /// record type, e.g. `ai`, `bo`, `motor`
    Rtyp,
}

impl MetaField {
    /// field name as it appears after the record name, e.g. `DESC`
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaField::Desc => "DESC",
            MetaField::Rtyp => "RTYP",
        }
    }
}

impl fmt::Display for MetaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control-system protocol library as seen by the registration engine.
/// Every method except [`metadata`] must return without waiting on the
/// network
///
/// [`metadata`]: ProtocolClient::metadata
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    // send/sync/static required for async trait bounds
    /// an open channel
    type Handle: Clone + fmt::Debug + Send + Sync + 'static;
    /// metadata read failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// begin connecting to `name`. Must not block, the handle reports
    /// readiness through [`is_connected`]
    ///
    /// [`is_connected`]: ProtocolClient::is_connected
    fn open(&self, name: &str) -> Self::Handle;

    /// non-blocking readiness check
    fn is_connected(&self, handle: &Self::Handle) -> bool;

    /// native type of a connected channel, [`DeviceType::unknown`] otherwise
    fn field_type(&self, handle: &Self::Handle) -> DeviceType;

    /// read a metadata field of the record `prefix`
    async fn metadata(&self, prefix: &str, field: MetaField) -> Result<String, Self::Error>;
}

#[async_trait]
impl<T: ProtocolClient> ProtocolClient for std::sync::Arc<T> {
    type Handle = T::Handle;
    type Error = T::Error;

    fn open(&self, name: &str) -> Self::Handle {
        (**self).open(name)
    }

    fn is_connected(&self, handle: &Self::Handle) -> bool {
        (**self).is_connected(handle)
    }

    fn field_type(&self, handle: &Self::Handle) -> DeviceType {
        (**self).field_type(handle)
    }

    async fn metadata(&self, prefix: &str, field: MetaField) -> Result<String, Self::Error> {
        (**self).metadata(prefix, field).await
    }
}
