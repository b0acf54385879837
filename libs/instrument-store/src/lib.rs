//! # instrument-store
//!
//! `instrument-store` defines the traits [`Storage`] and [`StorageTx`], the
//! persistence bridge instruments and their PVs are written through.
//!
//! Reads go straight to [`Storage`]. Writes happen inside a transaction
//! obtained from [`Storage::begin`]: a PV is added, linked to an instrument,
//! and the whole unit is committed. A transaction that is dropped without
//! [`StorageTx::commit`] leaves nothing behind.
//!
//! Two implementations ship with the crate, [`memory::MemoryStore`] and
//! [`sqlite::SqliteStore`].
//!
//! [`Storage`]: crate::Storage
//! [`StorageTx`]: crate::StorageTx
use std::fmt;

use async_trait::async_trait;
pub use pv_classify::DisplayType;

pub mod memory;
pub mod sqlite;

/// row id of an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentId(pub i64);

/// row id of a PV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PvId(pub i64);

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// a named group of PVs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub id: InstrumentId,
    pub name: String,
}

/// a persisted PV and how it is displayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvRecord {
    pub id: PvId,
    pub name: String,
    pub display_type: DisplayType,
}

#[async_trait]
pub trait Storage: Send + Sync + 'static {
    // send/sync/static required for async trait bounds
    type Error: std::error::Error + Send + Sync + 'static;
    type Tx: StorageTx<Error = Self::Error>;

    /// get the instrument called `name`, creating it if it doesn't exist
    async fn ensure_instrument(&self, name: &str) -> Result<Instrument, Self::Error>;
    async fn instrument(&self, name: &str) -> Result<Option<Instrument>, Self::Error>;
    /// PVs of an instrument in the order they were appended
    async fn instrument_pvs(&self, id: InstrumentId) -> Result<Vec<PvRecord>, Self::Error>;
    async fn pv(&self, name: &str) -> Result<Option<PvRecord>, Self::Error>;
    /// start a unit of work
    async fn begin(&self) -> Result<Self::Tx, Self::Error>;
}

/// A unit of work. Nothing done through it is visible to readers until
/// [`commit`] returns `Ok`; dropping it rolls back.
///
/// [`commit`]: StorageTx::commit
#[async_trait]
pub trait StorageTx: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// insert a PV, or update the display type of the PV with this name.
    /// Returns its id either way
    async fn add_pv(&mut self, name: &str, display_type: DisplayType) -> Result<PvId, Self::Error>;
    /// link a PV to the end of an instrument's list. Linking a PV that is
    /// already on the instrument keeps its position
    async fn append_pv_to_instrument(
        &mut self,
        instrument: InstrumentId,
        pv: PvId,
    ) -> Result<(), Self::Error>;
    async fn commit(self) -> Result<(), Self::Error>;
    async fn rollback(self) -> Result<(), Self::Error>;
}
