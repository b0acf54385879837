#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use pvreg_core::{
    async_trait,
    instrument_store::{
        DisplayType, Instrument, InstrumentId, PvId, PvRecord, Storage, StorageTx,
        memory::{MemoryError, MemoryStore, MemoryTx},
    },
    pv_client::{
        DeviceType, FieldType, MetaField, ProtocolClient,
        sim::{SimClient, SimError, SimHandle, SimRecord},
    },
};
use thiserror::Error;

/// A few records covering each display type
pub fn records(client: &SimClient) {
    client
        .insert(
            "IOC:m1",
            SimRecord::new("motor", FieldType::Double)
                .desc("sample x")
                .field("DMOV", FieldType::Short),
        )
        .insert(
            "IOC:shutter",
            SimRecord::new("bo", FieldType::Enum).desc("shutter"),
        )
        .insert("IOC:mode", SimRecord::new("mbbo", FieldType::Enum))
        .insert(
            "IOC:label",
            SimRecord::new("waveform", FieldType::Char).count(40),
        )
        .insert("IOC:temp", SimRecord::new("ai", FieldType::Float))
        .insert(
            "IOC:broken",
            SimRecord::new("ai", FieldType::Double).fail_metadata(true),
        )
        .insert(
            "IOC:gone",
            SimRecord::new("ai", FieldType::Double).unreachable(true),
        );
}

/// Sim client that remembers which records metadata was read from
#[derive(Debug, Clone, Default)]
pub struct RecordingClient {
    pub sim: SimClient,
    reads: Arc<Mutex<Vec<(String, MetaField)>>>,
}

impl RecordingClient {
    pub fn new(sim: SimClient) -> Self {
        Self {
            sim,
            reads: Arc::default(),
        }
    }

    pub fn reads(&self) -> Vec<(String, MetaField)> {
        self.reads.lock().clone()
    }
}

#[async_trait]
impl ProtocolClient for RecordingClient {
    type Handle = SimHandle;
    type Error = SimError;

    fn open(&self, name: &str) -> SimHandle {
        self.sim.open(name)
    }

    fn is_connected(&self, handle: &SimHandle) -> bool {
        self.sim.is_connected(handle)
    }

    fn field_type(&self, handle: &SimHandle) -> DeviceType {
        self.sim.field_type(handle)
    }

    async fn metadata(&self, prefix: &str, field: MetaField) -> Result<String, SimError> {
        self.reads.lock().push((prefix.to_owned(), field));
        self.sim.metadata(prefix, field).await
    }
}

/// where a [`FlakyStore`] transaction fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Append,
    Commit,
}

#[derive(Debug, Error)]
pub enum FlakyError {
    #[error(transparent)]
    Store(#[from] MemoryError),
    #[error("injected failure at {0:?}")]
    Injected(FailAt),
}

/// Memory store whose transactions can be made to fail after `add_pv`
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_at: Arc<Mutex<Option<FailAt>>>,
}

impl FlakyStore {
    pub fn fail_at(&self, at: Option<FailAt>) {
        *self.fail_at.lock() = at;
    }
}

#[derive(Debug)]
pub struct FlakyTx {
    inner: MemoryTx,
    fail_at: Option<FailAt>,
}

#[async_trait]
impl Storage for FlakyStore {
    type Error = FlakyError;
    type Tx = FlakyTx;

    async fn ensure_instrument(&self, name: &str) -> Result<Instrument, FlakyError> {
        Ok(self.inner.ensure_instrument(name).await?)
    }

    async fn instrument(&self, name: &str) -> Result<Option<Instrument>, FlakyError> {
        Ok(self.inner.instrument(name).await?)
    }

    async fn instrument_pvs(&self, id: InstrumentId) -> Result<Vec<PvRecord>, FlakyError> {
        Ok(self.inner.instrument_pvs(id).await?)
    }

    async fn pv(&self, name: &str) -> Result<Option<PvRecord>, FlakyError> {
        Ok(self.inner.pv(name).await?)
    }

    async fn begin(&self) -> Result<FlakyTx, FlakyError> {
        Ok(FlakyTx {
            inner: self.inner.begin().await?,
            fail_at: *self.fail_at.lock(),
        })
    }
}

#[async_trait]
impl StorageTx for FlakyTx {
    type Error = FlakyError;

    async fn add_pv(&mut self, name: &str, display_type: DisplayType) -> Result<PvId, FlakyError> {
        Ok(self.inner.add_pv(name, display_type).await?)
    }

    async fn append_pv_to_instrument(
        &mut self,
        instrument: InstrumentId,
        pv: PvId,
    ) -> Result<(), FlakyError> {
        if self.fail_at == Some(FailAt::Append) {
            return Err(FlakyError::Injected(FailAt::Append));
        }
        Ok(self.inner.append_pv_to_instrument(instrument, pv).await?)
    }

    async fn commit(self) -> Result<(), FlakyError> {
        if self.fail_at == Some(FailAt::Commit) {
            return Err(FlakyError::Injected(FailAt::Commit));
        }
        Ok(self.inner.commit().await?)
    }

    async fn rollback(self) -> Result<(), FlakyError> {
        Ok(self.inner.rollback().await?)
    }
}
