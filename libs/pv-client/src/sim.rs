//! Simulated records.
//!
//! A channel `REC` or `REC.FIELD` connects once record `REC` exists, is not
//! marked `unreachable`, and `connect_delay_ms` has passed since it was
//! opened. Records can be inserted after a channel was opened, the channel
//! then connects on a later readiness check.
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use pv_classify::{DeviceType, FieldType};
use pv_name::FIELD_SEPARATOR;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{MetaField, ProtocolClient};

/// top-level simulator config
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct SimConfig {
    /// records by name
    #[serde(default)]
    pub records: BTreeMap<String, SimRecord>,
}

impl SimConfig {
    /// read a config from a YAML (or JSON) file
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Self::parse_str(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to find sim config at {}", &path.display()))?,
        )
        .with_context(|| format!("failed to parse sim config at {}", &path.display()))
    }

    /// parse a config from YAML (or JSON) text
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let config: SimConfig = serde_yaml::from_str(s.as_ref())?;
        debug!(records = config.records.len(), "parsed sim config");
        Ok(config)
    }
}

/// One simulated record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimRecord {
    /// value read back for `RTYP`
    #[serde(default)]
    pub rtyp: String,
    /// value read back for `DESC`
    #[serde(default)]
    pub desc: String,
    /// type of the record's value field
    #[serde(default = "default_field_type")]
    pub field_type: FieldType,
    /// element count of the value field, above 1 makes it an array
    #[serde(default = "default_count")]
    pub count: usize,
    /// how long after opening a channel it connects
    #[serde(default)]
    pub connect_delay_ms: u64,
    /// field types of other fields, addressed as `REC.FIELD`
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
    /// never connects
    #[serde(default)]
    pub unreachable: bool,
    /// connects, but metadata reads fail
    #[serde(default)]
    pub fail_metadata: bool,
}

/// value fields are scalars unless configured otherwise
pub const fn default_count() -> usize {
    1
}

/// value field type when none is configured
pub const fn default_field_type() -> FieldType {
    FieldType::Double
}

impl Default for SimRecord {
    fn default() -> Self {
        Self {
            rtyp: String::new(),
            desc: String::new(),
            field_type: default_field_type(),
            count: default_count(),
            connect_delay_ms: 0,
            fields: BTreeMap::new(),
            unreachable: false,
            fail_metadata: false,
        }
    }
}

impl SimRecord {
    /// a record of `rtyp` whose value field is `field_type`
    pub fn new(rtyp: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            rtyp: rtyp.into(),
            field_type,
            ..Default::default()
        }
    }

    /// set the description
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// set the value field's element count
    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// connect `delay` after a channel is opened
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay_ms = delay.as_millis() as u64;
        self
    }

    /// add a field addressable as `REC.FIELD`
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// never connect while set
    pub fn unreachable(mut self, unreachable: bool) -> Self {
        self.unreachable = unreachable;
        self
    }

    /// fail metadata reads while set
    pub fn fail_metadata(mut self, fail: bool) -> Self {
        self.fail_metadata = fail;
        self
    }

    fn device_type(&self, field: Option<&str>) -> DeviceType {
        match field {
            None | Some("VAL") => DeviceType::array(self.field_type, self.count),
            Some(name) => self
                .fields
                .get(name)
                .map(|t| DeviceType::scalar(*t))
                .unwrap_or_else(|| DeviceType::array(self.field_type, self.count)),
        }
    }
}

/// Errors from [`SimClient`] metadata reads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// the record doesn't exist
    #[error("no record named {0:?}")]
    NoRecord(String),
    /// the record is set to fail metadata reads
    #[error("metadata read of {channel} failed")]
    Unavailable {
        /// channel that was read, `REC.FIELD`
        channel: String,
    },
}

/// handle to a channel opened on a [`SimClient`]
#[derive(Debug, Clone)]
pub struct SimHandle {
    id: u64,
    name: Arc<str>,
    opened_at: Instant,
}

impl SimHandle {
    /// unique per client
    pub fn id(&self) -> u64 {
        self.id
    }

    /// channel name the handle was opened with
    pub fn name(&self) -> &str {
        &self.name
    }

    fn split(&self) -> (&str, Option<&str>) {
        match self.name.split_once(FIELD_SEPARATOR) {
            Some((rec, field)) if !field.is_empty() => (rec, Some(field)),
            Some((rec, _)) => (rec, None),
            None => (&*self.name, None),
        }
    }
}

/// A [`ProtocolClient`] backed by an in-memory set of records.
/// Cheap to clone, clones share records and counters
#[derive(Debug, Clone, Default)]
pub struct SimClient {
    inner: Arc<SimInner>,
}

#[derive(Debug, Default)]
struct SimInner {
    records: RwLock<HashMap<String, SimRecord>>,
    next_id: AtomicU64,
    opened: AtomicUsize,
    metadata_reads: AtomicUsize,
}

impl SimClient {
    /// client with no records
    pub fn new() -> Self {
        Self::default()
    }

    /// client holding every record in `config`
    pub fn from_config(config: SimConfig) -> Self {
        let client = Self::new();
        client.inner.records.write().extend(config.records);
        client
    }

    /// add or replace a record
    pub fn insert(&self, name: impl Into<String>, record: SimRecord) -> &Self {
        self.inner.records.write().insert(name.into(), record);
        self
    }

    /// remove a record, channels to it stop reporting connected
    pub fn remove(&self, name: &str) -> Option<SimRecord> {
        self.inner.records.write().remove(name)
    }

    /// change a record in place
    pub fn update<F: FnOnce(&mut SimRecord)>(&self, name: &str, f: F) -> bool {
        match self.inner.records.write().get_mut(name) {
            Some(rec) => {
                f(rec);
                true
            }
            None => false,
        }
    }

    /// number of channels opened so far
    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// number of metadata reads so far, successful or not
    pub fn metadata_reads(&self) -> usize {
        self.inner.metadata_reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProtocolClient for SimClient {
    type Handle = SimHandle;
    type Error = SimError;

    fn open(&self, name: &str) -> SimHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        trace!(?name, id, "opening sim channel");
        SimHandle {
            id,
            name: Arc::from(name),
            opened_at: Instant::now(),
        }
    }

    fn is_connected(&self, handle: &SimHandle) -> bool {
        let (rec, _) = handle.split();
        let records = self.inner.records.read();
        match records.get(rec) {
            Some(record) if !record.unreachable => {
                handle.opened_at.elapsed() >= Duration::from_millis(record.connect_delay_ms)
            }
            _ => false,
        }
    }

    fn field_type(&self, handle: &SimHandle) -> DeviceType {
        if !self.is_connected(handle) {
            return DeviceType::unknown();
        }
        let (rec, field) = handle.split();
        self.inner
            .records
            .read()
            .get(rec)
            .map(|record| record.device_type(field))
            .unwrap_or_default()
    }

    async fn metadata(&self, prefix: &str, field: MetaField) -> Result<String, SimError> {
        self.inner.metadata_reads.fetch_add(1, Ordering::Relaxed);
        let records = self.inner.records.read();
        let record = records
            .get(prefix)
            .ok_or_else(|| SimError::NoRecord(prefix.to_owned()))?;
        if record.fail_metadata {
            return Err(SimError::Unavailable {
                channel: format!("{prefix}{FIELD_SEPARATOR}{field}"),
            });
        }
        Ok(match field {
            MetaField::Desc => record.desc.clone(),
            MetaField::Rtyp => record.rtyp.clone(),
        })
    }
}
