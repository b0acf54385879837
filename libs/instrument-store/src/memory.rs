use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{DisplayType, Instrument, InstrumentId, PvId, PvRecord, Storage, StorageTx};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    instruments: BTreeMap<InstrumentId, MemoryInstrument>,
    pvs: BTreeMap<PvId, PvRecord>,
    pv_names: HashMap<String, PvId>,
    next_instrument: i64,
    // ids handed out to transactions, rolled back ones leave gaps
    next_pv: i64,
}

#[derive(Debug, Clone)]
struct MemoryInstrument {
    name: String,
    pvs: Vec<PvId>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("no instrument with id {0}")]
    NoInstrument(InstrumentId),
    #[error("no pv with id {0}")]
    NoPv(PvId),
}

#[derive(Debug, Clone)]
enum Op {
    UpsertPv {
        id: PvId,
        name: String,
        display_type: DisplayType,
    },
    Append {
        instrument: InstrumentId,
        pv: PvId,
    },
}

/// staged operations, applied under one lock on commit
#[derive(Debug)]
pub struct MemoryTx {
    store: MemoryStore,
    ops: Vec<Op>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of PVs stored, linked to an instrument or not
    pub fn pv_count(&self) -> usize {
        self.inner.lock().pvs.len()
    }
}

impl MemoryInner {
    fn instrument(&self, id: InstrumentId) -> Option<Instrument> {
        self.instruments.get(&id).map(|inst| Instrument {
            id,
            name: inst.name.clone(),
        })
    }
}

#[async_trait]
impl Storage for MemoryStore {
    type Error = MemoryError;
    type Tx = MemoryTx;

    async fn ensure_instrument(&self, name: &str) -> Result<Instrument, Self::Error> {
        let mut guard = self.inner.lock();
        if let Some((id, _)) = guard.instruments.iter().find(|(_, inst)| inst.name == name) {
            return Ok(Instrument {
                id: *id,
                name: name.to_owned(),
            });
        }
        guard.next_instrument += 1;
        let id = InstrumentId(guard.next_instrument);
        guard.instruments.insert(
            id,
            MemoryInstrument {
                name: name.to_owned(),
                pvs: Vec::new(),
            },
        );
        debug!(?id, ?name, "created instrument");
        Ok(Instrument {
            id,
            name: name.to_owned(),
        })
    }

    async fn instrument(&self, name: &str) -> Result<Option<Instrument>, Self::Error> {
        let guard = self.inner.lock();
        Ok(guard
            .instruments
            .iter()
            .find(|(_, inst)| inst.name == name)
            .and_then(|(id, _)| guard.instrument(*id)))
    }

    async fn instrument_pvs(&self, id: InstrumentId) -> Result<Vec<PvRecord>, Self::Error> {
        let guard = self.inner.lock();
        let inst = guard
            .instruments
            .get(&id)
            .ok_or(MemoryError::NoInstrument(id))?;
        Ok(inst
            .pvs
            .iter()
            .filter_map(|pv| guard.pvs.get(pv).cloned())
            .collect())
    }

    async fn pv(&self, name: &str) -> Result<Option<PvRecord>, Self::Error> {
        let guard = self.inner.lock();
        Ok(guard
            .pv_names
            .get(name)
            .and_then(|id| guard.pvs.get(id))
            .cloned())
    }

    async fn begin(&self) -> Result<Self::Tx, Self::Error> {
        Ok(MemoryTx {
            store: self.clone(),
            ops: Vec::new(),
        })
    }
}

#[async_trait]
impl StorageTx for MemoryTx {
    type Error = MemoryError;

    async fn add_pv(&mut self, name: &str, display_type: DisplayType) -> Result<PvId, Self::Error> {
        let staged = self.ops.iter().find_map(|op| match op {
            Op::UpsertPv { id, name: n, .. } if n == name => Some(*id),
            _ => None,
        });
        let id = match staged {
            Some(id) => id,
            None => {
                let mut guard = self.store.inner.lock();
                match guard.pv_names.get(name) {
                    Some(id) => *id,
                    None => {
                        guard.next_pv += 1;
                        PvId(guard.next_pv)
                    }
                }
            }
        };
        trace!(?id, ?name, %display_type, "staged pv");
        self.ops.push(Op::UpsertPv {
            id,
            name: name.to_owned(),
            display_type,
        });
        Ok(id)
    }

    async fn append_pv_to_instrument(
        &mut self,
        instrument: InstrumentId,
        pv: PvId,
    ) -> Result<(), Self::Error> {
        self.ops.push(Op::Append { instrument, pv });
        Ok(())
    }

    async fn commit(self) -> Result<(), Self::Error> {
        let mut guard = self.store.inner.lock();
        // the same name may have been committed by another transaction since
        // it was staged here, in which case the committed id wins
        let mut remap: HashMap<PvId, PvId> = HashMap::new();
        for op in &self.ops {
            if let Op::UpsertPv { id, name, .. } = op
                && let Some(existing) = guard.pv_names.get(name)
                && existing != id
            {
                remap.insert(*id, *existing);
            }
        }
        let resolve = |id: &PvId| remap.get(id).copied().unwrap_or(*id);

        // validate everything before touching anything
        for op in &self.ops {
            if let Op::Append { instrument, pv } = op {
                if !guard.instruments.contains_key(instrument) {
                    return Err(MemoryError::NoInstrument(*instrument));
                }
                let pv = resolve(pv);
                let staged = self.ops.iter().any(
                    |op| matches!(op, Op::UpsertPv { id, .. } if resolve(id) == pv),
                );
                if !staged && !guard.pvs.contains_key(&pv) {
                    return Err(MemoryError::NoPv(pv));
                }
            }
        }

        for op in &self.ops {
            match op {
                Op::UpsertPv {
                    id,
                    name,
                    display_type,
                } => {
                    let id = resolve(id);
                    guard.pv_names.insert(name.clone(), id);
                    guard.pvs.insert(
                        id,
                        PvRecord {
                            id,
                            name: name.clone(),
                            display_type: *display_type,
                        },
                    );
                }
                Op::Append { instrument, pv } => {
                    let pv = resolve(pv);
                    if let Some(inst) = guard.instruments.get_mut(instrument)
                        && !inst.pvs.contains(&pv)
                    {
                        inst.pvs.push(pv);
                    }
                }
            }
        }
        debug!(ops = self.ops.len(), "committed memory transaction");
        Ok(())
    }

    async fn rollback(self) -> Result<(), Self::Error> {
        trace!(ops = self.ops.len(), "rolled back memory transaction");
        Ok(())
    }
}
