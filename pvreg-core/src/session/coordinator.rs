//! # coordinator
//!
//! Turns a connected attempt into a stored PV: read its record metadata,
//! classify it and commit it to the session's instrument in one transaction.
use std::sync::Arc;

use instrument_store::{Instrument, InstrumentId, PvId, Storage, StorageTx};
use pv_classify::{DisplayType, classify_channel};
use pv_client::{MetaField, ProtocolClient};
use pv_name::PvName;
use tracing::{debug, instrument, warn};

use crate::session::{ClassifiedPv, RegistrationError, registry::ConnectionAttempt};

/// Registers connected PVs against one instrument
#[derive(Debug)]
pub struct Coordinator<C, S> {
    client: Arc<C>,
    store: S,
    instrument: Instrument,
}

impl<C, S> Coordinator<C, S>
where
    C: ProtocolClient,
    S: Storage,
{
    /// create a coordinator writing to `instrument`
    pub fn new(client: Arc<C>, store: S, instrument: Instrument) -> Self {
        Self {
            client,
            store,
            instrument,
        }
    }

    /// the instrument PVs are attached to
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// the backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Classify and persist a connected attempt. On error nothing was written
    #[instrument(level = "debug", skip_all, fields(name = %attempt.name(), token = %attempt.token()))]
    pub async fn register(
        &self,
        attempt: &ConnectionAttempt<C::Handle>,
    ) -> Result<ClassifiedPv, RegistrationError> {
        let name = attempt.name();
        let description = self.metadata(name, MetaField::Desc).await?;
        let record_type = self.metadata(name, MetaField::Rtyp).await?;

        let device_type = self.client.field_type(attempt.handle());
        let display_type = classify_channel(device_type, &record_type, name.suffix());
        debug!(?device_type, ?record_type, %display_type, "classified");

        let id = self
            .persist(name, display_type)
            .await
            .map_err(|err| RegistrationError::Persistence(Box::new(err)))?;

        Ok(ClassifiedPv {
            id,
            name: name.clone(),
            display_type,
            description,
            record_type,
            device_type,
        })
    }

    async fn metadata(&self, name: &PvName, field: MetaField) -> Result<String, RegistrationError> {
        self.client
            .metadata(name.prefix(), field)
            .await
            .map_err(|err| RegistrationError::MetadataFetch {
                channel: name.metadata_channel(field.as_str()),
                source: Box::new(err),
            })
    }

    async fn persist(&self, name: &PvName, display_type: DisplayType) -> Result<PvId, S::Error> {
        let mut tx = self.store.begin().await?;
        match link(&mut tx, self.instrument.id, name, display_type).await {
            Ok(id) => {
                tx.commit().await?;
                Ok(id)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(?rollback, "failed to roll back registration");
                }
                Err(err)
            }
        }
    }
}

async fn link<T: StorageTx>(
    tx: &mut T,
    instrument: InstrumentId,
    name: &PvName,
    display_type: DisplayType,
) -> Result<PvId, T::Error> {
    let id = tx.add_pv(name.as_str(), display_type).await?;
    tx.append_pv_to_instrument(instrument, id).await?;
    Ok(id)
}
