//! pvreg prelude

pub use crate::{
    anyhow::{self, Context, Result},
    async_trait,
    instrument_store::{Instrument, PvRecord, Storage, StorageTx},
    pv_classify::{DeviceType, DisplayType, FieldType},
    pv_client::{MetaField, ProtocolClient},
    pv_name::PvName,
    session::{
        ClassifiedPv, ConnectOutcome, Event, RegistrationError, Session, SessionConfig,
        SessionHandle, TickOutcome, Token,
    },
    tokio,
    tracing::{self, debug, error, info, instrument, trace, warn},
};

pub use std::{io, sync::Arc};
