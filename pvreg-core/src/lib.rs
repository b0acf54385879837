//! # pvreg
//!
//! Attaches process variables to an instrument. A [`Session`] takes raw,
//! user-typed names, opens connections without blocking, polls them until
//! they are ready, classifies each one from its record metadata and commits
//! it to the instrument store.
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
pub use anyhow;
pub use async_trait::async_trait;
pub use instrument_store;
pub use pv_classify;
pub use pv_client;
pub use pv_name;
pub use tokio;
pub use tokio_util;
pub use tracing;

pub use crate::session::{Session, SessionConfig, SessionHandle};

pub mod config;
pub mod metrics;
pub mod prelude;
pub mod session;
