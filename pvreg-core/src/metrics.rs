#![allow(missing_docs)] // proc macros dont play nicely with docstrings

//! # metrics
//!
//! contains statistics for connection & registration
use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    Histogram, IntCounter, IntCounterVec, IntGauge, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};
use prometheus_static_metric::make_static_metric;

make_static_metric! {
    pub label_enum ConnectLabel {
        opened,
        coalesced,
        rejected,
    }
    pub struct ConnectStats: IntCounter {
        "outcome" => ConnectLabel
    }
    pub label_enum FailureKind {
        timeout,
        metadata,
        persistence,
    }
    pub struct FailureStats: IntCounter {
        "kind" => FailureKind
    }
}

lazy_static! {
    /// When the process started
    pub static ref START_TIME: Instant = Instant::now();

    pub static ref CONNECT_COUNT_VEC: IntCounterVec = register_int_counter_vec!(
        "connect_requests",
        "connect requests by outcome",
        &["outcome"]
    )
    .unwrap();
    /// connect requests, split by what happened to them
    pub static ref CONNECT_COUNT: ConnectStats = ConnectStats::from(&CONNECT_COUNT_VEC);

    pub static ref FAILURE_COUNT_VEC: IntCounterVec = register_int_counter_vec!(
        "registration_failures",
        "failed attempts by kind",
        &["kind"]
    )
    .unwrap();
    /// failed attempts, split by reason
    pub static ref FAILURE_COUNT: FailureStats = FailureStats::from(&FAILURE_COUNT_VEC);

    /// # of attempts waiting on their connection
    pub static ref PENDING_ATTEMPTS: IntGauge =
        register_int_gauge!("pending_attempts", "count of connections not yet ready").unwrap();

    /// # of PVs committed to an instrument
    pub static ref REGISTERED_COUNT: IntCounter =
        register_int_counter!("registered_count", "count of PVs committed to an instrument").unwrap();

    /// time from connect request to commit
    pub static ref REGISTRATION_DURATION: Histogram = register_histogram!(
        "registration_duration",
        "time from connect request to committed registration (seconds)"
    )
    .unwrap();

    /// poll ticks run
    pub static ref POLL_TICKS: IntCounter =
        register_int_counter!("poll_ticks", "count of scheduler ticks").unwrap();
}
