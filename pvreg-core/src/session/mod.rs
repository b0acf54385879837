//! # session
//!
//! A [`Session`] is the single owner of a registry, a poll scheduler and a
//! coordinator bound to one instrument. All mutation goes through `&mut self`,
//! either directly (tests, embedding) or through the task started by
//! [`Session::spawn`].
//!
//! Completions are delivered as [`Event`]s on the channel returned when the
//! session is created, one per attempt that was not abandoned.
use std::{sync::Arc, time::Duration};

use instrument_store::{Instrument, PvRecord, Storage};
use pv_client::ProtocolClient;
use pv_name::{NameError, PvName};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::metrics;

mod actor;
pub mod coordinator;
mod event;
pub mod registry;
pub mod scheduler;

pub use actor::{SessionClosed, SessionHandle};
pub use coordinator::Coordinator;
pub use event::{BoxError, ClassifiedPv, Event, RegistrationError, Token};
pub use registry::{Admission, AttemptState, ConnectionAttempt, Registry};
pub use scheduler::{DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL, PollScheduler};

/// Session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// time between readiness checks
    pub poll_interval: Duration,
    /// fail attempts still pending after this long. `None` waits forever
    pub connect_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: None,
        }
    }
}

/// What [`Session::connect`] did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// the name was not usable, no attempt was made
    Rejected(NameError),
    /// an attempt for the name is already active, this request gets no event
    Coalesced,
    /// a new attempt was opened
    Opened,
}

/// What a single [`Session::tick`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// nothing was active, the scheduler is stopped
    Stopped,
    /// pending attempts were polled
    Polled {
        /// attempts registered this tick
        completed: usize,
        /// attempts that failed this tick
        failed: usize,
        /// attempts still waiting on their channel
        pending: usize,
    },
}

/// Connects PVs and registers them on an instrument
#[derive(Debug)]
pub struct Session<C: ProtocolClient, S: Storage> {
    client: Arc<C>,
    registry: Registry<C::Handle>,
    scheduler: PollScheduler,
    coordinator: Coordinator<C, S>,
    config: SessionConfig,
    events: mpsc::UnboundedSender<Event>,
}

impl<C, S> Session<C, S>
where
    C: ProtocolClient,
    S: Storage,
{
    /// Open a session on the instrument called `instrument`, creating it if
    /// it doesn't exist yet
    pub async fn open(
        client: C,
        store: S,
        instrument: &str,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Event>), S::Error> {
        let instrument = store.ensure_instrument(instrument).await?;
        info!(instrument = %instrument.name, id = %instrument.id, ?config, "session opened");
        Ok(Self::new(client, store, instrument, config))
    }

    /// Create a session on an existing instrument. A poll interval below
    /// [`MIN_POLL_INTERVAL`] is raised to it
    pub fn new(
        client: C,
        store: S,
        instrument: Instrument,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let client = Arc::new(client);
        let scheduler = PollScheduler::new(config.poll_interval);
        let session = Self {
            coordinator: Coordinator::new(client.clone(), store, instrument),
            client,
            registry: Registry::new(),
            config: SessionConfig {
                poll_interval: scheduler.interval(),
                ..config
            },
            scheduler,
            events,
        };
        (session, rx)
    }

    /// Ask for `raw` to be connected and registered. Never blocks; the
    /// result arrives later as an [`Event`] carrying `token`.
    pub fn connect(&mut self, raw: &str, token: Token) -> ConnectOutcome {
        let name = match PvName::parse(raw) {
            Ok(name) => name,
            Err(err) => {
                debug!(?raw, %token, ?err, "rejected pv name");
                metrics::CONNECT_COUNT.rejected.inc();
                return ConnectOutcome::Rejected(err);
            }
        };
        match self.registry.connect(name, token, &*self.client) {
            Admission::Coalesced { .. } => {
                metrics::CONNECT_COUNT.coalesced.inc();
                ConnectOutcome::Coalesced
            }
            Admission::Registered => {
                metrics::CONNECT_COUNT.opened.inc();
                metrics::PENDING_ATTEMPTS.inc();
                self.scheduler.start();
                ConnectOutcome::Opened
            }
        }
    }

    /// Run one poll. Fails attempts past the connect timeout, then
    /// registers every attempt whose channel is ready, in the order they
    /// were requested. Stops the scheduler once nothing is left active.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.registry.is_idle() {
            self.scheduler.stop();
            return TickOutcome::Stopped;
        }
        self.scheduler.record_tick();
        metrics::POLL_TICKS.inc();

        let mut failed = 0;
        if let Some(timeout) = self.config.connect_timeout {
            let now = Instant::now();
            for attempt in self.registry.expire(now, timeout) {
                metrics::PENDING_ATTEMPTS.dec();
                let elapsed = now.saturating_duration_since(attempt.opened_at());
                self.fail(
                    attempt.token(),
                    attempt.name().clone(),
                    RegistrationError::ConnectionTimedOut { elapsed },
                );
                failed += 1;
            }
        }

        let mut completed = 0;
        for attempt in self.registry.take_ready(&*self.client) {
            metrics::PENDING_ATTEMPTS.dec();
            let result = self.coordinator.register(&attempt).await;
            self.registry.finish(attempt.name().as_str());
            match result {
                Ok(pv) => {
                    metrics::REGISTERED_COUNT.inc();
                    metrics::REGISTRATION_DURATION
                        .observe(attempt.opened_at().elapsed().as_secs_f64());
                    info!(name = %pv.name, token = %attempt.token(), id = %pv.id, display_type = %pv.display_type, "pv registered");
                    self.emit(Event::Connected {
                        token: attempt.token(),
                        pv,
                    });
                    completed += 1;
                }
                Err(error) => {
                    self.fail(attempt.token(), attempt.name().clone(), error);
                    failed += 1;
                }
            }
        }

        if self.registry.is_idle() {
            self.scheduler.stop();
        }
        TickOutcome::Polled {
            completed,
            failed,
            pending: self.registry.pending(),
        }
    }

    /// Abandon every pending attempt and stop polling. Abandoned attempts get
    /// no event. Returns how many were abandoned
    pub fn close(&mut self) -> usize {
        let abandoned = self.registry.abandon_all();
        metrics::PENDING_ATTEMPTS.sub(abandoned.len() as i64);
        for attempt in &abandoned {
            debug!(name = %attempt.name(), token = %attempt.token(), "attempt abandoned");
        }
        self.scheduler.stop();
        if !abandoned.is_empty() {
            info!(count = abandoned.len(), "abandoned pending attempts");
        }
        abandoned.len()
    }

    /// PVs registered on this session's instrument, in registration order
    pub async fn current_pvs(&self) -> Result<Vec<PvRecord>, S::Error> {
        self.coordinator
            .store()
            .instrument_pvs(self.target_instrument().id)
            .await
    }

    /// the instrument PVs are attached to
    pub fn target_instrument(&self) -> &Instrument {
        self.coordinator.instrument()
    }

    /// the backing store
    pub fn store(&self) -> &S {
        self.coordinator.store()
    }

    /// the protocol client
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// active attempts
    pub fn registry(&self) -> &Registry<C::Handle> {
        &self.registry
    }

    /// poll state
    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// settings the session was created with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// true when no attempt is active
    pub fn is_idle(&self) -> bool {
        self.registry.is_idle()
    }

    fn fail(&self, token: Token, name: PvName, error: RegistrationError) {
        error.record_metric();
        warn!(%name, %token, kind = error.kind(), ?error, "registration failed");
        self.emit(Event::Failed { token, name, error });
    }

    fn emit(&self, event: Event) {
        if let Err(err) = self.events.send(event) {
            debug!(event = ?err.0, "event receiver dropped");
        }
    }
}
