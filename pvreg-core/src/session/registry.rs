//! # registry
//!
//! Tracks one connection attempt per PV name. Attempts start `Pending` when
//! the channel is opened, become `Connected` once a readiness check succeeds
//! and are removed when their registration finishes. Handles of channels
//! that connected are cached per name, so connecting a name again does not
//! open a second channel. Expired and abandoned attempts drop their handle.
use std::{collections::HashMap, time::Duration};

use pv_client::ProtocolClient;
use pv_name::PvName;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::session::Token;

/// lifecycle of a [`ConnectionAttempt`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptState {
    /// opened, not ready yet
    Pending,
    /// ready, registration in progress
    Connected,
    /// dropped before it connected
    Abandoned,
}

/// A request to connect a PV, owned by the [`Registry`]
#[derive(Debug, Clone)]
pub struct ConnectionAttempt<H> {
    name: PvName,
    token: Token,
    state: AttemptState,
    opened_at: Instant,
    seq: u64,
    handle: H,
}

impl<H> ConnectionAttempt<H> {
    /// PV the attempt is for
    pub fn name(&self) -> &PvName {
        &self.name
    }

    /// token of the request that created the attempt
    pub fn token(&self) -> Token {
        self.token
    }

    /// current state
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// when the attempt was created
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// the channel handle
    pub fn handle(&self) -> &H {
        &self.handle
    }
}

/// result of [`Registry::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// a new attempt was created
    Registered,
    /// an attempt for the name is already active, nothing changed
    Coalesced {
        /// token the active attempt keeps
        existing: Token,
    },
}

/// The `name -> attempt` map
#[derive(Debug)]
pub struct Registry<H> {
    attempts: HashMap<PvName, ConnectionAttempt<H>>,
    handles: HashMap<PvName, H>,
    next_seq: u64,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            attempts: HashMap::new(),
            handles: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<H: Clone> Registry<H> {
    /// empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Pending` attempt for `name`, opening its channel through
    /// `client` unless one was opened earlier. A name with an active attempt
    /// is left as it is and keeps its original token.
    pub fn connect<C>(&mut self, name: PvName, token: Token, client: &C) -> Admission
    where
        C: ProtocolClient<Handle = H>,
    {
        if let Some(active) = self.attempts.get(&name) {
            debug!(
                ?name,
                existing = %active.token,
                dropped = %token,
                state = ?active.state,
                "attempt already active, dropping token"
            );
            return Admission::Coalesced {
                existing: active.token,
            };
        }

        let handle = match self.handles.get(&name) {
            Some(handle) => {
                trace!(?name, "reusing open channel");
                handle.clone()
            }
            None => {
                let handle = client.open(name.as_str());
                self.handles.insert(name.clone(), handle.clone());
                handle
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(?name, %token, seq, "attempt pending");
        self.attempts.insert(
            name.clone(),
            ConnectionAttempt {
                name,
                token,
                state: AttemptState::Pending,
                opened_at: Instant::now(),
                seq,
                handle,
            },
        );
        Admission::Registered
    }

    /// true when no attempt is active
    pub fn is_idle(&self) -> bool {
        self.attempts.is_empty()
    }

    /// number of active attempts
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// true when no attempt is active
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// number of attempts still waiting on their channel
    pub fn pending(&self) -> usize {
        self.attempts
            .values()
            .filter(|a| a.state == AttemptState::Pending)
            .count()
    }

    /// the active attempt for `name`
    pub fn get(&self, name: &str) -> Option<&ConnectionAttempt<H>> {
        self.attempts.get(name)
    }

    /// number of channels currently cached
    pub fn open_channels(&self) -> usize {
        self.handles.len()
    }

    /// Check every `Pending` attempt. Those whose channel is ready move to
    /// `Connected` and are returned in the order they were created. An
    /// attempt is only ever returned once.
    pub fn take_ready<C>(&mut self, client: &C) -> Vec<ConnectionAttempt<H>>
    where
        C: ProtocolClient<Handle = H>,
    {
        let mut ready = self
            .attempts
            .values_mut()
            .filter(|a| a.state == AttemptState::Pending && client.is_connected(&a.handle))
            .map(|a| {
                a.state = AttemptState::Connected;
                a.clone()
            })
            .collect::<Vec<_>>();
        ready.sort_by_key(|a| a.seq);
        ready
    }

    /// Remove `Pending` attempts that have waited at least `timeout`, along
    /// with their cached handles
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<ConnectionAttempt<H>> {
        self.remove_pending(|a| now.saturating_duration_since(a.opened_at) >= timeout)
    }

    /// Drop every `Pending` attempt and its cached handle. `Connected`
    /// attempts stay so their registration can finish
    pub fn abandon_all(&mut self) -> Vec<ConnectionAttempt<H>> {
        let mut abandoned = self.remove_pending(|_| true);
        for attempt in &mut abandoned {
            attempt.state = AttemptState::Abandoned;
        }
        abandoned
    }

    /// Remove a `Connected` attempt once its registration is done
    pub fn finish(&mut self, name: &str) -> Option<ConnectionAttempt<H>> {
        match self.attempts.get(name) {
            Some(a) if a.state == AttemptState::Connected => self.attempts.remove(name),
            _ => None,
        }
    }

    fn remove_pending<F>(&mut self, mut pred: F) -> Vec<ConnectionAttempt<H>>
    where
        F: FnMut(&ConnectionAttempt<H>) -> bool,
    {
        let names = self
            .attempts
            .values()
            .filter(|a| a.state == AttemptState::Pending && pred(a))
            .map(|a| a.name.clone())
            .collect::<Vec<_>>();
        let mut removed = names
            .iter()
            .filter_map(|name| {
                self.handles.remove(name);
                self.attempts.remove(name)
            })
            .collect::<Vec<_>>();
        removed.sort_by_key(|a| a.seq);
        removed
    }
}
