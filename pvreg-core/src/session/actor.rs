use instrument_store::Storage;
use pv_client::ProtocolClient;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span};
use tracing_futures::Instrument;

use crate::session::{ConnectOutcome, Session, Token};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug)]
enum Command {
    Connect {
        raw: String,
        token: Token,
        reply: oneshot::Sender<ConnectOutcome>,
    },
    Close {
        reply: oneshot::Sender<usize>,
    },
}

/// the session task has exited
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("session is no longer running")]
pub struct SessionClosed;

/// Cloneable handle to a session running on its own task
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// see [`Session::connect`]
    pub async fn connect(
        &self,
        raw: impl Into<String>,
        token: Token,
    ) -> Result<ConnectOutcome, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Connect {
                raw: raw.into(),
                token,
                reply,
            })
            .await
            .map_err(|_| SessionClosed)?;
        rx.await.map_err(|_| SessionClosed)
    }

    /// Abandon pending attempts and end the session task. Returns how many
    /// attempts were abandoned
    pub async fn close(&self) -> Result<usize, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Close { reply })
            .await
            .map_err(|_| SessionClosed)?;
        rx.await.map_err(|_| SessionClosed)
    }

    /// true once the session task has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<C, S> Session<C, S>
where
    C: ProtocolClient,
    S: Storage,
{
    /// Move the session onto its own task. The task polls on the configured
    /// interval while attempts are active and ends when `cancel` fires, on
    /// [`SessionHandle::close`] or when every handle is dropped. Its result is
    /// the number of attempts abandoned on the way out.
    pub fn spawn(self, cancel: CancellationToken) -> (SessionHandle, JoinHandle<usize>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let span = info_span!("session", instrument = %self.target_instrument().name);
        let task = tokio::spawn(self.run(rx, cancel).instrument(span));
        (SessionHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) -> usize {
        let mut ticker = time::interval(self.scheduler().interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("session cancelled");
                    break;
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Connect { raw, token, reply }) => {
                        let was_running = self.scheduler().is_running();
                        let outcome = self.connect(&raw, token);
                        if !was_running && self.scheduler().is_running() {
                            // first poll one interval from now
                            ticker.reset();
                        }
                        if reply.send(outcome).is_err() {
                            debug!(%token, "connect caller went away");
                        }
                    }
                    Some(Command::Close { reply }) => {
                        let abandoned = self.close();
                        if reply.send(abandoned).is_err() {
                            debug!(abandoned, "close caller went away");
                        }
                        return abandoned;
                    }
                    None => {
                        debug!("all session handles dropped");
                        break;
                    }
                },
                _ = ticker.tick(), if self.scheduler().is_running() => {
                    self.tick().await;
                }
            }
        }
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use instrument_store::memory::MemoryStore;
    use pv_client::{
        FieldType,
        sim::{SimClient, SimRecord},
    };

    use tracing_test::traced_test;

    use super::*;
    use crate::session::{Event, MIN_POLL_INTERVAL, SessionConfig};

    #[tokio::test(start_paused = true)]
    async fn spawned_session_polls_until_idle() {
        let client = SimClient::new();
        client.insert(
            "IOC:m1",
            SimRecord::new("motor", FieldType::Double).connect_delay(Duration::from_millis(1200)),
        );
        let (session, mut events) =
            Session::open(client, MemoryStore::new(), "slits", SessionConfig::default())
                .await
                .unwrap();
        let cancel = CancellationToken::new();
        let (handle, task) = session.spawn(cancel.clone());

        assert_eq!(
            handle.connect("IOC:m1", Token(4)).await.unwrap(),
            ConnectOutcome::Opened
        );
        assert_eq!(
            handle.connect("IOC:m1", Token(5)).await.unwrap(),
            ConnectOutcome::Coalesced
        );

        match events.recv().await.unwrap() {
            Event::Connected { token, pv } => {
                assert_eq!(token, Token(4));
                assert_eq!(pv.name.as_str(), "IOC:m1");
            }
            other => panic!("unexpected {other:?}"),
        }

        cancel.cancel();
        assert_eq!(task.await.unwrap(), 0);
        assert!(handle.connect("IOC:m1", Token(6)).await.is_err());
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn close_abandons_and_exits() {
        let client = SimClient::new();
        client.insert(
            "IOC:gone",
            SimRecord::new("ai", FieldType::Double).unreachable(true),
        );
        let (session, mut events) =
            Session::open(client, MemoryStore::new(), "slits", SessionConfig::default())
                .await
                .unwrap();
        let (handle, task) = session.spawn(CancellationToken::new());
        handle.connect("IOC:gone", Token(1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(handle.close().await.unwrap(), 1);
        assert_eq!(task.await.unwrap(), 1);
        assert!(handle.is_closed());
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_still_polls() {
        let client = SimClient::new();
        client.insert(
            "IOC:m1",
            SimRecord::new("motor", FieldType::Double).connect_delay(Duration::from_millis(5)),
        );
        let config = SessionConfig {
            poll_interval: Duration::ZERO,
            ..SessionConfig::default()
        };
        let (session, mut events) = Session::open(client, MemoryStore::new(), "slits", config)
            .await
            .unwrap();
        assert_eq!(session.config().poll_interval, MIN_POLL_INTERVAL);
        assert_eq!(session.scheduler().interval(), MIN_POLL_INTERVAL);

        let cancel = CancellationToken::new();
        let (handle, task) = session.spawn(cancel.clone());
        assert_eq!(
            handle.connect("IOC:m1", Token(1)).await.unwrap(),
            ConnectOutcome::Opened
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::Connected {
                token: Token(1),
                ..
            }
        ));

        cancel.cancel();
        assert_eq!(task.await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn close_without_caller_still_exits() {
        let client = SimClient::new();
        client.insert(
            "IOC:gone",
            SimRecord::new("ai", FieldType::Double).unreachable(true),
        );
        let (session, _events) =
            Session::open(client, MemoryStore::new(), "slits", SessionConfig::default())
                .await
                .unwrap();
        let (handle, task) = session.spawn(CancellationToken::new());
        handle.connect("IOC:gone", Token(1)).await.unwrap();

        // drop the reply side before the task gets to answer
        let (reply, rx) = oneshot::channel();
        drop(rx);
        handle.tx.send(Command::Close { reply }).await.unwrap();

        assert_eq!(task.await.unwrap(), 1);
        assert!(handle.is_closed());
        assert!(logs_contain("close caller went away"));
    }
}
