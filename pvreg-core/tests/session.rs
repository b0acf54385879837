mod common;

use std::time::Duration;

use common::{FailAt, FlakyStore, RecordingClient};
use pvreg_core::{
    instrument_store::{Storage, memory::MemoryStore, sqlite::SqliteStore},
    prelude::*,
    pv_client::sim::{SimClient, SimConfig},
    pv_name::NameError,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_test::traced_test;

fn sim() -> SimClient {
    let client = SimClient::new();
    common::records(&client);
    client
}

async fn memory_session(
    client: SimClient,
    config: SessionConfig,
) -> (Session<SimClient, MemoryStore>, UnboundedReceiver<Event>) {
    Session::open(client, MemoryStore::new(), "slits", config)
        .await
        .unwrap()
}

/// tick until nothing is active, returning every event emitted
async fn drain<C: ProtocolClient, S: Storage>(
    session: &mut Session<C, S>,
    rx: &mut UnboundedReceiver<Event>,
) -> Vec<Event> {
    let interval = session.config().poll_interval;
    while session.tick().await != TickOutcome::Stopped {
        tokio::time::sleep(interval).await;
    }
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn suffix_reads_metadata_from_record() {
    let client = RecordingClient::new(sim());
    let (mut session, mut rx) = Session::open(
        client.clone(),
        MemoryStore::new(),
        "slits",
        SessionConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(
        session.connect("IOC:m1.RBV", Token(1)),
        ConnectOutcome::Opened
    );
    let events = drain(&mut session, &mut rx).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Connected { token, pv } => {
            assert_eq!(*token, Token(1));
            assert_eq!(pv.name.as_str(), "IOC:m1.RBV");
            assert_eq!(pv.name.prefix(), "IOC:m1");
            assert_eq!(pv.name.suffix(), Some("RBV"));
            assert_eq!(pv.record_type, "motor");
            // a field of a motor is classified by its own type
            assert_eq!(pv.display_type, DisplayType::Numeric);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        client.reads(),
        [
            ("IOC:m1".to_owned(), MetaField::Desc),
            ("IOC:m1".to_owned(), MetaField::Rtyp)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn duplicate_requests_share_one_attempt() {
    let client = sim();
    client.update("IOC:m1", |rec| rec.connect_delay_ms = 1_000);
    let (mut session, mut rx) = memory_session(client.clone(), SessionConfig::default()).await;

    assert_eq!(session.connect("IOC:m1", Token(1)), ConnectOutcome::Opened);
    assert_eq!(
        session.connect("IOC:m1", Token(2)),
        ConnectOutcome::Coalesced
    );
    assert_eq!(
        session.connect(" IOC:m1 ", Token(3)),
        ConnectOutcome::Coalesced
    );
    assert_eq!(session.registry().len(), 1);
    assert_eq!(session.registry().get("IOC:m1").unwrap().token(), Token(1));
    assert_eq!(client.open_count(), 1);

    let events = drain(&mut session, &mut rx).await;
    let tokens: Vec<_> = events.iter().map(Event::token).collect();
    assert_eq!(tokens, [Token(1)]);
    assert_eq!(client.metadata_reads(), 2);
    assert_eq!(session.current_pvs().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_names_are_rejected() {
    let client = sim();
    let (mut session, mut rx) = memory_session(client.clone(), SessionConfig::default()).await;
    for raw in ["", "   ", "\t\n"] {
        assert_eq!(
            session.connect(raw, Token(1)),
            ConnectOutcome::Rejected(NameError::Empty)
        );
    }
    assert!(session.is_idle());
    assert!(!session.scheduler().is_running());
    assert_eq!(client.open_count(), 0);
    assert_eq!(session.tick().await, TickOutcome::Stopped);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn metadata_failure_is_reported() {
    let (mut session, mut rx) = memory_session(sim(), SessionConfig::default()).await;
    session.connect("IOC:broken", Token(8));

    let events = drain(&mut session, &mut rx).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Failed { token, name, error } => {
            assert_eq!(*token, Token(8));
            assert_eq!(name.as_str(), "IOC:broken");
            assert!(matches!(error, RegistrationError::MetadataFetch { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.store().pv("IOC:broken").await.unwrap(), None);
    assert_eq!(session.store().pv_count(), 0);
    assert!(logs_contain("registration failed"));
}

#[tokio::test(start_paused = true)]
async fn failed_transactions_leave_nothing() {
    for at in [FailAt::Append, FailAt::Commit] {
        let store = FlakyStore::default();
        store.fail_at(Some(at));
        let (mut session, mut rx) =
            Session::open(sim(), store.clone(), "slits", SessionConfig::default())
                .await
                .unwrap();
        session.connect("IOC:temp", Token(1));

        let events = drain(&mut session, &mut rx).await;
        assert_eq!(events.len(), 1, "{at:?}");
        assert!(matches!(
            &events[0],
            Event::Failed {
                error: RegistrationError::Persistence(_),
                ..
            }
        ));
        assert_eq!(store.inner.pv_count(), 0);
        assert!(session.current_pvs().await.unwrap().is_empty());

        // the same name registers once the store recovers
        store.fail_at(None);
        session.connect("IOC:temp", Token(2));
        let events = drain(&mut session, &mut rx).await;
        assert!(matches!(&events[..], [Event::Connected { token: Token(2), .. }]));
        assert_eq!(store.inner.pv_count(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn scheduler_stops_once_resolved() {
    let (mut session, _rx) = memory_session(sim(), SessionConfig::default()).await;
    assert!(!session.scheduler().is_running());
    session.connect("IOC:temp", Token(1));
    session.connect("IOC:shutter", Token(2));
    assert!(session.scheduler().is_running());

    assert!(matches!(
        session.tick().await,
        TickOutcome::Polled {
            completed: 2,
            pending: 0,
            ..
        }
    ));
    assert!(!session.scheduler().is_running());
    assert_eq!(session.tick().await, TickOutcome::Stopped);
}

#[tokio::test(start_paused = true)]
async fn pending_attempts_time_out() {
    let config = SessionConfig {
        connect_timeout: Some(Duration::from_secs(2)),
        ..SessionConfig::default()
    };
    let (mut session, mut rx) = memory_session(sim(), config).await;
    session.connect("IOC:gone", Token(3));

    tokio::time::advance(Duration::from_millis(1_500)).await;
    assert_eq!(
        session.tick().await,
        TickOutcome::Polled {
            completed: 0,
            failed: 0,
            pending: 1
        }
    );
    assert!(rx.try_recv().is_err());

    let events = drain(&mut session, &mut rx).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Failed {
            token,
            error: RegistrationError::ConnectionTimedOut { elapsed },
            ..
        } => {
            assert_eq!(*token, Token(3));
            assert!(*elapsed >= Duration::from_secs(2));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(session.is_idle());
}

#[tokio::test(start_paused = true)]
async fn without_timeout_pending_waits() {
    let (mut session, mut rx) = memory_session(sim(), SessionConfig::default()).await;
    session.connect("IOC:gone", Token(1));
    for _ in 0..10 {
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(matches!(
            session.tick().await,
            TickOutcome::Polled { pending: 1, .. }
        ));
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(session.close(), 1);
    assert_eq!(session.tick().await, TickOutcome::Stopped);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn reconnect_reuses_channel() {
    let client = sim();
    let (mut session, mut rx) = memory_session(client.clone(), SessionConfig::default()).await;
    session.connect("IOC:shutter", Token(1));
    assert_eq!(drain(&mut session, &mut rx).await.len(), 1);

    client.update("IOC:shutter", |rec| rec.desc = "beam shutter".into());
    assert_eq!(
        session.connect("IOC:shutter", Token(2)),
        ConnectOutcome::Opened
    );
    let events = drain(&mut session, &mut rx).await;
    match &events[..] {
        [Event::Connected { token, pv }] => {
            assert_eq!(*token, Token(2));
            assert_eq!(pv.description, "beam shutter");
            assert_eq!(pv.display_type, DisplayType::Binary);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(client.open_count(), 1);
    assert_eq!(session.registry().open_channels(), 1);
    // linking again keeps a single entry
    assert_eq!(session.current_pvs().await.unwrap().len(), 1);
}

static RECORDS: &str = r#"
records:
  "IOC:m1":
    rtyp: motor
    desc: sample x
    unreachable: true
  "IOC:shutter":
    rtyp: bo
    field_type: enum
    unreachable: true
  "IOC:label":
    rtyp: waveform
    field_type: char
    count: 40
    unreachable: true
  "IOC:mode":
    rtyp: mbbo
    field_type: enum
    unreachable: true
  "IOC:name":
    rtyp: stringin
    field_type: string
    unreachable: true
"#;

#[tokio::test]
#[traced_test]
async fn sqlite_keeps_registration_order() {
    let client = SimClient::from_config(SimConfig::parse_str(RECORDS).unwrap());
    let store = SqliteStore::new("sqlite::memory:").await.unwrap();
    let (mut session, mut rx) =
        Session::open(client.clone(), store, "beamline", SessionConfig::default())
            .await
            .unwrap();

    for (i, raw) in ["IOC:name", "IOC:shutter", "IOC:m1", "IOC:label", "IOC:mode"]
        .into_iter()
        .enumerate()
    {
        assert_eq!(session.connect(raw, Token(i as u64)), ConnectOutcome::Opened);
    }
    assert!(matches!(
        session.tick().await,
        TickOutcome::Polled { pending: 5, .. }
    ));

    let batches: [&[&str]; 4] = [
        &["IOC:mode"],
        &["IOC:m1"],
        &["IOC:label", "IOC:shutter"],
        &["IOC:name"],
    ];
    for batch in batches {
        for name in batch {
            client.update(name, |rec| rec.unreachable = false);
        }
        assert!(matches!(
            session.tick().await,
            TickOutcome::Polled { completed, failed: 0, .. } if completed == batch.len()
        ));
    }
    assert_eq!(session.tick().await, TickOutcome::Stopped);

    let mut names = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        names.push(ev.name().to_string());
    }
    // ready together, committed in request order
    assert_eq!(
        names,
        ["IOC:mode", "IOC:m1", "IOC:shutter", "IOC:label", "IOC:name"]
    );

    let pvs = session.current_pvs().await.unwrap();
    let stored: Vec<_> = pvs
        .iter()
        .map(|pv| (pv.name.as_str(), pv.display_type))
        .collect();
    assert_eq!(
        stored,
        [
            ("IOC:mode", DisplayType::Enum),
            ("IOC:m1", DisplayType::Motor),
            ("IOC:shutter", DisplayType::Binary),
            ("IOC:label", DisplayType::String),
            ("IOC:name", DisplayType::String),
        ]
    );
    assert!(logs_contain("pv registered"));
}
