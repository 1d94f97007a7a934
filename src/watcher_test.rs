use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing_test::traced_test;

use crate::test_utils::ManualClock;
use crate::test_utils::MemoryStore;
use crate::watcher;
use crate::Clock;
use crate::Session;
use crate::SessionConfig;
use crate::StoreError;

const KEY: &str = "/planet/cluster/master";
const RETRY: Duration = Duration::from_millis(100);

fn fixture() -> (Arc<ManualClock>, MemoryStore, Session) {
    let clock = Arc::new(ManualClock::default());
    let store = MemoryStore::new(clock.clone());
    let config = SessionConfig {
        endpoints: vec!["http://127.0.0.1:2379".into()],
        clock: Some(clock.clone()),
        ..Default::default()
    };
    let session = Session::open(config, Arc::new(store.clone())).unwrap();
    (clock, store, session)
}

async fn recv(rx: &mut mpsc::Receiver<String>) -> String {
    timeout(Duration::from_secs(600), rx.recv())
        .await
        .expect("timed out waiting for a value")
        .expect("values channel closed unexpectedly")
}

#[tokio::test(start_paused = true)]
async fn first_emission_is_the_current_value() {
    let (_clock, store, session) = fixture();
    store.put(KEY, "v0");

    let (tx, mut rx) = mpsc::channel(8);
    session.add_watch(KEY, RETRY, tx);

    assert_eq!(recv(&mut rx).await, "v0");
    session.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn watch_blocks_until_a_value_exists() {
    let (_clock, store, session) = fixture();

    let (tx, mut rx) = mpsc::channel(8);
    session.add_watch(KEY, RETRY, tx);

    assert!(timeout(Duration::from_millis(250), rx.recv()).await.is_err());

    store.put(KEY, "v0");
    assert_eq!(recv(&mut rx).await, "v0");
    session.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_values_are_filtered_out() {
    let (_clock, store, session) = fixture();
    store.put(KEY, "v0");

    let (tx, mut rx) = mpsc::channel(8);
    session.add_watch(KEY, RETRY, tx);
    assert_eq!(recv(&mut rx).await, "v0");

    // A deletion reports an empty value; the next real value is what
    // subscribers see.
    store.delete(KEY);
    store.put(KEY, "v1");
    assert_eq!(recv(&mut rx).await, "v1");
    session.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn transitions_are_emitted_in_revision_order() {
    let (_clock, store, session) = fixture();
    store.put(KEY, "a");

    let (tx, mut rx) = mpsc::channel(8);
    session.add_watch(KEY, RETRY, tx);
    assert_eq!(recv(&mut rx).await, "a");

    store.put(KEY, "b");
    store.put(KEY, "c");
    assert_eq!(recv(&mut rx).await, "b");
    assert_eq!(recv(&mut rx).await, "c");
    session.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn unrelated_keys_are_not_observed() {
    let (_clock, store, session) = fixture();
    store.put(KEY, "v0");

    let (tx, mut rx) = mpsc::channel(8);
    session.add_watch(KEY, RETRY, tx);
    assert_eq!(recv(&mut rx).await, "v0");

    store.put("/planet/cluster/dns", "10.0.0.1");
    store.put(KEY, "v1");
    assert_eq!(recv(&mut rx).await, "v1");
    session.close().unwrap();
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn compaction_forces_a_resnapshot_without_losing_state() {
    let (_clock, store, session) = fixture();
    store.put(KEY, "v0");

    let (tx, mut rx) = mpsc::channel(8);
    session.add_watch(KEY, RETRY, tx);
    assert_eq!(recv(&mut rx).await, "v0");

    // The write and the compaction land before the watcher can poll,
    // so its cursor is behind the compaction cut.
    store.put(KEY, "v1");
    store.compact();

    assert_eq!(recv(&mut rx).await, "v1");

    // The re-established watch keeps delivering.
    store.put(KEY, "v2");
    assert_eq!(recv(&mut rx).await, "v2");
    session.close().unwrap();
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn unknown_error_storm_forces_a_resnapshot_and_recovers() {
    let (_clock, store, session) = fixture();
    store.put(KEY, "v0");

    let (tx, mut rx) = mpsc::channel(16);
    session.add_watch(KEY, RETRY, tx);
    assert_eq!(recv(&mut rx).await, "v0");

    for _ in 0..15 {
        store.inject_watch_error(StoreError::Other("store hiccup".into()));
    }

    // The eleventh consecutive unknown error tears the watch down; the
    // re-established watch re-emits the current value.
    assert_eq!(recv(&mut rx).await, "v0");

    store.put(KEY, "v1");
    assert_eq!(recv(&mut rx).await, "v1");
    assert!(logs_contain("unexpected watch error"));
    session.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn cluster_errors_keep_the_same_watch() {
    let (_clock, store, session) = fixture();
    store.put(KEY, "v0");

    let (tx, mut rx) = mpsc::channel(8);
    session.add_watch(KEY, RETRY, tx);
    assert_eq!(recv(&mut rx).await, "v0");

    store.inject_watch_error(StoreError::Cluster {
        message: "endpoint flapped".into(),
        cancelled: false,
    });
    store.put(KEY, "v1");

    assert_eq!(recv(&mut rx).await, "v1");
    session.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn callback_reports_initial_value_then_transitions() {
    let (_clock, store, session) = fixture();
    store.put(KEY, "v0");

    let events: Arc<Mutex<Vec<(String, String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    session.add_watch_callback(KEY, RETRY, move |key, prev, new| {
        sink.lock()
            .unwrap()
            .push((key.to_owned(), prev.to_owned(), new.to_owned()));
    });

    sleep(Duration::from_millis(50)).await;
    store.put(KEY, "v1");
    sleep(Duration::from_millis(50)).await;
    store.put(KEY, "v2");
    sleep(Duration::from_millis(50)).await;

    let events = events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            (KEY.to_owned(), "".to_owned(), "v0".to_owned()),
            (KEY.to_owned(), "v0".to_owned(), "v1".to_owned()),
            (KEY.to_owned(), "v1".to_owned(), "v2".to_owned()),
        ]
    );
    session.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn leadership_handoff_is_observed_in_sequence() {
    let (clock, store, leader) = fixture();
    let config = SessionConfig {
        endpoints: vec!["http://127.0.0.1:2379".into()],
        clock: Some(clock.clone()),
        ..Default::default()
    };
    let standby = Session::open(config, Arc::new(store.clone())).unwrap();

    // The observer lives on the standby so it survives the leader's
    // shutdown.
    let (tx, mut rx) = mpsc::channel(8);
    standby.add_watch(KEY, RETRY, tx);

    leader.add_voter(KEY, "A", Duration::from_secs(5)).unwrap();
    assert_eq!(recv(&mut rx).await, "A");

    standby.add_voter(KEY, "B", Duration::from_secs(5)).unwrap();

    // The holder stops renewing; after the lease runs out the standby
    // takes over and the same watcher sees the succession. The expiry
    // itself reports an empty value, which is filtered.
    leader.close().unwrap();
    clock.advance(Duration::from_secs(6));

    assert_eq!(recv(&mut rx).await, "B");
    standby.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn first_value_probe_returns_none_on_shutdown() {
    let clock = Arc::new(ManualClock::default());
    let store = MemoryStore::new(clock.clone() as Arc<dyn Clock>);
    let (tx, rx) = watch::channel(());

    let probe = tokio::spawn(async move {
        let mut rx = rx;
        watcher::get_first_value(&store, &mut rx, "/missing", RETRY).await
    });

    sleep(Duration::from_millis(350)).await;
    tx.send(()).unwrap();

    let result = probe.await.unwrap();
    assert!(result.is_none());
}

#[tokio::test(start_paused = true)]
async fn first_value_probe_retries_until_a_value_appears() {
    let clock = Arc::new(ManualClock::default());
    let store = MemoryStore::new(clock.clone() as Arc<dyn Clock>);
    let (_tx, rx) = watch::channel(());

    let probe = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut rx = rx;
            watcher::get_first_value(&store, &mut rx, KEY, RETRY).await
        })
    };

    sleep(Duration::from_millis(250)).await;
    let index = store.put(KEY, "v0");

    let snapshot = probe.await.unwrap().expect("probe should find the value");
    assert_eq!(snapshot.value, "v0");
    assert_eq!(snapshot.modified_index, index);
}
