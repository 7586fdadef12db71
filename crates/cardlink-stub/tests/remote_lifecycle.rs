//! End-to-end tests: a master and a slave endpoint wired over the loopback
//! transport, driving a scripted stub reader through the full session
//! lifecycle — connect, events, transmit, default selection, disconnect,
//! and transport loss.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use cardlink_core::{
    ApduRequest, ChannelControl, DefaultSelectionRequest, NodeConfig, NotificationMode,
    PluginEvent, PluginEventKind, ReaderError, ReaderEvent, ReaderEventKind, TransmissionMode,
};
use cardlink_master::MasterApi;
use cardlink_slave::{NativeReader, SlaveApi};
use cardlink_stub::{channel_link, spawn_pump, StubCard, StubReader};

const EVENT_WAIT: Duration = Duration::from_secs(2);
const SILENCE_WAIT: Duration = Duration::from_millis(200);

struct Harness {
    master: MasterApi,
    slave: SlaveApi,
    reader: Arc<StubReader>,
    /// When set, the slave's inbox is drained without being handled — the
    /// link stays up but the slave never answers.
    mute_slave: Arc<AtomicBool>,
}

async fn harness() -> Harness {
    let (to_master, master_inbox) = channel_link();
    let (to_slave, slave_inbox) = channel_link();

    let mut master_config = NodeConfig::new("master-1");
    master_config.request_timeout_ms = 500;
    let mut slave_config = NodeConfig::new("slave-1");
    slave_config.request_timeout_ms = 500;

    let master = MasterApi::new(&master_config, "cardlink", Arc::new(to_slave));
    let slave = SlaveApi::new(&slave_config, master.node_id().clone(), Arc::new(to_master));

    {
        let master = master.clone();
        spawn_pump(master_inbox, move |envelope| {
            let master = master.clone();
            async move { master.on_envelope(envelope).await }
        });
    }
    let mute_slave = Arc::new(AtomicBool::new(false));
    {
        let slave = slave.clone();
        let mute = Arc::clone(&mute_slave);
        spawn_pump(slave_inbox, move |envelope| {
            let slave = slave.clone();
            let mute = Arc::clone(&mute);
            async move {
                if !mute.load(Ordering::Relaxed) {
                    slave.on_envelope(envelope).await;
                }
            }
        });
    }

    let reader = Arc::new(StubReader::new("stub-0", TransmissionMode::Contactless));
    slave
        .register_reader(Arc::clone(&reader) as Arc<dyn NativeReader>)
        .await;

    Harness {
        master,
        slave,
        reader,
        mute_slave,
    }
}

async fn next_plugin_event(rx: &mut broadcast::Receiver<PluginEvent>) -> PluginEvent {
    timeout(EVENT_WAIT, rx.recv())
        .await
        .expect("timed out waiting for plugin event")
        .expect("plugin event channel closed")
}

async fn next_reader_event(rx: &mut broadcast::Receiver<ReaderEvent>) -> ReaderEvent {
    timeout(EVENT_WAIT, rx.recv())
        .await
        .expect("timed out waiting for reader event")
        .expect("reader event channel closed")
}

fn scripted_card() -> StubCard {
    StubCard::from_hex_atr("3B 88 80 01 00 00 00 00 00 00 00 00 09")
        .unwrap()
        .with_hex_command("00 B2 01 44 00", "AA 90 00")
        .with_hex_command("00 B2 02 44 00", "BB 90 00")
        .with_hex_command("00 B2 03 44 00", "CC 90 00")
}

// ── Session lifecycle ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_emits_reader_connected_once() {
    let h = harness().await;
    let mut events = h.master.plugin().subscribe();

    let session_id = h
        .slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .expect("connect succeeds");
    assert!(session_id.starts_with("master-1-"));

    let event = next_plugin_event(&mut events).await;
    assert_eq!(event.kind, PluginEventKind::ReaderConnected);
    assert_eq!(event.plugin_name, "cardlink");
    assert_eq!(event.reader_names.len(), 1);
    assert_eq!(event.reader_names[0], "remote-slave-1-stub-0");

    assert!(
        timeout(SILENCE_WAIT, events.recv()).await.is_err(),
        "exactly one event per connect"
    );
}

#[tokio::test]
async fn test_connect_twice_same_reader_fails() {
    let h = harness().await;
    let mut events = h.master.plugin().subscribe();

    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .expect("first connect succeeds");
    let second = h.slave.connect_reader("stub-0", BTreeMap::new()).await;
    assert!(matches!(second, Err(ReaderError::ReaderAlreadyConnected(_))));

    let event = next_plugin_event(&mut events).await;
    assert_eq!(event.kind, PluginEventKind::ReaderConnected);
    assert!(
        timeout(SILENCE_WAIT, events.recv()).await.is_err(),
        "READER_CONNECTED is raised only once"
    );
    assert_eq!(h.master.plugin().reader_count().await, 1);
}

#[tokio::test]
async fn test_disconnect_unknown_reader_fails_without_event() {
    let h = harness().await;
    let mut events = h.master.plugin().subscribe();

    let result = h
        .slave
        .disconnect_reader("anysession", "a-not-connected-reader")
        .await;
    assert!(matches!(result, Err(ReaderError::ReaderNotConnected(_))));
    assert!(timeout(SILENCE_WAIT, events.recv()).await.is_err());
}

#[tokio::test]
async fn test_connect_then_disconnect_events_in_order() {
    let h = harness().await;
    let mut events = h.master.plugin().subscribe();

    let session_id = h
        .slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();
    h.slave
        .disconnect_reader(&session_id, "stub-0")
        .await
        .expect("disconnect succeeds");

    let first = next_plugin_event(&mut events).await;
    assert_eq!(first.kind, PluginEventKind::ReaderConnected);
    let second = next_plugin_event(&mut events).await;
    assert_eq!(second.kind, PluginEventKind::ReaderDisconnected);
    assert_eq!(second.reader_names, first.reader_names);
    assert!(timeout(SILENCE_WAIT, events.recv()).await.is_err());

    assert_eq!(h.master.plugin().reader_count().await, 0);
}

#[tokio::test]
async fn test_reconnect_after_disconnect_gets_fresh_session() {
    let h = harness().await;

    let first = h
        .slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();
    h.slave.disconnect_reader(&first, "stub-0").await.unwrap();
    let second = h
        .slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();
    assert_ne!(first, second, "session ids are never reused");
}

// ── Transmit ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_transmit_set_preserves_order() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();
    h.reader.insert_card(scripted_card());

    let reader = h.master.plugin().reader("remote-slave-1-stub-0").await.unwrap();
    let result = reader
        .transmit_set(
            vec![
                ApduRequest::from_hex("00 B2 01 44 00").unwrap(),
                ApduRequest::from_hex("00 B2 02 44 00").unwrap(),
                ApduRequest::from_hex("00 B2 03 44 00").unwrap(),
            ],
            ChannelControl::KeepOpen,
        )
        .await
        .expect("transmit succeeds");

    assert!(result.failure.is_none());
    let data: Vec<u8> = result.responses.iter().map(|r| r.data()[0]).collect();
    assert_eq!(data, vec![0xAA, 0xBB, 0xCC]);
    assert!(h.reader.is_channel_open());
}

#[tokio::test]
async fn test_transmit_set_partial_failure_returns_prefix_and_error() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();
    h.reader.insert_card(scripted_card());

    let reader = h.master.plugin().reader("remote-slave-1-stub-0").await.unwrap();
    let result = reader
        .transmit_set(
            vec![
                ApduRequest::from_hex("00 B2 01 44 00").unwrap(),
                ApduRequest::from_hex("00 B2 02 44 00").unwrap(),
                ApduRequest::from_hex("00 DE AD BE EF").unwrap(),
                ApduRequest::from_hex("00 B2 03 44 00").unwrap(),
            ],
            ChannelControl::KeepOpen,
        )
        .await
        .expect("the call itself still succeeds");

    assert_eq!(result.responses.len(), 2, "responses before the fault survive");
    let failure = result.failure.expect("terminal failure is attached");
    assert!(matches!(failure, ReaderError::Io(_)));
}

#[tokio::test]
async fn test_transmit_close_after_closes_native_channel() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();
    h.reader.insert_card(scripted_card());

    let reader = h.master.plugin().reader("remote-slave-1-stub-0").await.unwrap();
    reader
        .transmit_set(
            vec![ApduRequest::from_hex("00 B2 01 44 00").unwrap()],
            ChannelControl::CloseAfter,
        )
        .await
        .unwrap();
    assert!(!h.reader.is_channel_open());
}

#[tokio::test]
async fn test_transmit_times_out_when_slave_is_gone() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();

    // The slave goes silent: requests are still accepted by the transport
    // but never answered.
    h.mute_slave.store(true, Ordering::Relaxed);

    let reader = h.master.plugin().reader("remote-slave-1-stub-0").await.unwrap();
    let err = reader
        .transmit_set(
            vec![ApduRequest::from_hex("00 B2 01 44 00").unwrap()],
            ChannelControl::KeepOpen,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::TransportTimeout(_)));
}

// ── Event replication ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_card_presence_events_propagate_in_order() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();

    let reader = h.master.plugin().reader("remote-slave-1-stub-0").await.unwrap();
    let mut events = reader.subscribe();

    h.reader.insert_card(scripted_card());
    let inserted = next_reader_event(&mut events).await;
    assert_eq!(inserted.kind, ReaderEventKind::CardInserted);
    assert_eq!(inserted.reader_name, "remote-slave-1-stub-0");

    h.reader.remove_card();
    let removed = next_reader_event(&mut events).await;
    assert_eq!(removed.kind, ReaderEventKind::CardRemoved);
}

#[tokio::test]
async fn test_io_error_event_propagates() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();

    let reader = h.master.plugin().reader("remote-slave-1-stub-0").await.unwrap();
    let mut events = reader.subscribe();

    h.reader.report_io_error("card torn during exchange");
    let event = next_reader_event(&mut events).await;
    match event.kind {
        ReaderEventKind::IoError { message } => {
            assert!(message.contains("card torn"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_event_after_disconnect_is_dropped_silently() {
    let h = harness().await;
    let session_id = h
        .slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();
    h.slave
        .disconnect_reader(&session_id, "stub-0")
        .await
        .unwrap();

    // The native reader keeps emitting, but the virtual reader is gone; the
    // master must drop the event without failing anywhere.
    h.reader.insert_card(scripted_card());
    tokio::time::sleep(SILENCE_WAIT).await;
    assert_eq!(h.master.plugin().reader_count().await, 0);
}

// ── Default selection ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_default_selection_match_reports_card_matched() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();

    let reader = h.master.plugin().reader("remote-slave-1-stub-0").await.unwrap();
    reader
        .set_default_selection(DefaultSelectionRequest {
            apdus: vec![ApduRequest::from_hex("00 A4 04 00 05 AA BB CC DD EE").unwrap()],
            channel: ChannelControl::KeepOpen,
            notification_mode: NotificationMode::MatchedOnly,
        })
        .await
        .expect("selection registered");

    let mut events = reader.subscribe();
    h.reader.insert_card(
        scripted_card().with_hex_command("00 A4 04 00 05 AA BB CC DD EE", "6F 07 84 05 AA BB CC DD EE 90 00"),
    );

    let event = next_reader_event(&mut events).await;
    match event.kind {
        ReaderEventKind::CardMatched { responses } => {
            assert_eq!(responses.len(), 1);
            assert!(responses[0].is_success());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_matched_only_suppresses_unmatched_insertion() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();

    let reader = h.master.plugin().reader("remote-slave-1-stub-0").await.unwrap();
    reader
        .set_default_selection(DefaultSelectionRequest {
            apdus: vec![ApduRequest::from_hex("00 A4 04 00 05 AA BB CC DD EE").unwrap()],
            channel: ChannelControl::KeepOpen,
            notification_mode: NotificationMode::MatchedOnly,
        })
        .await
        .unwrap();

    let mut events = reader.subscribe();
    // The card answers the selection with "file not found" — present but not
    // matching.
    h.reader.insert_card(
        scripted_card().with_hex_command("00 A4 04 00 05 AA BB CC DD EE", "6A 82"),
    );

    assert!(
        timeout(SILENCE_WAIT, events.recv()).await.is_err(),
        "MATCHED_ONLY suppresses unmatched insertions"
    );
}

#[tokio::test]
async fn test_always_mode_reports_unmatched_insertion() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();

    let reader = h.master.plugin().reader("remote-slave-1-stub-0").await.unwrap();
    reader
        .set_default_selection(DefaultSelectionRequest {
            apdus: vec![ApduRequest::from_hex("00 A4 04 00 05 AA BB CC DD EE").unwrap()],
            channel: ChannelControl::KeepOpen,
            notification_mode: NotificationMode::Always,
        })
        .await
        .unwrap();

    let mut events = reader.subscribe();
    h.reader.insert_card(
        scripted_card().with_hex_command("00 A4 04 00 05 AA BB CC DD EE", "6A 82"),
    );

    let event = next_reader_event(&mut events).await;
    assert_eq!(event.kind, ReaderEventKind::CardInserted);
}

// ── Transport loss ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connection_lost_forces_disconnect_event() {
    let h = harness().await;
    h.slave
        .connect_reader("stub-0", BTreeMap::new())
        .await
        .unwrap();
    let mut events = h.master.plugin().subscribe();

    h.master.connection_lost(h.slave.node_id()).await;

    let event = next_plugin_event(&mut events).await;
    assert_eq!(event.kind, PluginEventKind::ReaderDisconnected);
    assert_eq!(h.master.plugin().reader_count().await, 0);

    // The pair is unbound again, so a fresh connect succeeds.
    let session = h.slave.connect_reader("stub-0", BTreeMap::new()).await;
    assert!(session.is_ok());
}
