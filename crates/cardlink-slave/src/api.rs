//! The slave endpoint.
//!
//! [`SlaveApi`] owns the native reader registry and plays both protocol
//! roles: it initiates `CONNECT_READER`/`DISCONNECT_READER` towards the
//! master (offering and withdrawing its readers), and it serves
//! `TRANSMIT_SET`/`SET_DEFAULT_SELECTION` requests against the local
//! hardware. After a successful connect it forwards the native reader's
//! events to the master until the session ends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cardlink_core::protocol::bodies::{
    decode_body, encode_body, ConnectReaderRequest, ConnectReaderResponse, ReaderEventBody,
    SetDefaultSelectionRequest, TransmitSetRequest, TransmitSetResponse,
};
use cardlink_core::{
    ApduResponse, ChannelControl, DefaultSelectionRequest, Envelope, EnvelopeSender, NodeConfig,
    NodeId, NotificationMode, PendingRequests, ReaderError, ReaderEvent, ReaderEventKind,
    RemoteMethod,
};

use crate::native::{NativeReader, NativeReaderEvent};

/// Local bookkeeping for one connected reader.
struct SlaveSession {
    session_id: String,
    virtual_reader_name: String,
    forwarder: Option<JoinHandle<()>>,
}

struct SlaveInner {
    node_id: NodeId,
    master_node_id: NodeId,
    sender: Arc<dyn EnvelopeSender>,
    pending: PendingRequests,
    request_timeout: Duration,
    readers: Mutex<HashMap<String, Arc<dyn NativeReader>>>,
    selections: Mutex<HashMap<String, DefaultSelectionRequest>>,
    sessions: Mutex<HashMap<String, SlaveSession>>,
}

/// The slave endpoint. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct SlaveApi {
    inner: Arc<SlaveInner>,
}

impl SlaveApi {
    pub fn new(config: &NodeConfig, master_node_id: NodeId, sender: Arc<dyn EnvelopeSender>) -> Self {
        Self {
            inner: Arc::new(SlaveInner {
                node_id: NodeId::from(config.node_id.clone()),
                master_node_id,
                sender,
                pending: PendingRequests::new(),
                request_timeout: config.request_timeout(),
                readers: Mutex::new(HashMap::new()),
                selections: Mutex::new(HashMap::new()),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    /// Makes a native reader available for remote binding.
    pub async fn register_reader(&self, reader: Arc<dyn NativeReader>) {
        let name = reader.name().to_string();
        debug!(reader = %name, "registering native reader");
        self.inner.readers.lock().await.insert(name, reader);
    }

    /// Resolves a registered native reader by name.
    pub async fn find_local_reader(&self, name: &str) -> Result<Arc<dyn NativeReader>, ReaderError> {
        self.inner
            .readers
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ReaderError::ReaderNotFound(name.to_string()))
    }

    // ── Transmit roles ────────────────────────────────────────────────────────

    /// Offers a native reader to the master and returns the new session id.
    ///
    /// On success the reader's events start flowing to the master (if the
    /// reader supports observation).
    pub async fn connect_reader(
        &self,
        native_reader_name: &str,
        options: BTreeMap<String, String>,
    ) -> Result<String, ReaderError> {
        let reader = self.find_local_reader(native_reader_name).await?;

        let body = ConnectReaderRequest {
            transmission_mode: reader.transmission_mode(),
            options,
        };
        let envelope = Envelope::request(
            RemoteMethod::ConnectReader,
            self.inner.node_id.clone(),
            self.inner.master_node_id.clone(),
            encode_body(&body)?,
        )
        .with_native_reader(native_reader_name);

        let response = self
            .inner
            .pending
            .call(&*self.inner.sender, envelope, self.inner.request_timeout)
            .await?;
        if let Some(payload) = &response.error {
            return Err(ReaderError::from_payload(payload));
        }
        let response_body: ConnectReaderResponse = decode_body(&response.body)?;
        let virtual_reader_name = response.virtual_reader_name.clone();

        let forwarder = reader.events().map(|events| {
            debug!(reader = %native_reader_name, "starting native event forwarding");
            tokio::spawn(forward_native_events(
                Arc::clone(&self.inner),
                Arc::clone(&reader),
                events,
                response_body.session_id.clone(),
                virtual_reader_name.clone(),
                native_reader_name.to_string(),
            ))
        });

        self.inner.sessions.lock().await.insert(
            native_reader_name.to_string(),
            SlaveSession {
                session_id: response_body.session_id.clone(),
                virtual_reader_name,
                forwarder,
            },
        );

        info!(
            reader = %native_reader_name,
            session = %response_body.session_id,
            "native reader connected to master"
        );
        Ok(response_body.session_id)
    }

    /// Withdraws a native reader from the master.
    pub async fn disconnect_reader(
        &self,
        session_id: &str,
        native_reader_name: &str,
    ) -> Result<(), ReaderError> {
        let envelope = Envelope::request(
            RemoteMethod::DisconnectReader,
            self.inner.node_id.clone(),
            self.inner.master_node_id.clone(),
            Vec::new(),
        )
        .with_session(session_id)
        .with_native_reader(native_reader_name);

        let response = self
            .inner
            .pending
            .call(&*self.inner.sender, envelope, self.inner.request_timeout)
            .await?;
        if let Some(payload) = &response.error {
            return Err(ReaderError::from_payload(payload));
        }

        self.drop_local_session(native_reader_name).await;
        info!(reader = %native_reader_name, "native reader disconnected from master");
        Ok(())
    }

    // ── Receive roles ─────────────────────────────────────────────────────────

    /// Entry point for every envelope the transport delivers to this node.
    pub async fn on_envelope(&self, envelope: Envelope) {
        // Responses are recognized by their correlation id.
        let envelope = match self.inner.pending.try_complete(envelope) {
            None => return,
            Some(envelope) => envelope,
        };

        // An error payload marks a response; with no waiting caller it can
        // only be a late or duplicate delivery.
        if envelope.error.is_some() {
            debug!(correlation = %envelope.correlation_id, "discarding unmatched error response");
            return;
        }

        match envelope.method {
            RemoteMethod::TransmitSet => self.handle_transmit_set(envelope).await,
            RemoteMethod::SetDefaultSelection => self.handle_set_default_selection(envelope).await,
            RemoteMethod::ReaderEvent | RemoteMethod::PluginEvent => {
                debug!(method = %envelope.method, "notification addressed to a slave, dropping");
            }
            RemoteMethod::ConnectReader | RemoteMethod::DisconnectReader => {
                // Only the slave ever sends these, so an unmatched one here
                // is a response whose caller already timed out or went away.
                debug!(
                    method = %envelope.method,
                    correlation = %envelope.correlation_id,
                    "discarding late response"
                );
            }
        }
    }

    /// Tears down all sessions after an unrecoverable transport failure.
    pub async fn connection_lost(&self) {
        self.inner.pending.fail_all();
        let mut sessions = self.inner.sessions.lock().await;
        for (name, session) in sessions.drain() {
            if let Some(task) = session.forwarder {
                task.abort();
            }
            warn!(
                reader = %name,
                session = %session.session_id,
                "session dropped after transport loss"
            );
        }
    }

    async fn handle_transmit_set(&self, envelope: Envelope) {
        let reader = match self.find_local_reader(&envelope.native_reader_name).await {
            Ok(reader) => reader,
            Err(err) => return self.respond_error(&envelope, &err).await,
        };
        let request: TransmitSetRequest = match decode_body(&envelope.body) {
            Ok(request) => request,
            Err(err) => return self.respond_error(&envelope, &ReaderError::Protocol(err)).await,
        };

        let response_body = run_transmit_set(reader.as_ref(), &request);
        match encode_body(&response_body) {
            Ok(body) => self.send_response(envelope.success_response(body)).await,
            Err(err) => self.respond_error(&envelope, &ReaderError::Protocol(err)).await,
        }
    }

    async fn handle_set_default_selection(&self, envelope: Envelope) {
        if let Err(err) = self.find_local_reader(&envelope.native_reader_name).await {
            return self.respond_error(&envelope, &err).await;
        }
        let request: SetDefaultSelectionRequest = match decode_body(&envelope.body) {
            Ok(request) => request,
            Err(err) => return self.respond_error(&envelope, &ReaderError::Protocol(err)).await,
        };

        debug!(
            reader = %envelope.native_reader_name,
            mode = ?request.selection.notification_mode,
            "default selection registered"
        );
        self.inner
            .selections
            .lock()
            .await
            .insert(envelope.native_reader_name.clone(), request.selection);
        self.send_response(envelope.success_response(Vec::new())).await;
    }

    async fn drop_local_session(&self, native_reader_name: &str) {
        if let Some(session) = self.inner.sessions.lock().await.remove(native_reader_name) {
            if let Some(task) = session.forwarder {
                task.abort();
            }
            debug!(
                reader = %native_reader_name,
                virtual_reader = %session.virtual_reader_name,
                "local session removed"
            );
        }
    }

    async fn send_response(&self, response: Envelope) {
        let target = response.target_node_id.clone();
        if let Err(err) = self.inner.sender.send(&target, response).await {
            warn!(error = %err, "failed to send response envelope");
        }
    }

    async fn respond_error(&self, request: &Envelope, error: &ReaderError) {
        debug!(method = %request.method, error = %error, "answering request with error");
        self.send_response(request.error_response(error.to_payload()))
            .await;
    }
}

// ── Local operation execution ─────────────────────────────────────────────────

/// Forwards each APDU in order, stopping at the first I/O failure; obtained
/// responses and the terminal failure travel back together.
fn run_transmit_set(reader: &dyn NativeReader, request: &TransmitSetRequest) -> TransmitSetResponse {
    let mut responses = Vec::with_capacity(request.apdus.len());
    let mut failure = None;

    if let Err(err) = reader.open_channel() {
        failure = Some(err.to_payload());
    } else {
        for apdu in &request.apdus {
            match reader.process_apdu(apdu) {
                Ok(response) => responses.push(response),
                Err(err) => {
                    warn!(reader = %reader.name(), apdu = %apdu, error = %err, "transmit failed");
                    failure = Some(err.to_payload());
                    break;
                }
            }
        }
    }

    if request.channel == ChannelControl::CloseAfter {
        if let Err(err) = reader.close_channel() {
            warn!(reader = %reader.name(), error = %err, "failed to close channel");
        }
    }

    TransmitSetResponse { responses, failure }
}

/// Runs the stored default selection against the freshly inserted card.
fn evaluate_default_selection(
    reader: &dyn NativeReader,
    selection: &DefaultSelectionRequest,
) -> Option<ReaderEventKind> {
    match run_selection(reader, selection) {
        Ok(responses) => {
            let matched = responses.last().map(ApduResponse::is_success).unwrap_or(false);
            if matched {
                Some(ReaderEventKind::CardMatched { responses })
            } else {
                match selection.notification_mode {
                    NotificationMode::Always => Some(ReaderEventKind::CardInserted),
                    NotificationMode::MatchedOnly => None,
                }
            }
        }
        Err(err) => Some(ReaderEventKind::IoError {
            message: err.to_string(),
        }),
    }
}

fn run_selection(
    reader: &dyn NativeReader,
    selection: &DefaultSelectionRequest,
) -> Result<Vec<ApduResponse>, ReaderError> {
    reader.open_channel()?;
    let mut responses = Vec::with_capacity(selection.apdus.len());
    for apdu in &selection.apdus {
        responses.push(reader.process_apdu(apdu)?);
    }
    if selection.channel == ChannelControl::CloseAfter {
        reader.close_channel()?;
    }
    Ok(responses)
}

/// Per-session forwarding task: wraps native events as `READER_EVENT`
/// envelopes and ships them to the master, fire-and-forget.
async fn forward_native_events(
    inner: Arc<SlaveInner>,
    reader: Arc<dyn NativeReader>,
    mut events: broadcast::Receiver<NativeReaderEvent>,
    session_id: String,
    virtual_reader_name: String,
    native_reader_name: String,
) {
    loop {
        let native_event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, reader = %native_reader_name, "native event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let kind = match native_event {
            NativeReaderEvent::CardInserted => {
                let selection = inner
                    .selections
                    .lock()
                    .await
                    .get(&native_reader_name)
                    .cloned();
                match selection {
                    None => Some(ReaderEventKind::CardInserted),
                    Some(selection) => evaluate_default_selection(reader.as_ref(), &selection),
                }
            }
            NativeReaderEvent::CardRemoved => Some(ReaderEventKind::CardRemoved),
            NativeReaderEvent::IoError { message } => Some(ReaderEventKind::IoError { message }),
        };
        let Some(kind) = kind else { continue };

        let event = ReaderEvent {
            reader_name: virtual_reader_name.clone(),
            kind,
        };
        let body = match encode_body(&ReaderEventBody { event }) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to encode reader event");
                continue;
            }
        };
        let envelope = Envelope::request(
            RemoteMethod::ReaderEvent,
            inner.node_id.clone(),
            inner.master_node_id.clone(),
            body,
        )
        .with_session(session_id.clone())
        .with_native_reader(native_reader_name.clone())
        .with_virtual_reader(virtual_reader_name.clone());

        if let Err(err) = inner.sender.send(&inner.master_node_id, envelope).await {
            warn!(error = %err, "failed to forward reader event");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
