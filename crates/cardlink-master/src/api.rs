//! The master endpoint.
//!
//! [`MasterApi`] serves `CONNECT_READER`/`DISCONNECT_READER` requests coming
//! from slaves — driving the session state machine and the virtual-reader
//! registry — and applies replicated `READER_EVENT`/`PLUGIN_EVENT`
//! notifications. Responses to its own outgoing requests (issued by
//! [`VirtualReader`]) are routed back through the shared pending-request
//! table.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use cardlink_core::protocol::bodies::{
    decode_body, encode_body, ConnectReaderRequest, ConnectReaderResponse, PluginEventBody,
    ReaderEventBody,
};
use cardlink_core::{
    Envelope, EnvelopeSender, NodeConfig, NodeId, PendingRequests, PluginEventKind, ReaderError,
    RemoteMethod,
};

use crate::plugin::RemotePlugin;
use crate::session::SessionManager;
use crate::virtual_reader::VirtualReader;

struct MasterInner {
    node_id: NodeId,
    sender: Arc<dyn EnvelopeSender>,
    pending: PendingRequests,
    plugin: RemotePlugin,
    sessions: SessionManager,
    request_timeout: Duration,
    event_capacity: usize,
}

/// The master endpoint. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct MasterApi {
    inner: Arc<MasterInner>,
}

impl MasterApi {
    pub fn new(config: &NodeConfig, plugin_name: &str, sender: Arc<dyn EnvelopeSender>) -> Self {
        let node_id = NodeId::from(config.node_id.clone());
        Self {
            inner: Arc::new(MasterInner {
                sender,
                pending: PendingRequests::new(),
                plugin: RemotePlugin::new(plugin_name, config.event_capacity),
                sessions: SessionManager::new(node_id.clone()),
                request_timeout: config.request_timeout(),
                event_capacity: config.event_capacity,
                node_id,
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    /// The registry upstream code uses to discover and observe remote
    /// readers.
    pub fn plugin(&self) -> &RemotePlugin {
        &self.inner.plugin
    }

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
            RemoteMethod::ConnectReader => self.handle_connect_reader(envelope).await,
            RemoteMethod::DisconnectReader => self.handle_disconnect_reader(envelope).await,
            RemoteMethod::ReaderEvent => self.apply_reader_event(envelope).await,
            RemoteMethod::PluginEvent => self.apply_plugin_event(envelope).await,
            RemoteMethod::TransmitSet | RemoteMethod::SetDefaultSelection => {
                // Only the master ever sends these, so an unmatched one here
                // is a response whose caller already timed out or went away.
                debug!(
                    method = %envelope.method,
                    correlation = %envelope.correlation_id,
                    "discarding late response"
                );
            }
        }
    }

    /// Forces every session held with `slave_node_id` back to unbound after
    /// an unrecoverable transport failure, so observers see a terminal
    /// `ReaderDisconnected` rather than a hang.
    pub async fn connection_lost(&self, slave_node_id: &NodeId) {
        let dropped = self.inner.sessions.unbind_all_for(slave_node_id).await;
        for session in dropped {
            warn!(
                session = %session.session_id,
                reader = %session.virtual_reader_name,
                slave = %slave_node_id,
                "transport lost, session force-closed"
            );
            self.inner
                .plugin
                .remove_reader(&session.virtual_reader_name)
                .await;
        }
    }

    // ── Receive roles ─────────────────────────────────────────────────────────

    async fn handle_connect_reader(&self, envelope: Envelope) {
        let request: ConnectReaderRequest = match decode_body(&envelope.body) {
            Ok(request) => request,
            Err(err) => return self.respond_error(&envelope, &ReaderError::Protocol(err)).await,
        };

        let slave_node_id = envelope.requester_node_id.clone();
        let session = match self
            .inner
            .sessions
            .bind(&envelope.native_reader_name, &slave_node_id)
            .await
        {
            Ok(session) => session,
            Err(err) => return self.respond_error(&envelope, &err).await,
        };

        let reader = Arc::new(VirtualReader::new(
            &session,
            request.transmission_mode,
            self.inner.node_id.clone(),
            Arc::clone(&self.inner.sender),
            self.inner.pending.clone(),
            self.inner.request_timeout,
            self.inner.event_capacity,
        ));
        self.inner.plugin.insert_reader(Arc::clone(&reader)).await;
        info!(
            session = %session.session_id,
            reader = %session.virtual_reader_name,
            slave = %slave_node_id,
            "reader connected"
        );

        let body = ConnectReaderResponse {
            session_id: session.session_id.clone(),
        };
        match encode_body(&body) {
            Ok(bytes) => {
                let response = envelope
                    .success_response(bytes)
                    .with_session(&*session.session_id)
                    .with_virtual_reader(&*session.virtual_reader_name);
                self.send(response).await;
            }
            Err(err) => {
                // Roll the binding back so master and slave agree the
                // connect failed.
                let _ = self
                    .inner
                    .sessions
                    .unbind(&envelope.native_reader_name, &slave_node_id)
                    .await;
                self.inner
                    .plugin
                    .remove_reader(&session.virtual_reader_name)
                    .await;
                self.respond_error(&envelope, &ReaderError::Protocol(err)).await;
            }
        }
    }

    async fn handle_disconnect_reader(&self, envelope: Envelope) {
        let slave_node_id = envelope.requester_node_id.clone();
        let session = match self
            .inner
            .sessions
            .unbind(&envelope.native_reader_name, &slave_node_id)
            .await
        {
            Ok(session) => session,
            Err(err) => return self.respond_error(&envelope, &err).await,
        };

        self.inner
            .plugin
            .remove_reader(&session.virtual_reader_name)
            .await;
        info!(
            session = %session.session_id,
            reader = %session.virtual_reader_name,
            slave = %slave_node_id,
            "reader disconnected"
        );

        self.send(
            envelope
                .success_response(Vec::new())
                .with_session(&*session.session_id)
                .with_virtual_reader(&*session.virtual_reader_name),
        )
        .await;
    }

    // ── Event application ─────────────────────────────────────────────────────

    async fn apply_reader_event(&self, envelope: Envelope) {
        let body: ReaderEventBody = match decode_body(&envelope.body) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "undecodable reader event dropped");
                return;
            }
        };
        match self.inner.plugin.reader(&envelope.virtual_reader_name).await {
            Some(reader) => reader.notify(body.event),
            None => {
                // Benign race with a concurrent disconnect.
                debug!(
                    reader = %envelope.virtual_reader_name,
                    "event for vanished virtual reader dropped"
                );
            }
        }
    }

    async fn apply_plugin_event(&self, envelope: Envelope) {
        let body: PluginEventBody = match decode_body(&envelope.body) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "undecodable plugin event dropped");
                return;
            }
        };
        let slave_node_id = envelope.requester_node_id.clone();

        match body.event.kind {
            PluginEventKind::ReaderDisconnected => {
                for native_name in &body.event.reader_names {
                    match self.inner.sessions.unbind(native_name, &slave_node_id).await {
                        Ok(session) => {
                            warn!(
                                reader = %native_name,
                                slave = %slave_node_id,
                                "native reader withdrawn by slave, session force-closed"
                            );
                            self.inner
                                .plugin
                                .remove_reader(&session.virtual_reader_name)
                                .await;
                        }
                        Err(_) => {
                            debug!(
                                reader = %native_name,
                                slave = %slave_node_id,
                                "plugin event for unbound reader dropped"
                            );
                        }
                    }
                }
            }
            PluginEventKind::ReaderConnected => {
                // A binding is only ever created by an explicit connect.
                debug!(
                    readers = ?body.event.reader_names,
                    slave = %slave_node_id,
                    "native reader attach reported, no binding created"
                );
            }
        }
    }

    async fn send(&self, response: Envelope) {
        let target = response.target_node_id.clone();
        if let Err(err) = self.inner.sender.send(&target, response).await {
            warn!(error = %err, "failed to send response envelope");
        }
    }

    async fn respond_error(&self, request: &Envelope, error: &ReaderError) {
        debug!(method = %request.method, error = %error, "answering request with error");
        self.send(request.error_response(error.to_payload())).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
