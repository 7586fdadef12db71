//! The virtual reader: the master-side proxy standing in for one remote
//! native reader.
//!
//! Upstream card-protocol code talks to it exactly as it would to a local
//! reader — transmit a set of commands, register a default selection,
//! subscribe to events — and every operation is marshalled to the slave that
//! owns the hardware.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use cardlink_core::protocol::bodies::{
    decode_body, encode_body, SetDefaultSelectionRequest, TransmitSetRequest, TransmitSetResponse,
};
use cardlink_core::{
    ApduRequest, ApduResponse, ChannelControl, DefaultSelectionRequest, Envelope, EnvelopeSender,
    NodeId, PendingRequests, ReaderError, ReaderEvent, RemoteMethod, TransmissionMode,
};

use crate::session::Session;

/// Outcome of a transmit set.
///
/// `responses` are in request order. When the slave hit an I/O fault midway,
/// `failure` carries the terminal error and `responses` holds everything
/// obtained before it — the call as a whole still returns `Ok`.
#[derive(Debug)]
pub struct TransmitSetResult {
    pub responses: Vec<ApduResponse>,
    pub failure: Option<ReaderError>,
}

/// Master-side proxy for one remote native reader. Exists only while its
/// session is active and is exclusively owned by the plugin registry.
pub struct VirtualReader {
    name: String,
    native_reader_name: String,
    session_id: String,
    slave_node_id: NodeId,
    master_node_id: NodeId,
    transmission_mode: TransmissionMode,
    sender: Arc<dyn EnvelopeSender>,
    pending: PendingRequests,
    request_timeout: Duration,
    events: broadcast::Sender<ReaderEvent>,
}

impl VirtualReader {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: &Session,
        transmission_mode: TransmissionMode,
        master_node_id: NodeId,
        sender: Arc<dyn EnvelopeSender>,
        pending: PendingRequests,
        request_timeout: Duration,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            name: session.virtual_reader_name.clone(),
            native_reader_name: session.native_reader_name.clone(),
            session_id: session.session_id.clone(),
            slave_node_id: session.slave_node_id.clone(),
            master_node_id,
            transmission_mode,
            sender,
            pending,
            request_timeout,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn native_reader_name(&self) -> &str {
        &self.native_reader_name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn slave_node_id(&self) -> &NodeId {
        &self.slave_node_id
    }

    pub fn transmission_mode(&self) -> TransmissionMode {
        self.transmission_mode
    }

    /// Subscribes to this reader's replicated events (card inserted, matched,
    /// removed, I/O error).
    pub fn subscribe(&self) -> broadcast::Receiver<ReaderEvent> {
        self.events.subscribe()
    }

    /// Re-broadcasts a replicated event to local observers. Delivery never
    /// blocks; with no observers the event is dropped.
    pub(crate) fn notify(&self, event: ReaderEvent) {
        let _ = self.events.send(event);
    }

    /// Sends an ordered set of commands to the remote native reader.
    pub async fn transmit_set(
        &self,
        apdus: Vec<ApduRequest>,
        channel: ChannelControl,
    ) -> Result<TransmitSetResult, ReaderError> {
        let body = encode_body(&TransmitSetRequest { apdus, channel })?;
        let envelope = self.request(RemoteMethod::TransmitSet, body);
        let response = self
            .pending
            .call(&*self.sender, envelope, self.request_timeout)
            .await?;
        if let Some(payload) = &response.error {
            return Err(ReaderError::from_payload(payload));
        }
        let body: TransmitSetResponse = decode_body(&response.body)?;
        Ok(TransmitSetResult {
            responses: body.responses,
            failure: body.failure.as_ref().map(ReaderError::from_payload),
        })
    }

    /// Registers a selection the slave runs automatically on the next card
    /// insertion.
    pub async fn set_default_selection(
        &self,
        selection: DefaultSelectionRequest,
    ) -> Result<(), ReaderError> {
        let body = encode_body(&SetDefaultSelectionRequest { selection })?;
        let envelope = self.request(RemoteMethod::SetDefaultSelection, body);
        let response = self
            .pending
            .call(&*self.sender, envelope, self.request_timeout)
            .await?;
        if let Some(payload) = &response.error {
            return Err(ReaderError::from_payload(payload));
        }
        Ok(())
    }

    fn request(&self, method: RemoteMethod, body: Vec<u8>) -> Envelope {
        Envelope::request(
            method,
            self.master_node_id.clone(),
            self.slave_node_id.clone(),
            body,
        )
        .with_session(&*self.session_id)
        .with_native_reader(&*self.native_reader_name)
        .with_virtual_reader(&*self.name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cardlink_core::{ErrorKind, ErrorPayload, TransportError};
    use tokio::sync::mpsc;

    struct CapturingSender {
        tx: mpsc::UnboundedSender<Envelope>,
    }

    #[async_trait]
    impl EnvelopeSender for CapturingSender {
        async fn send(&self, target: &NodeId, envelope: Envelope) -> Result<(), TransportError> {
            self.tx.send(envelope).map_err(|e| TransportError::SendFailed {
                target: target.clone(),
                reason: e.to_string(),
            })
        }
    }

    fn reader_under_test() -> (Arc<VirtualReader>, PendingRequests, mpsc::UnboundedReceiver<Envelope>)
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = PendingRequests::new();
        let session = Session {
            session_id: "master-1-0".to_string(),
            virtual_reader_name: "remote-slave-1-pcsc-0".to_string(),
            native_reader_name: "pcsc-0".to_string(),
            slave_node_id: NodeId::from("slave-1"),
        };
        let reader = Arc::new(VirtualReader::new(
            &session,
            TransmissionMode::Contactless,
            NodeId::from("master-1"),
            Arc::new(CapturingSender { tx }),
            pending.clone(),
            Duration::from_millis(500),
            8,
        ));
        (reader, pending, rx)
    }

    #[tokio::test]
    async fn test_transmit_set_round_trip_through_pending_table() {
        let (reader, pending, mut rx) = reader_under_test();

        let call = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move {
                reader
                    .transmit_set(
                        vec![ApduRequest::new(vec![0x00, 0xB2])],
                        ChannelControl::KeepOpen,
                    )
                    .await
            })
        };

        let request = rx.recv().await.expect("request envelope");
        assert_eq!(request.method, RemoteMethod::TransmitSet);
        assert_eq!(request.session_id, "master-1-0");
        assert_eq!(request.native_reader_name, "pcsc-0");
        assert_eq!(request.target_node_id, NodeId::from("slave-1"));

        let body = encode_body(&TransmitSetResponse {
            responses: vec![ApduResponse::new(vec![0x90, 0x00])],
            failure: None,
        })
        .unwrap();
        assert!(pending.try_complete(request.success_response(body)).is_none());

        let result = call.await.unwrap().expect("transmit result");
        assert_eq!(result.responses.len(), 1);
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn test_remote_error_payload_becomes_typed_error() {
        let (reader, pending, mut rx) = reader_under_test();

        let call = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move {
                reader
                    .transmit_set(vec![ApduRequest::new(vec![0x00])], ChannelControl::KeepOpen)
                    .await
            })
        };

        let request = rx.recv().await.expect("request envelope");
        let response = request.error_response(ErrorPayload {
            kind: ErrorKind::ReaderNotFound,
            message: "native reader not found: pcsc-0".to_string(),
        });
        pending.try_complete(response);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ReaderError::ReaderNotFound(_)));
    }

    #[tokio::test]
    async fn test_unanswered_transmit_times_out() {
        let (reader, pending, _rx) = reader_under_test();
        let err = reader
            .transmit_set(vec![ApduRequest::new(vec![0x00])], ChannelControl::KeepOpen)
            .await
            .unwrap_err();
        assert!(matches!(err, ReaderError::TransportTimeout(_)));
        assert!(pending.is_empty(), "timed-out entry must be released");
    }

    #[tokio::test]
    async fn test_set_default_selection_acknowledged() {
        let (reader, pending, mut rx) = reader_under_test();

        let call = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move {
                reader
                    .set_default_selection(DefaultSelectionRequest {
                        apdus: vec![ApduRequest::new(vec![0x00, 0xA4])],
                        channel: ChannelControl::KeepOpen,
                        notification_mode: cardlink_core::NotificationMode::MatchedOnly,
                    })
                    .await
            })
        };

        let request = rx.recv().await.expect("request envelope");
        assert_eq!(request.method, RemoteMethod::SetDefaultSelection);
        pending.try_complete(request.success_response(Vec::new()));

        call.await.unwrap().expect("selection accepted");
    }
}
