//! In-process loopback transport.
//!
//! Each [`ChannelSender`] is one directed half of a link: envelopes sent
//! through it are queued for the peer endpoint, whose receiver is drained by
//! a pump task into `on_envelope`. Delivery is FIFO per link, which is all
//! the transport contract promises.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cardlink_core::{Envelope, EnvelopeSender, NodeId, TransportError};

/// Outbound half of an in-process link.
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl EnvelopeSender for ChannelSender {
    async fn send(&self, target: &NodeId, envelope: Envelope) -> Result<(), TransportError> {
        self.tx.send(envelope).map_err(|_| TransportError::SendFailed {
            target: target.clone(),
            reason: "peer endpoint is gone".to_string(),
        })
    }
}

/// Creates one directed link: the sender goes to the node that transmits,
/// the receiver is pumped into the node that listens.
pub fn channel_link() -> (ChannelSender, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSender { tx }, rx)
}

/// Drains a link receiver into an endpoint's `on_envelope`, one envelope at
/// a time so per-link FIFO ordering is preserved.
pub fn spawn_pump<H, Fut>(mut rx: mpsc::UnboundedReceiver<Envelope>, handler: H) -> JoinHandle<()>
where
    H: Fn(Envelope) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            handler(envelope).await;
        }
    })
}
