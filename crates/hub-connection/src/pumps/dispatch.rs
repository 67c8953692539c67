//! Dispatch pump. Hands incoming messages to subscription callbacks.

use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::messaging::MessageCallback;
use crate::state::SessionShared;

/// A message received on a subscribed topic.
#[derive(Debug)]
pub(crate) struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Invokes matching callbacks for each message, one message at a time.
///
/// Messages are delivered in arrival order. A callback that blocks only
/// delays later deliveries on this session; acknowledgements keep flowing
/// on the event pump.
pub(crate) async fn dispatch_pump(
    mut incoming_rx: mpsc::UnboundedReceiver<IncomingMessage>,
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = incoming_rx.recv() => {
                let Some(msg) = msg else { break };
                let callbacks = shared.matching(&msg.topic);
                if callbacks.is_empty() {
                    trace!(topic = %msg.topic, "no subscriber for message");
                    continue;
                }
                for callback in callbacks {
                    run_callback(&callback, &msg.topic, &msg.payload);
                }
            }
        }
    }
}

/// Runs one callback. On a multi-threaded runtime the worker is handed
/// over first, so a blocking callback cannot starve other sessions.
fn run_callback(callback: &MessageCallback, topic: &str, payload: &[u8]) {
    match Handle::current().runtime_flavor() {
        RuntimeFlavor::MultiThread => tokio::task::block_in_place(|| callback(topic, payload)),
        _ => callback(topic, payload),
    }
}
