//! MQTT event pump. Drives the network event loop.

use std::future::Future;
use std::sync::Arc;

use rumqttc::{ConnectionError, Event, EventLoop, Outgoing, Packet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::pumps::dispatch::IncomingMessage;
use crate::state::SessionShared;

/// Source of MQTT events for one connection.
pub trait EventSource: Send + 'static {
    /// Waits for the next event. An error ends the session.
    fn poll(&mut self) -> impl Future<Output = Result<Event, ConnectionError>> + Send;
}

impl EventSource for EventLoop {
    fn poll(&mut self) -> impl Future<Output = Result<Event, ConnectionError>> + Send {
        EventLoop::poll(self)
    }
}

/// Polls `events` until the connection ends or `cancel` fires.
///
/// Acknowledgements are matched here so that they are never held up by a
/// slow subscription callback; incoming publishes are handed to dispatch.
pub(crate) async fn event_pump<E: EventSource>(
    mut events: E,
    shared: Arc<SessionShared>,
    incoming_tx: mpsc::UnboundedSender<IncomingMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            event = events.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        trace!(topic = %publish.topic, bytes = publish.payload.len(), "received publish");
                        let msg = IncomingMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        };
                        if incoming_tx.send(msg).is_err() {
                            debug!("dispatch stopped, dropping publish");
                        }
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        shared.acks().complete_publish(ack.pkid);
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        shared.acks().complete_subscribe(ack.pkid, ack.return_codes);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        debug!("hub sent disconnect");
                        break;
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        shared.acks().assign_publish(pkid);
                    }
                    Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                        shared.acks().assign_subscribe(pkid);
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("hub connection lost: {e}");
                        break;
                    }
                }
            }
        }
    }

    shared.mark_closed();
}
