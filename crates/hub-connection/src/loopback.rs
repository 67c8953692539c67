//! In-memory broker for exercising [`MessagingSession`](crate::MessagingSession)
//! without a network.
//!
//! [`pair`] returns the two halves of one fake connection: a
//! [`LoopbackBroker`] that accepts requests and a [`LoopbackEvents`] that
//! replays what a real event loop would report for them.

use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};

use rumqttc::{
    ClientError, ConnectionError, Disconnect, Event, Outgoing, Packet, PubAck, Publish, QoS,
    Request, SubAck, Subscribe, SubscribeReasonCode,
};
use tokio::sync::mpsc;

use crate::messaging::MqttRequests;
use crate::pumps::event::EventSource;
use crate::topic;

type EventResult = Result<Event, ConnectionError>;

/// A message the broker accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub payload: Vec<u8>,
}

struct BrokerState {
    next_pkid: u16,
    connected: bool,
    disconnected: bool,
    ack_publishes: bool,
    reject_subscriptions: bool,
    max_qos: QoS,
    subscriptions: Vec<String>,
    published: Vec<PublishedMessage>,
}

impl BrokerState {
    fn next_pkid(&mut self) -> u16 {
        let pkid = self.next_pkid;
        self.next_pkid = self.next_pkid.checked_add(1).unwrap_or(1);
        pkid
    }
}

/// Request half of a loopback connection. Clones share one broker.
#[derive(Clone)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
    events: mpsc::UnboundedSender<EventResult>,
}

/// Event half of a loopback connection.
pub struct LoopbackEvents {
    rx: mpsc::UnboundedReceiver<EventResult>,
}

/// Creates a connected broker and its event stream.
pub fn pair() -> (LoopbackBroker, LoopbackEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = BrokerState {
        next_pkid: 1,
        connected: true,
        disconnected: false,
        ack_publishes: true,
        reject_subscriptions: false,
        max_qos: QoS::AtLeastOnce,
        subscriptions: Vec::new(),
        published: Vec::new(),
    };
    (
        LoopbackBroker {
            state: Arc::new(Mutex::new(state)),
            events: tx,
        },
        LoopbackEvents { rx },
    )
}

impl LoopbackBroker {
    /// Delivers a message from the hub as if another client published it.
    pub fn inject(&self, topic_name: &str, payload: &[u8]) {
        let publish = Publish::new(topic_name, QoS::AtMostOnce, payload.to_vec());
        let _ = self.events.send(Ok(Event::Incoming(Packet::Publish(publish))));
    }

    /// Simulates the network going away.
    pub fn drop_connection(&self) {
        self.state.lock().unwrap().connected = false;
        let _ = self.events.send(Err(ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "loopback connection dropped",
        ))));
    }

    /// Controls whether PUBACKs are sent. On by default.
    pub fn set_ack_publishes(&self, ack: bool) {
        self.state.lock().unwrap().ack_publishes = ack;
    }

    /// Makes every following subscription fail.
    pub fn reject_subscriptions(&self, reject: bool) {
        self.state.lock().unwrap().reject_subscriptions = reject;
    }

    /// Caps the guarantee granted to subscriptions.
    pub fn grant_at_most(&self, qos: QoS) {
        self.state.lock().unwrap().max_qos = qos;
    }

    /// Messages accepted so far, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Returns `true` once a disconnect was requested.
    pub fn disconnected(&self) -> bool {
        self.state.lock().unwrap().disconnected
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(Ok(event));
    }
}

impl MqttRequests for LoopbackBroker {
    async fn publish(&self, topic_name: String, qos: QoS, payload: Vec<u8>) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ClientError::Request(Request::Publish(Publish::new(
                topic_name, qos, payload,
            ))));
        }

        let pkid = if qos == QoS::AtMostOnce { 0 } else { state.next_pkid() };
        self.emit(Event::Outgoing(Outgoing::Publish(pkid)));
        if pkid != 0 && state.ack_publishes {
            self.emit(Event::Incoming(Packet::PubAck(PubAck::new(pkid))));
        }

        if state
            .subscriptions
            .iter()
            .any(|f| topic::matches(f, &topic_name))
        {
            let echo = Publish::new(topic_name.clone(), QoS::AtMostOnce, payload.clone());
            self.emit(Event::Incoming(Packet::Publish(echo)));
        }

        state.published.push(PublishedMessage {
            topic: topic_name,
            qos,
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: String, qos: QoS) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ClientError::Request(Request::Subscribe(Subscribe::new(
                filter, qos,
            ))));
        }

        let pkid = state.next_pkid();
        self.emit(Event::Outgoing(Outgoing::Subscribe(pkid)));
        let code = if state.reject_subscriptions {
            SubscribeReasonCode::Failure
        } else {
            let granted = if (qos as u8) > (state.max_qos as u8) {
                state.max_qos
            } else {
                qos
            };
            state.subscriptions.push(filter);
            SubscribeReasonCode::Success(granted)
        };
        self.emit(Event::Incoming(Packet::SubAck(SubAck::new(pkid, vec![code]))));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ClientError::Request(Request::Disconnect(Disconnect)));
        }
        state.connected = false;
        state.disconnected = true;
        self.emit(Event::Outgoing(Outgoing::Disconnect));
        Ok(())
    }
}

impl EventSource for LoopbackEvents {
    fn poll(&mut self) -> impl Future<Output = EventResult> + Send {
        async move {
            match self.rx.recv().await {
                Some(event) => event,
                // Every broker handle is gone; nothing can reach this
                // connection any more.
                None => Err(ConnectionError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "loopback broker dropped",
                ))),
            }
        }
    }
}
