//! Publish/subscribe session over one established hub connection.
//!
//! A session owns two background tasks: the event pump drives the MQTT
//! event loop and matches acknowledgements, the dispatch pump runs
//! subscription callbacks. Requests go out through [`MqttRequests`].

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{AsyncClient, ClientError, QoS, SubscribeReasonCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use edgelink_protocol::DeliveryGuarantee;
use edgelink_protocol::constants::ACK_TIMEOUT;

use crate::pumps::event::EventSource;
use crate::state::SessionShared;
use crate::topic;
use crate::types::{PublishResult, SubscribeResult, guarantee_for, qos_for};

/// How long [`MessagingSession::close`] waits for the disconnect to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Errors from messaging operations.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("session is closed")]
    Closed,

    #[error("no acknowledgement from hub")]
    AckTimeout,

    #[error("subscription to {0} rejected by hub")]
    SubscriptionRejected(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("request failed: {0}")]
    Request(#[from] ClientError),
}

/// Callback invoked with the topic and payload of each received message.
///
/// Callbacks run one at a time on the session's dispatch task. On a
/// multi-threaded runtime a blocking callback gives up its worker thread
/// first; on a current-thread runtime it stalls the whole runtime.
pub type MessageCallback = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Outbound half of an MQTT connection.
pub trait MqttRequests: Send + Sync + 'static {
    fn publish(
        &self,
        topic: String,
        qos: QoS,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn subscribe(
        &self,
        filter: String,
        qos: QoS,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), ClientError>> + Send;
}

impl MqttRequests for AsyncClient {
    fn publish(
        &self,
        topic: String,
        qos: QoS,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send {
        AsyncClient::publish(self, topic, qos, false, payload)
    }

    fn subscribe(
        &self,
        filter: String,
        qos: QoS,
    ) -> impl Future<Output = Result<(), ClientError>> + Send {
        AsyncClient::subscribe(self, filter, qos)
    }

    fn disconnect(&self) -> impl Future<Output = Result<(), ClientError>> + Send {
        AsyncClient::disconnect(self)
    }
}

/// A live messaging session with one hub.
///
/// Dropping the session stops its background tasks without a clean
/// disconnect; call [`close`](Self::close) to leave gracefully.
pub struct MessagingSession<R: MqttRequests = AsyncClient> {
    requests: R,
    shared: Arc<SessionShared>,
    /// Serializes request submission so waiter order matches packet order.
    send_lock: tokio::sync::Mutex<()>,
    ack_timeout: Duration,
    event_handle: Mutex<Option<JoinHandle<()>>>,
    dispatch_handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl<R: MqttRequests> MessagingSession<R> {
    /// Starts the background tasks for a connected client.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<E: EventSource>(requests: R, events: E) -> Self {
        let shared = Arc::new(SessionShared::new());
        let cancel = CancellationToken::new();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let event_handle = {
            let shared = shared.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::event::event_pump(
                events,
                shared,
                incoming_tx,
                cancel,
            ))
        };

        let dispatch_handle = {
            let shared = shared.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::dispatch::dispatch_pump(
                incoming_rx,
                shared,
                cancel,
            ))
        };

        Self {
            requests,
            shared,
            send_lock: tokio::sync::Mutex::new(()),
            ack_timeout: ACK_TIMEOUT,
            event_handle: Mutex::new(Some(event_handle)),
            dispatch_handle,
            cancel,
        }
    }

    /// Overrides how long to wait for PUBACK and SUBACK.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Returns `true` while the underlying connection is up.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Publishes `payload` on `topic`.
    ///
    /// With [`DeliveryGuarantee::AtLeastOnce`] this waits for the hub's
    /// acknowledgement; with `AtMostOnce` it returns once the message is
    /// handed to the connection.
    pub async fn publish(
        &self,
        topic_name: &str,
        payload: &[u8],
        guarantee: DeliveryGuarantee,
    ) -> Result<PublishResult, MessagingError> {
        if !self.is_open() {
            return Err(MessagingError::Closed);
        }
        if !topic::is_valid_topic(topic_name) {
            return Err(MessagingError::InvalidTopic(topic_name.to_string()));
        }
        let qos = qos_for(guarantee);

        if !guarantee.requires_ack() {
            let _guard = self.send_lock.lock().await;
            self.requests
                .publish(topic_name.to_string(), qos, payload.to_vec())
                .await
                .map_err(|e| self.request_error(e))?;
            return Ok(PublishResult {
                guarantee,
                acknowledged: false,
                packet_id: None,
            });
        }

        // The waiter is withdrawn when `_pending` drops, including when the
        // caller abandons this future mid-send or mid-wait.
        let (_pending, ack_rx) = {
            let _guard = self.send_lock.lock().await;
            let (mut pending, rx) = self.shared.queue_publish();
            self.requests
                .publish(topic_name.to_string(), qos, payload.to_vec())
                .await
                .map_err(|e| self.request_error(e))?;
            pending.mark_sent();
            (pending, rx)
        };

        match tokio::time::timeout(self.ack_timeout, ack_rx).await {
            Ok(Ok(pkid)) => {
                debug!(topic = topic_name, pkid, "publish acknowledged");
                Ok(PublishResult {
                    guarantee,
                    acknowledged: true,
                    packet_id: Some(pkid),
                })
            }
            Ok(Err(_)) => Err(MessagingError::Closed),
            Err(_) => {
                warn!(topic = topic_name, "no PUBACK within {:?}", self.ack_timeout);
                Err(MessagingError::AckTimeout)
            }
        }
    }

    /// Subscribes to `filter` and waits for the hub to confirm.
    ///
    /// The callback is registered before the request goes out, so messages
    /// that arrive right after the SUBACK are not missed. It is removed
    /// again if the subscription fails or the call is abandoned.
    pub async fn subscribe(
        &self,
        filter: &str,
        guarantee: DeliveryGuarantee,
        callback: MessageCallback,
    ) -> Result<SubscribeResult, MessagingError> {
        if !self.is_open() {
            return Err(MessagingError::Closed);
        }
        if !topic::is_valid_filter(filter) {
            return Err(MessagingError::InvalidTopic(filter.to_string()));
        }

        let registration = self.shared.register_guarded(filter, Arc::new(callback));

        let (_pending, ack_rx) = {
            let _guard = self.send_lock.lock().await;
            let (mut pending, rx) = self.shared.queue_subscribe();
            self.requests
                .subscribe(filter.to_string(), qos_for(guarantee))
                .await
                .map_err(|e| self.request_error(e))?;
            pending.mark_sent();
            (pending, rx)
        };

        let codes = match tokio::time::timeout(self.ack_timeout, ack_rx).await {
            Ok(Ok(codes)) => codes,
            Ok(Err(_)) => return Err(MessagingError::Closed),
            Err(_) => {
                warn!(filter, "no SUBACK within {:?}", self.ack_timeout);
                return Err(MessagingError::AckTimeout);
            }
        };

        match codes.first() {
            Some(SubscribeReasonCode::Success(qos)) => {
                registration.keep();
                let granted = guarantee_for(*qos);
                info!(filter, %granted, "subscribed");
                Ok(SubscribeResult {
                    topic: filter.to_string(),
                    granted,
                })
            }
            _ => Err(MessagingError::SubscriptionRejected(filter.to_string())),
        }
    }

    /// Disconnects from the hub and stops the background tasks.
    pub async fn close(&self) {
        if self.is_open() {
            if let Err(e) = self.requests.disconnect().await {
                debug!("disconnect request failed: {e}");
            }
            let handle = self.event_handle.lock().unwrap().take();
            if let Some(handle) = handle {
                if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
                    debug!("event loop did not stop within {CLOSE_GRACE:?}");
                }
            }
        }
        self.cancel.cancel();
        self.shared.mark_closed();
    }

    /// A request that failed on a connection that has since gone away is
    /// reported as closed.
    fn request_error(&self, e: ClientError) -> MessagingError {
        if self.is_open() {
            MessagingError::Request(e)
        } else {
            MessagingError::Closed
        }
    }
}

impl<R: MqttRequests> Drop for MessagingSession<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.event_handle.lock().unwrap().take() {
            handle.abort();
        }
        self.dispatch_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::loopback::{self, LoopbackBroker};

    /// Never finishes the first publish or subscribe it is handed, like a
    /// request queue that stays full. Later requests go through.
    struct StallFirst {
        broker: LoopbackBroker,
        publish_stalled: AtomicBool,
        subscribe_stalled: AtomicBool,
    }

    impl StallFirst {
        fn new(broker: LoopbackBroker) -> Self {
            Self {
                broker,
                publish_stalled: AtomicBool::new(false),
                subscribe_stalled: AtomicBool::new(false),
            }
        }
    }

    impl MqttRequests for StallFirst {
        async fn publish(&self, topic: String, qos: QoS, payload: Vec<u8>) -> Result<(), ClientError> {
            if !self.publish_stalled.swap(true, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.broker.publish(topic, qos, payload).await
        }

        async fn subscribe(&self, filter: String, qos: QoS) -> Result<(), ClientError> {
            if !self.subscribe_stalled.swap(true, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.broker.subscribe(filter, qos).await
        }

        async fn disconnect(&self) -> Result<(), ClientError> {
            self.broker.disconnect().await
        }
    }

    fn session() -> (LoopbackBroker, MessagingSession<LoopbackBroker>) {
        let (broker, events) = loopback::pair();
        let session = MessagingSession::spawn(broker.clone(), events);
        (broker, session)
    }

    #[test]
    fn messaging_error_display() {
        assert_eq!(MessagingError::Closed.to_string(), "session is closed");
        assert_eq!(
            MessagingError::SubscriptionRejected("a/b".into()).to_string(),
            "subscription to a/b rejected by hub"
        );
    }

    #[tokio::test]
    async fn at_least_once_waits_for_ack() {
        let (broker, session) = session();
        let result = session
            .publish("edgelink/dev/hello", b"{}", DeliveryGuarantee::AtLeastOnce)
            .await
            .unwrap();
        assert!(result.acknowledged);
        assert_eq!(result.packet_id, Some(1));
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn at_most_once_returns_without_ack() {
        let (broker, session) = session();
        broker.set_ack_publishes(false);
        let result = session
            .publish("edgelink/dev/hello", b"{}", DeliveryGuarantee::AtMostOnce)
            .await
            .unwrap();
        assert!(!result.acknowledged);
        assert_eq!(result.packet_id, None);
        assert_eq!(broker.published()[0].qos, QoS::AtMostOnce);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_puback_times_out() {
        let (broker, session) = session();
        broker.set_ack_publishes(false);
        let err = session
            .publish("t", b"x", DeliveryGuarantee::AtLeastOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::AckTimeout));
        assert!(session.is_open(), "a timeout does not close the session");
        assert_eq!(session.shared.acks().pending(), 0);
    }

    #[tokio::test]
    async fn abandoned_publish_does_not_shift_acks() {
        let (broker, events) = loopback::pair();
        let session = MessagingSession::spawn(StallFirst::new(broker.clone()), events)
            .with_ack_timeout(Duration::from_millis(300));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            session.publish("t/1", b"x", DeliveryGuarantee::AtLeastOnce),
        )
        .await;
        assert!(abandoned.is_err(), "first publish never leaves the queue");

        let result = session
            .publish("t/2", b"y", DeliveryGuarantee::AtLeastOnce)
            .await
            .unwrap();
        assert!(result.acknowledged);
        assert_eq!(result.packet_id, Some(1));
        assert_eq!(broker.published().len(), 1);

        let result = session
            .publish("t/3", b"z", DeliveryGuarantee::AtLeastOnce)
            .await
            .unwrap();
        assert_eq!(result.packet_id, Some(2));
        assert_eq!(session.shared.acks().pending(), 0);
    }

    #[tokio::test]
    async fn abandoned_subscribe_leaves_no_trace() {
        let (broker, events) = loopback::pair();
        let session = MessagingSession::spawn(StallFirst::new(broker), events)
            .with_ack_timeout(Duration::from_millis(300));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            session.subscribe("a/#", DeliveryGuarantee::AtLeastOnce, Box::new(|_, _| {})),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(session.shared.subscription_count(), 0);

        let result = session
            .subscribe("b/#", DeliveryGuarantee::AtLeastOnce, Box::new(|_, _| {}))
            .await
            .unwrap();
        assert_eq!(result.topic, "b/#");
        assert_eq!(session.shared.subscription_count(), 1);
        assert_eq!(session.shared.acks().pending(), 0);
    }

    #[tokio::test]
    async fn acks_are_matched_to_their_publish() {
        let (_broker, session) = session();
        let session = Arc::new(session);
        let mut handles = Vec::new();
        for i in 0..5 {
            let s = session.clone();
            handles.push(tokio::spawn(async move {
                s.publish(&format!("t/{i}"), b"x", DeliveryGuarantee::AtLeastOnce)
                    .await
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap().packet_id.unwrap());
        }
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn messages_delivered_in_publish_order() {
        let (broker, session) = session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session
            .subscribe(
                "edgelink/dev/#",
                DeliveryGuarantee::AtLeastOnce,
                Box::new(move |_, payload| {
                    sink.lock().unwrap().push(payload.to_vec());
                }),
            )
            .await
            .unwrap();

        for n in 0u8..10 {
            broker.inject("edgelink/dev/data", &[n]);
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < 10 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let seen = seen.lock().unwrap();
        let expected: Vec<Vec<u8>> = (0u8..10).map(|n| vec![n]).collect();
        assert_eq!(*seen, expected);
    }

    #[tokio::test]
    async fn loopback_publish_reaches_own_subscription() {
        let (_broker, session) = session();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        session
            .subscribe(
                "edgelink/dev/hello/response",
                DeliveryGuarantee::AtLeastOnce,
                Box::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        session
            .publish(
                "edgelink/dev/hello/response",
                b"ok",
                DeliveryGuarantee::AtLeastOnce,
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn rejected_subscription_unregisters_callback() {
        let (broker, session) = session();
        broker.reject_subscriptions(true);
        let err = session
            .subscribe("private/#", DeliveryGuarantee::AtLeastOnce, Box::new(|_, _| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::SubscriptionRejected(ref f) if f == "private/#"));
        assert_eq!(session.shared.subscription_count(), 0);
    }

    #[tokio::test]
    async fn granted_guarantee_may_be_lower() {
        let (broker, session) = session();
        broker.grant_at_most(QoS::AtMostOnce);
        let result = session
            .subscribe("a/b", DeliveryGuarantee::AtLeastOnce, Box::new(|_, _| {}))
            .await
            .unwrap();
        assert_eq!(result.granted, DeliveryGuarantee::AtMostOnce);
    }

    #[tokio::test]
    async fn invalid_topics_rejected_locally() {
        let (broker, session) = session();
        let err = session
            .publish("a/+", b"x", DeliveryGuarantee::AtMostOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::InvalidTopic(_)));
        let err = session
            .subscribe("a/#/b", DeliveryGuarantee::AtMostOnce, Box::new(|_, _| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::InvalidTopic(_)));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn operations_fail_after_connection_lost() {
        let (broker, session) = session();
        broker.drop_connection();

        tokio::time::timeout(Duration::from_secs(2), async {
            while session.is_open() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let err = session
            .publish("t", b"x", DeliveryGuarantee::AtLeastOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Closed));
        let err = session
            .subscribe("t", DeliveryGuarantee::AtMostOnce, Box::new(|_, _| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Closed));
    }

    #[tokio::test]
    async fn close_sends_disconnect() {
        let (broker, session) = session();
        session.close().await;
        assert!(!session.is_open());
        assert!(broker.disconnected());
        let err = session
            .publish("t", b"x", DeliveryGuarantee::AtMostOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Closed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_callback_does_not_block_acks() {
        let (broker, session) = session();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        session
            .subscribe(
                "slow/topic",
                DeliveryGuarantee::AtMostOnce,
                Box::new(move |_, _| {
                    let _ = release_rx
                        .lock()
                        .unwrap()
                        .recv_timeout(Duration::from_secs(5));
                }),
            )
            .await
            .unwrap();

        broker.inject("slow/topic", b"block");

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            session.publish("other", b"x", DeliveryGuarantee::AtLeastOnce),
        )
        .await
        .expect("ack must not wait for the callback")
        .unwrap();
        assert!(result.acknowledged);
        release_tx.send(()).unwrap();
    }
}
