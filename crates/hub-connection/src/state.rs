//! State shared between a messaging session and its pumps.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rumqttc::SubscribeReasonCode;
use tokio::sync::oneshot;

use crate::messaging::MessageCallback;
use crate::topic;

/// Waiters for one kind of acknowledgement.
///
/// Requests reach the event loop in the order they were queued, and the
/// event loop reports each outgoing packet id in that same order. Waiters
/// therefore queue up unassigned and are bound to a packet id when the
/// matching outgoing event is seen. Each waiter carries a token so it can
/// be withdrawn by identity.
struct Waiters<T> {
    /// A `None` sender holds the slot of a request whose caller gave up
    /// after it was sent; its packet id must still be consumed.
    queued: VecDeque<(u64, Option<oneshot::Sender<T>>)>,
    bound: HashMap<u16, (u64, oneshot::Sender<T>)>,
}

impl<T> Default for Waiters<T> {
    fn default() -> Self {
        Self {
            queued: VecDeque::new(),
            bound: HashMap::new(),
        }
    }
}

impl<T> Waiters<T> {
    fn queue(&mut self, token: u64) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.queued.push_back((token, Some(tx)));
        rx
    }

    fn assign(&mut self, pkid: u16) {
        if let Some((token, Some(tx))) = self.queued.pop_front() {
            self.bound.insert(pkid, (token, tx));
        }
    }

    fn complete(&mut self, pkid: u16, value: T) {
        if let Some((_, tx)) = self.bound.remove(&pkid) {
            let _ = tx.send(value);
        }
    }

    /// Forgets the waiter for `token`. An unsent request gives up its queue
    /// slot; a sent one keeps it empty until its outgoing event arrives.
    fn release(&mut self, token: u64, sent: bool) {
        if let Some(pos) = self.queued.iter().position(|(t, _)| *t == token) {
            if sent {
                self.queued[pos].1 = None;
            } else {
                self.queued.remove(pos);
            }
            return;
        }
        self.bound.retain(|_, (t, _)| *t != token);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queued.len() + self.bound.len()
    }

    fn clear(&mut self) {
        self.queued.clear();
        self.bound.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckKind {
    Publish,
    Subscribe,
}

/// Waiters for broker acknowledgements.
#[derive(Default)]
pub(crate) struct AckTracker {
    next_token: u64,
    publishes: Waiters<u16>,
    subscribes: Waiters<Vec<SubscribeReasonCode>>,
}

impl AckTracker {
    fn token(&mut self) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        self.next_token
    }

    pub(crate) fn queue_publish(&mut self) -> (u64, oneshot::Receiver<u16>) {
        let token = self.token();
        (token, self.publishes.queue(token))
    }

    pub(crate) fn queue_subscribe(&mut self) -> (u64, oneshot::Receiver<Vec<SubscribeReasonCode>>) {
        let token = self.token();
        (token, self.subscribes.queue(token))
    }

    /// Binds the oldest publish waiter to `pkid`. Packet id 0 marks a
    /// fire-and-forget publish, which has no waiter.
    pub(crate) fn assign_publish(&mut self, pkid: u16) {
        if pkid != 0 {
            self.publishes.assign(pkid);
        }
    }

    pub(crate) fn assign_subscribe(&mut self, pkid: u16) {
        self.subscribes.assign(pkid);
    }

    pub(crate) fn complete_publish(&mut self, pkid: u16) {
        self.publishes.complete(pkid, pkid);
    }

    pub(crate) fn complete_subscribe(&mut self, pkid: u16, codes: Vec<SubscribeReasonCode>) {
        self.subscribes.complete(pkid, codes);
    }

    pub(crate) fn release(&mut self, kind: AckKind, token: u64, sent: bool) {
        match kind {
            AckKind::Publish => self.publishes.release(token, sent),
            AckKind::Subscribe => self.subscribes.release(token, sent),
        }
    }

    /// Drops every waiter; their receivers observe a closed channel.
    pub(crate) fn clear(&mut self) {
        self.publishes.clear();
        self.subscribes.clear();
    }

    /// Waiters and held slots not yet settled.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.publishes.len() + self.subscribes.len()
    }
}

/// Withdraws an ack waiter when the request future goes away, however it
/// ends: acknowledged, failed, timed out or cancelled by the caller.
pub(crate) struct PendingAck<'a> {
    shared: &'a SessionShared,
    kind: AckKind,
    token: u64,
    sent: bool,
}

impl PendingAck<'_> {
    /// The request reached the connection, so its packet id will be
    /// reported even if nobody waits for the ack any more.
    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        self.shared.acks().release(self.kind, self.token, self.sent);
    }
}

/// Unregisters a subscription callback unless [`keep`](Self::keep) is called.
pub(crate) struct Registration<'a> {
    shared: &'a SessionShared,
    id: u64,
    keep: bool,
}

impl Registration<'_> {
    pub(crate) fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.keep {
            self.shared.unregister(self.id);
        }
    }
}

struct Subscription {
    id: u64,
    filter: String,
    callback: Arc<MessageCallback>,
}

/// Shared between [`MessagingSession`](crate::MessagingSession) and its pumps.
pub(crate) struct SessionShared {
    acks: Mutex<AckTracker>,
    subscriptions: RwLock<Vec<Subscription>>,
    next_subscription: AtomicU64,
    open: AtomicBool,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            acks: Mutex::new(AckTracker::default()),
            subscriptions: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            open: AtomicBool::new(true),
        }
    }

    pub(crate) fn acks(&self) -> std::sync::MutexGuard<'_, AckTracker> {
        self.acks.lock().unwrap()
    }

    pub(crate) fn queue_publish(&self) -> (PendingAck<'_>, oneshot::Receiver<u16>) {
        let (token, rx) = self.acks().queue_publish();
        (self.pending_ack(AckKind::Publish, token), rx)
    }

    pub(crate) fn queue_subscribe(
        &self,
    ) -> (PendingAck<'_>, oneshot::Receiver<Vec<SubscribeReasonCode>>) {
        let (token, rx) = self.acks().queue_subscribe();
        (self.pending_ack(AckKind::Subscribe, token), rx)
    }

    fn pending_ack(&self, kind: AckKind, token: u64) -> PendingAck<'_> {
        PendingAck {
            shared: self,
            kind,
            token,
            sent: false,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Marks the session closed and fails every outstanding waiter.
    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
        self.acks().clear();
    }

    /// Registers a callback and returns its handle.
    pub(crate) fn register(&self, filter: &str, callback: Arc<MessageCallback>) -> u64 {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.write().unwrap().push(Subscription {
            id,
            filter: filter.to_string(),
            callback,
        });
        id
    }

    /// Like [`register`](Self::register), undone when the guard drops.
    pub(crate) fn register_guarded(
        &self,
        filter: &str,
        callback: Arc<MessageCallback>,
    ) -> Registration<'_> {
        Registration {
            shared: self,
            id: self.register(filter, callback),
            keep: false,
        }
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.subscriptions.write().unwrap().retain(|s| s.id != id);
    }

    /// Callbacks whose filter matches `topic`, in registration order.
    pub(crate) fn matching(&self, topic_name: &str) -> Vec<Arc<MessageCallback>> {
        self.subscriptions
            .read()
            .unwrap()
            .iter()
            .filter(|s| topic::matches(&s.filter, topic_name))
            .map(|s| s.callback.clone())
            .collect()
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.subscriptions.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::QoS;

    #[test]
    fn publish_waiters_bind_in_order() {
        let mut acks = AckTracker::default();
        let (_, mut first) = acks.queue_publish();
        let (_, mut second) = acks.queue_publish();

        acks.assign_publish(0); // fire-and-forget, no waiter consumed
        acks.assign_publish(11);
        acks.assign_publish(12);

        acks.complete_publish(12);
        assert_eq!(second.try_recv().unwrap(), 12);
        assert!(first.try_recv().is_err());

        acks.complete_publish(11);
        assert_eq!(first.try_recv().unwrap(), 11);
        assert_eq!(acks.pending(), 0);
    }

    #[test]
    fn unsent_waiter_released_by_identity() {
        let mut acks = AckTracker::default();
        let (stale, mut dropped) = acks.queue_publish();
        let (_, mut live) = acks.queue_publish();

        acks.release(AckKind::Publish, stale, false);
        assert!(matches!(
            dropped.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));

        acks.assign_publish(1);
        acks.complete_publish(1);
        assert_eq!(live.try_recv().unwrap(), 1);
        assert_eq!(acks.pending(), 0);
    }

    #[test]
    fn sent_waiter_keeps_its_slot() {
        let mut acks = AckTracker::default();
        let (abandoned, _rx) = acks.queue_publish();
        let (_, mut next) = acks.queue_publish();
        acks.release(AckKind::Publish, abandoned, true);

        // The abandoned request's packet id still comes first.
        acks.assign_publish(7);
        acks.assign_publish(8);
        acks.complete_publish(7);
        acks.complete_publish(8);
        assert_eq!(next.try_recv().unwrap(), 8);
        assert_eq!(acks.pending(), 0);
    }

    #[test]
    fn bound_waiter_released_after_timeout() {
        let mut acks = AckTracker::default();
        let (token, _rx) = acks.queue_subscribe();
        acks.assign_subscribe(4);
        assert_eq!(acks.pending(), 1);

        acks.release(AckKind::Subscribe, token, true);
        assert_eq!(acks.pending(), 0);
        // A late SUBACK finds nobody.
        acks.complete_subscribe(4, vec![SubscribeReasonCode::Failure]);
        assert_eq!(acks.pending(), 0);
    }

    #[test]
    fn subscribe_ack_delivers_codes() {
        let mut acks = AckTracker::default();
        let (_, mut rx) = acks.queue_subscribe();
        acks.assign_subscribe(3);
        acks.complete_subscribe(3, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert_eq!(
            rx.try_recv().unwrap(),
            vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]
        );
    }

    #[test]
    fn guards_release_on_drop() {
        let shared = SessionShared::new();
        let cb: Arc<MessageCallback> = Arc::new(Box::new(|_, _| {}));
        {
            let (_pending, _rx) = shared.queue_publish();
            let _registration = shared.register_guarded("a/b", cb.clone());
            assert_eq!(shared.acks().pending(), 1);
            assert_eq!(shared.subscription_count(), 1);
        }
        assert_eq!(shared.acks().pending(), 0);
        assert_eq!(shared.subscription_count(), 0);

        shared.register_guarded("a/b", cb).keep();
        assert_eq!(shared.subscription_count(), 1);
    }

    #[test]
    fn mark_closed_fails_waiters() {
        let shared = SessionShared::new();
        let (_, mut rx) = shared.acks().queue_publish();
        shared.mark_closed();
        assert!(!shared.is_open());
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn matching_respects_filters_and_unregister() {
        let shared = SessionShared::new();
        let cb: Arc<MessageCallback> = Arc::new(Box::new(|_, _| {}));
        let a = shared.register("sensors/+/temp", cb.clone());
        shared.register("sensors/#", cb.clone());

        assert_eq!(shared.matching("sensors/1/temp").len(), 2);
        assert_eq!(shared.matching("sensors/1/humidity").len(), 1);
        assert_eq!(shared.matching("other").len(), 0);

        shared.unregister(a);
        assert_eq!(shared.matching("sensors/1/temp").len(), 1);
        assert_eq!(shared.subscription_count(), 1);
    }
}
