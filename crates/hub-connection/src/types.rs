//! Public types for hub connections.

use rumqttc::QoS;

use edgelink_protocol::{DeliveryGuarantee, Endpoint};

use crate::connector::ConnectionAttemptError;

/// A session established with one endpoint of a core.
#[derive(Debug)]
pub struct ConnectionRecord<H> {
    pub core_identifier: String,
    pub endpoint: Endpoint,
    pub handle: H,
}

/// A connection attempt that did not produce a session.
#[derive(Debug)]
pub struct AttemptFailure {
    pub core_identifier: String,
    pub endpoint: Endpoint,
    pub error: ConnectionAttemptError,
}

/// Outcome of one pass over a topology.
#[derive(Debug)]
pub struct ConnectReport<H> {
    /// Established sessions, in discovery order.
    pub records: Vec<ConnectionRecord<H>>,
    /// Failed attempts, in discovery order.
    pub failures: Vec<AttemptFailure>,
    /// Number of endpoints attempted.
    pub attempted: usize,
}

impl<H> ConnectReport<H> {
    pub fn into_records(self) -> Vec<ConnectionRecord<H>> {
        self.records
    }
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub guarantee: DeliveryGuarantee,
    /// True once the hub acknowledged the message.
    pub acknowledged: bool,
    /// Packet identifier of an acknowledged publish.
    pub packet_id: Option<u16>,
}

/// Result of a successful subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResult {
    pub topic: String,
    /// Guarantee granted by the hub, which may be lower than requested.
    pub granted: DeliveryGuarantee,
}

pub(crate) fn qos_for(guarantee: DeliveryGuarantee) -> QoS {
    match guarantee {
        DeliveryGuarantee::AtMostOnce => QoS::AtMostOnce,
        DeliveryGuarantee::AtLeastOnce => QoS::AtLeastOnce,
    }
}

pub(crate) fn guarantee_for(qos: QoS) -> DeliveryGuarantee {
    match qos {
        QoS::AtMostOnce => DeliveryGuarantee::AtMostOnce,
        QoS::AtLeastOnce | QoS::ExactlyOnce => DeliveryGuarantee::AtLeastOnce,
    }
}
