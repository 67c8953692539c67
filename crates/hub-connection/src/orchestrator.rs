//! Connection orchestration over a discovered topology.
//!
//! Every endpoint of every core of every group is attempted exactly once, in
//! discovery order. Individual failures are logged and skipped; the caller
//! decides whether an empty result is an error.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, info, warn};

use edgelink_credentials::CredentialBundle;
use edgelink_protocol::{Core, DiscoveryTopology, Endpoint, Group};

use crate::connector::{ConnectionAttemptError, Connector};
use crate::session::SessionBuilder;
use crate::types::{AttemptFailure, ConnectReport, ConnectionRecord};

/// Accumulates the outcome of each attempt for one run.
pub struct ConnectionCollector<H> {
    records: Vec<ConnectionRecord<H>>,
    failures: Vec<AttemptFailure>,
    attempted: usize,
}

impl<H> Default for ConnectionCollector<H> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            failures: Vec::new(),
            attempted: 0,
        }
    }
}

impl<H> ConnectionCollector<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the result of one attempt.
    pub fn record(
        &mut self,
        core_identifier: &str,
        endpoint: &Endpoint,
        result: Result<H, ConnectionAttemptError>,
    ) {
        self.attempted += 1;
        match result {
            Ok(handle) => {
                info!(core = core_identifier, endpoint = %endpoint, "connected to hub");
                self.records.push(ConnectionRecord {
                    core_identifier: core_identifier.to_string(),
                    endpoint: endpoint.clone(),
                    handle,
                });
            }
            Err(error) => {
                warn!(
                    core = core_identifier,
                    endpoint = %endpoint,
                    error = %error,
                    "connection attempt failed"
                );
                self.failures.push(AttemptFailure {
                    core_identifier: core_identifier.to_string(),
                    endpoint: endpoint.clone(),
                    error,
                });
            }
        }
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn finish(self) -> ConnectReport<H> {
        ConnectReport {
            records: self.records,
            failures: self.failures,
            attempted: self.attempted,
        }
    }
}

/// Attempts a session with every endpoint in a topology.
pub struct ConnectionOrchestrator<C> {
    connector: C,
    builder: SessionBuilder,
}

impl<C: Connector> ConnectionOrchestrator<C> {
    pub fn new(connector: C) -> Self {
        Self::with_builder(connector, SessionBuilder::default())
    }

    pub fn with_builder(connector: C, builder: SessionBuilder) -> Self {
        Self { connector, builder }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn session_builder(&self) -> &SessionBuilder {
        &self.builder
    }

    /// Attempts every endpoint one at a time and returns the sessions
    /// that came up, in discovery order.
    pub async fn connect_all(
        &self,
        topology: &DiscoveryTopology,
        credentials: Arc<CredentialBundle>,
        device_id: &str,
    ) -> Vec<ConnectionRecord<C::Handle>> {
        self.connect_all_with_report(topology, credentials, device_id)
            .await
            .into_records()
    }

    /// Like [`connect_all`](Self::connect_all), also reporting failures.
    pub async fn connect_all_with_report(
        &self,
        topology: &DiscoveryTopology,
        credentials: Arc<CredentialBundle>,
        device_id: &str,
    ) -> ConnectReport<C::Handle> {
        let mut collector = ConnectionCollector::new();
        for (group, core, endpoint) in endpoints_in_order(topology) {
            let result = self.attempt(group, endpoint, &credentials, device_id).await;
            collector.record(&core.identifier, endpoint, result);
        }
        finish(collector, topology)
    }

    /// Attempts up to `max_in_flight` endpoints at once.
    ///
    /// Results are still collected in discovery order, and a failed attempt
    /// never cancels the others.
    pub async fn connect_all_concurrent(
        &self,
        topology: &DiscoveryTopology,
        credentials: Arc<CredentialBundle>,
        device_id: &str,
        max_in_flight: usize,
    ) -> Vec<ConnectionRecord<C::Handle>> {
        self.connect_all_concurrent_with_report(topology, credentials, device_id, max_in_flight)
            .await
            .into_records()
    }

    pub async fn connect_all_concurrent_with_report(
        &self,
        topology: &DiscoveryTopology,
        credentials: Arc<CredentialBundle>,
        device_id: &str,
        max_in_flight: usize,
    ) -> ConnectReport<C::Handle> {
        let credentials = &credentials;
        let attempts = endpoints_in_order(topology).map(move |(group, core, endpoint)| async move {
            let result = self.attempt(group, endpoint, credentials, device_id).await;
            (core, endpoint, result)
        });

        let mut results = stream::iter(attempts).buffered(max_in_flight.max(1));
        let mut collector = ConnectionCollector::new();
        while let Some((core, endpoint, result)) = results.next().await {
            collector.record(&core.identifier, endpoint, result);
        }
        finish(collector, topology)
    }

    async fn attempt(
        &self,
        group: &Group,
        endpoint: &Endpoint,
        credentials: &Arc<CredentialBundle>,
        device_id: &str,
    ) -> Result<C::Handle, ConnectionAttemptError> {
        let anchor = group
            .trust_anchor()
            .ok_or_else(|| ConnectionAttemptError::MissingTrustAnchor(group.id.clone()))?;
        let config = self
            .builder
            .build(endpoint.clone(), anchor.to_vec(), credentials.clone(), device_id)?;
        debug!(group = %group.id, endpoint = %endpoint, "attempting session");
        self.connector.attempt(&config).await
    }
}

fn endpoints_in_order(
    topology: &DiscoveryTopology,
) -> impl Iterator<Item = (&Group, &Core, &Endpoint)> {
    topology.groups.iter().flat_map(|group| {
        group
            .cores
            .iter()
            .flat_map(move |core| core.endpoints.iter().map(move |ep| (group, core, ep)))
    })
}

fn finish<H>(collector: ConnectionCollector<H>, topology: &DiscoveryTopology) -> ConnectReport<H> {
    let report = collector.finish();
    info!(
        groups = topology.groups.len(),
        attempted = report.attempted,
        connected = report.records.len(),
        failed = report.failures.len(),
        "connection pass complete"
    );
    report
}
