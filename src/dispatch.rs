//! Parallel request fan-out
//!
//! The dispatcher issues every registered request concurrently, one task
//! per host, and returns only when all of them have completed. Ordering
//! among the in-flight requests is unspecified; operations must not depend
//! on it.

use crate::client::AgentClient;
use crate::request::{HostRequest, HostResults};
use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone)]
pub struct Dispatcher {
    client: AgentClient,
}

impl Dispatcher {
    pub fn new(client: AgentClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    /// Issue all requests in parallel and gather results keyed by host.
    /// Every input host has an entry in the output.
    pub async fn fan_out(&self, requests: &BTreeMap<String, HostRequest>) -> HostResults {
        debug!(hosts = requests.len(), "dispatching request set");
        let tasks = requests.iter().map(|(host, request)| {
            let client = self.client.clone();
            async move { client.issue(host, request).await }
        });

        let mut results = HostResults::default();
        for result in join_all(tasks).await {
            results.insert(result);
        }
        results
    }
}
