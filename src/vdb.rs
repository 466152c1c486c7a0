//! Coordination database snapshot
//!
//! An in-memory picture of cluster topology assembled at workflow entry,
//! either from the running database's `/nodes` endpoint or from the
//! communal cluster description when the database is down. It is read-only
//! during the main pipeline.

use crate::error::{OpsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sandbox name of the main cluster.
pub const MAIN_CLUSTER: &str = "";

/// Node state as reported by the catalog service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    /// Ephemeral read-only node; equivalent to UP for user traffic but not
    /// for catalog quorum.
    #[serde(rename = "COMPUTE")]
    Compute,
    #[serde(rename = "RECOVERING")]
    Recovering,
    #[serde(other, rename = "UNKNOWN")]
    Unknown,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Up => "UP",
            NodeState::Down => "DOWN",
            NodeState::Compute => "COMPUTE",
            NodeState::Recovering => "RECOVERING",
            NodeState::Unknown => "UNKNOWN",
        }
    }

    /// Friendly form for user-facing progress lines.
    pub fn display_name(&self) -> &'static str {
        match self {
            NodeState::Compute => "up (compute)",
            other => other.as_str(),
        }
    }

    /// Whether the node serves traffic.
    pub fn is_serving(&self) -> bool {
        matches!(self, NodeState::Up | NodeState::Compute)
    }
}

/// A node in the coordination database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VNode {
    pub name: String,
    pub address: String,
    pub catalog_path: String,
    pub data_path: String,
    pub depot_path: String,
    pub subcluster: String,
    /// `""` means the main cluster.
    #[serde(default)]
    pub sandbox: String,
    pub is_primary: bool,
    #[serde(default)]
    pub is_compute: bool,
    pub state: NodeState,
    #[serde(default)]
    pub version: String,
}

/// Per-subcluster rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubclusterStatus {
    pub name: String,
    pub sandbox: String,
    pub is_primary: bool,
    pub is_up: bool,
    pub host_list: Vec<String>,
}

/// The NMA's view of the cluster, read from the on-disk catalog. Hosts are
/// ranked by catalog version, most recent first.
#[derive(Debug, Clone, Default)]
pub struct NmaVDatabase {
    pub name: String,
    /// Hosts ordered by descending catalog epoch.
    pub hosts_by_catalog_epoch: Vec<String>,
    pub primary_hosts: Vec<String>,
}

/// Quorum over primary nodes: a start requires ⌊P/2⌋+1 reachable primaries.
pub fn quorum_threshold(primaries: usize) -> usize {
    primaries / 2 + 1
}

/// True when `reachable` primaries satisfy quorum for `primaries` total.
pub fn has_quorum(primaries: usize, reachable: usize) -> bool {
    reachable >= quorum_threshold(primaries)
}

/// In-memory snapshot of cluster topology.
#[derive(Debug, Clone, Default)]
pub struct CoordinationDatabase {
    pub name: String,
    pub is_eon: bool,
    pub communal_storage_location: String,
    /// Ordered host list; every entry is a key in `host_to_node`.
    pub host_list: Vec<String>,
    pub host_to_node: BTreeMap<String, VNode>,
}

impl CoordinationDatabase {
    pub fn new(name: impl Into<String>, is_eon: bool) -> Self {
        Self {
            name: name.into(),
            is_eon,
            ..Default::default()
        }
    }

    /// Insert a node, keeping `host_list` and the address index in step.
    pub fn add_node(&mut self, node: VNode) {
        if !self.host_to_node.contains_key(&node.address) {
            self.host_list.push(node.address.clone());
        }
        self.host_to_node.insert(node.address.clone(), node);
    }

    pub fn node(&self, host: &str) -> Option<&VNode> {
        self.host_to_node.get(host)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &VNode> {
        self.host_list.iter().filter_map(|h| self.host_to_node.get(h))
    }

    /// Verify the structural invariants: every listed host resolves to a
    /// node, and all nodes of one subcluster share the same sandbox.
    pub fn validate(&self) -> Result<()> {
        for host in &self.host_list {
            if !self.host_to_node.contains_key(host) {
                return Err(OpsError::Internal(format!(
                    "host {host} is listed but has no node entry"
                )));
            }
        }
        let mut sc_sandbox: BTreeMap<&str, &str> = BTreeMap::new();
        for node in self.host_to_node.values() {
            match sc_sandbox.get(node.subcluster.as_str()) {
                Some(sandbox) if *sandbox != node.sandbox => {
                    return Err(OpsError::Internal(format!(
                        "subcluster {} spans sandboxes '{}' and '{}'",
                        node.subcluster, sandbox, node.sandbox
                    )));
                }
                Some(_) => {}
                None => {
                    sc_sandbox.insert(&node.subcluster, &node.sandbox);
                }
            }
        }
        Ok(())
    }

    pub fn primary_count(&self) -> usize {
        self.host_to_node.values().filter(|n| n.is_primary).count()
    }

    pub fn primary_up_nodes(&self) -> Vec<&VNode> {
        self.host_to_node
            .values()
            .filter(|n| n.is_primary && n.state == NodeState::Up)
            .collect()
    }

    /// Quorum pre-check for starting the database: `reachable` is the
    /// count of primary hosts that answered.
    pub fn check_quorum(&self, reachable: usize) -> Result<()> {
        let primaries = self.primary_count();
        let required = quorum_threshold(primaries);
        if reachable >= required {
            Ok(())
        } else {
            Err(OpsError::Quorum {
                primaries,
                reachable,
                required,
            })
        }
    }

    /// Intersection of `hosts` with nodes of the given sandbox whose state
    /// is UP. `""` selects the main cluster.
    pub fn filter_up_host_list_by_sandbox(&self, hosts: &[String], sandbox: &str) -> Vec<String> {
        hosts
            .iter()
            .filter(|h| {
                self.host_to_node
                    .get(*h)
                    .is_some_and(|n| n.sandbox == sandbox && n.state == NodeState::Up)
            })
            .cloned()
            .collect()
    }

    /// Retain only primary nodes. Used after loading the communal
    /// description, because only primary nodes own catalog there.
    pub fn filter_primary_nodes(&mut self) {
        let secondaries: Vec<String> = self
            .host_to_node
            .values()
            .filter(|n| !n.is_primary)
            .map(|n| n.address.clone())
            .collect();
        for host in secondaries {
            self.host_to_node.remove(&host);
            self.host_list.retain(|h| h != &host);
        }
    }

    /// Trim `hosts` to those present in the catalog snapshot.
    pub fn remove_hosts_not_in_catalog(&self, hosts: &[String]) -> Vec<String> {
        hosts
            .iter()
            .filter(|h| self.host_to_node.contains_key(*h))
            .cloned()
            .collect()
    }

    /// Per-subcluster rollup, ordered by subcluster name. A subcluster is
    /// up when every one of its nodes is serving.
    pub fn sc_status(&self) -> Vec<SubclusterStatus> {
        let mut by_sc: BTreeMap<&str, SubclusterStatus> = BTreeMap::new();
        for node in self.host_to_node.values() {
            let entry = by_sc
                .entry(node.subcluster.as_str())
                .or_insert_with(|| SubclusterStatus {
                    name: node.subcluster.clone(),
                    sandbox: node.sandbox.clone(),
                    is_primary: node.is_primary,
                    is_up: true,
                    host_list: Vec::new(),
                });
            entry.is_up = entry.is_up && node.state.is_serving();
            entry.is_primary = entry.is_primary || node.is_primary;
            entry.host_list.push(node.address.clone());
        }
        by_sc.into_values().collect()
    }

    /// All hosts of the given subcluster.
    pub fn hosts_in_subcluster(&self, subcluster: &str) -> Vec<String> {
        self.nodes()
            .filter(|n| n.subcluster == subcluster)
            .map(|n| n.address.clone())
            .collect()
    }

    /// Sandbox owning the given subcluster, if the subcluster exists.
    pub fn sandbox_of_subcluster(&self, subcluster: &str) -> Option<String> {
        self.nodes()
            .find(|n| n.subcluster == subcluster)
            .map(|n| n.sandbox.clone())
    }

    /// Any one UP host inside the subcluster, the usual initiator for a
    /// subcluster-scoped operation.
    pub fn first_up_host_in_subcluster(&self, subcluster: &str) -> Option<String> {
        self.nodes()
            .find(|n| n.subcluster == subcluster && n.state == NodeState::Up)
            .map(|n| n.address.clone())
    }

    /// Primary UP hosts inside the given sandbox, the initiator pool for
    /// sandbox-scoped cluster-wide operations.
    pub fn primary_up_hosts_in_sandbox(&self, sandbox: &str) -> Vec<String> {
        self.nodes()
            .filter(|n| n.sandbox == sandbox && n.is_primary && n.state == NodeState::Up)
            .map(|n| n.address.clone())
            .collect()
    }

    /// All hosts currently serving (UP or COMPUTE).
    pub fn up_hosts(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| n.state.is_serving())
            .map(|n| n.address.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str, sc: &str, sandbox: &str, primary: bool, state: NodeState) -> VNode {
        VNode {
            name: format!("v_db_node_{addr}"),
            address: addr.to_string(),
            catalog_path: "/cat/db".into(),
            data_path: "/dat/db".into(),
            depot_path: "/dep/db".into(),
            subcluster: sc.to_string(),
            sandbox: sandbox.to_string(),
            is_primary: primary,
            is_compute: false,
            state,
            version: "v24.3.0".into(),
        }
    }

    fn sample_vdb() -> CoordinationDatabase {
        let mut vdb = CoordinationDatabase::new("db", true);
        vdb.add_node(node("10.0.0.1", "default_subcluster", MAIN_CLUSTER, true, NodeState::Up));
        vdb.add_node(node("10.0.0.2", "default_subcluster", MAIN_CLUSTER, true, NodeState::Up));
        vdb.add_node(node("10.0.0.3", "default_subcluster", MAIN_CLUSTER, true, NodeState::Down));
        vdb.add_node(node("10.0.0.4", "sc_analytics", "sand1", false, NodeState::Up));
        vdb.add_node(node("10.0.0.5", "sc_analytics", "sand1", false, NodeState::Up));
        vdb
    }

    #[test]
    fn quorum_is_floor_half_plus_one_and_monotone() {
        assert_eq!(quorum_threshold(5), 3);
        assert_eq!(quorum_threshold(4), 3);
        assert_eq!(quorum_threshold(1), 1);
        assert!(!has_quorum(5, 2));
        assert!(has_quorum(5, 3));
        // monotone in reachable count
        for p in 1..10 {
            let mut prev = false;
            for r in 0..=p {
                let now = has_quorum(p, r);
                assert!(now || !prev, "quorum regressed at p={p} r={r}");
                prev = now;
            }
        }
    }

    #[test]
    fn check_quorum_reports_threshold() {
        let vdb = sample_vdb();
        assert_eq!(vdb.primary_count(), 3);
        match vdb.check_quorum(1).unwrap_err() {
            OpsError::Quorum {
                primaries,
                reachable,
                required,
            } => {
                assert_eq!((primaries, reachable, required), (3, 1, 2));
            }
            other => panic!("expected Quorum, got {other}"),
        }
        vdb.check_quorum(2).unwrap();
    }

    #[test]
    fn sandbox_filter_is_idempotent() {
        let vdb = sample_vdb();
        let all: Vec<String> = vdb.host_list.clone();
        let filtered = vdb.filter_up_host_list_by_sandbox(&all, "sand1");
        assert_eq!(filtered, vec!["10.0.0.4".to_string(), "10.0.0.5".to_string()]);
        // re-filtering with the same sandbox changes nothing
        let refiltered = vdb.filter_up_host_list_by_sandbox(&filtered, "sand1");
        assert_eq!(filtered, refiltered);

        let main = vdb.filter_up_host_list_by_sandbox(&all, MAIN_CLUSTER);
        assert_eq!(main, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
    }

    #[test]
    fn up_hosts_and_primary_up_nodes_track_state() {
        let vdb = sample_vdb();
        assert_eq!(
            vdb.up_hosts(),
            vec![
                "10.0.0.1".to_string(),
                "10.0.0.2".to_string(),
                "10.0.0.4".to_string(),
                "10.0.0.5".to_string()
            ]
        );
        let primaries: Vec<&str> = vdb
            .primary_up_nodes()
            .iter()
            .map(|n| n.address.as_str())
            .collect();
        assert_eq!(primaries, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn sc_status_rolls_up_state() {
        let vdb = sample_vdb();
        let status = vdb.sc_status();
        assert_eq!(status.len(), 2);
        let default_sc = status.iter().find(|s| s.name == "default_subcluster").unwrap();
        assert!(default_sc.is_primary);
        assert!(!default_sc.is_up); // one node is DOWN
        let analytics = status.iter().find(|s| s.name == "sc_analytics").unwrap();
        assert_eq!(analytics.sandbox, "sand1");
        assert!(analytics.is_up);
    }

    #[test]
    fn filter_primary_nodes_drops_secondaries() {
        let mut vdb = sample_vdb();
        vdb.filter_primary_nodes();
        assert_eq!(vdb.host_list.len(), 3);
        assert!(vdb.nodes().all(|n| n.is_primary));
        vdb.validate().unwrap();
    }

    #[test]
    fn validate_rejects_subcluster_spanning_sandboxes() {
        let mut vdb = sample_vdb();
        vdb.add_node(node("10.0.0.6", "sc_analytics", "sand2", false, NodeState::Up));
        assert!(vdb.validate().is_err());
    }

    #[test]
    fn remove_hosts_not_in_catalog_trims_input() {
        let vdb = sample_vdb();
        let input = vec!["10.0.0.1".to_string(), "10.9.9.9".to_string()];
        assert_eq!(vdb.remove_hosts_not_in_catalog(&input), vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn node_state_display_names() {
        assert_eq!(NodeState::Compute.display_name(), "up (compute)");
        assert_eq!(NodeState::Up.display_name(), "UP");
        assert!(NodeState::Compute.is_serving());
        assert!(!NodeState::Down.is_serving());
    }
}
