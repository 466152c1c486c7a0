//! Online upgrade
//!
//! A three-phase composite command. Each phase is a separate entry point
//! so an operator can pause between phases; there is no automatic
//! rollback, and every error names the manual action that restores a
//! known-good state.
//!
//! Phase 1 drains and sandboxes the upgrade subclusters, then stops the
//! sandbox. Phase 2 starts the upgraded sandbox, replicates the data
//! delta from the main cluster, redirects clients, stops the main
//! cluster, and promotes the sandbox. Phase 3 starts anything still down
//! and aligns subcluster types with the desired primary set.

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::{HttpsSetConfigParamOp, HttpsStopDbOp};
use crate::ops::https_connections::{
    DrainingAction, HttpsManageConnectionDrainingOp, PollDrainStatusOp,
};
use crate::ops::https_replication::HttpsReplicationStartOp;
use crate::ops::https_subcluster::{
    HttpsAlterSubclusterTypeOp, HttpsPromoteSandboxToMainOp, HttpsSandboxSubclusterOp,
};
use crate::ops::nma_cluster::{NmaHealthOp, NmaStartNodeOp};
use crate::ops::poll::PollNodeStateOp;
use crate::vdb::{CoordinationDatabase, MAIN_CLUSTER, NodeState};
use crate::workflows::{DatabaseOptions, fetch, validate_object_name};
use tracing::info;
use typed_builder::TypedBuilder;

/// Parameter disabling queries that cannot be replicated to the sandbox
/// while the two cluster halves diverge.
const NON_REPLICATABLE_QUERIES_PARAM: &str = "DisableNonReplicatableQueries";

#[derive(Debug, Clone, TypedBuilder)]
pub struct OnlineUpgradeOptions {
    pub db: DatabaseOptions,
    /// Subclusters moved into the upgrade sandbox in phase 1.
    pub upgrade_subclusters: Vec<String>,
    #[builder(default = String::from("upgrade_sandbox"), setter(into))]
    pub sandbox_name: String,
    /// Host that receives client connections redirected away from a
    /// cluster half.
    #[builder(setter(into))]
    pub redirect_hostname: String,
    /// Subclusters that should be primary once the upgrade finishes.
    /// Empty keeps the promoted topology as is.
    #[builder(default)]
    pub desired_primary_subclusters: Vec<String>,
}

impl OnlineUpgradeOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        // phases reuse the draining/sandbox commands; the command type
        // only tags requests that key behavior by command
        self.db.validate_analyze(CmdType::SandboxSubcluster)?;
        if self.upgrade_subclusters.is_empty() {
            return Err(OpsError::Validation(
                "at least one subcluster to upgrade is required".into(),
            ));
        }
        for sc in &self.upgrade_subclusters {
            validate_object_name(sc, "subcluster")?;
        }
        validate_object_name(&self.sandbox_name, "sandbox")?;
        if self.redirect_hostname.is_empty() {
            return Err(OpsError::Validation(
                "a redirect hostname is required for the online upgrade".into(),
            ));
        }
        Ok(())
    }
}

fn main_initiator(vdb: &CoordinationDatabase) -> Result<Vec<String>> {
    let initiators = vdb.primary_up_hosts_in_sandbox(MAIN_CLUSTER);
    match initiators.first() {
        Some(host) => Ok(vec![host.clone()]),
        None => Err(OpsError::Precondition(
            "no primary UP node is available in the main cluster".into(),
        )),
    }
}

/// Main-cluster subclusters that stay behind during the upgrade.
fn remaining_main_subclusters(
    vdb: &CoordinationDatabase,
    upgrading: &[String],
) -> Vec<String> {
    vdb.sc_status()
        .into_iter()
        .filter(|s| s.sandbox == MAIN_CLUSTER && !upgrading.contains(&s.name))
        .map(|s| s.name)
        .collect()
}

/// Phase 1: drain the upgrade subclusters, sandbox them, stop the sandbox.
pub async fn online_upgrade_phase1(options: &mut OnlineUpgradeOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let initiator = main_initiator(&vdb)?;

    let mut instructions: Vec<Box<dyn ClusterOp>> = Vec::new();
    for sc in &options.upgrade_subclusters {
        instructions.push(Box::new(HttpsManageConnectionDrainingOp::new(
            initiator.clone(),
            sc.clone(),
            DrainingAction::Pause,
            None,
        )));
        instructions.push(Box::new(HttpsManageConnectionDrainingOp::new(
            initiator.clone(),
            sc.clone(),
            DrainingAction::Redirect,
            Some(options.redirect_hostname.clone()),
        )));
    }
    instructions.push(Box::new(PollDrainStatusOp::new(
        initiator.clone(),
        options.upgrade_subclusters.clone(),
    )));
    instructions.push(Box::new(HttpsSetConfigParamOp::new(
        initiator.clone(),
        NON_REPLICATABLE_QUERIES_PARAM,
        "1",
        Some("database".into()),
        None,
    )));
    let mut sandbox_initiator = None;
    for sc in &options.upgrade_subclusters {
        instructions.push(Box::new(HttpsSandboxSubclusterOp::new(
            initiator.clone(),
            sc.clone(),
            options.sandbox_name.clone(),
            true,
        )));
        let sc_hosts = vdb.hosts_in_subcluster(sc);
        if sandbox_initiator.is_none() {
            sandbox_initiator = sc_hosts.first().cloned();
        }
        instructions.push(Box::new(PollNodeStateOp::direct(
            sc_hosts,
            vec![NodeState::Up],
        )));
    }
    let Some(sandbox_initiator) = sandbox_initiator else {
        return Err(OpsError::Precondition(
            "the upgrade subclusters own no host".into(),
        ));
    };
    instructions.push(Box::new(HttpsStopDbOp::new(
        vec![sandbox_initiator],
        Some(options.sandbox_name.clone()),
        None,
    )));

    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| {
            e.with_step(
                "online upgrade phase 1 failed; unsandbox the upgrade subclusters and resume \
                 their connections to restore the cluster, then retry phase 1",
            )
        })?;
    info!(sandbox = %options.sandbox_name, "phase 1 complete: sandbox created and stopped");
    Ok(())
}

/// Phase 2: start the upgraded sandbox, replicate, redirect clients,
/// stop the main cluster, promote the sandbox.
pub async fn online_upgrade_phase2(options: &mut OnlineUpgradeOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let main_init = main_initiator(&vdb)?;
    let sandbox_hosts: Vec<String> = vdb
        .nodes()
        .filter(|n| n.sandbox == options.sandbox_name)
        .map(|n| n.address.clone())
        .collect();
    let Some(sandbox_initiator) = sandbox_hosts.first().cloned() else {
        return Err(OpsError::Precondition(format!(
            "sandbox {} owns no host; run phase 1 first",
            options.sandbox_name
        )));
    };
    let main_subclusters = remaining_main_subclusters(&vdb, &options.upgrade_subclusters);

    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaHealthOp::new(sandbox_hosts.clone())),
        Box::new(NmaStartNodeOp::new(
            sandbox_hosts.clone(),
            options.db.db_name.clone(),
        )),
        Box::new(PollNodeStateOp::direct(
            sandbox_hosts.clone(),
            vec![NodeState::Up],
        )),
        // the sandbox runs the new version; queries are unrestricted there
        Box::new(HttpsSetConfigParamOp::new(
            vec![sandbox_initiator.clone()],
            NON_REPLICATABLE_QUERIES_PARAM,
            "0",
            Some("database".into()),
            Some(options.sandbox_name.clone()),
        )),
    ];
    for sc in main_subclusters.iter().chain(&options.upgrade_subclusters) {
        instructions.push(Box::new(HttpsManageConnectionDrainingOp::new(
            main_init.clone(),
            sc.clone(),
            DrainingAction::Pause,
            None,
        )));
    }
    instructions.push(Box::new(
        HttpsReplicationStartOp::new(
            main_init.clone(),
            options.db.db_name.clone(),
            sandbox_hosts.clone(),
        )
        .into_sandbox(options.sandbox_name.clone()),
    ));
    instructions.push(Box::new(PollDrainStatusOp::new(
        main_init.clone(),
        main_subclusters.clone(),
    )));
    // catch the writes that landed between the first pass and the pause
    instructions.push(Box::new(
        HttpsReplicationStartOp::new(
            main_init.clone(),
            options.db.db_name.clone(),
            sandbox_hosts.clone(),
        )
        .into_sandbox(options.sandbox_name.clone()),
    ));
    for sc in &options.upgrade_subclusters {
        instructions.push(Box::new(HttpsManageConnectionDrainingOp::new(
            vec![sandbox_initiator.clone()],
            sc.clone(),
            DrainingAction::Resume,
            None,
        )));
    }
    for sc in &main_subclusters {
        instructions.push(Box::new(HttpsManageConnectionDrainingOp::new(
            main_init.clone(),
            sc.clone(),
            DrainingAction::Redirect,
            Some(options.redirect_hostname.clone()),
        )));
    }
    instructions.push(Box::new(PollDrainStatusOp::new(
        main_init.clone(),
        main_subclusters.clone(),
    )));
    instructions.push(Box::new(HttpsStopDbOp::new(main_init, None, None)));
    instructions.push(Box::new(HttpsPromoteSandboxToMainOp::new(
        vec![sandbox_initiator],
        options.sandbox_name.clone(),
    )));

    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| {
            e.with_step(
                "online upgrade phase 2 failed; please shut down the sandbox and retry phase 2",
            )
        })?;
    info!(sandbox = %options.sandbox_name, "phase 2 complete: sandbox promoted to main");
    Ok(())
}

/// Phase 3: start anything still down and align subcluster types with
/// the desired primary set.
pub async fn online_upgrade_phase3(options: &mut OnlineUpgradeOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let initiator = main_initiator(&vdb)?;

    let mut instructions: Vec<Box<dyn ClusterOp>> =
        vec![Box::new(NmaHealthOp::new(options.db.hosts.clone()))];
    for sc in vdb.sc_status() {
        if sc.is_up {
            continue;
        }
        instructions.push(Box::new(NmaStartNodeOp::new(
            sc.host_list.clone(),
            options.db.db_name.clone(),
        )));
        instructions.push(Box::new(PollNodeStateOp::direct(
            sc.host_list,
            vec![NodeState::Up, NodeState::Compute],
        )));
    }
    if !options.desired_primary_subclusters.is_empty() {
        for sc in vdb.sc_status() {
            let should_be_primary = options.desired_primary_subclusters.contains(&sc.name);
            if should_be_primary != sc.is_primary {
                instructions.push(Box::new(HttpsAlterSubclusterTypeOp::new(
                    initiator.clone(),
                    sc.name,
                    should_be_primary,
                )));
            }
        }
    }

    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| {
            e.with_step(
                "online upgrade phase 3 failed; start the remaining subclusters manually and \
                 rerun phase 3",
            )
        })?;
    info!("phase 3 complete: cluster restored to the desired shape");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;
    use crate::vdb::VNode;

    fn options() -> OnlineUpgradeOptions {
        OnlineUpgradeOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .upgrade_subclusters(vec!["sc_upgrade".into()])
            .redirect_hostname("10.0.0.1")
            .build()
    }

    #[test]
    fn upgrade_needs_subclusters_and_redirect_target() {
        let mut opts = options();
        opts.upgrade_subclusters.clear();
        assert!(opts.validate_analyze().unwrap_err().is_validation());

        let mut opts = options();
        opts.redirect_hostname.clear();
        assert!(opts.validate_analyze().unwrap_err().is_validation());
    }

    #[test]
    fn remaining_main_subclusters_excludes_upgrade_set() {
        let mut vdb = CoordinationDatabase::new("db", true);
        for (i, sc) in [(1, "default_subcluster"), (2, "sc_upgrade")] {
            vdb.add_node(VNode {
                name: format!("v_db_node{i:04}"),
                address: format!("10.0.0.{i}"),
                catalog_path: "/cat".into(),
                data_path: "/dat".into(),
                depot_path: "/dep".into(),
                subcluster: sc.into(),
                sandbox: String::new(),
                is_primary: i == 1,
                is_compute: false,
                state: NodeState::Up,
                version: String::new(),
            });
        }
        let remaining = remaining_main_subclusters(&vdb, &["sc_upgrade".to_string()]);
        assert_eq!(remaining, vec!["default_subcluster".to_string()]);
    }
}
