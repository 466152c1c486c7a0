//! Replication commands

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_replication::HttpsReplicationStartOp;
use crate::vdb::MAIN_CLUSTER;
use crate::workflows::{DatabaseOptions, fetch, resolve_raw_hosts};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ReplicationStartOptions {
    /// Source database; replication is initiated from its side.
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub target_db_name: String,
    pub target_raw_hosts: Vec<String>,
    /// Replicate into a sandbox of the target instead of its main cluster.
    #[builder(default, setter(strip_option, into))]
    pub target_sandbox: Option<String>,
    /// Source scope; replicate from this sandbox instead of main.
    #[builder(default, setter(strip_option, into))]
    pub source_sandbox: Option<String>,
    /// Restrict to objects matching this table or schema pattern.
    #[builder(default, setter(strip_option, into))]
    pub table_or_schema: Option<String>,
    #[builder(default)]
    pub target_hosts: Vec<String>,
}

impl ReplicationStartOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::ReplicationStart)?;
        if self.target_db_name.is_empty() {
            return Err(OpsError::Validation("target database name must not be empty".into()));
        }
        if self.target_raw_hosts.is_empty() {
            return Err(OpsError::Validation("at least one target host is required".into()));
        }
        self.target_hosts = resolve_raw_hosts(&self.target_raw_hosts)?;
        Ok(())
    }
}

pub async fn replication_start(options: &mut ReplicationStartOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb =
        fetch::fetch_vdb_from_running_db(&options.db, options.source_sandbox.as_deref()).await?;
    let scope = options.source_sandbox.as_deref().unwrap_or(MAIN_CLUSTER);
    let up_hosts = vdb.filter_up_host_list_by_sandbox(&vdb.host_list.clone(), scope);
    let Some(initiator) = up_hosts.first() else {
        return Err(OpsError::Precondition(
            "no UP node is available in the replication source".into(),
        ));
    };

    let mut op = HttpsReplicationStartOp::new(
        vec![initiator.clone()],
        options.target_db_name.clone(),
        options.target_hosts.clone(),
    );
    if let Some(sandbox) = &options.target_sandbox {
        op = op.into_sandbox(sandbox.clone());
    }
    if let Some(pattern) = &options.table_or_schema {
        op = op.pattern(pattern.clone());
    }
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(op)];
    let mut ctx = options.db.make_context()?;
    let engine = match &options.source_sandbox {
        Some(sandbox) => {
            ClusterOpEngine::run_in_sandbox(options.db.credentials()?.clone(), sandbox.clone())
        }
        None => ClusterOpEngine::new(options.db.credentials()?.clone()),
    };
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to start replication"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;

    #[test]
    fn target_hosts_are_required() {
        let mut opts = ReplicationStartOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .target_db_name("db2")
            .target_raw_hosts(vec![])
            .build();
        assert!(opts.validate_analyze().unwrap_err().is_validation());
    }

    #[test]
    fn target_hosts_resolve_during_analyze() {
        let mut opts = ReplicationStartOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .target_db_name("db2")
            .target_raw_hosts(vec!["10.1.0.1".into()])
            .build();
        opts.validate_analyze().unwrap();
        assert_eq!(opts.target_hosts, vec!["10.1.0.1".to_string()]);
    }
}
