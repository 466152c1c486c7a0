//! Connection draining commands

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_connections::{
    DrainingAction, DrainingStatus, HttpsGetDrainingStatusOp, HttpsManageConnectionDrainingOp,
};
use crate::vdb::MAIN_CLUSTER;
use crate::workflows::{DatabaseOptions, fetch, validate_object_name};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ManageConnectionDrainingOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
    pub action: DrainingAction,
    /// Required when the action is redirect.
    #[builder(default, setter(strip_option, into))]
    pub redirect_hostname: Option<String>,
    /// Scope the operation to a sandbox.
    #[builder(default, setter(strip_option, into))]
    pub sandbox: Option<String>,
}

impl ManageConnectionDrainingOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::ManageConnectionDraining)?;
        validate_object_name(&self.subcluster, "subcluster")?;
        if self.action == DrainingAction::Redirect
            && self.redirect_hostname.as_deref().unwrap_or_default().is_empty()
        {
            return Err(OpsError::Validation(
                "hostname to redirect to must not be empty when manage connection draining action is \"redirect\""
                    .into(),
            ));
        }
        Ok(())
    }
}

pub async fn manage_connection_draining(
    options: &mut ManageConnectionDrainingOptions,
) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, options.sandbox.as_deref()).await?;
    let scope = options.sandbox.as_deref().unwrap_or(MAIN_CLUSTER);
    let initiators = vdb.primary_up_hosts_in_sandbox(scope);
    let Some(initiator) = initiators.first() else {
        return Err(OpsError::Precondition(
            "no primary UP node is available to manage connection draining".into(),
        ));
    };
    let mut instructions: Vec<Box<dyn ClusterOp>> =
        vec![Box::new(HttpsManageConnectionDrainingOp::new(
            vec![initiator.clone()],
            options.subcluster.clone(),
            options.action,
            options.redirect_hostname.clone(),
        ))];
    let mut ctx = options.db.make_context()?;
    let engine = match &options.sandbox {
        Some(sandbox) => {
            ClusterOpEngine::run_in_sandbox(options.db.credentials()?.clone(), sandbox.clone())
        }
        None => ClusterOpEngine::new(options.db.credentials()?.clone()),
    };
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to manage connection draining"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct GetDrainingStatusOptions {
    pub db: DatabaseOptions,
    #[builder(default, setter(strip_option, into))]
    pub sandbox: Option<String>,
}

/// Return per-subcluster draining status rows.
pub async fn get_draining_status(
    options: &mut GetDrainingStatusOptions,
) -> Result<Vec<DrainingStatus>> {
    options.db.validate_analyze(CmdType::GetDrainingStatus)?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, options.sandbox.as_deref()).await?;
    let scope = options.sandbox.as_deref().unwrap_or(MAIN_CLUSTER);
    let initiators = vdb.primary_up_hosts_in_sandbox(scope);
    if initiators.is_empty() {
        return Err(OpsError::Precondition(
            "no primary UP node is available to read draining status".into(),
        ));
    }
    let mut instructions: Vec<Box<dyn ClusterOp>> =
        vec![Box::new(HttpsGetDrainingStatusOp::new(initiators))];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to get draining status"))?;
    Ok(ctx.draining_statuses()?.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;

    fn options(action: DrainingAction) -> ManageConnectionDrainingOptions {
        ManageConnectionDrainingOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .subcluster("sc1")
            .action(action)
            .build()
    }

    #[test]
    fn redirect_without_hostname_is_rejected_with_exact_message() {
        let mut opts = options(DrainingAction::Redirect);
        let err = opts.validate_analyze().unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Validation error: hostname to redirect to must not be empty when manage connection draining action is \"redirect\""
        );
    }

    #[test]
    fn pause_needs_no_hostname() {
        let mut opts = options(DrainingAction::Pause);
        opts.validate_analyze().unwrap();
    }

    #[test]
    fn redirect_with_hostname_passes_validation() {
        let mut opts = options(DrainingAction::Redirect);
        opts.redirect_hostname = Some("standby.example.com".into());
        opts.validate_analyze().unwrap();
    }
}
