//! Package installation command

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::{HttpsInstallPackagesOp, PackageStatus};
use crate::vdb::MAIN_CLUSTER;
use crate::workflows::{DatabaseOptions, fetch};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct InstallPackagesOptions {
    pub db: DatabaseOptions,
    /// Reinstall packages that are already installed.
    #[builder(default)]
    pub force_reinstall: bool,
}

impl InstallPackagesOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::InstallPackages)
    }
}

/// Install the default packages and return the per-package outcomes.
pub async fn install_packages(options: &mut InstallPackagesOptions) -> Result<Vec<PackageStatus>> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let initiators = vdb.primary_up_hosts_in_sandbox(MAIN_CLUSTER);
    let Some(initiator) = initiators.first() else {
        return Err(OpsError::Precondition(
            "no primary UP node is available to install packages".into(),
        ));
    };
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsInstallPackagesOp::new(
        vec![initiator.clone()],
        options.force_reinstall,
    ))];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to install packages"))?;
    Ok(ctx.package_statuses()?.clone())
}
