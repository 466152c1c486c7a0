//! License commands

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::HttpsInstallLicenseOp;
use crate::vdb::MAIN_CLUSTER;
use crate::workflows::{DatabaseOptions, fetch};
use tracing::info;
use typed_builder::TypedBuilder;

/// Options for installing or checking a license. Checking is the same
/// wire call with the dry-run flag, so one options type covers both.
#[derive(Debug, Clone, TypedBuilder)]
pub struct UpgradeLicenseOptions {
    pub db: DatabaseOptions,
    /// Path of the license file on the initiator host.
    #[builder(setter(into))]
    pub license_file: String,
    /// Validate the license without installing it.
    #[builder(default)]
    pub check_only: bool,
}

impl UpgradeLicenseOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::UpgradeLicense)?;
        if self.license_file.is_empty() {
            return Err(OpsError::Validation("license file path must not be empty".into()));
        }
        if !self.license_file.starts_with('/') {
            return Err(OpsError::Validation(format!(
                "license file path \"{}\" must be an absolute path",
                self.license_file
            )));
        }
        Ok(())
    }
}

pub async fn upgrade_license(options: &mut UpgradeLicenseOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let initiators = vdb.primary_up_hosts_in_sandbox(MAIN_CLUSTER);
    let Some(initiator) = initiators.first() else {
        return Err(OpsError::Precondition(
            "no primary UP node is available to install the license".into(),
        ));
    };
    let mut op = HttpsInstallLicenseOp::new(vec![initiator.clone()], options.license_file.clone());
    if options.check_only {
        op = op.dry_run();
    }
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(op)];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to upgrade license"))?;
    if !options.check_only {
        info!(db = %options.db.db_name, "license installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;

    #[test]
    fn relative_license_path_is_rejected() {
        let mut opts = UpgradeLicenseOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .license_file("license.key")
            .build();
        assert!(opts.validate_analyze().unwrap_err().is_validation());
    }
}
