//! Archive and restore-point commands

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_restore::{
    HttpsCreateArchiveOp, HttpsSaveRestorePointOp, HttpsShowRestorePointsOp, RestorePoint,
    RestorePointFilter,
};
use crate::vdb::{CoordinationDatabase, MAIN_CLUSTER};
use crate::workflows::{DatabaseOptions, fetch, validate_object_name};
use typed_builder::TypedBuilder;

fn up_initiators(vdb: &CoordinationDatabase, scope: &str) -> Result<Vec<String>> {
    let initiators = vdb.primary_up_hosts_in_sandbox(scope);
    if initiators.is_empty() {
        return Err(OpsError::Precondition(
            "no primary UP node is available".into(),
        ));
    }
    Ok(initiators)
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct ShowRestorePointsOptions {
    pub db: DatabaseOptions,
    #[builder(default, setter(strip_option, into))]
    pub archive_name: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub restore_point_id: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub start_timestamp: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub end_timestamp: Option<String>,
}

impl ShowRestorePointsOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::ShowRestorePoints)?;
        if let Some(archive) = &self.archive_name {
            validate_object_name(archive, "archive")?;
        }
        Ok(())
    }

    fn filter(&self) -> RestorePointFilter {
        RestorePointFilter {
            archive_name: self.archive_name.clone(),
            restore_point_id: self.restore_point_id.clone(),
            start_timestamp: self.start_timestamp.clone(),
            end_timestamp: self.end_timestamp.clone(),
        }
    }
}

/// List restore points, optionally filtered by archive, id, or time range.
pub async fn show_restore_points(
    options: &mut ShowRestorePointsOptions,
) -> Result<Vec<RestorePoint>> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let initiators = up_initiators(&vdb, MAIN_CLUSTER)?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsShowRestorePointsOp::new(
        initiators,
        options.filter(),
    ))];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to show restore points"))?;
    Ok(ctx.restore_points()?.clone())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct SaveRestorePointOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub archive_name: String,
    #[builder(default, setter(strip_option, into))]
    pub sandbox: Option<String>,
}

impl SaveRestorePointOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::SaveRestorePoint)?;
        validate_object_name(&self.archive_name, "archive")
    }
}

pub async fn save_restore_point(options: &mut SaveRestorePointOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, options.sandbox.as_deref()).await?;
    let scope = options.sandbox.as_deref().unwrap_or(MAIN_CLUSTER);
    let initiators = up_initiators(&vdb, scope)?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsSaveRestorePointOp::new(
        vec![initiators[0].clone()],
        options.archive_name.clone(),
        options.sandbox.clone(),
    ))];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to save restore point"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct CreateArchiveOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub archive_name: String,
    /// Cap on restore points kept in the archive.
    #[builder(default, setter(strip_option))]
    pub num_restore_points: Option<u32>,
}

impl CreateArchiveOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::CreateArchive)?;
        validate_object_name(&self.archive_name, "archive")?;
        if self.num_restore_points == Some(0) {
            return Err(OpsError::Validation(
                "the restore point limit must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub async fn create_archive(options: &mut CreateArchiveOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let initiators = up_initiators(&vdb, MAIN_CLUSTER)?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsCreateArchiveOp::new(
        vec![initiators[0].clone()],
        options.archive_name.clone(),
        options.num_restore_points,
    ))];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to create archive"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;

    #[test]
    fn zero_restore_point_limit_is_rejected() {
        let mut opts = CreateArchiveOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .archive_name("weekly")
            .num_restore_points(0)
            .build();
        assert!(opts.validate_analyze().unwrap_err().is_validation());
    }

    #[test]
    fn filter_carries_all_dimensions() {
        let mut opts = ShowRestorePointsOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .archive_name("weekly")
            .start_timestamp("2026-01-01T00:00:00Z")
            .build();
        opts.validate_analyze().unwrap();
        let filter = opts.filter();
        assert_eq!(filter.archive_name.as_deref(), Some("weekly"));
        assert_eq!(filter.start_timestamp.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert!(filter.restore_point_id.is_none());
    }
}
