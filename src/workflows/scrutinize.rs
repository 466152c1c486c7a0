//! Diagnostics collection (scrutinize)

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::HttpsGetUpNodesOp;
use crate::ops::nma_dc::{DcTimeRange, NmaDcMissingReleasesOp, NmaDcSessionStartsOp};
use crate::ops::nma_files::{NmaStageCommandsOp, NmaStageDirectoryOp};
use crate::workflows::DatabaseOptions;
use tracing::warn;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ScrutinizeOptions {
    pub db: DatabaseOptions,
    /// Identifier for this collection run, used in staging paths.
    #[builder(setter(into))]
    pub scrutinize_id: String,
    /// Also query data-collector tables (needs password credentials).
    #[builder(default = true)]
    pub include_dc_tables: bool,
    #[builder(default)]
    pub time_range: DcTimeRange,
}

impl ScrutinizeOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::Scrutinize)?;
        if self.scrutinize_id.is_empty() {
            return Err(OpsError::Validation("scrutinize id must not be empty".into()));
        }
        if !self
            .scrutinize_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(OpsError::Validation(format!(
                "scrutinize id \"{}\" contains invalid characters",
                self.scrutinize_id
            )));
        }
        Ok(())
    }
}

/// Collect diagnostics from the up hosts. Returns the staging directory,
/// or `None` when no host was up to collect from.
pub async fn scrutinize(options: &mut ScrutinizeOptions) -> Result<Option<String>> {
    options.validate_analyze()?;
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());

    // Collection is best-effort: a cluster with nothing up yields a
    // warning, not an error.
    let mut probe: Vec<Box<dyn ClusterOp>> =
        vec![Box::new(HttpsGetUpNodesOp::new(options.db.hosts.clone()))];
    if let Err(err) = engine.run(&mut probe, &mut ctx).await {
        if matches!(err, OpsError::Precondition(_)) {
            warn!("no up host available, skipping diagnostics collection");
            return Ok(None);
        }
        return Err(err.with_step("fail to collect diagnostics"));
    }

    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaStageDirectoryOp::new(options.scrutinize_id.clone(), "main")),
        Box::new(NmaStageCommandsOp::new(options.scrutinize_id.clone(), "main")),
    ];
    if options.include_dc_tables {
        let sql_endpoint = options.db.sql_endpoint_data()?;
        let initiators = ctx.up_hosts()?.clone();
        instructions.push(Box::new(NmaDcSessionStartsOp::new(
            initiators.clone(),
            sql_endpoint.clone(),
            options.time_range.clone(),
        )));
        instructions.push(Box::new(NmaDcMissingReleasesOp::new(
            initiators,
            sql_endpoint,
            options.time_range.clone(),
        )));
    }
    engine
        .run(&mut instructions, &mut ctx)
        .await
        .map_err(|e| e.with_step("fail to collect diagnostics"))?;
    Ok(ctx.staging_dir().ok().cloned())
}
