//! Configuration commands

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::HttpsSetConfigParamOp;
use crate::ops::nma_catalog::{ConfFile, NmaSetConfigParamOp, NmaUploadConfOp};
use crate::vdb::{CoordinationDatabase, MAIN_CLUSTER};
use crate::workflows::{DatabaseOptions, fetch};
use tracing::info;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct SetConfigParamOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub parameter: String,
    #[builder(setter(into))]
    pub value: String,
    /// Parameter level (database, node, ...); server default when unset.
    #[builder(default, setter(strip_option, into))]
    pub level: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub sandbox: Option<String>,
    /// Write through the NMA instead of the catalog service. Required
    /// when the database is down and the parameter must be in place
    /// before it starts.
    #[builder(default)]
    pub via_nma: bool,
}

impl SetConfigParamOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::SetConfigurationParameter)?;
        if self.parameter.is_empty() {
            return Err(OpsError::Validation("parameter name must not be empty".into()));
        }
        Ok(())
    }
}

pub async fn set_configuration_parameter(options: &mut SetConfigParamOptions) -> Result<()> {
    options.validate_analyze()?;
    if options.via_nma {
        // the database is down; the NMA writes straight into the catalog
        let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(NmaSetConfigParamOp::new(
            vec![options.db.hosts[0].clone()],
            options.parameter.clone(),
            options.value.clone(),
            options.level.clone(),
        ))];
        let mut ctx = options.db.make_context()?;
        let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
        return engine
            .run(&mut instructions, &mut ctx)
            .await
            .map_err(|e| e.with_step("fail to set configuration parameter"));
    }
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, options.sandbox.as_deref()).await?;
    let scope = options.sandbox.as_deref().unwrap_or(MAIN_CLUSTER);
    let initiators = vdb.primary_up_hosts_in_sandbox(scope);
    let Some(initiator) = initiators.first() else {
        return Err(OpsError::Precondition(
            "no primary UP node is available to set the parameter".into(),
        ));
    };
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsSetConfigParamOp::new(
        vec![initiator.clone()],
        options.parameter.clone(),
        options.value.clone(),
        options.level.clone(),
        options.sandbox.clone(),
    ))];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to set configuration parameter"))?;
    info!(parameter = %options.parameter, "configuration parameter set");
    Ok(())
}

/// Render the node sections of `vertica.conf` from the topology snapshot.
pub fn render_vertica_conf(vdb: &CoordinationDatabase) -> String {
    let mut out = String::new();
    out.push_str(&format!("[database]\nname = {}\n\n", vdb.name));
    for node in vdb.nodes() {
        out.push_str(&format!(
            "[node.{}]\naddress = {}\ncatalog = {}\n\n",
            node.name, node.address, node.catalog_path
        ));
    }
    out
}

/// Render `spread.conf` membership from the topology snapshot. Only
/// primary nodes participate in control messaging.
pub fn render_spread_conf(vdb: &CoordinationDatabase) -> String {
    let mut out = String::from("Spread_Segment 255.255.255.255:4803 {\n");
    for node in vdb.nodes().filter(|n| n.is_primary) {
        out.push_str(&format!("    {} {}\n", node.name, node.address));
    }
    out.push_str("}\n");
    out
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct ManageConfigRecoverOptions {
    pub db: DatabaseOptions,
}

/// Rebuild `vertica.conf` and `spread.conf` on the input hosts from the
/// communal cluster description, for hosts that lost their local config.
pub async fn manage_config_recover(options: &mut ManageConfigRecoverOptions) -> Result<()> {
    options.db.validate_analyze(CmdType::ManageConfigRecover)?;
    let scope = options.db.db_name.clone();
    let vdb = fetch::fetch_vdb_from_communal(&options.db, &scope).await?;

    let vertica_conf = render_vertica_conf(&vdb);
    let spread_conf = render_spread_conf(&vdb);
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaUploadConfOp::new(
            options.db.hosts.clone(),
            ConfFile::VerticaConf,
            vertica_conf,
        )),
        Box::new(NmaUploadConfOp::new(
            options.db.hosts.clone(),
            ConfFile::SpreadConf,
            spread_conf,
        )),
    ];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to recover configuration files"))?;
    Ok(())
}
