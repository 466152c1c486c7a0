//! Drop a stopped database and remove its directories

use crate::cmd::CmdType;
use crate::error::Result;
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::nma_cluster::NmaHealthOp;
use crate::ops::nma_files::NmaDeleteDirsOp;
use crate::workflows::DatabaseOptions;
use tracing::info;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DropDbOptions {
    pub db: DatabaseOptions,
    /// Remove directories even when they still hold data. Dropping
    /// defaults to force removal.
    #[builder(default = true)]
    pub force_delete: bool,
    /// Keep the depot directory (useful when the host will be re-used).
    #[builder(default)]
    pub retain_depot: bool,
}

impl DropDbOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::DropDb)
    }

    /// Directories removed on every host.
    fn directories(&self) -> Vec<String> {
        let mut dirs = Vec::new();
        for prefix in [&self.db.catalog_prefix, &self.db.data_prefix] {
            if !prefix.is_empty() {
                dirs.push(format!("{prefix}/{}", self.db.db_name));
            }
        }
        if !self.retain_depot && !self.db.depot_prefix.is_empty() {
            dirs.push(format!("{}/{}", self.db.depot_prefix, self.db.db_name));
        }
        dirs.dedup();
        dirs
    }
}

pub fn produce_drop_db_instructions(options: &DropDbOptions) -> Vec<Box<dyn ClusterOp>> {
    vec![
        Box::new(NmaHealthOp::new(options.db.hosts.clone())),
        Box::new(NmaDeleteDirsOp::new(
            options.db.hosts.clone(),
            options.directories(),
            options.force_delete,
        )),
    ]
}

/// Drop the database. Every host must be reachable: if the health check
/// fails anywhere, no directory is touched on any host.
pub async fn drop_database(options: &mut DropDbOptions) -> Result<()> {
    options.validate_analyze()?;
    let mut instructions = produce_drop_db_instructions(options);
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run(&mut instructions, &mut ctx)
        .await
        .map_err(|e| e.with_step("fail to drop database"))?;
    info!(db = %options.db.db_name, "database dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;

    fn options() -> DropDbOptions {
        DropDbOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .catalog_prefix("/cat")
                .data_prefix("/dat")
                .depot_prefix("/dep")
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .build()
    }

    #[test]
    fn force_delete_defaults_on() {
        let opts = options();
        assert!(opts.force_delete);
    }

    #[test]
    fn directories_cover_all_prefixes() {
        let mut opts = options();
        opts.validate_analyze().unwrap();
        assert_eq!(
            opts.directories(),
            vec!["/cat/db".to_string(), "/dat/db".to_string(), "/dep/db".to_string()]
        );
    }

    #[test]
    fn retain_depot_keeps_depot_directory() {
        let mut opts = options();
        opts.retain_depot = true;
        opts.validate_analyze().unwrap();
        assert!(!opts.directories().contains(&"/dep/db".to_string()));
    }

    #[test]
    fn health_check_precedes_directory_removal() {
        let mut opts = options();
        opts.validate_analyze().unwrap();
        let instructions = produce_drop_db_instructions(&opts);
        assert_eq!(instructions[0].name(), "NMAHealthOp");
        assert_eq!(instructions[1].name(), "NMADeleteDirsOp");
    }
}
