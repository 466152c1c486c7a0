//! Data-collector table reads through the NMA
//!
//! These endpoints make the NMA run a SQL query against the local
//! database, so the request must tunnel database credentials in the
//! `sql_endpoint_data` payload.

use crate::context::ExecContext;
use crate::error::Result;
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase};
use crate::request::HttpMethod;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;

/// Database credentials tunneled through the NMA for SQL execution.
/// Mandatory on every endpoint that queries the database.
#[derive(Clone, Serialize)]
pub struct SqlEndpointData {
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
}

impl fmt::Debug for SqlEndpointData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlEndpointData")
            .field("db_user", &self.db_user)
            .field("db_password", &"<redacted>")
            .field("db_name", &self.db_name)
            .finish()
    }
}

/// Time window for data-collector queries, RFC 3339 strings.
#[derive(Debug, Clone, Default)]
pub struct DcTimeRange {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Read session-start rows from the data collector.
#[derive(Debug)]
pub struct NmaDcSessionStartsOp {
    base: OpBase,
    initiator: Vec<String>,
    sql_endpoint: SqlEndpointData,
    range: DcTimeRange,
}

impl NmaDcSessionStartsOp {
    pub fn new(initiator: Vec<String>, sql_endpoint: SqlEndpointData, range: DcTimeRange) -> Self {
        Self {
            base: OpBase::new(
                "NMADcSessionStartsOp",
                "Collect session start rows",
                AuthMode::Nma,
                Cardinality::QuorumOne,
            ),
            initiator,
            sql_endpoint,
            range,
        }
    }
}

fn dc_body(sql_endpoint: &SqlEndpointData, range: &DcTimeRange) -> Value {
    let mut body = json!({
        "sql_endpoint_data": {
            "db_user": sql_endpoint.db_user,
            "db_password": sql_endpoint.db_password,
            "db_name": sql_endpoint.db_name,
        }
    });
    if let Some(start) = &range.start_time {
        body["start_time"] = json!(start);
    }
    if let Some(end) = &range.end_time {
        body["end_time"] = json!(end);
    }
    body
}

#[async_trait]
impl ClusterOp for NmaDcSessionStartsOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(HttpMethod::Post, "dc/session-starts");
        request.body = Some(dc_body(&self.sql_endpoint, &self.range));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        let winner = self.base.winning_result()?;
        let rows: Vec<Value> = winner.parse()?;
        ctx.set_dc_session_starts(rows);
        Ok(())
    }
}

/// Read rows describing releases missing from the data collector.
#[derive(Debug)]
pub struct NmaDcMissingReleasesOp {
    base: OpBase,
    initiator: Vec<String>,
    sql_endpoint: SqlEndpointData,
    range: DcTimeRange,
}

impl NmaDcMissingReleasesOp {
    pub fn new(initiator: Vec<String>, sql_endpoint: SqlEndpointData, range: DcTimeRange) -> Self {
        Self {
            base: OpBase::new(
                "NMADcMissingReleasesOp",
                "Collect missing release rows",
                AuthMode::Nma,
                Cardinality::QuorumOne,
            ),
            initiator,
            sql_endpoint,
            range,
        }
    }
}

#[async_trait]
impl ClusterOp for NmaDcMissingReleasesOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(HttpMethod::Post, "dc/missing-releases");
        request.body = Some(dc_body(&self.sql_endpoint, &self.range));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        let winner = self.base.winning_result()?;
        let rows: Vec<Value> = winner.parse()?;
        ctx.set_dc_missing_releases(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_endpoint_debug_redacts_password() {
        let data = SqlEndpointData {
            db_user: "dbadmin".into(),
            db_password: "hunter2".into(),
            db_name: "db".into(),
        };
        let rendered = format!("{data:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("dbadmin"));
    }

    #[test]
    fn dc_body_includes_time_range_when_present() {
        let data = SqlEndpointData {
            db_user: "dbadmin".into(),
            db_password: "pw".into(),
            db_name: "db".into(),
        };
        let range = DcTimeRange {
            start_time: Some("2026-01-01T00:00:00Z".into()),
            end_time: None,
        };
        let body = dc_body(&data, &range);
        assert_eq!(body["start_time"], "2026-01-01T00:00:00Z");
        assert!(body.get("end_time").is_none());
        assert_eq!(body["sql_endpoint_data"]["db_name"], "db");
    }
}
