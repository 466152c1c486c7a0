//! Cluster operation engine
//!
//! Runs an ordered list of operations against one execution context. The
//! engine applies credentials, honors skip flags, stops at the first error
//! from `prepare` or `execute`, and treats `finalize` failures as
//! log-only. It never retries; retries live inside operations that
//! explicitly opt in.

use crate::context::ExecContext;
use crate::credentials::CredentialSet;
use crate::error::Result;
use crate::ops::ClusterOp;
use crate::vdb::CoordinationDatabase;
use tracing::{debug, info, warn};

pub struct ClusterOpEngine {
    credentials: CredentialSet,
    sandbox: Option<String>,
}

impl ClusterOpEngine {
    pub fn new(credentials: CredentialSet) -> Self {
        Self {
            credentials,
            sandbox: None,
        }
    }

    /// Scope the run to one sandbox: the context is seeded with the
    /// sandbox filter so downstream operations pick initiators inside it.
    pub fn run_in_sandbox(
        credentials: CredentialSet,
        sandbox: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            sandbox: Some(sandbox.into()),
        }
    }

    /// Seed the context with a pre-built vdb and run the instruction list.
    pub async fn run_with_vdb(
        &self,
        ops: &mut [Box<dyn ClusterOp>],
        ctx: &mut ExecContext,
        vdb: CoordinationDatabase,
    ) -> Result<()> {
        ctx.set_vdb(vdb);
        self.run(ops, ctx).await
    }

    /// Run each operation in listed order. Each operation is invoked
    /// exactly once; skipped operations are prepared and finalized but not
    /// executed.
    pub async fn run(&self, ops: &mut [Box<dyn ClusterOp>], ctx: &mut ExecContext) -> Result<()> {
        if let Some(sandbox) = &self.sandbox {
            ctx.set_sandbox(sandbox.clone());
        }

        for op in ops.iter_mut() {
            op.base_mut().apply_credentials(&self.credentials);
            ctx.progress().update(op.description());
            debug!(op = op.name(), "preparing operation");

            op.prepare(ctx).await?;

            if op.skipped() {
                info!(op = op.name(), "operation skipped, nothing to do");
            } else if let Err(err) = op.execute(ctx).await {
                // Give the failing op its cleanup pass before stopping.
                if let Err(fin_err) = op.finalize(ctx).await {
                    warn!(op = op.name(), error = %fin_err, "finalize after failure also failed");
                }
                return Err(err);
            }

            if let Err(fin_err) = op.finalize(ctx).await {
                warn!(op = op.name(), error = %fin_err, "finalize failed, continuing");
            }
        }
        Ok(())
    }
}
