//! Engine lifecycle tests: ordering, skip, abort, finalize semantics

use async_trait::async_trait;
use eon_ops::{
    AgentClient, AuthMode, Cardinality, ClusterOp, ClusterOpEngine, CredentialSet, Dispatcher,
    ExecContext, OpBase, OpsError,
};
use std::sync::{Arc, Mutex};

type CallLog = Arc<Mutex<Vec<String>>>;

/// Scripted operation that records its lifecycle calls.
#[derive(Debug)]
struct ScriptedOp {
    base: OpBase,
    log: CallLog,
    skip_in_prepare: bool,
    fail_in_execute: bool,
}

impl ScriptedOp {
    fn new(name: &'static str, log: CallLog) -> Self {
        Self {
            base: OpBase::new(name, "scripted", AuthMode::Https, Cardinality::PerHost),
            log,
            skip_in_prepare: false,
            fail_in_execute: false,
        }
    }

    fn skipping(mut self) -> Self {
        self.skip_in_prepare = true;
        self
    }

    fn failing(mut self) -> Self {
        self.fail_in_execute = true;
        self
    }

    fn record(&self, stage: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{stage}", self.base.name));
    }
}

#[async_trait]
impl ClusterOp for ScriptedOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> eon_ops::Result<()> {
        self.record("prepare");
        if self.skip_in_prepare {
            self.base.skip = true;
        }
        Ok(())
    }

    async fn execute(&mut self, _ctx: &mut ExecContext) -> eon_ops::Result<()> {
        self.record("execute");
        if self.fail_in_execute {
            return Err(OpsError::Precondition("scripted failure".into()));
        }
        Ok(())
    }

    async fn finalize(&mut self, _ctx: &mut ExecContext) -> eon_ops::Result<()> {
        self.record("finalize");
        Ok(())
    }
}

fn context() -> ExecContext {
    let client = AgentClient::builder().build().unwrap();
    ExecContext::new(Dispatcher::new(client))
}

fn engine() -> ClusterOpEngine {
    ClusterOpEngine::new(CredentialSet::password(Some("dbadmin".into()), "pw"))
}

#[tokio::test]
async fn operations_run_once_in_listed_order() {
    let log: CallLog = Arc::default();
    let mut ops: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(ScriptedOp::new("first", log.clone())),
        Box::new(ScriptedOp::new("second", log.clone())),
    ];
    engine().run(&mut ops, &mut context()).await.unwrap();
    assert_eq!(
        log.lock().unwrap().as_slice(),
        [
            "first:prepare",
            "first:execute",
            "first:finalize",
            "second:prepare",
            "second:execute",
            "second:finalize",
        ]
    );
}

#[tokio::test]
async fn skipped_operations_are_not_executed() {
    let log: CallLog = Arc::default();
    let mut ops: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(ScriptedOp::new("skipped", log.clone()).skipping()),
        Box::new(ScriptedOp::new("after", log.clone())),
    ];
    engine().run(&mut ops, &mut context()).await.unwrap();
    let calls = log.lock().unwrap();
    assert!(!calls.contains(&"skipped:execute".to_string()));
    // but it still gets its finalize pass, and later ops still run
    assert!(calls.contains(&"skipped:finalize".to_string()));
    assert!(calls.contains(&"after:execute".to_string()));
}

#[tokio::test]
async fn first_failure_stops_the_pipeline() {
    let log: CallLog = Arc::default();
    let mut ops: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(ScriptedOp::new("ok", log.clone())),
        Box::new(ScriptedOp::new("boom", log.clone()).failing()),
        Box::new(ScriptedOp::new("never", log.clone())),
    ];
    let err = engine().run(&mut ops, &mut context()).await.unwrap_err();
    assert!(matches!(err, OpsError::Precondition(_)));

    let calls = log.lock().unwrap();
    // the failing op is finalized for cleanup, the rest never starts
    assert!(calls.contains(&"boom:finalize".to_string()));
    assert!(!calls.iter().any(|c| c.starts_with("never:")));
}

#[tokio::test]
async fn password_credentials_are_applied_to_https_ops() {
    #[derive(Debug)]
    struct CheckCredsOp {
        base: OpBase,
    }

    #[async_trait]
    impl ClusterOp for CheckCredsOp {
        fn base(&self) -> &OpBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut OpBase {
            &mut self.base
        }

        async fn prepare(&mut self, _ctx: &mut ExecContext) -> eon_ops::Result<()> {
            // credentials must be injected before prepare runs
            assert!(self.base.use_password);
            assert_eq!(self.base.username.as_deref(), Some("dbadmin"));
            Ok(())
        }

        async fn execute(&mut self, _ctx: &mut ExecContext) -> eon_ops::Result<()> {
            Ok(())
        }
    }

    let mut ops: Vec<Box<dyn ClusterOp>> = vec![Box::new(CheckCredsOp {
        base: OpBase::new("check", "check creds", AuthMode::Https, Cardinality::ClusterWide),
    })];
    engine().run(&mut ops, &mut context()).await.unwrap();
}

#[tokio::test]
async fn sandbox_scope_is_seeded_into_the_context() {
    #[derive(Debug)]
    struct CheckSandboxOp {
        base: OpBase,
    }

    #[async_trait]
    impl ClusterOp for CheckSandboxOp {
        fn base(&self) -> &OpBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut OpBase {
            &mut self.base
        }

        async fn prepare(&mut self, ctx: &mut ExecContext) -> eon_ops::Result<()> {
            assert_eq!(ctx.sandbox(), Some("sand1"));
            Ok(())
        }

        async fn execute(&mut self, _ctx: &mut ExecContext) -> eon_ops::Result<()> {
            Ok(())
        }
    }

    let engine = ClusterOpEngine::run_in_sandbox(
        CredentialSet::password(Some("dbadmin".into()), "pw"),
        "sand1",
    );
    let mut ops: Vec<Box<dyn ClusterOp>> = vec![Box::new(CheckSandboxOp {
        base: OpBase::new("check", "check sandbox", AuthMode::Https, Cardinality::ClusterWide),
    })];
    engine.run(&mut ops, &mut context()).await.unwrap();
}
