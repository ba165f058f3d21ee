//! Post-backup workflow steps.
//!
//! A [`Workflow`] runs `setup` for every step, then `execute` in order, and
//! finally `teardown` for every step whose setup succeeded, in reverse. The
//! first failing `setup` or `execute` stops the forward phases.

use crate::standby::{HotStandby, SyncReport, SyncRequest};
use crate::utils::errors::{Result, SyncError};
use tracing::{debug, warn};

/// Data shared by the steps of one workflow run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub server: String,
    pub label: String,
    pub incremental: bool,
    /// Filled in by [`HotStandbyStep`]
    pub hot_standby: Option<SyncReport>,
}

impl WorkflowContext {
    pub fn new(server: impl Into<String>, label: impl Into<String>, incremental: bool) -> Self {
        Self {
            server: server.into(),
            label: label.into(),
            incremental,
            hot_standby: None,
        }
    }
}

pub trait WorkflowStep {
    fn name(&self) -> &'static str;

    fn setup(&mut self, _ctx: &mut WorkflowContext) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut WorkflowContext) -> Result<()>;

    fn teardown(&mut self, _ctx: &mut WorkflowContext) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct Workflow {
    steps: Vec<Box<dyn WorkflowStep>>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, step: impl WorkflowStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn run(&mut self, ctx: &mut WorkflowContext) -> Result<()> {
        let mut result = Ok(());
        let mut set_up = 0;

        for step in self.steps.iter_mut() {
            debug!("{} (setup): {}/{}", step.name(), ctx.server, ctx.label);
            if let Err(e) = step.setup(ctx) {
                result = Err(e);
                break;
            }
            set_up += 1;
        }

        if result.is_ok() {
            for step in self.steps.iter_mut() {
                debug!("{} (execute): {}/{}", step.name(), ctx.server, ctx.label);
                if let Err(e) = step.execute(ctx) {
                    result = Err(e);
                    break;
                }
            }
        }

        for step in self.steps[..set_up].iter_mut().rev() {
            debug!("{} (teardown): {}/{}", step.name(), ctx.server, ctx.label);
            if let Err(e) = step.teardown(ctx) {
                warn!("{} teardown failed: {}", step.name(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        result
    }
}

/// Synchronizes the hot standby directories after a backup.
pub struct HotStandbyStep {
    standby: HotStandby,
}

impl HotStandbyStep {
    pub fn new(standby: HotStandby) -> Self {
        Self { standby }
    }
}

impl WorkflowStep for HotStandbyStep {
    fn name(&self) -> &'static str {
        "Hot standby"
    }

    fn execute(&mut self, ctx: &mut WorkflowContext) -> Result<()> {
        let request = SyncRequest {
            label: ctx.label.clone(),
            incremental: ctx.incremental,
        };
        let report = self.standby.execute(&request);
        ctx.hot_standby = Some(report.clone());

        if report.is_success() {
            Ok(())
        } else {
            Err(SyncError::StandbyIncomplete {
                failed: report.failed,
                total: report.total,
            })
        }
    }
}
