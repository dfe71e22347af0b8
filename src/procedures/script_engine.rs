//! Script Engine
//!
//! Runs a script's steps one at a time so the whole script looks like one
//! procedure to its client. A step is started only after the previous
//! step's completion has been delivered. A failed or timed out step stops
//! the script and its result is passed on unchanged.

use super::scripts::Script;
use super::{Completer, Context, ContractViolation, Procedures};
use crate::domain::models::{Client, ConfirmKind, Confirmation, ProcResult, ProcedureId};
use tracing::{debug, info, warn};

struct Run {
    script: &'static Script,
    step: usize,
    completer: Completer,
}

impl Run {
    fn current(&self) -> Option<ProcedureId> {
        self.script.steps.get(self.step).map(|step| step.proc)
    }
}

#[derive(Default)]
enum EngineState {
    #[default]
    Idle,
    Active(Run),
    Cancelling(Run),
}

#[derive(Default)]
pub struct ScriptEngine {
    state: EngineState,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, EngineState::Idle)
    }

    /// Script being run, if any
    pub fn script(&self) -> Option<ProcedureId> {
        match &self.state {
            EngineState::Idle => None,
            EngineState::Active(run) | EngineState::Cancelling(run) => Some(run.script.id),
        }
    }

    pub fn start(
        &mut self,
        ctx: &mut Context<'_>,
        script: &'static Script,
        completer: Completer,
    ) -> Result<ProcResult, ContractViolation> {
        if self.is_active() {
            return Err(ContractViolation::AlreadyActive(script.id));
        }

        info!("Script {} starting ({} steps)", script.id, script.steps.len());
        self.state = EngineState::Active(Run {
            script,
            step: 0,
            completer,
        });
        self.start_step(ctx)?;
        Ok(ProcResult::Success)
    }

    /// Start the current step, or finish if there are none left
    fn start_step(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        let EngineState::Active(run) = &self.state else {
            return Ok(());
        };
        let script = run.script;
        let index = run.step;

        let Some(step) = script.steps.get(index) else {
            if let EngineState::Active(run) = std::mem::take(&mut self.state) {
                info!("Script {} complete", script.id);
                run.completer.complete(ctx, ProcResult::Success);
            }
            return Ok(());
        };

        debug!("Script {} step {}: {}", script.id, index, step.proc);
        let completer = Completer::new(step.proc, Client::Script);
        let result = Procedures::drive(ctx, step.proc, |procedure, ctx| {
            procedure.start(ctx, completer, &step.params)
        })?;

        if result != ProcResult::Success {
            return Err(ContractViolation::StepStartFailed {
                script: script.id,
                step: index,
                proc: step.proc,
                result,
            });
        }
        Ok(())
    }

    /// Cancel the running script by cancelling only its current step
    pub fn cancel(
        &mut self,
        ctx: &mut Context<'_>,
        id: ProcedureId,
    ) -> Result<(), ContractViolation> {
        let run = match std::mem::take(&mut self.state) {
            EngineState::Active(run) if run.script.id == id => run,
            other => {
                self.state = other;
                return Err(ContractViolation::NotActive(id));
            }
        };

        info!("Script {} cancelling at step {}", id, run.step);
        let current = run.current();
        self.state = EngineState::Cancelling(run);

        if let Some(step) = current {
            Procedures::drive(ctx, step, |procedure, ctx| {
                if procedure.is_active() {
                    procedure.cancel(ctx)
                } else {
                    // Its completion is already queued
                    debug!("Step {} already finished, waiting for its completion", step);
                    Ok(())
                }
            })?;
        }
        Ok(())
    }

    /// Terminal callback of the current step
    pub fn handle_confirmation(
        &mut self,
        ctx: &mut Context<'_>,
        cfm: Confirmation,
    ) -> Result<(), ContractViolation> {
        match std::mem::take(&mut self.state) {
            EngineState::Idle => {
                debug!("Script engine idle, dropping {:?}", cfm);
                Ok(())
            }
            EngineState::Active(run) if run.current() != Some(cfm.proc) => {
                warn!("Script {} ignoring confirmation from {}", run.script.id, cfm.proc);
                self.state = EngineState::Active(run);
                Ok(())
            }
            EngineState::Active(run) => match (cfm.kind, cfm.result) {
                (ConfirmKind::Cancelled, _) => {
                    self.state = EngineState::Active(run);
                    Err(ContractViolation::UnexpectedCancelConfirm(cfm.proc))
                }
                (ConfirmKind::Completed, ProcResult::Success) => {
                    self.state = EngineState::Active(Run {
                        step: run.step + 1,
                        ..run
                    });
                    self.start_step(ctx)
                }
                (ConfirmKind::Completed, result) => {
                    warn!(
                        "Script {} stopped at step {} ({}): {}",
                        run.script.id, run.step, cfm.proc, result
                    );
                    run.completer.complete(ctx, result);
                    Ok(())
                }
            },
            EngineState::Cancelling(run) if run.current() != Some(cfm.proc) => {
                warn!("Script {} ignoring confirmation from {}", run.script.id, cfm.proc);
                self.state = EngineState::Cancelling(run);
                Ok(())
            }
            EngineState::Cancelling(run) => {
                let result = match cfm.kind {
                    ConfirmKind::Cancelled => cfm.result,
                    // The step finished before it saw the cancel
                    ConfirmKind::Completed => ProcResult::Success,
                };
                info!("Script {} cancelled: {}", run.script.id, result);
                run.completer.confirm_cancel(ctx, result);
                Ok(())
            }
        }
    }
}
