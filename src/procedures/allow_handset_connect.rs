//! Allow-Handset-Connect Procedure
//!
//! Policy toggle gating handset connections. Touches no subsystem and
//! completes inline.

use super::{expect_params, Completer, Context, ContractViolation, Lifecycle, Procedure};
use crate::domain::models::{ProcResult, ProcedureId, ProcedureParams};
use tracing::debug;

pub struct AllowHandsetConnect {
    lifecycle: Lifecycle,
}

impl AllowHandsetConnect {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
        }
    }
}

impl Default for AllowHandsetConnect {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for AllowHandsetConnect {
    fn id(&self) -> ProcedureId {
        ProcedureId::AllowHandsetConnect
    }

    fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    fn start(
        &mut self,
        ctx: &mut Context<'_>,
        completer: Completer,
        params: &ProcedureParams,
    ) -> Result<ProcResult, ContractViolation> {
        let allow = expect_params(self.id(), params, |p| match p {
            ProcedureParams::AllowHandsetConnect(allow) => Some(*allow),
            _ => None,
        })?;
        self.lifecycle.arm(completer)?;

        debug!("Handset connect allowed: {}", allow);
        ctx.state.handset_connect_allowed = allow;

        self.lifecycle.complete(ctx, ProcResult::Success);
        Ok(ProcResult::Success)
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        self.lifecycle.confirm_cancel(ctx, ProcResult::Success);
        Ok(())
    }
}
