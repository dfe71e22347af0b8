//! Cancel-Find-Role Procedure
//!
//! Stops any role resolution in progress and waits for the service to
//! confirm it.

use super::{expect_no_params, Completer, Context, ContractViolation, Lifecycle, Procedure};
use crate::domain::models::{
    ProcResult, ProcedureId, ProcedureParams, RoleNotification, SubsystemEvent, Topic,
};
use tracing::debug;

pub struct CancelFindRole {
    lifecycle: Lifecycle,
}

impl CancelFindRole {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
        }
    }
}

impl Default for CancelFindRole {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for CancelFindRole {
    fn id(&self) -> ProcedureId {
        ProcedureId::CancelFindRole
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
        expect_no_params(self.id(), params)?;
        self.lifecycle.arm(completer)?;

        ctx.dispatcher.subscribe(Topic::RoleResolution, self.id());
        ctx.services.role_resolver.cancel_find_role();
        Ok(ProcResult::Success)
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        self.lifecycle.begin_cancel(self.id())?;
        ctx.dispatcher.unsubscribe(Topic::RoleResolution, self.id());
        self.lifecycle.confirm_cancel(ctx, ProcResult::Success);
        Ok(())
    }

    fn handle_event(
        &mut self,
        ctx: &mut Context<'_>,
        event: &SubsystemEvent,
    ) -> Result<(), ContractViolation> {
        if !self.lifecycle.is_active() {
            return Ok(());
        }
        if let SubsystemEvent::RoleResolution(RoleNotification::Cancelled) = event {
            debug!("Role resolution stopped");
            ctx.dispatcher.unsubscribe(Topic::RoleResolution, self.id());
            self.lifecycle.complete(ctx, ProcResult::Success);
        }
        Ok(())
    }
}
