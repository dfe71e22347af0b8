//! Find-Role Procedure
//!
//! Wraps the peer role resolution service. Completion only signals that
//! resolution finished; the resolved role reaches the goal layer through its
//! own subscription.

use super::{expect_params, Completer, Context, ContractViolation, Lifecycle, Procedure};
use crate::domain::models::{
    FindRoleParams, ProcResult, ProcedureId, ProcedureParams, RoleNotification, SubsystemEvent,
    Topic,
};
use tracing::{debug, warn};

pub struct FindRole {
    lifecycle: Lifecycle,
}

impl FindRole {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
        }
    }

    fn params(params: &ProcedureParams) -> Result<FindRoleParams, ContractViolation> {
        expect_params(ProcedureId::FindRole, params, |p| match p {
            ProcedureParams::FindRole(params) => Some(*params),
            _ => None,
        })
    }
}

impl Default for FindRole {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for FindRole {
    fn id(&self) -> ProcedureId {
        ProcedureId::FindRole
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
        let params = Self::params(params)?;
        self.lifecycle.arm(completer)?;

        debug!("Find role starting (timeout={:?})", params.timeout);
        ctx.dispatcher.subscribe(Topic::RoleResolution, self.id());
        ctx.services.role_resolver.find_role(params.timeout);

        Ok(ProcResult::Success)
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        self.lifecycle.begin_cancel(self.id())?;

        // Wait for the service to confirm with a Cancelled notification
        debug!("Find role cancelling");
        ctx.services.role_resolver.cancel_find_role();
        Ok(())
    }

    fn handle_event(
        &mut self,
        ctx: &mut Context<'_>,
        event: &SubsystemEvent,
    ) -> Result<(), ContractViolation> {
        let SubsystemEvent::RoleResolution(notification) = event else {
            return Ok(());
        };
        if !self.lifecycle.is_active() {
            debug!("Find role ignoring {:?} while idle", notification);
            return Ok(());
        }

        ctx.dispatcher.unsubscribe(Topic::RoleResolution, self.id());
        match notification {
            RoleNotification::NoPeer
            | RoleNotification::ActingPrimary
            | RoleNotification::Primary
            | RoleNotification::Secondary => {
                debug!("Find role resolved: {:?}", notification);
                self.lifecycle.complete(ctx, ProcResult::Success);
            }
            RoleNotification::Cancelled if self.lifecycle.is_cancelling() => {
                debug!("Find role cancelled");
                self.lifecycle.confirm_cancel(ctx, ProcResult::Success);
            }
            RoleNotification::Cancelled => {
                warn!("Find role cancelled by the service without a request");
                self.lifecycle.complete(ctx, ProcResult::Failed);
            }
        }
        Ok(())
    }
}
