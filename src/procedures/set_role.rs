//! Set-Role Procedure
//!
//! Records the role this earbud now holds. Completes inline.

use super::{expect_params, Completer, Context, ContractViolation, Lifecycle, Procedure};
use crate::domain::models::{ProcResult, ProcedureId, ProcedureParams};
use tracing::info;

pub struct SetRole {
    lifecycle: Lifecycle,
}

impl SetRole {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
        }
    }
}

impl Default for SetRole {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for SetRole {
    fn id(&self) -> ProcedureId {
        ProcedureId::SetRole
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
        let params = expect_params(self.id(), params, |p| match p {
            ProcedureParams::SetRole(params) => Some(*params),
            _ => None,
        })?;
        self.lifecycle.arm(completer)?;

        info!(
            "Role {:?} -> {:?} (acting={})",
            ctx.state.role, params.role, params.acting_in_role
        );
        ctx.state.role = params.role;
        ctx.state.acting_in_role = params.acting_in_role;

        self.lifecycle.complete(ctx, ProcResult::Success);
        Ok(ProcResult::Success)
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        self.lifecycle.confirm_cancel(ctx, ProcResult::Success);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Client, SetRoleParams, TopologyRole};
    use crate::testing::Rig;

    #[test]
    fn test_sets_role_inline() {
        let mut rig = Rig::new();
        let mut proc = SetRole::new();
        proc.start(
            &mut rig.ctx(),
            Completer::new(ProcedureId::SetRole, Client::Goal),
            &ProcedureParams::SetRole(SetRoleParams::ACTING_PRIMARY),
        )
        .unwrap();

        assert_eq!(rig.state.role, TopologyRole::Primary);
        assert!(rig.state.acting_in_role);
        assert_eq!(rig.take_confirmations().len(), 1);
        assert!(rig.platform.calls().is_empty());
    }
}
