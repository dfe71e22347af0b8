//! Command-Role-Switch Procedure
//!
//! Tells the peer to take over as Primary. No acknowledgement comes back,
//! so it completes as soon as the instruction is sent.

use super::{expect_no_params, Completer, Context, ContractViolation, Lifecycle, Procedure};
use crate::domain::models::{ProcResult, ProcedureId, ProcedureParams};
use tracing::info;

pub struct CommandRoleSwitch {
    lifecycle: Lifecycle,
}

impl CommandRoleSwitch {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
        }
    }
}

impl Default for CommandRoleSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for CommandRoleSwitch {
    fn id(&self) -> ProcedureId {
        ProcedureId::CommandRoleSwitch
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

        info!("Commanding peer to switch role");
        ctx.services.peer_signalling.command_role_switch();

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
    use crate::domain::models::Client;
    use crate::testing::{Call, Rig};

    #[test]
    fn test_sends_instruction_and_completes() {
        let mut rig = Rig::new();
        let mut proc = CommandRoleSwitch::new();
        proc.start(
            &mut rig.ctx(),
            Completer::new(ProcedureId::CommandRoleSwitch, Client::Goal),
            &ProcedureParams::None,
        )
        .unwrap();

        assert_eq!(rig.platform.calls(), vec![Call::CommandRoleSwitch]);
        assert_eq!(rig.take_confirmations().len(), 1);
        assert!(!proc.is_active());
    }
}
