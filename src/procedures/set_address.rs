//! Set-Address Procedure
//!
//! Switches this earbud to the Primary or Secondary identity. The radio
//! only accepts an address override while idle, which cannot be observed
//! directly, so the override is retried inline up to a fixed ceiling.

use super::{expect_params, Completer, Context, ContractViolation, Lifecycle, Procedure};
use crate::domain::models::{AddressKind, ProcResult, ProcedureId, ProcedureParams};
use tracing::{debug, error, info};

pub struct SetAddress {
    lifecycle: Lifecycle,
}

impl SetAddress {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
        }
    }
}

impl Default for SetAddress {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for SetAddress {
    fn id(&self) -> ProcedureId {
        ProcedureId::SetAddress
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
        let kind = expect_params(self.id(), params, |p| match p {
            ProcedureParams::SetAddress(kind) => Some(*kind),
            _ => None,
        })?;
        self.lifecycle.arm(completer)?;

        let addr = match kind {
            AddressKind::Primary => ctx.services.identity.primary_address(),
            AddressKind::Secondary => ctx.services.identity.secondary_address(),
        };

        let max_attempts = ctx.settings.address_override_max_attempts;
        let accepted_on = (1..=max_attempts).find(|_| ctx.services.radio.override_address(&addr));

        match accepted_on {
            Some(attempt) => {
                info!("Address set to {} ({:?}) after {} attempt(s)", addr, kind, attempt);
                ctx.services.identity.set_my_address(addr);
                self.lifecycle.complete(ctx, ProcResult::Success);
            }
            None => {
                error!("Address override to {} failed {} times", addr, max_attempts);
                self.lifecycle.complete(ctx, ProcResult::Failed);
            }
        }

        Ok(ProcResult::Success)
    }

    /// Always finished before a cancel can arrive
    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        debug!("Set address cancel");
        self.lifecycle.confirm_cancel(ctx, ProcResult::Success);
        Ok(())
    }
}
