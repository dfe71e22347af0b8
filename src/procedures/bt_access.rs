//! BR/EDR Access Procedures
//!
//! Scripts bracket an address change with these two. Prohibit waits until
//! scanning is actually off, permit turns it back on inline.

use super::{expect_no_params, Completer, Context, ContractViolation, Lifecycle, Procedure};
use crate::domain::models::{ProcResult, ProcedureId, ProcedureParams, SubsystemEvent, Topic};
use tracing::debug;

pub struct PermitBt {
    lifecycle: Lifecycle,
}

impl PermitBt {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
        }
    }
}

impl Default for PermitBt {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for PermitBt {
    fn id(&self) -> ProcedureId {
        ProcedureId::PermitBt
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

        debug!("Permitting BR/EDR");
        ctx.services.connection_manager.enable_scan();

        self.lifecycle.complete(ctx, ProcResult::Success);
        Ok(ProcResult::Success)
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        self.lifecycle.confirm_cancel(ctx, ProcResult::Success);
        Ok(())
    }
}

pub struct ProhibitBt {
    lifecycle: Lifecycle,
}

impl ProhibitBt {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
        }
    }
}

impl Default for ProhibitBt {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for ProhibitBt {
    fn id(&self) -> ProcedureId {
        ProcedureId::ProhibitBt
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

        debug!("Prohibiting BR/EDR");
        ctx.dispatcher.subscribe(Topic::Scan, self.id());
        ctx.services.connection_manager.disable_scan();
        Ok(ProcResult::Success)
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        self.lifecycle.begin_cancel(self.id())?;
        ctx.dispatcher.unsubscribe(Topic::Scan, self.id());
        self.lifecycle.confirm_cancel(ctx, ProcResult::Success);
        Ok(())
    }

    fn handle_event(
        &mut self,
        ctx: &mut Context<'_>,
        event: &SubsystemEvent,
    ) -> Result<(), ContractViolation> {
        if matches!(event, SubsystemEvent::ScanDisabled) && self.lifecycle.is_active() {
            debug!("BR/EDR scanning disabled");
            ctx.dispatcher.unsubscribe(Topic::Scan, self.id());
            self.lifecycle.complete(ctx, ProcResult::Success);
        }
        Ok(())
    }
}
