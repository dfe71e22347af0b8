//! Wait-Peer-Link-Drop Procedure
//!
//! Completes once there is no ACL to the peer, immediately if it is already
//! down.

use super::{expect_no_params, Completer, Context, ContractViolation, Lifecycle, Procedure};
use crate::domain::models::{BdAddr, ProcResult, ProcedureId, ProcedureParams, SubsystemEvent, Topic};
use tracing::{debug, warn};

pub struct WaitPeerLinkDrop {
    lifecycle: Lifecycle,
    peer: Option<BdAddr>,
}

impl WaitPeerLinkDrop {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
            peer: None,
        }
    }

    fn finish(&mut self, ctx: &mut Context<'_>, result: ProcResult) {
        ctx.dispatcher.unsubscribe(Topic::Transport, self.id());
        self.peer = None;
        self.lifecycle.complete(ctx, result);
    }
}

impl Default for WaitPeerLinkDrop {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for WaitPeerLinkDrop {
    fn id(&self) -> ProcedureId {
        ProcedureId::WaitPeerLinkDrop
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

        // Subscribe before checking so a drop cannot slip between the two
        ctx.dispatcher.subscribe(Topic::Transport, self.id());

        match ctx.services.identity.peer_address() {
            None => {
                warn!("No peer address to wait on");
                self.finish(ctx, ProcResult::Failed);
            }
            Some(peer) if !ctx.services.connection_manager.is_connected(&peer) => {
                debug!("Peer link already down");
                self.finish(ctx, ProcResult::Success);
            }
            Some(peer) => {
                debug!("Waiting for link to {} to drop", peer);
                self.peer = Some(peer);
            }
        }
        Ok(ProcResult::Success)
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        self.lifecycle.begin_cancel(self.id())?;
        ctx.dispatcher.unsubscribe(Topic::Transport, self.id());
        self.peer = None;
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
        if let SubsystemEvent::TransportDisconnected(addr) = event {
            if self.peer == Some(*addr) {
                debug!("Peer link dropped");
                self.finish(ctx, ProcResult::Success);
            }
        }
        Ok(())
    }
}
