//! Connectable-Peer Procedure
//!
//! Makes the Primary page-scannable so the peer can connect, while role
//! resolution keeps running in the background. Three outcomes race:
//!
//! - the peer connects first: `success`
//! - the connect timer expires first: `timeout`
//! - the goal layer disables connectability: `success`
//!
//! Whichever wins records the result, then the find-role it started is
//! cancelled. The terminal callback fires only once that cancellation has
//! been confirmed. Find-role is the registry's single instance, so it must
//! be idle when connectability is enabled.

use super::{
    expect_params, Completer, Context, ContractViolation, Lifecycle, Procedure, Procedures,
};
use crate::domain::models::{
    Client, ConnectablePeerParams, Confirmation, FindRoleParams, PageScanType, ProcResult,
    ProcedureId, ProcedureParams, SubsystemEvent, Topic,
};
use crate::infrastructure::dispatcher::TimerId;
use tracing::{debug, info};

pub struct ConnectablePeer {
    lifecycle: Lifecycle,
    // Find-role started by us and its terminal callback not yet received
    find_role_pending: bool,
    timer: Option<TimerId>,
    page_scan_requested: bool,
    outcome: Option<ProcResult>,
}

impl ConnectablePeer {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
            find_role_pending: false,
            timer: None,
            page_scan_requested: false,
            outcome: None,
        }
    }

    fn params(params: &ProcedureParams) -> Result<ConnectablePeerParams, ContractViolation> {
        expect_params(ProcedureId::PriConnectablePeer, params, |p| match p {
            ProcedureParams::ConnectablePeer(params) => Some(*params),
            _ => None,
        })
    }

    fn release_resources(&mut self, ctx: &mut Context<'_>) {
        if let Some(timer) = self.timer.take() {
            ctx.dispatcher.cancel_timer(timer);
        }
        ctx.dispatcher.unsubscribe(Topic::Transport, self.id());
        if self.page_scan_requested {
            self.page_scan_requested = false;
            ctx.services.connection_manager.release_page_scan(self.id());
        }
    }

    /// Record the winning outcome and start winding down
    fn settle(&mut self, ctx: &mut Context<'_>, outcome: ProcResult) -> Result<(), ContractViolation> {
        debug!("Connectable peer settled with {}", outcome);
        self.outcome = Some(outcome);
        self.release_resources(ctx);

        if !self.find_role_pending {
            self.finish(ctx);
        } else if ctx.procedures.is_active(ProcedureId::FindRole) {
            Procedures::drive(ctx, ProcedureId::FindRole, |find_role, ctx| {
                find_role.cancel(ctx)
            })?;
        }
        // Otherwise the nested completion is already queued
        Ok(())
    }

    fn finish(&mut self, ctx: &mut Context<'_>) {
        let outcome = self.outcome.take().unwrap_or(ProcResult::Success);
        if self.lifecycle.is_cancelling() {
            info!("Connectable peer cancelled");
            self.lifecycle.confirm_cancel(ctx, ProcResult::Success);
        } else {
            info!("Connectable peer finished: {}", outcome);
            self.lifecycle.complete(ctx, outcome);
        }
    }

    fn is_settling(&self) -> bool {
        self.outcome.is_some()
    }
}

impl Default for ConnectablePeer {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for ConnectablePeer {
    fn id(&self) -> ProcedureId {
        ProcedureId::PriConnectablePeer
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
        if params.enable && ctx.procedures.is_active(ProcedureId::FindRole) {
            return Err(ContractViolation::AlreadyActive(ProcedureId::FindRole));
        }
        self.lifecycle.arm(completer)?;
        self.outcome = None;

        if !params.enable {
            debug!("Connectable peer disable");
            ctx.services.connection_manager.release_page_scan(self.id());
            self.lifecycle.complete(ctx, ProcResult::Success);
            return Ok(ProcResult::Success);
        }

        debug!("Connectable peer enable");
        ctx.services
            .connection_manager
            .request_page_scan(self.id(), PageScanType::Slow);
        self.page_scan_requested = true;
        ctx.dispatcher.subscribe(Topic::Transport, self.id());
        self.timer = Some(
            ctx.dispatcher
                .schedule(self.id(), ctx.settings.connectable_peer_timeout()),
        );

        let nested = Completer::new(ProcedureId::FindRole, Client::Procedure(self.id()));
        Procedures::drive(ctx, ProcedureId::FindRole, |find_role, ctx| {
            find_role.start(
                ctx,
                nested,
                &ProcedureParams::FindRole(FindRoleParams::CONTINUOUS),
            )
        })?;
        self.find_role_pending = true;

        Ok(ProcResult::Success)
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        self.lifecycle.begin_cancel(self.id())?;
        if self.is_settling() {
            // Wind down already in progress, finish() will see the cancel
            return Ok(());
        }
        self.settle(ctx, ProcResult::Success)
    }

    fn update(
        &mut self,
        ctx: &mut Context<'_>,
        params: &ProcedureParams,
    ) -> Result<(), ContractViolation> {
        let params = Self::params(params)?;
        if !self.lifecycle.is_active() {
            return Err(ContractViolation::NotActive(self.id()));
        }
        if params.enable || self.is_settling() {
            return Ok(());
        }
        self.settle(ctx, ProcResult::Success)
    }

    fn handle_event(
        &mut self,
        ctx: &mut Context<'_>,
        event: &SubsystemEvent,
    ) -> Result<(), ContractViolation> {
        match event {
            SubsystemEvent::TransportConnected(addr) => {
                if !self.lifecycle.is_active() || self.is_settling() {
                    return Ok(());
                }
                if ctx.services.identity.peer_address() == Some(*addr) {
                    info!("Peer connected: {}", addr);
                    self.settle(ctx, ProcResult::Success)
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    fn handle_timeout(
        &mut self,
        ctx: &mut Context<'_>,
        timer: TimerId,
    ) -> Result<(), ContractViolation> {
        if self.timer != Some(timer) || !self.lifecycle.is_active() || self.is_settling() {
            return Ok(());
        }
        self.timer = None;
        info!("Peer did not connect in time");
        self.settle(ctx, ProcResult::Timeout)
    }

    fn handle_confirmation(
        &mut self,
        ctx: &mut Context<'_>,
        cfm: Confirmation,
    ) -> Result<(), ContractViolation> {
        if cfm.proc != ProcedureId::FindRole || !self.find_role_pending {
            return Ok(());
        }
        self.find_role_pending = false;

        if self.is_settling() {
            self.finish(ctx);
        } else {
            debug!("Role resolution ended ({}) while still connectable", cfm.result);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConfirmKind, RoleNotification};
    use crate::infrastructure::dispatcher::Message;
    use crate::testing::{Call, Rig, PEER_ADDR};
    use std::time::Duration;

    struct Race {
        rig: Rig,
        proc: ConnectablePeer,
    }

    impl Race {
        fn start() -> Self {
            let mut rig = Rig::new();
            let mut proc = ConnectablePeer::new();
            let result = proc
                .start(
                    &mut rig.ctx(),
                    Completer::new(ProcedureId::PriConnectablePeer, Client::Goal),
                    &ProcedureParams::ConnectablePeer(ConnectablePeerParams::ENABLE),
                )
                .unwrap();
            assert_eq!(result, ProcResult::Success);
            Self { rig, proc }
        }

        fn event(&mut self, event: SubsystemEvent) {
            self.rig.dispatcher.post(Message::Subsystem(event));
            self.deliver_queued();
        }

        fn elapse(&mut self, delay: Duration) {
            let until = self.rig.dispatcher.now() + delay;
            while self.rig.dispatcher.fire_next(until) {
                self.deliver_queued();
            }
            self.rig.dispatcher.set_now(until);
        }

        fn deliver_queued(&mut self) {
            while let Some(message) = self.rig.dispatcher.pop() {
                match message {
                    Message::Confirm(cfm) => {
                        assert_eq!(cfm.client, Client::Procedure(ProcedureId::PriConnectablePeer));
                        self.proc
                            .handle_confirmation(&mut self.rig.ctx(), cfm)
                            .unwrap();
                    }
                    Message::Timeout { timer, .. } => {
                        self.proc.handle_timeout(&mut self.rig.ctx(), timer).unwrap();
                    }
                    Message::Subsystem(event) => {
                        for id in self.rig.dispatcher.subscribers(event.topic()) {
                            if id == ProcedureId::PriConnectablePeer {
                                self.proc.handle_event(&mut self.rig.ctx(), &event).unwrap();
                            } else {
                                Procedures::drive(&mut self.rig.ctx(), id, |proc, ctx| {
                                    proc.handle_event(ctx, &event)
                                })
                                .unwrap();
                            }
                        }
                    }
                }
            }
        }

        fn results(&mut self) -> Vec<(ConfirmKind, ProcResult)> {
            self.rig
                .take_confirmations()
                .into_iter()
                .map(|cfm| (cfm.kind, cfm.result))
                .collect()
        }
    }

    #[test]
    fn test_start_enables_page_scan_and_role_resolution() {
        let mut race = Race::start();
        assert_eq!(
            race.rig.platform.calls(),
            vec![
                Call::RequestPageScan(ProcedureId::PriConnectablePeer, PageScanType::Slow),
                Call::FindRole(Duration::ZERO),
            ]
        );
        assert!(race.results().is_empty());
    }

    #[test]
    fn test_peer_connect_before_timeout_succeeds() {
        let mut race = Race::start();
        race.elapse(Duration::from_secs(3));
        race.event(SubsystemEvent::TransportConnected(PEER_ADDR));

        // Nothing until role resolution confirms its cancellation
        assert!(race.results().is_empty());
        assert!(race.rig.platform.calls().contains(&Call::CancelFindRole));

        race.event(SubsystemEvent::RoleResolution(RoleNotification::Cancelled));
        assert_eq!(race.results(), vec![(ConfirmKind::Completed, ProcResult::Success)]);

        // The timer was disarmed along the way
        race.elapse(Duration::from_secs(20));
        assert!(race.results().is_empty());
    }

    #[test]
    fn test_timeout_before_peer_connect() {
        let mut race = Race::start();
        race.elapse(Duration::from_secs(10));
        assert!(race.results().is_empty());

        race.event(SubsystemEvent::TransportConnected(PEER_ADDR));
        race.event(SubsystemEvent::RoleResolution(RoleNotification::Cancelled));
        assert_eq!(race.results(), vec![(ConfirmKind::Completed, ProcResult::Timeout)]);
    }

    #[test]
    fn test_disable_before_either_succeeds() {
        let mut race = Race::start();
        race.proc
            .update(
                &mut race.rig.ctx(),
                &ProcedureParams::ConnectablePeer(ConnectablePeerParams::DISABLE),
            )
            .unwrap();
        assert!(race
            .rig
            .platform
            .calls()
            .contains(&Call::ReleasePageScan(ProcedureId::PriConnectablePeer)));

        race.elapse(Duration::from_secs(15));
        race.event(SubsystemEvent::RoleResolution(RoleNotification::Cancelled));
        assert_eq!(race.results(), vec![(ConfirmKind::Completed, ProcResult::Success)]);
    }

    #[test]
    fn test_other_device_connecting_is_ignored() {
        let mut race = Race::start();
        race.event(SubsystemEvent::TransportConnected(crate::domain::models::BdAddr::new(
            0x1234, 0x56, 0x789abc,
        )));
        assert!(!race.rig.platform.calls().contains(&Call::CancelFindRole));
    }

    #[test]
    fn test_cancel_confirms_after_role_resolution_stops() {
        let mut race = Race::start();
        race.proc.cancel(&mut race.rig.ctx()).unwrap();
        assert!(race.results().is_empty());

        race.event(SubsystemEvent::RoleResolution(RoleNotification::Cancelled));
        assert_eq!(race.results(), vec![(ConfirmKind::Cancelled, ProcResult::Success)]);
        assert!(!race.proc.is_active());
    }

    #[test]
    fn test_role_resolved_before_settling_finishes_immediately() {
        let mut race = Race::start();
        race.event(SubsystemEvent::RoleResolution(RoleNotification::Primary));
        assert!(race.results().is_empty());

        race.event(SubsystemEvent::TransportConnected(PEER_ADDR));
        assert_eq!(race.results(), vec![(ConfirmKind::Completed, ProcResult::Success)]);
        assert!(!race.rig.platform.calls().contains(&Call::CancelFindRole));
    }

    #[test]
    fn test_enable_while_find_role_busy_is_a_violation() {
        let mut rig = Rig::new();
        Procedures::drive(&mut rig.ctx(), ProcedureId::FindRole, |find_role, ctx| {
            find_role.start(
                ctx,
                Completer::new(ProcedureId::FindRole, Client::Goal),
                &ProcedureParams::FindRole(FindRoleParams::CONTINUOUS),
            )
        })
        .unwrap();

        let mut proc = ConnectablePeer::new();
        let err = proc
            .start(
                &mut rig.ctx(),
                Completer::new(ProcedureId::PriConnectablePeer, Client::Goal),
                &ProcedureParams::ConnectablePeer(ConnectablePeerParams::ENABLE),
            )
            .unwrap_err();

        assert_eq!(err, ContractViolation::AlreadyActive(ProcedureId::FindRole));
        assert!(!proc.is_active());
        // Page scan was never requested
        assert_eq!(rig.platform.calls(), vec![Call::FindRole(Duration::ZERO)]);
    }

    #[test]
    fn test_start_disabled_completes_inline() {
        let mut rig = Rig::new();
        let mut proc = ConnectablePeer::new();
        proc.start(
            &mut rig.ctx(),
            Completer::new(ProcedureId::PriConnectablePeer, Client::Goal),
            &ProcedureParams::ConnectablePeer(ConnectablePeerParams::DISABLE),
        )
        .unwrap();

        assert_eq!(
            rig.platform.calls(),
            vec![Call::ReleasePageScan(ProcedureId::PriConnectablePeer)]
        );
        assert_eq!(rig.take_confirmations().len(), 1);
        assert!(!proc.is_active());
    }
}
