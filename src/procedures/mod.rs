//! Procedure Contract
//!
//! Every orchestrated operation implements [`Procedure`]. A started procedure
//! owns a [`Completer`] and spends it on exactly one terminal callback,
//! either `completed` or `cancel-confirmed`. The completer cannot be cloned,
//! so a second terminal callback does not type check.
//!
//! Procedures are single instances held by the [`Procedures`] registry and
//! re-armed on every start.

pub mod allow_handset_connect;
pub mod bt_access;
pub mod cancel_find_role;
pub mod command_role_switch;
pub mod connect_peer_profiles;
pub mod connectable_peer;
pub mod find_role;
pub mod script_engine;
pub mod scripts;
pub mod set_address;
pub mod set_role;
pub mod wait_peer_link_drop;

use crate::domain::models::{
    Client, ConfirmKind, Confirmation, ProcResult, ProcedureId, ProcedureParams, SubsystemEvent,
    TopologyState,
};
use crate::domain::services::Services;
use crate::domain::settings::TopologySettings;
use crate::infrastructure::dispatcher::{Dispatcher, Message, TimerId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Breaches of the calling convention.
///
/// These are programming errors, never environmental failures. The topology
/// stops on the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("{0} started while already active")]
    AlreadyActive(ProcedureId),

    #[error("{0} cancelled or updated while not active")]
    NotActive(ProcedureId),

    #[error("{0} does not support update")]
    UpdateUnsupported(ProcedureId),

    #[error("{proc} does not accept parameters {params:?}")]
    InvalidParams {
        proc: ProcedureId,
        params: ProcedureParams,
    },

    #[error("{0} is not a registered procedure or script")]
    Unregistered(ProcedureId),

    #[error("step {step} ({proc}) of script {script} failed to start: {result}")]
    StepStartFailed {
        script: ProcedureId,
        step: usize,
        proc: ProcedureId,
        result: ProcResult,
    },

    #[error("{0} confirmed a cancel that was never requested")]
    UnexpectedCancelConfirm(ProcedureId),
}

/// Execution context handed to procedures for the duration of one call.
///
/// `procedures` is the registry minus whichever instance is being driven, so
/// a procedure can start and cancel the single instance of another kind.
pub struct Context<'a> {
    pub procedures: &'a mut Procedures,
    pub services: &'a mut Services,
    pub dispatcher: &'a mut Dispatcher,
    pub state: &'a mut TopologyState,
    pub settings: &'a TopologySettings,
}

impl Context<'_> {
    /// Deliver a terminal callback to its client
    pub fn confirm(&mut self, cfm: Confirmation) {
        match cfm.client {
            Client::Goal => self.dispatcher.push_outbox(cfm),
            Client::Script | Client::Procedure(_) => self.dispatcher.post(Message::Confirm(cfm)),
        }
    }
}

/// Single-use continuation for one start of a procedure
#[derive(Debug, PartialEq, Eq)]
pub struct Completer {
    proc: ProcedureId,
    client: Client,
}

impl Completer {
    pub(crate) fn new(proc: ProcedureId, client: Client) -> Self {
        Self { proc, client }
    }

    pub fn proc(&self) -> ProcedureId {
        self.proc
    }

    pub fn client(&self) -> Client {
        self.client
    }

    pub fn complete(self, ctx: &mut Context<'_>, result: ProcResult) {
        self.finish(ctx, ConfirmKind::Completed, result);
    }

    pub fn confirm_cancel(self, ctx: &mut Context<'_>, result: ProcResult) {
        self.finish(ctx, ConfirmKind::Cancelled, result);
    }

    fn finish(self, ctx: &mut Context<'_>, kind: ConfirmKind, result: ProcResult) {
        ctx.confirm(Confirmation {
            client: self.client,
            proc: self.proc,
            kind,
            result,
        });
    }
}

/// Per-instance lifecycle. Holding the completer is what makes an instance active.
#[derive(Debug, Default)]
pub enum Lifecycle {
    #[default]
    Idle,
    Active(Completer),
    Cancelling(Completer),
}

impl Lifecycle {
    pub fn is_active(&self) -> bool {
        !matches!(self, Lifecycle::Idle)
    }

    pub fn is_cancelling(&self) -> bool {
        matches!(self, Lifecycle::Cancelling(_))
    }

    pub fn arm(&mut self, completer: Completer) -> Result<(), ContractViolation> {
        if self.is_active() {
            return Err(ContractViolation::AlreadyActive(completer.proc()));
        }
        *self = Lifecycle::Active(completer);
        Ok(())
    }

    pub fn begin_cancel(&mut self, id: ProcedureId) -> Result<(), ContractViolation> {
        match std::mem::take(self) {
            Lifecycle::Active(completer) => {
                *self = Lifecycle::Cancelling(completer);
                Ok(())
            }
            other => {
                *self = other;
                Err(ContractViolation::NotActive(id))
            }
        }
    }

    fn take(&mut self) -> Option<Completer> {
        match std::mem::take(self) {
            Lifecycle::Idle => None,
            Lifecycle::Active(completer) | Lifecycle::Cancelling(completer) => Some(completer),
        }
    }

    /// Fire `completed` and return to idle. False if there was nothing to complete.
    pub fn complete(&mut self, ctx: &mut Context<'_>, result: ProcResult) -> bool {
        match self.take() {
            Some(completer) => {
                completer.complete(ctx, result);
                true
            }
            None => false,
        }
    }

    /// Fire `cancel-confirmed` and return to idle
    pub fn confirm_cancel(&mut self, ctx: &mut Context<'_>, result: ProcResult) -> bool {
        match self.take() {
            Some(completer) => {
                completer.confirm_cancel(ctx, result);
                true
            }
            None => false,
        }
    }
}

/// The calling convention shared by every procedure.
///
/// `start` returns the start confirmation. A procedure may already have
/// fired its terminal callback by the time `start` returns.
pub trait Procedure: Send {
    fn id(&self) -> ProcedureId;

    fn is_active(&self) -> bool;

    fn start(
        &mut self,
        ctx: &mut Context<'_>,
        completer: Completer,
        params: &ProcedureParams,
    ) -> Result<ProcResult, ContractViolation>;

    /// Request cancellation; answered by exactly one terminal callback
    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation>;

    /// Add work to a running instance
    fn update(
        &mut self,
        _ctx: &mut Context<'_>,
        _params: &ProcedureParams,
    ) -> Result<(), ContractViolation> {
        Err(ContractViolation::UpdateUnsupported(self.id()))
    }

    fn handle_event(
        &mut self,
        _ctx: &mut Context<'_>,
        _event: &SubsystemEvent,
    ) -> Result<(), ContractViolation> {
        Ok(())
    }

    fn handle_timeout(
        &mut self,
        _ctx: &mut Context<'_>,
        _timer: TimerId,
    ) -> Result<(), ContractViolation> {
        Ok(())
    }

    /// Terminal callback of a nested procedure owned by this one
    fn handle_confirmation(
        &mut self,
        _ctx: &mut Context<'_>,
        _cfm: Confirmation,
    ) -> Result<(), ContractViolation> {
        Ok(())
    }
}

/// Registry of procedure instances, one per procedure kind
pub struct Procedures {
    instances: BTreeMap<ProcedureId, Box<dyn Procedure>>,
}

impl Procedures {
    /// Create the registry with every standalone procedure
    pub fn new() -> Self {
        let mut procedures = Self {
            instances: BTreeMap::new(),
        };
        procedures.register(Box::new(find_role::FindRole::new()));
        procedures.register(Box::new(cancel_find_role::CancelFindRole::new()));
        procedures.register(Box::new(connectable_peer::ConnectablePeer::new()));
        procedures.register(Box::new(connect_peer_profiles::ConnectPeerProfiles::new()));
        procedures.register(Box::new(set_address::SetAddress::new()));
        procedures.register(Box::new(set_role::SetRole::new()));
        procedures.register(Box::new(bt_access::PermitBt::new()));
        procedures.register(Box::new(bt_access::ProhibitBt::new()));
        procedures.register(Box::new(wait_peer_link_drop::WaitPeerLinkDrop::new()));
        procedures.register(Box::new(allow_handset_connect::AllowHandsetConnect::new()));
        procedures.register(Box::new(command_role_switch::CommandRoleSwitch::new()));
        procedures
    }

    fn register(&mut self, procedure: Box<dyn Procedure>) {
        self.instances.insert(procedure.id(), procedure);
    }

    pub fn contains(&self, id: ProcedureId) -> bool {
        self.instances.contains_key(&id)
    }

    pub fn is_active(&self, id: ProcedureId) -> bool {
        self.instances.get(&id).is_some_and(|p| p.is_active())
    }

    /// Run `f` on the instance of `id`, lending it the rest of the registry
    /// through `ctx`. The instance is out of the registry while `f` runs.
    pub fn drive<'a, R>(
        ctx: &mut Context<'a>,
        id: ProcedureId,
        f: impl FnOnce(&mut dyn Procedure, &mut Context<'a>) -> Result<R, ContractViolation>,
    ) -> Result<R, ContractViolation> {
        let mut procedure = ctx
            .procedures
            .instances
            .remove(&id)
            .ok_or(ContractViolation::Unregistered(id))?;
        let result = f(procedure.as_mut(), ctx);
        ctx.procedures.instances.insert(id, procedure);
        result
    }
}

impl Default for Procedures {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the expected variant out of a parameter block
pub(crate) fn expect_params<T>(
    proc: ProcedureId,
    params: &ProcedureParams,
    extract: impl FnOnce(&ProcedureParams) -> Option<T>,
) -> Result<T, ContractViolation> {
    extract(params).ok_or(ContractViolation::InvalidParams {
        proc,
        params: *params,
    })
}

pub(crate) fn expect_no_params(
    proc: ProcedureId,
    params: &ProcedureParams,
) -> Result<(), ContractViolation> {
    expect_params(proc, params, |p| {
        matches!(p, ProcedureParams::None).then_some(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;

    #[test]
    fn test_lifecycle_rejects_double_arm() {
        let mut lifecycle = Lifecycle::default();
        lifecycle
            .arm(Completer::new(ProcedureId::FindRole, Client::Goal))
            .unwrap();

        let err = lifecycle
            .arm(Completer::new(ProcedureId::FindRole, Client::Goal))
            .unwrap_err();
        assert_eq!(err, ContractViolation::AlreadyActive(ProcedureId::FindRole));
    }

    #[test]
    fn test_lifecycle_cancel_requires_active() {
        let mut lifecycle = Lifecycle::default();
        assert_eq!(
            lifecycle.begin_cancel(ProcedureId::SetRole),
            Err(ContractViolation::NotActive(ProcedureId::SetRole))
        );
        assert!(!lifecycle.is_active());
    }

    #[test]
    fn test_lifecycle_fires_once() {
        let platform = FakePlatform::new();
        let mut services = Services::from_platform(platform);
        let mut dispatcher = Dispatcher::new();
        let mut state = TopologyState::default();
        let settings = TopologySettings::default();
        let mut procedures = Procedures::new();
        let mut ctx = Context {
            procedures: &mut procedures,
            services: &mut services,
            dispatcher: &mut dispatcher,
            state: &mut state,
            settings: &settings,
        };

        let mut lifecycle = Lifecycle::default();
        lifecycle
            .arm(Completer::new(ProcedureId::FindRole, Client::Script))
            .unwrap();
        lifecycle.begin_cancel(ProcedureId::FindRole).unwrap();
        assert!(lifecycle.is_cancelling());

        assert!(lifecycle.confirm_cancel(&mut ctx, ProcResult::Success));
        assert!(!lifecycle.complete(&mut ctx, ProcResult::Success));

        assert_eq!(dispatcher.pending(), 1);
        assert_eq!(
            dispatcher.pop(),
            Some(Message::Confirm(Confirmation {
                client: Client::Script,
                proc: ProcedureId::FindRole,
                kind: ConfirmKind::Cancelled,
                result: ProcResult::Success,
            }))
        );
    }

    #[test]
    fn test_goal_confirmations_go_to_outbox() {
        let mut services = Services::from_platform(FakePlatform::new());
        let mut dispatcher = Dispatcher::new();
        let mut state = TopologyState::default();
        let settings = TopologySettings::default();
        let mut procedures = Procedures::new();
        let mut ctx = Context {
            procedures: &mut procedures,
            services: &mut services,
            dispatcher: &mut dispatcher,
            state: &mut state,
            settings: &settings,
        };

        Completer::new(ProcedureId::PermitBt, Client::Goal).complete(&mut ctx, ProcResult::Failed);

        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(dispatcher.drain_outbox().len(), 1);
    }
}
