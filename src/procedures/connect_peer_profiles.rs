//! Connect-Peer-Profiles Procedure
//!
//! Connects a set of profiles from the Primary to the Secondary and
//! completes once every requested profile has confirmed. More profiles can
//! be added while the procedure runs.

use super::{expect_params, Completer, Context, ContractViolation, Lifecycle, Procedure};
use crate::domain::models::{
    ProcResult, ProcedureId, ProcedureParams, Profile, ProfileSet, SubsystemEvent, Topic,
};
use tracing::{debug, warn};

pub struct ConnectPeerProfiles {
    lifecycle: Lifecycle,
    // Every profile asked for since start
    requested: ProfileSet,
    // Requested and not yet confirmed
    pending: ProfileSet,
}

impl ConnectPeerProfiles {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
            requested: ProfileSet::EMPTY,
            pending: ProfileSet::EMPTY,
        }
    }

    fn params(params: &ProcedureParams) -> Result<ProfileSet, ContractViolation> {
        expect_params(ProcedureId::PriConnectPeerProfiles, params, |p| match p {
            ProcedureParams::ConnectPeerProfiles(profiles) => Some(*profiles),
            _ => None,
        })
    }

    /// Issue connects for the profiles not yet requested
    fn connect(&mut self, ctx: &mut Context<'_>, profiles: ProfileSet) {
        let new = profiles.difference(self.requested);
        let secondary = ctx.services.identity.secondary_address();

        for profile in new.iter() {
            debug!("Connecting {:?} to {}", profile, secondary);
            ctx.services.profiles.connect(profile, &secondary);
            self.pending.insert(profile);
        }
        self.requested = self.requested.union(new);

        // Streaming has no connect confirmation yet
        self.pending.remove(Profile::Streaming);
    }

    fn reset(&mut self, ctx: &mut Context<'_>) {
        let secondary = ctx.services.identity.secondary_address();
        ctx.services.connection_manager.release_acl(&secondary);
        ctx.dispatcher.unsubscribe(Topic::Profiles, self.id());
        self.requested = ProfileSet::EMPTY;
        self.pending = ProfileSet::EMPTY;
    }

    fn finish(&mut self, ctx: &mut Context<'_>, result: ProcResult) {
        self.reset(ctx);
        self.lifecycle.complete(ctx, result);
    }
}

impl Default for ConnectPeerProfiles {
    fn default() -> Self {
        Self::new()
    }
}

impl Procedure for ConnectPeerProfiles {
    fn id(&self) -> ProcedureId {
        ProcedureId::PriConnectPeerProfiles
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
        let profiles = Self::params(params)?;
        self.lifecycle.arm(completer)?;

        ctx.dispatcher.subscribe(Topic::Profiles, self.id());
        self.connect(ctx, profiles);

        if self.pending.is_empty() {
            self.finish(ctx, ProcResult::Success);
        }
        Ok(ProcResult::Success)
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) -> Result<(), ContractViolation> {
        self.lifecycle.begin_cancel(self.id())?;

        // In-flight confirmations are dropped once idle
        self.reset(ctx);
        self.lifecycle.confirm_cancel(ctx, ProcResult::Success);
        Ok(())
    }

    fn update(
        &mut self,
        ctx: &mut Context<'_>,
        params: &ProcedureParams,
    ) -> Result<(), ContractViolation> {
        let profiles = Self::params(params)?;
        if !self.lifecycle.is_active() || self.lifecycle.is_cancelling() {
            return Err(ContractViolation::NotActive(self.id()));
        }

        self.connect(ctx, profiles);
        if self.pending.is_empty() {
            self.finish(ctx, ProcResult::Success);
        }
        Ok(())
    }

    fn handle_event(
        &mut self,
        ctx: &mut Context<'_>,
        event: &SubsystemEvent,
    ) -> Result<(), ContractViolation> {
        let SubsystemEvent::ProfileConnectCfm { profile, success } = *event else {
            return Ok(());
        };
        if !self.lifecycle.is_active() || !self.pending.contains(profile) {
            return Ok(());
        }

        self.pending.remove(profile);
        if !success {
            warn!("Peer profile {:?} failed to connect", profile);
            self.finish(ctx, ProcResult::Failed);
        } else if self.pending.is_empty() {
            debug!("All peer profiles connected");
            self.finish(ctx, ProcResult::Success);
        }
        Ok(())
    }
}
