//! Topology Service
//!
//! Goal-facing entry point. Owns every procedure instance, the script
//! engine and the dispatcher, and reports the progress of everything the
//! goal layer starts as [`ProcedureEvent`]s on an unbounded channel.
//!
//! All work happens on the caller's task. [`Topology::run`] drives it from a
//! command channel and the dispatcher's timers.

use crate::domain::models::{
    Client, Confirmation, ProcResult, ProcedureEvent, ProcedureId, ProcedureParams,
    SubsystemEvent, TopologyCommand, TopologyState,
};
use crate::domain::services::Services;
use crate::domain::settings::TopologySettings;
use crate::infrastructure::dispatcher::{Dispatcher, Message};
use crate::procedures::script_engine::ScriptEngine;
use crate::procedures::{scripts, Completer, Context, ContractViolation, Procedures};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

pub struct Topology {
    procedures: Procedures,
    script_engine: ScriptEngine,
    services: Services,
    dispatcher: Dispatcher,
    state: TopologyState,
    settings: TopologySettings,
    // Started by the goal layer and not yet terminated
    outstanding: BTreeSet<ProcedureId>,
    events: mpsc::UnboundedSender<ProcedureEvent>,
}

enum Wake {
    Command(Option<TopologyCommand>),
    Timer,
}

impl Topology {
    /// Create a new topology service
    pub fn new(
        services: Services,
        settings: TopologySettings,
        events: mpsc::UnboundedSender<ProcedureEvent>,
    ) -> Self {
        Self {
            procedures: Procedures::new(),
            script_engine: ScriptEngine::new(),
            services,
            dispatcher: Dispatcher::new(),
            state: TopologyState::default(),
            settings,
            outstanding: BTreeSet::new(),
            events,
        }
    }

    pub fn state(&self) -> TopologyState {
        self.state
    }

    pub fn is_outstanding(&self, id: ProcedureId) -> bool {
        self.outstanding.contains(&id)
    }

    pub fn outstanding(&self) -> Vec<ProcedureId> {
        self.outstanding.iter().copied().collect()
    }

    /// Virtual time seen by the procedures
    pub fn now(&self) -> Duration {
        self.dispatcher.now()
    }

    fn parts(&mut self) -> (&mut ScriptEngine, Context<'_>) {
        (
            &mut self.script_engine,
            Context {
                procedures: &mut self.procedures,
                services: &mut self.services,
                dispatcher: &mut self.dispatcher,
                state: &mut self.state,
                settings: &self.settings,
            },
        )
    }

    /// Start a procedure or script on behalf of the goal layer
    pub fn start(
        &mut self,
        id: ProcedureId,
        params: ProcedureParams,
    ) -> Result<(), ContractViolation> {
        if self.is_outstanding(id) {
            return Err(ContractViolation::AlreadyActive(id));
        }

        info!("Starting {}", id);
        let completer = Completer::new(id, Client::Goal);
        let (engine, mut ctx) = self.parts();

        let result = match scripts::lookup(id) {
            Some(script) => {
                if params != ProcedureParams::None {
                    return Err(ContractViolation::InvalidParams { proc: id, params });
                }
                engine.start(&mut ctx, script, completer)?
            }
            None => Procedures::drive(&mut ctx, id, |procedure, ctx| {
                procedure.start(ctx, completer, &params)
            })?,
        };

        self.outstanding.insert(id);
        let _ = self.events.send(ProcedureEvent::Started { proc: id, result });
        self.pump()?;
        Ok(())
    }

    /// Ask a goal-started procedure or script to cancel
    pub fn cancel(&mut self, id: ProcedureId) -> Result<(), ContractViolation> {
        if !self.is_outstanding(id) {
            return Err(ContractViolation::NotActive(id));
        }

        info!("Cancelling {}", id);
        let (engine, mut ctx) = self.parts();
        if scripts::lookup(id).is_some() {
            engine.cancel(&mut ctx, id)?;
        } else {
            Procedures::drive(&mut ctx, id, |procedure, ctx| procedure.cancel(ctx))?;
        }
        self.pump()?;
        Ok(())
    }

    /// Add work to a running procedure
    pub fn update(
        &mut self,
        id: ProcedureId,
        params: ProcedureParams,
    ) -> Result<(), ContractViolation> {
        if !self.is_outstanding(id) {
            return Err(ContractViolation::NotActive(id));
        }
        if scripts::lookup(id).is_some() {
            return Err(ContractViolation::UpdateUnsupported(id));
        }

        debug!("Updating {} with {:?}", id, params);
        let (_, mut ctx) = self.parts();
        Procedures::drive(&mut ctx, id, |procedure, ctx| procedure.update(ctx, &params))?;
        self.pump()?;
        Ok(())
    }

    /// Deliver a collaborator event and process everything it triggers
    pub fn post(&mut self, event: SubsystemEvent) -> Result<(), ContractViolation> {
        self.dispatcher.post(Message::Subsystem(event));
        self.pump()?;
        Ok(())
    }

    /// Let `delay` of virtual time pass, firing due timers in order
    pub fn advance(&mut self, delay: Duration) -> Result<(), ContractViolation> {
        let until = self.dispatcher.now() + delay;
        self.advance_to(until)
    }

    pub fn advance_to(&mut self, until: Duration) -> Result<(), ContractViolation> {
        self.pump()?;
        while self.dispatcher.fire_next(until) {
            self.pump()?;
        }
        self.dispatcher.set_now(until);
        Ok(())
    }

    /// Process queued messages until none are left. Returns how many were handled.
    pub fn pump(&mut self) -> Result<usize, ContractViolation> {
        let mut handled = 0;
        let result = loop {
            let Some(message) = self.dispatcher.pop() else {
                break Ok(handled);
            };
            if let Err(e) = self.dispatch(message) {
                break Err(e);
            }
            handled += 1;
        };
        self.flush();
        result
    }

    fn dispatch(&mut self, message: Message) -> Result<(), ContractViolation> {
        let (engine, mut ctx) = self.parts();
        match message {
            Message::Confirm(cfm) => match cfm.client {
                Client::Script => engine.handle_confirmation(&mut ctx, cfm),
                Client::Procedure(owner) => Procedures::drive(&mut ctx, owner, |procedure, ctx| {
                    procedure.handle_confirmation(ctx, cfm)
                }),
                Client::Goal => {
                    ctx.dispatcher.push_outbox(cfm);
                    Ok(())
                }
            },
            Message::Subsystem(event) => {
                for id in ctx.dispatcher.subscribers(event.topic()) {
                    if ctx.procedures.contains(id) {
                        Procedures::drive(&mut ctx, id, |procedure, ctx| {
                            procedure.handle_event(ctx, &event)
                        })?;
                    }
                }
                Ok(())
            }
            Message::Timeout { proc, timer } => {
                Procedures::drive(&mut ctx, proc, |procedure, ctx| {
                    procedure.handle_timeout(ctx, timer)
                })
            }
        }
    }

    /// Hand terminal callbacks to the goal layer
    fn flush(&mut self) {
        for cfm in self.dispatcher.drain_outbox() {
            self.finish(cfm);
        }
    }

    fn finish(&mut self, cfm: Confirmation) {
        self.outstanding.remove(&cfm.proc);
        match cfm.result {
            ProcResult::Success => info!("{} {:?}: {}", cfm.proc, cfm.kind, cfm.result),
            _ => error!("{} {:?}: {}", cfm.proc, cfm.kind, cfm.result),
        }
        let _ = self.events.send(cfm.into());
    }

    pub fn execute(&mut self, command: TopologyCommand) -> Result<(), ContractViolation> {
        match command {
            TopologyCommand::Start(id, params) => self.start(id, params),
            TopologyCommand::Cancel(id) => self.cancel(id),
            TopologyCommand::Update(id, params) => self.update(id, params),
            TopologyCommand::Event(event) => self.post(event),
            TopologyCommand::Shutdown => Ok(()),
        }
    }

    /// Serve commands and timers until shutdown or the first contract violation
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<TopologyCommand>,
    ) -> Result<(), ContractViolation> {
        let origin = Instant::now();
        info!("Topology running");

        loop {
            let deadline = self.dispatcher.next_deadline();
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                _ = time::sleep_until(origin + deadline.unwrap_or_default()), if deadline.is_some() => Wake::Timer,
            };

            // Catch the virtual clock up with real time first
            if let Err(e) = self.advance_to(origin.elapsed()) {
                error!("Topology stopped: {}", e);
                return Err(e);
            }

            match wake {
                Wake::Timer => {}
                Wake::Command(None) | Wake::Command(Some(TopologyCommand::Shutdown)) => break,
                Wake::Command(Some(command)) => {
                    if let Err(e) = self.execute(command) {
                        error!("Topology stopped: {}", e);
                        return Err(e);
                    }
                }
            }
        }

        info!("Topology shut down");
        Ok(())
    }
}
