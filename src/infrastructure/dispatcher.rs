//! Message Dispatcher
//!
//! Single-threaded cooperative scheduling for the topology core:
//! - a FIFO queue of pending messages
//! - one-shot timers against a virtual clock
//! - topic subscriptions for subsystem events
//! - an outbox of confirmations addressed to the goal layer
//!
//! Nothing in here runs on its own. The topology pops messages and fires
//! timers, so every handler runs to completion before the next one starts.

use crate::domain::models::{Confirmation, ProcedureId, SubsystemEvent, Topic};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::trace;

/// Handle of a scheduled one-shot timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Terminal callback for the script engine or an owning procedure
    Confirm(Confirmation),
    /// Asynchronous event posted by a collaborator
    Subsystem(SubsystemEvent),
    /// A timer owned by `proc` expired
    Timeout { proc: ProcedureId, timer: TimerId },
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    queue: VecDeque<Message>,
    now: Duration,
    next_timer: u64,
    // Ordered by deadline, then by scheduling order
    timers: BTreeMap<(Duration, TimerId), ProcedureId>,
    subscriptions: BTreeMap<Topic, Vec<ProcedureId>>,
    outbox: Vec<Confirmation>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Arm a one-shot timer for `owner` that fires `delay` from now
    pub fn schedule(&mut self, owner: ProcedureId, delay: Duration) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        let deadline = self.now + delay;
        trace!("Timer {:?} for {} due at {:?}", id, owner, deadline);
        self.timers.insert((deadline, id), owner);
        id
    }

    /// Disarm a timer. Returns false if it already fired or never existed.
    pub fn cancel_timer(&mut self, timer: TimerId) -> bool {
        let key = self.timers.keys().find(|(_, id)| *id == timer).copied();
        match key {
            Some(key) => self.timers.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Fire the earliest timer due at or before `until`.
    ///
    /// The clock moves to the timer's deadline and its timeout message is
    /// queued. Returns false when no timer is due.
    pub fn fire_next(&mut self, until: Duration) -> bool {
        let Some((&(deadline, timer), &proc)) = self.timers.iter().next() else {
            return false;
        };
        if deadline > until {
            return false;
        }
        self.timers.remove(&(deadline, timer));
        self.now = self.now.max(deadline);
        self.post(Message::Timeout { proc, timer });
        true
    }

    /// Move the clock forward without firing anything. Never moves backwards.
    pub fn set_now(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }

    pub fn subscribe(&mut self, topic: Topic, subscriber: ProcedureId) {
        let list = self.subscriptions.entry(topic).or_default();
        if !list.contains(&subscriber) {
            list.push(subscriber);
        }
    }

    pub fn unsubscribe(&mut self, topic: Topic, subscriber: ProcedureId) {
        if let Some(list) = self.subscriptions.get_mut(&topic) {
            list.retain(|id| *id != subscriber);
        }
    }

    /// Subscribers of `topic` in subscription order
    pub fn subscribers(&self, topic: Topic) -> Vec<ProcedureId> {
        self.subscriptions.get(&topic).cloned().unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: Topic, subscriber: ProcedureId) -> bool {
        self.subscriptions
            .get(&topic)
            .is_some_and(|list| list.contains(&subscriber))
    }

    pub fn push_outbox(&mut self, cfm: Confirmation) {
        self.outbox.push(cfm);
    }

    pub fn drain_outbox(&mut self) -> Vec<Confirmation> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fire_all(dispatcher: &mut Dispatcher, until: Duration) -> Vec<ProcedureId> {
        let mut fired = Vec::new();
        while dispatcher.fire_next(until) {
            if let Some(Message::Timeout { proc, .. }) = dispatcher.pop() {
                fired.push(proc);
            }
        }
        fired
    }

    #[test]
    fn test_timers_fire_by_deadline_then_schedule_order() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.schedule(ProcedureId::SetRole, Duration::from_secs(2));
        dispatcher.schedule(ProcedureId::FindRole, Duration::from_secs(1));
        dispatcher.schedule(ProcedureId::PermitBt, Duration::from_secs(2));

        let fired = fire_all(&mut dispatcher, Duration::from_secs(5));
        assert_eq!(
            fired,
            vec![ProcedureId::FindRole, ProcedureId::SetRole, ProcedureId::PermitBt]
        );
        assert_eq!(dispatcher.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_timer_not_due_stays_armed() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.schedule(ProcedureId::PriConnectablePeer, Duration::from_secs(10));

        assert!(!dispatcher.fire_next(Duration::from_secs(9)));
        assert_eq!(dispatcher.next_deadline(), Some(Duration::from_secs(10)));
        assert!(dispatcher.fire_next(Duration::from_secs(10)));
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut dispatcher = Dispatcher::new();
        let timer = dispatcher.schedule(ProcedureId::PriConnectablePeer, Duration::from_secs(1));

        assert!(dispatcher.cancel_timer(timer));
        assert!(!dispatcher.cancel_timer(timer));
        assert!(fire_all(&mut dispatcher, Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe(Topic::Transport, ProcedureId::WaitPeerLinkDrop);
        dispatcher.subscribe(Topic::Transport, ProcedureId::PriConnectablePeer);
        dispatcher.subscribe(Topic::Transport, ProcedureId::WaitPeerLinkDrop);

        assert_eq!(
            dispatcher.subscribers(Topic::Transport),
            vec![ProcedureId::WaitPeerLinkDrop, ProcedureId::PriConnectablePeer]
        );

        dispatcher.unsubscribe(Topic::Transport, ProcedureId::WaitPeerLinkDrop);
        assert!(!dispatcher.is_subscribed(Topic::Transport, ProcedureId::WaitPeerLinkDrop));
    }
}
