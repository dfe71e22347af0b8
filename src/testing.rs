//! Test doubles for the collaborator interfaces

use crate::domain::models::{
    BdAddr, Confirmation, PageScanType, ProcedureEvent, ProcedureId, Profile, TopologyState,
};
use crate::domain::services::{
    AddressOverride, ConnectionManager, DeviceIdentity, PeerSignalling, ProfileConnector,
    RoleResolver, Services,
};
use crate::domain::settings::TopologySettings;
use crate::infrastructure::dispatcher::{Dispatcher, Message};
use crate::procedures::{Context, Procedures};
use crate::topology::Topology;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

pub const PRIMARY_ADDR: BdAddr = BdAddr::new(0x0002, 0x5b, 0x00a001);
pub const SECONDARY_ADDR: BdAddr = BdAddr::new(0x0002, 0x5b, 0x00a002);
pub const PEER_ADDR: BdAddr = BdAddr::new(0x0002, 0x5b, 0x00b001);

/// A request made to a collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    FindRole(Duration),
    CancelFindRole,
    RequestPageScan(ProcedureId, PageScanType),
    ReleasePageScan(ProcedureId),
    EnableScan,
    DisableScan,
    ReleaseAcl(BdAddr),
    ConnectProfile(Profile, BdAddr),
    OverrideAddress(BdAddr),
    SetMyAddress(BdAddr),
    CommandRoleSwitch,
}

struct Recorder {
    calls: Vec<Call>,
    connected: Vec<BdAddr>,
    peer: Option<BdAddr>,
    override_failures: u32,
}

/// Records every collaborator request; all handles share one recorder
#[derive(Clone)]
pub struct FakePlatform {
    inner: Arc<Mutex<Recorder>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Recorder {
                calls: Vec::new(),
                connected: Vec::new(),
                peer: Some(PEER_ADDR),
                override_failures: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recorder> {
        self.inner.lock().unwrap()
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn set_connected(&self, addr: BdAddr, connected: bool) {
        let mut recorder = self.lock();
        recorder.connected.retain(|a| *a != addr);
        if connected {
            recorder.connected.push(addr);
        }
    }

    pub fn set_peer(&self, peer: Option<BdAddr>) {
        self.lock().peer = peer;
    }

    /// Make the next `count` address overrides fail
    pub fn fail_overrides(&self, count: u32) {
        self.lock().override_failures = count;
    }

    pub fn override_attempts(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::OverrideAddress(_)))
            .count()
    }
}

impl RoleResolver for FakePlatform {
    fn find_role(&mut self, timeout: Duration) {
        self.record(Call::FindRole(timeout));
    }

    fn cancel_find_role(&mut self) {
        self.record(Call::CancelFindRole);
    }
}

impl ConnectionManager for FakePlatform {
    fn request_page_scan(&mut self, requester: ProcedureId, scan: PageScanType) {
        self.record(Call::RequestPageScan(requester, scan));
    }

    fn release_page_scan(&mut self, requester: ProcedureId) {
        self.record(Call::ReleasePageScan(requester));
    }

    fn enable_scan(&mut self) {
        self.record(Call::EnableScan);
    }

    fn disable_scan(&mut self) {
        self.record(Call::DisableScan);
    }

    fn is_connected(&self, addr: &BdAddr) -> bool {
        self.lock().connected.contains(addr)
    }

    fn release_acl(&mut self, addr: &BdAddr) {
        self.record(Call::ReleaseAcl(*addr));
    }
}

impl ProfileConnector for FakePlatform {
    fn connect(&mut self, profile: Profile, peer: &BdAddr) {
        self.record(Call::ConnectProfile(profile, *peer));
    }
}

impl DeviceIdentity for FakePlatform {
    fn primary_address(&self) -> BdAddr {
        PRIMARY_ADDR
    }

    fn secondary_address(&self) -> BdAddr {
        SECONDARY_ADDR
    }

    fn peer_address(&self) -> Option<BdAddr> {
        self.lock().peer
    }

    fn set_my_address(&mut self, addr: BdAddr) {
        self.record(Call::SetMyAddress(addr));
    }
}

impl AddressOverride for FakePlatform {
    fn override_address(&mut self, addr: &BdAddr) -> bool {
        let mut recorder = self.lock();
        recorder.calls.push(Call::OverrideAddress(*addr));
        if recorder.override_failures > 0 {
            recorder.override_failures -= 1;
            false
        } else {
            true
        }
    }
}

impl PeerSignalling for FakePlatform {
    fn command_role_switch(&mut self) {
        self.record(Call::CommandRoleSwitch);
    }
}

/// Everything a procedure needs, for driving one directly
pub struct Rig {
    pub platform: FakePlatform,
    pub procedures: Procedures,
    pub services: Services,
    pub dispatcher: Dispatcher,
    pub state: TopologyState,
    pub settings: TopologySettings,
}

impl Rig {
    pub fn new() -> Self {
        let platform = FakePlatform::new();
        Self {
            services: Services::from_platform(platform.clone()),
            platform,
            procedures: Procedures::new(),
            dispatcher: Dispatcher::new(),
            state: TopologyState::default(),
            settings: TopologySettings::default(),
        }
    }

    pub fn ctx(&mut self) -> Context<'_> {
        Context {
            procedures: &mut self.procedures,
            services: &mut self.services,
            dispatcher: &mut self.dispatcher,
            state: &mut self.state,
            settings: &self.settings,
        }
    }

    /// Terminal callbacks fired so far, from both the queue and the goal outbox.
    /// Other queued messages are discarded.
    pub fn take_confirmations(&mut self) -> Vec<Confirmation> {
        let mut cfms = Vec::new();
        while let Some(message) = self.dispatcher.pop() {
            if let Message::Confirm(cfm) = message {
                cfms.push(cfm);
            }
        }
        cfms.extend(self.dispatcher.drain_outbox());
        cfms
    }
}

/// A topology wired to a fake platform, with its goal event stream
pub struct Harness {
    pub platform: FakePlatform,
    pub topology: Topology,
    events: mpsc::UnboundedReceiver<ProcedureEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(TopologySettings::default())
    }

    pub fn with_settings(settings: TopologySettings) -> Self {
        let platform = FakePlatform::new();
        let (tx, events) = mpsc::unbounded_channel();
        let topology = Topology::new(Services::from_platform(platform.clone()), settings, tx);
        Self {
            platform,
            topology,
            events,
        }
    }

    /// Goal events delivered so far
    pub fn events(&mut self) -> Vec<ProcedureEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
