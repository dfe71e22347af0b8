//! Simulated Platform
//!
//! Stand-in for the earbud's Bluetooth subsystems, used by the simulator
//! binary. Requests are logged and their asynchronous outcomes are posted
//! back to the topology as commands after a configurable latency.

use crate::domain::models::{
    BdAddr, PageScanType, ProcedureId, Profile, RoleNotification, SubsystemEvent, TopologyCommand,
};
use crate::domain::services::{
    AddressOverride, ConnectionManager, DeviceIdentity, PeerSignalling, ProfileConnector,
    RoleResolver,
};
use crate::domain::settings::SimulationSettings;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Default)]
struct SimState {
    my_address: Option<BdAddr>,
    connected: Vec<BdAddr>,
    overrides_failed: u32,
    role_resolution: Option<JoinHandle<()>>,
    peer_connect: Option<JoinHandle<()>>,
}

/// Simulated collaborators sharing one state; cheap to clone
#[derive(Clone)]
pub struct SimulatedPlatform {
    settings: SimulationSettings,
    commands: mpsc::UnboundedSender<TopologyCommand>,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPlatform {
    /// Create a new simulated platform posting events to `commands`
    pub fn new(
        settings: SimulationSettings,
        commands: mpsc::UnboundedSender<TopologyCommand>,
    ) -> Self {
        Self {
            settings,
            commands,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Post `event` after `delay_ms`
    fn post_later(&self, delay_ms: u64, event: SubsystemEvent) -> JoinHandle<()> {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            debug!("Simulated event: {:?}", event);
            let _ = commands.send(TopologyCommand::Event(event));
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> Option<R> {
        match self.state.lock() {
            Ok(mut state) => Some(f(&mut state)),
            Err(_) => {
                warn!("Simulator state lock poisoned");
                None
            }
        }
    }
}

impl RoleResolver for SimulatedPlatform {
    fn find_role(&mut self, timeout: Duration) {
        info!("[sim] find role (timeout={:?})", timeout);
        if timeout.is_zero() {
            // Continuous resolution never settles on its own
            return;
        }
        let handle = self.post_later(
            self.settings.role_latency_ms,
            SubsystemEvent::RoleResolution(RoleNotification::Primary),
        );
        self.with_state(|state| state.role_resolution = Some(handle));
    }

    fn cancel_find_role(&mut self) {
        info!("[sim] cancel find role");
        if let Some(Some(handle)) = self.with_state(|state| state.role_resolution.take()) {
            handle.abort();
        }
        self.post_later(0, SubsystemEvent::RoleResolution(RoleNotification::Cancelled));
    }
}

impl ConnectionManager for SimulatedPlatform {
    fn request_page_scan(&mut self, requester: ProcedureId, scan: PageScanType) {
        info!("[sim] page scan {:?} requested by {}", scan, requester);
        let Some(peer) = self.peer_address() else {
            return;
        };
        let delay = Duration::from_millis(self.settings.peer_connect_delay_ms);
        let state = Arc::clone(&self.state);
        let commands = self.commands.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut state) = state.lock() {
                state.connected.push(peer);
            }
            info!("[sim] peer {} connected", peer);
            let _ = commands.send(TopologyCommand::Event(SubsystemEvent::TransportConnected(
                peer,
            )));
        });
        self.with_state(|state| state.peer_connect = Some(handle));
    }

    fn release_page_scan(&mut self, requester: ProcedureId) {
        info!("[sim] page scan released by {}", requester);
        if let Some(Some(handle)) = self.with_state(|state| state.peer_connect.take()) {
            handle.abort();
        }
    }

    fn enable_scan(&mut self) {
        info!("[sim] BR/EDR scanning enabled");
    }

    fn disable_scan(&mut self) {
        info!("[sim] BR/EDR scanning disabled");
        self.post_later(10, SubsystemEvent::ScanDisabled);
    }

    fn is_connected(&self, addr: &BdAddr) -> bool {
        self.with_state(|state| state.connected.contains(addr))
            .unwrap_or(false)
    }

    fn release_acl(&mut self, addr: &BdAddr) {
        debug!("[sim] ACL to {} released", addr);
    }
}

impl ProfileConnector for SimulatedPlatform {
    fn connect(&mut self, profile: Profile, peer: &BdAddr) {
        info!("[sim] connecting {:?} to {}", profile, peer);
        if profile == Profile::Streaming {
            return;
        }
        self.post_later(
            self.settings.profile_latency_ms,
            SubsystemEvent::ProfileConnectCfm {
                profile,
                success: true,
            },
        );
    }
}

impl DeviceIdentity for SimulatedPlatform {
    fn primary_address(&self) -> BdAddr {
        self.settings.primary_address
    }

    fn secondary_address(&self) -> BdAddr {
        self.settings.secondary_address
    }

    fn peer_address(&self) -> Option<BdAddr> {
        let mine = self.with_state(|state| state.my_address).flatten();
        if mine == Some(self.settings.secondary_address) {
            Some(self.settings.primary_address)
        } else {
            Some(self.settings.secondary_address)
        }
    }

    fn set_my_address(&mut self, addr: BdAddr) {
        info!("[sim] identity is now {}", addr);
        self.with_state(|state| state.my_address = Some(addr));
    }
}

impl AddressOverride for SimulatedPlatform {
    fn override_address(&mut self, addr: &BdAddr) -> bool {
        let limit = self.settings.override_failures;
        let accepted = self
            .with_state(|state| {
                if state.overrides_failed < limit {
                    state.overrides_failed += 1;
                    false
                } else {
                    state.overrides_failed = 0;
                    true
                }
            })
            .unwrap_or(false);
        debug!("[sim] override to {}: {}", addr, accepted);
        accepted
    }
}

impl PeerSignalling for SimulatedPlatform {
    fn command_role_switch(&mut self) {
        info!("[sim] role switch command sent to peer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> (SimulatedPlatform, mpsc::UnboundedReceiver<TopologyCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SimulatedPlatform::new(SimulationSettings::default(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_scan_brings_peer_in() {
        let (mut platform, mut rx) = platform();
        platform.request_page_scan(ProcedureId::PriConnectablePeer, PageScanType::Slow);

        let command = rx.recv().await.unwrap();
        assert_eq!(
            command,
            TopologyCommand::Event(SubsystemEvent::TransportConnected(
                SimulationSettings::default().secondary_address
            ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_find_role_aborts_pending_resolution() {
        let (mut platform, mut rx) = platform();
        platform.find_role(Duration::from_secs(5));
        platform.cancel_find_role();

        assert_eq!(
            rx.recv().await.unwrap(),
            TopologyCommand::Event(SubsystemEvent::RoleResolution(RoleNotification::Cancelled))
        );
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_override_fails_configured_number_of_times() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut platform = SimulatedPlatform::new(SimulationSettings::default(), tx);
        let addr = SimulationSettings::default().primary_address;

        let attempts: Vec<bool> = (0..4).map(|_| platform.override_address(&addr)).collect();
        assert_eq!(attempts, vec![false, false, false, true]);
    }
}
