//! Topology Domain Models
//!
//! Identities, results and the events that flow between the topology core,
//! its collaborators and the goal layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outcome vocabulary shared by every procedure and script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcResult {
    Success,
    Failed,
    Timeout,
}

impl fmt::Display for ProcResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Identity of a procedure or script.
///
/// Used for logging and correlation, and as the key of the procedure registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcedureId {
    // Procedures
    FindRole,
    CancelFindRole,
    PriConnectablePeer,
    PriConnectPeerProfiles,
    SetAddress,
    SetRole,
    PermitBt,
    ProhibitBt,
    WaitPeerLinkDrop,
    AllowHandsetConnect,
    CommandRoleSwitch,

    // Scripts
    SetPrimaryAddress,
    SetPrimaryAddressAndFindRole,
    BecomeSecondary,
    NoRoleFindRole,
    PrimaryFindRole,
    NoRoleIdle,
    SecondaryForcedRoleSwitch,
    PrimaryForcedRoleSwitch,
}

impl ProcedureId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FindRole => "find_role",
            Self::CancelFindRole => "cancel_find_role",
            Self::PriConnectablePeer => "pri_connectable_peer",
            Self::PriConnectPeerProfiles => "pri_connect_peer_profiles",
            Self::SetAddress => "set_address",
            Self::SetRole => "set_role",
            Self::PermitBt => "permit_bt",
            Self::ProhibitBt => "prohibit_bt",
            Self::WaitPeerLinkDrop => "wait_peer_link_drop",
            Self::AllowHandsetConnect => "allow_handset_connect",
            Self::CommandRoleSwitch => "command_role_switch",
            Self::SetPrimaryAddress => "set_primary_address",
            Self::SetPrimaryAddressAndFindRole => "set_primary_address_and_find_role",
            Self::BecomeSecondary => "become_secondary",
            Self::NoRoleFindRole => "no_role_find_role",
            Self::PrimaryFindRole => "primary_find_role",
            Self::NoRoleIdle => "no_role_idle",
            Self::SecondaryForcedRoleSwitch => "secondary_forced_role_switch",
            Self::PrimaryForcedRoleSwitch => "primary_forced_role_switch",
        }
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who receives the terminal callback of a started procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Client {
    /// The goal layer, reached through the goal event channel
    Goal,
    /// The script engine running the current step
    Script,
    /// A procedure that owns a nested procedure
    Procedure(ProcedureId),
}

/// Kind of terminal callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmKind {
    Completed,
    Cancelled,
}

/// A terminal callback addressed to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub client: Client,
    pub proc: ProcedureId,
    pub kind: ConfirmKind,
    pub result: ProcResult,
}

/// Bluetooth device address
///
/// Displayed in the NAP,UAP,LAP form used by the firmware logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BdAddr {
    pub nap: u16,
    pub uap: u8,
    pub lap: u32,
}

impl BdAddr {
    pub const fn new(nap: u16, uap: u8, lap: u32) -> Self {
        Self { nap, uap, lap }
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x},{:02x},{:06x}", self.nap, self.uap, self.lap)
    }
}

/// Role held by this earbud in the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TopologyRole {
    #[default]
    None,
    Primary,
    Secondary,
}

/// Topology-owned state mutated by the policy procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopologyState {
    pub role: TopologyRole,
    /// Primary role held without a connected peer
    pub acting_in_role: bool,
    pub handset_connect_allowed: bool,
}

/// Page scan duty cycle requested from the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageScanType {
    Slow,
}

/// Peer profiles connected by the Primary to the Secondary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Profile {
    /// Peer signalling channel
    PeerSignalling,
    /// Audio (SCO) forwarding channel
    AudioForwarding,
    /// A2DP streaming; no connect confirmation is delivered for it yet
    Streaming,
}

impl Profile {
    pub const ALL: [Profile; 3] = [
        Profile::PeerSignalling,
        Profile::AudioForwarding,
        Profile::Streaming,
    ];

    const fn bit(self) -> u8 {
        match self {
            Self::PeerSignalling => 1 << 0,
            Self::AudioForwarding => 1 << 1,
            Self::Streaming => 1 << 2,
        }
    }
}

/// Set of peer profiles stored as bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ProfileSet(u8);

impl ProfileSet {
    pub const EMPTY: ProfileSet = ProfileSet(0);

    pub const fn of(profiles: &[Profile]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < profiles.len() {
            bits |= profiles[i].bit();
            i += 1;
        }
        Self(bits)
    }

    pub fn contains(&self, profile: Profile) -> bool {
        self.0 & profile.bit() != 0
    }

    pub fn insert(&mut self, profile: Profile) {
        self.0 |= profile.bit();
    }

    pub fn remove(&mut self, profile: Profile) {
        self.0 &= !profile.bit();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: ProfileSet) -> ProfileSet {
        ProfileSet(self.0 | other.0)
    }

    /// Profiles in `self` that are not in `other`
    pub fn difference(self, other: ProfileSet) -> ProfileSet {
        ProfileSet(self.0 & !other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = Profile> {
        Profile::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

/// Notifications from the peer role resolution service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleNotification {
    NoPeer,
    ActingPrimary,
    Primary,
    Secondary,
    Cancelled,
}

/// Topics a procedure may subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    RoleResolution,
    Transport,
    Profiles,
    Scan,
}

/// Asynchronous events posted by the collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemEvent {
    RoleResolution(RoleNotification),
    /// BR/EDR ACL to `addr` came up
    TransportConnected(BdAddr),
    /// BR/EDR ACL to `addr` went down
    TransportDisconnected(BdAddr),
    ProfileConnectCfm { profile: Profile, success: bool },
    /// BR/EDR scanning has been disabled
    ScanDisabled,
}

impl SubsystemEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::RoleResolution(_) => Topic::RoleResolution,
            Self::TransportConnected(_) | Self::TransportDisconnected(_) => Topic::Transport,
            Self::ProfileConnectCfm { .. } => Topic::Profiles,
            Self::ScanDisabled => Topic::Scan,
        }
    }
}

/// Events delivered to the goal layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureEvent {
    Started { proc: ProcedureId, result: ProcResult },
    Completed { proc: ProcedureId, result: ProcResult },
    Cancelled { proc: ProcedureId, result: ProcResult },
}

impl From<Confirmation> for ProcedureEvent {
    fn from(cfm: Confirmation) -> Self {
        match cfm.kind {
            ConfirmKind::Completed => ProcedureEvent::Completed {
                proc: cfm.proc,
                result: cfm.result,
            },
            ConfirmKind::Cancelled => ProcedureEvent::Cancelled {
                proc: cfm.proc,
                result: cfm.result,
            },
        }
    }
}

/// Parameters for Find-Role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindRoleParams {
    /// Zero means continuous role resolution
    pub timeout: Duration,
}

impl FindRoleParams {
    pub const TIMEOUT: FindRoleParams = FindRoleParams {
        timeout: Duration::from_secs(5),
    };
    pub const CONTINUOUS: FindRoleParams = FindRoleParams {
        timeout: Duration::ZERO,
    };
}

/// Parameters for Connectable-Peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectablePeerParams {
    pub enable: bool,
}

impl ConnectablePeerParams {
    pub const ENABLE: ConnectablePeerParams = ConnectablePeerParams { enable: true };
    pub const DISABLE: ConnectablePeerParams = ConnectablePeerParams { enable: false };
}

/// Which of the two earbud identities to adopt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Primary,
    Secondary,
}

/// Parameters for Set-Role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetRoleParams {
    pub role: TopologyRole,
    pub acting_in_role: bool,
}

impl SetRoleParams {
    pub const PRIMARY: SetRoleParams = SetRoleParams {
        role: TopologyRole::Primary,
        acting_in_role: false,
    };
    pub const ACTING_PRIMARY: SetRoleParams = SetRoleParams {
        role: TopologyRole::Primary,
        acting_in_role: true,
    };
    pub const SECONDARY: SetRoleParams = SetRoleParams {
        role: TopologyRole::Secondary,
        acting_in_role: false,
    };
    pub const NONE: SetRoleParams = SetRoleParams {
        role: TopologyRole::None,
        acting_in_role: false,
    };
}

/// Static parameter block handed to a procedure on start or update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureParams {
    None,
    FindRole(FindRoleParams),
    ConnectablePeer(ConnectablePeerParams),
    ConnectPeerProfiles(ProfileSet),
    SetAddress(AddressKind),
    SetRole(SetRoleParams),
    AllowHandsetConnect(bool),
}

/// Commands accepted by the topology run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyCommand {
    Start(ProcedureId, ProcedureParams),
    Cancel(ProcedureId),
    Update(ProcedureId, ProcedureParams),
    Event(SubsystemEvent),
    Shutdown,
}
