//! Collaborator Interfaces
//!
//! The topology core drives these externally-owned subsystems. Requests are
//! made synchronously through the traits; their asynchronous outcomes come
//! back as [`SubsystemEvent`](crate::domain::models::SubsystemEvent)s posted
//! to the topology.

use crate::domain::models::{BdAddr, PageScanType, Profile, ProcedureId};
use std::time::Duration;

/// Peer role resolution service
pub trait RoleResolver {
    /// Start resolving roles with the peer. A zero timeout runs continuously.
    fn find_role(&mut self, timeout: Duration);

    /// Cancel resolution; confirmed by a `Cancelled` notification
    fn cancel_find_role(&mut self);
}

/// BR/EDR connection and scan management
pub trait ConnectionManager {
    fn request_page_scan(&mut self, requester: ProcedureId, scan: PageScanType);
    fn release_page_scan(&mut self, requester: ProcedureId);

    /// Re-enable BR/EDR scanning
    fn enable_scan(&mut self);

    /// Disable BR/EDR scanning; confirmed by `ScanDisabled`
    fn disable_scan(&mut self);

    fn is_connected(&self, addr: &BdAddr) -> bool;

    /// Drop the lock holding the ACL to `addr` open
    fn release_acl(&mut self, addr: &BdAddr);
}

/// Per-profile connection requests towards the peer
pub trait ProfileConnector {
    fn connect(&mut self, profile: Profile, peer: &BdAddr);
}

/// Device identity store
pub trait DeviceIdentity {
    fn primary_address(&self) -> BdAddr;
    fn secondary_address(&self) -> BdAddr;

    /// Address of the peer earbud, if paired
    fn peer_address(&self) -> Option<BdAddr>;

    /// Persist the identity this earbud now uses
    fn set_my_address(&mut self, addr: BdAddr);
}

/// Low level radio address override.
///
/// Fails while the radio is not idle; callers retry.
pub trait AddressOverride {
    fn override_address(&mut self, addr: &BdAddr) -> bool;
}

/// Instructions sent to the peer earbud
pub trait PeerSignalling {
    /// Tell the Secondary to become Primary. No acknowledgement is returned.
    fn command_role_switch(&mut self);
}

/// Bundle of collaborators handed to procedures
pub struct Services {
    pub role_resolver: Box<dyn RoleResolver + Send>,
    pub connection_manager: Box<dyn ConnectionManager + Send>,
    pub profiles: Box<dyn ProfileConnector + Send>,
    pub identity: Box<dyn DeviceIdentity + Send>,
    pub radio: Box<dyn AddressOverride + Send>,
    pub peer_signalling: Box<dyn PeerSignalling + Send>,
}

impl Services {
    /// Build a bundle from one value implementing every collaborator
    pub fn from_platform<P>(platform: P) -> Self
    where
        P: RoleResolver
            + ConnectionManager
            + ProfileConnector
            + DeviceIdentity
            + AddressOverride
            + PeerSignalling
            + Clone
            + Send
            + 'static,
    {
        Self {
            role_resolver: Box::new(platform.clone()),
            connection_manager: Box::new(platform.clone()),
            profiles: Box::new(platform.clone()),
            identity: Box::new(platform.clone()),
            radio: Box::new(platform.clone()),
            peer_signalling: Box::new(platform),
        }
    }
}
