//! Script Definitions
//!
//! Fixed step lists run by the script engine. Each one behaves to the goal
//! layer like a single procedure.

use crate::domain::models::{
    AddressKind, ConnectablePeerParams, FindRoleParams, ProcedureId, ProcedureParams,
    SetRoleParams,
};

/// One step: a procedure and the static parameters it is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptStep {
    pub proc: ProcedureId,
    pub params: ProcedureParams,
}

impl ScriptStep {
    pub const fn new(proc: ProcedureId, params: ProcedureParams) -> Self {
        Self { proc, params }
    }

    const fn bare(proc: ProcedureId) -> Self {
        Self::new(proc, ProcedureParams::None)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Script {
    pub id: ProcedureId,
    pub steps: &'static [ScriptStep],
}

const PROHIBIT_BT: ScriptStep = ScriptStep::bare(ProcedureId::ProhibitBt);
const PERMIT_BT: ScriptStep = ScriptStep::bare(ProcedureId::PermitBt);
const CANCEL_FIND_ROLE: ScriptStep = ScriptStep::bare(ProcedureId::CancelFindRole);
const SET_PRIMARY_ADDRESS: ScriptStep = ScriptStep::new(
    ProcedureId::SetAddress,
    ProcedureParams::SetAddress(AddressKind::Primary),
);
const SET_SECONDARY_ADDRESS: ScriptStep = ScriptStep::new(
    ProcedureId::SetAddress,
    ProcedureParams::SetAddress(AddressKind::Secondary),
);
const FIND_ROLE_TIMEOUT: ScriptStep = ScriptStep::new(
    ProcedureId::FindRole,
    ProcedureParams::FindRole(FindRoleParams::TIMEOUT),
);
const DISABLE_CONNECTABLE_PEER: ScriptStep = ScriptStep::new(
    ProcedureId::PriConnectablePeer,
    ProcedureParams::ConnectablePeer(ConnectablePeerParams::DISABLE),
);
const PROHIBIT_HANDSET_CONNECT: ScriptStep = ScriptStep::new(
    ProcedureId::AllowHandsetConnect,
    ProcedureParams::AllowHandsetConnect(false),
);

const fn set_role(params: SetRoleParams) -> ScriptStep {
    ScriptStep::new(ProcedureId::SetRole, ProcedureParams::SetRole(params))
}

pub static SET_PRIMARY_ADDRESS_SCRIPT: Script = Script {
    id: ProcedureId::SetPrimaryAddress,
    steps: &[PROHIBIT_BT, SET_PRIMARY_ADDRESS, PERMIT_BT],
};

pub static SET_PRIMARY_ADDRESS_AND_FIND_ROLE: Script = Script {
    id: ProcedureId::SetPrimaryAddressAndFindRole,
    steps: &[PROHIBIT_BT, SET_PRIMARY_ADDRESS, PERMIT_BT, FIND_ROLE_TIMEOUT],
};

pub static BECOME_SECONDARY: Script = Script {
    id: ProcedureId::BecomeSecondary,
    steps: &[
        PROHIBIT_BT,
        SET_SECONDARY_ADDRESS,
        set_role(SetRoleParams::SECONDARY),
        PERMIT_BT,
    ],
};

pub static NO_ROLE_FIND_ROLE: Script = Script {
    id: ProcedureId::NoRoleFindRole,
    steps: &[
        PROHIBIT_BT,
        SET_PRIMARY_ADDRESS,
        set_role(SetRoleParams::NONE),
        PERMIT_BT,
        FIND_ROLE_TIMEOUT,
    ],
};

pub static PRIMARY_FIND_ROLE: Script = Script {
    id: ProcedureId::PrimaryFindRole,
    steps: &[ScriptStep::new(
        ProcedureId::FindRole,
        ProcedureParams::FindRole(FindRoleParams::CONTINUOUS),
    )],
};

pub static NO_ROLE_IDLE: Script = Script {
    id: ProcedureId::NoRoleIdle,
    steps: &[
        DISABLE_CONNECTABLE_PEER,
        PROHIBIT_HANDSET_CONNECT,
        CANCEL_FIND_ROLE,
        PROHIBIT_BT,
        SET_PRIMARY_ADDRESS,
        set_role(SetRoleParams::NONE),
    ],
};

pub static SECONDARY_FORCED_ROLE_SWITCH: Script = Script {
    id: ProcedureId::SecondaryForcedRoleSwitch,
    steps: &[
        ScriptStep::bare(ProcedureId::WaitPeerLinkDrop),
        PROHIBIT_BT,
        SET_PRIMARY_ADDRESS,
        set_role(SetRoleParams::PRIMARY),
        PERMIT_BT,
    ],
};

pub static PRIMARY_FORCED_ROLE_SWITCH: Script = Script {
    id: ProcedureId::PrimaryForcedRoleSwitch,
    steps: &[
        ScriptStep::bare(ProcedureId::CommandRoleSwitch),
        PROHIBIT_HANDSET_CONNECT,
        DISABLE_CONNECTABLE_PEER,
        CANCEL_FIND_ROLE,
        PROHIBIT_BT,
        SET_SECONDARY_ADDRESS,
        PERMIT_BT,
        set_role(SetRoleParams::SECONDARY),
    ],
};

/// Find the script registered under `id`
pub fn lookup(id: ProcedureId) -> Option<&'static Script> {
    let script = match id {
        ProcedureId::SetPrimaryAddress => &SET_PRIMARY_ADDRESS_SCRIPT,
        ProcedureId::SetPrimaryAddressAndFindRole => &SET_PRIMARY_ADDRESS_AND_FIND_ROLE,
        ProcedureId::BecomeSecondary => &BECOME_SECONDARY,
        ProcedureId::NoRoleFindRole => &NO_ROLE_FIND_ROLE,
        ProcedureId::PrimaryFindRole => &PRIMARY_FIND_ROLE,
        ProcedureId::NoRoleIdle => &NO_ROLE_IDLE,
        ProcedureId::SecondaryForcedRoleSwitch => &SECONDARY_FORCED_ROLE_SWITCH,
        ProcedureId::PrimaryForcedRoleSwitch => &PRIMARY_FORCED_ROLE_SWITCH,
        _ => return None,
    };
    Some(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedures::Procedures;

    const ALL_SCRIPTS: [ProcedureId; 8] = [
        ProcedureId::SetPrimaryAddress,
        ProcedureId::SetPrimaryAddressAndFindRole,
        ProcedureId::BecomeSecondary,
        ProcedureId::NoRoleFindRole,
        ProcedureId::PrimaryFindRole,
        ProcedureId::NoRoleIdle,
        ProcedureId::SecondaryForcedRoleSwitch,
        ProcedureId::PrimaryForcedRoleSwitch,
    ];

    #[test]
    fn test_every_script_is_registered_under_its_id() {
        for id in ALL_SCRIPTS {
            let script = lookup(id).unwrap();
            assert_eq!(script.id, id);
        }
        assert!(lookup(ProcedureId::FindRole).is_none());
    }

    #[test]
    fn test_steps_only_use_registered_procedures() {
        let procedures = Procedures::new();
        for id in ALL_SCRIPTS {
            for step in lookup(id).unwrap().steps {
                assert!(procedures.contains(step.proc), "{} uses {}", id, step.proc);
            }
        }
    }

    #[test]
    fn test_address_change_is_bracketed_by_bt_access() {
        let steps: Vec<ProcedureId> = SET_PRIMARY_ADDRESS_AND_FIND_ROLE
            .steps
            .iter()
            .map(|step| step.proc)
            .collect();
        assert_eq!(
            steps,
            vec![
                ProcedureId::ProhibitBt,
                ProcedureId::SetAddress,
                ProcedureId::PermitBt,
                ProcedureId::FindRole,
            ]
        );
    }
}
