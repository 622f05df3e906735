use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Roles known to the service. Citizens authenticate through FranceConnect,
/// agents (AMO, administrators, analysts) through ProConnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Particulier,
    Amo,
    Analyste,
    Administrateur,
    SuperAdministrateur,
}

impl UserRole {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::Particulier,
            Self::Amo,
            Self::Analyste,
            Self::Administrateur,
            Self::SuperAdministrateur,
        ]
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::Particulier => "PARTICULIER",
            Self::Amo => "AMO",
            Self::Analyste => "ANALYSTE",
            Self::Administrateur => "ADMINISTRATEUR",
            Self::SuperAdministrateur => "SUPER_ADMINISTRATEUR",
        }
    }

    pub const fn is_agent(self) -> bool {
        !matches!(self, Self::Particulier)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ordered()
            .into_iter()
            .find(|role| role.code().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownRole(value.to_string()))
    }
}

/// Actions guarded by the permission table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ParcoursReadOwn,
    ParcoursWriteOwn,
    SimulationSubmit,
    ValidationsView,
    ValidationsDecide,
    SimulationOverride,
    DossiersView,
    StatistiquesView,
    ParcoursRewind,
    ParcoursErase,
    AgentsManage,
}

impl Permission {
    pub const fn ordered() -> [Self; 11] {
        [
            Self::ParcoursReadOwn,
            Self::ParcoursWriteOwn,
            Self::SimulationSubmit,
            Self::ValidationsView,
            Self::ValidationsDecide,
            Self::SimulationOverride,
            Self::DossiersView,
            Self::StatistiquesView,
            Self::ParcoursRewind,
            Self::ParcoursErase,
            Self::AgentsManage,
        ]
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::ParcoursReadOwn => "PARCOURS_READ_OWN",
            Self::ParcoursWriteOwn => "PARCOURS_WRITE_OWN",
            Self::SimulationSubmit => "SIMULATION_SUBMIT",
            Self::ValidationsView => "VALIDATIONS_VIEW",
            Self::ValidationsDecide => "VALIDATIONS_DECIDE",
            Self::SimulationOverride => "SIMULATION_OVERRIDE",
            Self::DossiersView => "DOSSIERS_VIEW",
            Self::StatistiquesView => "STATISTIQUES_VIEW",
            Self::ParcoursRewind => "PARCOURS_REWIND",
            Self::ParcoursErase => "PARCOURS_ERASE",
            Self::AgentsManage => "AGENTS_MANAGE",
        }
    }
}

impl FromStr for Permission {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ordered()
            .into_iter()
            .find(|permission| permission.code().eq_ignore_ascii_case(value.trim()))
            .ok_or(())
    }
}

/// Static role → permission table. The match is exhaustive over roles, so a
/// new role does not compile until it is given an explicit grant list.
pub const fn permissions_for(role: UserRole) -> &'static [Permission] {
    use Permission::*;

    match role {
        UserRole::Particulier => &[ParcoursReadOwn, ParcoursWriteOwn, SimulationSubmit, ParcoursErase],
        UserRole::Amo => &[ValidationsView, ValidationsDecide, SimulationOverride, DossiersView],
        UserRole::Analyste => &[StatistiquesView],
        UserRole::Administrateur => &[
            ValidationsView,
            SimulationOverride,
            DossiersView,
            StatistiquesView,
            ParcoursRewind,
            ParcoursErase,
        ],
        UserRole::SuperAdministrateur => &[
            ValidationsView,
            SimulationOverride,
            DossiersView,
            StatistiquesView,
            ParcoursRewind,
            ParcoursErase,
            AgentsManage,
        ],
    }
}

pub fn has_permission(role: UserRole, permission: Permission) -> bool {
    permissions_for(role).contains(&permission)
}

/// String-keyed entry point for callers holding raw session claims.
/// Anything outside the known role or permission sets is denied.
pub fn has_permission_code(role: &str, permission: &str) -> bool {
    match (role.parse::<UserRole>(), permission.parse::<Permission>()) {
        (Ok(role), Ok(permission)) => has_permission(role, permission),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amo_can_decide_but_citizen_cannot() {
        assert!(has_permission(UserRole::Amo, Permission::ValidationsDecide));
        assert!(!has_permission(UserRole::Particulier, Permission::ValidationsDecide));
        assert!(!has_permission(UserRole::Administrateur, Permission::ValidationsDecide));
    }

    #[test]
    fn unknown_codes_fail_closed() {
        assert!(!has_permission_code("HACKER", "VALIDATIONS_DECIDE"));
        assert!(!has_permission_code("AMO", "EVERYTHING"));
        assert!(!has_permission_code("", ""));
        assert!(has_permission_code("amo", "validations_decide"));
    }

    #[test]
    fn every_pair_outside_the_table_is_denied() {
        for role in UserRole::ordered() {
            for permission in Permission::ordered() {
                let listed = permissions_for(role).contains(&permission);
                assert_eq!(has_permission(role, permission), listed);
                assert_eq!(has_permission_code(role.code(), permission.code()), listed);
            }
        }
    }

    #[test]
    fn role_codes_round_trip_through_from_str() {
        for role in UserRole::ordered() {
            assert_eq!(role.code().parse::<UserRole>(), Ok(role));
        }
        assert_eq!(
            "inconnu".parse::<UserRole>(),
            Err(UnknownRole("inconnu".to_string()))
        );
    }
}
