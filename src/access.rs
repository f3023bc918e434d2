//! Team roles and resource access levels
//!
//! Both are closed, totally ordered enums. Parsing is lenient: any text that
//! is not a known name becomes `None`, so a garbled cache entry or event
//! field can only reduce permissions.

use crate::error::{AclError, AclResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access granted on a single folder or note
///
/// Variant order is priority order, so the derived `Ord` matches `priority()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccessLevel {
    #[default]
    None,
    Read,
    Write,
    Owner,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 4] = [Self::None, Self::Read, Self::Write, Self::Owner];

    pub fn priority(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Read => 1,
            Self::Write => 2,
            Self::Owner => 3,
        }
    }

    /// True when `self` grants everything `other` grants
    pub fn at_least(self, other: AccessLevel) -> bool {
        self.priority() >= other.priority()
    }

    /// The higher of two levels
    pub fn max(a: AccessLevel, b: AccessLevel) -> AccessLevel {
        if a.priority() >= b.priority() {
            a
        } else {
            b
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Owner => "OWNER",
        }
    }

    fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(Self::None),
            "READ" => Some(Self::Read),
            "WRITE" => Some(Self::Write),
            "OWNER" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Parse a stored or transmitted level; unknown text maps to `None`
    pub fn parse_lenient(s: &str) -> Self {
        Self::from_name(s).unwrap_or(Self::None)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse for user input
impl FromStr for AccessLevel {
    type Err = AclError;

    fn from_str(s: &str) -> AclResult<Self> {
        Self::from_name(s)
            .ok_or_else(|| AclError::Validation(format!("unknown access level: {}", s)))
    }
}

impl From<String> for AccessLevel {
    fn from(s: String) -> Self {
        Self::parse_lenient(&s)
    }
}

impl From<AccessLevel> for String {
    fn from(level: AccessLevel) -> Self {
        level.as_str().to_string()
    }
}

/// Role of a user within a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TeamRole {
    #[default]
    None,
    Member,
    Manager,
    Owner,
}

impl TeamRole {
    pub const ALL: [TeamRole; 4] = [Self::None, Self::Member, Self::Manager, Self::Owner];

    pub fn priority(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Member => 1,
            Self::Manager => 2,
            Self::Owner => 3,
        }
    }

    /// Gate check: does this role satisfy `threshold`
    pub fn at_least(self, threshold: TeamRole) -> bool {
        self.priority() >= threshold.priority()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Member => "MEMBER",
            Self::Manager => "MANAGER",
            Self::Owner => "OWNER",
        }
    }

    fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(Self::None),
            "MEMBER" => Some(Self::Member),
            "MANAGER" => Some(Self::Manager),
            "OWNER" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Parse a stored or transmitted role; unknown text maps to `None`
    pub fn parse_lenient(s: &str) -> Self {
        Self::from_name(s).unwrap_or(Self::None)
    }
}

impl fmt::Display for TeamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TeamRole {
    type Err = AclError;

    fn from_str(s: &str) -> AclResult<Self> {
        Self::from_name(s).ok_or_else(|| AclError::Validation(format!("unknown team role: {}", s)))
    }
}

impl From<String> for TeamRole {
    fn from(s: String) -> Self {
        Self::parse_lenient(&s)
    }
}

impl From<TeamRole> for String {
    fn from(role: TeamRole) -> Self {
        role.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_matches_priority() {
        for a in AccessLevel::ALL {
            for b in AccessLevel::ALL {
                let m = AccessLevel::max(a, b);
                assert_eq!(m.priority(), a.priority().max(b.priority()));
                assert_eq!(m, AccessLevel::max(b, a));
                assert_eq!(m, std::cmp::max(a, b));
            }
        }
    }

    #[test]
    fn max_is_associative() {
        for a in AccessLevel::ALL {
            for b in AccessLevel::ALL {
                for c in AccessLevel::ALL {
                    assert_eq!(
                        AccessLevel::max(AccessLevel::max(a, b), c),
                        AccessLevel::max(a, AccessLevel::max(b, c))
                    );
                }
            }
        }
    }

    #[test]
    fn role_at_least_none_always_holds() {
        for r in TeamRole::ALL {
            assert!(r.at_least(TeamRole::None));
        }
    }

    #[test]
    fn none_role_satisfies_nothing_else() {
        for r in TeamRole::ALL.into_iter().filter(|r| *r != TeamRole::None) {
            assert!(!TeamRole::None.at_least(r));
        }
    }

    #[test]
    fn manager_gates() {
        assert!(TeamRole::Owner.at_least(TeamRole::Manager));
        assert!(TeamRole::Manager.at_least(TeamRole::Manager));
        assert!(!TeamRole::Member.at_least(TeamRole::Manager));
    }

    #[test]
    fn lenient_parse_degrades_to_none() {
        assert_eq!(AccessLevel::parse_lenient("write"), AccessLevel::Write);
        assert_eq!(AccessLevel::parse_lenient(" OWNER "), AccessLevel::Owner);
        assert_eq!(AccessLevel::parse_lenient("FOLDER"), AccessLevel::None);
        assert_eq!(AccessLevel::parse_lenient(""), AccessLevel::None);
        assert_eq!(TeamRole::parse_lenient("manager"), TeamRole::Manager);
        assert_eq!(TeamRole::parse_lenient("admin"), TeamRole::None);
    }

    #[test]
    fn strict_parse_rejects_unknown() {
        assert_eq!("READ".parse::<AccessLevel>().unwrap(), AccessLevel::Read);
        assert!("superuser".parse::<AccessLevel>().is_err());
        assert!("".parse::<TeamRole>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&AccessLevel::Write).unwrap();
        assert_eq!(json, "\"WRITE\"");
        let level: AccessLevel = serde_json::from_str("\"garbage\"").unwrap();
        assert_eq!(level, AccessLevel::None);
        let role: TeamRole = serde_json::from_str("\"MANAGER\"").unwrap();
        assert_eq!(role, TeamRole::Manager);
    }
}
