//! Access-privilege seam.
//!
//! Identity, groups and sessions live in an external service; this module
//! defines the privilege levels and the predicate the rest of the system
//! consumes when a listing must be access-filtered.

/// Privilege levels, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessPrivilege {
    AnonRead = 1,
    ReadOnly = 2,
    ReadWrite = 3,
    Manage = 4,
}

impl AccessPrivilege {
    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            1 => Some(AccessPrivilege::AnonRead),
            2 => Some(AccessPrivilege::ReadOnly),
            3 => Some(AccessPrivilege::ReadWrite),
            4 => Some(AccessPrivilege::Manage),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccessPrivilege::AnonRead => "Anon-Read",
            AccessPrivilege::ReadOnly => "Read-Only",
            AccessPrivilege::ReadWrite => "Read-Write",
            AccessPrivilege::Manage => "Manage",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Anon-Read" => Some(AccessPrivilege::AnonRead),
            "Read-Only" => Some(AccessPrivilege::ReadOnly),
            "Read-Write" => Some(AccessPrivilege::ReadWrite),
            "Manage" => Some(AccessPrivilege::Manage),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccessPrivilege {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Predicate exposed by the external identity/access service.
pub trait AccessPolicy: Send + Sync {
    /// Whether `user` holds at least `min` privilege on the container.
    fn user_has_privilege(&self, user: &str, container_id: i64, min: AccessPrivilege) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(AccessPrivilege::AnonRead < AccessPrivilege::ReadOnly);
        assert!(AccessPrivilege::ReadWrite < AccessPrivilege::Manage);
    }

    #[test]
    fn test_value_round_trip() {
        for priv_ in [
            AccessPrivilege::AnonRead,
            AccessPrivilege::ReadOnly,
            AccessPrivilege::ReadWrite,
            AccessPrivilege::Manage,
        ] {
            assert_eq!(AccessPrivilege::from_value(priv_.value()), Some(priv_));
            assert_eq!(AccessPrivilege::from_name(priv_.name()), Some(priv_));
        }
        assert_eq!(AccessPrivilege::from_value(0), None);
        assert_eq!(AccessPrivilege::from_name("Root"), None);
    }
}
