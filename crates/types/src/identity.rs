//! User and privilege records stored in the `_users` database.

use sbor::prelude::*;
use std::collections::BTreeMap;

/// Per-database permission level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum DbPermission {
    /// Read-only access.
    Read,
    /// Read and write access.
    ReadWrite,
}

/// Privileges attached to a user record.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Privilege {
    /// Cluster administrator flag. Admins bypass per-database permissions.
    pub admin: bool,
    /// Permission level per user database.
    pub db_permissions: BTreeMap<String, DbPermission>,
}

/// A user record as persisted in the `_users` database.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct User {
    /// Unique user id; also the record's key in `_users`.
    pub id: String,
    /// DER-encoded certificate the user signs with.
    pub certificate: Vec<u8>,
    /// Granted privileges, absent for a bare identity.
    pub privilege: Option<Privilege>,
}

impl User {
    /// Build an administrator record from an id and certificate.
    pub fn admin(id: impl Into<String>, certificate: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            certificate,
            privilege: Some(Privilege {
                admin: true,
                db_permissions: BTreeMap::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_record_has_admin_privilege() {
        let user = User::admin("A1", b"cert-a1".to_vec());
        assert!(user.privilege.as_ref().unwrap().admin);
    }

    #[test]
    fn test_user_roundtrip() {
        let mut privilege = Privilege::default();
        privilege
            .db_permissions
            .insert("db1".into(), DbPermission::ReadWrite);
        let user = User {
            id: "alice".into(),
            certificate: b"cert".to_vec(),
            privilege: Some(privilege),
        };

        let encoded = sbor::basic_encode(&user).unwrap();
        let decoded: User = sbor::basic_decode(&encoded).unwrap();
        assert_eq!(user, decoded);
        assert_eq!(encoded, sbor::basic_encode(&decoded).unwrap());
    }
}
