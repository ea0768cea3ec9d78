//! # Auth Store
//!
//! In-memory mapping of registry users to credentials and ACLs, rendered to
//! the registry's `authfile.json`.
//!
//! The store is mutated during a reconciliation pass and persisted by
//! writing the rendered file through the workload; the service picks up
//! changes on restart.
//!
//! Authfile format:
//!
//! ```json
//! {
//!   "users": [
//!     {"username": "...", "algorithm": "sha512", "salt": "...", "password_hash": "..."}
//!   ],
//!   "permissions": [
//!     {"username": "...", "operation": "Write", "resource": ".*"}
//!   ]
//! }
//! ```

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::{debug, warn};

/// Access role granted to a registry user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

/// Operation an ACL permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Read,
    Write,
}

/// A single registry ACL entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    pub username: String,
    pub operation: Operation,
    pub resource: String,
}

/// Stored credentials for a registry user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub algorithm: String,
    pub salt: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
struct AuthEntry {
    credentials: UserCredentials,
    acls: Vec<Acl>,
}

/// Serialized authfile shape.
#[derive(Debug, Serialize, Deserialize)]
struct Authfile {
    users: Vec<UserCredentials>,
    permissions: Vec<Acl>,
}

/// Registry user and ACL store.
#[derive(Debug, Default)]
pub struct AuthStore {
    entries: BTreeMap<String, AuthEntry>,
}

impl AuthStore {
    /// Add a user, hashing the password with a random salt.
    ///
    /// Existing users are kept unless `replace` is set.
    pub fn add_user(&mut self, username: &str, password: &str, replace: bool) {
        if self.entries.contains_key(username) && !replace {
            debug!(username, "user already exists, skipping creation");
            return;
        }

        let salt = generate_salt();
        let credentials = UserCredentials {
            username: username.to_string(),
            algorithm: "sha512".to_string(),
            password_hash: hash_password(password, &salt),
            salt,
        };
        self.entries.insert(
            username.to_string(),
            AuthEntry {
                credentials,
                acls: Vec::new(),
            },
        );
    }

    /// Set ACLs for a user based on their role.
    ///
    /// Admins get Write on everything; plain users get Read on config and
    /// on their own subject namespace.
    pub fn add_acl(&mut self, username: &str, role: Role, subject: Option<&str>) {
        let Some(entry) = self.entries.get_mut(username) else {
            warn!(username, "user does not exist, skipping ACL creation");
            return;
        };

        entry.acls = match role {
            Role::Admin => vec![Acl {
                username: username.to_string(),
                operation: Operation::Write,
                resource: ".*".to_string(),
            }],
            Role::User => vec![
                Acl {
                    username: username.to_string(),
                    operation: Operation::Read,
                    resource: "Config:".to_string(),
                },
                Acl {
                    username: username.to_string(),
                    operation: Operation::Read,
                    resource: format!("Subject:{}.*", subject.unwrap_or_default()),
                },
            ],
        };
    }

    /// Remove a user and their ACLs.
    pub fn remove_user(&mut self, username: &str) {
        self.entries.remove(username);
    }

    /// Whether a user exists.
    #[must_use]
    pub fn has_user(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    /// All stored usernames, sorted.
    #[must_use]
    pub fn usernames(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Verify a password against the stored hash.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.entries
            .get(username)
            .is_some_and(|e| e.credentials.password_hash == hash_password(password, &e.credentials.salt))
    }

    /// Render the authfile JSON for the workload.
    pub fn render(&self) -> serde_json::Result<String> {
        let mut users = Vec::new();
        let mut permissions = Vec::new();
        for entry in self.entries.values() {
            users.push(entry.credentials.clone());
            permissions.extend(entry.acls.iter().cloned());
        }
        serde_json::to_string_pretty(&Authfile { users, permissions })
    }
}

fn generate_salt() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    STANDARD.encode(raw)
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    STANDARD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_user_and_verify() {
        let mut auth = AuthStore::default();
        auth.add_user("operator", "hunter2", false);

        assert!(auth.has_user("operator"));
        assert!(auth.verify("operator", "hunter2"));
        assert!(!auth.verify("operator", "wrong"));
        assert!(!auth.verify("ghost", "hunter2"));
    }

    #[test]
    fn test_add_user_without_replace_keeps_existing() {
        let mut auth = AuthStore::default();
        auth.add_user("operator", "first", false);
        auth.add_user("operator", "second", false);
        assert!(auth.verify("operator", "first"));

        auth.add_user("operator", "second", true);
        assert!(auth.verify("operator", "second"));
        assert!(!auth.verify("operator", "first"));
    }

    #[test]
    fn test_admin_acls() {
        let mut auth = AuthStore::default();
        auth.add_user("operator", "pw", false);
        auth.add_acl("operator", Role::Admin, None);

        let rendered = auth.render().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        let perms = parsed["permissions"].as_array().unwrap();
        assert_eq!(perms.len(), 1);
        assert_eq!(perms[0]["operation"], "Write");
        assert_eq!(perms[0]["resource"], ".*");
    }

    #[test]
    fn test_user_role_acls_are_scoped_to_subject() {
        let mut auth = AuthStore::default();
        auth.add_user("relation-7", "pw", false);
        auth.add_acl("relation-7", Role::User, Some("billing"));

        let rendered = auth.render().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        let perms = parsed["permissions"].as_array().unwrap();
        assert_eq!(perms.len(), 2);
        assert_eq!(perms[1]["resource"], "Subject:billing.*");
        assert_eq!(perms[1]["operation"], "Read");
    }

    #[test]
    fn test_remove_user_drops_acls() {
        let mut auth = AuthStore::default();
        auth.add_user("relation-7", "pw", false);
        auth.add_acl("relation-7", Role::User, Some("billing"));
        auth.remove_user("relation-7");

        assert!(!auth.has_user("relation-7"));
        let parsed: serde_json::Value =
            serde_json::from_str(&auth.render().unwrap()).unwrap();
        assert!(parsed["users"].as_array().unwrap().is_empty());
        assert!(parsed["permissions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_acl_for_missing_user_is_skipped() {
        let mut auth = AuthStore::default();
        auth.add_acl("nobody", Role::Admin, None);
        let parsed: serde_json::Value =
            serde_json::from_str(&auth.render().unwrap()).unwrap();
        assert!(parsed["permissions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut auth = AuthStore::default();
        auth.add_user("b-user", "pw", false);
        auth.add_user("a-user", "pw", false);
        let first = auth.render().unwrap();
        let second = auth.render().unwrap();
        assert_eq!(first, second);
    }
}
