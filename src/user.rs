//! User directory: identity lookup keyed by credentials.

use std::collections::HashMap;

use crate::config::User as UserEntry;
use crate::crypto::{CryptoError, PasswordManager};
use crate::model::SubjectInfo;

/// Why a credential presentation was refused.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("unknown user or wrong password")]
    Invalid,
    #[error(transparent)]
    Crypto(CryptoError),
}

/// A registered user.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    password: String,
}

impl User {
    pub fn info(&self) -> SubjectInfo {
        SubjectInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

impl From<UserEntry> for User {
    fn from(entry: UserEntry) -> Self {
        Self {
            id: entry.id.to_lowercase(),
            name: entry.name,
            email: entry.email,
            password: entry.password,
        }
    }
}

/// Users known by this instance.
pub struct UserDirectory {
    users: HashMap<String, User>,
    pwd: PasswordManager,
}

impl UserDirectory {
    /// Create a new [`UserDirectory`].
    pub fn new(users: impl IntoIterator<Item = UserEntry>, pwd: PasswordManager) -> Self {
        Self {
            users: users
                .into_iter()
                .map(User::from)
                .map(|user| (user.id.clone(), user))
                .collect(),
            pwd,
        }
    }

    /// Find a user by its identifier.
    pub fn find_by_id(&self, id: &str) -> Option<&User> {
        self.users.get(&id.to_lowercase())
    }

    /// Verify a credential presentation and return the matching user.
    pub fn authenticate(&self, id: &str, password: &str) -> Result<&User, CredentialError> {
        let Some(user) = self.find_by_id(id) else {
            return Err(CredentialError::Invalid);
        };

        match self.pwd.verify_password(password, &user.password) {
            Ok(()) => Ok(user),
            Err(CryptoError::Mismatch) => Err(CredentialError::Invalid),
            Err(err) => Err(CredentialError::Crypto(err)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Argon2;

    pub fn password_manager() -> PasswordManager {
        PasswordManager::new(Some(Argon2 {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }))
        .unwrap()
    }

    pub fn directory(password: &str) -> UserDirectory {
        let pwd = password_manager();
        let hash = pwd.hash_password(password).unwrap();
        UserDirectory::new(
            [UserEntry {
                id: "U1".into(),
                name: "User One".into(),
                email: "u1@example.com".into(),
                password: hash,
            }],
            pwd,
        )
    }

    #[test]
    fn test_authenticate() {
        let users = directory("P$soW%920$n&");

        let user = users.authenticate("u1", "P$soW%920$n&").unwrap();
        assert_eq!(user.info().id, "u1");
        assert_eq!(user.info().email, "u1@example.com");

        assert!(matches!(
            users.authenticate("u1", "wrong"),
            Err(CredentialError::Invalid)
        ));
        assert!(matches!(
            users.authenticate("nobody", "P$soW%920$n&"),
            Err(CredentialError::Invalid)
        ));
    }

    #[test]
    fn test_broken_hash_is_not_a_credential_error() {
        let users = UserDirectory::new(
            [UserEntry {
                id: "u2".into(),
                password: "plaintext".into(),
                ..Default::default()
            }],
            password_manager(),
        );

        assert!(matches!(
            users.authenticate("u2", "plaintext"),
            Err(CredentialError::Crypto(_))
        ));
    }
}
