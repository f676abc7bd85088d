//! Authenticator port - 認証ゲート
//!
//! routing 層は資格情報を受け取り、ここで principal に変換します。
//! core はそれ以上 principal を検査しません。

use subtle::ConstantTimeEq;

use crate::domain::{Credentials, Principal};

/// Opaque credential check: a principal on success, `None` otherwise.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> Option<Principal>;
}

/// Accepts exactly one configured username/password pair.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    expected: Credentials,
}

impl StaticAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            expected: Credentials::new(username, password),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> Option<Principal> {
        let username_ok = self
            .expected
            .username
            .as_bytes()
            .ct_eq(credentials.username.as_bytes());
        let password_ok = self
            .expected
            .password
            .as_bytes()
            .ct_eq(credentials.password.as_bytes());
        bool::from(username_ok & password_ok).then(|| Principal::new(credentials.username.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn matching_credentials_yield_principal() {
        let auth = StaticAuthenticator::new("test", "test");
        let principal = auth.authenticate(&Credentials::new("test", "test"));
        assert_eq!(principal, Some(Principal::new("test")));
    }

    #[rstest]
    #[case::wrong_password("test", "t")]
    #[case::wrong_user("other", "test")]
    #[case::empty("", "")]
    #[case::password_prefix("test", "testing")]
    #[case::user_prefix("tes", "test")]
    fn wrong_credentials_are_rejected(#[case] user: &str, #[case] password: &str) {
        let auth = StaticAuthenticator::new("test", "test");
        assert!(auth.authenticate(&Credentials::new(user, password)).is_none());
    }
}
