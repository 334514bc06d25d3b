//! Bearer credential lookup for (re)connecting
//!
//! The connection asks its [`CredentialSource`] for the current token each time
//! an automatic reconnect fires, so a token refreshed by the session store in
//! the meantime is picked up instead of the one the session was opened with.

/// Source of the current bearer token
pub trait CredentialSource: Send + Sync {
    /// The token to connect with, or `None` if the user is signed out
    fn current_token(&self) -> Option<String>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialSource for StaticCredential {
    fn current_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Reads an environment variable on every lookup; empty counts as absent
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub const DEFAULT_VAR: &'static str = "CHATHUB_TOKEN";

    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredential {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

impl CredentialSource for EnvCredential {
    fn current_token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_static_credential() {
        let source = StaticCredential::new("abc");
        assert_eq!(source.current_token().as_deref(), Some("abc"));
    }

    #[test]
    fn test_closure_source_sees_refreshed_token() {
        let store = Arc::new(Mutex::new(Some("old".to_string())));
        let s = store.clone();
        let source = move || s.lock().clone();

        assert_eq!(source.current_token().as_deref(), Some("old"));
        *store.lock() = Some("new".into());
        assert_eq!(source.current_token().as_deref(), Some("new"));
        *store.lock() = None;
        assert_eq!(source.current_token(), None);
    }

    #[test]
    fn test_env_credential_missing_var() {
        let source = EnvCredential::new("CHATHUB_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert_eq!(source.current_token(), None);
    }
}
