use tokio::sync::watch;
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::limits::record::UserId;

/// Signed-in user handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            email: None,
        }
    }
}

/// Source of sign-in / sign-out notifications
pub trait IdentityProvider: Send + Sync {
    /// Current user plus every later change; `None` means signed out
    fn auth_state(&self) -> watch::Receiver<Option<AuthUser>>;

    fn sign_out(&self) -> Result<()>;
}

/// Identity provider for a single local account
pub struct LocalIdentity {
    state: watch::Sender<Option<AuthUser>>,
}

impl LocalIdentity {
    pub fn signed_out() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn signed_in(user: AuthUser) -> Self {
        let (state, _) = watch::channel(Some(user));
        Self { state }
    }

    pub fn sign_in(&self, user: AuthUser) {
        info!("Signed in as {}", user.user_id);
        self.state.send_replace(Some(user));
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }
}

impl IdentityProvider for LocalIdentity {
    fn auth_state(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }

    fn sign_out(&self) -> Result<()> {
        let previous = self.state.send_replace(None);
        match previous {
            Some(user) => {
                info!("Signed out {}", user.user_id);
                Ok(())
            }
            None => Err(LimiterError::Unauthenticated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_out_without_user_is_unauthenticated() {
        let identity = LocalIdentity::signed_out();
        assert_eq!(identity.sign_out().unwrap_err(), LimiterError::Unauthenticated);
    }

    #[tokio::test]
    async fn listeners_see_sign_in_and_out() {
        let identity = LocalIdentity::signed_out();
        let mut state = identity.auth_state();
        assert!(state.borrow().is_none());

        identity.sign_in(AuthUser::new("u1"));
        state.changed().await.unwrap();
        assert_eq!(state.borrow_and_update().as_ref().unwrap().user_id, UserId::new("u1"));

        identity.sign_out().unwrap();
        state.changed().await.unwrap();
        assert!(state.borrow_and_update().is_none());
        assert!(identity.current_user().is_none());
    }
}
