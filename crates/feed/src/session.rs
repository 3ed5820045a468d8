use chatfeed_storage::UserId;

/// Read side of the auth provider.
pub trait SessionContext: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// Session with a fixed (possibly absent) user.
#[derive(Debug, Clone, Default)]
pub struct FixedSession {
    user_id: Option<UserId>,
}

impl FixedSession {
    pub fn signed_in(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }
}

impl SessionContext for FixedSession {
    fn current_user_id(&self) -> Option<UserId> {
        self.user_id.clone()
    }
}
