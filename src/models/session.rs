use crate::error::{AppError, AppResult};

/// The user a client store acts for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    user_id: Option<String>,
}

impl Session {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    /// Returns the user id, or `Unauthenticated` when there is none
    pub fn user_id(&self) -> AppResult<&str> {
        match self.user_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(AppError::Unauthenticated),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_ok()
    }
}
