//! At most one active analysis per production.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::EngineError;

/// Production id → active session id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashMap<String, String>>>,
}

/// Holds a production's slot; released on drop.
#[derive(Debug)]
pub struct SessionClaim {
    active: Arc<Mutex<HashMap<String, String>>>,
    production_id: String,
    session_id: String,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `production_id`, or fail with the session that
    /// already holds it. Nothing is queued.
    pub fn claim(
        &self,
        production_id: &str,
        session_id: &str,
    ) -> Result<SessionClaim, EngineError> {
        // The map stays consistent even if a holder panicked.
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = active.get(production_id) {
            return Err(EngineError::SessionConflict {
                production_id: production_id.to_string(),
                active_session: existing.clone(),
            });
        }
        active.insert(production_id.to_string(), session_id.to_string());
        debug!(production_id, session_id, "claimed production");
        Ok(SessionClaim {
            active: Arc::clone(&self.active),
            production_id: production_id.to_string(),
            session_id: session_id.to_string(),
        })
    }

    /// The active session for a production, if any.
    pub fn active_session(&self, production_id: &str) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(production_id)
            .cloned()
    }
}

impl SessionClaim {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.get(&self.production_id) == Some(&self.session_id) {
            active.remove(&self.production_id);
            debug!(
                production_id = %self.production_id,
                session_id = %self.session_id,
                "released production"
            );
        }
    }
}
