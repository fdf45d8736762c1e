use dashmap::DashMap;
use snoopd_common::model::Session;

/// Fast in-memory session authority so the proxy hot path never has to
/// round-trip through the store to check a session header (spec §6).
/// The control server's `register_session` populates this alongside the
/// store row.
#[derive(Default)]
pub struct SessionRegistry {
    tokens: DashMap<String, String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: &Session) {
        self.tokens.insert(session.id.clone(), session.token.clone());
    }

    pub fn check(&self, id: &str, token: &str) -> bool {
        self.tokens.get(id).map(|entry| entry.value() == token).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_session_authenticates() {
        let registry = SessionRegistry::new();
        let session = Session {
            id: "s1".to_string(),
            label: None,
            source: None,
            pid: 1,
            started_at: 0,
            token: "tok".to_string(),
        };
        registry.insert(&session);
        assert!(registry.check("s1", "tok"));
        assert!(!registry.check("s1", "wrong"));
        assert!(!registry.check("unknown", "tok"));
    }
}
