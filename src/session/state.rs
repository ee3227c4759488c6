use std::collections::HashMap;
use uuid::Uuid;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for the first message.
    Connecting,
    Startup,
    Authenticating,
    Ready,
    Closed,
}

/// Per-connection bookkeeping: startup parameters sent by the client and
/// the secret handed out in BackendKeyData.
pub struct SessionState {
    pub id: Uuid,
    pub phase: SessionPhase,
    pub client_params: HashMap<String, String>,
    pub secret: Option<i32>,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            id: Uuid::new_v4(),
            phase: SessionPhase::Connecting,
            client_params: HashMap::new(),
            secret: None,
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.client_params.get("user").map(String::as_str).filter(|u| !u.is_empty())
    }

    /// ParameterStatus values reported after authentication.
    pub fn server_parameters(&self) -> Vec<(&'static str, String)> {
        let client_encoding = self
            .client_params
            .get("client_encoding")
            .cloned()
            .unwrap_or_else(|| "UTF8".to_string());
        vec![
            ("server_version", "9.4.0".to_string()),
            ("server_encoding", "UTF8".to_string()),
            ("client_encoding", client_encoding),
            ("DateStyle", "ISO, MDY".to_string()),
            ("TimeZone", "UTC".to_string()),
            ("integer_datetimes", "on".to_string()),
            ("standard_conforming_strings", "on".to_string()),
        ]
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_parameters_follow_client_encoding() {
        let mut state = SessionState::new();
        state.client_params.insert("client_encoding".into(), "LATIN1".into());
        let params = state.server_parameters();
        assert!(params.contains(&("client_encoding", "LATIN1".to_string())));
        assert_eq!(params.len(), 7);
    }

    #[test]
    fn test_empty_user_is_missing() {
        let mut state = SessionState::new();
        assert_eq!(state.user(), None);
        state.client_params.insert("user".into(), String::new());
        assert_eq!(state.user(), None);
        state.client_params.insert("user".into(), "octopus".into());
        assert_eq!(state.user(), Some("octopus"));
    }
}
