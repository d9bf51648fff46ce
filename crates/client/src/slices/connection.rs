//! Connection slice: transport connectivity as seen by the client.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::unchanged;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_connected: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ConnectionAction {
    ConnectionStatusChanged(ConnectionStatus),
    ConnectionConnected,
    ConnectionReconnecting,
    ConnectionReconnected,
    ConnectionClosed,
    ConnectionError(String),
}

pub fn reduce(state: &Arc<ConnectionState>, action: &ConnectionAction) -> Arc<ConnectionState> {
    match action {
        ConnectionAction::ConnectionStatusChanged(status) => {
            if state.status == *status {
                return unchanged(state);
            }
            Arc::new(ConnectionState {
                status: *status,
                ..(**state).clone()
            })
        }

        // Connected zeroes the attempt counter and clears the error.
        ConnectionAction::ConnectionConnected | ConnectionAction::ConnectionReconnected => {
            Arc::new(ConnectionState {
                status: ConnectionStatus::Connected,
                last_connected: Some(Utc::now()),
                reconnect_attempts: 0,
                error: None,
            })
        }

        ConnectionAction::ConnectionReconnecting => Arc::new(ConnectionState {
            status: ConnectionStatus::Reconnecting,
            reconnect_attempts: state.reconnect_attempts + 1,
            ..(**state).clone()
        }),

        ConnectionAction::ConnectionClosed => {
            if state.status == ConnectionStatus::Disconnected {
                return unchanged(state);
            }
            Arc::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                ..(**state).clone()
            })
        }

        ConnectionAction::ConnectionError(error) => Arc::new(ConnectionState {
            error: Some(error.clone()),
            ..(**state).clone()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(state: Arc<ConnectionState>, action: ConnectionAction) -> Arc<ConnectionState> {
        reduce(&state, &action)
    }

    #[test]
    fn connected_resets_attempts_and_error() {
        let state = Arc::new(ConnectionState {
            status: ConnectionStatus::Reconnecting,
            reconnect_attempts: 4,
            error: Some("timeout".into()),
            last_connected: None,
        });
        let next = apply(state, ConnectionAction::ConnectionConnected);
        assert_eq!(next.status, ConnectionStatus::Connected);
        assert_eq!(next.reconnect_attempts, 0);
        assert!(next.error.is_none());
        assert!(next.last_connected.is_some());
    }

    #[test]
    fn reconnecting_increments_attempts() {
        let mut state = Arc::new(ConnectionState::default());
        state = apply(state, ConnectionAction::ConnectionReconnecting);
        state = apply(state, ConnectionAction::ConnectionReconnecting);
        assert_eq!(state.reconnect_attempts, 2);
        assert_eq!(state.status, ConnectionStatus::Reconnecting);
    }

    #[test]
    fn closing_when_disconnected_is_identity() {
        let state = Arc::new(ConnectionState::default());
        let next = reduce(&state, &ConnectionAction::ConnectionClosed);
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn same_status_change_is_identity() {
        let state = Arc::new(ConnectionState::default());
        let next = reduce(
            &state,
            &ConnectionAction::ConnectionStatusChanged(ConnectionStatus::Disconnected),
        );
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn error_is_recorded_until_next_connect() {
        let mut state = Arc::new(ConnectionState::default());
        state = apply(state, ConnectionAction::ConnectionError("refused".into()));
        assert_eq!(state.error.as_deref(), Some("refused"));

        state = apply(state, ConnectionAction::ConnectionReconnected);
        assert!(state.error.is_none());
    }
}
