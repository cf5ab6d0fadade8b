//! Connection lifecycle: Disconnected -> Connecting -> Streaming -> (Disconnected | Reconnecting).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Validated lifecycle of one connection.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConnectionState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `to`; returns the previous state. Any state may go to `Disconnected`.
    pub fn transition(&mut self, to: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;
        let allowed = matches!(
            (self.state, to),
            (Disconnected, Connecting)
                | (Reconnecting, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Reconnecting)
                | (Streaming, Reconnecting)
                | (_, Disconnected)
        );
        if !allowed {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        let from = self.state;
        self.state = to;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn happy_path_with_reconnect() {
        let mut l = Lifecycle::new();
        for next in [Connecting, Streaming, Reconnecting, Connecting, Streaming, Disconnected] {
            l.transition(next).unwrap();
        }
        assert_eq!(l.state(), Disconnected);
    }

    #[test]
    fn connect_failure_reconnects() {
        let mut l = Lifecycle::new();
        l.transition(Connecting).unwrap();
        assert_eq!(l.transition(Reconnecting), Ok(Connecting));
    }

    #[test]
    fn rejects_skipping_connect() {
        let mut l = Lifecycle::new();
        assert_eq!(
            l.transition(Streaming),
            Err(InvalidTransition {
                from: Disconnected,
                to: Streaming
            })
        );
        l.transition(Connecting).unwrap();
        l.transition(Streaming).unwrap();
        assert!(l.transition(Connecting).is_err());
        assert_eq!(l.state(), Streaming);
    }
}
