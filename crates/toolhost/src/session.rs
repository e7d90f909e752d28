//! Sessions: one transport and one registry per caller.

use std::str::FromStr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::registry::ToolRegistry;
use crate::transport::Transport;

/// A unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A live session.
///
/// The transport sits behind an async mutex so that requests on the same
/// session run one at a time, while distinct sessions proceed in parallel.
pub struct Session {
    pub id: SessionId,
    transport: Mutex<Transport>,
    last_seen: StdMutex<Instant>,
}

impl Session {
    pub fn new(id: SessionId, registry: ToolRegistry) -> Self {
        Self {
            id,
            transport: Mutex::new(Transport::new(registry)),
            last_seen: StdMutex::new(Instant::now()),
        }
    }

    /// Exclusive access to the transport for the duration of one request.
    pub async fn transport(&self) -> tokio::sync::MutexGuard<'_, Transport> {
        self.transport.lock().await
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| SessionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn session_id_parses_its_display_form() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_idle_time() {
        let session = Session::new(SessionId::new(), ToolRegistry::new());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(session.idle_for() >= Duration::from_secs(10));

        session.touch();
        assert!(session.idle_for() < Duration::from_secs(1));
    }
}
