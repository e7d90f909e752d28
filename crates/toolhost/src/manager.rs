//! Session table and request dispatcher.
//!
//! Maps stateless HTTP requests onto persistent per-caller transports.
//! The manager is an owned object, created at startup and handed to the
//! HTTP layer; nothing here is process-global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mcp::{JsonRpcRequest, JsonRpcResponse};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportFault;
use crate::registry::ToolRegistry;
use crate::session::{Session, SessionId};
use crate::transport::TransportError;

/// Builds the registry bound to each new session.
pub type RegistryFactory = Arc<dyn Fn() -> ToolRegistry + Send + Sync>;

/// Outcome of one dispatched request.
#[derive(Debug)]
pub struct Handled {
    /// Session the request ran in, if it is recorded in the table.
    pub session_id: Option<SessionId>,
    /// `None` for notifications.
    pub response: Option<JsonRpcResponse>,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    factory: RegistryFactory,
    idle_timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(factory: RegistryFactory) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            idle_timeout: None,
        }
    }

    /// Evict sessions idle for longer than `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Look up a live session. Expired sessions are evicted on access.
    pub async fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(id).cloned()?;
        if self.is_expired(&session) {
            info!(session = %id, "evicting idle session on access");
            self.evict(id).await;
            return None;
        }
        Some(session)
    }

    /// Existing session for a known id, otherwise a fresh unrecorded one.
    ///
    /// The second element is `true` for a fresh session. Fresh sessions are
    /// only recorded once their transport initializes.
    pub async fn resolve(&self, id: Option<&str>) -> (Arc<Session>, bool) {
        let known = match id.map(str::parse::<SessionId>) {
            Some(Ok(id)) => self.get(&id).await,
            Some(Err(_)) => {
                debug!(header = ?id, "unparseable session id, starting a new session");
                None
            }
            None => None,
        };

        match known {
            Some(session) => {
                session.touch();
                (session, false)
            }
            None => (self.create(), true),
        }
    }

    fn create(&self) -> Arc<Session> {
        Arc::new(Session::new(SessionId::new(), (self.factory)()))
    }

    /// Record a session. A single insert under the write lock; if the id
    /// is already present the existing session wins.
    async fn record(&self, session: Arc<Session>) -> Arc<Session> {
        self.sessions
            .write()
            .await
            .entry(session.id)
            .or_insert(session)
            .clone()
    }

    /// Remove a session from the table. Returns whether it was present.
    pub async fn evict(&self, id: &SessionId) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Handle a raw request body on behalf of an optional session id.
    pub async fn handle(&self, id: Option<&str>, raw: &[u8]) -> Result<Handled, TransportFault> {
        let request = parse_request(raw)?;
        let (session, is_new) = self.resolve(id).await;

        let (session, is_new, response, initialized) =
            match run(&session, request.clone()).await {
                Ok((response, initialized)) => (session, is_new, response, initialized),
                Err(TransportError::Closed) => {
                    // Stale transport: drop it and retry on a new session.
                    warn!(session = %session.id, "transport closed, replacing session");
                    self.evict(&session.id).await;
                    let fresh = self.create();
                    let (response, initialized) = run(&fresh, request)
                        .await
                        .map_err(|_| TransportFault::Closed)?;
                    (fresh, true, response, initialized)
                }
            };

        let session_id = if !is_new {
            Some(session.id)
        } else if initialized {
            let session = self.record(session).await;
            info!(session = %session.id, "session created");
            Some(session.id)
        } else {
            debug!("request on a fresh session did not initialize it; discarding");
            None
        };

        Ok(Handled {
            session_id,
            response,
        })
    }

    /// Close and remove a session (explicit client termination).
    pub async fn close(&self, id: &str) -> Result<(), TransportFault> {
        let parsed: SessionId = id
            .parse()
            .map_err(|_| TransportFault::UnknownSession(id.to_string()))?;
        let session = self
            .sessions
            .write()
            .await
            .remove(&parsed)
            .ok_or_else(|| TransportFault::UnknownSession(id.to_string()))?;
        session.transport().await.close();
        info!(session = %parsed, "session closed by client");
        Ok(())
    }

    /// Evict every idle session. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.idle_for() < timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "swept idle sessions");
        }
        evicted
    }

    /// Run [`sweep`](Self::sweep) every `interval` until aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.sweep().await;
            }
        })
    }

    /// Close every transport and empty the table.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in &drained {
            session.transport().await.close();
        }
        info!(sessions = drained.len(), "session table cleared");
    }

    fn is_expired(&self, session: &Session) -> bool {
        self.idle_timeout
            .is_some_and(|timeout| session.idle_for() >= timeout)
    }
}

/// Run one request with the session's transport held exclusively.
async fn run(
    session: &Session,
    request: JsonRpcRequest,
) -> Result<(Option<JsonRpcResponse>, bool), TransportError> {
    let mut transport = session.transport().await;
    let response = transport.handle(request).await?;
    session.touch();
    Ok((response, transport.is_initialized()))
}

fn parse_request(raw: &[u8]) -> Result<JsonRpcRequest, TransportFault> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| TransportFault::Malformed(e.to_string()))?;
    if value.is_array() {
        return Err(TransportFault::BatchUnsupported);
    }
    let request: JsonRpcRequest =
        serde_json::from_value(value).map_err(|e| TransportFault::Malformed(e.to_string()))?;
    if request.jsonrpc != "2.0" {
        return Err(TransportFault::Malformed(format!(
            "unsupported jsonrpc version {:?}",
            request.jsonrpc
        )));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::registry::ToolHandler;
    use crate::schema::{Arguments, InputSchema};
    use async_trait::async_trait;
    use mcp::{CallToolResult, InitializeParams};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl ToolHandler for Counter {
        async fn call(&self, _args: Arguments) -> Result<CallToolResult, ToolError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CallToolResult::text(n.to_string()))
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(|| {
            // Each session gets its own counter.
            let mut registry = ToolRegistry::new();
            registry
                .register(
                    "count",
                    "Counts calls",
                    InputSchema::new(),
                    Counter(Arc::default()),
                )
                .unwrap();
            registry
        }))
    }

    fn initialize() -> Vec<u8> {
        serde_json::to_vec(
            &JsonRpcRequest::new(1i64, "initialize").with_params(InitializeParams::default()),
        )
        .unwrap()
    }

    fn call_count(id: i64) -> Vec<u8> {
        serde_json::to_vec(
            &JsonRpcRequest::new(id, "tools/call").with_params(json!({"name": "count"})),
        )
        .unwrap()
    }

    fn text_of(handled: Handled) -> String {
        let result: CallToolResult =
            serde_json::from_value(handled.response.unwrap().into_result().unwrap()).unwrap();
        result.text_content()
    }

    async fn open(manager: &SessionManager) -> String {
        let handled = manager.handle(None, &initialize()).await.unwrap();
        handled.session_id.unwrap().to_string()
    }

    #[tokio::test]
    async fn initialize_without_header_records_a_session() {
        let manager = manager();
        let handled = manager.handle(None, &initialize()).await.unwrap();
        let id = handled.session_id.unwrap();
        assert!(handled.response.unwrap().is_success());
        assert!(manager.contains(&id).await);
    }

    #[tokio::test]
    async fn second_request_reuses_session_state() {
        let manager = manager();
        let id = open(&manager).await;

        let first = manager.handle(Some(&id), &call_count(2)).await.unwrap();
        assert_eq!(first.session_id.unwrap().to_string(), id);
        assert_eq!(text_of(first), "1");

        let second = manager.handle(Some(&id), &call_count(3)).await.unwrap();
        assert_eq!(text_of(second), "2");
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn sessions_do_not_share_registry_state() {
        let manager = manager();
        let a = open(&manager).await;
        let b = open(&manager).await;
        assert_ne!(a, b);

        manager.handle(Some(&a), &call_count(2)).await.unwrap();
        let from_b = manager.handle(Some(&b), &call_count(2)).await.unwrap();
        assert_eq!(text_of(from_b), "1");
    }

    #[tokio::test]
    async fn unknown_session_id_starts_fresh_instead_of_failing() {
        let manager = manager();
        let stale = SessionId::new().to_string();

        let handled = manager.handle(Some(&stale), &initialize()).await.unwrap();
        let id = handled.session_id.unwrap();
        assert_ne!(id.to_string(), stale);
        assert!(manager.contains(&id).await);
    }

    #[tokio::test]
    async fn uninitialized_fresh_sessions_are_not_recorded() {
        let manager = manager();
        let handled = manager.handle(None, &call_count(1)).await.unwrap();
        assert!(handled.session_id.is_none());
        assert!(
            handled
                .response
                .unwrap()
                .into_result()
                .unwrap_err()
                .is_not_initialized()
        );
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_bodies_are_transport_faults() {
        let manager = manager();
        assert!(matches!(
            manager.handle(None, b"{not json").await,
            Err(TransportFault::Malformed(_))
        ));
        assert!(matches!(
            manager.handle(None, b"[]").await,
            Err(TransportFault::BatchUnsupported)
        ));
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn close_removes_the_session() {
        let manager = manager();
        let id = open(&manager).await;
        manager.close(&id).await.unwrap();
        assert!(manager.is_empty().await);
        assert!(matches!(
            manager.close(&id).await,
            Err(TransportFault::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn closed_transport_is_replaced_transparently() {
        let manager = manager();
        let id = open(&manager).await;
        let parsed: SessionId = id.parse().unwrap();
        let session = manager.get(&parsed).await.unwrap();
        session.transport().await.close();

        let handled = manager.handle(Some(&id), &initialize()).await.unwrap();
        let replacement = handled.session_id.unwrap();
        assert_ne!(replacement, parsed);
        assert!(!manager.contains(&parsed).await);
        assert!(manager.contains(&replacement).await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_swept() {
        let manager = manager().with_idle_timeout(Duration::from_secs(60));
        let stale = open(&manager).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        let fresh = open(&manager).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(manager.sweep().await, 1);
        assert!(!manager.contains(&stale.parse().unwrap()).await);
        assert!(manager.contains(&fresh.parse().unwrap()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_sessions_are_evicted_on_access() {
        let manager = manager().with_idle_timeout(Duration::from_secs(60));
        let id = open(&manager).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let handled = manager.handle(Some(&id), &call_count(2)).await.unwrap();
        assert!(handled.session_id.is_none());
        assert!(manager.is_empty().await);
    }

    /// Tracks how many calls are inside a handler at once.
    #[derive(Default)]
    struct Overlap {
        in_flight: AtomicUsize,
        max: AtomicUsize,
    }

    struct Slow(Arc<Overlap>);

    #[async_trait]
    impl ToolHandler for Slow {
        async fn call(&self, _args: Arguments) -> Result<CallToolResult, ToolError> {
            let now = self.0.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(CallToolResult::text("done"))
        }
    }

    /// Every session's "slow" tool reports into the same tracker.
    fn slow_manager(overlap: &Arc<Overlap>) -> SessionManager {
        let overlap = Arc::clone(overlap);
        SessionManager::new(Arc::new(move || {
            let mut registry = ToolRegistry::new();
            registry
                .register(
                    "slow",
                    "Sleeps briefly",
                    InputSchema::new(),
                    Slow(Arc::clone(&overlap)),
                )
                .unwrap();
            registry
        }))
    }

    fn call_slow(id: i64) -> Vec<u8> {
        serde_json::to_vec(
            &JsonRpcRequest::new(id, "tools/call").with_params(json!({"name": "slow"})),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn requests_on_one_session_run_one_at_a_time() {
        let overlap = Arc::new(Overlap::default());
        let manager = slow_manager(&overlap);
        let id = open(&manager).await;

        let (req_a, req_b) = (call_slow(2), call_slow(3));
        let (a, b) = tokio::join!(
            manager.handle(Some(&id), &req_a),
            manager.handle(Some(&id), &req_b),
        );
        assert_eq!(text_of(a.unwrap()), "done");
        assert_eq!(text_of(b.unwrap()), "done");
        assert_eq!(overlap.max.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_sessions_run_in_parallel() {
        let overlap = Arc::new(Overlap::default());
        let manager = slow_manager(&overlap);
        let first = open(&manager).await;
        let second = open(&manager).await;

        let (req_a, req_b) = (call_slow(2), call_slow(2));
        let (a, b) = tokio::join!(
            manager.handle(Some(&first), &req_a),
            manager.handle(Some(&second), &req_b),
        );
        assert_eq!(text_of(a.unwrap()), "done");
        assert_eq!(text_of(b.unwrap()), "done");
        assert_eq!(overlap.max.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_clears_the_table() {
        let manager = manager();
        open(&manager).await;
        open(&manager).await;
        manager.shutdown().await;
        assert!(manager.is_empty().await);
    }
}
