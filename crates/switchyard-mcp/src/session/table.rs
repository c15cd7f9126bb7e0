use super::{ServerTransport, SseServerTransport, StreamableHttpServerTransport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use switchyard_core::SwitchyardResult;

/// A tracked inbound session.
#[derive(Clone)]
pub enum SessionTransport {
    Sse(Arc<SseServerTransport>),
    Streamable(Arc<StreamableHttpServerTransport>),
}

impl SessionTransport {
    pub fn as_server_transport(&self) -> Arc<dyn ServerTransport> {
        match self {
            SessionTransport::Sse(t) => t.clone(),
            SessionTransport::Streamable(t) => t.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionTransport::Sse(_) => "sse",
            SessionTransport::Streamable(_) => "streamable-http",
        }
    }

    pub async fn close(&self) -> SwitchyardResult<()> {
        match self {
            SessionTransport::Sse(t) => t.close().await,
            SessionTransport::Streamable(t) => t.close().await,
        }
    }
}

/// Live inbound sessions of one virtual server, keyed by session id.
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, SessionTransport>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session. An existing entry under the same id is replaced and
    /// returned.
    pub fn insert(&self, id: impl Into<String>, transport: SessionTransport) -> Option<SessionTransport> {
        self.sessions.lock().insert(id.into(), transport)
    }

    pub fn remove(&self, id: &str) -> Option<SessionTransport> {
        self.sessions.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<SessionTransport> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Remove and return every tracked session.
    pub fn drain(&self) -> Vec<(String, SessionTransport)> {
        self.sessions.lock().drain().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_get_remove() {
        let table = SessionTable::new();
        let session = SseServerTransport::start("/a/message");
        let id = session.transport.id().to_string();

        assert!(table.insert(&id, SessionTransport::Sse(session.transport.clone())).is_none());
        assert!(table.contains(&id));
        assert_eq!(table.get(&id).unwrap().kind(), "sse");
        assert_eq!(table.len(), 1);

        let removed = table.remove(&id).unwrap();
        removed.close().await.unwrap();
        assert!(session.transport.is_closed());
        assert!(table.is_empty());
        assert!(table.remove(&id).is_none());
    }

    #[tokio::test]
    async fn test_drain_empties_table() {
        let table = SessionTable::new();
        for _ in 0..3 {
            let session = StreamableHttpServerTransport::new(|| "x".to_string());
            let key = uuid::Uuid::new_v4().to_string();
            table.insert(key, SessionTransport::Streamable(session.transport));
        }
        assert_eq!(table.drain().len(), 3);
        assert!(table.is_empty());
    }
}
