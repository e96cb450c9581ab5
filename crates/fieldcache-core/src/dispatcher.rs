//! Command dispatcher
//!
//! Inbound events (requests, sync triggers, push and client messages) are
//! sent over a channel and handled by the engine, each command on its own
//! task. Replies come back on a oneshot channel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use fieldcache_proxy::ResourceRequest;

use crate::engine::{Engine, EngineStatus};
use crate::error::CoreError;
use crate::events::Event;
use crate::strategy::Intercepted;
use crate::sync::DrainReport;

/// Message posted by a client page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    GetStatus,
    /// Clear one partition, or every partition when unset
    ClearCache {
        #[serde(default)]
        partition: Option<String>,
    },
    /// Fetch and store the given URLs
    CacheUrls { urls: Vec<String> },
    /// Drain one category, or every category when unset
    Drain {
        #[serde(default)]
        category: Option<String>,
    },
}

/// Push message payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushMessage {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    /// `sync` drains every category, `sync:<category>` drains one
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Inbound command
#[derive(Debug, Clone)]
pub enum Command {
    Intercept(ResourceRequest),
    SyncTrigger { category: String },
    ConnectivityRestored,
    PushMessage(PushMessage),
    ClientMessage(ClientMessage),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Intercept(_) => "intercept",
            Command::SyncTrigger { .. } => "sync-trigger",
            Command::ConnectivityRestored => "connectivity-restored",
            Command::PushMessage(_) => "push-message",
            Command::ClientMessage(_) => "client-message",
        }
    }
}

/// Reply to a command
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum CommandReply {
    #[serde(skip)]
    Intercepted(Intercepted),
    Drained(Vec<DrainReport>),
    Status(EngineStatus),
    Cleared(u64),
    Cached(usize),
    Acknowledged,
}

impl Engine {
    /// Handle one command
    pub async fn handle(&self, command: Command) -> Result<CommandReply, CoreError> {
        debug!("Handling {} command", command.name());

        match command {
            Command::Intercept(request) => {
                Ok(CommandReply::Intercepted(self.intercept(request).await?))
            }
            Command::SyncTrigger { category } => {
                Ok(CommandReply::Drained(vec![self.drain(&category).await?]))
            }
            Command::ConnectivityRestored => {
                self.set_online(true);
                Ok(CommandReply::Drained(self.drain_all().await))
            }
            Command::PushMessage(message) => self.handle_push(message).await,
            Command::ClientMessage(message) => self.handle_client_message(message).await,
        }
    }

    async fn handle_push(&self, message: PushMessage) -> Result<CommandReply, CoreError> {
        info!("Push message: {}", message.title);
        self.events().publish(Event::PushReceived {
            title: message.title.clone(),
            tag: message.tag.clone(),
        });

        match message.tag.as_deref() {
            Some("sync") => Ok(CommandReply::Drained(self.drain_all().await)),
            Some(tag) => match tag.strip_prefix("sync:") {
                Some(category) if !category.is_empty() => {
                    Ok(CommandReply::Drained(vec![self.drain(category).await?]))
                }
                _ => Ok(CommandReply::Acknowledged),
            },
            None => Ok(CommandReply::Acknowledged),
        }
    }

    async fn handle_client_message(
        &self,
        message: ClientMessage,
    ) -> Result<CommandReply, CoreError> {
        match message {
            ClientMessage::GetStatus => Ok(CommandReply::Status(self.status().await?)),
            ClientMessage::ClearCache { partition } => Ok(CommandReply::Cleared(
                self.invalidate(partition.as_deref(), None).await?,
            )),
            ClientMessage::CacheUrls { urls } => {
                Ok(CommandReply::Cached(self.precache(&urls).await))
            }
            ClientMessage::Drain { category: Some(category) } => {
                Ok(CommandReply::Drained(vec![self.drain(&category).await?]))
            }
            ClientMessage::Drain { category: None } => {
                Ok(CommandReply::Drained(self.drain_all().await))
            }
        }
    }
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<CommandReply, CoreError>>,
}

/// Handle for submitting commands to a running engine
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Envelope>,
}

impl Dispatcher {
    /// Start the dispatch loop. It ends once every `Dispatcher` clone has
    /// been dropped.
    pub fn spawn(engine: Arc<Engine>, buffer: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(buffer.max(1));

        let handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let result = engine.handle(envelope.command).await;
                    // Caller stopped waiting
                    let _ = envelope.reply.send(result);
                });
            }
            debug!("Dispatcher stopped");
        });

        (Self { tx }, handle)
    }

    /// Submit a command and wait for its reply
    pub async fn dispatch(&self, command: Command) -> Result<CommandReply, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { command, reply })
            .await
            .map_err(|_| CoreError::ShutDown)?;
        rx.await.map_err(|_| CoreError::ShutDown)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::EngineConfig;
    use crate::events::EventType;
    use crate::strategy::ResponseSource;
    use crate::sync::NewAction;
    use crate::test_support::StubTransport;
    use fieldcache_db::Database;
    use fieldcache_storage::MemoryStorage;
    use tempfile::TempDir;

    async fn engine(dir: &TempDir, transport: Arc<StubTransport>) -> Arc<Engine> {
        let mut config = EngineConfig {
            origin: "https://crm.local".to_string(),
            ..EngineConfig::default()
        };
        config.sync.precache_on_start = false;
        config.network.max_retries = 1;
        config.network.base_delay_ms = 1;

        let db = Database::open_path(dir.path().join("queue.db").to_str().unwrap())
            .await
            .unwrap();
        Engine::start(
            config,
            Arc::new(MemoryStorage::new()),
            db,
            transport,
            Arc::new(SystemClock),
        )
        .await
        .unwrap()
    }

    fn note(category: &str) -> NewAction {
        NewAction {
            category: category.to_string(),
            payload: serde_json::json!({ "text": "call back" }),
            target_endpoint: format!("/api/{}", category),
            method: "POST".to_string(),
            max_retries: None,
        }
    }

    #[test]
    fn test_client_message_wire_format() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"CLEAR_CACHE","partition":"api"}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::ClearCache {
                partition: Some("api".to_string())
            }
        );

        let message: ClientMessage = serde_json::from_str(r#"{"type":"GET_STATUS"}"#).unwrap();
        assert_eq!(message, ClientMessage::GetStatus);

        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"CACHE_URLS","urls":["/a.js"]}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::CacheUrls {
                urls: vec!["/a.js".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_dispatch_intercept() {
        let dir = TempDir::new().unwrap();
        let transport = StubTransport::new();
        transport.respond("https://crm.local/app.css", 200, "body{}");
        let (dispatcher, _handle) = Dispatcher::spawn(engine(&dir, transport).await, 8);

        let reply = dispatcher
            .dispatch(Command::Intercept(
                ResourceRequest::get("https://crm.local/app.css").unwrap(),
            ))
            .await
            .unwrap();

        match reply {
            CommandReply::Intercepted(result) => {
                assert_eq!(result.source, ResponseSource::Network);
                assert_eq!(result.response.body.as_ref(), b"body{}");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_push_sync_tag_drains_category() {
        let dir = TempDir::new().unwrap();
        let transport = StubTransport::new();
        transport.respond("https://crm.local/api/notes", 201, "{}");
        let engine = engine(&dir, transport).await;
        engine.enqueue_action(note("notes")).await.unwrap();
        engine.enqueue_action(note("tasks")).await.unwrap();
        let (_id, mut pushes) = engine.events().subscribe_channel(EventType::PushReceived);

        let reply = engine
            .handle(Command::PushMessage(PushMessage {
                title: "Back online".to_string(),
                body: None,
                tag: Some("sync:notes".to_string()),
                data: serde_json::Value::Null,
            }))
            .await
            .unwrap();

        match reply {
            CommandReply::Drained(reports) => {
                assert_eq!(reports.len(), 1);
                assert_eq!(reports[0].category, "notes");
                assert_eq!(reports[0].succeeded(), 1);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(pushes.recv().await.is_some());
        assert_eq!(engine.list_actions(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_client_messages() {
        let dir = TempDir::new().unwrap();
        let transport = StubTransport::new();
        transport.respond("https://crm.local/logo.svg", 200, "<svg/>");
        let engine = engine(&dir, transport).await;

        let reply = engine
            .handle(Command::ClientMessage(ClientMessage::CacheUrls {
                urls: vec!["/logo.svg".to_string(), "/missing.png".to_string()],
            }))
            .await
            .unwrap();
        assert!(matches!(reply, CommandReply::Cached(1)));

        match engine
            .handle(Command::ClientMessage(ClientMessage::GetStatus))
            .await
            .unwrap()
        {
            CommandReply::Status(status) => assert_eq!(status.partitions["images"], 1),
            other => panic!("unexpected reply: {:?}", other),
        }

        let reply = engine
            .handle(Command::ClientMessage(ClientMessage::ClearCache { partition: None }))
            .await
            .unwrap();
        assert!(matches!(reply, CommandReply::Cleared(1)));
    }

    #[tokio::test]
    async fn test_connectivity_restored_drains_everything() {
        let dir = TempDir::new().unwrap();
        let transport = StubTransport::new();
        transport.respond("https://crm.local/api/notes", 200, "{}");
        transport.respond("https://crm.local/api/tasks", 200, "{}");
        let engine = engine(&dir, transport).await;
        engine.set_online(false);
        engine.enqueue_action(note("notes")).await.unwrap();
        engine.enqueue_action(note("tasks")).await.unwrap();

        let (dispatcher, _handle) = Dispatcher::spawn(engine.clone(), 4);
        let reply = dispatcher.dispatch(Command::ConnectivityRestored).await.unwrap();

        match reply {
            CommandReply::Drained(reports) => assert_eq!(reports.len(), 2),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(engine.is_online());
        assert!(engine.list_actions(None).await.unwrap().is_empty());
    }
}
