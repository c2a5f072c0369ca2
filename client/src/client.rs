//! The Supportive facade: one user, their messages and the poll loop.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use supportive_engine::{
    events, Attributes, Collection, CollectionEvent, Endpoint, EventEmitter, ListenerId, Model,
    ModelConfig, SyncReport, Transport,
};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::{Config, Resource};
use crate::error::{ClientError, Result};
use crate::http::HttpTransport;
use crate::messages::{
    self, Message, User, CUSTOM_DATA_FIELD, IDENTIFIER_FIELD, SUBJECT_FIELD, TEXT_FIELD,
};

/// Fired for every message that joins the collection, after the
/// kind-specific `message:<kind>` event.
pub const MESSAGE: &str = "message";

/// Payload of client events.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub message: Message,
    pub collection: Collection,
}

struct ClientInner {
    config: Config,
    user: User,
    messages: Collection,
    initialized: Arc<AtomicBool>,
    events: Arc<EventEmitter<MessageEvent>>,
    poll: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(handle) = self.poll.get_mut().take() {
            handle.abort();
        }
    }
}

/// Entry point of the SDK. Clones share the same user and messages.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build the user model and messages collection. Nothing is sent until
    /// [`Client::init`].
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let mut user_config = ModelConfig::new(Endpoint::fixed(config.endpoint(Resource::Users)))
            .with_transport(transport.clone());
        if let Some(token) = &config.api_token {
            user_config = user_config.with_api_token(token.clone());
        }
        let user = User::new(Model::with_config(Attributes::new(), user_config));
        let messages =
            messages::messages_collection(&user, transport, config.api_token.as_deref());

        let initialized = Arc::new(AtomicBool::new(false));
        {
            let initialized = Arc::clone(&initialized);
            user.on(events::SYNC, move |_, _| {
                initialized.store(true, Ordering::SeqCst);
            });
        }

        let emitter = Arc::new(EventEmitter::new());
        {
            let emitter = Arc::clone(&emitter);
            messages.on(events::ADD, move |_, event| {
                if let CollectionEvent::Added {
                    model, collection, ..
                } = event
                {
                    let event = MessageEvent {
                        message: Message::new(model.clone()),
                        collection: collection.clone(),
                    };
                    if let Some(name) = event.message.kind().event_name() {
                        emitter.trigger(name, &event);
                    }
                    emitter.trigger(MESSAGE, &event);
                }
            });
        }

        Self {
            inner: Arc::new(ClientInner {
                config,
                user,
                messages,
                initialized,
                events: emitter,
                poll: Mutex::new(None),
            }),
        }
    }

    /// Client talking to the remote API over HTTP.
    pub fn with_http(config: Config) -> Self {
        Self::new(config, Arc::new(HttpTransport::new()))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn user(&self) -> &User {
        &self.inner.user
    }

    pub fn messages(&self) -> &Collection {
        &self.inner.messages
    }

    /// Absolute url of `resource` for this app.
    pub fn endpoint(&self, resource: Resource) -> String {
        self.inner.config.endpoint(resource)
    }

    /// Whether the user has been synced at least once.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Set up and save the user, load their messages and start polling.
    pub async fn init(&self, user: Attributes) -> Result<SyncReport> {
        if user.get(IDENTIFIER_FIELD).map_or(true, is_blank) {
            return Err(supportive_engine::Error::Validation(
                "a user requires an identifier".into(),
            )
            .into());
        }

        self.inner.user.set_many(user);
        self.inner.user.save().await?;
        tracing::info!(user = %self.inner.user.url(), "User initialized");

        let report = self.fetch_messages().await?;
        self.listen_for_messages()?;
        Ok(report)
    }

    /// Create a message from the user.
    pub async fn send(
        &self,
        subject: &str,
        text: Option<&str>,
        custom_data: Option<Value>,
    ) -> Result<Message> {
        if !self.is_initialized() {
            return Err(ClientError::NotInitialized("cannot send message"));
        }

        let mut message = Attributes::new();
        message.insert(SUBJECT_FIELD.to_string(), subject.into());
        message.insert(TEXT_FIELD.to_string(), text.into());
        message.insert(CUSTOM_DATA_FIELD.to_string(), custom_data.unwrap_or(Value::Null));

        let model = self.inner.messages.create(message).await?;
        Ok(Message::new(model))
    }

    /// Reconcile the messages collection with the remote API.
    pub async fn fetch_messages(&self) -> Result<SyncReport> {
        if !self.is_initialized() {
            return Err(ClientError::NotInitialized("cannot fetch messages"));
        }
        Ok(self.inner.messages.fetch().await?)
    }

    /// Start polling for messages every `poll_interval`.
    ///
    /// Returns `false` when a poll task is already running. Polls do not wait
    /// for each other's fetch to settle across ticks.
    ///
    /// The task is spawned on the current Tokio runtime; called outside one
    /// this fails with [`ClientError::Runtime`].
    pub fn listen_for_messages(&self) -> Result<bool> {
        if !self.is_initialized() {
            return Err(ClientError::NotInitialized("cannot poll for messages"));
        }

        let mut poll = self.inner.poll.lock();
        if is_running(&poll) {
            return Ok(false);
        }

        let runtime = tokio::runtime::Handle::try_current()?;
        let period = self.inner.config.poll_interval;
        let client = Arc::downgrade(&self.inner);
        *poll = Some(runtime.spawn(poll_messages(client, period)));

        tracing::debug!(interval_ms = period.as_millis() as u64, "Polling for messages");
        Ok(true)
    }

    /// Stop the poll task. Returns whether one was running.
    pub fn stop_listening(&self) -> bool {
        match self.inner.poll.lock().take() {
            Some(handle) => {
                handle.abort();
                tracing::debug!("Stopped polling for messages");
                true
            }
            None => false,
        }
    }

    pub fn is_listening(&self) -> bool {
        is_running(&self.inner.poll.lock())
    }

    /// The client's event emitter.
    pub fn events(&self) -> &EventEmitter<MessageEvent> {
        &self.inner.events
    }

    pub fn on(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&str, &MessageEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.on(name, handler)
    }

    pub fn once(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&str, &MessageEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.once(name, handler)
    }

    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        self.inner.events.off(name, id)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("app_id", &self.inner.config.app_id)
            .field("initialized", &self.is_initialized())
            .field("listening", &self.is_listening())
            .finish()
    }
}

async fn poll_messages(client: Weak<ClientInner>, period: std::time::Duration) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = client.upgrade() else {
            break;
        };
        let messages = inner.messages.clone();
        drop(inner);

        match messages.fetch().await {
            Ok(report) if report.has_changed => {
                tracing::debug!(
                    added = report.added,
                    updated = report.updated,
                    removed = report.removed,
                    "Messages polled"
                );
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "Message poll failed"),
        }
    }
}

fn is_running(poll: &Option<JoinHandle<()>>) -> bool {
    matches!(poll, Some(handle) if !handle.is_finished())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
