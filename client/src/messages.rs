//! Users, messages and the per-user messages collection.

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use std::ops::Deref;
use std::sync::Arc;
use supportive_engine::{
    Attributes, Changes, Collection, CollectionConfig, Endpoint, Model, Result, Transport,
};

use crate::config::Resource;

pub const IDENTIFIER_FIELD: &str = "identifier";
pub const CUSTOM_DATA_FIELD: &str = "custom_data";
pub const TYPE_FIELD: &str = "type";
pub const THREAD_FIELD: &str = "thread";
pub const SUBJECT_FIELD: &str = "subject";
pub const TEXT_FIELD: &str = "text";
pub const CREATED_AT_FIELD: &str = "created_at";

/// The end user talking to support.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    model: Model,
}

impl User {
    pub fn new(model: Model) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn identifier(&self) -> Option<Value> {
        self.model.get(IDENTIFIER_FIELD)
    }

    /// Merge one key into the `custom_data` object, creating it when absent.
    pub fn set_custom_data(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Changes> {
        let mut custom_data = match self.model.get(CUSTOM_DATA_FIELD) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        custom_data.insert(key.into(), value.into());
        self.model.set(CUSTOM_DATA_FIELD, Value::Object(custom_data))
    }
}

impl Deref for User {
    type Target = Model;

    fn deref(&self) -> &Model {
        &self.model
    }
}

/// Direction of a message, taken from its `type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Sent by the app to every user
    Broadcast,
    /// Sent by support to this user
    Incoming,
    /// Sent by this user (no `type` attribute)
    Outgoing,
    /// Any other `type`
    Other,
}

impl MessageKind {
    pub fn of(model: &Model) -> Self {
        match model.get(TYPE_FIELD) {
            None | Some(Value::Null) => MessageKind::Outgoing,
            Some(Value::String(kind)) => match kind.as_str() {
                "broadcast" => MessageKind::Broadcast,
                "incoming" => MessageKind::Incoming,
                _ => MessageKind::Other,
            },
            Some(_) => MessageKind::Other,
        }
    }

    /// Client event fired for messages of this kind.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            MessageKind::Broadcast => Some("message:broadcast"),
            MessageKind::Incoming => Some("message:incoming"),
            MessageKind::Outgoing => Some("message:outgoing"),
            MessageKind::Other => None,
        }
    }
}

/// A single support message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    model: Model,
}

impl Message {
    pub fn new(model: Model) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::of(&self.model)
    }

    /// Answer this message in the same thread and under the same subject.
    ///
    /// The reply joins this message's collection, when there is one, before
    /// it is saved. It stays there if the save fails.
    pub async fn reply(&self, mut attributes: Attributes) -> Result<Message> {
        for field in [THREAD_FIELD, SUBJECT_FIELD] {
            if let Some(value) = self.model.get(field) {
                attributes.insert(field.to_string(), value);
            }
        }

        let model = match self.model.collection() {
            Some(collection) => collection.add(attributes),
            None => Model::with_config(attributes, self.model.config()),
        };
        model.save().await?;
        Ok(Message::new(model))
    }
}

impl Deref for Message {
    type Target = Model;

    fn deref(&self) -> &Model {
        &self.model
    }
}

/// Ordering of the messages collection: older messages first. A message
/// whose `created_at` is missing or not RFC 3339 never precedes another.
pub fn by_created_at(a: &Model, b: &Model) -> bool {
    match (created_at(a), created_at(b)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

fn created_at(model: &Model) -> Option<DateTime<FixedOffset>> {
    let value = model.get(CREATED_AT_FIELD)?;
    DateTime::parse_from_rfc3339(value.as_str()?).ok()
}

/// The messages of `user`, nested below the user's url.
pub fn messages_collection(
    user: &User,
    transport: Arc<dyn Transport>,
    api_token: Option<&str>,
) -> Collection {
    let endpoint = Endpoint::nested(user.model(), Resource::Messages.path());
    let mut config = CollectionConfig::new(endpoint)
        .with_transport(transport)
        .with_comparator(by_created_at);
    if let Some(token) = api_token {
        config = config.with_api_token(token);
    }
    Collection::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;
    use supportive_engine::{ModelConfig, ScriptedTransport};

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn user(id: i64) -> User {
        User::new(Model::with_config(
            attrs(json!({"id": id, "identifier": "alice@example.com"})),
            ModelConfig::new(Endpoint::fixed("https://api.test/apps/app-1/users/")),
        ))
    }

    #[test]
    fn test_set_custom_data_creates_object() {
        let user = user(9);

        let changes = user.set_custom_data("plan", "pro").unwrap();

        assert_eq!(changes[CUSTOM_DATA_FIELD].old_value, None);
        assert_eq!(user.get(CUSTOM_DATA_FIELD), Some(json!({"plan": "pro"})));
    }

    #[test]
    fn test_set_custom_data_merges_keys() {
        let user = user(9);
        user.set_custom_data("plan", "pro");
        user.set_custom_data("seats", 3);

        assert_eq!(
            user.get(CUSTOM_DATA_FIELD),
            Some(json!({"plan": "pro", "seats": 3}))
        );
        assert!(user.set_custom_data("seats", 3).is_none());
    }

    #[test]
    fn test_message_kind() {
        let kind = |value: Value| MessageKind::of(&Model::new(attrs(value)));

        assert_eq!(kind(json!({"type": "broadcast"})), MessageKind::Broadcast);
        assert_eq!(kind(json!({"type": "incoming"})), MessageKind::Incoming);
        assert_eq!(kind(json!({})), MessageKind::Outgoing);
        assert_eq!(kind(json!({"type": null})), MessageKind::Outgoing);
        assert_eq!(kind(json!({"type": "system"})), MessageKind::Other);
        assert_eq!(MessageKind::Other.event_name(), None);
    }

    #[test]
    fn test_by_created_at() {
        let at = |value: Value| Model::new(attrs(json!({ "created_at": value })));
        let early = at(json!("2024-03-01T09:00:00Z"));
        let same = at(json!("2024-03-01T10:00:00+01:00"));
        let later = at(json!("2024-03-01T09:30:00Z"));
        let garbage = at(json!("yesterday"));

        assert!(!by_created_at(&early, &same));
        assert!(!by_created_at(&same, &early));
        assert!(by_created_at(&early, &later));
        assert!(!by_created_at(&garbage, &early));
        assert!(!by_created_at(&early, &garbage));
    }

    #[test]
    fn test_messages_collection_url_follows_user() {
        let transport = ScriptedTransport::shared();
        let user = user(9);
        let messages = messages_collection(&user, transport, Some("token"));

        assert_eq!(
            messages.url(),
            "https://api.test/apps/app-1/users/9/messages/"
        );
        assert!(messages.config().comparator.is_some());
    }

    #[test]
    fn test_messages_are_kept_in_creation_order() {
        let transport = ScriptedTransport::shared();
        let messages = messages_collection(&user(9), transport, None);

        messages.add(attrs(json!({"id": 2, "created_at": "2024-03-02T00:00:00Z"})));
        messages.add(attrs(json!({"id": 1, "created_at": "2024-03-01T00:00:00Z"})));
        messages.add(attrs(json!({"id": 3, "created_at": "2024-03-03T00:00:00Z"})));

        let ids: Vec<_> = messages
            .models()
            .iter()
            .map(|m| m.get("id").unwrap())
            .collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_reply_copies_thread_and_subject() {
        let transport = ScriptedTransport::shared();
        transport.respond(json!({"id": 11, "thread": "t-1", "subject": "Billing", "text": "thanks"}));
        let messages = messages_collection(&user(9), transport.clone(), Some("token"));
        let original = Message::new(messages.add(attrs(json!({
            "id": 10,
            "type": "incoming",
            "thread": "t-1",
            "subject": "Billing",
            "created_at": "2024-03-01T00:00:00Z"
        }))));

        let reply = block_on(original.reply(attrs(json!({"text": "thanks"})))).unwrap();

        let request = transport.last_request().unwrap();
        assert_eq!(request.url, "https://api.test/apps/app-1/users/9/messages/");
        assert_eq!(
            request.data,
            Some(json!({"thread": "t-1", "subject": "Billing", "text": "thanks"}))
        );
        assert_eq!(request.headers["Authorization"], "Bearer token");
        assert_eq!(reply.kind(), MessageKind::Outgoing);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages.get(11), Some(reply.model().clone()));
    }

    #[test]
    fn test_reply_without_collection_uses_message_config() {
        let transport = ScriptedTransport::shared();
        transport.respond(json!({"id": 5, "subject": "Hi"}));
        let original = Message::new(Model::with_config(
            attrs(json!({"id": 4, "subject": "Hi"})),
            ModelConfig::new(Endpoint::fixed("https://api.test/messages/"))
                .with_transport(transport.clone()),
        ));

        let reply = block_on(original.reply(Attributes::new())).unwrap();

        assert_eq!(transport.last_request().unwrap().url, "https://api.test/messages/");
        assert_eq!(reply.url(), "https://api.test/messages/5");
    }
}
