//! Observable single-entity store.
//!
//! A [`Model`] holds a flat attribute map, detects changes on every `set`
//! and keeps itself in sync with the remote API through its transport.
//!
//! # Lifecycle
//!
//! ```text
//! Unsaved --save--> Synced --save/fetch--> Synced --destroy--> Destroyed
//! ```
//!
//! A failed sync never changes state: attributes, identity and lifecycle are
//! only touched once the transport reported success.
//!
//! # Events
//!
//! - `change:<field>` for every changed field, in the order fields are set
//! - `change` once per `set` call that changed at least one field
//! - `sync` after a successful save or fetch
//! - `destroy` after a successful delete (all handlers are dropped right after)

use crate::attributes::{self, Attributes, Change, Changes};
use crate::collection::{Collection, CollectionConfig, CollectionInner};
use crate::error::{Error, Result, SyncOp};
use crate::events::{self, EventEmitter, ListenerId};
use crate::id::{Cid, Identity};
use crate::transport::{Method, Request, Transport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// Attribute holding the server-assigned identity.
pub const ID_FIELD: &str = "id";

/// Lifecycle state of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    /// Never persisted: no identity yet
    Unsaved,
    /// Has an identity known to the remote API
    Synced,
    /// Deleted remotely; terminal
    Destroyed,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelState::Unsaved => "unsaved",
            ModelState::Synced => "synced",
            ModelState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Where a model or collection lives on the remote API.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// An absolute base url, e.g. `https://api.supportive.io/apps/42/users/`
    Fixed(String),
    /// A path below another model, e.g. messages below their user
    Nested { parent: Model, path: String },
}

impl Endpoint {
    pub fn fixed(url: impl Into<String>) -> Self {
        Endpoint::Fixed(url.into())
    }

    pub fn nested(parent: &Model, path: impl Into<String>) -> Self {
        Endpoint::Nested {
            parent: parent.clone(),
            path: path.into(),
        }
    }

    /// Resolve to a url string.
    pub fn resolve(&self) -> String {
        match self {
            Endpoint::Fixed(url) => url.clone(),
            Endpoint::Nested { parent, path } => format!("{}{}", parent.url(), path),
        }
    }
}

/// Sync settings of a standalone model.
///
/// When a collection adopts the model, the collection's transport and token
/// take precedence and its url replaces `endpoint`.
#[derive(Clone, Default)]
pub struct ModelConfig {
    pub endpoint: Option<Endpoint>,
    pub transport: Option<Arc<dyn Transport>>,
    pub api_token: Option<String>,
}

impl ModelConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..Self::default()
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("endpoint", &self.endpoint)
            .field("transport", &self.transport.is_some())
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Payload of model events.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// `change:<field>`
    FieldChanged {
        model: Model,
        field: String,
        change: Change,
    },
    /// `change`
    Changed { model: Model, changes: Changes },
    /// `sync`
    Synced { model: Model },
    /// `destroy`
    Destroyed { model: Model },
}

impl ModelEvent {
    /// The model that emitted the event.
    pub fn model(&self) -> &Model {
        match self {
            ModelEvent::FieldChanged { model, .. }
            | ModelEvent::Changed { model, .. }
            | ModelEvent::Synced { model }
            | ModelEvent::Destroyed { model } => model,
        }
    }
}

struct ModelData {
    identity: Option<Identity>,
    attributes: Attributes,
    destroyed: bool,
    dirty: BTreeSet<String>,
    config: ModelConfig,
    owner: Option<Weak<CollectionInner>>,
}

struct ModelInner {
    cid: Cid,
    data: Mutex<ModelData>,
    events: EventEmitter<ModelEvent>,
}

/// Shared handle to an observable entity. Clones refer to the same entity.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    /// Create an unattached model with no endpoint or transport.
    pub fn new(attributes: Attributes) -> Self {
        Self::with_config(attributes, ModelConfig::default())
    }

    /// Create a model. Initial attributes are applied without firing events.
    pub fn with_config(attributes: Attributes, config: ModelConfig) -> Self {
        let identity = attributes.get(ID_FIELD).and_then(Identity::from_value);
        Self {
            inner: Arc::new(ModelInner {
                cid: Cid::generate(),
                data: Mutex::new(ModelData {
                    identity,
                    attributes,
                    destroyed: false,
                    dirty: BTreeSet::new(),
                    config,
                    owner: None,
                }),
                events: EventEmitter::new(),
            }),
        }
    }

    /// Internal id, stable for the lifetime of the model.
    pub fn cid(&self) -> &Cid {
        &self.inner.cid
    }

    /// Server-assigned identity, if any.
    pub fn id(&self) -> Option<Identity> {
        self.inner.data.lock().identity.clone()
    }

    pub fn is_new(&self) -> bool {
        self.inner.data.lock().identity.is_none()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.data.lock().destroyed
    }

    pub fn state(&self) -> ModelState {
        let data = self.inner.data.lock();
        if data.destroyed {
            ModelState::Destroyed
        } else if data.identity.is_some() {
            ModelState::Synced
        } else {
            ModelState::Unsaved
        }
    }

    /// Owned copy of a field's value.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.data.lock().attributes.get(field).cloned()
    }

    /// Owned copy of all attributes.
    pub fn to_json(&self) -> Attributes {
        self.inner.data.lock().attributes.clone()
    }

    /// Fields changed through `set` since construction or the last sync.
    pub fn dirty_fields(&self) -> BTreeSet<String> {
        self.inner.data.lock().dirty.clone()
    }

    pub fn is_dirty(&self) -> bool {
        !self.inner.data.lock().dirty.is_empty()
    }

    /// Set a single field. See [`Model::set_many`].
    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) -> Option<Changes> {
        let mut attributes = Attributes::new();
        attributes.insert(field.into(), value.into());
        self.set_many(attributes)
    }

    /// Apply several fields, firing `change:<field>` per changed field and
    /// one aggregate `change` event.
    ///
    /// Returns the deltas, or `None` when nothing changed or the model is
    /// destroyed.
    pub fn set_many(&self, attributes: Attributes) -> Option<Changes> {
        if self.is_destroyed() {
            tracing::debug!(cid = %self.cid(), "Ignoring set on destroyed model");
            return None;
        }

        let mut changes = Changes::new();
        for (field, value) in attributes {
            if let Some(change) = self.set_field(&field, value) {
                changes.insert(field, change);
            }
        }

        if changes.is_empty() {
            return None;
        }

        self.inner.events.trigger(
            events::CHANGE,
            &ModelEvent::Changed {
                model: self.clone(),
                changes: changes.clone(),
            },
        );
        Some(changes)
    }

    fn set_field(&self, field: &str, value: Value) -> Option<Change> {
        let change = {
            let mut data = self.inner.data.lock();
            if data.destroyed || attributes::is_unchanged(data.attributes.get(field), &value) {
                return None;
            }

            if field == ID_FIELD {
                let incoming = Identity::from_value(&value);
                match data.identity.clone() {
                    Some(current) if incoming.as_ref() != Some(&current) => {
                        tracing::warn!(
                            cid = %self.inner.cid,
                            identity = %current,
                            "Refusing to clear or replace model identity"
                        );
                        return None;
                    }
                    None if incoming.is_some() => data.identity = incoming,
                    _ => {}
                }
            }

            data.dirty.insert(field.to_string());
            let old_value = data.attributes.insert(field.to_string(), value.clone());
            Change {
                old_value,
                new_value: value,
            }
        };

        self.inner.events.trigger(
            &events::change_event(field),
            &ModelEvent::FieldChanged {
                model: self.clone(),
                field: field.to_string(),
                change: change.clone(),
            },
        );
        Some(change)
    }

    /// Url of this model: the base endpoint, followed by the identity once
    /// there is one.
    pub fn url(&self) -> String {
        let (owner, endpoint, identity) = {
            let data = self.inner.data.lock();
            (
                data.owner.as_ref().and_then(Weak::upgrade),
                data.config.endpoint.clone(),
                data.identity.clone(),
            )
        };

        let base = match owner {
            Some(inner) => Collection::from_inner(inner).url(),
            None => endpoint.map(|e| e.resolve()).unwrap_or_default(),
        };

        match identity {
            Some(identity) => format!("{base}{identity}"),
            None => base,
        }
    }

    /// Create (POST) or update (PUT) the model with its full attribute set.
    pub async fn save(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::State {
                operation: SyncOp::Save,
                state: ModelState::Destroyed,
            });
        }

        let method = if self.is_new() { Method::Post } else { Method::Put };
        let request = Request::new(method, self.url()).with_data(Value::Object(self.to_json()));
        let response = self.sync(request).await?;
        self.apply_response(response)
    }

    /// Apply `attributes` locally, then [`save`](Model::save).
    pub async fn save_with(&self, attributes: Attributes) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::State {
                operation: SyncOp::Save,
                state: ModelState::Destroyed,
            });
        }
        self.set_many(attributes);
        self.save().await
    }

    /// Reload the model from the remote API.
    pub async fn fetch(&self) -> Result<()> {
        self.require_synced(SyncOp::Fetch)?;
        let response = self.sync(Request::new(Method::Get, self.url())).await?;
        self.apply_response(response)
    }

    /// Delete the model remotely, then clear it and drop all handlers.
    pub async fn destroy(&self) -> Result<()> {
        self.require_synced(SyncOp::Destroy)?;
        self.sync(Request::new(Method::Delete, self.url())).await?;

        {
            let mut data = self.inner.data.lock();
            data.attributes.clear();
            data.dirty.clear();
            data.destroyed = true;
        }
        tracing::debug!(cid = %self.cid(), "Model destroyed");

        self.inner.events.trigger(
            events::DESTROY,
            &ModelEvent::Destroyed {
                model: self.clone(),
            },
        );
        self.inner.events.off_all();
        Ok(())
    }

    fn require_synced(&self, operation: SyncOp) -> Result<()> {
        match self.state() {
            ModelState::Synced => Ok(()),
            state => Err(Error::State { operation, state }),
        }
    }

    async fn sync(&self, request: Request) -> Result<Value> {
        let (transport, token) = {
            let data = self.inner.data.lock();
            (data.config.transport.clone(), data.config.api_token.clone())
        };
        let transport = transport
            .ok_or_else(|| Error::Validation("model has no transport configured".into()))?;
        let request = request.with_bearer(token.as_deref());

        tracing::debug!(
            cid = %self.cid(),
            method = %request.method,
            url = %request.url,
            "Syncing model"
        );

        transport.perform(request).await.map_err(|err| {
            tracing::warn!(cid = %self.cid(), error = %err, "Model sync failed");
            Error::from(err)
        })
    }

    fn apply_response(&self, response: Value) -> Result<()> {
        let attributes = attributes::from_value(response).ok_or_else(|| {
            Error::InvalidResponse("expected a JSON object for a model".into())
        })?;

        self.set_many(attributes);
        self.inner.data.lock().dirty.clear();

        self.inner.events.trigger(
            events::SYNC,
            &ModelEvent::Synced {
                model: self.clone(),
            },
        );
        Ok(())
    }

    /// The model's event emitter.
    pub fn events(&self) -> &EventEmitter<ModelEvent> {
        &self.inner.events
    }

    pub fn on(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&str, &ModelEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.on(name, handler)
    }

    pub fn once(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&str, &ModelEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.once(name, handler)
    }

    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        self.inner.events.off(name, id)
    }

    /// Sync settings, including whatever an owning collection handed over.
    pub fn config(&self) -> ModelConfig {
        self.inner.data.lock().config.clone()
    }

    /// The collection currently holding this model.
    pub fn collection(&self) -> Option<Collection> {
        let owner = self.inner.data.lock().owner.as_ref().and_then(Weak::upgrade);
        owner.map(Collection::from_inner)
    }

    /// Whether both handles refer to the same entity.
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Hand the model over to a collection.
    pub(crate) fn adopt(&self, owner: Weak<CollectionInner>, config: &CollectionConfig) {
        let mut data = self.inner.data.lock();
        data.owner = Some(owner);
        if config.transport.is_some() {
            data.config.transport = config.transport.clone();
        }
        if config.api_token.is_some() {
            data.config.api_token = config.api_token.clone();
        }
        if data.config.endpoint.is_none() {
            data.config.endpoint = config.endpoint.clone();
        }
    }

    /// Sever ownership by `owner`; the model falls back to its own endpoint.
    /// Ownership held by another collection is left alone.
    pub(crate) fn release(&self, owner: &Arc<CollectionInner>) {
        let mut data = self.inner.data.lock();
        let owned = data
            .owner
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(owner)));
        if owned {
            data.owner = None;
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("Model")
            .field("cid", &self.inner.cid)
            .field("identity", &data.identity)
            .field("attributes", &data.attributes)
            .field("destroyed", &data.destroyed)
            .finish()
    }
}
