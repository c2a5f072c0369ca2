//! Ordered, indexed container of models.
//!
//! A [`Collection`] keeps its models in a `Vec` together with two indexes:
//!
//! - identity → internal id, for models the server knows about,
//! - internal id → position in the sequence.
//!
//! For every model at position `i`, `by_cid[model.cid] == i`, and if the
//! model has an identity, `by_identity[identity] == model.cid`. This holds
//! after every add, remove, reset, sort and fetch.
//!
//! # Ordering
//!
//! With a comparator (`precedes(a, b)` is true iff `a` must come before `b`)
//! a new model starts at the end and walks backwards past every neighbor it
//! precedes. Equal-ranked models therefore keep their insertion order. Without
//! a comparator models are appended.
//!
//! # Ownership
//!
//! Adding a model wires two listeners on it: its `change` events are
//! re-emitted as the collection's `change`, and its `destroy` event removes
//! it. Removing the model detaches both listeners again.

use crate::attributes::{self, Attributes, Changes};
use crate::error::{Error, Result};
use crate::events::{self, EventEmitter, ListenerId};
use crate::id::{Cid, Identity};
use crate::model::{Endpoint, Model, ModelConfig, ModelEvent, ID_FIELD};
use crate::transport::{Method, Request, Transport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Strict precedence: returns true iff the first model must come before the
/// second. Must not call back into the collection being ordered.
pub type Comparator = Arc<dyn Fn(&Model, &Model) -> bool + Send + Sync>;

/// Configuration shared by a collection and the models it creates.
#[derive(Clone, Default)]
pub struct CollectionConfig {
    pub endpoint: Option<Endpoint>,
    pub transport: Option<Arc<dyn Transport>>,
    pub api_token: Option<String>,
    pub comparator: Option<Comparator>,
}

impl CollectionConfig {
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

    pub fn with_comparator(
        mut self,
        comparator: impl Fn(&Model, &Model) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    /// Config given to models built from plain attributes.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            endpoint: self.endpoint.clone(),
            transport: self.transport.clone(),
            api_token: self.api_token.clone(),
        }
    }
}

impl fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("endpoint", &self.endpoint)
            .field("transport", &self.transport.is_some())
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("comparator", &self.comparator.is_some())
            .finish()
    }
}

/// Something that can be added to a collection.
#[derive(Debug, Clone)]
pub enum ModelInput {
    Model(Model),
    Attributes(Attributes),
}

impl From<Model> for ModelInput {
    fn from(model: Model) -> Self {
        ModelInput::Model(model)
    }
}

impl From<&Model> for ModelInput {
    fn from(model: &Model) -> Self {
        ModelInput::Model(model.clone())
    }
}

impl From<Attributes> for ModelInput {
    fn from(attributes: Attributes) -> Self {
        ModelInput::Attributes(attributes)
    }
}

/// Lookup key: an identity or an internal id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelKey {
    Identity(Identity),
    Cid(Cid),
}

impl From<Identity> for ModelKey {
    fn from(identity: Identity) -> Self {
        ModelKey::Identity(identity)
    }
}

impl From<Cid> for ModelKey {
    fn from(cid: Cid) -> Self {
        ModelKey::Cid(cid)
    }
}

impl From<&Cid> for ModelKey {
    fn from(cid: &Cid) -> Self {
        ModelKey::Cid(cid.clone())
    }
}

impl From<&Model> for ModelKey {
    fn from(model: &Model) -> Self {
        ModelKey::Cid(model.cid().clone())
    }
}

impl From<i32> for ModelKey {
    fn from(n: i32) -> Self {
        ModelKey::Identity(Identity::Int(i64::from(n)))
    }
}

impl From<i64> for ModelKey {
    fn from(n: i64) -> Self {
        ModelKey::Identity(Identity::Int(n))
    }
}

impl From<&str> for ModelKey {
    fn from(s: &str) -> Self {
        ModelKey::Identity(Identity::from(s))
    }
}

/// Outcome of a collection fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Remote records that were not held locally
    pub added: usize,
    /// Local models with at least one attribute changed by the merge
    pub updated: usize,
    /// Persisted local models missing from the remote set
    pub removed: usize,
    pub has_changed: bool,
}

impl SyncReport {
    pub fn new(added: usize, updated: usize, removed: usize) -> Self {
        Self {
            added,
            updated,
            removed,
            has_changed: added + updated + removed > 0,
        }
    }
}

/// Payload of collection events.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// `add`
    Added {
        model: Model,
        index: usize,
        collection: Collection,
    },
    /// `remove`, with the position the model held
    Removed {
        model: Model,
        index: usize,
        collection: Collection,
    },
    /// `change`, forwarded from a member model
    Changed {
        model: Model,
        changes: Changes,
        collection: Collection,
    },
    /// `sync`
    Synced {
        report: SyncReport,
        collection: Collection,
    },
    /// `reset`
    Reset { collection: Collection },
}

/// Listeners the collection holds on a member model.
struct Proxy {
    change: ListenerId,
    destroy: ListenerId,
}

#[derive(Default)]
struct CollectionState {
    models: Vec<Model>,
    by_identity: HashMap<Identity, Cid>,
    by_cid: HashMap<Cid, usize>,
    proxies: HashMap<Cid, Proxy>,
}

impl CollectionState {
    fn position(&self, key: &ModelKey) -> Option<usize> {
        let cid = match key {
            ModelKey::Identity(identity) => self.by_identity.get(identity)?,
            ModelKey::Cid(cid) => cid,
        };
        self.by_cid.get(cid).copied()
    }

    fn index_identity(&mut self, model: &Model) {
        let Some(identity) = model.id() else {
            return;
        };
        match self.by_identity.get(&identity) {
            Some(holder) if holder != model.cid() => {
                tracing::warn!(
                    identity = %identity,
                    cid = %model.cid(),
                    holder = %holder,
                    "Identity already held by another model in the collection"
                );
            }
            _ => {
                self.by_identity.insert(identity, model.cid().clone());
            }
        }
    }

    /// Re-index positions `from..=to` after a shift.
    fn index_positions(&mut self, from: usize, to: usize) {
        for index in from..=to {
            let cid = self.models[index].cid().clone();
            self.by_cid.insert(cid, index);
        }
    }

    fn rebuild_indexes(&mut self) {
        self.by_identity.clear();
        self.by_cid.clear();
        if self.models.is_empty() {
            return;
        }
        self.index_positions(0, self.models.len() - 1);
        let models = self.models.clone();
        for model in &models {
            self.index_identity(model);
        }
    }

    /// Insert a new model at its ordered position and return that position.
    fn insert(&mut self, model: &Model, comparator: Option<&Comparator>) -> usize {
        let mut index = self.models.len();
        if let Some(precedes) = comparator {
            while index > 0 && precedes(model, &self.models[index - 1]) {
                index -= 1;
            }
        }
        self.models.insert(index, model.clone());
        let last = self.models.len() - 1;
        self.index_positions(index, last);
        self.index_identity(model);
        index
    }

    /// Move an existing model backwards past the neighbors it now precedes,
    /// or forwards past the neighbors that now precede it.
    fn reposition(&mut self, model: &Model, precedes: &Comparator) {
        let Some(current) = self.by_cid.get(model.cid()).copied() else {
            return;
        };

        let mut target = current;
        while target > 0 && precedes(model, &self.models[target - 1]) {
            target -= 1;
        }
        if target < current {
            self.models[target..=current].rotate_right(1);
            self.index_positions(target, current);
            return;
        }

        while target + 1 < self.models.len() && precedes(&self.models[target + 1], model) {
            target += 1;
        }
        if target > current {
            self.models[current..=target].rotate_left(1);
            self.index_positions(current, target);
        }
    }

    /// Stable insertion sort using the same walk as `insert`.
    fn sort(&mut self, precedes: &dyn Fn(&Model, &Model) -> bool) {
        for current in 1..self.models.len() {
            let model = self.models[current].clone();
            let mut target = current;
            while target > 0 && precedes(&model, &self.models[target - 1]) {
                target -= 1;
            }
            if target < current {
                self.models[target..=current].rotate_right(1);
            }
        }
        self.rebuild_indexes();
    }
}

enum Merge {
    Added,
    Merged { changed: bool },
}

pub(crate) struct CollectionInner {
    config: CollectionConfig,
    state: Mutex<CollectionState>,
    events: EventEmitter<CollectionEvent>,
}

/// Shared handle to an ordered collection. Clones refer to the same
/// collection.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new(config: CollectionConfig) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                config,
                state: Mutex::new(CollectionState::default()),
                events: EventEmitter::new(),
            }),
        }
    }

    /// Create a collection seeded with `items`. No `add` events can be
    /// observed for the seed since nothing is subscribed yet.
    pub fn with_models<I>(items: I, config: CollectionConfig) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ModelInput>,
    {
        let collection = Self::new(config);
        collection.add_many(items);
        collection
    }

    pub(crate) fn from_inner(inner: Arc<CollectionInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.inner.config
    }

    /// Base url for the collection and its members.
    pub fn url(&self) -> String {
        self.inner
            .config
            .endpoint
            .as_ref()
            .map(Endpoint::resolve)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Model at `index`.
    pub fn at(&self, index: usize) -> Option<Model> {
        self.inner.state.lock().models.get(index).cloned()
    }

    /// Model by identity or internal id.
    pub fn get(&self, key: impl Into<ModelKey>) -> Option<Model> {
        let state = self.inner.state.lock();
        let index = state.position(&key.into())?;
        state.models.get(index).cloned()
    }

    /// Position of a model by identity or internal id.
    pub fn index_of(&self, key: impl Into<ModelKey>) -> Option<usize> {
        self.inner.state.lock().position(&key.into())
    }

    pub fn contains(&self, key: impl Into<ModelKey>) -> bool {
        self.index_of(key).is_some()
    }

    /// Ordered snapshot of the members.
    pub fn models(&self) -> Vec<Model> {
        self.inner.state.lock().models.clone()
    }

    pub fn filter(&self, predicate: impl Fn(&Model) -> bool) -> Vec<Model> {
        self.models().into_iter().filter(|m| predicate(m)).collect()
    }

    /// Attribute maps of all members, in order.
    pub fn to_json(&self) -> Vec<Attributes> {
        self.models().iter().map(Model::to_json).collect()
    }

    /// Add or merge one item and return the resulting member.
    pub fn add(&self, item: impl Into<ModelInput>) -> Model {
        let (model, merge) = self.insert_or_merge(item.into());
        if let Merge::Added = merge {
            self.announce(std::slice::from_ref(&model));
        }
        model
    }

    /// Add or merge several items. Returns the newly inserted models; `add`
    /// events fire once every item has been placed.
    pub fn add_many<I>(&self, items: I) -> Vec<Model>
    where
        I: IntoIterator,
        I::Item: Into<ModelInput>,
    {
        self.merge_all(items).0
    }

    fn merge_all<I>(&self, items: I) -> (Vec<Model>, usize)
    where
        I: IntoIterator,
        I::Item: Into<ModelInput>,
    {
        let mut added = Vec::new();
        let mut updated = 0;
        for item in items {
            match self.insert_or_merge(item.into()) {
                (model, Merge::Added) => added.push(model),
                (_, Merge::Merged { changed: true }) => updated += 1,
                (_, Merge::Merged { changed: false }) => {}
            }
        }
        self.announce(&added);
        (added, updated)
    }

    fn find(&self, identity: Option<Identity>, cid: Option<&Cid>) -> Option<Model> {
        let by_identity = identity.and_then(|identity| self.get(identity));
        by_identity.or_else(|| cid.and_then(|cid| self.get(cid)))
    }

    fn insert_or_merge(&self, input: ModelInput) -> (Model, Merge) {
        let existing = match &input {
            ModelInput::Model(model) => self.find(model.id(), Some(model.cid())),
            ModelInput::Attributes(attributes) => self.find(
                attributes.get(ID_FIELD).and_then(Identity::from_value),
                None,
            ),
        };

        if let Some(existing) = existing {
            let attributes = match input {
                ModelInput::Model(model) if model.ptr_eq(&existing) => {
                    return (existing, Merge::Merged { changed: false });
                }
                ModelInput::Model(model) => model.to_json(),
                ModelInput::Attributes(attributes) => attributes,
            };
            let changed = existing.set_many(attributes).is_some();
            if changed {
                if let Some(precedes) = &self.inner.config.comparator {
                    self.inner.state.lock().reposition(&existing, precedes);
                }
            }
            return (existing, Merge::Merged { changed });
        }

        let model = match input {
            ModelInput::Model(model) => model,
            ModelInput::Attributes(attributes) => {
                Model::with_config(attributes, self.inner.config.model_config())
            }
        };
        if let Some(previous) = model.collection() {
            tracing::debug!(cid = %model.cid(), "Moving model between collections");
            previous.remove(&model);
        }
        model.adopt(Arc::downgrade(&self.inner), &self.inner.config);

        let index = self
            .inner
            .state
            .lock()
            .insert(&model, self.inner.config.comparator.as_ref());
        self.proxy(&model);

        tracing::debug!(cid = %model.cid(), index, "Model added to collection");
        (model, Merge::Added)
    }

    fn proxy(&self, model: &Model) {
        let weak = Arc::downgrade(&self.inner);
        let change = model.on(events::CHANGE, move |_, event| {
            let (Some(inner), ModelEvent::Changed { model, changes }) = (weak.upgrade(), event)
            else {
                return;
            };
            let collection = Collection::from_inner(inner);
            if let Some(change) = changes.get(ID_FIELD) {
                if let Some(holder) = collection.reindex_identity(model, change.old_value.as_ref())
                {
                    collection.absorb(&holder, model);
                    return;
                }
            }
            collection.inner.events.trigger(
                events::CHANGE,
                &CollectionEvent::Changed {
                    model: model.clone(),
                    changes: changes.clone(),
                    collection: collection.clone(),
                },
            );
        });

        let weak = Arc::downgrade(&self.inner);
        let destroy = model.once(events::DESTROY, move |_, event| {
            if let Some(inner) = weak.upgrade() {
                Collection::from_inner(inner).remove(event.model());
            }
        });

        self.inner
            .state
            .lock()
            .proxies
            .insert(model.cid().clone(), Proxy { change, destroy });
    }

    /// Index a member's new identity. Returns the other member already
    /// holding that identity, if any; the index is left pointing at it.
    fn reindex_identity(&self, model: &Model, old_value: Option<&Value>) -> Option<Model> {
        let mut state = self.inner.state.lock();
        if let Some(old) = old_value.and_then(Identity::from_value) {
            if state.by_identity.get(&old) == Some(model.cid()) {
                state.by_identity.remove(&old);
            }
        }

        let identity = model.id()?;
        match state.by_identity.get(&identity).cloned() {
            Some(holder) if &holder != model.cid() => {
                let index = state.by_cid.get(&holder).copied()?;
                state.models.get(index).cloned()
            }
            _ => {
                state.by_identity.insert(identity, model.cid().clone());
                None
            }
        }
    }

    /// Fold `newcomer`, which just took the identity of `holder`, into the
    /// holder. One model per identity: the holder stays, the newcomer leaves.
    fn absorb(&self, holder: &Model, newcomer: &Model) {
        tracing::debug!(
            cid = %newcomer.cid(),
            holder = %holder.cid(),
            "Merging member into the holder of its identity"
        );
        self.remove(newcomer);

        if holder.set_many(newcomer.to_json()).is_some() {
            if let Some(precedes) = &self.inner.config.comparator {
                self.inner.state.lock().reposition(holder, precedes);
            }
        }
    }

    /// Detach the collection's listeners and ownership from a former member.
    fn sever(&self, model: &Model, proxy: Option<Proxy>) {
        if let Some(proxy) = proxy {
            model.off(events::CHANGE, proxy.change);
            model.off(events::DESTROY, proxy.destroy);
        }
        model.release(&self.inner);
    }

    fn announce(&self, added: &[Model]) {
        for model in added {
            let Some(index) = self.index_of(model) else {
                continue;
            };
            self.inner.events.trigger(
                events::ADD,
                &CollectionEvent::Added {
                    model: model.clone(),
                    index,
                    collection: self.clone(),
                },
            );
        }
    }

    /// Remove a member by identity, internal id or handle. Returns `false`
    /// when nothing matched.
    pub fn remove(&self, key: impl Into<ModelKey>) -> bool {
        let key = key.into();
        let (model, index, proxy) = {
            let mut state = self.inner.state.lock();
            let Some(index) = state.position(&key) else {
                return false;
            };
            let model = state.models.remove(index);
            let proxy = state.proxies.remove(model.cid());
            state.rebuild_indexes();
            (model, index, proxy)
        };
        self.sever(&model, proxy);

        tracing::debug!(cid = %model.cid(), index, "Model removed from collection");
        self.inner.events.trigger(
            events::REMOVE,
            &CollectionEvent::Removed {
                model,
                index,
                collection: self.clone(),
            },
        );
        true
    }

    /// Drop every member and fire `reset`.
    pub fn reset(&self) {
        let (models, mut proxies) = {
            let mut state = self.inner.state.lock();
            let models = std::mem::take(&mut state.models);
            let proxies = std::mem::take(&mut state.proxies);
            state.rebuild_indexes();
            (models, proxies)
        };
        for model in &models {
            self.sever(model, proxies.remove(model.cid()));
        }

        tracing::debug!(removed = models.len(), "Collection reset");
        self.inner.events.trigger(
            events::RESET,
            &CollectionEvent::Reset {
                collection: self.clone(),
            },
        );
    }

    /// Re-sort with the configured comparator.
    pub fn sort(&self) -> Result<()> {
        let precedes = self
            .inner
            .config
            .comparator
            .clone()
            .ok_or(Error::NoComparator)?;
        self.inner.state.lock().sort(&*precedes);
        Ok(())
    }

    /// Re-sort with an explicit comparator, leaving the configured one as is.
    pub fn sort_by(&self, precedes: impl Fn(&Model, &Model) -> bool) {
        self.inner.state.lock().sort(&precedes);
    }

    /// Add `attributes` as a new member and save it. The model stays in the
    /// collection when the save fails.
    ///
    /// When the saved identity is already held by another member (e.g. a
    /// fetch delivered it while the save was in flight), the new model is
    /// merged into that member and the member is returned.
    pub async fn create(&self, attributes: Attributes) -> Result<Model> {
        let model = self.add(attributes);
        model.save().await?;
        let member = model.id().and_then(|id| self.get(id));
        Ok(member.unwrap_or(model))
    }

    /// Fetch the remote set and reconcile with it.
    ///
    /// Persisted members missing from the response are removed, unsaved
    /// members are kept, and every remote record is merged via `add`.
    pub async fn fetch(&self) -> Result<SyncReport> {
        let transport = self.inner.config.transport.clone().ok_or_else(|| {
            Error::Validation("collection has no transport configured".into())
        })?;
        let request = Request::new(Method::Get, self.url())
            .with_bearer(self.inner.config.api_token.as_deref());

        tracing::debug!(url = %request.url, "Fetching collection");
        let response = transport.perform(request).await.map_err(|err| {
            tracing::warn!(error = %err, "Collection fetch failed");
            Error::from(err)
        })?;
        let records = parse_records(response)?;

        let remote: HashSet<Identity> = records
            .iter()
            .filter_map(|record| record.get(ID_FIELD).and_then(Identity::from_value))
            .collect();
        let stale: Vec<Model> = self
            .models()
            .into_iter()
            .filter(|model| model.id().is_some_and(|id| !remote.contains(&id)))
            .collect();
        for model in &stale {
            self.remove(model);
        }

        let (added, updated) = self.merge_all(records);
        let report = SyncReport::new(added.len(), updated, stale.len());

        tracing::debug!(
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            "Collection synced"
        );
        self.inner.events.trigger(
            events::SYNC,
            &CollectionEvent::Synced {
                report,
                collection: self.clone(),
            },
        );
        Ok(report)
    }

    /// The collection's event emitter.
    pub fn events(&self) -> &EventEmitter<CollectionEvent> {
        &self.inner.events
    }

    pub fn on(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&str, &CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.on(name, handler)
    }

    pub fn once(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&str, &CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.once(name, handler)
    }

    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        self.inner.events.off(name, id)
    }

    /// Check the index invariants. Intended for tests and debug assertions.
    pub fn indexes_consistent(&self) -> bool {
        let state = self.inner.state.lock();
        if state.by_cid.len() != state.models.len() {
            return false;
        }
        state.models.iter().enumerate().all(|(index, model)| {
            state.by_cid.get(model.cid()) == Some(&index)
                && model
                    .id()
                    .map_or(true, |id| state.by_identity.get(&id) == Some(model.cid()))
        })
    }
}

fn parse_records(response: Value) -> Result<Vec<Attributes>> {
    let Value::Array(items) = response else {
        return Err(Error::InvalidResponse(
            "expected a JSON array for a collection".into(),
        ));
    };
    items
        .into_iter()
        .map(|item| {
            attributes::from_value(item).ok_or_else(|| {
                Error::InvalidResponse("collection items must be JSON objects".into())
            })
        })
        .collect()
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("url", &self.url())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedTransport;
    use futures::executor::block_on;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn attrs(value: Value) -> Attributes {
        attributes::from_value(value).unwrap()
    }

    fn by_rank() -> impl Fn(&Model, &Model) -> bool + Send + Sync + 'static {
        |a, b| {
            let rank = |m: &Model| m.get("rank").and_then(|v| v.as_i64()).unwrap_or(0);
            rank(a) < rank(b)
        }
    }

    fn ranks(collection: &Collection) -> Vec<i64> {
        collection
            .models()
            .iter()
            .map(|m| m.get("rank").and_then(|v| v.as_i64()).unwrap_or(0))
            .collect()
    }

    fn event_log(collection: &Collection) -> Arc<StdMutex<Vec<String>>> {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        collection.on(events::WILDCARD, move |name, event| {
            let entry = match event {
                CollectionEvent::Added { index, .. } | CollectionEvent::Removed { index, .. } => {
                    format!("{name}@{index}")
                }
                _ => name.to_string(),
            };
            sink.lock().unwrap().push(entry);
        });
        log
    }

    #[test]
    fn add_appends_without_comparator() {
        let collection = Collection::new(CollectionConfig::default());
        let log = event_log(&collection);

        let added = collection.add_many([attrs(json!({"id": 1})), attrs(json!({"id": 2}))]);

        assert_eq!(added.len(), 2);
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.index_of(2), Some(1));
        assert_eq!(*log.lock().unwrap(), vec!["add@0", "add@1"]);
        assert!(collection.indexes_consistent());
    }

    #[test]
    fn add_inserts_in_comparator_order() {
        let collection =
            Collection::new(CollectionConfig::default().with_comparator(by_rank()));

        for rank in [5, 1, 3, 3, 0, 9] {
            collection.add(attrs(json!({"rank": rank})));
        }

        assert_eq!(ranks(&collection), vec![0, 1, 3, 3, 5, 9]);
        assert!(collection.indexes_consistent());
    }

    #[test]
    fn equal_ranks_keep_insertion_order() {
        let collection =
            Collection::new(CollectionConfig::default().with_comparator(by_rank()));
        let first = collection.add(attrs(json!({"rank": 1, "tag": "first"})));
        let second = collection.add(attrs(json!({"rank": 1, "tag": "second"})));

        assert_eq!(collection.at(0), Some(first));
        assert_eq!(collection.at(1), Some(second));
    }

    #[test]
    fn merge_on_add_updates_in_place() {
        let collection = Collection::with_models(
            [attrs(json!({"id": 5, "name": "old"}))],
            CollectionConfig::default(),
        );
        let existing = collection.get(5).unwrap();
        let renamed = Arc::new(StdMutex::new(Vec::new()));
        {
            let renamed = Arc::clone(&renamed);
            existing.on("change:name", move |_, event| {
                if let ModelEvent::FieldChanged { change, .. } = event {
                    renamed.lock().unwrap().push(change.new_value.clone());
                }
            });
        }
        let log = event_log(&collection);

        let merged = collection.add(attrs(json!({"id": 5, "name": "x"})));

        assert!(merged.ptr_eq(&existing));
        assert_eq!(collection.len(), 1);
        assert_eq!(*renamed.lock().unwrap(), vec![json!("x")]);
        assert_eq!(*log.lock().unwrap(), vec!["change"]);
    }

    #[test]
    fn merge_repositions_changed_model() {
        let collection =
            Collection::new(CollectionConfig::default().with_comparator(by_rank()));
        collection.add_many([
            attrs(json!({"id": 1, "rank": 1})),
            attrs(json!({"id": 2, "rank": 2})),
            attrs(json!({"id": 3, "rank": 3})),
        ]);

        collection.add(attrs(json!({"id": 1, "rank": 10})));
        assert_eq!(ranks(&collection), vec![2, 3, 10]);

        collection.add(attrs(json!({"id": 3, "rank": 0})));
        assert_eq!(ranks(&collection), vec![0, 2, 10]);
        assert!(collection.indexes_consistent());
    }

    #[test]
    fn adopting_an_existing_instance() {
        let collection = Collection::new(CollectionConfig::new(Endpoint::fixed("/messages/")));
        let model = Model::new(attrs(json!({"subject": "hi"})));

        let added = collection.add(&model);
        assert!(added.ptr_eq(&model));
        assert_eq!(model.url(), "/messages/");

        // Re-adding the same handle is a no-op merge.
        collection.add(&model);
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.get(model.cid()), Some(model));
    }

    #[test]
    fn identity_change_is_indexed() {
        let collection = Collection::new(CollectionConfig::default());
        let model = collection.add(attrs(json!({"name": "draft"})));
        assert!(collection.get(77).is_none());

        model.set("id", 77);

        assert_eq!(collection.get(77), Some(model));
        assert!(collection.indexes_consistent());
    }

    #[test]
    fn remove_severs_ownership() {
        let collection = Collection::new(CollectionConfig::new(Endpoint::fixed("/messages/")));
        let model = collection.add(attrs(json!({"id": 1, "text": "a"})));
        collection.add(attrs(json!({"id": 2, "text": "b"})));
        let log = event_log(&collection);
        assert_eq!(model.collection(), Some(collection.clone()));

        assert!(collection.remove(1));
        assert!(!collection.remove(1));
        assert!(model.collection().is_none());

        model.set("text", "changed");

        assert_eq!(*log.lock().unwrap(), vec!["remove@0"]);
        assert_eq!(collection.index_of(2), Some(0));
        assert_eq!(model.events().listener_count(events::CHANGE), 0);
        assert!(collection.indexes_consistent());
    }

    #[test]
    fn reset_clears_everything() {
        let collection = Collection::with_models(
            [attrs(json!({"id": 1})), attrs(json!({"id": 2}))],
            CollectionConfig::default(),
        );
        let first = collection.at(0).unwrap();
        let log = event_log(&collection);

        collection.reset();

        assert!(collection.is_empty());
        assert!(collection.get(1).is_none());
        assert_eq!(*log.lock().unwrap(), vec!["reset"]);
        assert_eq!(first.events().listener_count(events::DESTROY), 0);
    }

    #[test]
    fn sort_requires_a_comparator() {
        let collection = Collection::new(CollectionConfig::default());
        assert_eq!(collection.sort(), Err(Error::NoComparator));
    }

    #[test]
    fn sort_by_is_stable() {
        let collection = Collection::with_models(
            [
                attrs(json!({"id": 1, "rank": 2})),
                attrs(json!({"id": 2, "rank": 1})),
                attrs(json!({"id": 3, "rank": 2})),
                attrs(json!({"id": 4, "rank": 0})),
            ],
            CollectionConfig::default(),
        );

        collection.sort_by(by_rank());

        let ids: Vec<_> = collection.models().iter().filter_map(Model::id).collect();
        assert_eq!(
            ids,
            vec![
                Identity::Int(4),
                Identity::Int(2),
                Identity::Int(1),
                Identity::Int(3)
            ]
        );
        assert!(collection.indexes_consistent());
    }

    #[test]
    fn destroy_purges_from_collection() {
        let transport = ScriptedTransport::shared();
        transport.respond(Value::Null);
        let collection = Collection::with_models(
            [attrs(json!({"id": 1})), attrs(json!({"id": 2}))],
            CollectionConfig::new(Endpoint::fixed("https://api.test/messages/"))
                .with_transport(transport.clone()),
        );
        let model = collection.get(1).unwrap();

        block_on(model.destroy()).unwrap();

        assert_eq!(collection.len(), 1);
        assert!(collection.get(1).is_none());
        assert_eq!(
            transport.last_request().unwrap().url,
            "https://api.test/messages/1"
        );
    }

    #[test]
    fn create_adds_then_saves() {
        let transport = ScriptedTransport::shared();
        transport.respond(json!({"id": 12, "subject": "hello"}));
        let collection = Collection::new(
            CollectionConfig::new(Endpoint::fixed("https://api.test/messages/"))
                .with_transport(transport.clone())
                .with_api_token("t"),
        );

        let model = block_on(collection.create(attrs(json!({"subject": "hello"})))).unwrap();

        assert_eq!(collection.get(12), Some(model));
        let request = transport.last_request().unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "https://api.test/messages/");
        assert_eq!(request.headers["Authorization"], "Bearer t");
    }

    #[test]
    fn fetch_rejects_malformed_bodies() {
        let transport = ScriptedTransport::shared();
        transport.respond(json!({"not": "a list"})).respond(json!([1]));
        let collection = Collection::new(
            CollectionConfig::new(Endpoint::fixed("/m/")).with_transport(transport.clone()),
        );

        assert!(matches!(
            block_on(collection.fetch()),
            Err(Error::InvalidResponse(_))
        ));
        assert!(matches!(
            block_on(collection.fetch()),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn sync_report_has_changed() {
        assert!(!SyncReport::new(0, 0, 0).has_changed);
        assert!(SyncReport::new(0, 1, 0).has_changed);
    }
}
