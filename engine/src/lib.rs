//! # Supportive Engine
//!
//! Observable models and ordered collections kept in sync with a REST API.
//!
//! This crate is the data layer of the Supportive SDK. It holds entities in
//! memory, tells listeners about every change, and reconciles local state
//! with the remote API through a pluggable transport.
//!
//! ## Design Principles
//!
//! - **No IO**: every request goes through the [`Transport`] trait
//! - **Observable**: every mutation fires named events
//! - **Indexed**: collection lookups by identity, internal id or position are O(1)
//! - **Last write wins**: no conflict resolution beyond applying the latest response
//!
//! ## Core Concepts
//!
//! ### Events
//!
//! [`EventEmitter`] is a per-instance registry of named handlers. Every event
//! is also re-dispatched to the wildcard name `*`.
//!
//! ### Models
//!
//! A [`Model`] is a flat attribute map with:
//! - an internal id ([`Cid`]) assigned at construction
//! - an optional [`Identity`] assigned by the server on first save
//! - change detection: `change:<field>` and `change` events on `set`
//! - a sync lifecycle: [`Model::save`], [`Model::fetch`], [`Model::destroy`]
//!
//! ### Collections
//!
//! A [`Collection`] is an ordered sequence of models with two indexes
//! (identity → internal id, internal id → position). Adding an equivalent
//! model merges into the existing one; an optional [`Comparator`] keeps the
//! sequence sorted; [`Collection::fetch`] reconciles with the remote set and
//! returns a [`SyncReport`].
//!
//! ## Quick Start
//!
//! ```rust
//! use supportive_engine::{Collection, CollectionConfig, Endpoint, Model};
//! use serde_json::json;
//!
//! fn rank(model: &Model) -> Option<i64> {
//!     model.get("rank").and_then(|v| v.as_i64())
//! }
//!
//! let messages = Collection::new(
//!     CollectionConfig::new(Endpoint::fixed("https://api.example.com/messages/"))
//!         .with_comparator(|a: &Model, b: &Model| rank(a) < rank(b)),
//! );
//!
//! let record = json!({"id": 1, "rank": 2, "text": "hello"});
//! messages.add(record.as_object().cloned().unwrap());
//!
//! let merged = messages.add(json!({"id": 1, "text": "hi"}).as_object().cloned().unwrap());
//! assert_eq!(messages.len(), 1);
//! assert_eq!(merged.get("text"), Some(json!("hi")));
//! assert_eq!(merged.url(), "https://api.example.com/messages/1");
//! ```
//!
//! ## Testing
//!
//! [`ScriptedTransport`] replays queued responses and records every request,
//! which is enough to drive the whole sync lifecycle without a network.

pub mod attributes;
pub mod collection;
pub mod error;
pub mod events;
pub mod id;
pub mod model;
pub mod scripted;
pub mod transport;

// Re-export main types at crate root
pub use attributes::{Attributes, Change, Changes};
pub use collection::{
    Collection, CollectionConfig, CollectionEvent, Comparator, ModelInput, ModelKey, SyncReport,
};
pub use error::{Error, Result, SyncOp};
pub use events::{EventEmitter, ListenerId, WILDCARD};
pub use id::{Cid, Identity};
pub use model::{Endpoint, Model, ModelConfig, ModelEvent, ModelState, ID_FIELD};
pub use scripted::ScriptedTransport;
pub use transport::{Method, Request, Transport, TransportError};
