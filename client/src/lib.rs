//! # Supportive
//!
//! Messaging SDK for Supportive.io apps, built on `supportive-engine`.
//!
//! A [`Client`] owns one user and that user's messages. [`Client::init`]
//! saves the user, loads their messages and polls for new ones every
//! [`Config::poll_interval`]. Every message that shows up fires
//! `message:<kind>` followed by `message` on the client.
//!
//! ```no_run
//! use serde_json::json;
//! use supportive::{Client, Config};
//!
//! # async fn run() -> supportive::Result<()> {
//! let client = Client::with_http(Config::new("my-app").with_api_token("secret"));
//! client.on("message:incoming", |_, event| {
//!     println!("support says: {:?}", event.message.get("text"));
//! });
//!
//! let user = json!({"identifier": "alice@example.com"});
//! client.init(user.as_object().cloned().unwrap_or_default()).await?;
//! client.send("Billing", Some("Where is my invoice?"), None).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod messages;

pub use client::{Client, MessageEvent, MESSAGE};
pub use config::{Config, ConfigError, Resource};
pub use error::{ClientError, Result};
pub use http::HttpTransport;
pub use messages::{by_created_at, messages_collection, Message, MessageKind, User};
