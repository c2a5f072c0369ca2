//! supportive-tail - follow a user's support messages from the terminal.
//!
//! Initializes the user named by `SUPPORTIVE_USER_IDENTIFIER`, prints every
//! message as it arrives and keeps polling until Ctrl-C.

use serde_json::Value;
use std::env;
use supportive::{Client, Config, MESSAGE};
use supportive_engine::Attributes;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "supportive=debug,supportive_tail=debug,supportive_engine=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let identifier = env::var("SUPPORTIVE_USER_IDENTIFIER")
        .map_err(|_| "SUPPORTIVE_USER_IDENTIFIER environment variable is required")?;

    tracing::info!("Starting supportive-tail for app {}", config.app_id);

    let client = Client::with_http(config);
    client.on(MESSAGE, |_, event| {
        let field = |name: &str| match event.message.get(name) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        tracing::info!(
            kind = ?event.message.kind(),
            created_at = %field("created_at"),
            subject = %field("subject"),
            "{}",
            field("text")
        );
    });

    let mut user = Attributes::new();
    user.insert("identifier".to_string(), Value::String(identifier));
    let report = client.init(user).await?;

    tracing::info!(
        messages = client.messages().len(),
        added = report.added,
        "Listening for messages every {:?}",
        client.config().poll_interval
    );

    tokio::signal::ctrl_c().await?;
    client.stop_listening();
    tracing::info!("Stopped");

    Ok(())
}
