//! Topic Tap - subscribe to broker topics and print what arrives.
//!
//! A small diagnostic tool for watching live traffic through the session
//! layer: connects, subscribes to the given topics, pretty-prints every
//! message until Ctrl+C, then disconnects cleanly.

use clap::Parser;
use mqtt_session::observability::{init_logging, LogFormat};
use mqtt_session::{
    InboundPayload, MqttSession, QosLevel, SessionConfig, SessionEvent,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{warn, Level};

/// Watch MQTT topics through a managed session
#[derive(Parser)]
#[command(name = "topic-tap")]
#[command(about = "Subscribe to MQTT topics and print incoming messages")]
#[command(version)]
struct Args {
    /// Topics to subscribe to (repeatable)
    #[arg(short, long = "topic", required = true)]
    topics: Vec<String>,

    /// Broker URL (mqtt:// or mqtts://)
    #[arg(long, default_value = "mqtt://localhost:1883")]
    broker_url: String,

    /// QoS level for the subscriptions (0, 1 or 2)
    #[arg(short, long, default_value_t = 0)]
    qos: u8,

    /// Client id prefix
    #[arg(long, default_value = "topic-tap")]
    client_id_prefix: String,

    /// Environment variable holding the broker username
    #[arg(long)]
    username_env: Option<String>,

    /// Environment variable holding the broker password
    #[arg(long)]
    password_env: Option<String>,

    /// Reconnect attempts tolerated before giving up
    #[arg(long, default_value_t = 5)]
    max_reconnect_attempts: u32,
}

fn render(topic: &str, payload: &InboundPayload) -> String {
    match payload {
        InboundPayload::Json(value) => {
            let pretty =
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            format!("[{topic}]\n{pretty}")
        }
        InboundPayload::Text(text) => format!("[{topic}] {text}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(Level::INFO, LogFormat::Compact);

    let args = Args::parse();
    let qos = QosLevel::from_u8(args.qos).unwrap_or_default();

    let mut config = SessionConfig::new(args.broker_url.clone());
    config.client_id_prefix = args.client_id_prefix.clone();
    config.username_env = args.username_env.clone();
    config.password_env = args.password_env.clone();
    config.max_reconnect_attempts = args.max_reconnect_attempts;

    let session = MqttSession::new(config)?;
    let mut events = session.events();

    println!("Connecting to {} ...", args.broker_url);
    session.connect().await?;
    println!("Connected. Watching {} topic(s); Ctrl+C to stop.", args.topics.len());

    for topic in &args.topics {
        session
            .subscribe(
                topic,
                qos,
                Arc::new(|topic, payload| {
                    println!("{}", render(topic, payload));
                    Ok(())
                }),
            )
            .await?;
        println!("Subscribed to: {topic}");
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::Reconnecting(attempt)) => {
                        warn!(attempt, "connection lost, reconnecting");
                    }
                    Ok(SessionEvent::GiveUp) => {
                        eprintln!("Reconnect ceiling reached, session terminated.");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "event stream ended");
                        break;
                    }
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}
