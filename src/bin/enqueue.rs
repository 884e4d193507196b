//! enqueue - Publish a processing request for one image.
//!
//! Development utility: puts a request for an already-uploaded image onto
//! the request topic so a running helmwatchd picks it up.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{Client, Connection, Event, MqttOptions, QoS};
use serde_json::json;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish a helmet-analysis request")]
struct Args {
    /// Object key of the image to analyze.
    image_filename: String,

    /// Request identifier echoed back in the result.
    #[arg(long)]
    image_id: Option<String>,

    /// MQTT broker address.
    #[arg(long, env = "HELMWATCH_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    broker_addr: String,

    /// Topic the worker consumes requests from.
    #[arg(long, env = "HELMWATCH_REQUEST_TOPIC", default_value = "helmwatch/requests")]
    request_topic: String,

    /// MQTT username for authentication.
    #[arg(long, env = "HELMWATCH_MQTT_USERNAME")]
    username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "HELMWATCH_MQTT_PASSWORD")]
    password: Option<String>,
}

struct MqttRuntime {
    client: Client,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttRuntime {
    fn new(client: Client, mut connection: Connection) -> Self {
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
        });
        Self {
            client,
            handle: Some(handle),
        }
    }

    fn disconnect(mut self) -> Result<()> {
        self.client.disconnect()?;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (host, port) = args
        .broker_addr
        .rsplit_once(':')
        .context("broker address must be host:port")?;
    let port: u16 = port.parse().context("invalid broker port")?;

    let mut options = MqttOptions::new("helmwatch-enqueue", host, port);
    options.set_keep_alive(Duration::from_secs(10));
    if let Some(user) = &args.username {
        options.set_credentials(user, args.password.as_deref().unwrap_or_default());
    }
    let (client, connection) = Client::new(options, 10);
    let runtime = MqttRuntime::new(client, connection);

    let request = json!({
        "image_id": args.image_id,
        "image_filename": args.image_filename,
        "timestamp": Utc::now().to_rfc3339(),
    });
    runtime.client.publish(
        &args.request_topic,
        QoS::AtLeastOnce,
        false,
        serde_json::to_vec(&request)?,
    )?;
    log::info!(
        "published request for {} to {}",
        args.image_filename,
        args.request_topic
    );

    runtime.disconnect()
}
