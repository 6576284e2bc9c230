//! mqtt-event-client entry point
//!
//! `consume` registers the user-registration handler and runs until
//! interrupted. `produce` publishes a single registration event.

use clap::{Parser, Subcommand};
use mqtt_event_client::client::MessagingClient;
use mqtt_event_client::config::ClientConfig;
use mqtt_event_client::error::MessagingError;
use mqtt_event_client::handlers::UserRegistrationHandler;
use mqtt_event_client::observability::init_default_logging;
use mqtt_event_client::protocol::{QoS, UserRegistrationEvent, USER_REGISTRATION_TOPIC};
use mqtt_event_client::storage::InMemoryStorage;
use mqtt_event_client::transport::MqttTransport;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// MQTT event client
#[derive(Parser)]
#[command(name = "mqtt-event-client")]
#[command(about = "Publish and consume user registration events over MQTT")]
#[command(version)]
struct Cli {
    /// Optional TOML tuning file; broker credentials always come from the environment
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to user registrations and store them until interrupted
    Consume {
        /// Subscription QoS (0, 1 or 2)
        #[arg(long, default_value_t = 0)]
        qos: u8,
    },
    /// Publish one user registration event
    Produce {
        #[arg(long, default_value = "Andrew Roberts")]
        name: String,
        #[arg(long, default_value = "blah@gmail.com")]
        email: String,
        #[arg(long, default_value = "000-000-0000")]
        phone: String,
        /// Publish QoS (0, 1 or 2)
        #[arg(long, default_value_t = 0)]
        qos: u8,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {e}");
        }
    }

    init_default_logging();

    info!("Starting mqtt-event-client v{}", env!("CARGO_PKG_VERSION"));

    let config = match ClientConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Consume { qos } => run_consumer(&config, qos).await,
        Commands::Produce {
            name,
            email,
            phone,
            qos,
        } => run_producer(&config, name, email, phone, qos).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_consumer(config: &ClientConfig, qos: u8) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(qos)?;
    let client = MessagingClient::from_config(config);

    let storage = Arc::new(InMemoryStorage::new());
    client
        .subscribe::<UserRegistrationEvent, _>(
            USER_REGISTRATION_TOPIC,
            qos,
            UserRegistrationHandler::new(Arc::clone(&storage)),
        )
        .await?;
    client.connect().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(topic = USER_REGISTRATION_TOPIC, qos = %qos, "Consumer running");

    let fatal = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            None
        }
        lost = wait_for_connection_lost(&client) => {
            error!("MQTT connection permanently lost: {}", lost);
            Some(lost)
        }
    };

    if let Some(health) = client.transport().link_health() {
        info!(
            state = ?health.state,
            reconnects = health.reconnect_count,
            uptime_secs = health.uptime.map(|uptime| uptime.as_secs()),
            "Broker link before shutdown"
        );
    }

    if let Err(e) = client.shutdown().await {
        warn!("Error during shutdown: {}", e);
    }

    let stats = client.stats();
    info!(
        received = stats.received,
        handled = stats.handled,
        failures = stats.handler_failures,
        users = storage.user_count().await,
        "Consumer stopped"
    );

    match fatal {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn run_producer(
    config: &ClientConfig,
    name: String,
    email: String,
    phone: String,
    qos: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(qos)?;
    let event = UserRegistrationEvent::new(name, email, phone)?;

    let client = MessagingClient::from_config(config);
    client.connect().await?;

    let published = client.publish(USER_REGISTRATION_TOPIC, &event, qos).await;
    if let Err(e) = client.shutdown().await {
        warn!("Error during shutdown: {}", e);
    }
    published?;

    info!(topic = USER_REGISTRATION_TOPIC, email = %event.email(), "Published user registration");
    Ok(())
}

/// Resolve when the transport gives up reconnecting
async fn wait_for_connection_lost(client: &MessagingClient<MqttTransport>) -> MessagingError {
    match client.take_connection_lost() {
        Some(receiver) => match receiver.await {
            Ok(e) => e,
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}
