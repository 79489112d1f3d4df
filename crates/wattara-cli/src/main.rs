//! Wattara CLI - a terminal front end for Wattara meter telemetry.
//!
//! Signs in against the Wattara backend, manages devices, shows live and
//! historical readings and runs the power prediction model.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wattara_core::utils::{format_date, format_power_factor, format_quantity, format_timestamp, truncate_string};
use wattara_core::{
    ClientError, Config, Device, DeviceManager, FileStore, KeyringStore, MonitoringService,
    PredictionService, SensorReading, SessionClient, StorageBackend, TimeRange,
};

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "wattara.log";

/// Column width for device names in tables
const NAME_COLUMN_WIDTH: usize = 24;

#[derive(Parser, Debug)]
#[command(name = "wattara", version, about = "Monitor Wattara electrical meters from the terminal")]
struct Cli {
    /// Backend URL (overrides WATTARA_API_URL and the config file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(short, long, env = "WATTARA_USERNAME")]
        username: Option<String>,
    },
    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Manage devices
    Devices {
        #[command(subcommand)]
        action: Option<DeviceAction>,
    },
    /// Poll the latest reading of a device
    Watch {
        /// Device id (defaults to the active device)
        #[arg(short, long)]
        device: Option<String>,
        /// Seconds between polls
        #[arg(short, long)]
        interval: Option<u64>,
        /// Stop after this many readings
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Show historical readings
    History {
        #[arg(short, long)]
        device: Option<String>,
        /// 1h, 6h, 24h or 7d
        #[arg(short, long, default_value = "1h")]
        range: TimeRange,
    },
    /// Run the power prediction model
    Predict,
    /// Latest reading of every device plus the current prediction
    Status,
}

#[derive(Subcommand, Debug)]
enum DeviceAction {
    /// List devices
    List,
    /// Register a new device
    Add {
        name: String,
        #[arg(short, long, default_value = "")]
        location: String,
    },
    /// Rename or move a device
    Update {
        device_id: String,
        name: String,
        #[arg(short, long, default_value = "")]
        location: String,
    },
    /// Delete a device
    Remove { device_id: String },
    /// Make a device the active one
    Use { device_id: String },
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g., RUST_LOG=debug). Logs go to
/// stderr and to a daily file in the cache directory.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(filter)
        .init();

    guard
}

fn build_client(config: &Config, api_url: Option<String>) -> Result<SessionClient> {
    let base_url = api_url.unwrap_or_else(|| config.base_url());
    let mut builder = SessionClient::builder(base_url).redirect(|| {
        eprintln!("Session expired. Run `wattara login` to sign in again.");
    });
    if let Some(timeout) = config.request_timeout() {
        builder = builder.timeout(timeout);
    }
    builder = match config.storage {
        StorageBackend::File => builder.store(FileStore::new(config.cache_dir()?)),
        StorageBackend::Keyring => builder.store(KeyringStore::new()),
    };
    builder.build().context("Failed to create API client")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config ({e:#}), using defaults");
            Config::default()
        }
    };

    let log_dir = config.cache_dir()?.join("logs");
    let _log_guard = init_tracing(&log_dir);
    debug!(storage = ?config.storage, "Config loaded");

    let client = build_client(&config, cli.api_url)?;

    let result = run(cli.command, &client, &mut config).await;
    let expired = result
        .as_ref()
        .err()
        .and_then(|e| e.downcast_ref::<ClientError>())
        .is_some_and(|e| matches!(e, ClientError::SessionExpired));
    if expired {
        // The redirect hook has already told the user what to do
        drop(_log_guard);
        std::process::exit(2);
    }
    result
}

async fn run(command: Command, client: &SessionClient, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { username } => login(client, config, username).await,
        Command::Register { username, email } => register(client, config, &username, &email).await,
        Command::Logout => {
            client.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Whoami => whoami(client).await,
        Command::Devices { action } => devices(client, action.unwrap_or(DeviceAction::List)).await,
        Command::Watch {
            device,
            interval,
            count,
        } => {
            let interval = interval
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.poll_interval());
            watch(client, device, interval, count).await
        }
        Command::History { device, range } => history(client, device, range).await,
        Command::Predict => predict(client).await,
        Command::Status => status(client).await,
    }
}

fn require_login(client: &SessionClient) -> Result<()> {
    if client.is_authenticated() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Not logged in. Run `wattara login` first."))
    }
}

// ============================================================================
// Authentication
// ============================================================================

fn prompt_username(default: Option<&str>) -> Result<String> {
    match default {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    match (input.is_empty(), default) {
        (true, Some(last)) => Ok(last.to_string()),
        _ => Ok(input.to_string()),
    }
}

fn prompt_password(prompt: &str) -> Result<String> {
    let password = rpassword::prompt_password(prompt)?;
    Ok(password)
}

fn remember_username(config: &mut Config, username: &str) {
    config.last_username = Some(username.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

async fn login(client: &SessionClient, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username {
        Some(u) => u,
        None => prompt_username(config.last_username.as_deref())?,
    };
    if username.is_empty() {
        return Err(anyhow::anyhow!("Username required"));
    }
    let password = match std::env::var("WATTARA_PASSWORD") {
        Ok(p) if !p.is_empty() => p,
        _ => prompt_password("Password: ")?,
    };

    println!("Authenticating...");
    let session = client.login(&username, &password).await?;
    remember_username(config, &username);

    info!(username = %session.user.username, "Signed in from CLI");
    println!("Welcome, {}!", session.user.display_name());
    Ok(())
}

async fn register(client: &SessionClient, config: &mut Config, username: &str, email: &str) -> Result<()> {
    let password = prompt_password("Password: ")?;
    let confirmation = prompt_password("Confirm password: ")?;

    match client.register(username, email, &password, &confirmation).await {
        Ok(session) => {
            remember_username(config, username);
            println!("Account created. Welcome, {}!", session.user.display_name());
            Ok(())
        }
        Err(ClientError::Validation { field, message }) => match field {
            Some(field) => Err(anyhow::anyhow!("{}: {}", field, message)),
            None => Err(anyhow::anyhow!("{}", message)),
        },
        Err(e) => Err(e.into()),
    }
}

async fn whoami(client: &SessionClient) -> Result<()> {
    require_login(client)?;
    let user = client.profile().await?;
    println!("{} <{}>", user.display_name(), user.email);
    println!("username: {}  id: {}", user.username, user.id);
    Ok(())
}

// ============================================================================
// Devices
// ============================================================================

fn print_devices(devices: &[Device], active: Option<&Device>) {
    if devices.is_empty() {
        println!("No devices yet. Add one with `wattara devices add <name>`.");
        return;
    }
    for device in devices {
        let marker = if active.is_some_and(|a| a.device_id == device.device_id) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<width$}  {:<20}  {}  {}  added {}",
            marker,
            truncate_string(&device.name, NAME_COLUMN_WIDTH),
            truncate_string(&device.location, 20),
            device.device_id,
            if device.is_active { "on " } else { "off" },
            format_date(&device.created_at),
            width = NAME_COLUMN_WIDTH,
        );
    }
}

fn describe_failure(e: ClientError, fallback: &str) -> anyhow::Error {
    match e {
        ClientError::SessionExpired => e.into(),
        other => match other.server_message() {
            Some(msg) => anyhow::anyhow!("{}: {}", fallback, msg),
            None => anyhow::Error::new(other).context(fallback.to_string()),
        },
    }
}

async fn devices(client: &SessionClient, action: DeviceAction) -> Result<()> {
    require_login(client)?;
    let mut manager = DeviceManager::new(client.clone());

    match action {
        DeviceAction::List => {
            manager
                .fetch_devices()
                .await
                .map_err(|e| describe_failure(e, "Failed to fetch devices"))?;
        }
        DeviceAction::Add { name, location } => {
            manager.fetch_devices().await?;
            let device = manager
                .create_device(&name, &location)
                .await
                .map_err(|e| describe_failure(e, "Failed to create device"))?;
            println!("Created {} ({})", device.name, device.device_id);
        }
        DeviceAction::Update {
            device_id,
            name,
            location,
        } => {
            manager
                .update_device(&device_id, &name, &location)
                .await
                .map_err(|e| describe_failure(e, "Failed to update device"))?;
            println!("Updated {}", device_id);
        }
        DeviceAction::Remove { device_id } => {
            manager
                .delete_device(&device_id)
                .await
                .map_err(|e| describe_failure(e, "Failed to delete device"))?;
            println!("Deleted {}", device_id);
        }
        DeviceAction::Use { device_id } => {
            manager.fetch_devices().await?;
            let device = manager
                .find(&device_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("No device with id {}", device_id))?;
            manager.set_active(Some(device))?;
            println!("Active device set to {}", device_id);
        }
    }

    print_devices(manager.devices(), manager.active_device());
    Ok(())
}

/// Resolve an explicit device id, or fall back to the active device.
async fn resolve_device(client: &SessionClient, device: Option<String>) -> Result<String> {
    if let Some(id) = device {
        return Ok(id);
    }
    let mut manager = DeviceManager::new(client.clone());
    if manager.active_device().is_none() {
        manager.fetch_devices().await?;
    }
    manager
        .active_device()
        .map(|d| d.device_id.clone())
        .ok_or_else(|| anyhow::anyhow!("No device selected. Add one with `wattara devices add <name>`."))
}

// ============================================================================
// Telemetry
// ============================================================================

fn reading_line(reading: &SensorReading) -> String {
    let when = reading
        .recorded_at()
        .map(|t| format_timestamp(&t))
        .unwrap_or_else(|| reading.timestamp.clone());
    format!(
        "{}  {:>9}  {:>8}  {:>9}  pf {}  {:>8}  {:>10}",
        when,
        format_quantity(reading.voltage, "V", 1),
        format_quantity(reading.current, "A", 2),
        format_quantity(reading.power, "W", 1),
        format_power_factor(reading.pf),
        format_quantity(reading.frequency, "Hz", 1),
        format_quantity(reading.energy, "kWh", 2),
    )
}

async fn watch(
    client: &SessionClient,
    device: Option<String>,
    interval: Duration,
    count: Option<usize>,
) -> Result<()> {
    require_login(client)?;
    let device_id = resolve_device(client, device).await?;
    println!("Watching {} every {}s (Ctrl-C to stop)", device_id, interval.as_secs());

    let monitor = MonitoringService::new(client.clone());
    let mut readings = monitor.watch_latest(&device_id, interval);
    let mut received = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = readings.recv() => match next {
                Some(Ok(reading)) => {
                    println!("{}", reading_line(&reading));
                    received += 1;
                    if count.is_some_and(|n| received >= n) {
                        break;
                    }
                }
                Some(Err(ClientError::SessionExpired)) => return Err(ClientError::SessionExpired.into()),
                Some(Err(e)) => eprintln!("Error fetching latest data: {}", e),
                None => break,
            },
        }
    }
    Ok(())
}

async fn history(client: &SessionClient, device: Option<String>, range: TimeRange) -> Result<()> {
    require_login(client)?;
    let device_id = resolve_device(client, device).await?;
    let readings = MonitoringService::new(client.clone())
        .history(&device_id, range)
        .await
        .map_err(|e| describe_failure(e, "Failed to fetch historical data"))?;

    println!("{} - last {} ({} readings)", device_id, range.label(), readings.len());
    for reading in &readings {
        println!("{}", reading_line(reading));
    }
    Ok(())
}

async fn predict(client: &SessionClient) -> Result<()> {
    require_login(client)?;
    let prediction = PredictionService::new(client.clone()).run_prediction().await?;
    println!("Predicted power: {}", format_quantity(prediction.predicted_power, "W", 1));
    Ok(())
}

async fn status(client: &SessionClient) -> Result<()> {
    require_login(client)?;
    let mut manager = DeviceManager::new(client.clone());
    let devices = manager.fetch_devices().await?.to_vec();

    let monitor = MonitoringService::new(client.clone());
    let latest = futures::future::join_all(devices.iter().map(|d| monitor.latest(&d.device_id))).await;

    for (device, reading) in devices.iter().zip(latest) {
        match reading {
            Ok(reading) => println!(
                "{:<width$}  {}",
                truncate_string(&device.label(), NAME_COLUMN_WIDTH),
                reading_line(&reading),
                width = NAME_COLUMN_WIDTH,
            ),
            Err(ClientError::SessionExpired) => return Err(ClientError::SessionExpired.into()),
            Err(e) => println!(
                "{:<width$}  unavailable ({})",
                truncate_string(&device.label(), NAME_COLUMN_WIDTH),
                e,
                width = NAME_COLUMN_WIDTH,
            ),
        }
    }

    match PredictionService::new(client.clone()).run_prediction().await {
        Ok(p) => println!("Predicted power: {}", format_quantity(p.predicted_power, "W", 1)),
        Err(e) => println!("Prediction unavailable ({})", e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_history_range() {
        let cli = Cli::try_parse_from(["wattara", "history", "--range", "24h", "-d", "d-1"]).unwrap();
        match cli.command {
            Command::History { device, range } => {
                assert_eq!(device.as_deref(), Some("d-1"));
                assert_eq!(range, TimeRange::OneDay);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_range() {
        assert!(Cli::try_parse_from(["wattara", "history", "--range", "2h"]).is_err());
    }

    #[test]
    fn test_devices_defaults_to_list() {
        let cli = Cli::try_parse_from(["wattara", "devices"]).unwrap();
        assert!(matches!(cli.command, Command::Devices { action: None }));
    }

    #[test]
    fn test_reading_line_formats_units() {
        let reading = SensorReading {
            voltage: 220.0,
            current: 1.5,
            power: 330.0,
            pf: 0.98,
            frequency: 50.0,
            energy: 12.25,
            timestamp: "2025-03-01T10:00:00Z".to_string(),
        };
        let line = reading_line(&reading);
        assert!(line.starts_with("2025-03-01 10:00:00"));
        assert!(line.contains("330.0 W"));
        assert!(line.contains("pf 0.98"));
        assert!(line.contains("12.25 kWh"));
    }
}
