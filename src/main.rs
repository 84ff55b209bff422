use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::io::{self, Write};
use tabled::{Table, Tabled};

use iqua::config::{self, Config};
use iqua::{
    ClientConfig, Credentials, IquaClient, RegenerationAction, TokenState, ValveAction,
};

#[derive(Parser)]
#[command(name = "iqua")]
#[command(about = "A CLI for controlling iQua water softeners")]
#[command(version)]
struct Cli {
    /// Email address of the iQua account
    #[arg(long, global = true, env = "IQUA_USERNAME")]
    username: Option<String>,

    /// Password of the iQua account
    #[arg(long, global = true, env = "IQUA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Serial number of the softener
    #[arg(long, global = true, env = "IQUA_SERIAL")]
    serial: Option<String>,

    /// Base URL of the iQua API
    #[arg(long, global = true, env = "IQUA_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, resolve the device and store credentials for future use
    Login,
    /// Remove stored configuration and tokens
    Logout,
    #[command(flatten)]
    Device(DeviceCommands),
}

// Commands that talk to the API with stored or supplied credentials
#[derive(Subcommand)]
enum DeviceCommands {
    /// Show the current state of the softener
    Status,
    /// List all devices connected to the account
    Devices,
    /// Open or close the water shutoff valve
    Valve {
        #[command(subcommand)]
        action: ValveCommand,
    },
    /// Schedule, cancel or start a regeneration cycle
    Regenerate {
        #[command(subcommand)]
        action: RegenerateCommand,
    },
}

#[derive(Subcommand)]
enum ValveCommand {
    /// Open the valve (allow water flow)
    Open,
    /// Close the valve (stop water flow)
    Close,
}

#[derive(Subcommand)]
enum RegenerateCommand {
    /// Schedule a regeneration cycle
    Schedule,
    /// Cancel a scheduled regeneration cycle
    Cancel,
    /// Start a regeneration cycle immediately
    Now,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Serial")]
    serial: String,
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Name")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Login => login(&cli).await,
        Commands::Logout => {
            config::clear_config()?;
            println!("Logged out successfully.");
            Ok(())
        }
        Commands::Device(command) => run(&cli, command).await,
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

async fn login(cli: &Cli) -> Result<()> {
    let username = match &cli.username {
        Some(u) => u.clone(),
        None => prompt("Email")?,
    };
    let password = match &cli.password {
        Some(p) => p.clone(),
        None => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };
    let serial = match &cli.serial {
        Some(s) => s.clone(),
        None => prompt("Device serial number")?,
    };

    let stored = Config {
        username: username.clone(),
        device_serial_number: serial,
        api_base_url: cli.api_url.clone(),
    };
    let client = IquaClient::with_config(
        Credentials::new(username, password),
        stored.device_serial_number.clone(),
        stored.client_config(),
    );

    info!("Logging in to iQua...");
    let device_id = client.get_device_id().await?;

    config::save_config(&stored)?;
    client.save_tokens(&config::get_tokens_path()?).await?;

    println!(
        "Logged in as {}. Device {} has id {}.",
        stored.username, stored.device_serial_number, device_id
    );
    Ok(())
}

async fn run(cli: &Cli, command: &DeviceCommands) -> Result<()> {
    let stored = config::load_config()?;

    let username = cli
        .username
        .clone()
        .or_else(|| stored.as_ref().map(|c| c.username.clone()))
        .context("Not logged in. Run 'iqua login' or pass --username.")?;
    let serial = cli
        .serial
        .clone()
        .or_else(|| stored.as_ref().map(|c| c.device_serial_number.clone()));
    let client_config = match (&cli.api_url, &stored) {
        (Some(url), _) => ClientConfig::default().with_base_url(url.clone()),
        (None, Some(c)) => c.client_config(),
        (None, None) => ClientConfig::default(),
    };

    // Without a password only the saved tokens can authenticate
    let password = cli.password.clone().unwrap_or_default();
    let needs_device = !matches!(command, DeviceCommands::Devices);
    let serial = match serial {
        Some(s) => s,
        None if needs_device => {
            anyhow::bail!("Not logged in. Run 'iqua login' or pass --serial.")
        }
        None => String::new(),
    };

    let client =
        IquaClient::with_config(Credentials::new(username, password), serial, client_config);
    let tokens_path = config::get_tokens_path()?;
    let loaded = client.load_tokens(&tokens_path).await?;
    if loaded {
        debug!("Using saved tokens from {}", tokens_path.display());
    }

    let result = dispatch(&client, command).await;

    // Keep any tokens renewed during the call, even if the call failed, but
    // never write a token file when nothing was ever obtained
    if loaded || client.tokens().await != TokenState::default() {
        client.save_tokens(&tokens_path).await?;
    }
    result
}

async fn dispatch(client: &IquaClient, command: &DeviceCommands) -> Result<()> {
    match command {
        DeviceCommands::Status => {
            let data = client.get_data().await?;
            let unit = data.volume_unit.label();
            let rows = vec![
                row("Model", &data.model),
                row("State", &data.state),
                row("Device time", &data.device_date_time.to_rfc3339()),
                row("Current flow", &format!("{:.2} {}/min", data.current_water_flow, unit)),
                row("Used today", &format!("{} {}", data.today_use, unit)),
                row("Average daily use", &format!("{} {}", data.average_daily_use, unit)),
                row(
                    "Treated water available",
                    &format!("{} {}", data.total_water_available, unit),
                ),
                row("Days since regeneration", &data.days_since_last_regeneration),
                row("Salt level", &data.salt_level),
                row("Salt level %", &data.salt_level_percent),
                row("Out of salt in (days)", &data.out_of_salt_estimated_days),
                row("Hardness (grains)", &data.hardness_grains),
                row(
                    "Shutoff valve",
                    &if data.water_shutoff_valve_state == 1 {
                        "Closed"
                    } else {
                        "Open"
                    },
                ),
            ];
            println!("{}", Table::new(rows));
        }
        DeviceCommands::Devices => {
            let devices = client.get_devices().await?;
            if devices.is_empty() {
                println!("No devices found for this account.");
                return Ok(());
            }

            let rows: Vec<DeviceRow> = devices
                .iter()
                .map(|d| DeviceRow {
                    serial: d.serial_number().unwrap_or("Unknown").to_string(),
                    id: d.id().unwrap_or_default(),
                    model: d.model_description().unwrap_or("Unknown").to_string(),
                    name: d.name.clone().unwrap_or_else(|| "Unnamed".to_string()),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
        DeviceCommands::Valve { action } => {
            let (action, verb) = match action {
                ValveCommand::Open => (ValveAction::Open, "opened"),
                ValveCommand::Close => (ValveAction::Close, "closed"),
            };
            client.set_water_shutoff_valve(action).await?;
            println!("Water shutoff valve {}.", verb);
        }
        DeviceCommands::Regenerate { action } => {
            let (action, message) = match action {
                RegenerateCommand::Schedule => {
                    (RegenerationAction::Schedule, "Regeneration scheduled.")
                }
                RegenerateCommand::Cancel => {
                    (RegenerationAction::Cancel, "Scheduled regeneration cancelled.")
                }
                RegenerateCommand::Now => (RegenerationAction::Now, "Regeneration started."),
            };
            client.regeneration(action).await?;
            println!("{}", message);
        }
    }

    Ok(())
}

fn row(field: &str, value: &dyn std::fmt::Display) -> FieldRow {
    FieldRow {
        field: field.to_string(),
        value: value.to_string(),
    }
}
