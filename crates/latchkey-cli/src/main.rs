//! Latchkey CLI - Drive the login lockout tracker and biometric gate
//!
//! Each subcommand performs exactly the call a login or settings screen
//! would make, against the configured durable store.

mod app;
mod terminal;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use latchkey_core::{format_remaining, format_remaining_millis, LatchkeyConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

use crate::app::{load_or_create_config, App};

#[derive(Parser)]
#[command(name = "latchkey")]
#[command(about = "Client-side login lockout and biometric credential gate", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "LATCHKEY_CONFIG")]
    config: Option<PathBuf>,

    /// Behave as a device without biometric hardware
    #[arg(long)]
    no_biometrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Lockout(LockoutCommands),

    /// Render a millisecond duration the way the countdown shows it
    Format {
        /// Remaining time in milliseconds
        millis: u64,
    },

    /// Biometric login commands
    #[command(subcommand)]
    Biometric(BiometricCommands),
}

#[derive(Subcommand)]
enum LockoutCommands {
    /// Show lockout status for an identity
    Status {
        /// Login identity (email)
        identity: String,
    },

    /// Record a failed login attempt
    Fail {
        /// Login identity (email)
        identity: String,
    },

    /// Unlock an identity (account recovery)
    Reset {
        /// Login identity (email)
        identity: String,
    },

    /// Clear failed attempts after a verified login
    Succeed {
        /// Login identity (email)
        identity: String,
    },

    /// Show a live countdown until the identity unlocks
    Watch {
        /// Login identity (email)
        identity: String,
    },
}

#[derive(Subcommand)]
enum BiometricCommands {
    /// Show availability and opt-in state
    Status,

    /// Opt in to biometric login (reads the password from stdin)
    Enable {
        /// Login identity (email)
        identity: String,
    },

    /// Opt out and remove stored credentials
    Disable,

    /// Log in with the stored credentials
    Login,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "latchkey=info,latchkey_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Format { millis } => println!("{}", format_remaining_millis(millis)),
        Commands::Lockout(cmd) => {
            let app = open_app(cli.config, !cli.no_biometrics).await?;
            lockout(&app, cmd).await;
        }
        Commands::Biometric(cmd) => {
            let app = open_app(cli.config, !cli.no_biometrics).await?;
            biometric(&app, cmd).await?;
        }
    }

    Ok(())
}

/// Load the configuration and wire up the core components
async fn open_app(config: Option<PathBuf>, biometrics_enabled: bool) -> Result<App> {
    let config_path = config.unwrap_or_else(LatchkeyConfig::default_config_path);
    let config = load_or_create_config(&config_path)?;
    App::build(&config, biometrics_enabled).await
}

async fn lockout(app: &App, cmd: LockoutCommands) {
    match cmd {
        LockoutCommands::Status { identity } => {
            let status = app.tracker.check_status(&identity).await;
            if status.is_locked {
                println!(
                    "{} is locked for {}",
                    identity,
                    format_remaining(status.time_remaining)
                );
            } else {
                println!(
                    "{} is unlocked ({} attempts remaining)",
                    identity, status.attempts_remaining
                );
            }
        }
        LockoutCommands::Fail { identity } => {
            let outcome = app.tracker.record_failed_attempt(&identity).await;
            match outcome.lockout_end_time {
                Some(until) if outcome.is_locked => {
                    println!("{} is now locked until {}", identity, until.to_rfc3339());
                }
                _ => println!(
                    "Failed attempt recorded ({} attempts remaining)",
                    outcome.attempts_remaining
                ),
            }
        }
        LockoutCommands::Reset { identity } => {
            app.tracker.reset(&identity).await;
            println!("{} unlocked", identity);
        }
        LockoutCommands::Succeed { identity } => {
            app.tracker.reset_after_successful_login(&identity).await;
            println!("Failed attempts cleared for {}", identity);
        }
        LockoutCommands::Watch { identity } => watch(app, &identity).await,
    }
}

/// Poll the tracker once per second until the identity unlocks
async fn watch(app: &App, identity: &str) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;
        let status = app.tracker.check_status(identity).await;
        if !status.is_locked {
            println!(
                "{} is unlocked ({} attempts remaining)",
                identity, status.attempts_remaining
            );
            return;
        }
        println!("Try again in {}", format_remaining(status.time_remaining));
    }
}

async fn biometric(app: &App, cmd: BiometricCommands) -> Result<()> {
    match cmd {
        BiometricCommands::Status => {
            println!("Available: {}", app.gate.is_available().await);
            println!("Enabled:   {}", app.gate.is_enabled().await);
        }
        BiometricCommands::Enable { identity } => {
            let secret = read_secret(&identity)?;
            if !app.gate.enable(&identity, &secret).await {
                bail!("Biometric login could not be enabled - check that biometrics are available on this device");
            }
            println!("Biometric login enabled for {}", identity);
        }
        BiometricCommands::Disable => {
            if !app.gate.disable().await {
                bail!("Biometric login could not be disabled");
            }
            println!("Biometric login disabled");
        }
        BiometricCommands::Login => {
            let Some(bundle) = app.gate.authenticate().await else {
                bail!("Biometric login unavailable or not verified");
            };

            // The gate does not know about lockouts; check before using the credentials
            let status = app.tracker.check_status(&bundle.identity).await;
            if status.is_locked {
                bail!(
                    "{} is locked, try again in {}",
                    bundle.identity,
                    format_remaining(status.time_remaining)
                );
            }
            println!("Credentials released for {}", bundle.identity);
        }
    }

    Ok(())
}

/// Read the password confirming the user's identity
fn read_secret(identity: &str) -> Result<Zeroizing<String>> {
    let mut stderr = std::io::stderr();
    write!(stderr, "Password for {}: ", identity)?;
    stderr.flush()?;

    let mut line = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;

    let secret = Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string());
    if secret.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(secret)
}
