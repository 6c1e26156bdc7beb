//! videowall CLI and daemon entry point.

mod args;
mod daemon;
mod device;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use uuid::Uuid;
use videowall_core::protocol::{Command, CropSpec, Request};

use crate::args::{Cli, Commands, CredentialCommands, PresetCommands};
use crate::daemon::client::{DaemonClient, DEFAULT_REQUEST_TIMEOUT, WAIT_REQUEST_TIMEOUT};
use crate::daemon::{DaemonServer, Wall, WallConfig};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Daemon = cli.command {
        run_daemon(&cli);
        return;
    }

    if let Err(e) = run_client_command(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Convert CLI args to a protocol Command.
///
/// Returns None for commands that never reach the daemon.
fn cli_to_command(cli: &Cli) -> Option<Command> {
    let wait = cli.wait;
    match &cli.command {
        Commands::Status => Some(Command::Status),
        Commands::Switch(args) => Some(Command::Switch {
            decoders: args.decoders.clone(),
            encoder: args.encoder.clone(),
            wait,
        }),
        Commands::Clear(args) => Some(match &args.decoder {
            Some(decoder) if !args.all => Command::Clear {
                decoder: decoder.clone(),
                wait,
            },
            _ => Command::ClearAll { wait },
        }),
        Commands::Crop(args) => {
            let crop = match (args.crop.region, args.crop.quick) {
                (Some((x, y, width, height)), _) => CropSpec::Region {
                    x,
                    y,
                    width,
                    height,
                },
                (None, Some(preset)) => CropSpec::Quick { preset },
                // clap requires one of the two
                (None, None) => return None,
            };
            Some(Command::SetCrop {
                decoders: args.decoders.clone(),
                crop,
                wait,
            })
        }
        Commands::ClearCrop(args) => Some(Command::ClearCrop {
            decoder: args.decoder.clone(),
            wait,
        }),
        Commands::Matrix(args) => Some(Command::Matrix {
            decoders: args.decoders.clone(),
            rows: args.shape.0,
            cols: args.shape.1,
            encoder: args.encoder.clone(),
            auto_crop: !args.no_crop,
            wait,
        }),
        Commands::Preset(preset) => Some(match preset {
            PresetCommands::Save { preset, name } => Command::SavePreset {
                preset: preset.clone(),
                name: name.clone(),
            },
            PresetCommands::Load { preset } => Command::LoadPreset {
                preset: preset.clone(),
                wait,
            },
            PresetCommands::List => Command::ListPresets,
            PresetCommands::Delete { preset } => Command::DeletePreset {
                preset: preset.clone(),
            },
        }),
        Commands::Log(args) if args.clear => Some(Command::ClearActivity),
        Commands::Log(args) => Some(Command::ActivityLog {
            limit: Some(args.limit),
        }),
        Commands::Credentials(credentials) => Some(match credentials {
            CredentialCommands::Set { username, password } => Command::SetCredentials {
                username: username.clone(),
                password: password.clone(),
            },
            CredentialCommands::TryDefaults { decoder, adopt } => {
                Command::TryDefaultCredentials {
                    decoder: decoder.clone(),
                    adopt: *adopt,
                }
            }
        }),
        Commands::Probe(args) => Some(Command::Probe {
            device: args.device.clone(),
        }),
        Commands::Refresh => Some(Command::Refresh),
        Commands::Examples | Commands::Daemon => None,
        Commands::Stop => Some(Command::Shutdown),
    }
}

/// Run a client command against the daemon.
fn run_client_command(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli_to_command(&cli) else {
        if let Commands::Examples = cli.command {
            println!("{}", crate::args::EXAMPLES_TEXT);
        }
        return Ok(());
    };

    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        // Stopping a daemon that is not running should not start one.
        let client = if matches!(command, Command::Shutdown) {
            DaemonClient::connect_existing().await?
        } else {
            Some(DaemonClient::connect(cli.config.as_deref()).await?)
        };
        let Some(mut client) = client else {
            println!("Daemon is not running");
            return Ok(());
        };

        let timeout = if cli.wait || matches!(command, Command::TryDefaultCredentials { .. } | Command::Refresh) {
            WAIT_REQUEST_TIMEOUT
        } else {
            DEFAULT_REQUEST_TIMEOUT
        };
        let request = Request {
            id: Uuid::new_v4().to_string(),
            command,
        };

        let response = client.request_with_timeout(request, timeout).await?;

        if response.success {
            if let Some(data) = response.data {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
        } else if let Some(err) = response.error {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }

        Ok(())
    })
}

/// Run the daemon until it is told to stop, SIGINT or SIGTERM.
///
/// The server's Drop removes the socket and PID files.
fn run_daemon(cli: &Cli) {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let wall = match WallConfig::load(cli.config.as_deref()).and_then(|config| {
            info!(
                "Wall is {}x{} with {} encoder(s)",
                config.grid.rows,
                config.grid.cols,
                config.encoders.len()
            );
            Wall::from_config(&config)
        }) {
            Ok(wall) => Arc::new(wall),
            Err(e) => {
                error!("Failed to load configuration: {:#}", e);
                std::process::exit(1);
            }
        };

        let server = match DaemonServer::bind(wall).await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to start daemon: {:#}", e);
                std::process::exit(1);
            }
        };

        // Signals go through the same graceful path as the shutdown command.
        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                _ = sigterm() => info!("Received SIGTERM, shutting down"),
            }
            shutdown.notify_one();
        });

        if let Err(e) = server.run().await {
            error!("Daemon error: {}", e);
            std::process::exit(1);
        }
    });
}

/// Resolves on SIGTERM. Never resolves if the handler cannot be installed.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, daemon will only respond to SIGINT",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
