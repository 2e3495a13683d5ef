use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Result};
use lighthouse_power::*;
use tokio::process::Command;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Parser)]
#[command(author, version, about = "Lighthouse (base station) power control over Bluetooth LE", long_about = None)]
struct Cli {
    /// Log everything down to trace level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory for log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Lighthouse registry file
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Seconds to scan for lighthouses before giving up
    #[arg(long, global = true, default_value_t = 30)]
    discovery_timeout: u64,

    /// Seconds to wait for each lighthouse's services after connecting
    #[arg(long, global = true, default_value_t = 10)]
    resolution_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
enum PowerArg {
    /// Wake the lighthouses up
    On,
    /// Put the lighthouses into standby
    Off,
}

impl From<PowerArg> for PowerState {
    fn from(arg: PowerArg) -> Self {
        match arg {
            PowerArg::On => PowerState::On,
            PowerArg::Off => PowerState::Off,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manually control the power state of the lighthouses
    Power {
        /// Power state to set
        #[arg(value_enum)]
        state: PowerArg,
        /// Lighthouse addresses; the registered ones when omitted
        addresses: Vec<LighthouseAddress>,
    },
    /// Register lighthouses to be switched automatically
    Register {
        /// Lighthouse addresses to add
        #[arg(required = true)]
        addresses: Vec<LighthouseAddress>,
    },
    /// Power the registered lighthouses on, run a command, then power them off
    Exec {
        /// Command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// Process exit codes
mod exit {
    pub const OK: u8 = 0;

    pub const EXEC_NO_REGISTRY: u8 = 2;
    pub const EXEC_BAD_REGISTRY: u8 = 3;
    pub const EXEC_NO_LIGHTHOUSES: u8 = 4;
    pub const EXEC_POWER_ON_FAILED: u8 = 5;
    pub const EXEC_POWER_OFF_FAILED: u8 = 6;
    pub const EXEC_SPAWN_FAILED: u8 = 7;

    pub const REGISTER_CREATE_DIR_FAILED: u8 = 10;
    pub const REGISTER_WRITE_FAILED: u8 = 11;

    pub const POWER_REGISTRY_UNREADABLE: u8 = 80;
    pub const POWER_NO_REGISTRY: u8 = 81;
    pub const POWER_CORRUPT_REGISTRY: u8 = 82;
    pub const POWER_BAD_REGISTRY: u8 = 83;
    pub const POWER_NO_LIGHTHOUSES: u8 = 84;
    pub const POWER_UNEXPECTED: u8 = 90;
    pub const POWER_FAILED: u8 = 91;
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let log_dir = cli.log_dir.clone().or_else(logging::default_log_dir);
    let _logging = logging::init(cli.verbose, log_dir.as_deref())?;

    info!(
        "Received {}",
        std::env::args().skip(1).collect::<Vec<_>>().join(" ")
    );

    let registry_path = cli
        .registry
        .clone()
        .or_else(Registry::default_path)
        .ok_or_else(|| eyre!("Could not locate the lighthouse registry, pass --registry"))?;
    let config = OrchestratorConfig {
        discovery_timeout: Duration::from_secs(cli.discovery_timeout),
        service_resolution_timeout: Duration::from_secs(cli.resolution_timeout),
    };
    debug!("Using {:?}", config);

    let code = match cli.command {
        Commands::Power { state, addresses } => {
            power(config, &registry_path, state.into(), addresses).await
        }
        Commands::Register { addresses } => register(&registry_path, addresses),
        Commands::Exec { command } => exec(config, &registry_path, command).await,
    };

    info!("Exiting with code {}...", code);
    Ok(ExitCode::from(code))
}

fn no_lighthouses_hint() {
    error!("There are no registered lighthouses! Run `lhpower register <ADDRESS>...` to add them");
}

#[instrument(skip(config, registry_path, addresses))]
async fn power(
    config: OrchestratorConfig,
    registry_path: &Path,
    state: PowerState,
    addresses: Vec<LighthouseAddress>,
) -> u8 {
    let addresses = if addresses.is_empty() {
        match Registry::load(registry_path) {
            Ok(registry) => registry.lighthouses().to_vec(),
            Err(e) => {
                error!("No lighthouse addresses were given: {}", e);
                no_lighthouses_hint();
                return match e {
                    RegistryError::Missing(_) => exit::POWER_NO_REGISTRY,
                    RegistryError::Corrupt { .. } => exit::POWER_CORRUPT_REGISTRY,
                    RegistryError::MissingLighthouses(_) => exit::POWER_BAD_REGISTRY,
                    RegistryError::Empty(_) => exit::POWER_NO_LIGHTHOUSES,
                    RegistryError::CreateDir { .. } | RegistryError::Io { .. } => {
                        exit::POWER_REGISTRY_UNREADABLE
                    }
                };
            }
        }
    } else {
        addresses
    };

    let orchestrator = match PowerStateOrchestrator::with_system_adapter(config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Failed to open the Bluetooth stack: {}", e);
            return exit::POWER_UNEXPECTED;
        }
    };

    info!(
        "Setting the power state of {} to {}",
        display_addresses(&addresses),
        state
    );
    if orchestrator.set_power_state(state, &addresses).await {
        exit::OK
    } else {
        exit::POWER_FAILED
    }
}

#[instrument(skip(registry_path))]
fn register(registry_path: &Path, addresses: Vec<LighthouseAddress>) -> u8 {
    let mut registry = Registry::load_or_default(registry_path);
    let added = registry.register(addresses);

    match registry.save(registry_path) {
        Ok(()) => {
            info!(
                "Registered {} new lighthouses, {} in total: {}",
                added,
                registry.lighthouses().len(),
                display_addresses(registry.lighthouses())
            );
            exit::OK
        }
        Err(e @ RegistryError::CreateDir { .. }) => {
            error!("{}", e);
            exit::REGISTER_CREATE_DIR_FAILED
        }
        Err(e) => {
            error!("{}", e);
            exit::REGISTER_WRITE_FAILED
        }
    }
}

#[instrument(skip(config, registry_path))]
async fn exec(config: OrchestratorConfig, registry_path: &Path, command: Vec<String>) -> u8 {
    let lighthouses = match Registry::load(registry_path) {
        Ok(registry) => registry.lighthouses().to_vec(),
        Err(e) => {
            error!("{}", e);
            no_lighthouses_hint();
            return match e {
                RegistryError::Missing(_) => exit::EXEC_NO_REGISTRY,
                RegistryError::Empty(_) => exit::EXEC_NO_LIGHTHOUSES,
                _ => exit::EXEC_BAD_REGISTRY,
            };
        }
    };

    let orchestrator = match PowerStateOrchestrator::with_system_adapter(config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Failed to open the Bluetooth stack: {}", e);
            return exit::EXEC_POWER_ON_FAILED;
        }
    };

    if !orchestrator
        .set_power_state(PowerState::On, &lighthouses)
        .await
    {
        error!(
            "Failed to turn on the lighthouses: {}",
            display_addresses(&lighthouses)
        );
        return exit::EXEC_POWER_ON_FAILED;
    }
    info!(
        "Successfully turned on the lighthouses: {}",
        display_addresses(&lighthouses)
    );

    let spawned = run_to_completion(&command).await;

    if !orchestrator
        .set_power_state(PowerState::Off, &lighthouses)
        .await
    {
        error!(
            "Failed to turn off the lighthouses: {}",
            display_addresses(&lighthouses)
        );
        return exit::EXEC_POWER_OFF_FAILED;
    }
    info!(
        "Successfully turned off the lighthouses: {}",
        display_addresses(&lighthouses)
    );

    if spawned {
        exit::OK
    } else {
        exit::EXEC_SPAWN_FAILED
    }
}

/// Runs `command` and waits for it; returns whether it could be started
async fn run_to_completion(command: &[String]) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };

    info!("Executing '{}'", command.join(" "));
    let mut child = match Command::new(program).args(args).spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to start '{}': {}", program, e);
            return false;
        }
    };

    // Ctrl-C reaches the child as well; keep waiting so the lighthouses get switched off
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, waiting for '{}' to exit", program);
            }
        }
    };

    match status {
        Ok(status) => info!("'{}' exited with {}", program, status),
        Err(e) => warn!("Failed to wait for '{}': {}", program, e),
    }
    true
}

fn display_addresses(addresses: &[LighthouseAddress]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
