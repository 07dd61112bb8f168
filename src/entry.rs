use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::args::{AgentArgs, Command, DriverArgs, LoadmeshArgs, SubmitArgs};
use crate::config::{Configuration, load_config, parse_execution_request};
use crate::distributed::{run_agent, run_driver, submit_plan};
use crate::error::{AppError, AppResult, ConfigError};
use crate::shutdown::shutdown_channel;
use crate::shutdown_handlers::setup_signal_shutdown_handler;

/// Parse the command line, install logging and run the selected role.
///
/// # Errors
///
/// Returns an error when configuration is invalid, the runtime cannot be
/// built, or the selected role fails to start.
pub fn run() -> AppResult<()> {
    let args = LoadmeshArgs::parse();
    crate::logger::init_logging(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(args.command))
}

async fn run_async(command: Command) -> AppResult<()> {
    match command {
        Command::Driver(args) => driver(args).await,
        Command::Agent(args) => agent(args).await,
        Command::Submit(args) => submit(args).await,
    }
}

fn load_configuration(path: Option<&str>, drivers: Vec<String>) -> AppResult<Configuration> {
    let mut config = match load_config(path)? {
        Some(file) => Configuration::from_file(&file)?,
        None => Configuration::default(),
    };
    if !drivers.is_empty() {
        config.set_drivers(drivers);
    }
    Ok(config)
}

async fn driver(args: DriverArgs) -> AppResult<()> {
    let config = load_configuration(args.config.as_deref(), args.drivers)?;
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let signals = setup_signal_shutdown_handler(&shutdown_tx);
    let result = run_driver(config, &args.listen, args.driver_id, shutdown_rx).await;
    signals.abort();
    result
}

async fn agent(args: AgentArgs) -> AppResult<()> {
    let config = load_configuration(args.config.as_deref(), args.drivers)?;
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let signals = setup_signal_shutdown_handler(&shutdown_tx);
    let result = run_agent(config, &args.listen, args.advertise.as_deref(), shutdown_rx).await;
    signals.abort();
    result
}

async fn submit(args: SubmitArgs) -> AppResult<()> {
    let plan = std::fs::read_to_string(&args.config).map_err(|err| {
        AppError::config(ConfigError::ReadConfig {
            path: PathBuf::from(&args.config),
            source: err,
        })
    })?;
    let parsed = parse_execution_request(&plan)?;
    info!(
        "Submitting {} phase(s) from {} to {}",
        parsed.phases().len(),
        args.config,
        args.driver
    );
    submit_plan(&parsed, &args.driver, &plan).await
}
