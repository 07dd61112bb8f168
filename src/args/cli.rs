use clap::{Args, Parser, Subcommand};

use super::parsers::parse_address;

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Distributed load generation: elected drivers coordinate a pool of agents that share each phase's work."
)]
pub struct LoadmeshArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging (overridden by LOADMESH_LOG / RUST_LOG)
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a driver (master or standby candidate)
    Driver(DriverArgs),
    /// Run an agent that executes the tests it is assigned
    Agent(AgentArgs),
    /// Submit an execution plan (config file with phases) to a driver
    Submit(SubmitArgs),
}

#[derive(Debug, Args, Clone)]
pub struct DriverArgs {
    /// Address to listen on (host:port)
    #[arg(long = "listen", default_value = "127.0.0.1:7100", value_parser = parse_address)]
    pub listen: String,

    /// This driver's index in the driver list (derived from --listen when omitted)
    #[arg(long = "driver-id")]
    pub driver_id: Option<usize>,

    /// Comma-separated driver addresses, ordered by id
    #[arg(
        long = "drivers",
        env = "LOADMESH_DRIVERS",
        value_delimiter = ',',
        value_parser = parse_address
    )]
    pub drivers: Vec<String>,

    /// Path to config file (TOML/JSON)
    #[arg(long = "config", short = 'c')]
    pub config: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct AgentArgs {
    /// Address to listen on (host:port)
    #[arg(long = "listen", default_value = "127.0.0.1:7200", value_parser = parse_address)]
    pub listen: String,

    /// Address drivers use to reach this agent (defaults to --listen)
    #[arg(long = "advertise", value_parser = parse_address)]
    pub advertise: Option<String>,

    /// Comma-separated driver addresses, ordered by id
    #[arg(
        long = "drivers",
        env = "LOADMESH_DRIVERS",
        value_delimiter = ',',
        value_parser = parse_address
    )]
    pub drivers: Vec<String>,

    /// Path to config file (TOML/JSON)
    #[arg(long = "config", short = 'c')]
    pub config: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct SubmitArgs {
    /// Driver to submit to; non-master drivers forward to the master
    #[arg(long = "driver", default_value = "127.0.0.1:7100", value_parser = parse_address)]
    pub driver: String,

    /// Config file defining the phases to run
    #[arg(long = "config", short = 'c')]
    pub config: String,
}
