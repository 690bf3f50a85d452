use clap::{Parser, ArgAction};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Verbose logging
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub verbose: u8,
    #[command(subcommand)]
    pub subcommand: SubCommand,
    #[arg(short, long, global = true, env = "BUILDMASTER_WORKER_CONFIG")]
    pub config: Option<PathBuf>,
    /// Address the rpc server listens on
    #[arg(long, global = true, env = "BUILDMASTER_WORKER_BIND_ADDR")]
    pub bind_addr: Option<String>,
    /// Architecture tag reported to the master
    #[arg(long, global = true, env = "BUILDMASTER_WORKER_ARCH_TAG")]
    pub arch_tag: Option<String>,
    /// Script that performs the actual build
    #[arg(long, global = true, env = "BUILDMASTER_WORKER_BACKEND")]
    pub backend: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum SubCommand {
    /// Serve the builder rpc interface
    Serve,
    /// Load and print a config
    CheckConfig,
}
