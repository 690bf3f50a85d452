use buildmaster_common::Pocket;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Verbose logging
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub verbose: u8,
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Path to the sqlite database
    #[arg(
        long,
        global = true,
        env = "BUILDMASTER_DATABASE",
        default_value = "buildmaster.db"
    )]
    pub database: String,
    #[command(subcommand)]
    pub subcommand: SubCommand,
}

#[derive(Debug, Subcommand)]
pub enum SubCommand {
    /// Run the scheduler loop
    Run,
    /// Load and print a config
    CheckConfig,
    /// Sync the published sources of a series from a json snapshot
    ImportSources(ImportSources),
    /// Register the chroot tarball of an architecture
    ImportChroot(ImportChroot),
    /// Re-enable a builder that was marked as failed
    ResetBuilder(ResetBuilder),
    /// Queue a failed or waiting build again
    RetryBuild(RetryBuild),
}

#[derive(Debug, Parser)]
pub struct ImportSources {
    /// The json file to import, source file paths are relative to it
    pub path: PathBuf,
}

#[derive(Debug, Parser)]
pub struct ImportChroot {
    pub series: String,
    pub architecture: String,
    pub pocket: Pocket,
    pub path: PathBuf,
}

#[derive(Debug, Parser)]
pub struct ResetBuilder {
    pub name: String,
}

#[derive(Debug, Parser)]
pub struct RetryBuild {
    pub id: i32,
}
