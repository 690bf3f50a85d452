mod args;

use crate::args::{Args, SubCommand};
use buildmaster::artifacts::ArtifactStore;
use buildmaster::config;
use buildmaster::db;
use buildmaster::ops;
use buildmaster::pool::HttpConnector;
use buildmaster::sync::{self, SeriesImport};
use buildmaster_common::errors::*;
use clap::Parser;
use env_logger::Env;
use std::fs;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let logging = match args.verbose {
        0 => "info",
        1 => "buildmaster=debug,buildmaster_common=debug,info",
        2 => "debug",
        3 => "buildmaster=trace,buildmaster_common=trace,debug",
        _ => "trace",
    };

    env_logger::init_from_env(Env::default().default_filter_or(logging));

    let config = config::load(args.config.as_deref())?;

    match args.subcommand {
        SubCommand::Run => {
            let pool = db::setup_pool(&args.database)?;
            buildmaster::run_config(pool, config).await?;
        }
        SubCommand::CheckConfig => {
            println!("{:#?}", config);
        }
        SubCommand::ImportSources(import) => {
            let buf = fs::read(&import.path)
                .with_context(|| anyhow!("Failed to read import file: {:?}", import.path))?;
            let snapshot = serde_json::from_slice::<SeriesImport>(&buf)
                .context("Failed to parse import file")?;
            let base = import.path.parent().unwrap_or_else(|| Path::new("."));

            let mut connection = db::setup(&args.database)?;
            let store = ArtifactStore::new(config.slave.artifact_url.clone());
            sync::run(snapshot, base, &store, &mut connection).await?;
        }
        SubCommand::ImportChroot(chroot) => {
            let mut connection = db::setup(&args.database)?;
            config::sync_to_database(&config, &mut connection)?;
            let store = ArtifactStore::new(config.slave.artifact_url.clone());
            ops::import_chroot(
                &mut connection,
                &store,
                &chroot.series,
                &chroot.architecture,
                chroot.pocket,
                &chroot.path,
            )
            .await?;
        }
        SubCommand::ResetBuilder(reset) => {
            let mut connection = db::setup(&args.database)?;
            ops::reset_builder(&mut connection, &reset.name)?;
        }
        SubCommand::RetryBuild(retry) => {
            let mut connection = db::setup(&args.database)?;
            let connector = HttpConnector::new(config.slave.timeout());
            ops::retry_build(&mut connection, &connector, retry.id).await?;
        }
    }

    Ok(())
}
