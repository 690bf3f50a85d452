use crate::args::{Args, SubCommand};
use crate::slave::Slave;
use actix_web::middleware::Logger;
use actix_web::{web::Data, App, HttpServer};
use buildmaster_common::errors::*;
use clap::Parser;
use env_logger::Env;

pub mod args;
pub mod cache;
pub mod config;
pub mod download;
pub mod proc;
pub mod server;
pub mod slave;
pub mod web;

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logging = match args.verbose {
        0 => "actix_web=debug,info",
        1 => "buildmaster_worker=debug,buildmaster_common=debug,actix_web=debug,info",
        2 => "debug",
        _ => "trace",
    };

    env_logger::init_from_env(Env::default().default_filter_or(logging));

    let conf = config::load(&args).context("Failed to load config file")?;

    match args.subcommand {
        SubCommand::Serve => {
            let config = conf.resolve(&args)?;
            let bind_addr = config.bind_addr.clone();
            let max_bytes = config.max_bytes;
            let slave = Data::new(Slave::new(config).await?);

            info!("Listening on {:?}", bind_addr);
            HttpServer::new(move || {
                App::new()
                    .wrap(Logger::default())
                    .app_data(slave.clone())
                    .configure(|cfg| server::routes(cfg, max_bytes))
            })
            .bind(&bind_addr)
            .with_context(|| anyhow!("Failed to bind {:?}", bind_addr))?
            .run()
            .await?;
        }
        SubCommand::CheckConfig => {
            let json = serde_json::to_string_pretty(&conf)?;
            println!("{}", json);
        }
    }

    Ok(())
}
