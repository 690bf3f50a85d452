extern crate diesel;
extern crate diesel_migrations;

use crate::scheduler::Scheduler;
use buildmaster_common::config::{ConfigFile, API_ERROR_DELAY};
use buildmaster_common::errors::*;
use std::time::Duration;
use tokio::time;

pub mod artifacts;
pub mod config;
pub mod db;
pub mod models;
pub mod ops;
pub mod pool;
pub mod schema;
pub mod scheduler;
pub mod score;
pub mod sync;
pub mod transitions;
pub mod util;

/// Run the scheduler until the process is stopped.
pub async fn run_config(pool: db::Pool, config: ConfigFile) -> Result<()> {
    {
        let mut connection = pool.get()?;
        config::sync_to_database(&config, &mut connection)?;
    }

    let interval = config.schedule.interval();
    let mut scheduler = Scheduler::from_config(config);

    loop {
        let mut connection = match pool.get() {
            Ok(connection) => connection,
            Err(err) => {
                error!("Failed to get connection from pool: {:#}", err);
                time::sleep(Duration::from_secs(API_ERROR_DELAY)).await;
                continue;
            }
        };

        debug!("Starting scheduler tick");
        if let Err(err) = scheduler.tick(&mut connection).await {
            error!("Scheduler tick failed: {:#}", err);
        }
        drop(connection);

        debug!("Sleeping for {:?} until next tick", interval);
        time::sleep(interval).await;
    }
}
