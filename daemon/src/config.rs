use crate::models::{DistroArchSeries, NewBuilder, NewDistroArchSeries};
use buildmaster_common::config::{self, ConfigFile};
use buildmaster_common::errors::*;
use diesel::prelude::*;
use std::path::Path;

pub fn load(path: Option<&Path>) -> Result<ConfigFile> {
    let config = config::load(path)?;

    for series in &config.schedule.series {
        if !config.series.contains_key(series) {
            bail!("Series {:?} is scheduled but has no architectures configured", series);
        }
    }

    for (name, builder) in &config.builders {
        if builder.url.is_empty() {
            bail!("Builder {:?} has no url", name);
        }
    }

    Ok(config)
}

/// Register the configured architectures and builders in the database.
///
/// Architectures that disappeared from the config are disabled, builders are
/// kept so their history stays around.
pub fn sync_to_database(config: &ConfigFile, connection: &mut SqliteConnection) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        for (series, series_config) in &config.series {
            for (architecture, processor) in &series_config.architectures {
                let das = NewDistroArchSeries {
                    series: series.clone(),
                    architecture: architecture.clone(),
                    processor: processor.clone(),
                    enabled: true,
                }
                .upsert(connection)?;
                debug!("registered architecture {}/{} as #{}", das.series, das.architecture, das.id);
            }

            let keep = series_config.architectures.keys().cloned().collect::<Vec<_>>();
            let n = DistroArchSeries::disable_others(series, &keep, connection)?;
            if n > 0 {
                info!("disabled {} architecture(s) of {:?}", n, series);
            }
        }

        for (name, builder) in &config.builders {
            let builder = NewBuilder {
                name: name.clone(),
                url: builder.url.clone(),
                processor: builder.processor.clone(),
                manual: builder.manual,
            }
            .upsert(connection)?;
            debug!("registered builder {:?} ({}) as #{}", builder.name, builder.processor, builder.id);
        }

        Ok(())
    })
}
