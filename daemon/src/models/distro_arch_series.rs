use crate::schema::*;
use buildmaster_common::errors::*;
use diesel::prelude::*;
use diesel::upsert::excluded;

/// One architecture of a series, built by the builders of `processor`.
#[derive(Identifiable, Queryable, Selectable, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = distro_arch_series)]
pub struct DistroArchSeries {
    pub id: i32,
    pub series: String,
    pub architecture: String,
    pub processor: String,
    pub enabled: bool,
}

impl DistroArchSeries {
    pub fn get_id(my_id: i32, connection: &mut SqliteConnection) -> Result<DistroArchSeries> {
        use crate::schema::distro_arch_series::dsl::*;
        let das = distro_arch_series
            .filter(id.eq(my_id))
            .select(DistroArchSeries::as_select())
            .first::<DistroArchSeries>(connection)?;
        Ok(das)
    }

    /// Enabled architectures of a series, in registration order.
    pub fn list_series(my_series: &str, connection: &mut SqliteConnection) -> Result<Vec<DistroArchSeries>> {
        use crate::schema::distro_arch_series::dsl::*;
        let archs = distro_arch_series
            .filter(series.eq(my_series))
            .filter(enabled.eq(true))
            .order_by(id)
            .select(DistroArchSeries::as_select())
            .load::<DistroArchSeries>(connection)?;
        Ok(archs)
    }

    pub fn list(connection: &mut SqliteConnection) -> Result<Vec<DistroArchSeries>> {
        use crate::schema::distro_arch_series::dsl::*;
        let archs = distro_arch_series
            .filter(enabled.eq(true))
            .order_by(id)
            .select(DistroArchSeries::as_select())
            .load::<DistroArchSeries>(connection)?;
        Ok(archs)
    }

    pub fn get_by(my_series: &str, my_architecture: &str, connection: &mut SqliteConnection) -> Result<Option<DistroArchSeries>> {
        use crate::schema::distro_arch_series::dsl::*;
        let das = distro_arch_series
            .filter(series.eq(my_series))
            .filter(architecture.eq(my_architecture))
            .select(DistroArchSeries::as_select())
            .first::<DistroArchSeries>(connection)
            .optional()?;
        Ok(das)
    }

    /// Disable every architecture of `my_series` that is not listed in `keep`.
    pub fn disable_others(my_series: &str, keep: &[String], connection: &mut SqliteConnection) -> Result<usize> {
        use crate::schema::distro_arch_series::dsl::*;
        let n = diesel::update(distro_arch_series
            .filter(series.eq(my_series))
            .filter(architecture.ne_all(keep)))
            .set(enabled.eq(false))
            .execute(connection)?;
        Ok(n)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = distro_arch_series)]
pub struct NewDistroArchSeries {
    pub series: String,
    pub architecture: String,
    pub processor: String,
    pub enabled: bool,
}

impl NewDistroArchSeries {
    pub fn upsert(&self, connection: &mut SqliteConnection) -> Result<DistroArchSeries> {
        use crate::schema::distro_arch_series::*;

        let das = diesel::insert_into(table)
            .values(self)
            .on_conflict((series, architecture))
            .do_update()
            .set((
                processor.eq(excluded(processor)),
                enabled.eq(excluded(enabled)),
            ))
            .returning(DistroArchSeries::as_select())
            .get_result::<DistroArchSeries>(connection)?;

        Ok(das)
    }
}
