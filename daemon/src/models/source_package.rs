use crate::schema::*;
use buildmaster_common::errors::*;
use buildmaster_common::{Pocket, SourceStatus};
use chrono::NaiveDateTime;
use diesel::prelude::*;

/// A source package as published into a series, owned by the archive publisher.
#[derive(Identifiable, Queryable, Selectable, AsChangeset, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = source_packages)]
pub struct SourcePackage {
    pub id: i32,
    pub name: String,
    pub version: String,
    pub series: String,
    pub pocket: Pocket,
    pub component: String,
    pub status: SourceStatus,
    pub architecture_hint: String,
    pub published_at: NaiveDateTime,
}

impl SourcePackage {
    pub fn get_id(my_id: i32, connection: &mut SqliteConnection) -> Result<SourcePackage> {
        use crate::schema::source_packages::dsl::*;
        let pkg = source_packages
            .filter(id.eq(my_id))
            .select(SourcePackage::as_select())
            .first::<SourcePackage>(connection)?;
        Ok(pkg)
    }

    pub fn find_published_sources(my_series: &str, statuses: &[SourceStatus], connection: &mut SqliteConnection) -> Result<Vec<SourcePackage>> {
        use crate::schema::source_packages::dsl::*;
        let pkgs = source_packages
            .filter(series.eq(my_series))
            .filter(status.eq_any(statuses))
            .order_by(id)
            .select(SourcePackage::as_select())
            .load::<SourcePackage>(connection)?;
        Ok(pkgs)
    }

    pub fn get_by(my_name: &str, my_version: &str, my_series: &str, my_pocket: Pocket, connection: &mut SqliteConnection) -> Result<Option<SourcePackage>> {
        use crate::schema::source_packages::dsl::*;
        let pkg = source_packages
            .filter(name.eq(my_name))
            .filter(version.eq(my_version))
            .filter(series.eq(my_series))
            .filter(pocket.eq(my_pocket))
            .select(SourcePackage::as_select())
            .first::<SourcePackage>(connection)
            .optional()?;
        Ok(pkg)
    }

    pub fn set_status(my_id: i32, my_status: SourceStatus, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::source_packages::dsl::*;
        diesel::update(source_packages.filter(id.eq(my_id)))
            .set(status.eq(my_status))
            .execute(connection)?;
        Ok(())
    }

    pub fn files(&self, connection: &mut SqliteConnection) -> Result<Vec<SourceFile>> {
        let files = SourceFile::belonging_to(self)
            .order_by(source_files::filename)
            .select(SourceFile::as_select())
            .load::<SourceFile>(connection)?;
        Ok(files)
    }

    pub fn count_files(my_id: i32, connection: &mut SqliteConnection) -> Result<i64> {
        use crate::schema::source_files::dsl::*;
        let n = source_files
            .filter(source_package_id.eq(my_id))
            .count()
            .get_result::<i64>(connection)?;
        Ok(n)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = source_packages)]
pub struct NewSourcePackage {
    pub name: String,
    pub version: String,
    pub series: String,
    pub pocket: Pocket,
    pub component: String,
    pub status: SourceStatus,
    pub architecture_hint: String,
    pub published_at: NaiveDateTime,
}

impl NewSourcePackage {
    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<SourcePackage> {
        let pkg = diesel::insert_into(source_packages::table)
            .values(self)
            .returning(SourcePackage::as_select())
            .get_result::<SourcePackage>(connection)?;
        Ok(pkg)
    }
}

#[derive(Identifiable, Queryable, Selectable, Associations, Clone, PartialEq, Eq, Debug)]
#[diesel(belongs_to(SourcePackage))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = source_files)]
pub struct SourceFile {
    pub id: i32,
    pub source_package_id: i32,
    pub filename: String,
    pub sha1: String,
    pub artifact_id: i32,
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = source_files)]
pub struct NewSourceFile {
    pub source_package_id: i32,
    pub filename: String,
    pub sha1: String,
    pub artifact_id: i32,
}

impl NewSourceFile {
    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<()> {
        diesel::insert_into(source_files::table)
            .values(self)
            .execute(connection)?;
        Ok(())
    }
}
