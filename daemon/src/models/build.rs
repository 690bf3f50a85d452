use crate::schema::*;
use buildmaster_common::errors::*;
use buildmaster_common::{BuildStatus, SourceStatus};
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Identifiable, Queryable, Selectable, AsChangeset, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
#[diesel(table_name = builds)]
pub struct Build {
    pub id: i32,
    pub source_package_id: i32,
    pub distro_arch_series_id: i32,
    pub processor: String,
    pub status: BuildStatus,
    pub builder_id: Option<i32>,
    pub build_started: Option<NaiveDateTime>,
    /// Seconds between dispatch and collection.
    pub build_duration: Option<i32>,
    pub build_log_id: Option<i32>,
    pub upload_log_id: Option<i32>,
    pub dependencies: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Build {
    pub fn get_id(my_id: i32, connection: &mut SqliteConnection) -> Result<Build> {
        use crate::schema::builds::dsl::*;
        let build = builds
            .filter(id.eq(my_id))
            .select(Build::as_select())
            .first::<Build>(connection)?;
        Ok(build)
    }

    /// The live build of a source for one architecture, if any.
    pub fn find_build(my_source_id: i32, my_arch_id: i32, connection: &mut SqliteConnection) -> Result<Option<Build>> {
        use crate::schema::builds::dsl::*;
        let build = builds
            .filter(source_package_id.eq(my_source_id))
            .filter(distro_arch_series_id.eq(my_arch_id))
            .filter(status.ne(BuildStatus::Superseded))
            .order_by(id.desc())
            .select(Build::as_select())
            .first::<Build>(connection)
            .optional()?;
        Ok(build)
    }

    /// Live builds of a source on any architecture.
    pub fn find_in_series(my_source_id: i32, connection: &mut SqliteConnection) -> Result<Vec<Build>> {
        use crate::schema::builds::dsl::*;
        let results = builds
            .filter(source_package_id.eq(my_source_id))
            .filter(status.ne(BuildStatus::Superseded))
            .order_by(id)
            .select(Build::as_select())
            .load::<Build>(connection)?;
        Ok(results)
    }

    pub fn list_status(my_status: BuildStatus, connection: &mut SqliteConnection) -> Result<Vec<Build>> {
        use crate::schema::builds::dsl::*;
        let results = builds
            .filter(status.eq(my_status))
            .order_by(id)
            .select(Build::as_select())
            .load::<Build>(connection)?;
        Ok(results)
    }

    /// NEEDSBUILD builds on the given architectures that have no queue item.
    pub fn list_needing_queue(arch_ids: &[i32], connection: &mut SqliteConnection) -> Result<Vec<Build>> {
        let results = builds::table
            .left_join(build_queue::table)
            .filter(builds::status.eq(BuildStatus::NeedsBuild))
            .filter(builds::distro_arch_series_id.eq_any(arch_ids))
            .filter(build_queue::id.nullable().is_null())
            .order_by(builds::id)
            .select(Build::as_select())
            .load::<Build>(connection)?;
        Ok(results)
    }

    /// Unassigned NEEDSBUILD builds whose source is no longer published.
    pub fn list_stale(connection: &mut SqliteConnection) -> Result<Vec<Build>> {
        let results = builds::table
            .inner_join(source_packages::table)
            .left_join(build_queue::table)
            .filter(builds::status.eq(BuildStatus::NeedsBuild))
            .filter(source_packages::status.eq_any([SourceStatus::Superseded, SourceStatus::Deleted]))
            .filter(build_queue::builder_id.is_null())
            .order_by(builds::id)
            .select(Build::as_select())
            .load::<Build>(connection)?;
        Ok(results)
    }

    pub fn update(&self, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::builds::columns::*;
        diesel::update(builds::table.filter(id.eq(self.id)))
            .set(self)
            .execute(connection)?;
        Ok(())
    }

    /// Forget which builder the build was dispatched to.
    pub fn clear_assignment(my_id: i32, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::builds::dsl::*;
        diesel::update(builds.filter(id.eq(my_id)))
            .set((
                builder_id.eq(None::<i32>),
                build_started.eq(None::<NaiveDateTime>),
            ))
            .execute(connection)?;
        Ok(())
    }

    /// Forget the assignment of every build whose queue item is held by `my_builder_id`.
    pub fn clear_assignments_of(my_builder_id: i32, connection: &mut SqliteConnection) -> Result<usize> {
        use crate::schema::builds::dsl::*;
        let held = build_queue::table
            .filter(build_queue::builder_id.eq(my_builder_id))
            .select(build_queue::build_id);
        let n = diesel::update(builds.filter(id.eq_any(held)))
            .set((
                builder_id.eq(None::<i32>),
                build_started.eq(None::<NaiveDateTime>),
            ))
            .execute(connection)?;
        Ok(n)
    }

    pub fn binary_files(&self, connection: &mut SqliteConnection) -> Result<Vec<BinaryFile>> {
        let files = BinaryFile::belonging_to(self)
            .order_by(binary_files::filename)
            .select(BinaryFile::as_select())
            .load::<BinaryFile>(connection)?;
        Ok(files)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = builds)]
pub struct NewBuild {
    pub source_package_id: i32,
    pub distro_arch_series_id: i32,
    pub processor: String,
    pub status: BuildStatus,
    pub created_at: NaiveDateTime,
}

impl NewBuild {
    pub fn new(source_package_id: i32, distro_arch_series_id: i32, processor: String) -> NewBuild {
        NewBuild {
            source_package_id,
            distro_arch_series_id,
            processor,
            status: BuildStatus::NeedsBuild,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<Build> {
        let build = diesel::insert_into(builds::table)
            .values(self)
            .returning(Build::as_select())
            .get_result::<Build>(connection)?;
        Ok(build)
    }
}

#[derive(Identifiable, Queryable, Selectable, Associations, Clone, PartialEq, Eq, Debug)]
#[diesel(belongs_to(Build))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = binary_files)]
pub struct BinaryFile {
    pub id: i32,
    pub build_id: i32,
    pub filename: String,
    pub sha1: String,
    pub artifact_id: i32,
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = binary_files)]
pub struct NewBinaryFile {
    pub build_id: i32,
    pub filename: String,
    pub sha1: String,
    pub artifact_id: i32,
}

impl NewBinaryFile {
    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<()> {
        diesel::insert_into(binary_files::table)
            .values(self)
            .execute(connection)?;
        Ok(())
    }
}
