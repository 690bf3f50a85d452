use crate::models::Build;
use crate::schema::*;
use buildmaster_common::errors::*;
use buildmaster_common::BuildStatus;
use chrono::prelude::*;
use diesel::prelude::*;

#[derive(Identifiable, Queryable, Selectable, AsChangeset, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
#[diesel(table_name = build_queue)]
pub struct Queued {
    pub id: i32,
    pub build_id: i32,
    pub builder_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub build_started: Option<NaiveDateTime>,
    pub score: Option<i32>,
    pub log_tail: Option<Vec<u8>>,
}

impl Queued {
    pub fn get_id(my_id: i32, connection: &mut SqliteConnection) -> Result<Queued> {
        use crate::schema::build_queue::dsl::*;
        let item = build_queue
            .filter(id.eq(my_id))
            .select(Queued::as_select())
            .first::<Queued>(connection)?;
        Ok(item)
    }

    pub fn find_queue_item(my_build_id: i32, connection: &mut SqliteConnection) -> Result<Option<Queued>> {
        use crate::schema::build_queue::dsl::*;
        let item = build_queue
            .filter(build_id.eq(my_build_id))
            .select(Queued::as_select())
            .first::<Queued>(connection)
            .optional()?;
        Ok(item)
    }

    pub fn delete_queue_item(my_id: i32, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::build_queue::dsl::*;
        diesel::delete(build_queue.filter(id.eq(my_id)))
            .execute(connection)?;
        Ok(())
    }

    /// Queue items on the given architectures that are assigned to a builder.
    pub fn find_live_queue_items(arch_ids: &[i32], connection: &mut SqliteConnection) -> Result<Vec<(Queued, Build)>> {
        let results = build_queue::table
            .inner_join(builds::table)
            .filter(build_queue::builder_id.is_not_null())
            .filter(builds::distro_arch_series_id.eq_any(arch_ids))
            .order_by(build_queue::id)
            .select((Queued::as_select(), Build::as_select()))
            .load::<(Queued, Build)>(connection)?;
        Ok(results)
    }

    /// Unassigned queue items on the given architectures whose build still needs building.
    pub fn find_candidates(arch_ids: &[i32], connection: &mut SqliteConnection) -> Result<Vec<(Queued, Build)>> {
        let results = build_queue::table
            .inner_join(builds::table)
            .filter(build_queue::builder_id.is_null())
            .filter(builds::status.eq(BuildStatus::NeedsBuild))
            .filter(builds::distro_arch_series_id.eq_any(arch_ids))
            .order_by(builds::id)
            .select((Queued::as_select(), Build::as_select()))
            .load::<(Queued, Build)>(connection)?;
        Ok(results)
    }

    /// Whether a builder already holds a queue item.
    pub fn builder_is_busy(my_builder_id: i32, connection: &mut SqliteConnection) -> Result<bool> {
        use crate::schema::build_queue::dsl::*;
        let n = build_queue
            .filter(builder_id.eq(my_builder_id))
            .count()
            .get_result::<i64>(connection)?;
        Ok(n > 0)
    }

    pub fn assign(&mut self, my_builder_id: i32, now: NaiveDateTime, connection: &mut SqliteConnection) -> Result<()> {
        self.builder_id = Some(my_builder_id);
        self.build_started = Some(now);
        self.update(connection)
    }

    /// Put the item back into the dispatch pool.
    pub fn reset(&mut self, connection: &mut SqliteConnection) -> Result<()> {
        self.builder_id = None;
        self.build_started = None;
        self.update(connection)
    }

    pub fn reset_for_builder(my_builder_id: i32, connection: &mut SqliteConnection) -> Result<usize> {
        use crate::schema::build_queue::dsl::*;
        let n = diesel::update(build_queue.filter(builder_id.eq(my_builder_id)))
            .set((
                builder_id.eq(None::<i32>),
                build_started.eq(None::<NaiveDateTime>),
            ))
            .execute(connection)?;
        Ok(n)
    }

    pub fn set_log_tail(my_id: i32, tail: &[u8], connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::build_queue::dsl::*;
        diesel::update(build_queue.filter(id.eq(my_id)))
            .set(log_tail.eq(tail))
            .execute(connection)?;
        Ok(())
    }

    pub fn set_score(my_id: i32, my_score: i32, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::build_queue::dsl::*;
        diesel::update(build_queue.filter(id.eq(my_id)))
            .set(score.eq(my_score))
            .execute(connection)?;
        Ok(())
    }

    pub fn list(connection: &mut SqliteConnection) -> Result<Vec<Queued>> {
        use crate::schema::build_queue::dsl::*;
        let results = build_queue
            .order_by(id)
            .select(Queued::as_select())
            .load::<Queued>(connection)?;
        Ok(results)
    }

    pub fn update(&self, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::build_queue::columns::*;
        diesel::update(build_queue::table.filter(id.eq(self.id)))
            .set(self)
            .execute(connection)?;
        Ok(())
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = build_queue)]
pub struct NewQueued {
    pub build_id: i32,
    pub created_at: NaiveDateTime,
}

impl NewQueued {
    pub fn new(build_id: i32) -> NewQueued {
        let now: DateTime<Utc> = Utc::now();
        NewQueued {
            build_id,
            created_at: now.naive_utc(),
        }
    }

    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<Queued> {
        let item = diesel::insert_into(build_queue::table)
            .values(self)
            .returning(Queued::as_select())
            .get_result::<Queued>(connection)?;
        Ok(item)
    }
}
