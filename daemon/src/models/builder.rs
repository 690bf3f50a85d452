use crate::schema::*;
use buildmaster_common::errors::*;
use diesel::prelude::*;
use diesel::upsert::excluded;

#[derive(Identifiable, Queryable, Selectable, AsChangeset, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
#[diesel(table_name = builders)]
pub struct Builder {
    pub id: i32,
    pub name: String,
    pub url: String,
    pub processor: String,
    pub ok: bool,
    pub failure_note: Option<String>,
    pub manual: bool,
}

impl Builder {
    pub fn get_id(my_id: i32, connection: &mut SqliteConnection) -> Result<Builder> {
        use crate::schema::builders::dsl::*;
        let builder = builders
            .filter(id.eq(my_id))
            .select(Builder::as_select())
            .first::<Builder>(connection)?;
        Ok(builder)
    }

    pub fn get_by_name(my_name: &str, connection: &mut SqliteConnection) -> Result<Option<Builder>> {
        use crate::schema::builders::dsl::*;
        let builder = builders
            .filter(name.eq(my_name))
            .select(Builder::as_select())
            .first::<Builder>(connection)
            .optional()?;
        Ok(builder)
    }

    pub fn list(connection: &mut SqliteConnection) -> Result<Vec<Builder>> {
        use crate::schema::builders::dsl::*;
        let results = builders
            .order_by((processor, name))
            .select(Builder::as_select())
            .load::<Builder>(connection)?;
        Ok(results)
    }

    /// All registered builders of one processor family, healthy or not.
    pub fn list_processor(my_processor: &str, connection: &mut SqliteConnection) -> Result<Vec<Builder>> {
        use crate::schema::builders::dsl::*;
        let results = builders
            .filter(processor.eq(my_processor))
            .order_by(name)
            .select(Builder::as_select())
            .load::<Builder>(connection)?;
        Ok(results)
    }

    pub fn list_processors(connection: &mut SqliteConnection) -> Result<Vec<String>> {
        use crate::schema::builders::dsl::*;
        let results = builders
            .select(processor)
            .distinct()
            .order_by(processor)
            .load::<String>(connection)?;
        Ok(results)
    }

    pub fn mark_failed(&mut self, reason: &str, connection: &mut SqliteConnection) -> Result<()> {
        self.ok = false;
        self.failure_note = Some(reason.to_string());
        self.update(connection)
    }

    pub fn reset(&mut self, connection: &mut SqliteConnection) -> Result<()> {
        self.ok = true;
        self.failure_note = None;
        self.update(connection)
    }

    pub fn update(&self, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::builders::columns::*;
        diesel::update(builders::table.filter(id.eq(self.id)))
            .set(self)
            .execute(connection)?;
        Ok(())
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = builders)]
pub struct NewBuilder {
    pub name: String,
    pub url: String,
    pub processor: String,
    pub manual: bool,
}

impl NewBuilder {
    /// Register or update a builder, its health is left untouched.
    pub fn upsert(&self, connection: &mut SqliteConnection) -> Result<Builder> {
        use crate::schema::builders::*;

        let builder = diesel::insert_into(table)
            .values(self)
            .on_conflict(name)
            .do_update()
            .set((
                url.eq(excluded(url)),
                processor.eq(excluded(processor)),
                manual.eq(excluded(manual)),
            ))
            .returning(Builder::as_select())
            .get_result::<Builder>(connection)?;

        Ok(builder)
    }
}
