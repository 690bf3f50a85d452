use crate::schema::*;
use buildmaster_common::errors::*;
use chrono::NaiveDateTime;
use diesel::prelude::*;

/// Metadata of a stored artifact, the content itself is only loaded on demand.
#[derive(Identifiable, Queryable, Selectable, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = artifacts)]
pub struct Artifact {
    pub id: i32,
    pub name: String,
    pub size: i64,
    pub sha1: String,
    pub mime_type: String,
    pub created_at: NaiveDateTime,
}

impl Artifact {
    pub fn get_id(my_id: i32, connection: &mut SqliteConnection) -> Result<Artifact> {
        use crate::schema::artifacts::dsl::*;
        let artifact = artifacts
            .filter(id.eq(my_id))
            .select(Artifact::as_select())
            .first::<Artifact>(connection)?;
        Ok(artifact)
    }

    pub fn find(my_id: i32, connection: &mut SqliteConnection) -> Result<Option<Artifact>> {
        use crate::schema::artifacts::dsl::*;
        let artifact = artifacts
            .filter(id.eq(my_id))
            .select(Artifact::as_select())
            .first::<Artifact>(connection)
            .optional()?;
        Ok(artifact)
    }

    pub fn find_by_sha1(my_sha1: &str, connection: &mut SqliteConnection) -> Result<Option<Artifact>> {
        use crate::schema::artifacts::dsl::*;
        let artifact = artifacts
            .filter(sha1.eq(my_sha1))
            .order_by(id)
            .select(Artifact::as_select())
            .first::<Artifact>(connection)
            .optional()?;
        Ok(artifact)
    }

    pub fn content(my_id: i32, connection: &mut SqliteConnection) -> Result<Vec<u8>> {
        use crate::schema::artifacts::dsl::*;
        let data = artifacts
            .filter(id.eq(my_id))
            .select(content)
            .first::<Vec<u8>>(connection)?;
        Ok(data)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = artifacts)]
pub struct NewArtifact {
    pub name: String,
    pub size: i64,
    pub sha1: String,
    pub mime_type: String,
    pub content: Vec<u8>,
    pub created_at: NaiveDateTime,
}

impl NewArtifact {
    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<i32> {
        let id = diesel::insert_into(artifacts::table)
            .values(self)
            .returning(artifacts::id)
            .get_result::<i32>(connection)?;
        Ok(id)
    }
}
