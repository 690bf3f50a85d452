use crate::schema::*;
use buildmaster_common::errors::*;
use buildmaster_common::Pocket;
use diesel::prelude::*;
use diesel::upsert::excluded;

#[derive(Identifiable, Queryable, Selectable, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = chroots)]
pub struct Chroot {
    pub id: i32,
    pub distro_arch_series_id: i32,
    pub pocket: Pocket,
    pub sha1: String,
    pub artifact_id: i32,
}

impl Chroot {
    /// Chroot for an architecture and pocket, falling back to the release pocket.
    pub fn find(my_arch_id: i32, my_pocket: Pocket, connection: &mut SqliteConnection) -> Result<Option<Chroot>> {
        use crate::schema::chroots::dsl::*;

        let chroot = chroots
            .filter(distro_arch_series_id.eq(my_arch_id))
            .filter(pocket.eq(my_pocket))
            .select(Chroot::as_select())
            .first::<Chroot>(connection)
            .optional()?;

        if chroot.is_some() || my_pocket == Pocket::Release {
            return Ok(chroot);
        }

        let chroot = chroots
            .filter(distro_arch_series_id.eq(my_arch_id))
            .filter(pocket.eq(Pocket::Release))
            .select(Chroot::as_select())
            .first::<Chroot>(connection)
            .optional()?;
        Ok(chroot)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = chroots)]
pub struct NewChroot {
    pub distro_arch_series_id: i32,
    pub pocket: Pocket,
    pub sha1: String,
    pub artifact_id: i32,
}

impl NewChroot {
    pub fn upsert(&self, connection: &mut SqliteConnection) -> Result<Chroot> {
        use crate::schema::chroots::*;

        let chroot = diesel::insert_into(table)
            .values(self)
            .on_conflict((distro_arch_series_id, pocket))
            .do_update()
            .set((
                sha1.eq(excluded(sha1)),
                artifact_id.eq(excluded(artifact_id)),
            ))
            .returning(Chroot::as_select())
            .get_result::<Chroot>(connection)?;

        Ok(chroot)
    }
}
