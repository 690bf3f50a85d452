use buildmaster_common::errors::*;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 10000;")
            .map_err(r2d2::Error::QueryError)
    }
}

pub fn setup(url: &str) -> Result<SqliteConnection> {
    let mut connection = SqliteConnection::establish(url)
        .with_context(|| anyhow!("Failed to open database: {:?}", url))?;
    connection.batch_execute("PRAGMA foreign_keys = ON")?;

    let applied = connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow!("Failed to run migrations: {err}"))?;
    for version in applied {
        info!("Applied database migration: {}", version);
    }

    Ok(connection)
}

pub fn setup_pool(url: &str) -> Result<Pool> {
    setup(url)?;

    let manager = ConnectionManager::<SqliteConnection>::new(url);
    let pool = r2d2::Pool::builder()
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
        .context("Failed to create pool")?;
    Ok(pool)
}
