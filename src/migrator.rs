use crate::error::Error;

/// Something that can run a batch of raw SQL text.
///
/// The text is handed to the driver as-is, without splitting or parsing, so
/// whether multiple statements are accepted is up to the driver.
pub trait Execute {
    fn execute_batch(&mut self, sql: &str) -> Result<(), Error>;
}

impl<T: Execute + ?Sized> Execute for &mut T {
    fn execute_batch(&mut self, sql: &str) -> Result<(), Error> {
        (**self).execute_batch(sql)
    }
}

#[cfg(feature = "sqlite")]
impl Execute for rusqlite::Connection {
    fn execute_batch(&mut self, sql: &str) -> Result<(), Error> {
        rusqlite::Connection::execute_batch(self, sql)?;
        Ok(())
    }
}

#[cfg(feature = "postgres")]
impl Execute for postgres::Client {
    fn execute_batch(&mut self, sql: &str) -> Result<(), Error> {
        self.batch_execute(sql)?;
        Ok(())
    }
}

#[cfg(feature = "mysql")]
impl Execute for mysql::Conn {
    fn execute_batch(&mut self, sql: &str) -> Result<(), Error> {
        use mysql::prelude::Queryable;
        self.query_drop(sql)?;
        Ok(())
    }
}

/// The collaborator that actually changes the schema.
///
/// A [Foundation](crate::Foundation) never migrates anything itself: it decides
/// which step to stop at next and asks its migrator to get there.
///
/// Implementations must accept any `step` greater than the last step they
/// reached, including exactly one more than it (used in step-by-step mode).
pub trait Migrator {
    /// The live connection used for fixture SQL and handed to interceptors.
    type Connection: Execute;

    /// Access the live database connection.
    fn connection(&mut self) -> &mut Self::Connection;

    /// Name of the database driver behind [Migrator::connection], e.g. `"sqlite3"` or `"postgres"`.
    fn driver_name(&self) -> &str;

    /// One-time preparation, e.g. creating a scratch database.
    /// Called exactly once, when the [Foundation](crate::Foundation) is constructed.
    fn setup(&mut self) -> Result<(), Error>;

    /// Migrate the schema to exactly `step`.
    fn migrate_to_step(&mut self, step: u32) -> Result<(), Error>;

    /// One-time cleanup, e.g. dropping the scratch database.
    fn teardown(&mut self) -> Result<(), Error>;
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn sqlite_connection_runs_multiple_statements() {
        let mut conn = Connection::open_in_memory().unwrap();
        Execute::execute_batch(
            &mut conn,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO users (name) VALUES ('alice');
             INSERT INTO users (name) VALUES ('bob');",
        )
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn sqlite_connection_reports_driver_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        let err = Execute::execute_batch(&mut conn, "THIS IS NOT VALID SQL").unwrap_err();
        assert!(matches!(err, Error::Rusqlite(_)));
    }

    #[test]
    fn mutable_reference_forwards() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut by_ref = &mut conn;
        Execute::execute_batch(&mut by_ref, "CREATE TABLE t (id INTEGER)").unwrap();
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
    }
}
