#![cfg_attr(docsrs, feature(doc_cfg))]
//! `foundation` drives a database migrator through its numbered steps during test setup,
//! pausing at chosen steps to run interceptors.
//!
//! Testing a data migration usually means getting the schema to the step *before* it,
//! inserting fixture rows that look like real data at that point in history, and then
//! migrating further to see what the migration did to them. A [Foundation] does the
//! bookkeeping: register an [Interceptor] per step that needs fixtures, ask for the step
//! you want to end at, and every interceptor on the way runs exactly when the schema
//! reaches its step.
//!
//! The migration itself is done by a [Migrator], which `foundation` only orchestrates.
//! [sqlite::SqliteScriptMigrator] applies plain SQL scripts to SQLite and is enough for
//! many test suites; anything else can be plugged in by implementing [Migrator].
//!
//! # Example
//!
//! ```
//! # #[cfg(not(feature = "sqlite"))]
//! # fn main() {}
//! # #[cfg(feature = "sqlite")]
//! # fn main() -> Result<(), foundation::Error> {
//! use foundation::sqlite::{SqlStep, SqliteScriptMigrator};
//! use foundation::{Foundation, Interceptor, Interceptors};
//! use rusqlite::Connection;
//!
//! let migrator = SqliteScriptMigrator::new(vec![
//!     SqlStep::new("create_accounts", "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance_cents INTEGER)"),
//!     SqlStep::new("add_balance", "ALTER TABLE accounts ADD COLUMN balance REAL"),
//!     SqlStep::new("convert_balance", "UPDATE accounts SET balance = balance_cents / 100.0"),
//! ])?;
//!
//! let seed: Interceptor<Connection> = Box::new(|conn: &mut Connection| -> Result<(), foundation::Error> {
//!     conn.execute("INSERT INTO accounts (balance_cents) VALUES (1250)", [])?;
//!     Ok(())
//! });
//! let mut interceptors = Interceptors::new();
//! interceptors.insert(1, seed);
//!
//! let mut foundation = Foundation::new(migrator)?
//!     .register_interceptors(interceptors)
//!     .set_step_by_step(true);
//!
//! foundation.migrate_to_step(3)?;
//!
//! let balance: f64 = foundation
//!     .db()
//!     .query_row("SELECT balance FROM accounts", [], |row| row.get(0))?;
//! assert_eq!(balance, 12.5);
//!
//! // migrating backwards is not supported
//! assert!(matches!(
//!     foundation.migrate_to_step(1),
//!     Err(foundation::Error::DowngradeUnsupported { current: 3, target: 1 })
//! ));
//!
//! foundation.teardown()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Every operation returns a [Result]; nothing panics or exits on failure. Return
//! `Result<(), foundation::Error>` from the test, or `unwrap()`, to fail it.
//!
//! When an interceptor fails, the error message only names the step, e.g.
//! `interceptor function for step 3 failed`. The interceptor's own error is available
//! through [std::error::Error::source].
//!
//! # Features
//!
//! - `sqlite` (default): [sqlite::SqliteScriptMigrator] and [Execute] for `rusqlite::Connection`.
//! - `postgres`: [Execute] for `postgres::Client`.
//! - `mysql`: [Execute] for `mysql::Conn`.
//! - `tracing`: spans and events for every migration request, applied step and interceptor.
//! - `testing`: [testing::RecordingMigrator], a migrator that records its calls.

mod error;
pub use error::Error;

mod migrator;
pub use migrator::{Execute, Migrator};

mod foundation;
pub use foundation::{Foundation, Interceptor, Interceptors};

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;
