//! A [Migrator] over SQLite that applies plain SQL scripts in order.
//!
//! Step `N` is the `N`-th script. Each script runs in its own transaction and
//! is recorded in a step table (`_foundation_step_` by default) together with
//! when it was applied and a checksum of its contents.
//!
//! This is a sequential script runner for tests, not a migration engine: it
//! never diffs schemas and never rolls back.
//!
//! ```
//! use foundation::sqlite::{SqlStep, SqliteScriptMigrator};
//! use foundation::Foundation;
//!
//! # fn main() -> Result<(), foundation::Error> {
//! let migrator = SqliteScriptMigrator::new(vec![
//!     SqlStep::new("create_users", "CREATE TABLE users (id INTEGER PRIMARY KEY)"),
//!     SqlStep::new("add_name", "ALTER TABLE users ADD COLUMN name TEXT"),
//! ])?;
//!
//! let mut foundation = Foundation::new(migrator)?;
//! foundation
//!     .migrate_to_step(1)?
//!     .exec("INSERT INTO users (id) VALUES (1)")?
//!     .migrate_to_step(2)?;
//!
//! let history = foundation.migrator().applied_steps()?;
//! assert_eq!(history.len(), 2);
//! assert_eq!(history[1].name, "add_name");
//! # Ok(())
//! # }
//! ```
//!
//! Scripts can also be loaded from a directory of `<step>_<name>.sql` files
//! with [SqliteScriptMigrator::from_dir].
//!
//! # Tracing
//!
//! With the `tracing` feature, each applied script runs inside a `script_up`
//! span:
//!
//! ```
//! # #[cfg(not(feature = "tracing"))]
//! # fn main() {}
//! # #[cfg(feature = "tracing")]
//! # fn main() {
//! use foundation::sqlite::{SqlStep, SqliteScriptMigrator};
//! use foundation::Migrator;
//! use std::sync::{Arc, Mutex};
//!
//! let events = Arc::new(Mutex::new(Vec::<u8>::new()));
//! let events_clone = Arc::clone(&events);
//!
//! let subscriber = tracing_subscriber::fmt()
//!     .with_max_level(tracing::Level::INFO)
//!     .without_time()
//!     .with_target(false)
//!     .with_ansi(false)
//!     .with_writer(move || {
//!         struct W(Arc<Mutex<Vec<u8>>>);
//!         impl std::io::Write for W {
//!             fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
//!                 self.0.lock().unwrap().extend_from_slice(buf);
//!                 Ok(buf.len())
//!             }
//!             fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
//!         }
//!         W(events_clone.clone())
//!     })
//!     .finish();
//!
//! tracing::subscriber::with_default(subscriber, || {
//!     let mut migrator = SqliteScriptMigrator::new(vec![SqlStep::new(
//!         "create_users",
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY)",
//!     )])
//!     .unwrap();
//!     migrator.setup().unwrap();
//!     migrator.migrate_to_step(1).unwrap();
//! });
//!
//! let output = String::from_utf8(events.lock().unwrap().clone()).unwrap();
//! assert_eq!(output, " INFO script_up{step=1 name=create_users}: Script applied\n");
//! # }
//! ```

use crate::error::Error;
use crate::migrator::Migrator;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

pub(crate) const DEFAULT_STEP_TABLE_NAME: &str = "_foundation_step_";

/// One SQL script, applied as a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStep {
    pub name: String,
    pub sql: String,
}

impl SqlStep {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// A step recorded in the step table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedStep {
    pub step: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    /// SHA-256 of the step number, name and SQL at the time it was applied.
    pub checksum: String,
}

/// Applies [SqlStep]s to a SQLite connection, one transaction per step.
pub struct SqliteScriptMigrator {
    conn: Connection,
    steps: Vec<SqlStep>,
    step_table_name: String,
}

impl std::fmt::Debug for SqliteScriptMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteScriptMigrator")
            .field(
                "steps",
                &self.steps.iter().map(|s| &s.name).collect::<Vec<_>>(),
            )
            .field("step_table_name", &self.step_table_name)
            .finish()
    }
}

impl SqliteScriptMigrator {
    /// Create a migrator over a fresh in-memory database.
    pub fn new(steps: Vec<SqlStep>) -> Result<Self, Error> {
        Ok(Self::with_connection(Connection::open_in_memory()?, steps))
    }

    /// Create a migrator over a caller-supplied connection,
    /// e.g. a file-based database.
    pub fn with_connection(conn: Connection, steps: Vec<SqlStep>) -> Self {
        Self {
            conn,
            steps,
            step_table_name: DEFAULT_STEP_TABLE_NAME.to_string(),
        }
    }

    /// Load steps from `<step>_<name>.sql` files in `dir` over a fresh in-memory database.
    ///
    /// Steps must start at 1 and be contiguous. Files without the `.sql`
    /// extension are ignored.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let steps = read_steps_from_dir(dir.as_ref())?;
        Self::new(steps)
    }

    /// Set a custom name for the step tracking table.
    /// Defaults to "_foundation_step_".
    pub fn with_step_table_name(mut self, name: impl Into<String>) -> Self {
        self.step_table_name = name.into();
        self
    }

    pub fn steps(&self) -> &[SqlStep] {
        &self.steps
    }

    fn calculate_checksum(step: u32, sql_step: &SqlStep) -> String {
        let mut hasher = Sha256::new();
        hasher.update(step.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(sql_step.name.as_bytes());
        hasher.update(b"|");
        hasher.update(sql_step.sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn step_table_exists(&self) -> Result<bool, Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
        let exists = stmt.query([&self.step_table_name])?.next()?.is_some();
        Ok(exists)
    }

    /// The highest step recorded in the step table. 0 if none has been applied.
    pub fn current_step(&self) -> Result<u32, Error> {
        if !self.step_table_exists()? {
            return Ok(0);
        }
        let step: Option<u32> = self.conn.query_row(
            &format!("SELECT MAX(step) FROM {}", self.step_table_name),
            [],
            |row| row.get(0),
        )?;
        Ok(step.unwrap_or(0))
    }

    /// Every step recorded in the step table, ordered by step.
    pub fn applied_steps(&self) -> Result<Vec<AppliedStep>, Error> {
        if !self.step_table_exists()? {
            return Ok(vec![]);
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT step, name, applied_at, checksum FROM {} ORDER BY step",
            self.step_table_name
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(step, name, applied_at, checksum)| {
                let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                    .map_err(|e| {
                        Error::Generic(format!(
                            "Invalid applied_at '{}' recorded for step {}: {}",
                            applied_at, step, e
                        ))
                    })?
                    .with_timezone(&Utc);
                Ok(AppliedStep {
                    step,
                    name,
                    applied_at,
                    checksum,
                })
            })
            .collect()
    }

    fn apply(&mut self, step: u32) -> Result<(), Error> {
        let sql_step = &self.steps[(step - 1) as usize];

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("script_up", step = step, name = %sql_step.name).entered();

        let tx = self.conn.transaction()?;
        if let Err(e) = tx.execute_batch(&sql_step.sql) {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "Script failed");
            // Transaction will be automatically rolled back when dropped
            return Err(Error::Generic(format!(
                "Step {} ('{}') failed: {}",
                step, sql_step.name, e
            )));
        }
        tx.execute(
            &format!(
                "INSERT INTO {} (step, name, applied_at, checksum) VALUES (?1, ?2, ?3, ?4)",
                self.step_table_name
            ),
            params![
                step,
                sql_step.name,
                Utc::now().to_rfc3339(),
                Self::calculate_checksum(step, sql_step)
            ],
        )?;
        tx.commit()?;

        #[cfg(feature = "tracing")]
        tracing::info!("Script applied");

        Ok(())
    }
}

impl Migrator for SqliteScriptMigrator {
    type Connection = Connection;

    fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn driver_name(&self) -> &str {
        "sqlite3"
    }

    fn setup(&mut self) -> Result<(), Error> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                step INTEGER PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                checksum TEXT NOT NULL
            )",
            self.step_table_name
        ))?;
        Ok(())
    }

    fn migrate_to_step(&mut self, step: u32) -> Result<(), Error> {
        if step as usize > self.steps.len() {
            return Err(Error::Generic(format!(
                "Step {} does not exist. Available steps: 1..={}",
                step,
                self.steps.len()
            )));
        }

        let current = self.current_step()?;
        if step < current {
            return Err(Error::Generic(format!(
                "Cannot migrate down from step {} to step {}",
                current, step
            )));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(current_step = current, target_step = step, "Applying scripts");

        for next in current + 1..=step {
            self.apply(next)?;
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), Error> {
        let tables = {
            let mut stmt = self.conn.prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            )?;
            let tables = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            tables
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(tables = ?tables, "Dropping tables");

        let tx = self.conn.transaction()?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON")?;
        for table in tables {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", table))?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Parse `<step>_<name>.sql`, returning the step and name.
fn parse_file_name(file_name: &str) -> Option<(u32, String)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (step, name) = stem.split_once('_')?;
    let step = step.parse::<u32>().ok()?;
    Some((step, name.to_string()))
}

fn read_steps_from_dir(dir: &Path) -> Result<Vec<SqlStep>, Error> {
    let read_err = |path: &Path, source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    };

    let mut found: Vec<(u32, SqlStep)> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| read_err(dir, e))? {
        let path = entry.map_err(|e| read_err(dir, e))?.path();
        let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            continue;
        }
        let (step, name) = parse_file_name(file_name).ok_or_else(|| {
            Error::Generic(format!(
                "Invalid step file name '{}', expected <step>_<name>.sql",
                file_name
            ))
        })?;
        let sql = std::fs::read_to_string(&path).map_err(|e| read_err(&path, e))?;
        found.push((step, SqlStep::new(name, sql)));
    }
    found.sort_by_key(|(step, _)| *step);

    for (i, (step, _)) in found.iter().enumerate() {
        let expected = (i + 1) as u32;
        if *step == 0 {
            return Err(Error::Generic(
                "Step must be greater than 0, found step 0".to_string(),
            ));
        }
        if i > 0 && found[i - 1].0 == *step {
            return Err(Error::Generic(format!("Duplicate step found: {}", step)));
        }
        if *step != expected {
            return Err(Error::Generic(format!(
                "Steps must be contiguous. Expected step {}, found {}",
                expected, step
            )));
        }
    }

    Ok(found.into_iter().map(|(_, step)| step).collect())
}
