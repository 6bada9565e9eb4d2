//! The step orchestrator: [Foundation].

use crate::error::Error;
use crate::migrator::{Execute, Migrator};
use std::collections::BTreeMap;
use std::path::Path;

/// Logic bound to a step, run right after the schema reaches that step.
///
/// It receives the migrator's live connection, typically to seed fixture data
/// that later steps are expected to transform.
pub type Interceptor<C> = Box<dyn FnMut(&mut C) -> Result<(), Error>>;

/// Interceptors keyed by the step they are bound to.
pub type Interceptors<C> = BTreeMap<u32, Interceptor<C>>;

/// Drives a [Migrator] forward through numbered steps, pausing at every step
/// that has an [Interceptor] registered.
///
/// # Example
///
/// ```
/// # #[cfg(not(feature = "sqlite"))]
/// # fn main() {}
/// # #[cfg(feature = "sqlite")]
/// # fn main() -> Result<(), foundation::Error> {
/// use foundation::sqlite::{SqlStep, SqliteScriptMigrator};
/// use foundation::{Foundation, Interceptors};
/// use rusqlite::Connection;
///
/// let migrator = SqliteScriptMigrator::new(vec![
///     SqlStep::new("create_users", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"),
///     SqlStep::new("add_email", "ALTER TABLE users ADD COLUMN email TEXT"),
///     SqlStep::new(
///         "backfill_email",
///         "UPDATE users SET email = lower(name) || '@example.com'",
///     ),
/// ])?;
///
/// let mut interceptors: Interceptors<Connection> = Interceptors::new();
/// interceptors.insert(
///     1,
///     Box::new(|conn: &mut Connection| -> Result<(), foundation::Error> {
///         conn.execute("INSERT INTO users (name) VALUES ('Alice')", [])?;
///         Ok(())
///     }),
/// );
///
/// let mut foundation = Foundation::new(migrator)?.register_interceptors(interceptors);
/// foundation.migrate_to_step(3)?;
///
/// let email: String =
///     foundation
///         .db()
///         .query_row("SELECT email FROM users", [], |row| row.get(0))?;
/// assert_eq!(email, "alice@example.com");
///
/// foundation.teardown()?;
/// # Ok(())
/// # }
/// ```
pub struct Foundation<M: Migrator> {
    migrator: M,
    driver_name: String,
    current_step: u32,
    step_by_step: bool,
    interceptors: Interceptors<M::Connection>,
}

// Manual Debug impl since closures don't implement Debug
impl<M: Migrator + std::fmt::Debug> std::fmt::Debug for Foundation<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Foundation")
            .field("migrator", &self.migrator)
            .field("driver_name", &self.driver_name)
            .field("current_step", &self.current_step)
            .field("step_by_step", &self.step_by_step)
            .field(
                "interceptors",
                &self.interceptors.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<M: Migrator> Foundation<M> {
    /// Create a new Foundation, running the migrator's setup.
    ///
    /// The schema starts at step 0 with step-by-step mode off and no interceptors.
    pub fn new(mut migrator: M) -> Result<Self, Error> {
        if let Err(e) = migrator.setup() {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "Migrator setup failed");
            return Err(Error::Setup {
                source: Box::new(e),
            });
        }

        let driver_name = migrator.driver_name().to_string();

        #[cfg(feature = "tracing")]
        tracing::debug!(driver = %driver_name, "Migrator set up");

        Ok(Self {
            migrator,
            driver_name,
            current_step: 0,
            step_by_step: false,
            interceptors: Interceptors::new(),
        })
    }

    /// Replace all registered interceptors.
    pub fn register_interceptors(mut self, interceptors: Interceptors<M::Connection>) -> Self {
        self.replace_interceptors(interceptors);
        self
    }

    /// Replace all registered interceptors on a Foundation that is already in use.
    ///
    /// Only steps above [Foundation::current_step] can still be intercepted.
    pub fn replace_interceptors(&mut self, interceptors: Interceptors<M::Connection>) -> &mut Self {
        self.interceptors = interceptors;
        self
    }

    /// When enabled, the migrator is asked to advance one step per call instead
    /// of jumping straight to the next checkpoint.
    pub fn set_step_by_step(mut self, step_by_step: bool) -> Self {
        self.step_by_step = step_by_step;
        self
    }

    /// The last step the migrator successfully reached. 0 before any migration.
    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub fn is_step_by_step(&self) -> bool {
        self.step_by_step
    }

    /// The driver name reported by the migrator at construction.
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Steps that currently have an interceptor, in ascending order.
    pub fn interceptor_steps(&self) -> Vec<u32> {
        self.interceptors.keys().copied().collect()
    }

    pub fn migrator(&self) -> &M {
        &self.migrator
    }

    pub fn migrator_mut(&mut self) -> &mut M {
        &mut self.migrator
    }

    /// The next step to stop at on the way to `target`: the first step above the
    /// current one that has an interceptor, or `target` itself if no such step
    /// exists at or below `target`.
    ///
    /// When `target` is not above the current step, `target` is returned unchanged.
    pub fn next_checkpoint(&self, target: u32) -> u32 {
        if self.current_step >= target {
            return target;
        }

        self.interceptors
            .range(self.current_step + 1..=target)
            .next()
            .map(|(step, _)| *step)
            .unwrap_or(target)
    }

    /// Migrate up to `target`, running every interceptor registered at a step
    /// in `(current_step, target]` once the schema reaches that step.
    ///
    /// Requesting the current step does nothing. Requesting a lower step fails
    /// with [Error::DowngradeUnsupported].
    pub fn migrate_to_step(&mut self, target: u32) -> Result<&mut Self, Error> {
        if target == self.current_step {
            #[cfg(feature = "tracing")]
            tracing::debug!(step = target, "Already at requested step");
            return Ok(self);
        }

        if target < self.current_step {
            #[cfg(feature = "tracing")]
            tracing::error!(
                current_step = self.current_step,
                target_step = target,
                "Down migrations are not supported"
            );
            return Err(Error::DowngradeUnsupported {
                current: self.current_step,
                target,
            });
        }

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "migrate_to_step",
            from = self.current_step,
            to = target,
            driver = %self.driver_name
        )
        .entered();

        // nothing to stop at on the way, go straight to the target
        if self.interceptors.is_empty() {
            self.advance_to(target)?;
            return Ok(self);
        }

        while self.current_step < target {
            let checkpoint = self.next_checkpoint(target);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                current_step = self.current_step,
                checkpoint = checkpoint,
                "Advancing to next checkpoint"
            );

            self.advance_to(checkpoint)?;

            if let Some(interceptor) = self.interceptors.get_mut(&checkpoint) {
                #[cfg(feature = "tracing")]
                tracing::info!(step = checkpoint, "Running interceptor");

                if let Err(e) = interceptor(self.migrator.connection()) {
                    #[cfg(feature = "tracing")]
                    tracing::error!(step = checkpoint, error = %e, "Interceptor failed");
                    return Err(Error::Interceptor {
                        step: checkpoint,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(self)
    }

    /// Ask the migrator to reach `step`, without looking at interceptors, and
    /// record how far it got.
    fn advance_to(&mut self, step: u32) -> Result<(), Error> {
        let result = if self.step_by_step {
            self.advance_one_by_one(step)
        } else {
            self.migrator
                .migrate_to_step(step)
                .map(|()| self.current_step = step)
        };

        match result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::info!(step = step, "Reached step");
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    step = step,
                    current_step = self.current_step,
                    error = %e,
                    "Migration failed"
                );
                Err(Error::Migration {
                    step,
                    source: Box::new(e),
                })
            }
        }
    }

    fn advance_one_by_one(&mut self, step: u32) -> Result<(), Error> {
        while self.current_step < step {
            self.migrator.migrate_to_step(self.current_step + 1)?;
            self.current_step += 1;
        }
        Ok(())
    }

    /// Tear the migrator down and hand it back.
    ///
    /// This is never done implicitly; dropping a Foundation leaves the
    /// migrator's resources to its own `Drop`.
    pub fn teardown(mut self) -> Result<M, Error> {
        if let Err(e) = self.migrator.teardown() {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "Migrator teardown failed");
            return Err(Error::Teardown {
                source: Box::new(e),
            });
        }
        Ok(self.migrator)
    }

    /// The live database connection.
    pub fn db(&mut self) -> &mut M::Connection {
        self.migrator.connection()
    }

    /// Execute raw SQL against the live connection, e.g. to insert fixtures.
    pub fn exec(&mut self, sql: &str) -> Result<&mut Self, Error> {
        if let Err(e) = self.migrator.connection().execute_batch(sql) {
            return Err(Error::Exec {
                sql: sql.to_string(),
                source: Box::new(e),
            });
        }
        Ok(self)
    }

    /// Read a SQL file and execute its whole contents as one batch.
    pub fn exec_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, Error> {
        let path = path.as_ref();
        let sql = std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(path = %path.display(), "Executing SQL file");

        self.exec(&sql)
    }
}
