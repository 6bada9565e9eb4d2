//! A [Migrator] test double for exercising code built on [Foundation](crate::Foundation)
//! without a database.
//!
//! ```
//! use foundation::testing::{MigratorCall, RecordingMigrator};
//! use foundation::Foundation;
//!
//! # fn main() -> Result<(), foundation::Error> {
//! let mut foundation = Foundation::new(RecordingMigrator::new())?.set_step_by_step(true);
//! foundation.migrate_to_step(2)?;
//!
//! let migrator = foundation.teardown()?;
//! assert_eq!(
//!     migrator.calls(),
//!     &[
//!         MigratorCall::Setup,
//!         MigratorCall::MigrateToStep(1),
//!         MigratorCall::MigrateToStep(2),
//!         MigratorCall::Teardown,
//!     ]
//! );
//! # Ok(())
//! # }
//! ```

use crate::error::Error;
use crate::migrator::{Execute, Migrator};

/// A call received by a [RecordingMigrator].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigratorCall {
    Setup,
    MigrateToStep(u32),
    Teardown,
}

/// Connection handed out by [RecordingMigrator]. Records executed SQL instead of running it.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    step: u32,
    statements: Vec<String>,
    fail_execute: bool,
}

impl RecordingConnection {
    /// The step the owning migrator last reached.
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Every SQL batch executed so far, in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

impl Execute for RecordingConnection {
    fn execute_batch(&mut self, sql: &str) -> Result<(), Error> {
        if self.fail_execute {
            return Err(Error::Generic("execute failed in recorder".to_string()));
        }
        self.statements.push(sql.to_string());
        Ok(())
    }
}

/// A [Migrator] that records its calls and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingMigrator {
    calls: Vec<MigratorCall>,
    connection: RecordingConnection,
    fail_setup: bool,
    fail_at_step: Option<u32>,
    fail_teardown: bool,
}

impl RecordingMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make [Migrator::setup] fail.
    pub fn fail_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    /// Make any [Migrator::migrate_to_step] call that would reach or pass `step` fail.
    pub fn fail_at_step(mut self, step: u32) -> Self {
        self.fail_at_step = Some(step);
        self
    }

    /// Make [Migrator::teardown] fail.
    pub fn fail_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    /// Make every SQL batch executed on the connection fail.
    pub fn fail_execute(mut self) -> Self {
        self.connection.fail_execute = true;
        self
    }

    /// Every call received so far, in order. Failed calls are included.
    pub fn calls(&self) -> &[MigratorCall] {
        &self.calls
    }

    pub fn connection_ref(&self) -> &RecordingConnection {
        &self.connection
    }
}

impl Migrator for RecordingMigrator {
    type Connection = RecordingConnection;

    fn connection(&mut self) -> &mut RecordingConnection {
        &mut self.connection
    }

    fn driver_name(&self) -> &str {
        "recording"
    }

    fn setup(&mut self) -> Result<(), Error> {
        self.calls.push(MigratorCall::Setup);
        if self.fail_setup {
            return Err(Error::Generic("setup failed".to_string()));
        }
        Ok(())
    }

    fn migrate_to_step(&mut self, step: u32) -> Result<(), Error> {
        self.calls.push(MigratorCall::MigrateToStep(step));
        if let Some(failing) = self.fail_at_step {
            if self.connection.step < failing && step >= failing {
                return Err(Error::Generic(format!(
                    "migration to step {} failed in recorder",
                    step
                )));
            }
        }
        self.connection.step = step;
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), Error> {
        self.calls.push(MigratorCall::Teardown);
        if self.fail_teardown {
            return Err(Error::Generic("teardown failed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let mut migrator = RecordingMigrator::new();
        migrator.setup().unwrap();
        migrator.migrate_to_step(3).unwrap();
        migrator.teardown().unwrap();
        assert_eq!(
            migrator.calls(),
            &[
                MigratorCall::Setup,
                MigratorCall::MigrateToStep(3),
                MigratorCall::Teardown
            ]
        );
        assert_eq!(migrator.connection_ref().step(), 3);
    }

    #[test]
    fn fails_only_when_crossing_failing_step() {
        let mut migrator = RecordingMigrator::new().fail_at_step(4);
        migrator.migrate_to_step(3).unwrap();
        assert!(migrator.migrate_to_step(5).is_err());
        assert_eq!(migrator.connection_ref().step(), 3);
        assert!(migrator.migrate_to_step(4).is_err());
    }
}
