//! Resumable schema upgrade routine (component I / §9).
//!
//! Grounded in the teacher's `storage::persistence::Storage::restore_backup`
//! (explicit before/after state, rollback on failure), generalized into a
//! step-indexed migration runner: progress is recorded in `META` after each
//! step so a crash mid-upgrade resumes from the last completed step rather
//! than restarting from scratch.

use super::{Store, CURRENT_SCHEMA_VERSION};
use crate::error::StoreError;

/// One migration step, identified by the schema version it produces.
pub trait MigrationStep {
    fn target_version(&self) -> u32;
    fn apply(&self, store: &Store) -> Result<(), StoreError>;
}

/// Runs every registered step whose `target_version` exceeds the store's
/// current schema version, in order, committing progress after each step so
/// the routine is safe to re-invoke after an interrupted run.
pub fn run_upgrades(store: &Store, steps: &[Box<dyn MigrationStep>]) -> Result<(), StoreError> {
    let mut current = store.schema_version()?;
    let mut ordered: Vec<&Box<dyn MigrationStep>> = steps.iter().collect();
    ordered.sort_by_key(|s| s.target_version());

    for step in ordered {
        if step.target_version() <= current {
            continue;
        }
        step.apply(store)?;
        store.set_schema_version(step.target_version())?;
        current = step.target_version();
    }

    if current > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::CommitAborted(format!(
            "store schema version {current} is newer than this build supports ({CURRENT_SCHEMA_VERSION})"
        )));
    }

    Ok(())
}
