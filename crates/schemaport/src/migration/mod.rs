//! Versioned schema migrations.
//!
//! A [`Migrator`] runs an ordered catalog of [`MigrationStep`]s against one
//! database. Each step moves through
//! `NotApplied -> Applying -> Applied`, or `Applying -> Failed -> NotApplied`
//! when it errors. Nothing is recorded for a failed step.
//!
//! Whether a step has been applied is always decided by the step's own live
//! catalog check, on every run. The history ledger is informational only.
//!
//! Runs are assumed single-writer: callers must not run two migrators against
//! the same database at once.

pub mod catalog;
pub mod history;
pub mod recreate;
pub mod steps;
pub mod tenant;

use std::fmt;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::{PortError, Result};
use crate::schema_ops::SchemaOperations;

pub use catalog::{Catalog, StepAction, StepSpec};
pub use history::HistoryEntry;
pub use recreate::{recreate_table, RecreatePlan, RestoreReport, TableSnapshot};
pub use steps::{
    AddColumnStep, CreateIndexStep, CreateTableStep, DropIndexStep, RecreateTableStep,
};
pub use tenant::{Consolidation, TenantRetrofitStep};

/// One versioned schema or data transformation.
///
/// `id` is a globally ordered, monotonically increasing number (a timestamp
/// such as `20240315120000` works well). Once shipped, a step's id and
/// behavior never change.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Ordering key.
    fn id(&self) -> i64;

    /// Human-readable summary.
    fn description(&self) -> &str;

    /// Live check of whether the step's effect is present.
    ///
    /// Must inspect the catalog or data every time; never cache.
    async fn is_applied(&self, ops: &SchemaOperations) -> Result<bool>;

    /// Apply the step.
    async fn apply(&self, ops: &SchemaOperations) -> Result<()>;

    /// Undo the step.
    async fn revert(&self, ops: &SchemaOperations) -> Result<()>;
}

/// Lifecycle state of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    NotApplied,
    Applying,
    Applied,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepState::NotApplied => "not applied",
            StepState::Applying => "applying",
            StepState::Applied => "applied",
            StepState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of one step as reported by [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub id: i64,
    pub description: String,
    pub state: StepState,
    /// When the ledger recorded the step, if it did.
    pub applied_at: Option<String>,
}

/// Outcome of [`Migrator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Steps applied by this run, in order.
    pub applied: Vec<i64>,
    /// Steps found already applied.
    pub skipped: Vec<i64>,
}

/// Applies a migration catalog in id order.
pub struct Migrator {
    steps: Vec<Box<dyn MigrationStep>>,
}

impl Migrator {
    /// Build a migrator over `steps`.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Config`] unless ids are strictly ascending. The
    /// catalog order is a contract and is never re-sorted.
    pub fn new(steps: Vec<Box<dyn MigrationStep>>) -> Result<Self> {
        for pair in steps.windows(2) {
            if pair[1].id() <= pair[0].id() {
                return Err(PortError::Config(format!(
                    "Migration step {} must come after step {}; ids must be strictly ascending",
                    pair[1].id(),
                    pair[0].id()
                )));
            }
        }
        Ok(Self { steps })
    }

    /// Apply every step that is not yet applied, in ascending id order.
    ///
    /// Stops at the first failure, which is returned as
    /// [`PortError::Migration`] carrying the step id.
    pub async fn run(&self, ops: &SchemaOperations) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        for step in &self.steps {
            let id = step.id();
            let applied = step
                .is_applied(ops)
                .await
                .map_err(|e| step_failure(id, e))?;
            if applied {
                report.skipped.push(id);
                continue;
            }

            transition(step.as_ref(), StepState::NotApplied, StepState::Applying);
            match self.apply_one(step.as_ref(), ops).await {
                Ok(()) => {
                    transition(step.as_ref(), StepState::Applying, StepState::Applied);
                    report.applied.push(id);
                }
                Err(e) => {
                    transition(step.as_ref(), StepState::Applying, StepState::Failed);
                    error!("Migration step {} failed: {}", id, e);
                    transition(step.as_ref(), StepState::Failed, StepState::NotApplied);
                    return Err(e);
                }
            }
        }

        info!(
            "Migrations complete: {} applied, {} already applied",
            report.applied.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn apply_one(&self, step: &dyn MigrationStep, ops: &SchemaOperations) -> Result<()> {
        let id = step.id();
        step.apply(ops).await.map_err(|e| step_failure(id, e))?;

        let observed = step
            .is_applied(ops)
            .await
            .map_err(|e| step_failure(id, e))?;
        if !observed {
            return Err(step_failure(
                id,
                PortError::database(format!(
                    "step completed but its effect is not visible in the catalog ({})",
                    step.description()
                )),
            ));
        }

        history::record_applied(ops, id, step.description())
            .await
            .map_err(|e| step_failure(id, e))
    }

    /// Live state of every step, with ledger timestamps where recorded.
    pub async fn status(&self, ops: &SchemaOperations) -> Result<Vec<StepStatus>> {
        let ledger = history::load_history(ops).await?;
        let mut out = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let state = if step.is_applied(ops).await? {
                StepState::Applied
            } else {
                StepState::NotApplied
            };
            out.push(StepStatus {
                id: step.id(),
                description: step.description().to_string(),
                state,
                applied_at: ledger
                    .iter()
                    .find(|e| e.id == step.id())
                    .map(|e| e.applied_at.clone()),
            });
        }
        Ok(out)
    }

    /// Revert applied steps with id greater than `target_id`, newest first.
    ///
    /// Returns the reverted ids.
    pub async fn revert_to(&self, ops: &SchemaOperations, target_id: i64) -> Result<Vec<i64>> {
        let mut reverted = Vec::new();
        for step in self.steps.iter().rev() {
            let id = step.id();
            if id <= target_id {
                break;
            }
            if !step.is_applied(ops).await.map_err(|e| step_failure(id, e))? {
                continue;
            }
            info!("Reverting migration step {}: {}", id, step.description());
            step.revert(ops).await.map_err(|e| step_failure(id, e))?;
            history::forget(ops, id)
                .await
                .map_err(|e| step_failure(id, e))?;
            reverted.push(id);
        }
        Ok(reverted)
    }
}

fn transition(step: &dyn MigrationStep, from: StepState, to: StepState) {
    info!(
        "Migration step {} ({}): {} -> {}",
        step.id(),
        step.description(),
        from,
        to
    );
}

/// Attach a step id to an error, keeping one that already carries it.
fn step_failure(step_id: i64, err: PortError) -> PortError {
    match err {
        PortError::Migration { .. } => err,
        other => PortError::Migration {
            step_id,
            restore_in_progress: false,
            source: Box::new(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, LogicalType, Table};
    use crate::drivers::SqliteConnection;
    use crate::retry::ResilientExecutor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn ops() -> SchemaOperations {
        let conn = SqliteConnection::in_memory().await.unwrap();
        SchemaOperations::new(Arc::new(conn), ResilientExecutor::default())
    }

    fn table(name: &str) -> Table {
        Table::new(name)
            .column(Column::new("id", LogicalType::Integer).not_null())
            .primary_key(["id"])
    }

    /// Claims success without doing anything.
    struct Liar {
        applies: AtomicU32,
    }

    #[async_trait]
    impl MigrationStep for Liar {
        fn id(&self) -> i64 {
            3
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        async fn is_applied(&self, _ops: &SchemaOperations) -> Result<bool> {
            Ok(false)
        }
        async fn apply(&self, _ops: &SchemaOperations) -> Result<()> {
            self.applies.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn revert(&self, _ops: &SchemaOperations) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ids_must_ascend() {
        let steps: Vec<Box<dyn MigrationStep>> = vec![
            Box::new(CreateTableStep::new(2, "b", table("b"))),
            Box::new(CreateTableStep::new(1, "a", table("a"))),
        ];
        assert!(matches!(Migrator::new(steps), Err(PortError::Config(_))));

        let duplicate: Vec<Box<dyn MigrationStep>> = vec![
            Box::new(CreateTableStep::new(1, "a", table("a"))),
            Box::new(CreateTableStep::new(1, "b", table("b"))),
        ];
        assert!(Migrator::new(duplicate).is_err());
    }

    #[tokio::test]
    async fn test_run_is_idempotent_and_recorded() {
        let ops = ops().await;
        let steps: Vec<Box<dyn MigrationStep>> = vec![
            Box::new(CreateTableStep::new(1, "create a", table("a"))),
            Box::new(CreateTableStep::new(2, "create b", table("b"))),
        ];
        let migrator = Migrator::new(steps).unwrap();

        let first = migrator.run(&ops).await.unwrap();
        assert_eq!(first.applied, vec![1, 2]);
        let second = migrator.run(&ops).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped, vec![1, 2]);

        let status = migrator.status(&ops).await.unwrap();
        assert!(status.iter().all(|s| s.state == StepState::Applied));
        assert!(status.iter().all(|s| s.applied_at.is_some()));
    }

    #[tokio::test]
    async fn test_manual_repair_is_detected_live() {
        let ops = ops().await;
        let steps: Vec<Box<dyn MigrationStep>> =
            vec![Box::new(CreateTableStep::new(1, "create a", table("a")))];
        let migrator = Migrator::new(steps).unwrap();
        migrator.run(&ops).await.unwrap();

        // Someone dropped the table by hand; the ledger still says applied.
        ops.drop_table_if_exists("a").await.unwrap();
        let report = migrator.run(&ops).await.unwrap();
        assert_eq!(report.applied, vec![1]);
        assert!(ops.has_table("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_unobservable_step_fails_with_its_id() {
        let ops = ops().await;
        let liar = Liar {
            applies: AtomicU32::new(0),
        };
        let steps: Vec<Box<dyn MigrationStep>> = vec![
            Box::new(CreateTableStep::new(1, "create a", table("a"))),
            Box::new(liar),
        ];
        let migrator = Migrator::new(steps).unwrap();

        let err = migrator.run(&ops).await.unwrap_err();
        match err {
            PortError::Migration {
                step_id,
                restore_in_progress,
                ..
            } => {
                assert_eq!(step_id, 3);
                assert!(!restore_in_progress);
            }
            other => panic!("unexpected error: {}", other),
        }

        let ledger = history::load_history(&ops).await.unwrap();
        assert_eq!(ledger.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_revert_to() {
        let ops = ops().await;
        let steps: Vec<Box<dyn MigrationStep>> = vec![
            Box::new(CreateTableStep::new(1, "create a", table("a"))),
            Box::new(CreateTableStep::new(2, "create b", table("b"))),
            Box::new(CreateTableStep::new(3, "create c", table("c"))),
        ];
        let migrator = Migrator::new(steps).unwrap();
        migrator.run(&ops).await.unwrap();

        let reverted = migrator.revert_to(&ops, 1).await.unwrap();
        assert_eq!(reverted, vec![3, 2]);
        assert!(ops.has_table("a").await.unwrap());
        assert!(!ops.has_table("b").await.unwrap());

        let status = migrator.status(&ops).await.unwrap();
        assert_eq!(status[1].state, StepState::NotApplied);
        assert_eq!(status[1].applied_at, None);
    }
}
