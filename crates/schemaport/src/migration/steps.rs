//! Built-in migration steps.
//!
//! Each step's `is_applied` is a live catalog check through
//! [`SchemaOperations`], so re-running after a partial failure picks up
//! exactly where the previous run stopped.

use async_trait::async_trait;
use tracing::info;

use super::recreate::{recreate_table, RecreatePlan};
use super::MigrationStep;
use crate::core::traits::Dialect;
use crate::core::{Column, Index, Table};
use crate::error::{PortError, Result};
use crate::schema_ops::{ddl, SchemaOperations};

/// Creates a table.
#[derive(Debug, Clone)]
pub struct CreateTableStep {
    id: i64,
    description: String,
    table: Table,
}

impl CreateTableStep {
    pub fn new(id: i64, description: impl Into<String>, table: Table) -> Self {
        Self {
            id,
            description: description.into(),
            table,
        }
    }
}

#[async_trait]
impl MigrationStep for CreateTableStep {
    fn id(&self) -> i64 {
        self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_applied(&self, ops: &SchemaOperations) -> Result<bool> {
        ops.has_table(&self.table.name).await
    }

    async fn apply(&self, ops: &SchemaOperations) -> Result<()> {
        ops.create_table_if_absent(&self.table).await?;
        Ok(())
    }

    async fn revert(&self, ops: &SchemaOperations) -> Result<()> {
        ops.drop_table_if_exists(&self.table.name).await?;
        Ok(())
    }
}

/// Adds a column, recreating the table where the engine cannot add it in place.
#[derive(Debug, Clone)]
pub struct AddColumnStep {
    id: i64,
    description: String,
    table: String,
    column: Column,
}

impl AddColumnStep {
    pub fn new(
        id: i64,
        description: impl Into<String>,
        table: impl Into<String>,
        column: Column,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            table: table.into(),
            column,
        }
    }
}

#[async_trait]
impl MigrationStep for AddColumnStep {
    fn id(&self) -> i64 {
        self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_applied(&self, ops: &SchemaOperations) -> Result<bool> {
        ops.has_column(&self.table, &self.column.name).await
    }

    async fn apply(&self, ops: &SchemaOperations) -> Result<()> {
        match ops.add_column_if_absent(&self.table, &self.column).await {
            Ok(_) => Ok(()),
            Err(PortError::RequiresRecreate { .. }) => {
                info!(
                    "Column {}.{} needs a table rebuild on {}",
                    self.table,
                    self.column.name,
                    ops.dialect().name()
                );
                let mut target = ops.load_table(&self.table).await?;
                target.columns.push(self.column.clone());
                recreate_table(ops, self.id, &RecreatePlan::new(target)).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn revert(&self, ops: &SchemaOperations) -> Result<()> {
        if ops.dialect().supports_in_place_constraint_alter() {
            let sql = ddl::drop_column_sql(ops.dialect(), &self.table, &self.column.name);
            ops.execute(&sql).await?;
            return Ok(());
        }
        let mut target = ops.load_table(&self.table).await?;
        target
            .columns
            .retain(|c| !c.name.eq_ignore_ascii_case(&self.column.name));
        recreate_table(ops, self.id, &RecreatePlan::new(target)).await?;
        Ok(())
    }
}

/// Creates an index.
#[derive(Debug, Clone)]
pub struct CreateIndexStep {
    id: i64,
    description: String,
    table: String,
    index: Index,
}

impl CreateIndexStep {
    pub fn new(
        id: i64,
        description: impl Into<String>,
        table: impl Into<String>,
        index: Index,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            table: table.into(),
            index,
        }
    }
}

#[async_trait]
impl MigrationStep for CreateIndexStep {
    fn id(&self) -> i64 {
        self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_applied(&self, ops: &SchemaOperations) -> Result<bool> {
        ops.has_index(&self.table, &self.index.name).await
    }

    async fn apply(&self, ops: &SchemaOperations) -> Result<()> {
        ops.create_index_if_absent(&self.table, &self.index).await?;
        Ok(())
    }

    async fn revert(&self, ops: &SchemaOperations) -> Result<()> {
        ops.drop_index_if_exists(&self.table, &self.index.name)
            .await?;
        Ok(())
    }
}

/// Drops an index; reverting recreates it from the stored definition.
#[derive(Debug, Clone)]
pub struct DropIndexStep {
    id: i64,
    description: String,
    table: String,
    index: Index,
}

impl DropIndexStep {
    pub fn new(
        id: i64,
        description: impl Into<String>,
        table: impl Into<String>,
        index: Index,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            table: table.into(),
            index,
        }
    }
}

#[async_trait]
impl MigrationStep for DropIndexStep {
    fn id(&self) -> i64 {
        self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_applied(&self, ops: &SchemaOperations) -> Result<bool> {
        Ok(!ops.has_index(&self.table, &self.index.name).await?)
    }

    async fn apply(&self, ops: &SchemaOperations) -> Result<()> {
        ops.drop_index_if_exists(&self.table, &self.index.name)
            .await?;
        Ok(())
    }

    async fn revert(&self, ops: &SchemaOperations) -> Result<()> {
        ops.create_index_if_absent(&self.table, &self.index).await?;
        Ok(())
    }
}

/// Rebuilds a table with a new definition, preserving its rows.
///
/// Applied once the live table's primary key, columns and foreign keys match
/// the new definition.
#[derive(Debug, Clone)]
pub struct RecreateTableStep {
    id: i64,
    description: String,
    plan: RecreatePlan,
    previous: Option<Table>,
}

impl RecreateTableStep {
    pub fn new(id: i64, description: impl Into<String>, plan: RecreatePlan) -> Self {
        Self {
            id,
            description: description.into(),
            plan,
            previous: None,
        }
    }

    /// Definition to rebuild to on revert.
    pub fn with_previous(mut self, previous: Table) -> Self {
        self.previous = Some(previous);
        self
    }
}

#[async_trait]
impl MigrationStep for RecreateTableStep {
    fn id(&self) -> i64 {
        self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_applied(&self, ops: &SchemaOperations) -> Result<bool> {
        if !ops.has_table(&self.plan.target.name).await? {
            return Ok(false);
        }
        let live = ops.load_table(&self.plan.target.name).await?;
        Ok(definition_matches(&live, &self.plan.target))
    }

    async fn apply(&self, ops: &SchemaOperations) -> Result<()> {
        if !ops.has_table(&self.plan.target.name).await? {
            // Nothing to preserve: a crash after the drop left no table behind.
            ops.create_table_if_absent(&self.plan.target).await?;
            return Ok(());
        }
        recreate_table(ops, self.id, &self.plan).await?;
        Ok(())
    }

    async fn revert(&self, ops: &SchemaOperations) -> Result<()> {
        let Some(previous) = &self.previous else {
            return Err(PortError::Config(format!(
                "Migration step {} has no previous definition to revert to",
                self.id
            )));
        };
        recreate_table(ops, self.id, &RecreatePlan::new(previous.clone())).await?;
        Ok(())
    }
}

/// True when `live` has the key, columns and foreign keys `target` declares.
pub fn definition_matches(live: &Table, target: &Table) -> bool {
    let same_key = live.primary_key.len() == target.primary_key.len()
        && live
            .primary_key
            .iter()
            .zip(&target.primary_key)
            .all(|(a, b)| a.eq_ignore_ascii_case(b));

    // Engines disagree on whether key columns report NOT NULL; only compare the rest.
    let columns_match = target.columns.iter().all(|want| {
        let keyed = target
            .primary_key
            .iter()
            .any(|k| k.eq_ignore_ascii_case(&want.name));
        live.find_column(&want.name)
            .is_some_and(|have| keyed || have.is_nullable == want.is_nullable)
    });

    let fks_match = target.foreign_keys.iter().all(|want| {
        live.foreign_keys.iter().any(|have| {
            have.ref_table.eq_ignore_ascii_case(&want.ref_table)
                && have.columns.len() == want.columns.len()
                && have
                    .columns
                    .iter()
                    .zip(&want.columns)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
        })
    });

    same_key && columns_match && fks_match
}
