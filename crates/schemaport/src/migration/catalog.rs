//! Migration catalogs declared in YAML.
//!
//! ```yaml
//! steps:
//!   - id: 20240101000000
//!     description: create users
//!     kind: create_table
//!     table:
//!       name: users
//!       columns:
//!         - { name: id, logical_type: integer, is_nullable: false, auto_increment: true }
//!         - { name: email, logical_type: text, max_length: 191 }
//!       primary_key: [id]
//!   - id: 20240102000000
//!     description: index emails
//!     kind: create_index
//!     table: users
//!     index: { name: idx_users_email, columns: [{ name: email }], is_unique: true }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{
    AddColumnStep, Consolidation, CreateIndexStep, CreateTableStep, DropIndexStep, MigrationStep,
    Migrator, RecreatePlan, RecreateTableStep, TenantRetrofitStep,
};
use crate::config::TenantConfig;
use crate::core::{Column, DefaultValue, Index, Table};
use crate::error::{PortError, Result};

/// A catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub steps: Vec<StepSpec>,
}

/// One declared step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: i64,
    pub description: String,
    #[serde(flatten)]
    pub action: StepAction,
}

/// What a declared step does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    CreateTable {
        table: Table,
    },
    AddColumn {
        table: String,
        column: Column,
    },
    CreateIndex {
        table: String,
        index: Index,
    },
    DropIndex {
        table: String,
        index: Index,
    },
    RecreateTable {
        table: Table,
        /// Values for columns new to the table, keyed by column name.
        #[serde(default)]
        fill: BTreeMap<String, DefaultValue>,
        /// Definition to restore on revert.
        #[serde(default)]
        previous: Option<Table>,
    },
    TenantRetrofit {
        table: String,
        /// Overrides for the `tenant` configuration section.
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        consolidate_to: Option<String>,
        #[serde(default = "default_composite")]
        composite_key: bool,
        #[serde(default)]
        integer_ids: bool,
    },
}

fn default_composite() -> bool {
    true
}

impl Catalog {
    /// Load a catalog from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a catalog from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Build the executable steps. `tenant` supplies defaults for tenant retrofits.
    pub fn into_steps(self, tenant: Option<&TenantConfig>) -> Result<Vec<Box<dyn MigrationStep>>> {
        self.steps
            .into_iter()
            .map(|spec| spec.into_step(tenant))
            .collect()
    }

    /// Build a [`Migrator`] over the declared steps.
    pub fn into_migrator(self, tenant: Option<&TenantConfig>) -> Result<Migrator> {
        Migrator::new(self.into_steps(tenant)?)
    }
}

impl StepSpec {
    fn into_step(self, tenant: Option<&TenantConfig>) -> Result<Box<dyn MigrationStep>> {
        let StepSpec {
            id,
            description,
            action,
        } = self;

        let step: Box<dyn MigrationStep> = match action {
            StepAction::CreateTable { table } => {
                Box::new(CreateTableStep::new(id, description, table))
            }
            StepAction::AddColumn { table, column } => {
                Box::new(AddColumnStep::new(id, description, table, column))
            }
            StepAction::CreateIndex { table, index } => {
                Box::new(CreateIndexStep::new(id, description, table, index))
            }
            StepAction::DropIndex { table, index } => {
                Box::new(DropIndexStep::new(id, description, table, index))
            }
            StepAction::RecreateTable {
                table,
                fill,
                previous,
            } => {
                let mut plan = RecreatePlan::new(table);
                for (column, value) in fill {
                    let value = value.to_value().ok_or_else(|| {
                        PortError::Config(format!(
                            "step {}: fill value for {} must be a constant",
                            id, column
                        ))
                    })?;
                    plan = plan.fill(column, value);
                }
                let mut step = RecreateTableStep::new(id, description, plan);
                if let Some(previous) = previous {
                    step = step.with_previous(previous);
                }
                Box::new(step)
            }
            StepAction::TenantRetrofit {
                table,
                column,
                consolidate_to,
                composite_key,
                integer_ids,
            } => {
                let defaults = tenant.cloned().unwrap_or_default();
                let mut step = TenantRetrofitStep::from_config(id, description, table, &defaults)
                    .composite_key(composite_key);
                if let Some(column) = column {
                    step = step.column(column);
                }
                if let Some(target) = consolidate_to {
                    step = step.consolidation(Consolidation::AssignAllTo(target));
                }
                if integer_ids {
                    step = step.integer_ids();
                }
                Box::new(step)
            }
        };
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
steps:
  - id: 1
    description: create users
    kind: create_table
    table:
      name: users
      columns:
        - { name: id, logical_type: integer, is_nullable: false }
        - { name: email, logical_type: text, max_length: 191 }
      primary_key: [id]
  - id: 2
    description: index emails
    kind: create_index
    table: users
    index: { name: idx_users_email, columns: [{ name: email }], is_unique: true }
  - id: 3
    description: add status
    kind: add_column
    table: users
    column:
      name: status
      logical_type: text
      is_nullable: false
      default: { kind: text, value: active }
  - id: 4
    description: scope users by tenant
    kind: tenant_retrofit
    table: users
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = Catalog::from_yaml(CATALOG).unwrap();
        assert_eq!(catalog.steps.len(), 4);
        match &catalog.steps[2].action {
            StepAction::AddColumn { column, .. } => {
                assert_eq!(column.default, Some(DefaultValue::Text("active".into())));
            }
            other => panic!("unexpected action {:?}", other),
        }

        let steps = catalog.into_steps(None).unwrap();
        let ids: Vec<i64> = steps.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(steps[3].description(), "scope users by tenant");
    }

    #[test]
    fn test_out_of_order_catalog_is_rejected() {
        let yaml = r#"
steps:
  - { id: 2, description: b, kind: drop_index, table: t, index: { name: i, columns: [] } }
  - { id: 1, description: a, kind: drop_index, table: t, index: { name: j, columns: [] } }
"#;
        let catalog = Catalog::from_yaml(yaml).unwrap();
        assert!(matches!(catalog.into_migrator(None), Err(PortError::Config(_))));
    }

    #[test]
    fn test_fill_must_be_constant() {
        let yaml = r#"
steps:
  - id: 1
    description: rebuild
    kind: recreate_table
    table: { name: t, columns: [{ name: id, logical_type: integer }] }
    fill: { created_at: { kind: expression, value: CURRENT_TIMESTAMP } }
"#;
        let catalog = Catalog::from_yaml(yaml).unwrap();
        assert!(catalog.into_steps(None).is_err());
    }
}
