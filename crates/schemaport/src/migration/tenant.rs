//! Multi-tenant retrofit.
//!
//! Adds a tenant column to a table that predates multi-tenancy, assigns every
//! existing row to one tenant and, optionally, extends the primary key with the
//! tenant column.
//!
//! Existing rows are only ever assigned to a single tenant. Which tenant is
//! decided as follows:
//! 1. No registry table, or an empty one: the configured default tenant.
//! 2. A registry with exactly one tenant: that tenant.
//! 3. A registry with several tenants: the explicit consolidation target,
//!    taken from the step definition or from the `tenant_consolidation:<table>`
//!    marker. Without one the step fails with [`PortError::TenantAmbiguity`].
//!
//! On SQLite a generated `INTEGER PRIMARY KEY` is the rowid and cannot be
//! part of a composite key without losing id generation. There the key stays
//! as it is and a unique index over `(key, tenant)` is added instead.

use async_trait::async_trait;
use tracing::info;

use super::history::{get_marker, set_marker};
use super::recreate::{recreate_table, RecreatePlan};
use super::MigrationStep;
use crate::config::TenantConfig;
use crate::core::traits::Dialect;
use crate::core::{Column, DefaultValue, Index, LogicalType, SqlValue, Table};
use crate::error::{PortError, Result};
use crate::schema_ops::{ddl, SchemaOperations};

/// Width of text tenant ids.
const TENANT_ID_LENGTH: u32 = 64;

/// Resolution of pre-existing multi-tenant state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Consolidation {
    /// Fail unless a marker records the decision.
    #[default]
    Reject,
    /// Assign every existing row to this tenant.
    AssignAllTo(String),
}

/// Marker name holding the consolidation target for `table`.
pub fn marker_name(table: &str) -> String {
    format!("tenant_consolidation:{}", table)
}

/// Record an explicit consolidation decision for `table`.
pub async fn record_consolidation(ops: &SchemaOperations, table: &str, tenant: &str) -> Result<()> {
    set_marker(ops, &marker_name(table), tenant).await?;
    info!("Recorded consolidation of {} into tenant {}", table, tenant);
    Ok(())
}

/// Retrofits a tenant column onto an existing table.
#[derive(Debug, Clone)]
pub struct TenantRetrofitStep {
    id: i64,
    description: String,
    table: String,
    column: String,
    integer_ids: bool,
    default_tenant: String,
    registry: Option<(String, String)>,
    consolidation: Consolidation,
    composite_key: bool,
}

impl TenantRetrofitStep {
    /// Retrofit `table` with a text `tenant_id` column that joins the primary key.
    pub fn new(
        id: i64,
        description: impl Into<String>,
        table: impl Into<String>,
        default_tenant: impl Into<String>,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            table: table.into(),
            column: "tenant_id".to_string(),
            integer_ids: false,
            default_tenant: default_tenant.into(),
            registry: None,
            consolidation: Consolidation::Reject,
            composite_key: true,
        }
    }

    /// Step configured from the `tenant` section of the configuration.
    pub fn from_config(
        id: i64,
        description: impl Into<String>,
        table: impl Into<String>,
        config: &TenantConfig,
    ) -> Self {
        let mut step = Self::new(id, description, table, config.default_id.clone())
            .column(config.column.clone());
        if let Some(registry) = &config.registry_table {
            step = step.registry(registry.clone(), config.registry_column.clone());
        }
        if let Some(target) = &config.consolidate_to {
            step = step.consolidation(Consolidation::AssignAllTo(target.clone()));
        }
        step
    }

    /// Name of the tenant column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Tenant ids are integers rather than text.
    pub fn integer_ids(mut self) -> Self {
        self.integer_ids = true;
        self
    }

    /// Table and column listing existing tenants.
    pub fn registry(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.registry = Some((table.into(), column.into()));
        self
    }

    pub fn consolidation(mut self, consolidation: Consolidation) -> Self {
        self.consolidation = consolidation;
        self
    }

    /// Whether the tenant column joins the primary key.
    pub fn composite_key(mut self, composite: bool) -> Self {
        self.composite_key = composite;
        self
    }

    fn tenant_column(&self) -> Column {
        if self.integer_ids {
            Column::new(self.column.clone(), LogicalType::Integer).not_null()
        } else {
            Column::new(self.column.clone(), LogicalType::Text)
                .not_null()
                .max_length(TENANT_ID_LENGTH)
        }
    }

    fn tenant_value(&self, tenant: &str) -> Result<SqlValue<'static>> {
        if !self.integer_ids {
            return Ok(SqlValue::text_owned(tenant.to_string()));
        }
        tenant.trim().parse::<i64>().map(SqlValue::Int).map_err(|_| {
            PortError::Config(format!(
                "Tenant id {:?} for {} is not an integer",
                tenant, self.table
            ))
        })
    }

    fn tenant_default(&self, value: &SqlValue<'static>) -> DefaultValue {
        match value {
            SqlValue::Int(v) => DefaultValue::Int(*v),
            other => DefaultValue::Text(other.as_str().unwrap_or_default().to_string()),
        }
    }

    /// Decide which tenant existing rows belong to.
    pub async fn resolve_tenant(&self, ops: &SchemaOperations) -> Result<String> {
        let Some((registry, registry_column)) = &self.registry else {
            return Ok(self.default_tenant.clone());
        };
        if !ops.has_table(registry).await? {
            return Ok(self.default_tenant.clone());
        }

        let d = ops.dialect();
        let sql = format!(
            "SELECT DISTINCT {c} FROM {t} WHERE {c} IS NOT NULL ORDER BY {c}",
            c = d.quote_ident(registry_column),
            t = d.quote_ident(registry)
        );
        let rows = ops.query(&sql).await?;
        let tenants: Vec<String> = (0..rows.len())
            .filter_map(|i| rows.get_string(i, registry_column))
            .collect();

        match tenants.len() {
            0 => Ok(self.default_tenant.clone()),
            1 => Ok(tenants[0].clone()),
            _ => {
                let decision = match &self.consolidation {
                    Consolidation::AssignAllTo(target) => Some(target.clone()),
                    Consolidation::Reject => get_marker(ops, &marker_name(&self.table)).await?,
                };
                match decision {
                    Some(target) if tenants.contains(&target) => Ok(target),
                    Some(target) => Err(PortError::invariant(
                        &self.table,
                        format!(
                            "consolidation target {} is not one of the existing tenants ({})",
                            target,
                            tenants.join(", ")
                        ),
                    )),
                    None => Err(PortError::TenantAmbiguity {
                        table: self.table.clone(),
                        tenants,
                    }),
                }
            }
        }
    }

    /// Unique index standing in for the composite key over a rowid table.
    fn tenant_key_index(&self) -> String {
        format!("ux_{}_{}_key", self.table, self.column)
    }

    /// True when `table` already enforces uniqueness per tenant.
    fn has_tenant_key(&self, table: &Table) -> bool {
        key_contains(&table.primary_key, &self.column)
            || table
                .indexes
                .iter()
                .any(|i| i.is_unique && i.name.eq_ignore_ascii_case(&self.tenant_key_index()))
    }

    async fn apply_in_place(&self, ops: &SchemaOperations, value: &SqlValue<'static>) -> Result<()> {
        let d = ops.dialect();

        match ops.load_table(&self.table).await?.find_column(&self.column) {
            None => {
                // NOT NULL with a default fills existing rows in one statement.
                let column = self
                    .tenant_column()
                    .default_value(self.tenant_default(value));
                ops.add_column_if_absent(&self.table, &column).await?;
                if let Some(sql) = ddl::drop_default_sql(d, &self.table, &self.column) {
                    ops.execute(&sql).await?;
                }
            }
            Some(existing) => {
                self.reject_nulls(ops).await?;
                if existing.is_nullable {
                    if let Some(sql) = ddl::set_not_null_sql(d, &self.table, &self.tenant_column()) {
                        ops.execute(&sql).await?;
                    }
                }
            }
        }

        if self.composite_key {
            let table = ops.load_table(&self.table).await?;
            if !key_contains(&table.primary_key, &self.column) {
                let mut key = table.primary_key.clone();
                key.push(self.column.clone());
                let constraint = ops.primary_key_constraint(&self.table).await?;
                if let Some(sql) =
                    ddl::replace_primary_key_sql(d, &self.table, constraint.as_deref(), &key)
                {
                    ops.execute(&sql).await?;
                }
            }
        }
        Ok(())
    }

    /// An existing tenant column must not hold NULLs; they are never coerced.
    async fn reject_nulls(&self, ops: &SchemaOperations) -> Result<()> {
        let d = ops.dialect();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NULL",
            d.quote_ident(&self.table),
            d.quote_ident(&self.column)
        );
        let nulls = ops.query(&sql).await?.scalar_i64().unwrap_or(0);
        if nulls > 0 {
            return Err(PortError::invariant(
                &self.table,
                format!(
                    "{} rows have NULL {}; assign them a tenant before it can become NOT NULL",
                    nulls, self.column
                ),
            ));
        }
        Ok(())
    }
}

fn key_contains(key: &[String], column: &str) -> bool {
    key.iter().any(|k| k.eq_ignore_ascii_case(column))
}

#[async_trait]
impl MigrationStep for TenantRetrofitStep {
    fn id(&self) -> i64 {
        self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_applied(&self, ops: &SchemaOperations) -> Result<bool> {
        if !ops.has_column(&self.table, &self.column).await? {
            return Ok(false);
        }
        if !self.composite_key {
            return Ok(true);
        }
        let table = ops.load_table(&self.table).await?;
        Ok(self.has_tenant_key(&table))
    }

    async fn apply(&self, ops: &SchemaOperations) -> Result<()> {
        let tenant = self.resolve_tenant(ops).await?;
        let value = self.tenant_value(&tenant)?;

        if ops.dialect().supports_in_place_constraint_alter() {
            self.apply_in_place(ops, &value).await?;
        } else {
            let mut target = ops.load_table(&self.table).await?;
            match target
                .columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(&self.column))
            {
                Some(existing) => existing.is_nullable = false,
                None => target.columns.push(self.tenant_column()),
            }
            if self.composite_key && !self.has_tenant_key(&target) {
                match target.auto_increment_column().map(|c| c.name.clone()) {
                    Some(rowid) => target.indexes.push(
                        Index::new(self.tenant_key_index(), [rowid, self.column.clone()]).unique(),
                    ),
                    None => target.primary_key.push(self.column.clone()),
                }
            }
            let plan = RecreatePlan::new(target).fill(self.column.clone(), value);
            recreate_table(ops, self.id, &plan).await?;
        }

        info!(
            "Assigned existing rows of {} to tenant {}",
            self.table, tenant
        );
        Ok(())
    }

    async fn revert(&self, ops: &SchemaOperations) -> Result<()> {
        let mut target = ops.load_table(&self.table).await?;
        let keyed = key_contains(&target.primary_key, &self.column);
        target
            .primary_key
            .retain(|k| !k.eq_ignore_ascii_case(&self.column));
        target
            .columns
            .retain(|c| !c.name.eq_ignore_ascii_case(&self.column));
        target.indexes.retain(|i| {
            !i.columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&self.column))
        });

        let d = ops.dialect();
        if !d.supports_in_place_constraint_alter() {
            recreate_table(ops, self.id, &RecreatePlan::new(target)).await?;
            return Ok(());
        }

        if keyed && !target.primary_key.is_empty() {
            let constraint = ops.primary_key_constraint(&self.table).await?;
            if let Some(sql) = ddl::replace_primary_key_sql(
                d,
                &self.table,
                constraint.as_deref(),
                &target.primary_key,
            ) {
                ops.execute(&sql).await?;
            }
        }
        let sql = ddl::drop_column_sql(d, &self.table, &self.column);
        ops.execute(&sql).await?;
        Ok(())
    }
}
