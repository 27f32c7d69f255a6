//! Keeps live tables in line with the declared entities.
//!
//! Reconciliation is additive: missing tables are created, missing columns
//! that can be filled for existing rows are added, and indexes named
//! `IX_<table>_...` follow the entity's declaration. Existing columns are
//! never altered or dropped, and indexes outside the naming convention are
//! left alone. [`SchemaReconciler::recreate_table`] is the only destructive
//! operation and must be called explicitly.

use std::sync::Arc;

use multisql_core::{describe, ColumnDescriptor, Dialect, Entity, IndexDescriptor, SqlContext};
use multisql_orm::{ConnectionConfig, ConnectionManager, EventSink, Session, TracingSink};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dialect::{for_dialect, has_default, DdlDialect};
use crate::error::{MigrateError, Result};
use crate::live::{self, LiveIndex};

/// What a reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Table reconciled.
    pub table: String,
    /// The table did not exist and was created.
    pub created: bool,
    /// The table was dropped and created again.
    pub recreated: bool,
    /// DDL issued, in order.
    pub statements: Vec<String>,
    /// Columns added to an existing table.
    pub columns_added: Vec<String>,
    /// Indexes created.
    pub indexes_created: Vec<String>,
    /// Indexes dropped.
    pub indexes_dropped: Vec<String>,
}

impl ReconcileReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    /// Whether nothing was changed.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.statements.is_empty()
    }

    fn merge(&mut self, other: Self) {
        self.created |= other.created;
        self.recreated |= other.recreated;
        self.statements.extend(other.statements);
        self.columns_added.extend(other.columns_added);
        self.indexes_created.extend(other.indexes_created);
        self.indexes_dropped.extend(other.indexes_dropped);
    }
}

/// Declared columns missing from the live table that can be added without
/// rewriting it.
///
/// Keys, identities, auto dates and required columns without a default
/// are skipped.
#[must_use]
pub fn addable_columns<'a>(declared: &'a [ColumnDescriptor], live: &[String]) -> Vec<&'a ColumnDescriptor> {
    declared
        .iter()
        .filter(|c| {
            !(c.flags.ignored
                || c.flags.key
                || c.flags.auto_increment
                || c.flags.is_auto_date())
        })
        .filter(|c| has_default(c))
        .filter(|c| !live.iter().any(|name| name.eq_ignore_ascii_case(&c.name)))
        .collect()
}

/// Index changes for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPlan {
    /// Managed live indexes to drop.
    pub drop: Vec<String>,
    /// Declared indexes to create.
    pub create: Vec<IndexDescriptor>,
}

/// Compares declared indexes with the live ones that follow the naming
/// convention of `table`.
#[must_use]
pub fn plan_indexes(table: &str, desired: &[IndexDescriptor], live: &[LiveIndex]) -> IndexPlan {
    let managed: Vec<&LiveIndex> = live
        .iter()
        .filter(|i| IndexDescriptor::is_managed_name(&i.name, table))
        .collect();
    let matching = |index: &IndexDescriptor| {
        managed
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(&index.name))
            .copied()
    };

    let create = desired
        .iter()
        .filter(|index| matching(index).map_or(true, |l| !index.same_columns(&l.columns)))
        .cloned()
        .collect();
    let drop = managed
        .iter()
        .filter(|l| {
            desired
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(&l.name))
                .map_or(true, |d| !d.same_columns(&l.columns))
        })
        .map(|l| l.name.clone())
        .collect();
    IndexPlan { drop, create }
}

/// Reconciles entity tables against one database.
pub struct SchemaReconciler {
    connections: ConnectionManager,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SchemaReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaReconciler")
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl SchemaReconciler {
    /// Reconciler reporting to `tracing`.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Reconciler reporting to a custom sink.
    #[must_use]
    pub fn with_sink(config: ConnectionConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            connections: ConnectionManager::new(config),
            events,
        }
    }

    /// The connection manager.
    pub fn connections(&mut self) -> &mut ConnectionManager {
        &mut self.connections
    }

    async fn prepare(&mut self) -> Result<(SqlContext, Box<dyn DdlDialect>)> {
        let ddl = for_dialect(self.connections.dialect())?;
        let ctx = self.connections.context().await?;
        Ok((ctx, ddl))
    }

    async fn run_script(&mut self, sql: &str) -> Result<()> {
        debug!(sql, "executing ddl");
        let conn = self.connections.acquire().await?;
        conn.execute_raw(sql)
            .await
            .map_err(|e| MigrateError::from(e).in_script(sql))?;
        Ok(())
    }

    /// Whether `table` exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog cannot be read.
    pub async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let (ctx, ddl) = self.prepare().await?;
        let conn = self.connections.acquire().await?;
        live::table_exists(conn, ddl.as_ref(), &ctx, table).await
    }

    /// Column names of `table`.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog cannot be read.
    pub async fn live_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let (ctx, ddl) = self.prepare().await?;
        let conn = self.connections.acquire().await?;
        live::live_columns(conn, ddl.as_ref(), &ctx, table).await
    }

    /// Indexes of `table`.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog cannot be read.
    pub async fn live_indexes(&mut self, table: &str) -> Result<Vec<LiveIndex>> {
        let (ctx, ddl) = self.prepare().await?;
        let conn = self.connections.acquire().await?;
        live::live_indexes(conn, ddl.as_ref(), &ctx, table).await
    }

    /// Creates the table of `E` when it is missing, otherwise adds missing
    /// columns. Declared indexes are reconciled in both cases.
    ///
    /// # Errors
    ///
    /// Returns an error when a catalog query or DDL statement fails.
    pub async fn ensure_table<E: Entity>(&mut self) -> Result<ReconcileReport> {
        self.events.message(&format!("checking table {}", E::TABLE));
        let mut report = if self.table_exists(E::TABLE).await? {
            self.events.message(&format!("table {} exists", E::TABLE));
            self.reconcile_columns::<E>().await?
        } else {
            self.events.message(&format!("table {} does not exist", E::TABLE));
            self.create_table::<E>().await?
        };
        report.merge(self.reconcile_indexes::<E>().await?);
        Ok(report)
    }

    /// Drops and creates the table of `E`. Every row is lost.
    ///
    /// # Errors
    ///
    /// Returns an error when a DDL statement fails.
    pub async fn recreate_table<E: Entity>(&mut self) -> Result<ReconcileReport> {
        let (ctx, ddl) = self.prepare().await?;
        let drop = ddl.drop_table(&ctx, E::TABLE);
        warn!(table = E::TABLE, "dropping table");
        self.events.message(&format!("dropping table {}", E::TABLE));
        self.run_script(&drop).await?;

        let mut report = ReconcileReport::new(E::TABLE);
        report.recreated = true;
        report.statements.push(drop);
        report.merge(self.create_table::<E>().await?);
        report.merge(self.reconcile_indexes::<E>().await?);
        Ok(report)
    }

    async fn create_table<E: Entity>(&mut self) -> Result<ReconcileReport> {
        let (ctx, ddl) = self.prepare().await?;
        let columns = describe::<E>();
        let mut report = ReconcileReport::new(E::TABLE);

        let create = ddl.create_table(&ctx, E::TABLE, &columns);
        self.run_script(&create).await?;
        report.statements.push(create);
        report.created = true;

        if !self.table_exists(E::TABLE).await? {
            return Err(MigrateError::Configuration(format!(
                "table {} was not created",
                E::TABLE
            )));
        }
        info!(table = E::TABLE, "table created");
        self.events.message(&format!("table {} created", E::TABLE));

        if ctx.dialect == Dialect::MySql && !ctx.allow_current_timestamp {
            let suffix = chrono::Local::now().format("%Y%m%d%H%M").to_string();
            for trigger in ddl.date_triggers(&ctx, E::TABLE, &columns, &suffix) {
                self.run_script(&trigger).await?;
                report.statements.push(trigger);
            }
        }
        Ok(report)
    }

    /// Adds declared columns missing from the live table, in one
    /// transaction. Columns that cannot be added to a populated table are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog cannot be read or the batch fails.
    /// A failed batch is rolled back.
    pub async fn reconcile_columns<E: Entity>(&mut self) -> Result<ReconcileReport> {
        let (ctx, ddl) = self.prepare().await?;
        let live = self.live_columns(E::TABLE).await?;
        let declared = describe::<E>();
        let missing = addable_columns(&declared, &live);
        let mut report = ReconcileReport::new(E::TABLE);

        if missing.is_empty() {
            self.events.message(&format!("no changes to {}", E::TABLE));
            return Ok(report);
        }

        let statements: Vec<String> = missing
            .iter()
            .map(|c| ddl.add_column(&ctx, E::TABLE, c))
            .collect();
        let names: Vec<String> = missing.iter().map(|c| c.name.clone()).collect();
        self.events
            .message(&format!("columns to add to {}: {}", E::TABLE, names.join(",")));

        let script = format!(
            "{}{}COMMIT;",
            ctx.dialect.begin_transaction(),
            statements.concat()
        );
        if let Err(error) = self.run_script(&script).await {
            let conn = self.connections.acquire().await?;
            if let Err(e) = conn.execute_raw("ROLLBACK;").await {
                debug!(error = %e, "rollback after failed column batch");
            }
            return Err(error);
        }
        info!(table = E::TABLE, columns = ?names, "columns added");
        self.events.message(&format!("table {} altered", E::TABLE));

        report.statements = statements;
        report.columns_added = names;
        Ok(report)
    }

    /// Creates declared indexes that are missing or whose columns changed
    /// and drops convention-named indexes no longer declared. Types that
    /// declare no index and are not marked `#[table(indexes)]` are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog cannot be read or a statement
    /// fails.
    pub async fn reconcile_indexes<E: Entity>(&mut self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::new(E::TABLE);
        if !E::capabilities().declares_indexes {
            return Ok(report);
        }

        let (ctx, ddl) = self.prepare().await?;
        let live = self.live_indexes(E::TABLE).await?;
        let plan = plan_indexes(E::TABLE, &E::indexes(), &live);

        for name in plan.drop {
            let sql = ddl.drop_index(&ctx, E::TABLE, &name);
            self.run_script(&sql).await?;
            self.events.message(&format!("index {name} dropped"));
            report.statements.push(sql);
            report.indexes_dropped.push(name);
        }
        for index in plan.create {
            let sql = ddl.create_index(&ctx, E::TABLE, &index);
            self.run_script(&sql).await?;
            self.events.message(&format!("index {} created", index.name));
            report.statements.push(sql);
            report.indexes_created.push(index.name);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use multisql_core::{ColumnFlags, ColumnType};

    use super::*;
    use crate::dialect::test_support::{column, flagged};

    fn live(name: &str, columns: &[&str]) -> LiveIndex {
        LiveIndex {
            name: name.to_string(),
            columns: columns.iter().map(ToString::to_string).collect(),
            unique: false,
        }
    }

    #[test]
    fn test_one_nullable_column_is_added() {
        let declared = vec![
            column("Nome", ColumnType::String, true),
            column("Obs", ColumnType::String, true),
        ];
        let added = addable_columns(&declared, &[String::from("nome")]);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name, "Obs");
    }

    #[test]
    fn test_required_column_without_default_is_skipped() {
        let declared = vec![column("Quantidade", ColumnType::Int, false)];
        assert!(addable_columns(&declared, &[]).is_empty());

        let mut defaulted = column("Quantidade", ColumnType::Int, false);
        defaulted.default = Some(String::from("0"));
        assert_eq!(addable_columns(&[defaulted], &[]).len(), 1);
    }

    #[test]
    fn test_keys_identities_and_dates_are_skipped() {
        let nullable = |flags| {
            let mut c = flagged("C", ColumnType::Date, flags);
            c.nullable = true;
            c
        };
        let declared = vec![
            nullable(ColumnFlags {
                key: true,
                ..ColumnFlags::NONE
            }),
            nullable(ColumnFlags {
                auto_increment: true,
                ..ColumnFlags::NONE
            }),
            nullable(ColumnFlags {
                auto_insert_date: true,
                ..ColumnFlags::NONE
            }),
            nullable(ColumnFlags {
                ignored: true,
                ..ColumnFlags::NONE
            }),
        ];
        assert!(addable_columns(&declared, &[]).is_empty());
    }

    #[test]
    fn test_plan_indexes() {
        let desired = vec![
            IndexDescriptor::new("IX_Cliente_Nome", ["Nome"]),
            IndexDescriptor::new("IX_Cliente_Uf", ["Uf", "Cidade"]),
            IndexDescriptor::new("IX_Cliente_Email", ["Email"]),
        ];
        let existing = vec![
            live("IX_Cliente_Nome", &["nome"]),
            live("IX_Cliente_Uf", &["Uf"]),
            live("IX_Cliente_Antigo", &["Fone"]),
            live("sqlite_autoindex_Cliente_1", &["Codigo"]),
            live("UK_Cliente", &["Codigo"]),
        ];

        let plan = plan_indexes("Cliente", &desired, &existing);
        assert_eq!(plan.drop, vec!["IX_Cliente_Uf", "IX_Cliente_Antigo"]);
        assert_eq!(
            plan.create.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            vec!["IX_Cliente_Uf", "IX_Cliente_Email"]
        );
    }

    #[test]
    fn test_report_merge() {
        let mut report = ReconcileReport::new("Cliente");
        assert!(report.is_unchanged());
        let mut other = ReconcileReport::new("Cliente");
        other.created = true;
        other.statements.push(String::from("CREATE TABLE ..."));
        report.merge(other);
        assert!(report.created);
        assert!(!report.is_unchanged());
    }
}
