//! The repository engine: CRUD orchestration for one entity type over a
//! single managed connection.
//!
//! Configuration errors (missing key, identity or upsert support) are
//! returned as `Err`. Every other failure is annotated with its SQL and
//! parameter dump, sent to the [`EventSink`], remembered as
//! [`Repository::last_error`] and turned into an empty result.

mod batch;
mod read;
mod write;

use std::marker::PhantomData;
use std::sync::Arc;

use multisql_core::audit::{stamp_insert, stamp_update};
use multisql_core::binder::generate_guids;
use multisql_core::key::KeyStrategy;
use multisql_core::{
    introspect, merge_generated, rehydrate, select_key, write_back, AuditContext, ColumnDescriptor,
    CoreError, Criterion, Entity, Record, SqlContext, SqlValue, Statement, StatementBuilder,
};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::connection::ConnectionManager;
use crate::driver::{ExecOutcome, Session};
use crate::error::{OrmError, Result};
use crate::events::{EventSink, TracingSink};
use crate::retry::RetryPolicy;

/// Lists longer than this are split into chunks.
pub const CHUNK_THRESHOLD: usize = 1000;
/// Rows per chunk once a list is split.
pub const CHUNK_SIZE: usize = 200;

/// Chunk length for a list of `len` rows.
#[must_use]
pub const fn chunk_size(len: usize) -> usize {
    if len > CHUNK_THRESHOLD {
        CHUNK_SIZE
    } else if len == 0 {
        1
    } else {
        len
    }
}

/// Work prepared for one row before its transaction starts.
#[derive(Debug, Clone)]
pub(crate) enum RowWork {
    /// Plain INSERT.
    Insert(Statement),
    /// Plain UPDATE.
    Update(Statement),
    /// DELETE.
    Delete(Statement),
    /// Single statement upsert.
    Upsert(Statement),
    /// Select by key, then insert, update or fail on ambiguity.
    SaveBySelect {
        select: Statement,
        insert: Statement,
        update: Option<Statement>,
    },
}

/// What a [`RowWork`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    Inserted(ExecOutcome),
    Updated(ExecOutcome),
    Upserted(ExecOutcome),
    Deleted(ExecOutcome),
    Unchanged,
}

impl Applied {
    pub(crate) const fn rows_affected(self) -> u64 {
        match self {
            Self::Inserted(o) | Self::Updated(o) | Self::Upserted(o) | Self::Deleted(o) => {
                o.rows_affected
            }
            Self::Unchanged => 1,
        }
    }

    /// Whether the row was actually written. An upsert that left the row
    /// as it was still counts.
    pub(crate) const fn is_effective(self) -> bool {
        match self {
            Self::Upserted(_) | Self::Unchanged => true,
            Self::Inserted(o) | Self::Updated(o) | Self::Deleted(o) => o.rows_affected > 0,
        }
    }
}

/// A row's work plus the descriptors stamped for each outcome.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub(crate) work: RowWork,
    pub(crate) inserted: Vec<ColumnDescriptor>,
    pub(crate) updated: Vec<ColumnDescriptor>,
}

fn annotate(error: OrmError, statement: &Statement) -> OrmError {
    error.in_statement(&statement.sql, statement.dump())
}

/// Runs one row's work on a session.
pub(crate) async fn perform<S: Session>(session: &mut S, work: &RowWork) -> Result<Applied> {
    async fn exec<S: Session>(session: &mut S, statement: &Statement) -> Result<ExecOutcome> {
        session
            .execute(statement)
            .await
            .map_err(|e| annotate(e.into(), statement))
    }

    match work {
        RowWork::Insert(statement) => Ok(Applied::Inserted(exec(session, statement).await?)),
        RowWork::Update(statement) => Ok(Applied::Updated(exec(session, statement).await?)),
        RowWork::Delete(statement) => Ok(Applied::Deleted(exec(session, statement).await?)),
        RowWork::Upsert(statement) => Ok(Applied::Upserted(exec(session, statement).await?)),
        RowWork::SaveBySelect {
            select,
            insert,
            update,
        } => {
            let existing = session
                .fetch_all(select)
                .await
                .map_err(|e| annotate(e.into(), select))?;
            match (existing.len(), update) {
                (0, _) => Ok(Applied::Inserted(exec(session, insert).await?)),
                (1, Some(update)) => Ok(Applied::Updated(exec(session, update).await?)),
                (1, None) => Ok(Applied::Unchanged),
                (count, _) => Err(OrmError::AmbiguousKeyMatch {
                    count,
                    params: select.dump(),
                }),
            }
        }
    }
}

/// Repository of one entity type.
pub struct Repository<E: Entity> {
    connections: ConnectionManager,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
    last_error: Option<String>,
    marker: PhantomData<fn() -> E>,
}

impl<E: Entity> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &E::TABLE)
            .field("connections", &self.connections)
            .field("retry", &self.retry)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> Repository<E> {
    /// Repository reporting to `tracing`.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Repository reporting to a custom sink.
    #[must_use]
    pub fn with_sink(config: ConnectionConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            connections: ConnectionManager::new(config),
            events,
            retry: RetryPolicy::default(),
            last_error: None,
            marker: PhantomData,
        }
    }

    /// Replaces the statement retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The connection manager, for resets and diagnostics.
    pub fn connections(&mut self) -> &mut ConnectionManager {
        &mut self.connections
    }

    /// Last reported failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether the connection answers.
    pub async fn is_connected(&mut self) -> bool {
        self.connections.is_connected().await
    }

    async fn prepare(&mut self) -> Result<(SqlContext, StatementBuilder)> {
        let ctx = self.connections.context().await?;
        Ok((ctx, StatementBuilder::for_entity::<E>(ctx)))
    }

    fn audit(&self) -> AuditContext {
        let config = self.connections.config();
        AuditContext::now(config.user.clone(), config.origin())
    }

    fn verbose(&self) -> bool {
        self.connections.config().verbose
    }

    fn report(&mut self, error: &OrmError) {
        self.connections.mark_suspect();
        self.events.error(error);
        self.last_error = Some(error.to_string());
    }

    fn report_core(&mut self, errors: Vec<CoreError>) {
        for error in errors {
            self.report(&OrmError::Core(error));
        }
    }

    /// Turns a failure into `fallback` unless it is a configuration error.
    fn settle<T>(&mut self, result: Result<T>, fallback: T) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(error) if error.is_configuration() => Err(error),
            Err(error) => {
                self.report(&error);
                Ok(fallback)
            }
        }
    }

    fn echo(&self, statement: &Statement) {
        if self.verbose() {
            self.events
                .message(&format!("{} [{}]", statement.sql, statement.dump()));
        }
    }

    /// Waits before the run following `attempt`. Transactional work also
    /// releases the database locks, single statements only reopen the
    /// connection.
    async fn back_off(&mut self, attempt: u32, error: &OrmError, release: bool) {
        warn!(table = E::TABLE, attempt, error = %error, "busy or locked, retrying");
        if release {
            if let Err(e) = self.connections.release_locks().await {
                debug!(error = %e, "releasing locks failed");
            }
        } else {
            self.connections.reset_connection().await;
        }
        tokio::time::sleep(self.retry.delay(attempt)).await;
    }

    /// Runs a query, retrying busy failures with a connection reset.
    async fn fetch(&mut self, statement: &Statement) -> Result<Vec<Record>> {
        self.echo(statement);
        let mut attempt = 1;
        loop {
            let result = match self.connections.acquire().await {
                Ok(conn) => conn.fetch_all(statement).await.map_err(OrmError::from),
                Err(error) => Err(error),
            };
            match result {
                Ok(rows) => return Ok(rows),
                Err(error) if self.retry.should_retry(attempt, &error) => {
                    self.back_off(attempt, &error, false).await;
                    attempt += 1;
                }
                Err(error) => return Err(annotate(self.retry.exhausted(error), statement)),
            }
        }
    }

    /// Runs a statement, retrying busy failures with a connection reset.
    async fn run(&mut self, statement: &Statement) -> Result<ExecOutcome> {
        self.echo(statement);
        let mut attempt = 1;
        loop {
            let result = match self.connections.acquire().await {
                Ok(conn) => conn.execute(statement).await.map_err(OrmError::from),
                Err(error) => Err(error),
            };
            match result {
                Ok(outcome) => {
                    self.events.rows_affected(outcome.rows_affected);
                    return Ok(outcome);
                }
                Err(error) if self.retry.should_retry(attempt, &error) => {
                    self.back_off(attempt, &error, false).await;
                    attempt += 1;
                }
                Err(error) => return Err(annotate(self.retry.exhausted(error), statement)),
            }
        }
    }

    /// Runs one row's work in its own transaction, releasing locks and
    /// retrying while the database is busy.
    async fn apply(&mut self, work: &RowWork) -> Result<Applied> {
        let mut attempt = 1;
        loop {
            let result = self.apply_once(work).await;
            match result {
                Ok(applied) => {
                    self.events.rows_affected(applied.rows_affected());
                    return Ok(applied);
                }
                Err(error) if self.retry.should_retry(attempt, &error) => {
                    self.back_off(attempt, &error, true).await;
                    attempt += 1;
                }
                Err(error) => return Err(self.retry.exhausted(error)),
            }
        }
    }

    async fn apply_once(&mut self, work: &RowWork) -> Result<Applied> {
        let conn = self.connections.acquire().await?;
        let mut tx = conn.begin().await?;
        match perform(&mut tx, work).await {
            Ok(applied) => {
                tx.commit().await?;
                Ok(applied)
            }
            Err(error) => {
                if let Err(e) = tx.rollback().await {
                    debug!(error = %e, "rollback failed");
                }
                Err(error)
            }
        }
    }

    /// Converts rows into entities, reporting conversion failures per row.
    fn hydrate(&mut self, statement: &Statement, records: &[Record]) -> Vec<E> {
        let mut entities = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            let (entity, errors) = rehydrate::<E>(record);
            for error in errors {
                self.report(&OrmError::ConstraintViolation {
                    row,
                    sql: statement.sql.clone(),
                    params: statement.dump(),
                    source: Box::new(OrmError::Core(error)),
                });
            }
            entities.push(entity);
        }
        entities
    }

    /// Maps criteria onto the entity's columns so declared types and
    /// nullability drive binding.
    fn resolve(criteria: &[Criterion]) -> Vec<ColumnDescriptor> {
        criteria
            .iter()
            .cloned()
            .map(|criterion| {
                let mut descriptor = criterion.into_descriptor();
                if let Some(def) = E::columns()
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&descriptor.name))
                {
                    descriptor.column_type = def.column_type;
                    descriptor.nullable = def.nullable();
                }
                descriptor
            })
            .collect()
    }

    /// Prepares the select-then-write work of `save`.
    fn plan_save(
        builder: &StatementBuilder,
        ctx: &SqlContext,
        audit: &AuditContext,
        columns: &[ColumnDescriptor],
    ) -> Result<Prepared> {
        let select = builder.select_by_key(columns)?;
        let (insert, inserted) = Self::plan_insert(builder, ctx, audit, columns)?;
        let mut updated = columns.to_vec();
        stamp_update(&mut updated, ctx, audit);
        let update = if select_key(columns).strategy == KeyStrategy::AllColumns {
            None
        } else {
            Some(builder.update(&updated)?)
        };
        Ok(Prepared {
            work: RowWork::SaveBySelect {
                select,
                insert,
                update,
            },
            inserted,
            updated,
        })
    }

    fn plan_insert(
        builder: &StatementBuilder,
        ctx: &SqlContext,
        audit: &AuditContext,
        columns: &[ColumnDescriptor],
    ) -> Result<(Statement, Vec<ColumnDescriptor>)> {
        let mut stamped = columns.to_vec();
        generate_guids(&mut stamped);
        stamp_insert(&mut stamped, ctx, audit);
        Ok((builder.insert(&stamped, false)?, stamped))
    }

    /// Copies generated values into the caller's entity after a commit.
    ///
    /// Returns whether the row should be re-selected to pick up values the
    /// backend assigned.
    fn settle_row(&mut self, entity: &mut E, prepared: &Prepared, applied: Applied) -> bool {
        let stamped = match applied {
            Applied::Updated(_) => &prepared.updated,
            Applied::Inserted(_) | Applied::Upserted(_) => &prepared.inserted,
            Applied::Deleted(_) | Applied::Unchanged => return false,
        };
        let errors = write_back(entity, stamped);
        self.report_core(errors);

        let identity_known = E::identity_column().map_or(true, |def| {
            introspect(entity)
                .iter()
                .any(|c| c.name == def.name && c.has_generated_value())
        });

        if let (Applied::Inserted(outcome), Some(def)) = (applied, E::identity_column()) {
            if !identity_known {
                if let Some(id) = outcome.last_insert_id.filter(|id| *id > 0) {
                    if let Err(e) = entity.assign(def.name, SqlValue::Int(id)) {
                        self.report_core(vec![e]);
                    }
                    return false;
                }
            }
        }
        matches!(applied, Applied::Upserted(_)) && !identity_known
    }

    /// Re-selects the entity by key and merges backend assigned fields.
    async fn refresh(&mut self, entity: &mut E) {
        let result = self.try_refresh(entity).await;
        if let Err(error) = result {
            self.report(&error);
        }
    }

    async fn try_refresh(&mut self, entity: &mut E) -> Result<()> {
        let (_, builder) = self.prepare().await?;
        let statement = builder.select_by_key(&introspect(entity))?;
        let rows = self.fetch(&statement).await?;
        match rows.as_slice() {
            [record] => {
                let errors = merge_generated(entity, record);
                self.report_core(errors);
                Ok(())
            }
            [] => {
                debug!(table = E::TABLE, "refresh found no row");
                Ok(())
            }
            _ => Err(OrmError::AmbiguousKeyMatch {
                count: rows.len(),
                params: statement.dump(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size() {
        assert_eq!(chunk_size(0), 1);
        assert_eq!(chunk_size(10), 10);
        assert_eq!(chunk_size(1000), 1000);
        assert_eq!(chunk_size(1001), 200);
        assert_eq!(chunk_size(5000), 200);
    }

    #[test]
    fn test_unchanged_counts_as_one_row() {
        assert_eq!(Applied::Unchanged.rows_affected(), 1);
        let outcome = ExecOutcome {
            rows_affected: 2,
            last_insert_id: None,
        };
        assert_eq!(Applied::Updated(outcome).rows_affected(), 2);
    }
}
