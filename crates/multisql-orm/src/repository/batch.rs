//! Chunked bulk writes. Each chunk runs in its own transaction and commits
//! only when every row in it was written; committed chunks stay committed
//! when a later one fails.

use multisql_core::audit::{stamp_insert, stamp_update};
use multisql_core::binder::generate_guids;
use multisql_core::{describe, introspect, ColumnDescriptor, Dialect, Entity, Statement};
use tracing::{debug, info};

use super::{chunk_size, perform, Applied, Prepared, Repository, RowWork};
use crate::error::{OrmError, Result};
use crate::retry::BusyOrLocked;

type Outcome = Option<(Prepared, Applied)>;

/// Attaches the row index to a failure, keeping the statement
/// annotation when there is one.
fn row_failure(row: usize, error: OrmError, work: Option<&RowWork>) -> OrmError {
    match error {
        OrmError::Statement {
            sql,
            params,
            source,
        } => OrmError::ConstraintViolation {
            row,
            sql,
            params,
            source,
        },
        other => {
            let statement = work.map(|w| match w {
                RowWork::Insert(s)
                | RowWork::Update(s)
                | RowWork::Delete(s)
                | RowWork::Upsert(s) => s,
                RowWork::SaveBySelect { select, .. } => select,
            });
            OrmError::ConstraintViolation {
                row,
                sql: statement.map(|s| s.sql.clone()).unwrap_or_default(),
                params: statement.map(Statement::dump).unwrap_or_default(),
                source: Box::new(other),
            }
        }
    }
}

impl<E: Entity> Repository<E> {
    /// Runs planned rows chunk by chunk. The result is aligned with
    /// `plans`; rows of a rolled back chunk yield `None`.
    async fn run_chunks(&mut self, mut plans: Vec<Result<Prepared>>) -> Result<Vec<Outcome>> {
        if let Some(position) = plans
            .iter()
            .position(|p| p.as_ref().is_err_and(OrmError::is_configuration))
        {
            if let Err(error) = plans.swap_remove(position) {
                return Err(error);
            }
        }

        let total = plans.len();
        let size = chunk_size(total);
        let mut outcomes: Vec<Outcome> = Vec::with_capacity(total);
        let mut plans = plans.into_iter();
        let mut offset = 0;

        while offset < total {
            let chunk: Vec<Result<Prepared>> = plans.by_ref().take(size).collect();
            let len = chunk.len();
            outcomes.extend(self.run_chunk(offset, chunk).await);
            offset += len;
        }
        Ok(outcomes)
    }

    /// Runs one chunk, retrying the whole transaction while the database is
    /// busy. Connection and transaction failures are reported and leave
    /// every row of the chunk unwritten.
    async fn run_chunk(&mut self, offset: usize, chunk: Vec<Result<Prepared>>) -> Vec<Outcome> {
        let len = chunk.len();
        let mut prepared = Vec::with_capacity(len);
        let mut failures = Vec::new();
        for (i, plan) in chunk.into_iter().enumerate() {
            match plan {
                Ok(p) => prepared.push(p),
                Err(error) => failures.push(row_failure(offset + i, error, None)),
            }
        }

        if !failures.is_empty() {
            for failure in &failures {
                self.report(failure);
            }
            self.events
                .message(&format!("{}: chunk at row {offset} skipped, {len} row(s) not written", E::TABLE));
            return vec![None; len];
        }

        let mut attempt = 1;
        let (applied, failures) = loop {
            match self.chunk_once(offset, &prepared).await {
                Ok(done) => break done,
                Err(error) if self.retry.should_retry(attempt, &error) => {
                    self.back_off(attempt, &error, true).await;
                    attempt += 1;
                }
                Err(error) => break (None, vec![self.retry.exhausted(error)]),
            }
        };

        for row in offset..offset + len {
            self.events.progress(row + 1);
        }
        for failure in &failures {
            self.report(failure);
        }
        let Some(applied) = applied else {
            self.events.message(&format!(
                "{}: chunk at row {offset} rolled back, {len} row(s) not written",
                E::TABLE
            ));
            return vec![None; len];
        };

        let affected: u64 = applied.iter().map(|a| a.rows_affected()).sum();
        self.events.rows_affected(affected);
        debug!(table = E::TABLE, offset, rows = len, attempt, "chunk committed");
        prepared.into_iter().zip(applied).map(Some).collect()
    }

    /// One transaction over the chunk. Busy failures come back as `Err` so
    /// the caller can retry; row failures roll the chunk back and are
    /// returned alongside `None`.
    async fn chunk_once(
        &mut self,
        offset: usize,
        prepared: &[Prepared],
    ) -> Result<(Option<Vec<Applied>>, Vec<OrmError>)> {
        let conn = self.connections.acquire().await?;
        let mut tx = conn.begin().await?;
        let mut applied = Vec::with_capacity(prepared.len());
        let mut failures = Vec::new();

        for (i, plan) in prepared.iter().enumerate() {
            match perform(&mut tx, &plan.work).await {
                Ok(a) => applied.push(a),
                Err(error) if error.is_busy_or_locked() => {
                    if let Err(e) = tx.rollback().await {
                        debug!(error = %e, "rollback failed");
                    }
                    return Err(error);
                }
                Err(error) => failures.push(row_failure(offset + i, error, Some(&plan.work))),
            }
        }

        if !failures.is_empty() || !applied.iter().all(|a| a.is_effective()) {
            if let Err(e) = tx.rollback().await {
                debug!(error = %e, "rollback failed");
            }
            return Ok((None, failures));
        }
        match tx.commit().await {
            Ok(()) => Ok((Some(applied), failures)),
            Err(e) => {
                let error = OrmError::from(e);
                if error.is_busy_or_locked() {
                    return Err(error);
                }
                Ok((None, vec![row_failure(offset, error, None)]))
            }
        }
    }

    /// Copies generated values of committed rows into the entities.
    async fn settle_rows(&mut self, entities: &mut [E], outcomes: &[Outcome]) -> usize {
        let mut written = 0;
        for (entity, outcome) in entities.iter_mut().zip(outcomes) {
            if let Some((prepared, applied)) = outcome {
                written += 1;
                if self.settle_row(entity, prepared, *applied) {
                    self.refresh(entity).await;
                }
            }
        }
        written
    }

    /// Inserts every entity, writing identities back. Returns the rows
    /// written.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned; failed chunks are reported.
    pub async fn insert_many(&mut self, entities: &mut [E]) -> Result<usize> {
        let result: Result<usize> = async {
            let (ctx, builder) = self.prepare().await?;
            let audit = self.audit();
            let plans: Vec<Result<Prepared>> = entities
                .iter()
                .map(|entity| {
                    let (statement, inserted) =
                        Self::plan_insert(&builder, &ctx, &audit, &introspect(entity))?;
                    Ok(Prepared {
                        work: RowWork::Insert(statement),
                        updated: inserted.clone(),
                        inserted,
                    })
                })
                .collect();
            let outcomes = self.run_chunks(plans).await?;
            Ok(self.settle_rows(entities, &outcomes).await)
        }
        .await;
        self.settle(result, 0)
    }

    /// Updates every entity by identity or key. Returns the rows written.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a row cannot be identified.
    pub async fn update_many(&mut self, entities: &mut [E]) -> Result<usize> {
        let result: Result<usize> = async {
            let (ctx, builder) = self.prepare().await?;
            let audit = self.audit();
            let plans: Vec<Result<Prepared>> = entities
                .iter()
                .map(|entity| {
                    let mut updated = introspect(entity);
                    stamp_update(&mut updated, &ctx, &audit);
                    Ok(Prepared {
                        work: RowWork::Update(builder.update(&updated)?),
                        inserted: updated.clone(),
                        updated,
                    })
                })
                .collect();
            let outcomes = self.run_chunks(plans).await?;
            Ok(self.settle_rows(entities, &outcomes).await)
        }
        .await;
        self.settle(result, 0)
    }

    /// Inserts or updates every entity: one upsert statement per row when
    /// the dialect has one, select-then-write per row otherwise.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a row cannot be identified.
    pub async fn save_many(&mut self, entities: &mut [E]) -> Result<usize> {
        let result: Result<usize> = async {
            let (ctx, builder) = self.prepare().await?;
            let audit = self.audit();
            let native = ctx.dialect != Dialect::Generic
                && !builder.upsert_clause(&describe::<E>()).is_empty();
            info!(table = E::TABLE, rows = entities.len(), native, "saving batch");

            let plans: Vec<Result<Prepared>> = entities
                .iter()
                .map(|entity| {
                    let columns = introspect(entity);
                    if native {
                        let mut inserted = columns;
                        generate_guids(&mut inserted);
                        stamp_insert(&mut inserted, &ctx, &audit);
                        Ok(Prepared {
                            work: RowWork::Upsert(builder.upsert(&inserted)?),
                            updated: inserted.clone(),
                            inserted,
                        })
                    } else {
                        Self::plan_save(&builder, &ctx, &audit, &columns)
                    }
                })
                .collect();
            let outcomes = self.run_chunks(plans).await?;
            Ok(self.settle_rows(entities, &outcomes).await)
        }
        .await;
        self.settle(result, 0)
    }

    /// Deletes every entity by identity or key. Returns the rows removed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a row cannot be identified.
    pub async fn delete_many(&mut self, entities: &[E]) -> Result<usize> {
        let result: Result<usize> = async {
            let (_, builder) = self.prepare().await?;
            let plans: Vec<Result<Prepared>> = entities
                .iter()
                .map(|entity| {
                    let columns = introspect(entity);
                    Ok(Prepared {
                        work: RowWork::Delete(builder.delete_by_key(&columns)?),
                        inserted: Vec::new(),
                        updated: Vec::new(),
                    })
                })
                .collect();
            let outcomes = self.run_chunks(plans).await?;
            Ok(outcomes.iter().filter(|o| o.is_some()).count())
        }
        .await;
        self.settle(result, 0)
    }

    /// Inserts the entities with one multi-row INSERT per chunk. Generated
    /// identities are not read back. Returns the rows written.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned; failed chunks are reported.
    pub async fn bulk_insert(&mut self, entities: &[E]) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        let result: Result<usize> = async {
            let (ctx, builder) = self.prepare().await?;
            let audit = self.audit();
            let rows: Vec<Vec<ColumnDescriptor>> = entities
                .iter()
                .map(|entity| {
                    let mut columns = introspect(entity);
                    generate_guids(&mut columns);
                    stamp_insert(&mut columns, &ctx, &audit);
                    columns
                })
                .collect();

            let size = chunk_size(rows.len());
            let mut written = 0;
            for (index, chunk) in rows.chunks(size).enumerate() {
                let statement = builder.insert_many(chunk)?;
                let work = RowWork::Insert(statement);
                let outcome = self.apply(&work).await;
                match outcome {
                    Ok(applied) if applied.rows_affected() == chunk.len() as u64 => {
                        written += chunk.len();
                        self.events.progress(written);
                    }
                    Ok(applied) => self.events.message(&format!(
                        "{}: chunk {index} wrote {} of {} row(s)",
                        E::TABLE,
                        applied.rows_affected(),
                        chunk.len()
                    )),
                    Err(error) => self.report(&row_failure(index * size, error, Some(&work))),
                }
            }
            Ok(written)
        }
        .await;
        self.settle(result, 0)
    }
}
