use multisql_core::audit::{stamp_insert, stamp_update};
use multisql_core::binder::generate_guids;
use multisql_core::{
    introspect, Combine, Criterion, Entity, ParameterBinder, Statement, StatementBuilder,
};

use super::{Prepared, Repository, RowWork};
use crate::error::Result;

impl<E: Entity> Repository<E> {
    /// Applies prepared work to `entity` and writes generated values back.
    async fn write_one(&mut self, entity: &mut E, prepared: Prepared, refresh: bool) -> Result<bool> {
        let applied = self.apply(&prepared.work).await?;
        let needs_refresh = self.settle_row(entity, &prepared, applied);
        if refresh || needs_refresh {
            self.refresh(entity).await;
        }
        Ok(applied.rows_affected() > 0)
    }

    /// Inserts a row. The generated identity, stamped audit fields and
    /// generated GUIDs are written back into `entity`.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned; other failures are reported
    /// and yield `false`.
    pub async fn insert(&mut self, entity: &mut E) -> Result<bool> {
        let result: Result<bool> = async {
            let (ctx, builder) = self.prepare().await?;
            let audit = self.audit();
            let (statement, inserted) = Self::plan_insert(&builder, &ctx, &audit, &introspect(entity))?;
            let prepared = Prepared {
                work: RowWork::Insert(statement),
                updated: inserted.clone(),
                inserted,
            };
            self.write_one(entity, prepared, ctx.allow_current_timestamp).await
        }
        .await;
        self.settle(result, false)
    }

    /// Updates the row identified by identity or key.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the row cannot be identified.
    pub async fn update(&mut self, entity: &mut E) -> Result<bool> {
        let result: Result<bool> = async {
            let (ctx, builder) = self.prepare().await?;
            let audit = self.audit();
            let mut updated = introspect(entity);
            stamp_update(&mut updated, &ctx, &audit);
            let statement = builder.update(&updated)?;
            let prepared = Prepared {
                work: RowWork::Update(statement),
                inserted: updated.clone(),
                updated,
            };
            self.write_one(entity, prepared, ctx.allow_current_timestamp).await
        }
        .await;
        self.settle(result, false)
    }

    /// Inserts or updates in one transaction: select by key, insert when
    /// nothing matches, update when exactly one row matches. More matches
    /// are reported as [`crate::OrmError::AmbiguousKeyMatch`] and nothing
    /// is written. Backend assigned fields are merged back into `entity`,
    /// leaving its other fields untouched.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the row cannot be identified.
    pub async fn save(&mut self, entity: &mut E) -> Result<bool> {
        let result: Result<bool> = async {
            let (ctx, builder) = self.prepare().await?;
            let audit = self.audit();
            let prepared = Self::plan_save(&builder, &ctx, &audit, &introspect(entity))?;
            self.write_one(entity, prepared, true).await
        }
        .await;
        self.settle(result, false)
    }

    /// Single statement insert-or-update using the dialect's conflict
    /// clause.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the dialect has no upsert or the
    /// entity has nothing to conflict on.
    pub async fn upsert(&mut self, entity: &mut E) -> Result<bool> {
        let result: Result<bool> = async {
            let (ctx, builder) = self.prepare().await?;
            let audit = self.audit();
            let mut inserted = introspect(entity);
            generate_guids(&mut inserted);
            stamp_insert(&mut inserted, &ctx, &audit);
            let statement = builder.upsert(&inserted)?;
            let prepared = Prepared {
                work: RowWork::Upsert(statement),
                updated: inserted.clone(),
                inserted,
            };
            self.write_one(entity, prepared, ctx.allow_current_timestamp).await
        }
        .await;
        self.settle(result, false)
    }

    /// Deletes the row identified by `entity` after checking it exists.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the row cannot be identified.
    pub async fn delete(&mut self, entity: &E) -> Result<bool> {
        let result: Result<bool> = async {
            let (_, builder) = self.prepare().await?;
            let columns = introspect(entity);
            let select = builder.select_by_key(&columns)?;
            let delete = builder.delete_by_key(&columns)?;
            if self.fetch(&select).await?.is_empty() {
                self.events
                    .message(&format!("{}: nothing to delete [{}]", E::TABLE, select.dump()));
                return Ok(false);
            }
            let applied = self.apply(&RowWork::Delete(delete)).await?;
            Ok(applied.rows_affected() > 0)
        }
        .await;
        self.settle(result, false)
    }

    /// Deletes every row matching the criteria. Returns the rows removed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for empty criteria.
    pub async fn delete_where(&mut self, criteria: &[Criterion], combine: Combine) -> Result<u64> {
        let columns = Self::resolve(criteria);
        self.execute_with(|builder| Ok(builder.delete_where(&columns, combine)?))
            .await
    }

    /// `UPDATE ... SET <set> WHERE <criteria>`. Returns the rows changed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for empty SET or WHERE lists.
    pub async fn update_where(
        &mut self,
        set: &[Criterion],
        criteria: &[Criterion],
        combine: Combine,
    ) -> Result<u64> {
        let set = Self::resolve(set);
        let criteria = Self::resolve(criteria);
        self.execute_with(|builder| Ok(builder.update_where(&set, &criteria, combine)?))
            .await
    }

    /// Runs caller supplied SQL with positional parameters. Returns the
    /// rows affected.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned.
    pub async fn execute(&mut self, sql: &str, params: &[Criterion]) -> Result<u64> {
        let columns = Self::resolve(params);
        let sql = sql.to_string();
        self.execute_with(move |builder| {
            Ok(Statement {
                params: ParameterBinder::new(builder.context()).bind_all(&columns)?,
                sql,
            })
        })
        .await
    }

    async fn execute_with<F>(&mut self, build: F) -> Result<u64>
    where
        F: FnOnce(&StatementBuilder) -> Result<Statement>,
    {
        let result: Result<u64> = async {
            let (_, builder) = self.prepare().await?;
            let statement = build(&builder)?;
            Ok(self.run(&statement).await?.rows_affected)
        }
        .await;
        self.settle(result, 0)
    }
}
