use chrono::NaiveDateTime;
use multisql_core::builder::IN_LIST_LIMIT;
use multisql_core::{
    introspect, Combine, Criterion, Dialect, Entity, Operator, ParameterBinder, Record, Statement,
    StatementBuilder, WhereBuilder,
};

use super::{annotate, Repository};
use crate::driver::Session;
use crate::error::{OrmError, Result};

/// Ids written per staging INSERT.
const STAGING_CHUNK: usize = 500;

fn missing_identity(table: &str) -> OrmError {
    OrmError::Configuration(format!("table '{table}' has no identity column"))
}

impl<E: Entity> Repository<E> {
    async fn query(&mut self, statement: &Statement) -> Result<Vec<E>> {
        let rows = self.fetch(statement).await?;
        Ok(self.hydrate(statement, &rows))
    }

    async fn list_with<F>(&mut self, build: F) -> Result<Vec<E>>
    where
        F: FnOnce(&StatementBuilder) -> Result<Statement>,
    {
        let result: Result<Vec<E>> = async {
            let (_, builder) = self.prepare().await?;
            let statement = build(&builder)?;
            self.query(&statement).await
        }
        .await;
        self.settle(result, Vec::new())
    }

    /// Fills the connection's staging table, runs `join` and empties the
    /// table again, all on one connection. A busy failure restarts the
    /// whole sequence on a fresh connection.
    async fn fetch_staged(&mut self, dialect: Dialect, ids: &[i64], join: &Statement) -> Result<Vec<Record>> {
        let mut statements = vec![
            StatementBuilder::staging_create(),
            StatementBuilder::staging_clear(dialect),
        ];
        statements.extend(StatementBuilder::staging_inserts(ids, STAGING_CHUNK));

        let mut attempt = 1;
        loop {
            match self.staged_once(dialect, &statements, join).await {
                Ok(rows) => return Ok(rows),
                Err(error) if self.retry.should_retry(attempt, &error) => {
                    self.back_off(attempt, &error, false).await;
                    attempt += 1;
                }
                Err(error) => return Err(self.retry.exhausted(error)),
            }
        }
    }

    async fn staged_once(
        &mut self,
        dialect: Dialect,
        statements: &[Statement],
        join: &Statement,
    ) -> Result<Vec<Record>> {
        for statement in statements.iter().chain(std::iter::once(join)) {
            self.echo(statement);
        }
        let conn = self.connections.acquire().await?;
        for statement in statements {
            conn.execute(statement)
                .await
                .map_err(|e| annotate(e.into(), statement))?;
        }
        let rows = conn
            .fetch_all(join)
            .await
            .map_err(|e| annotate(e.into(), join))?;
        let clear = StatementBuilder::staging_clear(dialect);
        conn.execute(&clear)
            .await
            .map_err(|e| annotate(e.into(), &clear))?;
        Ok(rows)
    }

    /// Every row, ordered by identity when the entity has one.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned; other failures are reported
    /// and yield an empty list.
    pub async fn list(&mut self) -> Result<Vec<E>> {
        let identity = E::identity_column().map(|c| c.name);
        self.list_with(|builder| Ok(builder.select_all(identity))).await
    }

    /// Rows matching ad hoc criteria.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned.
    pub async fn list_where(&mut self, criteria: &[Criterion], combine: Combine) -> Result<Vec<E>> {
        let columns = Self::resolve(criteria);
        self.list_with(|builder| Ok(builder.select_where(&columns, combine)?))
            .await
    }

    /// Rows matching the key selection of a sample entity.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned.
    pub async fn list_matching(&mut self, sample: &E) -> Result<Vec<E>> {
        let columns = introspect(sample);
        self.list_with(|builder| Ok(builder.select_by_key(&columns)?))
            .await
    }

    /// Rows whose insertion date lies in `start..end`. Bounds are local
    /// times, converted to UTC when the engine stamps the dates.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entity has no auto insert
    /// date column.
    pub async fn list_date_range(&mut self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<E>> {
        let column = E::columns()
            .iter()
            .find(|c| c.flags.auto_insert_date && !c.flags.ignored)
            .ok_or_else(|| {
                OrmError::Configuration(format!(
                    "table '{}' has no insertion date column",
                    E::TABLE
                ))
            })?;
        self.list_with(|builder| {
            let utc = !builder.context().allow_current_timestamp;
            let criteria = StatementBuilder::date_range_criteria(column.name, start, end, utc);
            Ok(builder.select_where(&Self::resolve(&criteria), Combine::And)?)
        })
        .await
    }

    /// Rows whose identity is in `ids`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entity has no identity.
    pub async fn list_by_ids(&mut self, ids: &[i64]) -> Result<Vec<E>> {
        let identity = E::identity_column().ok_or_else(|| missing_identity(E::TABLE))?;
        self.list_by_ids_in(identity.name, ids).await
    }

    /// Rows whose `field` is in `ids`. Up to 100 ids use an `IN` list,
    /// larger sets go through the staging table.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned.
    pub async fn list_by_ids_in(&mut self, field: &str, ids: &[i64]) -> Result<Vec<E>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let result: Result<Vec<E>> = async {
            let (ctx, builder) = self.prepare().await?;
            if ids.len() <= IN_LIST_LIMIT {
                return self.query(&builder.ids_in_list(field, ids)).await;
            }

            let join = builder.ids_join_staging(field);
            let rows = self.fetch_staged(ctx.dialect, ids, &join).await?;
            Ok(self.hydrate(&join, &rows))
        }
        .await;
        self.settle(result, Vec::new())
    }

    /// Rows returned by caller supplied SQL, with criteria appended as a
    /// WHERE clause.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned.
    pub async fn list_by_sql(
        &mut self,
        sql: &str,
        criteria: &[Criterion],
        combine: Combine,
    ) -> Result<Vec<E>> {
        let columns = Self::resolve(criteria);
        self.list_with(|builder| {
            let predicate = WhereBuilder::new(builder.context()).render(&columns, combine)?;
            Ok(Statement {
                sql: format!("{sql}{}", predicate.sql),
                params: predicate.params,
            })
        })
        .await
    }

    /// Free text search: an integer matches the identity, anything else
    /// matches the description column with "contains". Blank text lists
    /// everything.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entity lacks an identity or
    /// a search column.
    pub async fn search(&mut self, text: &str) -> Result<Vec<E>> {
        let text = text.trim();
        if text.is_empty() {
            return self.list().await;
        }
        let identity = E::identity_column().ok_or_else(|| missing_identity(E::TABLE))?;
        let description = E::search_column().ok_or_else(|| {
            OrmError::Configuration(format!("table '{}' has no search column", E::TABLE))
        })?;

        let criterion = match text.parse::<i64>() {
            Ok(id) => Criterion::new(identity.name, id),
            Err(_) => Criterion::new(description.name, text).with_operator(Operator::Contains),
        };
        self.list_where(&[criterion], Combine::And).await
    }

    /// Rows whose identity lies in `min..=max`, ordered by identity.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entity has no identity.
    pub async fn list_identity_range(&mut self, min: i64, max: i64) -> Result<Vec<E>> {
        let identity = E::identity_column().ok_or_else(|| missing_identity(E::TABLE))?;
        self.list_with(|builder| Ok(builder.select_identity_range(identity.name, min, max)?))
            .await
    }

    /// The row with identity `id`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entity has no identity.
    pub async fn item(&mut self, id: i64) -> Result<Option<E>> {
        let identity = E::identity_column().ok_or_else(|| missing_identity(E::TABLE))?;
        let rows = self
            .list_where(&[Criterion::new(identity.name, id)], Combine::And)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// The single row matching the key selection of a sample. More than one
    /// match is reported as ambiguous and yields `None`.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned.
    pub async fn item_matching(&mut self, sample: &E) -> Result<Option<E>> {
        let columns = introspect(sample);
        let result: Result<Option<E>> = async {
            let (_, builder) = self.prepare().await?;
            let statement = builder.select_by_key(&columns)?;
            let mut rows = self.query(&statement).await?;
            match rows.len() {
                0 | 1 => Ok(rows.pop()),
                count => Err(OrmError::AmbiguousKeyMatch {
                    count,
                    params: statement.dump(),
                }),
            }
        }
        .await;
        self.settle(result, None)
    }

    /// Whether a row matches the key selection of a sample.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned.
    pub async fn exists(&mut self, sample: &E) -> Result<bool> {
        let columns = introspect(sample);
        let result: Result<bool> = async {
            let (_, builder) = self.prepare().await?;
            let statement = builder.select_by_key(&columns)?;
            Ok(!self.fetch(&statement).await?.is_empty())
        }
        .await;
        self.settle(result, false)
    }

    /// Raw rows of caller supplied SQL with positional criteria values.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned.
    pub async fn records(&mut self, sql: &str, params: &[Criterion]) -> Result<Vec<Record>> {
        let columns = Self::resolve(params);
        let result: Result<Vec<Record>> = async {
            let (ctx, _) = self.prepare().await?;
            let statement = Statement {
                sql: sql.to_string(),
                params: ParameterBinder::new(&ctx).bind_all(&columns)?,
            };
            self.fetch(&statement).await
        }
        .await;
        self.settle(result, Vec::new())
    }
}
