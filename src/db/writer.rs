use anyhow::{Context, Result, anyhow};
use sqlx::Connection as _;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{Connection, quote_ident};
use super::schema::{RateTable, TableRow};
use crate::config::{MAX_BIND_PARAMETERS, QUERY_TIMEOUT};
use crate::formats::{BonusRateRow, RateRow};
use crate::telemetry::TelemetryEvent;

/// How an INSERT treats rows whose key already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Overwrite the existing row's values
    Update,
    /// Keep the existing row
    Ignore,
    /// No conflict clause; the table's constraints decide
    Append,
}

impl ConflictPolicy {
    /// SQL suffix for an INSERT into `table`
    fn clause(self, table: RateTable) -> String {
        match self {
            ConflictPolicy::Update => {
                let target: Vec<String> = table
                    .key_columns()
                    .iter()
                    .map(|col| quote_ident(col))
                    .collect();
                let assignments: Vec<String> = table
                    .value_columns()
                    .map(|col| format!("{0} = EXCLUDED.{0}", quote_ident(col)))
                    .collect();
                format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    target.join(", "),
                    assignments.join(", ")
                )
            }
            ConflictPolicy::Ignore => " ON CONFLICT DO NOTHING".to_string(),
            ConflictPolicy::Append => String::new(),
        }
    }
}

/// Largest batch whose widest row type still fits in one statement
pub fn max_batch_size() -> usize {
    let widest = RateTable::Rates
        .columns()
        .len()
        .max(RateTable::BonusRates.columns().len());
    MAX_BIND_PARAMETERS / widest
}

/// Build a multi-row INSERT: `INSERT INTO t (c1, c2) VALUES ($1, $2), ($3, $4), ...`
pub fn build_insert_sql(
    table_spec: &str,
    table: RateTable,
    row_count: usize,
    policy: ConflictPolicy,
) -> String {
    let columns = table.columns();
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let mut value_groups = Vec::with_capacity(row_count);
    let mut param_idx = 1;
    for _ in 0..row_count {
        let placeholders: Vec<String> = (0..columns.len())
            .map(|_| {
                let placeholder = format!("${}", param_idx);
                param_idx += 1;
                placeholder
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {}{}",
        table_spec,
        column_list.join(", "),
        value_groups.join(", "),
        policy.clause(table)
    )
}

/// Keep one row per key: the last occurrence's values at the first occurrence's position
pub fn collapse_duplicates<R: TableRow>(rows: Vec<R>) -> Vec<R> {
    let mut positions: HashMap<R::Key, usize> = HashMap::with_capacity(rows.len());
    let mut collapsed: Vec<R> = Vec::with_capacity(rows.len());

    for row in rows {
        match positions.entry(row.key()) {
            Entry::Occupied(existing) => collapsed[*existing.get()] = row,
            Entry::Vacant(slot) => {
                slot.insert(collapsed.len());
                collapsed.push(row);
            }
        }
    }

    collapsed
}

/// Rows written by a committed write phase
#[derive(Debug, Default, Clone)]
pub struct WriteSummary {
    pub rates_written: u64,
    pub bonus_rates_written: u64,
    pub batches_written: u64,
}

/// Conflict handling actually applied to each table
#[derive(Debug, Clone, Copy)]
struct WritePlan {
    rates: ConflictPolicy,
    bonus_rates: ConflictPolicy,
}

/// Writes all accumulated rows inside a single transaction
pub struct BatchWriter {
    schema: String,
    batch_size: usize,
    policy: ConflictPolicy,
    telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl BatchWriter {
    pub fn new(
        schema: impl Into<String>,
        batch_size: usize,
        policy: ConflictPolicy,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Self {
        Self {
            schema: schema.into(),
            batch_size,
            policy,
            telemetry_tx,
        }
    }

    /// Write both row sets and commit, or roll back everything on the first error
    pub async fn write_all(
        &self,
        conn: &mut Connection,
        rates: Vec<RateRow>,
        bonus_rates: Vec<BonusRateRow>,
    ) -> Result<WriteSummary> {
        if self.batch_size == 0 {
            return Err(anyhow!("Batch size must be at least 1"));
        }

        let plan = WritePlan {
            rates: self.resolve_policy(conn, RateTable::Rates).await?,
            bonus_rates: self.resolve_policy(conn, RateTable::BonusRates).await?,
        };

        let rates = Self::prepare_rows(rates, plan.rates);
        let bonus_rates = Self::prepare_rows(bonus_rates, plan.bonus_rates);

        let rates_spec = conn.qualified_table_name(&self.schema, RateTable::Rates.name());
        let bonus_spec = conn.qualified_table_name(&self.schema, RateTable::BonusRates.name());

        let _ = self.telemetry_tx.send(TelemetryEvent::WriteStarted {
            rates: rates.len() as u64,
            bonus_rates: bonus_rates.len() as u64,
        });

        match conn {
            Connection::Postgres(pg) => {
                let mut tx = pg.begin().await.context("Failed to begin transaction")?;
                let result = self
                    .write_tables_postgres(
                        &mut tx,
                        plan,
                        (rates_spec.as_str(), rates.as_slice()),
                        (bonus_spec.as_str(), bonus_rates.as_slice()),
                    )
                    .await;
                self.finish(tx, result).await
            }
            #[cfg(test)]
            Connection::Sqlite(sqlite) => {
                let mut tx = sqlite
                    .begin()
                    .await
                    .context("Failed to begin transaction")?;
                let result = self
                    .write_tables_sqlite(
                        &mut tx,
                        plan,
                        (rates_spec.as_str(), rates.as_slice()),
                        (bonus_spec.as_str(), bonus_rates.as_slice()),
                    )
                    .await;
                self.finish(tx, result).await
            }
        }
    }

    async fn write_tables_postgres(
        &self,
        conn: &mut sqlx::PgConnection,
        plan: WritePlan,
        (rates_spec, rates): (&str, &[RateRow]),
        (bonus_spec, bonus_rates): (&str, &[BonusRateRow]),
    ) -> Result<(u64, u64)> {
        let rates_written = self
            .insert_postgres(conn, rates_spec, rates, plan.rates)
            .await?;
        let bonus_rates_written = self
            .insert_postgres(conn, bonus_spec, bonus_rates, plan.bonus_rates)
            .await?;
        Ok((rates_written, bonus_rates_written))
    }

    #[cfg(test)]
    async fn write_tables_sqlite(
        &self,
        conn: &mut sqlx::SqliteConnection,
        plan: WritePlan,
        (rates_spec, rates): (&str, &[RateRow]),
        (bonus_spec, bonus_rates): (&str, &[BonusRateRow]),
    ) -> Result<(u64, u64)> {
        let rates_written = self
            .insert_sqlite(conn, rates_spec, rates, plan.rates)
            .await?;
        let bonus_rates_written = self
            .insert_sqlite(conn, bonus_spec, bonus_rates, plan.bonus_rates)
            .await?;
        Ok((rates_written, bonus_rates_written))
    }

    /// Downgrade to plain inserts when the table has nothing to conflict on
    ///
    /// `update` names its conflict target, so it needs a unique constraint on
    /// exactly the table's key columns. `ignore` is untargeted and works with any.
    async fn resolve_policy(
        &self,
        conn: &mut Connection,
        table: RateTable,
    ) -> Result<ConflictPolicy> {
        let usable = match self.policy {
            ConflictPolicy::Append => return Ok(ConflictPolicy::Append),
            ConflictPolicy::Update => conn
                .has_unique_key(&self.schema, table.name(), table.key_columns())
                .await,
            ConflictPolicy::Ignore => {
                conn.has_unique_constraints(&self.schema, table.name())
                    .await
            }
        }
        .with_context(|| format!("Failed to inspect constraints of table {}", table))?;

        if usable {
            info!(%table, policy = ?self.policy, "table has a matching unique constraint");
            Ok(self.policy)
        } else {
            warn!(
                %table,
                key = ?table.key_columns(),
                policy = ?self.policy,
                "no usable primary key or unique index, conflicting rows will be appended"
            );
            Ok(ConflictPolicy::Append)
        }
    }

    fn prepare_rows<R: TableRow>(rows: Vec<R>, policy: ConflictPolicy) -> Vec<R> {
        if policy != ConflictPolicy::Update {
            return rows;
        }

        let before = rows.len();
        let rows = collapse_duplicates(rows);
        if rows.len() < before {
            info!(
                table = %R::TABLE,
                duplicates = before - rows.len(),
                "collapsed rows sharing a key, last occurrence wins"
            );
        }
        rows
    }

    /// Commit on success; roll back and surface the original error otherwise
    async fn finish<DB: sqlx::Database>(
        &self,
        tx: sqlx::Transaction<'_, DB>,
        result: Result<(u64, u64)>,
    ) -> Result<WriteSummary> {
        match result {
            Ok((rates_written, bonus_rates_written)) => {
                tx.commit().await.context("Failed to commit transaction")?;
                let _ = self.telemetry_tx.send(TelemetryEvent::Committed);
                Ok(WriteSummary {
                    rates_written,
                    bonus_rates_written,
                    batches_written: self.batch_count(rates_written)
                        + self.batch_count(bonus_rates_written),
                })
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback_err);
                }
                let _ = self.telemetry_tx.send(TelemetryEvent::RolledBack);
                Err(e)
            }
        }
    }

    fn batch_count(&self, rows: u64) -> u64 {
        rows.div_ceil(self.batch_size as u64)
    }

    fn send_batch_telemetry(&self, table: RateTable, rows: usize, start: Instant) {
        let _ = self.telemetry_tx.send(TelemetryEvent::BatchWritten {
            table,
            rows: rows as u64,
            duration_ms: start.elapsed().as_millis() as u64,
        });
    }

    /// Describe the failing batch so the error points at real source rows
    fn batch_context<R: TableRow>(batch_number: usize, batch: &[R]) -> String {
        let first_key = batch
            .first()
            .map(|row| format!("{:?}", row.key()))
            .unwrap_or_else(|| "<empty>".to_string());
        format!(
            "Failed to insert batch {} into {} ({} rows, first key {})",
            batch_number,
            R::TABLE,
            batch.len(),
            first_key
        )
    }

    async fn insert_postgres<R: TableRow>(
        &self,
        conn: &mut sqlx::PgConnection,
        table_spec: &str,
        rows: &[R],
        policy: ConflictPolicy,
    ) -> Result<u64> {
        let mut written = 0u64;

        for (idx, batch) in rows.chunks(self.batch_size).enumerate() {
            let start = Instant::now();
            let insert_sql = build_insert_sql(table_spec, R::TABLE, batch.len(), policy);

            let mut query = sqlx::query(&insert_sql);
            for row in batch {
                query = row.bind_postgres(query);
            }

            tokio::time::timeout(QUERY_TIMEOUT, query.execute(&mut *conn))
                .await
                .map_err(|_| {
                    anyhow!(
                        "Query execution timed out after {} seconds",
                        QUERY_TIMEOUT.as_secs()
                    )
                })
                .and_then(|result| result.map_err(anyhow::Error::from))
                .with_context(|| Self::batch_context(idx + 1, batch))?;

            debug!(table = %R::TABLE, batch = idx + 1, rows = batch.len(), "batch inserted");
            self.send_batch_telemetry(R::TABLE, batch.len(), start);
            written += batch.len() as u64;
        }

        Ok(written)
    }

    #[cfg(test)]
    async fn insert_sqlite<R: TableRow>(
        &self,
        conn: &mut sqlx::SqliteConnection,
        table_spec: &str,
        rows: &[R],
        policy: ConflictPolicy,
    ) -> Result<u64> {
        let mut written = 0u64;

        for (idx, batch) in rows.chunks(self.batch_size).enumerate() {
            let start = Instant::now();
            let insert_sql = convert_to_sqlite_placeholders(&build_insert_sql(
                table_spec,
                R::TABLE,
                batch.len(),
                policy,
            ));

            let mut query = sqlx::query(&insert_sql);
            for row in batch {
                query = row.bind_sqlite(query);
            }

            tokio::time::timeout(QUERY_TIMEOUT, query.execute(&mut *conn))
                .await
                .map_err(|_| anyhow!("Query execution timed out"))
                .and_then(|result| result.map_err(anyhow::Error::from))
                .with_context(|| Self::batch_context(idx + 1, batch))?;

            self.send_batch_telemetry(R::TABLE, batch.len(), start);
            written += batch.len() as u64;
        }

        Ok(written)
    }
}

/// Convert Postgres-style placeholders ($1, $2, ...) to SQLite-style (?, ?, ...)
#[cfg(test)]
fn convert_to_sqlite_placeholders(sql: &str) -> String {
    let mut result = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            // Skip the dollar sign and any following digits
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                chars.next();
            }
            result.push('?');
        } else {
            result.push(ch);
        }
    }

    result
}
