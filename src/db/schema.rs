//! Destination tables and how each row type binds to an INSERT.

use std::hash::Hash;

use crate::formats::{BonusRateRow, RateRow};

pub type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

#[cfg(test)]
pub type SqliteQuery<'q> =
    sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// The two destination tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateTable {
    Rates,
    BonusRates,
}

impl RateTable {
    /// Unqualified table name
    pub fn name(self) -> &'static str {
        match self {
            RateTable::Rates => "rates",
            RateTable::BonusRates => "bonus_rates",
        }
    }

    /// Columns in bind order
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            RateTable::Rates => &[
                "gacha_id",
                "item_id",
                "probability",
                "probability_pity",
                "is_rate_up",
                "details_priority",
            ],
            RateTable::BonusRates => &["gacha_id", "pack_id", "probability"],
        }
    }

    /// Columns identifying a row, used as the conflict target
    pub fn key_columns(self) -> &'static [&'static str] {
        match self {
            RateTable::Rates => &["gacha_id", "item_id"],
            RateTable::BonusRates => &["gacha_id", "pack_id"],
        }
    }

    /// Columns overwritten on upsert
    pub fn value_columns(self) -> impl Iterator<Item = &'static str> {
        let keys = self.key_columns();
        self.columns()
            .iter()
            .copied()
            .filter(move |col| !keys.contains(col))
    }
}

impl std::fmt::Display for RateTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A row that can be written to one of the destination tables
pub trait TableRow {
    const TABLE: RateTable;

    type Key: Eq + Hash + std::fmt::Debug;

    fn key(&self) -> Self::Key;

    /// Bind every column, in [`RateTable::columns`] order
    fn bind_postgres<'q>(&self, query: PgQuery<'q>) -> PgQuery<'q>;

    #[cfg(test)]
    fn bind_sqlite<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;
}

impl TableRow for RateRow {
    const TABLE: RateTable = RateTable::Rates;

    type Key = (i64, i64);

    fn key(&self) -> Self::Key {
        (self.gacha_id, self.item_id)
    }

    fn bind_postgres<'q>(&self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(self.gacha_id)
            .bind(self.item_id)
            .bind(self.probability)
            .bind(self.probability_pity)
            .bind(self.is_rate_up)
            .bind(self.details_priority)
    }

    #[cfg(test)]
    fn bind_sqlite<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.gacha_id)
            .bind(self.item_id)
            .bind(self.probability)
            .bind(self.probability_pity)
            .bind(self.is_rate_up)
            .bind(self.details_priority)
    }
}

impl TableRow for BonusRateRow {
    const TABLE: RateTable = RateTable::BonusRates;

    type Key = (i64, i64);

    fn key(&self) -> Self::Key {
        (self.gacha_id, self.pack_id)
    }

    fn bind_postgres<'q>(&self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(self.gacha_id)
            .bind(self.pack_id)
            .bind(self.probability)
    }

    #[cfg(test)]
    fn bind_sqlite<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.gacha_id)
            .bind(self.pack_id)
            .bind(self.probability)
    }
}
