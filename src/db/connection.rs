//! Single exclusively-owned connection to the destination store.
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection as _};
use std::str::FromStr;

use crate::config::CONNECT_TIMEOUT;

/// Connection that can be either Postgres or SQLite
pub enum Connection {
    Postgres(PgConnection),
    #[cfg(test)]
    Sqlite(sqlx::SqliteConnection),
}

fn connect_timed_out() -> sqlx::Error {
    sqlx::Error::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!(
            "connection attempt timed out after {}s",
            CONNECT_TIMEOUT.as_secs()
        ),
    ))
}

impl Connection {
    /// Open a connection from a `postgres://` (or `postgresql://`) URL
    ///
    /// Test builds additionally accept `sqlite:` URLs.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        #[cfg(test)]
        if url.starts_with("sqlite:") {
            let conn = tokio::time::timeout(CONNECT_TIMEOUT, sqlx::SqliteConnection::connect(url))
                .await
                .map_err(|_| connect_timed_out())??;
            return Ok(Connection::Sqlite(conn));
        }

        let connect_options = PgConnectOptions::from_str(url)?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, connect_options.connect())
            .await
            .map_err(|_| connect_timed_out())??;

        Ok(Connection::Postgres(conn))
    }

    /// Quoted `"schema"."table"` reference, valid for both backends
    pub fn qualified_table_name(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", quote_ident(schema), quote_ident(table))
    }

    /// Column sets of every primary key, unique constraint and unique index on a table
    ///
    /// Partial and expression indexes are skipped since they cannot serve as a
    /// plain `ON CONFLICT (columns)` target.
    pub async fn unique_keys(
        &mut self,
        schema: &str,
        table_name: &str,
    ) -> Result<Vec<Vec<String>>, sqlx::Error> {
        match self {
            Connection::Postgres(conn) => {
                // Primary keys and unique constraints are backed by unique indexes
                let index_sql = r#"
                    SELECT ARRAY(
                        SELECT a.attname::text
                        FROM unnest(i.indkey::int2[]) AS k(attnum)
                        JOIN pg_attribute a
                          ON a.attrelid = i.indrelid AND a.attnum = k.attnum
                    ) AS columns
                    FROM pg_index i
                    JOIN pg_class t ON i.indrelid = t.oid
                    JOIN pg_namespace n ON t.relnamespace = n.oid
                    WHERE n.nspname = $1
                    AND t.relname = $2
                    AND i.indisunique
                    AND i.indpred IS NULL
                    AND i.indexprs IS NULL
                "#;

                let rows: Vec<(Vec<String>,)> = sqlx::query_as(index_sql)
                    .bind(schema)
                    .bind(table_name)
                    .fetch_all(&mut *conn)
                    .await?;

                Ok(rows.into_iter().map(|(columns,)| columns).collect())
            }
            #[cfg(test)]
            Connection::Sqlite(conn) => {
                let mut keys = Vec::new();

                let pragma_sql = format!(
                    "PRAGMA {}.table_info({})",
                    quote_ident(schema),
                    quote_ident(table_name)
                );
                let mut columns: Vec<(i32, String, String, i32, Option<String>, i32)> =
                    sqlx::query_as(&pragma_sql).fetch_all(&mut *conn).await?;

                // Column 5 is the primary key position (0 = not part of the key)
                columns.retain(|col| col.5 > 0);
                columns.sort_by_key(|col| col.5);
                if !columns.is_empty() {
                    keys.push(columns.into_iter().map(|col| col.1).collect());
                }

                let index_sql = format!(
                    "PRAGMA {}.index_list({})",
                    quote_ident(schema),
                    quote_ident(table_name)
                );
                let indexes: Vec<(i32, String, i32, String, i32)> =
                    sqlx::query_as(&index_sql).fetch_all(&mut *conn).await?;

                // Columns 2 and 4 are the 'unique' and 'partial' flags
                for (_, index_name, unique, _, partial) in indexes {
                    if unique != 1 || partial != 0 {
                        continue;
                    }
                    let info_sql = format!(
                        "PRAGMA {}.index_info({})",
                        quote_ident(schema),
                        quote_ident(&index_name)
                    );
                    let index_columns: Vec<(i32, i32, Option<String>)> =
                        sqlx::query_as(&info_sql).fetch_all(&mut *conn).await?;

                    // Expression columns have no name
                    let names: Option<Vec<String>> =
                        index_columns.into_iter().map(|col| col.2).collect();
                    if let Some(names) = names {
                        keys.push(names);
                    }
                }

                Ok(keys)
            }
        }
    }

    /// Check if a table has any unique constraint (primary key or unique index)
    pub async fn has_unique_constraints(
        &mut self,
        schema: &str,
        table_name: &str,
    ) -> Result<bool, sqlx::Error> {
        Ok(!self.unique_keys(schema, table_name).await?.is_empty())
    }

    /// Check if a unique constraint covers exactly `columns`, in any order
    pub async fn has_unique_key(
        &mut self,
        schema: &str,
        table_name: &str,
        columns: &[&str],
    ) -> Result<bool, sqlx::Error> {
        let mut wanted: Vec<&str> = columns.to_vec();
        wanted.sort_unstable();

        let keys = self.unique_keys(schema, table_name).await?;
        Ok(keys.into_iter().any(|key| {
            let mut key: Vec<&str> = key.iter().map(String::as_str).collect();
            key.sort_unstable();
            key == wanted
        }))
    }

    /// Close the connection gracefully
    pub async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            Connection::Postgres(conn) => conn.close().await,
            #[cfg(test)]
            Connection::Sqlite(conn) => conn.close().await,
        }
    }
}

/// Double-quote an identifier, escaping embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
