//! Integration tests for the full import pipeline
//!
//! These tests use SQLite database files and real JSON files to test end to
//! end scenarios of the importer.

#[cfg(test)]
mod tests {
    use crate::{
        error::ImportError,
        runner::{ImportArgsBuilder, ImportOutcome, ImportResult, OnConflict, run_import},
    };
    use sqlx::{Connection, SqliteConnection};
    use tempfile::TempDir;
    use tokio::fs::File;
    use tokio::io::AsyncWriteExt;

    type RateTuple = (i64, i64, f64, Option<f64>, bool, Option<i32>);
    type BonusTuple = (i64, i64, f64);

    const KEYED_RATES: &str = "gacha_id INTEGER NOT NULL, item_id INTEGER NOT NULL, \
        probability REAL NOT NULL, probability_pity REAL, is_rate_up BOOLEAN NOT NULL, \
        details_priority INTEGER, PRIMARY KEY (gacha_id, item_id)";
    const KEYED_BONUS_RATES: &str = "gacha_id INTEGER NOT NULL, pack_id INTEGER NOT NULL, \
        probability REAL NOT NULL, PRIMARY KEY (gacha_id, pack_id)";
    const PLAIN_RATES: &str = "gacha_id INTEGER, item_id INTEGER, probability REAL, \
        probability_pity REAL, is_rate_up BOOLEAN, details_priority INTEGER";
    const PLAIN_BONUS_RATES: &str = "gacha_id INTEGER, pack_id INTEGER, probability REAL";
    const SURROGATE_RATES: &str = "id INTEGER PRIMARY KEY, gacha_id INTEGER, item_id INTEGER, \
        probability REAL, probability_pity REAL, is_rate_up BOOLEAN, details_priority INTEGER";
    const SURROGATE_BONUS_RATES: &str =
        "id INTEGER PRIMARY KEY, gacha_id INTEGER, pack_id INTEGER, probability REAL";

    const EXAMPLE_DOC: &str = r#"{"gacha_id": 7,
        "rate": [{"itemid": 1, "rate": 500, "pickup": 1, "detailview": 1, "detailpriority": 3}],
        "limitrate": [{"itemid": 1, "rate": 600}],
        "bonusrate": [{"pack_id": 2, "rate": 10}]}"#;

    // ============ Test Helpers ============

    /// Test fixture: a source directory plus a SQLite database file
    struct Fixture {
        source_dir: TempDir,
        db_dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                source_dir: TempDir::new().unwrap(),
                db_dir: TempDir::new().unwrap(),
            }
        }

        fn db_url(&self) -> String {
            format!(
                "sqlite://{}?mode=rwc",
                self.db_dir.path().join("gacha.db").display()
            )
        }

        async fn write_file(&self, filename: &str, content: &str) {
            let path = self.source_dir.path().join(filename);
            let mut file = File::create(&path).await.unwrap();
            file.write_all(content.as_bytes()).await.unwrap();
            file.flush().await.unwrap();
        }

        async fn connect(&self) -> SqliteConnection {
            SqliteConnection::connect(&self.db_url()).await.unwrap()
        }

        /// Create `rates` and `bonus_rates` with the given column definitions
        async fn create_tables(&self, rates_columns: Option<&str>, bonus_columns: Option<&str>) {
            let mut conn = self.connect().await;
            if let Some(columns) = rates_columns {
                let sql = format!("CREATE TABLE rates ({})", columns);
                sqlx::query(&sql).execute(&mut conn).await.unwrap();
            }
            if let Some(columns) = bonus_columns {
                let sql = format!("CREATE TABLE bonus_rates ({})", columns);
                sqlx::query(&sql).execute(&mut conn).await.unwrap();
            }
            conn.close().await.unwrap();
        }

        async fn create_keyed_tables(&self) {
            self.create_tables(Some(KEYED_RATES), Some(KEYED_BONUS_RATES))
                .await;
        }

        async fn import(
            &self,
            batch_size: usize,
            on_conflict: OnConflict,
        ) -> Result<ImportResult, ImportError> {
            let args = ImportArgsBuilder::default()
                .directory(self.source_dir.path())
                .connection_string(self.db_url())
                .schema("main")
                .batch_size(batch_size)
                .on_conflict(on_conflict)
                .quiet(true)
                .build()
                .unwrap();
            run_import(args).await
        }

        async fn rates(&self) -> Vec<RateTuple> {
            let mut conn = self.connect().await;
            sqlx::query_as(
                "SELECT gacha_id, item_id, probability, probability_pity, is_rate_up, details_priority \
                 FROM rates ORDER BY gacha_id, item_id",
            )
            .fetch_all(&mut conn)
            .await
            .unwrap()
        }

        async fn bonus_rates(&self) -> Vec<BonusTuple> {
            let mut conn = self.connect().await;
            sqlx::query_as(
                "SELECT gacha_id, pack_id, probability FROM bonus_rates ORDER BY gacha_id, pack_id",
            )
            .fetch_all(&mut conn)
            .await
            .unwrap()
        }
    }

    /// A document with `count` items, each with rate `base + item_id`
    fn numbered_doc(gacha_id: i64, count: i64, base: i64) -> String {
        let rates: Vec<String> = (1..=count)
            .map(|i| format!(r#"{{"itemid": {}, "rate": {}}}"#, i, base + i))
            .collect();
        format!(
            r#"{{"gacha_id": {}, "rate": [{}], "bonusrate": [{{"pack_id": 1, "rate": {}}}]}}"#,
            gacha_id,
            rates.join(", "),
            base
        )
    }

    // ============ Tests ============

    #[tokio::test]
    async fn test_example_document_end_to_end() {
        let fixture = Fixture::new();
        fixture.create_keyed_tables().await;
        fixture.write_file("gacha_7.json", EXAMPLE_DOC).await;

        let result = fixture.import(1000, OnConflict::Update).await.unwrap();

        assert_eq!(result.outcome, ImportOutcome::Committed);
        assert_eq!(result.files_found, 1);
        assert_eq!(result.files_parsed, 1);
        assert_eq!(result.rates_written, 1);
        assert_eq!(result.bonus_rates_written, 1);

        assert_eq!(
            fixture.rates().await,
            vec![(7, 1, 0.5, Some(0.6), true, Some(3))]
        );
        assert_eq!(fixture.bonus_rates().await, vec![(7, 2, 0.01)]);
    }

    #[tokio::test]
    async fn test_nullable_columns_are_written_as_null() {
        let fixture = Fixture::new();
        fixture.create_keyed_tables().await;
        fixture
            .write_file(
                "g.json",
                r#"{"gacha_id": 3, "rate": [{"itemid": 9, "rate": 25, "detailview": 0, "detailpriority": 4}]}"#,
            )
            .await;

        fixture.import(1000, OnConflict::Update).await.unwrap();

        assert_eq!(fixture.rates().await, vec![(3, 9, 0.025, None, false, None)]);
        assert!(fixture.bonus_rates().await.is_empty());
    }

    #[tokio::test]
    async fn test_detailview_null_is_visible_and_priority_null_is_kept() {
        let fixture = Fixture::new();
        fixture.create_keyed_tables().await;
        fixture
            .write_file(
                "g.json",
                r#"{"gacha_id": 3, "rate": [
                    {"itemid": 1, "rate": 1, "detailview": null, "detailpriority": 5},
                    {"itemid": 2, "rate": 1, "detailview": 1, "detailpriority": null},
                    {"itemid": 3, "rate": 1, "detailview": 0, "detailpriority": "n/a"}
                ]}"#,
            )
            .await;

        let result = fixture.import(1000, OnConflict::Update).await.unwrap();
        assert!(result.files_failed.is_empty());

        let priorities: Vec<Option<i32>> = fixture.rates().await.iter().map(|r| r.5).collect();
        assert_eq!(priorities, vec![Some(5), None, None]);
    }

    #[tokio::test]
    async fn test_malformed_file_is_skipped_and_others_are_written() {
        let fixture = Fixture::new();
        fixture.create_keyed_tables().await;
        fixture.write_file("a.json", &numbered_doc(1, 2, 100)).await;
        fixture.write_file("b.json", r#"{"gacha_id": 2, "rate": [ "#).await;
        fixture
            .write_file("c.json", r#"{"gacha_id": 3, "rate": [{"rate": 5}]}"#)
            .await;
        fixture.write_file("d.json", &numbered_doc(4, 3, 200)).await;

        let result = fixture.import(1000, OnConflict::Update).await.unwrap();

        assert_eq!(result.outcome, ImportOutcome::Committed);
        assert_eq!(result.files_found, 4);
        assert_eq!(result.files_parsed, 2);
        assert_eq!(result.files_failed.len(), 2);
        assert!(result.files_failed[0].path.ends_with("b.json"));
        assert!(result.files_failed[1].path.ends_with("c.json"));
        assert!(result.files_failed[1].error.contains("itemid"));

        assert_eq!(result.rates_written, 5);
        let gacha_ids: Vec<i64> = fixture.rates().await.iter().map(|r| r.0).collect();
        assert_eq!(gacha_ids, vec![1, 1, 4, 4, 4]);
    }

    #[tokio::test]
    async fn test_no_json_files_exits_before_writing() {
        let fixture = Fixture::new();
        // No tables: any write attempt would fail
        fixture.write_file("readme.txt", "not a rate file").await;

        let result = fixture.import(1000, OnConflict::Update).await.unwrap();

        assert_eq!(result.outcome, ImportOutcome::NoFiles);
        assert_eq!(result.files_found, 0);
        assert_eq!(result.rates_written, 0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_fatal() {
        let fixture = Fixture::new();
        let missing = fixture.source_dir.path().join("nope");

        let args = ImportArgsBuilder::default()
            .directory(missing.clone())
            .connection_string(fixture.db_url())
            .schema("main")
            .quiet(true)
            .build()
            .unwrap();

        let err = run_import(args).await.unwrap_err();
        assert!(matches!(err, ImportError::DirectoryNotFound(ref p) if p == &missing));
    }

    #[tokio::test]
    async fn test_connection_failure_is_fatal() {
        let fixture = Fixture::new();
        fixture.write_file("a.json", EXAMPLE_DOC).await;

        let args = ImportArgsBuilder::default()
            .directory(fixture.source_dir.path())
            .connection_string("not a connection string")
            .quiet(true)
            .build()
            .unwrap();

        let err = run_import(args).await.unwrap_err();
        assert!(matches!(err, ImportError::Connection(_)));
    }

    #[tokio::test]
    async fn test_dry_run_never_connects() {
        let fixture = Fixture::new();
        fixture.write_file("a.json", &numbered_doc(1, 4, 10)).await;
        fixture.write_file("b.json", "{").await;

        let args = ImportArgsBuilder::default()
            .directory(fixture.source_dir.path())
            .connection_string("not a connection string")
            .dry_run(true)
            .quiet(true)
            .build()
            .unwrap();

        let result = run_import(args).await.unwrap();
        assert_eq!(result.outcome, ImportOutcome::DryRun);
        assert_eq!(result.files_parsed, 1);
        assert_eq!(result.files_failed.len(), 1);
        assert_eq!(result.rates_parsed, 4);
        assert_eq!(result.bonus_rates_parsed, 1);
        assert_eq!(result.rates_written, 0);
    }

    #[tokio::test]
    async fn test_rows_are_split_into_batches() {
        let fixture = Fixture::new();
        fixture.create_keyed_tables().await;
        fixture.write_file("a.json", &numbered_doc(1, 5, 0)).await;

        let result = fixture.import(2, OnConflict::Update).await.unwrap();

        // 5 rates -> 3 batches, 1 bonus rate -> 1 batch
        assert_eq!(result.batches_written, 4);
        assert_eq!(result.rates_written, 5);
        assert!(result.batch_percentiles.0.is_some());

        let items: Vec<i64> = fixture.rates().await.iter().map(|r| r.1).collect();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_reimport_with_update_overwrites_values() {
        let fixture = Fixture::new();
        fixture.create_keyed_tables().await;
        fixture.write_file("a.json", &numbered_doc(1, 3, 100)).await;
        fixture.import(1000, OnConflict::Update).await.unwrap();

        fixture.write_file("a.json", &numbered_doc(1, 3, 500)).await;
        let result = fixture.import(1000, OnConflict::Update).await.unwrap();
        assert_eq!(result.outcome, ImportOutcome::Committed);

        let rates = fixture.rates().await;
        assert_eq!(rates.len(), 3);
        assert_eq!(rates[0].2, 0.501);
        assert_eq!(fixture.bonus_rates().await, vec![(1, 1, 0.5)]);
    }

    #[tokio::test]
    async fn test_duplicate_keys_across_files_last_file_wins_on_update() {
        let fixture = Fixture::new();
        fixture.create_keyed_tables().await;
        fixture.write_file("a.json", &numbered_doc(1, 2, 100)).await;
        fixture.write_file("b.json", &numbered_doc(1, 2, 300)).await;

        let result = fixture.import(1000, OnConflict::Update).await.unwrap();
        assert_eq!(result.rates_parsed, 4);
        assert_eq!(result.rates_written, 2);

        let probabilities: Vec<f64> = fixture.rates().await.iter().map(|r| r.2).collect();
        assert_eq!(probabilities, vec![0.301, 0.302]);
    }

    #[tokio::test]
    async fn test_ignore_keeps_existing_rows() {
        let fixture = Fixture::new();
        fixture.create_keyed_tables().await;
        fixture.write_file("a.json", &numbered_doc(1, 2, 100)).await;
        fixture.import(1000, OnConflict::Ignore).await.unwrap();

        fixture.write_file("a.json", &numbered_doc(1, 3, 900)).await;
        fixture.import(1000, OnConflict::Ignore).await.unwrap();

        let probabilities: Vec<f64> = fixture.rates().await.iter().map(|r| r.2).collect();
        assert_eq!(probabilities, vec![0.101, 0.102, 0.903]);
    }

    #[tokio::test]
    async fn test_append_on_duplicate_key_rolls_back() {
        let fixture = Fixture::new();
        fixture.create_keyed_tables().await;
        fixture.write_file("a.json", &numbered_doc(1, 2, 100)).await;
        fixture.import(1000, OnConflict::Append).await.unwrap();

        // Second run brings one new item and two that already exist
        fixture.write_file("a.json", &numbered_doc(1, 3, 700)).await;
        let err = fixture.import(1000, OnConflict::Append).await.unwrap_err();
        assert!(matches!(err, ImportError::Write(_)));

        let probabilities: Vec<f64> = fixture.rates().await.iter().map(|r| r.2).collect();
        assert_eq!(probabilities, vec![0.101, 0.102]);
    }

    #[tokio::test]
    async fn test_unkeyed_tables_append_duplicates() {
        let fixture = Fixture::new();
        fixture
            .create_tables(Some(PLAIN_RATES), Some(PLAIN_BONUS_RATES))
            .await;
        fixture.write_file("a.json", EXAMPLE_DOC).await;

        fixture.import(1000, OnConflict::Update).await.unwrap();
        fixture.import(1000, OnConflict::Update).await.unwrap();

        assert_eq!(fixture.rates().await.len(), 2);
        assert_eq!(fixture.bonus_rates().await.len(), 2);
    }

    #[tokio::test]
    async fn test_surrogate_key_tables_fall_back_to_append() {
        let fixture = Fixture::new();
        fixture
            .create_tables(Some(SURROGATE_RATES), Some(SURROGATE_BONUS_RATES))
            .await;
        fixture.write_file("a.json", EXAMPLE_DOC).await;

        let result = fixture.import(1000, OnConflict::Update).await.unwrap();
        assert_eq!(result.outcome, ImportOutcome::Committed);
        fixture.import(1000, OnConflict::Update).await.unwrap();

        assert_eq!(
            fixture.rates().await,
            vec![
                (7, 1, 0.5, Some(0.6), true, Some(3)),
                (7, 1, 0.5, Some(0.6), true, Some(3))
            ]
        );
        assert_eq!(fixture.bonus_rates().await.len(), 2);
    }

    #[tokio::test]
    async fn test_update_uses_unique_index_beside_surrogate_key() {
        let fixture = Fixture::new();
        fixture
            .create_tables(Some(SURROGATE_RATES), Some(SURROGATE_BONUS_RATES))
            .await;
        {
            let mut conn = fixture.connect().await;
            sqlx::query("CREATE UNIQUE INDEX rates_key ON rates (item_id, gacha_id)")
                .execute(&mut conn)
                .await
                .unwrap();
            conn.close().await.unwrap();
        }

        fixture.write_file("a.json", &numbered_doc(1, 2, 100)).await;
        fixture.import(1000, OnConflict::Update).await.unwrap();
        fixture.write_file("a.json", &numbered_doc(1, 2, 400)).await;
        fixture.import(1000, OnConflict::Update).await.unwrap();

        let probabilities: Vec<f64> = fixture.rates().await.iter().map(|r| r.2).collect();
        assert_eq!(probabilities, vec![0.401, 0.402]);
        // bonus_rates has no matching key and appends
        assert_eq!(fixture.bonus_rates().await.len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back_all_tables() {
        let fixture = Fixture::new();
        // bonus_rates is missing, so the second table's insert fails
        fixture.create_tables(Some(KEYED_RATES), None).await;
        fixture.write_file("a.json", &numbered_doc(1, 5, 0)).await;

        let err = fixture.import(2, OnConflict::Update).await.unwrap_err();
        assert!(matches!(err, ImportError::Write(_)));
        assert!(err.to_string().contains("bonus_rates"));

        assert!(fixture.rates().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_batch_size_is_rejected_before_connecting() {
        let fixture = Fixture::new();
        let err = fixture.import(0, OnConflict::Update).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidArgs(_)));
        assert!(!fixture.db_dir.path().join("gacha.db").exists());
    }
}
