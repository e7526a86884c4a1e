//! SQLite-based result store

use crate::persistence::{
    DatasetRecord, ExtractionRecord, ImageRecord, ResultStore, Stage, StageFile, StageOutput,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// SQLite result store
pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// In-memory database, for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS datasets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extracted_datasets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                zip_file_path TEXT NOT NULL,
                destination_folder TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS image_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                input_image_path TEXT NOT NULL,
                input_image_size INTEGER NOT NULL,
                compressed_image_path TEXT,
                compressed_image_size INTEGER,
                compression_time REAL,
                noisy_image_path TEXT,
                noisy_image_size INTEGER,
                noise_time REAL,
                decompressed_image_path TEXT,
                decompressed_image_size INTEGER,
                decompression_time REAL,
                results TEXT,
                UNIQUE(run_id, input_image_path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_image_data_run_id ON image_data(run_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn stage_from_row(row: &SqliteRow, stage: Stage) -> Option<StageFile> {
        let (path, size, time) = stage.columns();
        let path: Option<String> = row.get(path);
        path.map(|path| StageFile {
            path,
            size: row.get::<Option<i64>, _>(size).unwrap_or_default(),
            elapsed_us: row.get::<Option<f64>, _>(time).unwrap_or_default(),
        })
    }

    fn image_from_row(row: &SqliteRow) -> Result<ImageRecord> {
        let results = match row.get::<Option<String>, _>("results") {
            Some(text) => serde_json::from_str(&text).context("Corrupt results column")?,
            None => Map::new(),
        };

        Ok(ImageRecord {
            id: row.get("id"),
            run_id: row.get("run_id"),
            input_image_path: row.get("input_image_path"),
            input_image_size: row.get("input_image_size"),
            compressed: Self::stage_from_row(row, Stage::Compressed),
            noisy: Self::stage_from_row(row, Stage::Noisy),
            decompressed: Self::stage_from_row(row, Stage::Decompressed),
            results,
        })
    }

    /// Row of the run whose other-stage output is `source`, if any
    async fn linked_row(&self, output: &StageOutput) -> Result<Option<i64>> {
        let [first, second] = output.stage.others();
        let sql = format!(
            "SELECT id FROM image_data WHERE run_id = ?1 AND ({} = ?2 OR {} = ?2) ORDER BY id ASC LIMIT 1",
            first.columns().0,
            second.columns().0
        );

        sqlx::query_scalar(&sql)
            .bind(&output.run_id)
            .bind(&output.source_path)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up image row")
    }
}

#[async_trait::async_trait]
impl ResultStore for SqliteResultStore {
    async fn record_dataset(&self, name: &str, path: &str) -> Result<()> {
        sqlx::query("INSERT INTO datasets (name, path, recorded_at) VALUES (?1, ?2, ?3)")
            .bind(name)
            .bind(path)
            .bind(Self::to_naive(Utc::now()))
            .execute(&self.pool)
            .await
            .context("Failed to record dataset")?;

        Ok(())
    }

    async fn list_datasets(&self) -> Result<Vec<DatasetRecord>> {
        let rows = sqlx::query("SELECT name, path, recorded_at FROM datasets ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list datasets")?;

        Ok(rows
            .iter()
            .map(|row| DatasetRecord {
                name: row.get("name"),
                path: row.get("path"),
                recorded_at: Self::from_naive(row.get("recorded_at")),
            })
            .collect())
    }

    async fn record_extraction(&self, zip_file_path: &str, destination_folder: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO extracted_datasets (zip_file_path, destination_folder, recorded_at) VALUES (?1, ?2, ?3)",
        )
        .bind(zip_file_path)
        .bind(destination_folder)
        .bind(Self::to_naive(Utc::now()))
        .execute(&self.pool)
        .await
        .context("Failed to record extraction")?;

        Ok(())
    }

    async fn list_extractions(&self) -> Result<Vec<ExtractionRecord>> {
        let rows = sqlx::query(
            "SELECT zip_file_path, destination_folder, recorded_at FROM extracted_datasets ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list extractions")?;

        Ok(rows
            .iter()
            .map(|row| ExtractionRecord {
                zip_file_path: row.get("zip_file_path"),
                destination_folder: row.get("destination_folder"),
                recorded_at: Self::from_naive(row.get("recorded_at")),
            })
            .collect())
    }

    async fn record_output(&self, output: &StageOutput) -> Result<i64> {
        let (path, size, time) = output.stage.columns();

        if let Some(id) = self.linked_row(output).await? {
            let sql = format!("UPDATE image_data SET {} = ?1, {} = ?2, {} = ?3 WHERE id = ?4", path, size, time);
            sqlx::query(&sql)
                .bind(&output.file.path)
                .bind(output.file.size)
                .bind(output.file.elapsed_us)
                .bind(id)
                .execute(&self.pool)
                .await
                .context("Failed to update image row")?;
            return Ok(id);
        }

        let sql = format!(
            r#"
            INSERT INTO image_data (run_id, input_image_path, input_image_size, {path}, {size}, {time})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(run_id, input_image_path) DO UPDATE SET
                {path} = excluded.{path},
                {size} = excluded.{size},
                {time} = excluded.{time}
            RETURNING id
            "#,
            path = path,
            size = size,
            time = time
        );

        sqlx::query_scalar(&sql)
            .bind(&output.run_id)
            .bind(&output.source_path)
            .bind(output.source_size)
            .bind(&output.file.path)
            .bind(output.file.size)
            .bind(output.file.elapsed_us)
            .fetch_one(&self.pool)
            .await
            .context("Failed to upsert image row")
    }

    async fn images_for_run(&self, run_id: &str) -> Result<Vec<ImageRecord>> {
        let rows = sqlx::query("SELECT * FROM image_data WHERE run_id = ?1 ORDER BY id ASC")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load image rows")?;

        rows.iter().map(Self::image_from_row).collect()
    }

    async fn save_results(&self, image_id: i64, results: &Map<String, Value>) -> Result<()> {
        let updated = sqlx::query("UPDATE image_data SET results = ?1 WHERE id = ?2")
            .bind(serde_json::to_string(results)?)
            .bind(image_id)
            .execute(&self.pool)
            .await
            .context("Failed to save results")?;

        if updated.rows_affected() == 0 {
            anyhow::bail!("Image row {} not found", image_id);
        }

        Ok(())
    }

    async fn list_run_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT run_id FROM image_data ORDER BY run_id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list run ids")?;

        Ok(rows.iter().map(|row| row.get("run_id")).collect())
    }
}
