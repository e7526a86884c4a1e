//! Persistence layer for result rows written by operation providers
//!
//! The engine itself never touches storage; providers receive a
//! [`ResultStore`] at construction and record what they produce.
//!
//! Each image row follows one input image through the processing chain:
//! compression, simulated noise and decompression each fill their own
//! columns, and the evaluator stores its results on the same row.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteResultStore;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A downloaded dataset archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub name: String,
    pub path: String,
    pub recorded_at: DateTime<Utc>,
}

/// An archive unpacked into the dataset directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub zip_file_path: String,
    pub destination_folder: String,
    pub recorded_at: DateTime<Utc>,
}

/// Processing stage that writes an image derived from an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Compressed,
    Noisy,
    Decompressed,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Compressed, Stage::Noisy, Stage::Decompressed];

    /// Path, size and timing columns of this stage
    pub fn columns(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Stage::Compressed => ("compressed_image_path", "compressed_image_size", "compression_time"),
            Stage::Noisy => ("noisy_image_path", "noisy_image_size", "noise_time"),
            Stage::Decompressed => (
                "decompressed_image_path",
                "decompressed_image_size",
                "decompression_time",
            ),
        }
    }

    /// The stages whose outputs this stage may take as its input
    pub fn others(&self) -> [Stage; 2] {
        match self {
            Stage::Compressed => [Stage::Noisy, Stage::Decompressed],
            Stage::Noisy => [Stage::Compressed, Stage::Decompressed],
            Stage::Decompressed => [Stage::Compressed, Stage::Noisy],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Compressed => "compressed",
            Stage::Noisy => "noisy",
            Stage::Decompressed => "decompressed",
        };
        write!(f, "{}", name)
    }
}

/// A file written by one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFile {
    pub path: String,
    pub size: i64,
    /// Microseconds spent producing the file
    pub elapsed_us: f64,
}

/// An image processed during a run, with evaluation results keyed by
/// evaluation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub run_id: String,
    pub input_image_path: String,
    pub input_image_size: i64,
    pub compressed: Option<StageFile>,
    pub noisy: Option<StageFile>,
    pub decompressed: Option<StageFile>,
    pub results: Map<String, Value>,
}

impl ImageRecord {
    pub fn new(id: i64, run_id: impl Into<String>, input_image_path: impl Into<String>, input_image_size: i64) -> Self {
        Self {
            id,
            run_id: run_id.into(),
            input_image_path: input_image_path.into(),
            input_image_size,
            compressed: None,
            noisy: None,
            decompressed: None,
            results: Map::new(),
        }
    }

    pub fn stage_file(&self, stage: Stage) -> Option<&StageFile> {
        match stage {
            Stage::Compressed => self.compressed.as_ref(),
            Stage::Noisy => self.noisy.as_ref(),
            Stage::Decompressed => self.decompressed.as_ref(),
        }
    }

    pub fn stage_file_mut(&mut self, stage: Stage) -> &mut Option<StageFile> {
        match stage {
            Stage::Compressed => &mut self.compressed,
            Stage::Noisy => &mut self.noisy,
            Stage::Decompressed => &mut self.decompressed,
        }
    }

    /// Whether `path` is the output of a stage other than `stage`
    fn produced_upstream_of(&self, stage: Stage, path: &str) -> bool {
        stage
            .others()
            .iter()
            .any(|other| self.stage_file(*other).is_some_and(|f| f.path == path))
    }
}

/// A stage's output for one source image.
///
/// When the source is itself the output of another stage in the same run,
/// the output lands on that row. Otherwise the source is treated as an input
/// image and its row is created or updated.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub run_id: String,
    pub stage: Stage,
    pub source_path: String,
    pub source_size: i64,
    pub file: StageFile,
}

/// Which recorded image of a row to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageColumn {
    Input,
    Compressed,
    Noisy,
    Decompressed,
}

impl ImageColumn {
    pub fn path<'a>(&self, record: &'a ImageRecord) -> Option<&'a str> {
        match self {
            ImageColumn::Input => Some(record.input_image_path.as_str()),
            ImageColumn::Compressed => record.compressed.as_ref().map(|f| f.path.as_str()),
            ImageColumn::Noisy => record.noisy.as_ref().map(|f| f.path.as_str()),
            ImageColumn::Decompressed => record.decompressed.as_ref().map(|f| f.path.as_str()),
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            ImageColumn::Input => "input_image_path",
            ImageColumn::Compressed => "compressed_image_path",
            ImageColumn::Noisy => "noisy_image_path",
            ImageColumn::Decompressed => "decompressed_image_path",
        }
    }
}

impl FromStr for ImageColumn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "input" | "original" | "input_image_path" => Ok(ImageColumn::Input),
            "compressed" | "compressed_image_path" => Ok(ImageColumn::Compressed),
            "noisy" | "noisy_image_path" => Ok(ImageColumn::Noisy),
            "decompressed" | "decompressed_image_path" => Ok(ImageColumn::Decompressed),
            other => bail!(
                "Unknown image column '{}' (expected one of: {})",
                other,
                evaluation_fields().join(", ")
            ),
        }
    }
}

/// Row fields that can be compared by the evaluator
pub fn evaluation_fields() -> Vec<&'static str> {
    [
        ImageColumn::Input,
        ImageColumn::Compressed,
        ImageColumn::Decompressed,
        ImageColumn::Noisy,
    ]
    .iter()
    .map(ImageColumn::field_name)
    .collect()
}

/// Distinct evaluation ids present in a run's rows, sorted
pub fn evaluation_ids(records: &[ImageRecord]) -> Vec<String> {
    records
        .iter()
        .flat_map(|r| r.results.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Trait for result storage backends
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Record a downloaded dataset
    async fn record_dataset(&self, name: &str, path: &str) -> Result<()>;

    /// All recorded datasets, oldest first
    async fn list_datasets(&self) -> Result<Vec<DatasetRecord>>;

    /// Record an unpacked archive
    async fn record_extraction(&self, zip_file_path: &str, destination_folder: &str) -> Result<()>;

    /// All recorded extractions, oldest first
    async fn list_extractions(&self) -> Result<Vec<ExtractionRecord>>;

    /// Record a stage's output and return the id of the row it landed on.
    /// Recording the same stage twice for a row replaces the first output.
    async fn record_output(&self, output: &StageOutput) -> Result<i64>;

    /// Rows of a run, in insertion order
    async fn images_for_run(&self, run_id: &str) -> Result<Vec<ImageRecord>>;

    /// Replace the evaluation results of a row
    async fn save_results(&self, image_id: i64, results: &Map<String, Value>) -> Result<()>;

    /// Every run id with at least one row, sorted
    async fn list_run_ids(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryResultStore {
    datasets: tokio::sync::RwLock<Vec<DatasetRecord>>,
    extractions: tokio::sync::RwLock<Vec<ExtractionRecord>>,
    images: tokio::sync::RwLock<Vec<ImageRecord>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self {
            datasets: tokio::sync::RwLock::new(Vec::new()),
            extractions: tokio::sync::RwLock::new(Vec::new()),
            images: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResultStore for InMemoryResultStore {
    async fn record_dataset(&self, name: &str, path: &str) -> Result<()> {
        self.datasets.write().await.push(DatasetRecord {
            name: name.to_string(),
            path: path.to_string(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_datasets(&self) -> Result<Vec<DatasetRecord>> {
        Ok(self.datasets.read().await.clone())
    }

    async fn record_extraction(&self, zip_file_path: &str, destination_folder: &str) -> Result<()> {
        self.extractions.write().await.push(ExtractionRecord {
            zip_file_path: zip_file_path.to_string(),
            destination_folder: destination_folder.to_string(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_extractions(&self) -> Result<Vec<ExtractionRecord>> {
        Ok(self.extractions.read().await.clone())
    }

    async fn record_output(&self, output: &StageOutput) -> Result<i64> {
        let mut images = self.images.write().await;

        if let Some(row) = images
            .iter_mut()
            .find(|r| r.run_id == output.run_id && r.produced_upstream_of(output.stage, &output.source_path))
        {
            *row.stage_file_mut(output.stage) = Some(output.file.clone());
            return Ok(row.id);
        }

        if let Some(row) = images
            .iter_mut()
            .find(|r| r.run_id == output.run_id && r.input_image_path == output.source_path)
        {
            *row.stage_file_mut(output.stage) = Some(output.file.clone());
            return Ok(row.id);
        }

        let id = images.len() as i64 + 1;
        let mut row = ImageRecord::new(id, &output.run_id, &output.source_path, output.source_size);
        *row.stage_file_mut(output.stage) = Some(output.file.clone());
        images.push(row);

        Ok(id)
    }

    async fn images_for_run(&self, run_id: &str) -> Result<Vec<ImageRecord>> {
        Ok(self
            .images
            .read()
            .await
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn save_results(&self, image_id: i64, results: &Map<String, Value>) -> Result<()> {
        let mut images = self.images.write().await;
        match images.iter_mut().find(|r| r.id == image_id) {
            Some(record) => {
                record.results = results.clone();
                Ok(())
            }
            None => bail!("Image row {} not found", image_id),
        }
    }

    async fn list_run_ids(&self) -> Result<Vec<String>> {
        let images = self.images.read().await;
        Ok(images
            .iter()
            .map(|r| r.run_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }
}
