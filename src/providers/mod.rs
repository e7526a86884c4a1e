//! Concrete operation providers wired into the registry at startup

pub mod compressor;
pub mod dataset_loader;
pub mod decompressor;
pub mod evaluator;
pub mod imaging;
pub mod noise;

pub use compressor::Compressor;
pub use dataset_loader::{list_dataset_dirs, DatasetDirectory, DatasetLoader};
pub use decompressor::Decompressor;
pub use evaluator::{Evaluator, Metrics};
pub use imaging::{Codec, Image8};
pub use noise::{NoiseKind, SimulatedNoiseInjector};

use crate::core::{config::EngineSettings, error::OperationError, error::RegistryError};
use crate::persistence::ResultStore;
use crate::registry::CapabilityRegistry;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry with every built-in provider, sharing one result store
pub fn default_registry(
    settings: &EngineSettings,
    store: Arc<dyn ResultStore>,
) -> Result<CapabilityRegistry, RegistryError> {
    let loader = DatasetLoader::new(settings.data_dir.clone(), store.clone());
    let compressor = Compressor::new(store.clone());
    let injector = SimulatedNoiseInjector::new(store.clone());
    let decompressor = Decompressor::new(store.clone());
    let evaluator = Evaluator::new(store);

    CapabilityRegistry::from_providers(&[&loader, &compressor, &injector, &decompressor, &evaluator])
}

/// Every regular file under `root`, depth first, in name order
pub(crate) fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(root)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            files.extend(walk_files(&path)?);
        } else {
            files.push(path);
        }
    }

    Ok(files)
}

/// One file of a batch, with its path relative to the batch root
pub(crate) struct BatchItem {
    pub path: PathBuf,
    pub relative: PathBuf,
}

impl BatchItem {
    /// Where this item lands under `output_folder`, optionally with a new
    /// extension
    pub fn output_in(&self, output_folder: &Path, extension: Option<&str>) -> PathBuf {
        let target = output_folder.join(&self.relative);
        match extension {
            Some(ext) => target.with_extension(ext),
            None => target,
        }
    }
}

impl fmt::Display for BatchItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e.trim_start_matches('.'))))
}

/// A single file as a batch of one, or every file under a directory with
/// one of `extensions`, keeping the directory layout
pub(crate) fn collect_batch(input_path: &Path, extensions: &[&str]) -> Result<Vec<BatchItem>, OperationError> {
    if input_path.is_file() {
        let name = input_path.file_name().ok_or_else(|| OperationError::InvalidParameter {
            name: "input_path".to_string(),
            reason: format!("{} has no file name", input_path.display()),
        })?;
        return Ok(vec![BatchItem {
            path: input_path.to_path_buf(),
            relative: PathBuf::from(name),
        }]);
    }

    if !input_path.is_dir() {
        return Err(OperationError::InvalidParameter {
            name: "input_path".to_string(),
            reason: format!("{} does not exist", input_path.display()),
        });
    }

    Ok(walk_files(input_path)?
        .into_iter()
        .filter(|path| has_extension(path, extensions))
        .map(|path| BatchItem {
            relative: path.strip_prefix(input_path).unwrap_or(&path).to_path_buf(),
            path,
        })
        .collect())
}

/// Run CPU-bound image work off the async executor
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, OperationError>
where
    F: FnOnce() -> Result<T, OperationError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

pub(crate) fn file_size(path: &Path) -> Result<i64, OperationError> {
    Ok(std::fs::metadata(path)?.len() as i64)
}
