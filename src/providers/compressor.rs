//! `compressor` module: encodes TIFF inputs as PNG or JPEG

use crate::core::error::OperationError;
use crate::core::event::{isolate_items, ProgressStream};
use crate::persistence::{ResultStore, Stage, StageFile, StageOutput};
use crate::providers::imaging::{Codec, Image8};
use crate::providers::{blocking, collect_batch, file_size, BatchItem};
use crate::registry::{Operation, OperationDescriptor, OperationProvider, ParamType, Params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const MODULE: &str = "compressor";

/// Source extensions picked up from a directory
const INPUT_TYPES: &[&str] = &["tif", "tiff"];

/// Provider for the `compressor` module
pub struct Compressor {
    store: Arc<dyn ResultStore>,
}

impl Compressor {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    fn descriptor(name: &str) -> OperationDescriptor {
        OperationDescriptor::new(name)
            .param("input_path", ParamType::String)
            .param("output_folder", ParamType::String)
            .param("quality", ParamType::Integer)
            .run_id("run_id")
    }
}

impl OperationProvider for Compressor {
    fn module_name(&self) -> &str {
        MODULE
    }

    fn operations(&self) -> Vec<(OperationDescriptor, Arc<dyn Operation>)> {
        vec![
            (
                Self::descriptor("compress_jpeg"),
                Arc::new(Compress {
                    store: self.store.clone(),
                    codec: Codec::jpeg,
                }) as Arc<dyn Operation>,
            ),
            (
                Self::descriptor("compress_png"),
                Arc::new(Compress {
                    store: self.store.clone(),
                    codec: Codec::png,
                }) as Arc<dyn Operation>,
            ),
        ]
    }
}

struct Compress {
    store: Arc<dyn ResultStore>,
    codec: fn(i64) -> Result<Codec, OperationError>,
}

impl Operation for Compress {
    fn invoke(&self, params: Params) -> Result<ProgressStream, OperationError> {
        let input_path = PathBuf::from(params.require_str("input_path")?);
        let output_folder = PathBuf::from(params.require_str("output_folder")?);
        let codec = (self.codec)(params.require_i64("quality")?)?;
        let run_id = params.require_str("run_id")?;

        let inputs = collect_batch(&input_path, INPUT_TYPES)?;
        std::fs::create_dir_all(&output_folder)?;
        info!(
            "Compressing {} file(s) from {} as {:?} for run {}",
            inputs.len(),
            input_path.display(),
            codec,
            run_id
        );

        let store = self.store.clone();
        let output_folder = Arc::new(output_folder);
        Ok(isolate_items(inputs, move |input: BatchItem| {
            let store = store.clone();
            let run_id = run_id.clone();
            let output_folder = output_folder.clone();
            async move {
                let output = blocking(move || compress(&input, &output_folder, codec)).await?;
                store.record_output(&StageOutput { run_id, ..output }).await?;
                Ok(())
            }
        }))
    }
}

fn compress(input: &BatchItem, output_folder: &Path, codec: Codec) -> Result<StageOutput, OperationError> {
    let source_size = file_size(&input.path)?;
    let target = input.output_in(output_folder, Some(codec.extension()));

    let started = Instant::now();
    let encoded = Image8::open(&input.path)?.encode(codec)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, &encoded)?;
    let elapsed_us = started.elapsed().as_secs_f64() * 1_000_000.0;
    debug!("Compressed {} to {} bytes", input, encoded.len());

    Ok(StageOutput {
        run_id: String::new(),
        stage: Stage::Compressed,
        source_path: input.path.to_string_lossy().into_owned(),
        source_size,
        file: StageFile {
            path: target.to_string_lossy().into_owned(),
            size: encoded.len() as i64,
            elapsed_us,
        },
    })
}
