//! `decompressor` module: decodes compressed images back to lossless PNG

use crate::core::error::OperationError;
use crate::core::event::{isolate_items, ProgressStream};
use crate::persistence::{ResultStore, Stage, StageFile, StageOutput};
use crate::providers::imaging::Image8;
use crate::providers::{blocking, collect_batch, file_size, BatchItem};
use crate::registry::{Operation, OperationDescriptor, OperationProvider, ParamType, Params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const MODULE: &str = "decompressor";

/// Provider for the `decompressor` module
pub struct Decompressor {
    store: Arc<dyn ResultStore>,
}

impl Decompressor {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    fn entry(&self, name: &str, input_types: &'static [&'static str]) -> (OperationDescriptor, Arc<dyn Operation>) {
        (
            OperationDescriptor::new(name)
                .param("input_path", ParamType::String)
                .param("output_folder", ParamType::String)
                .run_id("run_id"),
            Arc::new(Decompress {
                store: self.store.clone(),
                input_types,
            }) as Arc<dyn Operation>,
        )
    }
}

impl OperationProvider for Decompressor {
    fn module_name(&self) -> &str {
        MODULE
    }

    fn operations(&self) -> Vec<(OperationDescriptor, Arc<dyn Operation>)> {
        vec![
            self.entry("decompress_jpeg", &["jpg", "jpeg"]),
            self.entry("decompress_png", &["png"]),
        ]
    }
}

struct Decompress {
    store: Arc<dyn ResultStore>,
    input_types: &'static [&'static str],
}

impl Operation for Decompress {
    fn invoke(&self, params: Params) -> Result<ProgressStream, OperationError> {
        let input_path = PathBuf::from(params.require_str("input_path")?);
        let output_folder = PathBuf::from(params.require_str("output_folder")?);
        let run_id = params.require_str("run_id")?;

        let inputs = collect_batch(&input_path, self.input_types)?;
        std::fs::create_dir_all(&output_folder)?;
        info!(
            "Decompressing {} file(s) from {} for run {}",
            inputs.len(),
            input_path.display(),
            run_id
        );

        let store = self.store.clone();
        let output_folder = Arc::new(output_folder);
        Ok(isolate_items(inputs, move |input: BatchItem| {
            let store = store.clone();
            let run_id = run_id.clone();
            let output_folder = output_folder.clone();
            async move {
                let output = blocking(move || decompress(&input, &output_folder)).await?;
                store.record_output(&StageOutput { run_id, ..output }).await?;
                Ok(())
            }
        }))
    }
}

fn decompress(input: &BatchItem, output_folder: &Path) -> Result<StageOutput, OperationError> {
    let source_size = file_size(&input.path)?;
    let target = input.output_in(output_folder, Some("png"));

    let started = Instant::now();
    let image = Image8::open(&input.path)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image.save(&target)?;
    let elapsed_us = started.elapsed().as_secs_f64() * 1_000_000.0;
    debug!("Decompressed {} to {}", input, target.display());

    Ok(StageOutput {
        run_id: String::new(),
        stage: Stage::Decompressed,
        source_path: input.path.to_string_lossy().into_owned(),
        source_size,
        file: StageFile {
            size: file_size(&target)?,
            path: target.to_string_lossy().into_owned(),
            elapsed_us,
        },
    })
}
