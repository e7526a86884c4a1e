//! `evaluator` module: scores recorded image pairs of a run

use crate::core::error::OperationError;
use crate::core::event::{isolate_items, ProgressEvent, ProgressStream};
use crate::persistence::{ImageColumn, ImageRecord, ResultStore};
use crate::providers::blocking;
use crate::providers::imaging::Image8;
use crate::registry::{Operation, OperationDescriptor, OperationProvider, ParamType, Params};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const MODULE: &str = "evaluator";

/// PSNR reported for identical images
const PSNR_CEILING: f64 = 100.0;

const SSIM_WINDOW: usize = 7;

/// Distortion between two decoded images of the same shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(rename = "MSE")]
    pub mse: f64,
    #[serde(rename = "PSNR")]
    pub psnr: f64,
    #[serde(rename = "SSIM")]
    pub ssim: f64,
}

impl Metrics {
    pub fn compare(reference: &Image8, candidate: &Image8) -> Result<Self, OperationError> {
        let shape = |i: &Image8| (i.width(), i.height(), i.channels());
        if shape(reference) != shape(candidate) {
            return Err(OperationError::Failed(format!(
                "Image shapes differ ({:?} vs {:?})",
                shape(reference),
                shape(candidate)
            )));
        }
        if reference.samples().is_empty() {
            return Err(OperationError::Failed("Image has no samples".to_string()));
        }

        let squared: f64 = reference
            .samples()
            .iter()
            .zip(candidate.samples())
            .map(|(a, b)| {
                let d = *a as f64 - *b as f64;
                d * d
            })
            .sum();
        let mse = squared / reference.samples().len() as f64;
        let psnr = if mse == 0.0 {
            PSNR_CEILING
        } else {
            (10.0 * (255.0 * 255.0 / mse).log10()).min(PSNR_CEILING)
        };

        Ok(Self {
            mse,
            psnr,
            ssim: ssim(reference, candidate),
        })
    }
}

/// SSIM window side: 7, or the largest odd size that fits the image
fn ssim_window(width: u32, height: u32) -> usize {
    let side = width.min(height).min(SSIM_WINDOW as u32) as usize;
    if side % 2 == 0 {
        side - 1
    } else {
        side
    }
}

/// Running sums over a rectangle, one table per quantity
struct SummedArea {
    width: usize,
    table: Vec<f64>,
}

impl SummedArea {
    fn new(width: usize, height: usize, value: impl Fn(usize, usize) -> f64) -> Self {
        let stride = width + 1;
        let mut table = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            for x in 0..width {
                table[(y + 1) * stride + x + 1] =
                    value(x, y) + table[y * stride + x + 1] + table[(y + 1) * stride + x] - table[y * stride + x];
            }
        }
        Self { width, table }
    }

    fn window(&self, x: usize, y: usize, side: usize) -> f64 {
        let stride = self.width + 1;
        let at = |x: usize, y: usize| self.table[y * stride + x];
        at(x + side, y + side) - at(x, y + side) - at(x + side, y) + at(x, y)
    }
}

/// Mean structural similarity over every full window of every channel,
/// with sample covariances
fn ssim(reference: &Image8, candidate: &Image8) -> f64 {
    let (width, height) = (reference.width() as usize, reference.height() as usize);
    let channels = reference.channels() as usize;
    let side = ssim_window(reference.width(), reference.height());
    let n = (side * side) as f64;
    let norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };
    let c1 = (0.01 * 255.0f64).powi(2);
    let c2 = (0.03 * 255.0f64).powi(2);

    let mut total = 0.0;
    let mut windows = 0usize;
    for c in 0..channels {
        let a = |x: usize, y: usize| reference.samples()[(y * width + x) * channels + c] as f64;
        let b = |x: usize, y: usize| candidate.samples()[(y * width + x) * channels + c] as f64;
        let sum_a = SummedArea::new(width, height, a);
        let sum_b = SummedArea::new(width, height, b);
        let sum_aa = SummedArea::new(width, height, |x, y| a(x, y) * a(x, y));
        let sum_bb = SummedArea::new(width, height, |x, y| b(x, y) * b(x, y));
        let sum_ab = SummedArea::new(width, height, |x, y| a(x, y) * b(x, y));

        for y in 0..=height - side {
            for x in 0..=width - side {
                let ma = sum_a.window(x, y, side) / n;
                let mb = sum_b.window(x, y, side) / n;
                let va = norm * (sum_aa.window(x, y, side) / n - ma * ma);
                let vb = norm * (sum_bb.window(x, y, side) / n - mb * mb);
                let cov = norm * (sum_ab.window(x, y, side) / n - ma * mb);
                total += ((2.0 * ma * mb + c1) * (2.0 * cov + c2)) / ((ma * ma + mb * mb + c1) * (va + vb + c2));
                windows += 1;
            }
        }
    }

    total / windows as f64
}

/// Provider for the `evaluator` module
pub struct Evaluator {
    store: Arc<dyn ResultStore>,
}

impl Evaluator {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }
}

impl OperationProvider for Evaluator {
    fn module_name(&self) -> &str {
        MODULE
    }

    fn operations(&self) -> Vec<(OperationDescriptor, Arc<dyn Operation>)> {
        vec![(
            OperationDescriptor::new("evaluate")
                .run_id("run_id")
                .param("evaluation_id", ParamType::String)
                .param("input_type", ParamType::String)
                .param("output_type", ParamType::String),
            Arc::new(Evaluate {
                store: self.store.clone(),
            }) as Arc<dyn Operation>,
        )]
    }
}

struct Evaluate {
    store: Arc<dyn ResultStore>,
}

#[derive(Debug, Clone)]
struct Plan {
    evaluation_id: String,
    reference: ImageColumn,
    candidate: ImageColumn,
}

fn column(params: &Params, name: &str) -> Result<ImageColumn, OperationError> {
    params
        .require_str(name)?
        .parse()
        .map_err(|e: anyhow::Error| OperationError::InvalidParameter {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

impl Operation for Evaluate {
    fn invoke(&self, params: Params) -> Result<ProgressStream, OperationError> {
        let run_id = params.require_str("run_id")?;
        let plan = Plan {
            evaluation_id: params.require_str("evaluation_id")?,
            reference: column(&params, "input_type")?,
            candidate: column(&params, "output_type")?,
        };
        info!("Evaluating run {} as '{}'", run_id, plan.evaluation_id);

        let store = self.store.clone();
        let load = {
            let store = store.clone();
            let run_id = run_id.clone();
            async move { store.images_for_run(&run_id).await }
        };

        Ok(stream::once(load)
            .flat_map(move |rows| match rows {
                Ok(rows) => evaluate_rows(&run_id, rows, plan.clone(), store.clone()),
                Err(err) => stream::iter([Err(OperationError::from(err))]).boxed(),
            })
            .boxed())
    }
}

struct EvaluationRow(ImageRecord);

impl fmt::Display for EvaluationRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.input_image_path)
    }
}

fn evaluate_rows(
    run_id: &str,
    rows: Vec<ImageRecord>,
    plan: Plan,
    store: Arc<dyn ResultStore>,
) -> ProgressStream {
    if rows.is_empty() {
        return stream::iter([Err(OperationError::Failed(format!(
            "No images recorded for run {}",
            run_id
        )))])
        .boxed();
    }

    let (ready, skipped): (Vec<_>, Vec<_>) = rows
        .into_iter()
        .partition(|row| plan.reference.path(row).is_some() && plan.candidate.path(row).is_some());

    let mut leading = Vec::new();
    if !skipped.is_empty() {
        warn!("Run {}: {} row(s) lack an image to compare", run_id, skipped.len());
        leading.push(Ok(ProgressEvent::message(format!(
            "Skipped {} row(s) without both images",
            skipped.len()
        ))));
    }

    let rows = ready.into_iter().map(EvaluationRow).collect();
    let scored = isolate_items(rows, move |row: EvaluationRow| {
        let plan = plan.clone();
        let store = store.clone();
        async move { evaluate_row(row.0, &plan, store.as_ref()).await }
    });

    stream::iter(leading).chain(scored).boxed()
}

async fn evaluate_row(record: ImageRecord, plan: &Plan, store: &dyn ResultStore) -> Result<(), OperationError> {
    let (Some(reference), Some(candidate)) = (plan.reference.path(&record), plan.candidate.path(&record)) else {
        return Err(OperationError::Failed("Row is missing an image path".to_string()));
    };

    let (reference, candidate) = (PathBuf::from(reference), PathBuf::from(candidate));
    let metrics = blocking(move || Metrics::compare(&Image8::open(&reference)?, &Image8::open(&candidate)?)).await?;

    let mut results = record.results.clone();
    results.insert(
        plan.evaluation_id.clone(),
        serde_json::to_value(metrics).map_err(|e| OperationError::Failed(e.to_string()))?,
    );
    store.save_results(record.id, &results).await?;
    Ok(())
}
