//! `simulated_noise_injector` module: corrupts images with synthetic noise

use crate::core::error::OperationError;
use crate::core::event::{isolate_items, ProgressStream};
use crate::persistence::{ResultStore, Stage, StageFile, StageOutput};
use crate::providers::imaging::Image8;
use crate::providers::{blocking, collect_batch, file_size, BatchItem};
use crate::registry::{Operation, OperationDescriptor, OperationProvider, ParamType, Params};
use rand::seq::index;
use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const MODULE: &str = "simulated_noise_injector";

/// A noise model applied to decoded 8-bit pixels. Every result is clipped to
/// 0..=255.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseKind {
    /// Adds N(mean, sqrt(var)) to every sample
    Gaussian { mean: f64, var: f64 },
    /// Sets `salt_prob` of the samples to 255 and `pepper_prob` to 0
    SaltAndPepper { salt_prob: f64, pepper_prob: f64 },
    /// Shot noise at a fixed photon scale
    Poisson,
    /// Multiplicative noise: s + s * N(mean, sqrt(var))
    Speckle { mean: f64, var: f64 },
    /// Adds a uniform offset in `[low, high]`
    Uniform { low: i64, high: i64 },
    /// Adds a horizontal sine pattern with `frequency` periods per row
    Periodic { frequency: i64, amplitude: i64 },
    /// Each sample becomes 0 or 255 with probability `prob`
    Impulse { prob: f64 },
}

/// Photon count of a full-scale sample for Poisson noise
const POISSON_SCALE: f64 = 100.0;

fn probability(name: &str, value: f64) -> Result<(), OperationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(OperationError::InvalidParameter {
            name: name.to_string(),
            reason: format!("{} is not a probability", value),
        });
    }
    Ok(())
}

fn normal(mean: f64, var: f64) -> Result<Normal<f64>, OperationError> {
    if var.is_nan() || var < 0.0 {
        return Err(OperationError::InvalidParameter {
            name: "var".to_string(),
            reason: format!("{} is not a variance", var),
        });
    }
    Normal::new(mean, var.sqrt()).map_err(|e| OperationError::InvalidParameter {
        name: "var".to_string(),
        reason: e.to_string(),
    })
}

fn clip(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

impl NoiseKind {
    fn validate(&self) -> Result<(), OperationError> {
        match *self {
            NoiseKind::Gaussian { mean, var } | NoiseKind::Speckle { mean, var } => normal(mean, var).map(|_| ()),
            NoiseKind::SaltAndPepper { salt_prob, pepper_prob } => {
                probability("salt_prob", salt_prob)?;
                probability("pepper_prob", pepper_prob)
            }
            NoiseKind::Impulse { prob } => probability("prob", prob),
            NoiseKind::Uniform { low, high } if low > high => Err(OperationError::InvalidParameter {
                name: "low".to_string(),
                reason: format!("{} is greater than high ({})", low, high),
            }),
            NoiseKind::Periodic { frequency, .. } if frequency < 0 => Err(OperationError::InvalidParameter {
                name: "frequency".to_string(),
                reason: format!("{} is negative", frequency),
            }),
            _ => Ok(()),
        }
    }

    pub fn apply<R: Rng>(&self, image: &mut Image8, rng: &mut R) -> Result<(), OperationError> {
        let width = image.width() as usize;
        let channels = image.channels() as usize;
        let samples = image.samples_mut();

        match *self {
            NoiseKind::Gaussian { mean, var } => {
                let dist = normal(mean, var)?;
                for sample in samples.iter_mut() {
                    *sample = clip(*sample as f64 + dist.sample(rng));
                }
            }
            NoiseKind::SaltAndPepper { salt_prob, pepper_prob } => {
                let len = samples.len();
                let salt = ((salt_prob * len as f64) as usize).min(len);
                for i in index::sample(rng, len, salt) {
                    samples[i] = 255;
                }
                let pepper = ((pepper_prob * len as f64) as usize).min(len);
                for i in index::sample(rng, len, pepper) {
                    samples[i] = 0;
                }
            }
            NoiseKind::Poisson => {
                // One distribution per grey level, built on first use
                let mut levels: Vec<Option<Poisson<f64>>> = vec![None; 256];
                for sample in samples.iter_mut() {
                    if *sample == 0 {
                        continue;
                    }
                    let level = *sample as usize;
                    if levels[level].is_none() {
                        let lambda = level as f64 / 255.0 * POISSON_SCALE;
                        levels[level] = Some(Poisson::new(lambda).map_err(|e| OperationError::Failed(e.to_string()))?);
                    }
                    if let Some(dist) = &levels[level] {
                        *sample = clip(dist.sample(rng) / POISSON_SCALE * 255.0);
                    }
                }
            }
            NoiseKind::Speckle { mean, var } => {
                let dist = normal(mean, var)?;
                for sample in samples.iter_mut() {
                    let value = *sample as f64;
                    *sample = clip(value + value * dist.sample(rng));
                }
            }
            NoiseKind::Uniform { low, high } => {
                let (low, high) = (low as f64, high as f64);
                for sample in samples.iter_mut() {
                    let offset = if low == high { low } else { rng.gen_range(low..=high) };
                    *sample = clip(*sample as f64 + offset);
                }
            }
            NoiseKind::Periodic { frequency, amplitude } => {
                let pattern: Vec<f64> = (0..width)
                    .map(|x| (2.0 * PI * frequency as f64 * x as f64 / width as f64).sin() * amplitude as f64)
                    .collect();
                for (i, sample) in samples.iter_mut().enumerate() {
                    let x = (i / channels) % width;
                    *sample = clip((*sample as f64 + pattern[x]).round());
                }
            }
            NoiseKind::Impulse { prob } => {
                for sample in samples.iter_mut() {
                    if rng.gen::<f64>() < prob {
                        *sample = if rng.gen_bool(0.5) { 255 } else { 0 };
                    }
                }
            }
        }

        Ok(())
    }
}

/// Provider for the `simulated_noise_injector` module
pub struct SimulatedNoiseInjector {
    store: Arc<dyn ResultStore>,
}

type KindFromParams = fn(&Params) -> Result<NoiseKind, OperationError>;

impl SimulatedNoiseInjector {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    fn descriptor(name: &str) -> OperationDescriptor {
        OperationDescriptor::new(name)
            .param("input_path", ParamType::String)
            .param("file_type", ParamType::String)
            .param("output_folder", ParamType::String)
    }

    fn entry(&self, descriptor: OperationDescriptor, kind: KindFromParams) -> (OperationDescriptor, Arc<dyn Operation>) {
        (
            descriptor.run_id("run_id"),
            Arc::new(InjectNoise {
                store: self.store.clone(),
                kind,
            }) as Arc<dyn Operation>,
        )
    }
}

impl OperationProvider for SimulatedNoiseInjector {
    fn module_name(&self) -> &str {
        MODULE
    }

    fn operations(&self) -> Vec<(OperationDescriptor, Arc<dyn Operation>)> {
        vec![
            self.entry(
                Self::descriptor("add_gaussian_noise")
                    .param("mean", ParamType::Float)
                    .param("var", ParamType::Float),
                |params| {
                    Ok(NoiseKind::Gaussian {
                        mean: params.require_f64("mean")?,
                        var: params.require_f64("var")?,
                    })
                },
            ),
            self.entry(
                Self::descriptor("add_salt_and_pepper_noise")
                    .param("salt_prob", ParamType::Float)
                    .param("pepper_prob", ParamType::Float),
                |params| {
                    Ok(NoiseKind::SaltAndPepper {
                        salt_prob: params.require_f64("salt_prob")?,
                        pepper_prob: params.require_f64("pepper_prob")?,
                    })
                },
            ),
            self.entry(Self::descriptor("add_poisson_noise"), |_| Ok(NoiseKind::Poisson)),
            self.entry(
                Self::descriptor("add_speckle_noise")
                    .param("mean", ParamType::Float)
                    .param("var", ParamType::Float),
                |params| {
                    Ok(NoiseKind::Speckle {
                        mean: params.require_f64("mean")?,
                        var: params.require_f64("var")?,
                    })
                },
            ),
            self.entry(
                Self::descriptor("add_uniform_noise")
                    .param("low", ParamType::Integer)
                    .param("high", ParamType::Integer),
                |params| {
                    Ok(NoiseKind::Uniform {
                        low: params.require_i64("low")?,
                        high: params.require_i64("high")?,
                    })
                },
            ),
            self.entry(
                Self::descriptor("add_periodic_noise")
                    .param("frequency", ParamType::Integer)
                    .param("amplitude", ParamType::Integer),
                |params| {
                    Ok(NoiseKind::Periodic {
                        frequency: params.require_i64("frequency")?,
                        amplitude: params.require_i64("amplitude")?,
                    })
                },
            ),
            self.entry(
                Self::descriptor("add_impulse_noise").param("prob", ParamType::Float),
                |params| {
                    Ok(NoiseKind::Impulse {
                        prob: params.require_f64("prob")?,
                    })
                },
            ),
        ]
    }
}

struct InjectNoise {
    store: Arc<dyn ResultStore>,
    kind: KindFromParams,
}

impl Operation for InjectNoise {
    fn invoke(&self, params: Params) -> Result<ProgressStream, OperationError> {
        let input_path = PathBuf::from(params.require_str("input_path")?);
        let file_type = params.require_str("file_type")?;
        let output_folder = PathBuf::from(params.require_str("output_folder")?);
        let run_id = params.require_str("run_id")?;
        let kind = (self.kind)(&params)?;
        kind.validate()?;

        let inputs = collect_batch(&input_path, &[file_type.as_str()])?;
        std::fs::create_dir_all(&output_folder)?;
        info!(
            "Adding {:?} noise to {} file(s) from {} for run {}",
            kind,
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
                let output = blocking(move || inject(&input, &output_folder, kind)).await?;
                store.record_output(&StageOutput { run_id, ..output }).await?;
                Ok(())
            }
        }))
    }
}

/// Decode, corrupt and re-encode one file in its own format. The run id of
/// the returned output is filled in by the caller.
fn inject(input: &BatchItem, output_folder: &Path, kind: NoiseKind) -> Result<StageOutput, OperationError> {
    let source_size = file_size(&input.path)?;
    let target = input.output_in(output_folder, None);

    let started = Instant::now();
    let mut image = Image8::open(&input.path)?;
    kind.apply(&mut image, &mut rand::thread_rng())?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image.save(&target)?;
    let elapsed_us = started.elapsed().as_secs_f64() * 1_000_000.0;
    debug!("Wrote {}", target.display());

    Ok(StageOutput {
        run_id: String::new(),
        stage: Stage::Noisy,
        source_path: input.path.to_string_lossy().into_owned(),
        source_size,
        file: StageFile {
            size: file_size(&target)?,
            path: target.to_string_lossy().into_owned(),
            elapsed_us,
        },
    })
}
