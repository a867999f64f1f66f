//! Inference executor abstraction
//!
//! The runtime treats inference as an opaque capability: load a model from a
//! byte slice, query the single input/output tensor names and 4-D float
//! shapes, and run asynchronously with a completion callback. The production
//! implementation wraps ONNX Runtime with one worker thread per session, so
//! completion callbacks always arrive off the caller's thread.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use parking_lot::Mutex;
use tracing::info;

use crate::config::InferenceConfig;

/// Completion callback for [`InferSession::run_async`].
pub type RunCallback = Box<dyn FnOnce(Result<Array4<f32>>) + Send>;

/// A loaded model session: one float 4-D input, one float 4-D output.
pub trait InferSession: Send + Sync {
    fn input_name(&self) -> &str;
    fn output_name(&self) -> &str;
    fn input_shape(&self) -> [i64; 4];
    fn output_shape(&self) -> [i64; 4];

    /// Queue one inference. `done` is invoked from an executor-owned thread
    /// with the produced output tensor, or the failure. An `Err` return means
    /// the job was never queued and `done` will not be called.
    fn run_async(&self, input: Array4<f32>, done: RunCallback) -> Result<()>;
}

/// Factory for [`InferSession`] handles.
pub trait Executor: Send + Sync {
    fn load(&self, model: &[u8]) -> Result<Arc<dyn InferSession>>;
}

/// ONNX Runtime backed executor.
pub struct OrtExecutor {
    config: InferenceConfig,
}

impl OrtExecutor {
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    fn optimization_level(&self) -> Result<GraphOptimizationLevel> {
        Ok(match self.config.optimization_level.as_str() {
            "disable" => GraphOptimizationLevel::Disable,
            "basic" => GraphOptimizationLevel::Level1,
            "extended" => GraphOptimizationLevel::Level2,
            "all" => GraphOptimizationLevel::Level3,
            other => bail!("unknown optimization level '{other}'"),
        })
    }
}

impl Default for OrtExecutor {
    fn default() -> Self {
        Self::new(InferenceConfig::default())
    }
}

impl Executor for OrtExecutor {
    fn load(&self, model: &[u8]) -> Result<Arc<dyn InferSession>> {
        let start = Instant::now();
        let session = Session::builder()?
            .with_optimization_level(self.optimization_level()?)?
            .with_intra_threads(self.config.intra_threads)?
            .commit_from_memory(model)
            .context("failed to load model")?;

        if session.inputs.len() != 1 {
            bail!("model has {} inputs, expected 1", session.inputs.len());
        }
        if session.outputs.len() != 1 {
            bail!("model has {} outputs, expected 1", session.outputs.len());
        }
        let input_name = session.inputs[0].name.clone();
        let output_name = session.outputs[0].name.clone();
        let input_shape = float_tensor_shape(&session.inputs[0].input_type)
            .context("model input")?;
        let output_shape = float_tensor_shape(&session.outputs[0].output_type)
            .context("model output")?;

        info!(
            input = %input_name,
            output = %output_name,
            "session ready in {:?}",
            start.elapsed()
        );
        Ok(Arc::new(OrtSession::spawn(
            session,
            input_name,
            output_name,
            input_shape,
            output_shape,
        )?))
    }
}

fn float_tensor_shape(value_type: &ValueType) -> Result<[i64; 4]> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        bail!("not a tensor type");
    };
    if *ty != TensorElementType::Float32 {
        bail!("wrong element type {ty:?}");
    }
    let dims: Vec<i64> = shape.iter().copied().collect();
    let dims: [i64; 4] = dims
        .try_into()
        .map_err(|dims: Vec<i64>| anyhow::anyhow!("wrong dimension count {}", dims.len()))?;
    Ok(dims)
}

struct Job {
    input: Array4<f32>,
    done: RunCallback,
}

/// One ONNX Runtime session serviced by a dedicated worker thread. Jobs run
/// serially in submission order; the channel closes on drop and the worker
/// is joined.
struct OrtSession {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    input_name: String,
    output_name: String,
    input_shape: [i64; 4],
    output_shape: [i64; 4],
}

impl OrtSession {
    fn spawn(
        session: Session,
        input_name: String,
        output_name: String,
        input_shape: [i64; 4],
        output_shape: [i64; 4],
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = {
            let (input_name, output_name) = (input_name.clone(), output_name.clone());
            std::thread::Builder::new()
                .name("facemime-infer".into())
                .spawn(move || {
                    let mut session = session;
                    for job in rx {
                        let result = run_once(&mut session, &input_name, &output_name, job.input);
                        (job.done)(result);
                    }
                })
                .context("failed to spawn inference worker")?
        };
        Ok(Self {
            jobs: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            input_name,
            output_name,
            input_shape,
            output_shape,
        })
    }
}

fn run_once(
    session: &mut Session,
    input_name: &str,
    output_name: &str,
    input: Array4<f32>,
) -> Result<Array4<f32>> {
    let tensor = Tensor::from_array(input)?;
    let outputs = session
        .run(ort::inputs![input_name => tensor])
        .context("inference failed")?;
    let output: ndarray::ArrayViewD<f32> = outputs[output_name]
        .try_extract_array()
        .context("failed to extract output")?;
    Ok(output.to_owned().into_dimensionality()?)
}

impl InferSession for OrtSession {
    fn input_name(&self) -> &str {
        &self.input_name
    }

    fn output_name(&self) -> &str {
        &self.output_name
    }

    fn input_shape(&self) -> [i64; 4] {
        self.input_shape
    }

    fn output_shape(&self) -> [i64; 4] {
        self.output_shape
    }

    fn run_async(&self, input: Array4<f32>, done: RunCallback) -> Result<()> {
        let jobs = self.jobs.lock();
        let sender = jobs.as_ref().context("session is shutting down")?;
        sender
            .send(Job { input, done })
            .map_err(|_| anyhow::anyhow!("inference worker exited"))?;
        Ok(())
    }
}

impl Drop for OrtSession {
    fn drop(&mut self) {
        // Close the channel so the worker drains and exits.
        self.jobs.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}
