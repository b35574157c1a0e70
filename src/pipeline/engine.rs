//! The synchronous clustering pipeline.
//!
//! A [`ClusteringRun`] is a small state machine over the stages
//! `reduce -> cluster -> assemble`. Each call to [`ClusteringRun::advance`] runs one
//! stage and reports its checkpoints; [`ClusteringRun::execute`] runs them all.
//! The same run drives the blocking API ([`ClusteringEngine::cluster`]), the
//! streaming API ([`ClusteringEngine::cluster_stream`]) and background jobs.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use super::assemble::{assemble, ClusteringResult};
use super::batch::{PointId, VectorBatch};
use super::params::{normalize, ClusterParams, NormalizedParams};
use crate::cluster::{DimensionReducer, HdbscanFit, Umap};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::progress::{self, ChannelReporter, NoopReporter, ProgressEvent, ProgressReporter};

/// Entry point of the pipeline.
///
/// Cheap to clone; the reducer is shared.
#[derive(Clone)]
pub struct ClusteringEngine {
    reducer: Option<Arc<dyn DimensionReducer>>,
}

impl std::fmt::Debug for ClusteringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusteringEngine")
            .field("has_reducer", &self.reducer.is_some())
            .finish()
    }
}

impl Default for ClusteringEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusteringEngine {
    /// Engine with the default seeded [`Umap`] reducer.
    pub fn new() -> Self {
        Self::with_reducer(Arc::new(Umap::new()))
    }

    /// Engine whose reducer follows `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        let umap = Umap::new().with_seed(config.reduction_seed);
        let umap = match config.reduction_epochs {
            Some(epochs) => umap.with_n_epochs(epochs),
            None => umap,
        };
        Self::with_reducer(Arc::new(umap))
    }

    /// Engine with a custom reducer.
    pub fn with_reducer(reducer: Arc<dyn DimensionReducer>) -> Self {
        Self {
            reducer: Some(reducer),
        }
    }

    /// Engine without a reducer. Requests that enable reduction fall back to the
    /// original vectors.
    pub fn without_reducer() -> Self {
        Self { reducer: None }
    }

    /// Normalize `params` against `batch` and return a run ready to execute.
    ///
    /// # Errors
    ///
    /// Rejects invalid parameters before any stage runs (see [`normalize`]).
    pub fn prepare(&self, batch: VectorBatch, params: &ClusterParams) -> Result<ClusteringRun> {
        let normalized = normalize(batch.len(), batch.dim(), &params.reduction, &params.clustering)?;
        let (vectors, ids) = batch.into_parts();
        debug!(
            n_points = ids.len(),
            dims = vectors[0].len(),
            min_cluster_size = normalized.clustering.min_cluster_size,
            reduction = normalized.reduction.is_some(),
            "prepared clustering run"
        );
        let stage = if normalized.reduction.is_some() {
            Stage::Reduce
        } else {
            Stage::Cluster
        };
        Ok(ClusteringRun {
            reducer: self.reducer.clone(),
            params: normalized,
            ids,
            vectors,
            stage,
            fit: None,
            progress: 0,
        })
    }

    /// Run the whole pipeline and return the result.
    pub fn cluster(&self, batch: VectorBatch, params: &ClusterParams) -> Result<ClusteringResult> {
        self.cluster_with_progress(batch, params, &NoopReporter)
    }

    /// Run the whole pipeline, reporting each checkpoint to `reporter`.
    pub fn cluster_with_progress(
        &self,
        batch: VectorBatch,
        params: &ClusterParams,
        reporter: &dyn ProgressReporter,
    ) -> Result<ClusteringResult> {
        self.prepare(batch, params)?.execute(reporter)
    }

    /// Run the pipeline lazily as an iterator of progress events.
    ///
    /// Each stage runs on the calling thread when the iterator needs its next
    /// event. The last event is the terminal one.
    pub fn cluster_stream(&self, batch: VectorBatch, params: &ClusterParams) -> Result<ProgressStream> {
        let run = self.prepare(batch, params)?;
        let (reporter, events) = progress::channel();
        Ok(ProgressStream {
            run: Some(run),
            reporter,
            events,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Reduce,
    Cluster,
    Assemble,
    Done,
}

/// One pipeline invocation, owned by whoever executes it.
pub struct ClusteringRun {
    reducer: Option<Arc<dyn DimensionReducer>>,
    params: NormalizedParams,
    ids: Vec<PointId>,
    vectors: Vec<Vec<f32>>,
    stage: Stage,
    fit: Option<HdbscanFit>,
    progress: u8,
}

impl std::fmt::Debug for ClusteringRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusteringRun")
            .field("n_points", &self.ids.len())
            .field("stage", &self.stage)
            .field("progress", &self.progress)
            .field("params", &self.params)
            .finish()
    }
}

impl ClusteringRun {
    /// Parameters the run will apply. Reduction may still be dropped by a fallback.
    pub fn params(&self) -> &NormalizedParams {
        &self.params
    }

    pub fn n_points(&self) -> usize {
        self.ids.len()
    }

    /// Whether a terminal event has been reported.
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Last progress value reported.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Run the next stage.
    ///
    /// Returns `Ok(Some(result))` from the final stage, `Ok(None)` from the others
    /// and once the run is done. A clustering failure reports a `failed` event,
    /// ends the run, and is returned.
    pub fn advance(&mut self, reporter: &dyn ProgressReporter) -> Result<Option<ClusteringResult>> {
        match self.stage {
            Stage::Reduce => {
                self.reduce(reporter);
                self.stage = Stage::Cluster;
                Ok(None)
            }
            Stage::Cluster => {
                self.emit(reporter, ProgressEvent::running(60, "clustering"));
                let clusterer = self.params.clustering.clusterer();
                match clusterer.fit(&self.vectors) {
                    Ok(fit) => {
                        debug!(n_clusters = fit.n_clusters(), "density clustering finished");
                        self.fit = Some(fit);
                        self.stage = Stage::Assemble;
                        Ok(None)
                    }
                    Err(e) => {
                        let e = if matches!(e, Error::ClusteringFailed(_)) {
                            e
                        } else {
                            Error::ClusteringFailed(e.to_string())
                        };
                        self.fail(reporter, &e);
                        Err(e)
                    }
                }
            }
            Stage::Assemble => {
                self.emit(reporter, ProgressEvent::running(90, "assembling results"));
                let Some(fit) = self.fit.take() else {
                    let e = Error::ClusteringFailed("no labels to assemble".into());
                    self.fail(reporter, &e);
                    return Err(e);
                };
                let result = assemble(&self.ids, &fit, self.params.reduction, self.params.clustering);
                self.stage = Stage::Done;
                self.emit(reporter, ProgressEvent::completed(result.clone()));
                Ok(Some(result))
            }
            Stage::Done => Ok(None),
        }
    }

    /// Run every remaining stage.
    pub fn execute(mut self, reporter: &dyn ProgressReporter) -> Result<ClusteringResult> {
        while !self.is_done() {
            if let Some(result) = self.advance(reporter)? {
                return Ok(result);
            }
        }
        Err(Error::ClusteringFailed("run already finished".into()))
    }

    fn reduce(&mut self, reporter: &dyn ProgressReporter) {
        let Some(params) = self.params.reduction else {
            return;
        };
        self.emit(reporter, ProgressEvent::running(10, "reduction starting"));
        let outcome = match &self.reducer {
            Some(reducer) => reducer.fit_transform(&self.vectors, &params),
            None => Err(Error::ReductionUnavailable("no reducer configured".into())),
        };
        match outcome.and_then(|reduced| check_projection(reduced, self.ids.len(), params.target_dims)) {
            Ok(reduced) => {
                debug!(target_dims = params.target_dims, "reduction finished");
                self.vectors = reduced;
                self.emit(reporter, ProgressEvent::running(30, "reduction complete"));
            }
            Err(e) => {
                warn!(error = %e, "reduction unavailable, clustering original vectors");
                self.params = self.params.without_reduction();
                self.emit(
                    reporter,
                    ProgressEvent::running(30, "reduction unavailable, using original vectors"),
                );
            }
        }
    }

    fn emit(&mut self, reporter: &dyn ProgressReporter, event: ProgressEvent) {
        self.progress = self.progress.max(event.progress);
        reporter.report(&event);
    }

    fn fail(&mut self, reporter: &dyn ProgressReporter, error: &Error) {
        warn!(error = %error, progress = self.progress, "clustering run failed");
        self.stage = Stage::Done;
        let event = ProgressEvent::failed(self.progress, error.to_string());
        reporter.report(&event);
    }
}

fn check_projection(reduced: Vec<Vec<f32>>, n: usize, dim: usize) -> Result<Vec<Vec<f32>>> {
    if reduced.len() != n || reduced.iter().any(|v| v.len() != dim) {
        return Err(Error::ReductionUnavailable(format!(
            "reducer returned {} rows, expected {n} rows of {dim}",
            reduced.len()
        )));
    }
    Ok(reduced)
}

/// Lazily executed pipeline yielding its progress events.
///
/// Produced by [`ClusteringEngine::cluster_stream`].
#[derive(Debug)]
pub struct ProgressStream {
    run: Option<ClusteringRun>,
    reporter: ChannelReporter,
    events: UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    /// Drain the remaining events and return the outcome of the terminal one.
    pub fn finish(self) -> Result<ClusteringResult> {
        let mut outcome = None;
        for event in self {
            if event.is_terminal() {
                outcome = Some(event);
            }
        }
        match outcome {
            Some(ProgressEvent {
                result: Some(result), ..
            }) => Ok(result),
            Some(ProgressEvent { error, .. }) => Err(Error::ClusteringFailed(
                error.unwrap_or_else(|| "unknown error".into()),
            )),
            None => Err(Error::ClusteringFailed("stream ended without a terminal event".into())),
        }
    }
}

impl Iterator for ProgressStream {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            if let Ok(event) = self.events.try_recv() {
                return Some(event);
            }
            let run = self.run.as_mut()?;
            if run.is_done() {
                self.run = None;
                continue;
            }
            // Failures are already carried by the `failed` event.
            let _ = run.advance(&self.reporter);
        }
    }
}
