use faceprint_core::{FaceDetector, Frame, Pipeline, PipelineError, Trainer};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn analysis thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("analysis thread panicked")]
    Panicked,
}

/// What the analysis thread pushes to the display surface. No acknowledgement.
#[derive(Debug)]
pub enum DisplayEvent {
    Frame(Frame),
    Status(String),
}

/// Counters reported when the analysis thread exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisStats {
    pub processed: u64,
    /// Frames overwritten in the hand-off slot before analysis reached them.
    pub superseded: u64,
}

/// Producer side of the analysis thread.
pub struct EngineHandle {
    frames: watch::Sender<Option<Frame>>,
    thread: JoinHandle<Result<AnalysisStats, EngineError>>,
}

impl EngineHandle {
    /// Offer a frame. Replaces any frame the analysis thread has not picked up yet.
    pub fn submit(&self, frame: Frame) {
        self.frames.send_replace(Some(frame));
    }

    /// Whether the analysis thread is still accepting frames.
    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Close the hand-off and wait for the thread to drain the last frame.
    pub fn finish(self) -> Result<AnalysisStats, EngineError> {
        drop(self.frames);
        self.thread.join().map_err(|_| EngineError::Panicked)?
    }
}

/// Spawn the analysis loop on a dedicated OS thread that owns `pipeline`.
///
/// `runtime` drives the watch channel from the blocking thread. The thread
/// stops on the first pipeline error or once the handle is finished.
pub fn spawn_analysis<D, T>(
    pipeline: Pipeline<D, T>,
    display: mpsc::UnboundedSender<DisplayEvent>,
    runtime: Handle,
) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + Send + 'static,
    T: Trainer + Send + 'static,
    T::Model: Send,
{
    let (tx, rx) = watch::channel::<Option<Frame>>(None);

    let thread = std::thread::Builder::new()
        .name("faceprint-analysis".into())
        .spawn(move || {
            tracing::info!("analysis thread started");
            let result = run_analysis(pipeline, rx, &display, &runtime);
            match &result {
                Ok(stats) => tracing::info!(
                    processed = stats.processed,
                    superseded = stats.superseded,
                    "analysis thread exiting"
                ),
                Err(e) => tracing::error!(error = %e, "analysis thread stopped"),
            }
            result
        })?;

    Ok(EngineHandle { frames: tx, thread })
}

fn run_analysis<D, T>(
    mut pipeline: Pipeline<D, T>,
    mut rx: watch::Receiver<Option<Frame>>,
    display: &mpsc::UnboundedSender<DisplayEvent>,
    runtime: &Handle,
) -> Result<AnalysisStats, EngineError>
where
    D: FaceDetector,
    T: Trainer,
{
    let mut stats = AnalysisStats::default();
    let mut last_sequence: Option<u64> = None;

    // Err means the producer is gone and the last value was already seen.
    while runtime.block_on(rx.changed()).is_ok() {
        let Some(frame) = rx.borrow_and_update().clone() else {
            continue;
        };
        if let Some(last) = last_sequence {
            stats.superseded += frame.sequence.saturating_sub(last + 1);
        }
        last_sequence = Some(frame.sequence);

        let captured_at = frame.captured_at;
        let outcome = pipeline.process(frame)?;
        stats.processed += 1;
        tracing::trace!(
            sequence = outcome.frame.sequence,
            latency_ms = captured_at.elapsed().as_millis() as u64,
            "frame analysed"
        );

        for status in outcome.statuses {
            let _ = display.send(DisplayEvent::Status(status));
        }
        let _ = display.send(DisplayEvent::Frame(outcome.frame));
    }
    Ok(stats)
}
