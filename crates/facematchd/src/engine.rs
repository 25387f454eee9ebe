use facematch_core::{AnalyzerError, FaceAnalyzer, Gallery, MatchResult, ThresholdMatcher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests queued for the engine thread before senders wait.
const ENGINE_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Process {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<MatchResult>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    gallery: Arc<Gallery>,
    matcher: ThresholdMatcher,
}

impl EngineHandle {
    /// Decode, detect, embed and match one uploaded image.
    pub async fn process(&self, image: Vec<u8>) -> Result<Vec<MatchResult>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Process { image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn matcher(&self) -> &ThresholdMatcher {
        &self.matcher
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The analyzer holds the ONNX sessions and is used only from that thread.
/// The gallery must already be fully loaded; it is never modified afterwards.
pub fn spawn_engine(
    analyzer: Box<dyn FaceAnalyzer + Send>,
    gallery: Gallery,
    matcher: ThresholdMatcher,
) -> Result<EngineHandle, EngineError> {
    let gallery = Arc::new(gallery);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);

    let thread_gallery = Arc::clone(&gallery);
    let mut analyzer = analyzer;
    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!(references = thread_gallery.len(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Process { image, reply } => {
                        let result = run_process(&image, analyzer.as_mut(), &matcher, &thread_gallery);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, gallery, matcher })
}

fn run_process(
    image: &[u8],
    analyzer: &mut (dyn FaceAnalyzer + Send),
    matcher: &ThresholdMatcher,
    gallery: &Gallery,
) -> Result<Vec<MatchResult>, EngineError> {
    let started = std::time::Instant::now();
    let results = facematch_core::process_image(image, analyzer, matcher, gallery)?;
    tracing::debug!(
        bytes = image.len(),
        faces = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "process: done"
    );
    Ok(results)
}
