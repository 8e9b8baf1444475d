//! Serializes mutating coordination-chain submissions one at a time, FIFO.
//! This is the *only* path any component uses to submit a coordination-chain
//! write; direct submissions are forbidden by construction — nothing outside
//! this module holds a reference to the `CoordinationChain` trait object
//! capable of calling `submit`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::errors::RelayerError;
use crate::external::{CoordinationCall, CoordinationChain, TxOutcome};

struct Job {
    call: CoordinationCall,
    respond_to: oneshot::Sender<Result<TxOutcome, RelayerError>>,
}

#[derive(Clone)]
pub struct TxSequencer {
    jobs: mpsc::Sender<Job>,
}

impl TxSequencer {
    /// Spawns the single worker task that drains `jobs` one at a time. The
    /// returned `TxSequencer` can be cloned freely; every clone shares the
    /// same worker, so FIFO ordering holds across all callers.
    pub fn spawn(chain: Arc<dyn CoordinationChain>, shutdown: tokio_util::sync::CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(256);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("tx sequencer shutting down");
                        return;
                    }
                    job = rx.recv() => {
                        let Some(job) = job else { return };
                        let label = job.call.label.clone();
                        let result = chain.submit(job.call).await;
                        if let Err(error) = &result {
                            warn!(label, %error, "sequenced submission failed");
                        }
                        // Failure of a task propagates to its caller only;
                        // the sequencer keeps draining the queue either way.
                        let _ = job.respond_to.send(result);
                    }
                }
            }
        });

        Self { jobs: tx }
    }

    pub async fn enqueue(&self, call: CoordinationCall) -> Result<TxOutcome, RelayerError> {
        let (respond_to, receiver) = oneshot::channel();
        self.jobs
            .send(Job { call, respond_to })
            .await
            .map_err(|_| RelayerError::Fatal("tx sequencer worker has shut down".into()))?;

        receiver.await.map_err(|_| RelayerError::Fatal("tx sequencer dropped response".into()))?
    }
}
