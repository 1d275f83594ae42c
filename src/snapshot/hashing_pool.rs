use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::thread::available_parallelism;

use compio::dispatcher::{Dispatcher, DispatcherBuilder};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use futures_channel::oneshot::Canceled;
use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use crate::ext::BestEffortPathExt;
use crate::snapshot::{ContentHash, NodeId};

/// Default number of worker threads when unable to determine system parallelism
const DEFAULT_WORKER_THREADS: NonZeroUsize = NonZeroUsize::MIN;

/// A file waiting to be hashed, addressed by the tree node it belongs to
#[derive(Debug, Clone)]
pub struct HashJob {
    pub node: NodeId,
    pub path: PathBuf,
}

/// Hashes files on a pool of compio worker threads.
pub struct HashingPool {
    dispatcher: Dispatcher,
    chunk_size: usize,
    max_in_flight: usize,
}

impl HashingPool {
    pub fn new(
        worker_threads: Option<NonZeroUsize>,
        chunk_size: usize,
        max_in_flight: usize,
    ) -> Result<Self, HashingPoolCreationError> {
        let workers_num = worker_threads.unwrap_or_else(Self::determine_worker_count);
        debug!("Using {} worker threads for file hashing", workers_num);

        let dispatcher = DispatcherBuilder::new()
            .worker_threads(workers_num)
            .build()
            .context(DispatcherSnafu)?;

        Ok(Self {
            dispatcher,
            chunk_size,
            max_in_flight: max_in_flight.max(1),
        })
    }

    /// Determines the optimal number of worker threads for hashing
    fn determine_worker_count() -> NonZeroUsize {
        available_parallelism().unwrap_or(DEFAULT_WORKER_THREADS)
    }

    /// Hashes every job and returns one result per job, in completion order.
    ///
    /// A file that cannot be read yields `None` instead of failing the batch.
    pub async fn hash_all(
        &self,
        jobs: Vec<HashJob>,
    ) -> Result<Vec<(NodeId, Option<ContentHash>)>, HashingError> {
        debug!("Hashing {} files", jobs.len());

        let mut results = Vec::with_capacity(jobs.len());
        let mut in_flight = FuturesUnordered::new();

        for job in jobs {
            let HashJob { node, path } = job;
            let chunk_size = self.chunk_size;
            let job_path = path.clone();
            let receiver = self
                .dispatcher
                .dispatch(move || async move { ContentHash::from_file(&job_path, chunk_size).await })
                .map_err(|e| HashingError::DispatchError {
                    path: path.best_effort_path_display(),
                    error: e.to_string(),
                })?;

            in_flight.push(async move {
                let hash = match receiver.await {
                    Ok(Ok(hash)) => Some(hash),
                    Ok(Err(error)) => {
                        warn!("Could not read file for hashing: {}", error);
                        None
                    }
                    Err(Canceled) => {
                        warn!(
                            "Hashing of {} was canceled before it finished",
                            path.best_effort_path_display()
                        );
                        None
                    }
                };
                (node, hash)
            });

            if in_flight.len() >= self.max_in_flight {
                if let Some(result) = in_flight.next().await {
                    results.push(result);
                }
            }
        }

        while let Some(result) = in_flight.next().await {
            results.push(result);
        }

        Ok(results)
    }
}

#[derive(Debug, Snafu)]
pub enum HashingPoolCreationError {
    #[snafu(display("Failed to create hashing dispatcher"))]
    DispatcherError { source: std::io::Error },
}

#[derive(Debug, Snafu)]
pub enum HashingError {
    #[snafu(display("Failed to dispatch hashing of {}: {}", path, error))]
    DispatchError { path: String, error: String },
}
