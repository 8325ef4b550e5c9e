//! Bounded worker pool for per-file jobs.
//!
//! Jobs are blocking file work; each runs on the blocking thread pool while
//! a semaphore caps how many are in flight. A failing job never aborts its
//! siblings: failures are collected and reported together.

use crate::error::LabError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

/// Results of one pool run, in input order.
#[derive(Debug)]
pub struct PoolOutcome<T> {
    pub succeeded: Vec<(PathBuf, T)>,
    pub failed: Vec<(PathBuf, LabError)>,
}

impl<T> PoolOutcome<T> {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Successful values, or [`LabError::Pool`] if anything failed.
    pub fn into_result(self) -> Result<Vec<(PathBuf, T)>, LabError> {
        let total = self.total();
        match self.failed.into_iter().next() {
            None => Ok(self.succeeded),
            Some((path, first)) => Err(LabError::Pool {
                failed: total - self.succeeded.len(),
                total,
                first: format!("{}: {first}", path.display()),
            }),
        }
    }
}

/// Apply `job` to every input with at most `workers` running at once.
pub async fn map_paths<T, F>(inputs: Vec<PathBuf>, workers: usize, job: F) -> PoolOutcome<T>
where
    T: Send + 'static,
    F: Fn(&Path) -> Result<T, LabError> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let job = Arc::new(job);

    let mut handles = Vec::with_capacity(inputs.len());
    for input in inputs {
        let sem = semaphore.clone();
        let job = job.clone();
        let path = input.clone();
        let handle = tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| LabError::Io(std::io::Error::other(e)))?;
            tokio::task::spawn_blocking(move || job(&path))
                .await
                .map_err(|e| LabError::Io(std::io::Error::other(e)))?
        });
        handles.push((input, handle));
    }

    let mut outcome = PoolOutcome {
        succeeded: Vec::new(),
        failed: Vec::new(),
    };
    for (input, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(LabError::Io(std::io::Error::other(e))),
        };
        match result {
            Ok(value) => outcome.succeeded.push((input, value)),
            Err(e) => {
                warn!(input = %input.display(), error = %e, "Worker job failed");
                outcome.failed.push((input, e));
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_all_jobs_succeed_in_input_order() {
        let inputs: Vec<PathBuf> = (0..8).map(|i| PathBuf::from(format!("f{i}"))).collect();
        let outcome = map_paths(inputs.clone(), 3, |p| Ok(p.to_string_lossy().len())).await;
        assert!(outcome.failed.is_empty());
        let order: Vec<PathBuf> = outcome.succeeded.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(order, inputs);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_siblings() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let inputs = vec![
            PathBuf::from("ok-1"),
            PathBuf::from("bad"),
            PathBuf::from("ok-2"),
        ];
        let outcome = map_paths(inputs, 2, move |p| {
            counter.fetch_add(1, Ordering::SeqCst);
            if p == Path::new("bad") {
                Err(LabError::corpus("unreadable"))
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.succeeded.len(), 2);
        match outcome.into_result() {
            Err(LabError::Pool { failed, total, first }) => {
                assert_eq!((failed, total), (1, 3));
                assert!(first.starts_with("bad:"));
            }
            other => panic!("expected pool error, got {other:?}"),
        }
    }
}
