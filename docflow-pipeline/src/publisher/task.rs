//! Handle on a connector running in its own task.

use std::future::Future;

use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::errors::ConnectorError;

/// A spawned connector execution whose outcome can be checked without blocking.
pub struct ConnectorTask {
    handle: Option<JoinHandle<Result<(), ConnectorError>>>,
    outcome: Option<Result<(), String>>,
}

impl ConnectorTask {
    pub fn new(handle: JoinHandle<Result<(), ConnectorError>>) -> Self {
        Self {
            handle: Some(handle),
            outcome: None,
        }
    }

    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), ConnectorError>> + Send + 'static,
    {
        Self::new(tokio::spawn(future))
    }

    fn poll_outcome(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        if !handle.is_finished() {
            return;
        }

        self.outcome = match handle.now_or_never() {
            Some(Ok(Ok(()))) => Some(Ok(())),
            Some(Ok(Err(e))) => Some(Err(e.to_string())),
            Some(Err(join_error)) => Some(Err(format!("connector task failed: {}", join_error))),
            None => None,
        };
        if self.outcome.is_some() {
            self.handle = None;
        }
    }

    /// Whether the connector has returned, successfully or not.
    pub fn is_finished(&mut self) -> bool {
        self.poll_outcome();
        self.outcome.is_some()
    }

    /// The connector's error, once it has failed.
    pub fn error(&mut self) -> Option<String> {
        self.poll_outcome();
        match &self.outcome {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Stop a connector that is still running.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            self.outcome.get_or_insert(Err("connector task aborted".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_finished(task: &mut ConnectorTask) {
        for _ in 0..100 {
            if task.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("connector task did not finish");
    }

    #[tokio::test]
    async fn test_successful_task() {
        let mut task = ConnectorTask::spawn(async { Ok(()) });

        wait_finished(&mut task).await;

        assert!(task.error().is_none());
    }

    #[tokio::test]
    async fn test_failed_task_reports_error() {
        let mut task = ConnectorTask::spawn(async { Err(ConnectorError::execution("source gone")) });

        wait_finished(&mut task).await;

        assert!(task.error().unwrap().contains("source gone"));
    }

    #[tokio::test]
    async fn test_running_task_is_not_finished() {
        let mut task = ConnectorTask::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        assert!(!task.is_finished());
        task.abort();
        assert!(task.is_finished());
        assert!(task.error().is_some());
    }
}
