//! Event sink and background-task handles for one request.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::PipelineError;
use crate::pipeline::events::PipelineEvent;

/// Where a run publishes its events. A detached sink drops them.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl EventSink {
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Send one event. A closed channel means the consumer went away.
    pub async fn emit(&self, event: PipelineEvent) -> Result<(), PipelineError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        tx.send(event).await.map_err(|_| PipelineError::Cancelled)
    }
}

/// A spawned optional stage. Aborted when dropped unjoined, so a cancelled
/// request leaves no model calls behind.
pub(crate) struct BackgroundTask<T> {
    name: &'static str,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            name,
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Wait for the result. `None` if the task panicked or was aborted.
    pub async fn join(mut self) -> Option<T> {
        let handle = self.handle.as_mut()?;
        let result = handle.await;
        self.handle = None;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(task = self.name, "Background task did not complete: {e}");
                None
            }
        }
    }
}

impl<T> Drop for BackgroundTask<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn detached_sink_accepts_everything() {
        let sink = EventSink::detached();
        assert!(sink.emit(PipelineEvent::Delta("x".into())).await.is_ok());
    }

    #[tokio::test]
    async fn closed_channel_is_cancellation() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = EventSink::new(tx)
            .emit(PipelineEvent::Delta("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn join_returns_value() {
        let task = BackgroundTask::spawn("test", async { 7 });
        assert_eq!(task.join().await, Some(7));
    }

    #[tokio::test]
    async fn panicking_task_joins_as_none() {
        let task: BackgroundTask<()> = BackgroundTask::spawn("test", async { panic!("boom") });
        assert_eq!(task.join().await, None);
    }

    #[tokio::test]
    async fn dropping_unjoined_task_aborts_it() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let task = BackgroundTask::spawn("test", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });
        drop(task);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
