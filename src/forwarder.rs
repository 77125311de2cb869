use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::fieldset::FieldSet;

/// Key added to the collector payload to identify the submitting user.
pub const USER_ID_KEY: &str = "userId";

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector request failed: {0}")]
    Transport(String),

    #[error("collector returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        CollectorError::Transport(err.to_string())
    }
}

/// Final outcome of a submission, delivered to the user out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The collector accepted the data.
    Submitted,
    /// The collector answered with a non-success status.
    SubmissionFailed,
    /// The collector could not be reached or timed out.
    SubmissionError,
}

/// Downstream system that receives finalized field-sets.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn submit(&self, user_id: &str, fields: &FieldSet) -> Result<(), CollectorError>;
}

/// Pushes messages to a user outside of any reply context.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, notification: Notification);
}

/// Posts the field-set as one flat JSON object with an extra `userId` key.
#[derive(Debug, Clone)]
pub struct HttpCollector {
    http: Client,
    url: String,
}

impl HttpCollector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CollectorError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url: url.into() })
    }
}

/// The body posted to the collector.
pub fn collector_payload(user_id: &str, fields: &FieldSet) -> Value {
    let mut payload = fields.to_json();
    payload.insert(USER_ID_KEY.to_string(), Value::String(user_id.to_string()));
    Value::Object(payload)
}

#[async_trait]
impl Collector for HttpCollector {
    #[tracing::instrument(name = "collector_submit", skip(self, fields))]
    async fn submit(&self, user_id: &str, fields: &FieldSet) -> Result<(), CollectorError> {
        let payload = collector_payload(user_id, fields);
        info!("Sending data to collector: {}", payload);

        let resp = self.http.post(&self.url).json(&payload).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_else(|_| "<no body>".into());
        if status.is_success() {
            info!(status = status.as_u16(), "collector accepted submission: {}", body);
            Ok(())
        } else {
            Err(CollectorError::Status { status: status.as_u16(), body })
        }
    }
}

/// A finalized field-set waiting to be forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionJob {
    pub user_id: String,
    pub fields: FieldSet,
}

#[derive(Debug, Error)]
#[error("submission worker has stopped")]
pub struct QueueClosed;

/// Sending half handed to the edit state machine.
#[derive(Debug, Clone)]
pub struct SubmissionQueue {
    tx: UnboundedSender<SubmissionJob>,
}

impl SubmissionQueue {
    pub fn new() -> (Self, UnboundedReceiver<SubmissionJob>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hands a job to the worker without waiting for it to run.
    pub fn enqueue(&self, job: SubmissionJob) -> Result<(), QueueClosed> {
        self.tx.send(job).map_err(|_| QueueClosed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Wait before retry n is n times this.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Consumes [`SubmissionJob`]s and reports every outcome through the
/// [`Notifier`]. Each job runs on its own task.
pub struct SubmissionWorker {
    collector: Arc<dyn Collector>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl SubmissionWorker {
    pub fn new(collector: Arc<dyn Collector>, notifier: Arc<dyn Notifier>, retry: RetryPolicy) -> Self {
        Self { collector, notifier, retry }
    }

    /// Runs until every [`SubmissionQueue`] clone is dropped.
    pub fn spawn(self, mut rx: UnboundedReceiver<SubmissionJob>) -> JoinHandle<()> {
        let worker = Arc::new(self);
        tokio::spawn(async move {
            let mut in_flight = Vec::new();
            while let Some(job) = rx.recv().await {
                let worker = worker.clone();
                in_flight.push(tokio::spawn(async move { worker.forward(job).await }));
                in_flight.retain(|h: &JoinHandle<Notification>| !h.is_finished());
            }
            for handle in in_flight {
                let _ = handle.await;
            }
            info!("submission worker stopped");
        })
    }

    /// Forwards one job and notifies the user. Never fails.
    pub async fn forward(&self, job: SubmissionJob) -> Notification {
        let SubmissionJob { user_id, fields } = job;
        let mut attempt = 0;
        let notification = loop {
            match self.collector.submit(&user_id, &fields).await {
                Ok(()) => break Notification::Submitted,
                Err(err) if attempt < self.retry.retries => {
                    attempt += 1;
                    warn!(%user_id, attempt, error = %err, "collector submission failed, retrying");
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(CollectorError::Status { status, body }) => {
                    error!(%user_id, status, "collector rejected submission: {}", body);
                    break Notification::SubmissionFailed;
                }
                Err(err @ CollectorError::Transport(_)) => {
                    error!(%user_id, error = %err, "collector submission errored");
                    break Notification::SubmissionError;
                }
            }
        };

        self.notifier.notify(&user_id, notification.clone()).await;
        notification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedCollector {
        results: Mutex<Vec<Result<(), CollectorError>>>,
        calls: AtomicU32,
    }

    impl ScriptedCollector {
        fn new(mut results: Vec<Result<(), CollectorError>>) -> Arc<Self> {
            results.reverse();
            Arc::new(Self { results: Mutex::new(results), calls: AtomicU32::new(0) })
        }
    }

    #[async_trait]
    impl Collector for ScriptedCollector {
        async fn submit(&self, _user_id: &str, _fields: &FieldSet) -> Result<(), CollectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.lock().unwrap().pop().unwrap_or(Ok(()))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<(String, Notification)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, user_id: &str, notification: Notification) {
            self.seen.lock().unwrap().push((user_id.to_string(), notification));
        }
    }

    fn job() -> SubmissionJob {
        SubmissionJob {
            user_id: "U1".into(),
            fields: [("total", Some("1200"))].into_iter().collect(),
        }
    }

    fn no_wait(retries: u32) -> RetryPolicy {
        RetryPolicy { retries, backoff: Duration::from_millis(1) }
    }

    #[test]
    fn test_payload_is_flat_with_user_id() {
        let fields: FieldSet = [("store", Some("Lawson")), ("tax", None)].into_iter().collect();
        let payload = collector_payload("U9", &fields);
        assert_eq!(
            payload,
            serde_json::json!({"store": "Lawson", "tax": null, "userId": "U9"})
        );
    }

    #[tokio::test]
    async fn test_success_notifies_submitted() {
        let notifier = Arc::new(RecordingNotifier::default());
        let worker = SubmissionWorker::new(ScriptedCollector::new(vec![Ok(())]), notifier.clone(), no_wait(0));
        assert_eq!(worker.forward(job()).await, Notification::Submitted);
        assert_eq!(notifier.seen.lock().unwrap().as_slice(), &[("U1".to_string(), Notification::Submitted)]);
    }

    #[tokio::test]
    async fn test_status_failure_is_not_retried_by_default() {
        let collector = ScriptedCollector::new(vec![Err(CollectorError::Status { status: 500, body: "boom".into() })]);
        let notifier = Arc::new(RecordingNotifier::default());
        let worker = SubmissionWorker::new(collector.clone(), notifier.clone(), no_wait(0));
        assert_eq!(worker.forward(job()).await, Notification::SubmissionFailed);
        assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_notifies_error() {
        let collector = ScriptedCollector::new(vec![Err(CollectorError::Transport("timeout".into()))]);
        let notifier = Arc::new(RecordingNotifier::default());
        let worker = SubmissionWorker::new(collector, notifier.clone(), no_wait(0));
        assert_eq!(worker.forward(job()).await, Notification::SubmissionError);
        assert_eq!(notifier.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let collector = ScriptedCollector::new(vec![
            Err(CollectorError::Transport("reset".into())),
            Err(CollectorError::Status { status: 503, body: String::new() }),
            Ok(()),
        ]);
        let notifier = Arc::new(RecordingNotifier::default());
        let worker = SubmissionWorker::new(collector.clone(), notifier.clone(), no_wait(2));
        assert_eq!(worker.forward(job()).await, Notification::Submitted);
        assert_eq!(collector.calls.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_worker_drains_queue_then_stops() {
        let notifier = Arc::new(RecordingNotifier::default());
        let worker = SubmissionWorker::new(ScriptedCollector::new(vec![]), notifier.clone(), no_wait(0));
        let (queue, rx) = SubmissionQueue::new();
        let handle = worker.spawn(rx);

        queue.enqueue(job()).unwrap();
        queue.enqueue(SubmissionJob { user_id: "U2".into(), fields: FieldSet::new() }).unwrap();
        drop(queue);
        handle.await.unwrap();

        let mut users: Vec<String> = notifier.seen.lock().unwrap().iter().map(|(u, _)| u.clone()).collect();
        users.sort();
        assert_eq!(users, vec!["U1".to_string(), "U2".to_string()]);
    }

    #[tokio::test]
    async fn test_enqueue_after_worker_gone() {
        let (queue, rx) = SubmissionQueue::new();
        drop(rx);
        assert!(queue.enqueue(job()).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_transport_error() {
        let collector = HttpCollector::new("http://127.0.0.1:9/collect", Duration::from_secs(2)).unwrap();
        let err = collector.submit("U1", &FieldSet::new()).await.unwrap_err();
        assert!(matches!(err, CollectorError::Transport(_)));
    }
}
