//! Merchant notification delivery.
//!
//! Enqueued on an order's first transition into `success` and drained by
//! the worker pool with at-least-once semantics; receivers deduplicate on
//! `order_no`. A delivery counts as successful only for an exact HTTP 200
//! response — other 2xx statuses are treated as failures.

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::notify_queue_repository::{NotifyQueueRepository, NotifyTask};

/// Exponential backoff table, seconds, by attempt index starting at 1.
/// Attempts past the table clamp to the last entry.
const RETRY_DELAYS_SECS: [i64; 5] = [60, 120, 300, 600, 1800];

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("failed to build notify HTTP client: {0}")]
    Client(String),
}

pub struct NotifyService {
    queue: Arc<NotifyQueueRepository>,
    http: Client,
    max_retry: i32,
}

impl NotifyService {
    pub fn new(queue: Arc<NotifyQueueRepository>, max_retry: i32) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;

        Ok(Self {
            queue,
            http,
            max_retry,
        })
    }

    /// Enqueue one delivery task.
    pub async fn add_notify(
        &self,
        order_id: i64,
        order_no: &str,
        notify_url: &str,
        notify_data: serde_json::Value,
    ) -> Result<NotifyTask, NotifyError> {
        let task = self
            .queue
            .create(order_id, order_no, notify_url, notify_data, self.max_retry)
            .await?;
        info!(order_no, task_id = task.id, "notify task enqueued");
        Ok(task)
    }

    /// Claim and process due tasks. Called by each worker on its tick;
    /// the skip-locked claim keeps workers off each other's rows.
    pub async fn process_due(&self, limit: i64) -> Result<usize, NotifyError> {
        let tasks = self.queue.claim_pending(limit).await?;
        let claimed = tasks.len();
        for task in tasks {
            self.process_task(task).await;
        }
        Ok(claimed)
    }

    async fn process_task(&self, task: NotifyTask) {
        info!(
            task_id = task.id,
            order_no = %task.order_no,
            retry_count = task.retry_count,
            "processing notify task"
        );

        match self.deliver(&task.notify_url, &task.notify_data).await {
            Ok(()) => {
                info!(task_id = task.id, order_no = %task.order_no, "notify task succeeded");
                if let Err(e) = self.queue.mark_success(task.id).await {
                    error!(task_id = task.id, error = %e, "failed to record notify success");
                }
            }
            Err(message) => {
                let retry_count = task.retry_count + 1;
                if retry_count >= task.max_retry {
                    error!(
                        task_id = task.id,
                        order_no = %task.order_no,
                        retry_count,
                        "notify task failed after max retries"
                    );
                    if let Err(e) = self
                        .queue
                        .mark_exhausted(task.id, retry_count, &message)
                        .await
                    {
                        error!(task_id = task.id, error = %e, "failed to record notify exhaustion");
                    }
                } else {
                    let next_retry_time =
                        Utc::now() + ChronoDuration::seconds(retry_delay_secs(retry_count));
                    warn!(
                        task_id = task.id,
                        order_no = %task.order_no,
                        retry_count,
                        next_retry_time = %next_retry_time,
                        "notify task failed, will retry"
                    );
                    if let Err(e) = self
                        .queue
                        .mark_retry(task.id, retry_count, &message, next_retry_time)
                        .await
                    {
                        error!(task_id = task.id, error = %e, "failed to record notify retry");
                    }
                }
            }
        }
    }

    /// One delivery attempt. Success iff the response status is exactly
    /// 200.
    async fn deliver(&self, notify_url: &str, notify_data: &serde_json::Value) -> Result<(), String> {
        let response = self
            .http
            .post(notify_url)
            .json(notify_data)
            .send()
            .await
            .map_err(|e| format!("failed to send request: {}", e))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(format!("unexpected status code: {}", status));
        }
        Ok(())
    }
}

/// Delay before retry number `attempt` (1-based).
fn retry_delay_secs(attempt: i32) -> i64 {
    let index = (attempt.max(1) as usize - 1).min(RETRY_DELAYS_SECS.len() - 1);
    RETRY_DELAYS_SECS[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_schedule_and_clamps() {
        assert_eq!(retry_delay_secs(1), 60);
        assert_eq!(retry_delay_secs(2), 120);
        assert_eq!(retry_delay_secs(3), 300);
        assert_eq!(retry_delay_secs(4), 600);
        assert_eq!(retry_delay_secs(5), 1800);
        assert_eq!(retry_delay_secs(6), 1800);
        assert_eq!(retry_delay_secs(100), 1800);
    }

    #[test]
    fn backoff_tolerates_degenerate_input() {
        assert_eq!(retry_delay_secs(0), 60);
        assert_eq!(retry_delay_secs(-3), 60);
    }
}
