//! Supervised background tasks.
//!
//! Long-running consumers and RPC servers run under a [`Supervisor`]: each
//! task is restarted with exponential backoff when it fails or panics, and
//! all of them stop when shutdown is signalled.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Restart behaviour for supervised tasks.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Restarts allowed before the task is given up on.
    pub max_restarts: usize,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_restarts: usize::MAX,
        }
    }
}

impl RestartPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_restarts)
            .with_jitter()
            .build()
    }
}

/// Owns a set of background tasks and their shutdown signal.
pub struct Supervisor {
    tasks: JoinSet<()>,
    shutdown: watch::Sender<bool>,
    policy: RestartPolicy,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(RestartPolicy::default())
    }
}

impl Supervisor {
    pub fn new(policy: RestartPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            shutdown,
            policy,
        }
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs the future produced by `factory` until it completes successfully
    /// or shutdown is signalled. Errors and panics restart it after a backoff
    /// delay.
    pub fn spawn<F, Fut, E>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let policy = self.policy;
        let mut shutdown = self.shutdown.subscribe();

        self.tasks.spawn(async move {
            let mut backoff = policy.backoff();
            let mut restarts = 0usize;

            loop {
                let started = Instant::now();
                let run = AssertUnwindSafe(factory()).catch_unwind();
                let outcome = tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    outcome = run => outcome,
                };

                match outcome {
                    Ok(Ok(())) => {
                        info!(task = %name, "Supervised task finished");
                        break;
                    }
                    Ok(Err(e)) => error!(task = %name, error = %e, "Supervised task failed"),
                    Err(panic) => error!(
                        task = %name,
                        panic = %panic_message(panic.as_ref()),
                        "Supervised task panicked"
                    ),
                }

                if started.elapsed() > policy.max_delay {
                    backoff = policy.backoff();
                }
                let Some(delay) = backoff.next() else {
                    error!(task = %name, restarts, "Supervised task gave up");
                    break;
                };
                restarts += 1;
                metrics::counter!("supervised_task_restarts_total", "task" => name.clone())
                    .increment(1);
                warn!(task = %name, delay_ms = delay.as_millis() as u64, "Restarting supervised task");

                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });
    }

    /// Signals every task to stop and waits for them to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Supervised task did not stop cleanly");
            }
        }
        info!("All supervised tasks stopped");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast_policy(max_restarts: usize) -> RestartPolicy {
        RestartPolicy {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_restarts,
        }
    }

    #[tokio::test]
    async fn failing_task_is_restarted() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut supervisor = Supervisor::new(fast_policy(usize::MAX));

        let counter = runs.clone();
        supervisor.spawn("flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not ready")
                } else {
                    Ok(())
                }
            }
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while !supervisor.tasks.is_empty() {
                supervisor.tasks.join_next().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn panicking_task_is_isolated_and_restarted() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut supervisor = Supervisor::new(fast_policy(2));

        let counter = runs.clone();
        supervisor.spawn("panicky", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if counter.load(Ordering::SeqCst) > 0 {
                    panic!("handler exploded");
                }
                Ok::<(), String>(())
            }
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(joined) = supervisor.tasks.join_next().await {
                assert!(joined.is_ok());
            }
        })
        .await
        .unwrap();
        // One initial run plus two restarts before giving up.
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_stops_long_running_tasks() {
        let mut supervisor = Supervisor::default();
        supervisor.spawn("forever", || async {
            std::future::pending::<()>().await;
            Ok::<(), String>(())
        });
        assert_eq!(supervisor.len(), 1);

        tokio::time::timeout(Duration::from_secs(1), supervisor.shutdown())
            .await
            .unwrap();
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }
}
