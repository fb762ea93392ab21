//! ---
//! fsd_section: "01-core-functionality"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Runtime helpers supporting the orchestration engine."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Repeating timer whose first tick fires one period after creation.
///
/// Missed ticks are skipped rather than bursted, so a slow consumer never sees
/// a backlog of immediate ticks once it catches up.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("branch '{label}' panicked or was aborted: {reason}")]
    Join { label: String, reason: String },
}

/// Result of a single fan-out branch, in spawn order.
#[derive(Debug)]
pub struct BranchOutcome<T> {
    pub index: usize,
    pub label: String,
    pub result: Result<T, FanOutError>,
}

/// Launches branches offset by a fixed stagger and waits for every one of them.
///
/// A failing branch never cancels its siblings. Dropping the executor aborts
/// whatever is still running.
#[derive(Debug)]
pub struct FanOutExecutor<T> {
    stagger: Duration,
    labels: Vec<String>,
    ids: HashMap<Id, usize>,
    tasks: JoinSet<(usize, T)>,
}

impl<T: Send + 'static> FanOutExecutor<T> {
    pub fn new(stagger: Duration) -> Self {
        Self {
            stagger,
            labels: Vec::new(),
            ids: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Spawn a branch that starts `index * stagger` after the call.
    pub fn spawn<F>(&mut self, label: impl Into<String>, fut: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let index = self.labels.len();
        let delay = self.stagger * index as u32;
        self.labels.push(label.into());
        let handle = self.tasks.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            (index, fut.await)
        });
        self.ids.insert(handle.id(), index);
    }

    /// Wait for all branches and return their outcomes ordered by spawn index.
    pub async fn join_all(mut self) -> Vec<BranchOutcome<T>> {
        let mut slots: Vec<Option<T>> = Vec::with_capacity(self.labels.len());
        slots.resize_with(self.labels.len(), || None);
        let mut failures: HashMap<usize, String> = HashMap::new();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((index, value)) => slots[index] = Some(value),
                Err(err) => {
                    debug!(error = %err, "fan-out branch did not complete");
                    if let Some(index) = self.ids.get(&err.id()).copied() {
                        failures.insert(index, join_reason(err));
                    }
                }
            }
        }

        slots
            .into_iter()
            .zip(self.labels)
            .enumerate()
            .map(|(index, (slot, label))| {
                let result = match slot {
                    Some(value) => Ok(value),
                    None => Err(FanOutError::Join {
                        label: label.clone(),
                        reason: failures
                            .remove(&index)
                            .unwrap_or_else(|| "branch did not report".to_owned()),
                    }),
                };
                BranchOutcome {
                    index,
                    label,
                    result,
                }
            })
            .collect()
    }
}

fn join_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_owned(),
            Err(_) => "branch panicked".to_owned(),
        },
    }
}
