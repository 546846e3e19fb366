//! Fan-out discipline shared by every fleet-wide operation.
//!
//! A fan-out walks the target services in registry order, runs one
//! single-repository operation at a time, converts any error into a
//! `success = false` record and appends exactly one [`OperationResult`] per
//! service. Results are pushed into a caller-owned sink as each repository
//! finishes, so an interrupted batch keeps everything produced so far.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::registry::Service;

/// Outcome of one operation on one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult<T> {
    /// Repository short name.
    pub service: String,
    /// Fully-qualified repository.
    pub repository: String,
    pub success: bool,
    /// Operation-specific payload; `None` when the operation failed.
    pub payload: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> OperationResult<T> {
    pub fn succeeded(service: &Service, payload: T) -> Self {
        Self {
            service: service.name.clone(),
            repository: service.repository.clone(),
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failed(service: &Service, error: impl fmt::Display) -> Self {
        Self {
            service: service.name.clone(),
            repository: service.repository.clone(),
            success: false,
            payload: None,
            error: Some(error.to_string()),
        }
    }
}

/// Ordered results of one fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutReport<T> {
    pub operation: String,
    pub results: Vec<OperationResult<T>>,
}

impl<T> FanOutReport<T> {
    pub fn new(operation: impl Into<String>, results: Vec<OperationResult<T>>) -> Self {
        Self {
            operation: operation.into(),
            results,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult<T>> {
        self.results.iter().filter(|r| !r.success)
    }

    /// `"<operation>: N/M succeeded"`.
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} succeeded",
            self.operation,
            self.success_count(),
            self.total()
        )
    }

    /// One status line per repository, in result order.
    pub fn status_lines(&self) -> Vec<String> {
        self.results
            .iter()
            .map(|r| match (r.success, &r.error) {
                (true, _) => format!("  ok    {}", r.repository),
                (false, Some(e)) => format!("  FAIL  {}: {}", r.repository, e),
                (false, None) => format!("  FAIL  {}", r.repository),
            })
            .collect()
    }
}

/// Fixed gap between the end of one call and the start of the next; the
/// first call never waits.
#[derive(Debug, Clone)]
pub struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    /// A pacer that never waits.
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait until `delay` has passed since the previous call finished.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                let remaining = self.delay - elapsed;
                debug!(delay_ms = remaining.as_millis() as u64, "pacing next call");
                sleep(remaining).await;
            }
        }
    }

    /// Record that the current call has finished.
    pub fn finished(&mut self) {
        self.last = Some(Instant::now());
    }
}

/// Sequential fan-out over a list of services.
#[derive(Debug, Clone)]
pub struct FanOut {
    operation: String,
    pacer: Pacer,
}

impl FanOut {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            pacer: Pacer::unpaced(),
        }
    }

    /// Space consecutive operations by `delay`.
    pub fn paced(mut self, delay: Duration) -> Self {
        self.pacer = Pacer::new(delay);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Run `op` for each service, appending one result per service to `sink`.
    pub async fn run_into<'a, T, F, Fut>(
        &mut self,
        services: &'a [Service],
        sink: &mut Vec<OperationResult<T>>,
        mut op: F,
    ) where
        F: FnMut(&'a Service) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        info!(
            event = "fanout.started",
            operation = %self.operation,
            total = services.len()
        );
        let mut succeeded = 0usize;
        for service in services {
            self.pacer.wait().await;
            let outcome = op(service).await;
            self.pacer.finished();
            let result = match outcome {
                Ok(payload) => {
                    succeeded += 1;
                    OperationResult::succeeded(service, payload)
                }
                Err(e) => {
                    warn!(
                        operation = %self.operation,
                        repo = %service.repository,
                        error = %e,
                        "operation failed"
                    );
                    OperationResult::failed(service, e)
                }
            };
            sink.push(result);
        }
        info!(
            event = "fanout.finished",
            operation = %self.operation,
            succeeded = succeeded,
            total = services.len()
        );
    }

    /// Run `op` for each service and collect a report.
    pub async fn run<'a, T, F, Fut>(mut self, services: &'a [Service], op: F) -> FanOutReport<T>
    where
        F: FnMut(&'a Service) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut results = Vec::with_capacity(services.len());
        self.run_into(services, &mut results, op).await;
        FanOutReport::new(self.operation, results)
    }
}
