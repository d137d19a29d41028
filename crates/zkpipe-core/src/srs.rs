//! SRS acquisition with idempotent caching and request coalescing.
//!
//! Acquisition is the pipeline's one shared-resource hotspot: generating or
//! fetching an SRS is slow and its output is shared by every circuit of
//! compatible size. A per-`logrows` async lock makes concurrent requests for
//! the same size coalesce onto a single generation; everyone else waits for
//! the winner's artifact instead of stampeding the backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::artifacts::{ArtifactKey, ArtifactStore};
use crate::backend::{ProvingBackend, Srs};
use crate::error::{PipelineError, Result};

/// Retry policy for transient SRS generation failures.
#[derive(Debug, Clone)]
pub struct SrsRetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for SrsRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Acquires SRS artifacts through the store, generating at most once per
/// size at a time.
pub struct SrsProvider {
    store: Arc<ArtifactStore>,
    backend: Arc<dyn ProvingBackend>,
    retry: SrsRetryPolicy,
    timeout: Option<Duration>,
    locks: Mutex<HashMap<u32, Arc<AsyncMutex<()>>>>,
}

impl SrsProvider {
    pub fn new(store: Arc<ArtifactStore>, backend: Arc<dyn ProvingBackend>) -> Self {
        Self {
            store,
            backend,
            retry: SrsRetryPolicy::default(),
            timeout: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: SrsRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline for a single generation attempt. Expiry surfaces as
    /// [`PipelineError::Timeout`], distinct from exhausted retries.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn lock_for(&self, logrows: u32) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(logrows).or_default().clone()
    }

    /// Acquire the SRS for `logrows`: verified cache hit, or generation
    /// through the backend with bounded retries.
    ///
    /// Never returns a partially-valid SRS: anything handed back went
    /// through the store's integrity-checked read path.
    pub async fn acquire(&self, logrows: u32) -> Result<Srs> {
        let scheme = self.backend.scheme().to_string();
        let key = ArtifactKey::Srs {
            scheme: scheme.clone(),
            logrows,
        };

        let lock = self.lock_for(logrows);
        let _guard = lock.lock().await;

        match self.store.get(&key) {
            Ok(blob) => {
                tracing::debug!(logrows, bytes = blob.len(), "SRS cache hit");
                return Ok(Srs {
                    logrows,
                    scheme,
                    blob,
                });
            }
            Err(PipelineError::ArtifactNotFound { .. }) => {}
            Err(PipelineError::ArtifactCorrupt { .. }) => {
                tracing::warn!(logrows, "cached SRS failed integrity check, regenerating");
            }
            Err(e) => return Err(e),
        }

        let mut last_error = String::from("no attempt made");
        for attempt in 1..=self.retry.max_attempts {
            let generated = match self.timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.backend.generate_srs(logrows)).await {
                        Ok(res) => res,
                        Err(_) => {
                            return Err(PipelineError::Timeout {
                                stage: "srs".into(),
                                elapsed: limit,
                            })
                        }
                    }
                }
                None => self.backend.generate_srs(logrows).await,
            };

            match generated {
                Ok(srs) if srs.logrows >= logrows => {
                    self.store.put(&key, &srs.blob)?;
                    // Hand back only what the verified read path returns.
                    let blob = self.store.get(&key)?;
                    tracing::info!(logrows, bytes = blob.len(), attempt, "SRS acquired");
                    return Ok(Srs {
                        logrows,
                        scheme,
                        blob,
                    });
                }
                Ok(srs) => {
                    last_error = format!(
                        "backend returned SRS for logrows={}, need at least {}",
                        srs.logrows, logrows
                    );
                    tracing::warn!(logrows, attempt, %last_error, "SRS attempt rejected");
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(logrows, attempt, error = %last_error, "SRS attempt failed");
                }
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.backoff * attempt).await;
            }
        }

        Err(PipelineError::SrsUnavailable {
            logrows,
            attempts: self.retry.max_attempts,
            reason: last_error,
        })
    }
}
