//! Sequential, human-readable id allocation with collision retry.
//!
//! Ids are `prefix + n` where `n` starts at the number of records already in
//! the scope plus one, then probes upward past ids that are taken. The probe is
//! only an optimisation: two callers can pick the same candidate, and the
//! store's unique index decides who wins. The loser backs off and starts over
//! from a fresh count.

use crate::error::{ServiceError, ServiceResult};
use casebook_core::config::AllocatorConfig;
use casebook_core::sequence::{SequenceId, validate_prefix};
use casebook_metadata::{CounterStore, MetadataError};
use std::time::Duration;

/// Allocates sequence ids for any [`CounterStore`].
#[derive(Clone, Debug)]
pub struct SequenceAllocator {
    max_attempts: u32,
    base_backoff: Duration,
    deadline: Duration,
}

#[derive(Default)]
struct Progress {
    attempts: u32,
    last_candidate: Option<String>,
}

impl SequenceAllocator {
    pub fn new(config: &AllocatorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: config.base_backoff(),
            deadline: config.deadline(),
        }
    }

    /// Pick the next free id under `parent_key` without inserting anything.
    pub async fn next_candidate<S>(
        &self,
        store: &S,
        parent_key: &str,
        prefix: &str,
    ) -> ServiceResult<SequenceId>
    where
        S: CounterStore + ?Sized,
    {
        validate_scope(parent_key, prefix)?;

        let count = store
            .count(parent_key)
            .await
            .map_err(|e| fault(e, parent_key, None))?;
        let mut candidate = SequenceId::new(prefix, count.saturating_add(1))?;

        loop {
            let id = candidate.to_string();
            let taken = store
                .find_by_sequence_id(parent_key, &id)
                .await
                .map_err(|e| fault(e, parent_key, Some(&id)))?;
            if taken.is_none() {
                return Ok(candidate);
            }
            candidate = candidate.next();
        }
    }

    /// Allocate an id under `parent_key` and create the record with it.
    ///
    /// Retries on unique violations with a linear backoff
    /// (`base_backoff * attempt`), up to `max_attempts`, all within `deadline`.
    pub async fn allocate<S>(
        &self,
        store: &S,
        parent_key: &str,
        draft: &S::Draft,
    ) -> ServiceResult<S::Entity>
    where
        S: CounterStore + ?Sized,
    {
        let prefix = store.kind().prefix();
        validate_scope(parent_key, prefix)?;

        let mut progress = Progress::default();
        let outcome = tokio::time::timeout(
            self.deadline,
            self.allocate_with_retry(store, parent_key, prefix, draft, &mut progress),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    parent_key,
                    attempts = progress.attempts,
                    last_candidate = progress.last_candidate.as_deref(),
                    deadline_ms = self.deadline.as_millis() as u64,
                    "sequence id allocation timed out"
                );
                Err(ServiceError::AllocationExhausted {
                    parent_key: parent_key.to_string(),
                    attempts: progress.attempts,
                    last_candidate: progress.last_candidate,
                    timed_out: true,
                })
            }
        }
    }

    async fn allocate_with_retry<S>(
        &self,
        store: &S,
        parent_key: &str,
        prefix: &str,
        draft: &S::Draft,
        progress: &mut Progress,
    ) -> ServiceResult<S::Entity>
    where
        S: CounterStore + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            progress.attempts = attempt;
            let candidate = self.next_candidate(store, parent_key, prefix).await?.to_string();
            progress.last_candidate = Some(candidate.clone());

            match store.create(parent_key, &candidate, draft).await {
                Ok(entity) => {
                    tracing::debug!(parent_key, sequence_id = %candidate, attempt, "allocated sequence id");
                    return Ok(entity);
                }
                Err(e) if e.is_unique_violation() => {
                    tracing::info!(
                        parent_key,
                        candidate = %candidate,
                        attempt,
                        "sequence id taken concurrently, retrying"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.base_backoff * attempt).await;
                    }
                }
                Err(e) => return Err(fault(e, parent_key, Some(&candidate))),
            }
        }

        tracing::warn!(
            parent_key,
            attempts = self.max_attempts,
            last_candidate = progress.last_candidate.as_deref(),
            "sequence id allocation exhausted"
        );
        Err(ServiceError::AllocationExhausted {
            parent_key: parent_key.to_string(),
            attempts: self.max_attempts,
            last_candidate: progress.last_candidate.take(),
            timed_out: false,
        })
    }
}

fn validate_scope(parent_key: &str, prefix: &str) -> ServiceResult<()> {
    if parent_key.trim().is_empty() {
        return Err(ServiceError::Validation(
            "parent key must not be empty".to_string(),
        ));
    }
    validate_prefix(prefix)?;
    Ok(())
}

/// Map a store error, logging it when it is a fault rather than bad input.
fn fault(err: MetadataError, parent_key: &str, candidate: Option<&str>) -> ServiceError {
    let mapped = ServiceError::from(err);
    if let ServiceError::StorageFault(detail) = &mapped {
        tracing::error!(parent_key, candidate, error = %detail, "counter store failure during allocation");
    }
    mapped
}
