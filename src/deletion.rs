//! Two-stage force removal of namespaces.
//!
//! Stage 1 issues a graceful delete and polls until the object is gone.
//! Stage 2 kicks in only when that poll times out: finalizer lists are
//! cleared through the finalize subresource and the poll repeats in a fresh
//! window. Namespaces are processed strictly in order; an environment holds
//! few namespaces and environments already expire concurrently, so
//! parallelism here would only buy partial-failure interleaving.

use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::store::{NamespaceStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteState {
    Deleted,
    ForceDeleted,
    NotFound,
    Timeout,
    Error,
}

/// Terminal record of one namespace's removal attempt.
#[derive(Debug)]
pub struct NamespaceDeleteResult {
    pub namespace: String,
    pub state: DeleteState,
    pub deletion_error: Option<StoreError>,
    pub finalizer_error: Option<StoreError>,
    pub elapsed: Duration,
}

impl NamespaceDeleteResult {
    fn new(
        namespace: &str,
        state: DeleteState,
        deletion_error: Option<StoreError>,
        finalizer_error: Option<StoreError>,
        started: Instant,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            state,
            deletion_error,
            finalizer_error,
            elapsed: started.elapsed(),
        }
    }
}

/// Poll the store until the namespace is gone or `deadline` passes.
async fn wait_for_deletion(
    store: &dyn NamespaceStore,
    name: &str,
    deadline: Instant,
    polling_period: Duration,
) -> bool {
    let mut ticker = tokio::time::interval_at(
        Instant::now() + polling_period,
        polling_period,
    );
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            _ = ticker.tick() => {
                match store.get(name).await {
                    Ok(None) => return true,
                    Ok(Some(_)) => {}
                    Err(err) => {
                        warn!(namespace = %name, error = %err, "deletion poll failed");
                    }
                }
            }
        }
    }
}

/// Remove the given namespaces one after another, producing exactly one
/// result per input name. No retries happen beyond the two stages; callers
/// wanting another attempt re-invoke.
pub async fn force_delete_namespaces(
    store: &dyn NamespaceStore,
    namespace_names: &[String],
    timeout: Duration,
    polling_period: Duration,
) -> Vec<NamespaceDeleteResult> {
    let mut results = Vec::with_capacity(namespace_names.len());

    for name in namespace_names {
        let started = Instant::now();

        // Stage 1: graceful removal.
        let stage1_deadline = Instant::now() + timeout;
        match timeout_at(stage1_deadline, store.delete(name)).await {
            Err(_) => {
                results.push(NamespaceDeleteResult::new(
                    name,
                    DeleteState::Error,
                    Some(StoreError::Timeout),
                    None,
                    started,
                ));
                continue;
            }
            Ok(Err(StoreError::NotFound)) => {
                // Probably removed manually; that is fine.
                debug!(namespace = %name, "already gone at delete time");
                results.push(NamespaceDeleteResult::new(
                    name,
                    DeleteState::NotFound,
                    None,
                    None,
                    started,
                ));
                continue;
            }
            Ok(Err(err)) => {
                results.push(NamespaceDeleteResult::new(
                    name,
                    DeleteState::Error,
                    Some(err),
                    None,
                    started,
                ));
                continue;
            }
            Ok(Ok(())) => {}
        }

        if wait_for_deletion(store, name, stage1_deadline, polling_period)
            .await
        {
            results.push(NamespaceDeleteResult::new(
                name,
                DeleteState::Deleted,
                None,
                None,
                started,
            ));
            continue;
        }

        // Stage 2: strip finalizers and wait again.
        debug!(namespace = %name, "graceful deletion stalled; stripping finalizers");
        let stage2_deadline = Instant::now() + timeout;
        let mut ns = match timeout_at(stage2_deadline, store.get(name)).await {
            Err(_) => {
                results.push(NamespaceDeleteResult::new(
                    name,
                    DeleteState::Error,
                    None,
                    Some(StoreError::Timeout),
                    started,
                ));
                continue;
            }
            Ok(Ok(None)) => {
                // It finished between polls after all.
                results.push(NamespaceDeleteResult::new(
                    name,
                    DeleteState::Deleted,
                    None,
                    None,
                    started,
                ));
                continue;
            }
            Ok(Err(err)) => {
                results.push(NamespaceDeleteResult::new(
                    name,
                    DeleteState::Error,
                    None,
                    Some(err),
                    started,
                ));
                continue;
            }
            Ok(Ok(Some(ns))) => ns,
        };

        ns.metadata.finalizers = None;
        if let Some(spec) = ns.spec.as_mut() {
            spec.finalizers = None;
        }
        match timeout_at(stage2_deadline, store.finalize(ns)).await {
            Err(_) => {
                results.push(NamespaceDeleteResult::new(
                    name,
                    DeleteState::Error,
                    None,
                    Some(StoreError::Timeout),
                    started,
                ));
                continue;
            }
            Ok(Err(StoreError::NotFound)) => {
                results.push(NamespaceDeleteResult::new(
                    name,
                    DeleteState::Deleted,
                    None,
                    None,
                    started,
                ));
                continue;
            }
            Ok(Err(err)) => {
                results.push(NamespaceDeleteResult::new(
                    name,
                    DeleteState::Error,
                    None,
                    Some(err),
                    started,
                ));
                continue;
            }
            Ok(Ok(())) => {}
        }

        let state = if wait_for_deletion(
            store,
            name,
            stage2_deadline,
            polling_period,
        )
        .await
        {
            DeleteState::ForceDeleted
        } else {
            DeleteState::Timeout
        };
        results.push(NamespaceDeleteResult::new(
            name, state, None, None, started,
        ));
    }

    results
}
