//! Aggregation of per-namespace fragments into logical environments.
//!
//! Merge semantics are "maximum wins": a replacement or late-joining
//! namespace must never shorten an environment's life or drop scheduled
//! notification factors. The creation-timestamp half of that policy is kept
//! behind an explicit [`CreationPolicy`] so it can be swapped without
//! touching the merge itself.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::durations::{
    DurationError, greater_duration, later_of, parse_ttl, remaining_duration,
};
use crate::metadata::{NamespaceFragment, extract};
use crate::store::{NamespaceStore, StoreError};

/// How two creation timestamps combine during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationPolicy {
    /// Most recent member timestamp wins (observed legacy behavior: a new
    /// namespace joining an environment extends its effective life).
    #[default]
    Latest,
    Earliest,
}

impl CreationPolicy {
    fn combine(self, a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            CreationPolicy::Latest => later_of(a, b),
            CreationPolicy::Earliest => {
                if b < a {
                    b
                } else {
                    a
                }
            }
        }
    }
}

/// A logical environment: every managed namespace sharing one env-name
/// label, with effective metadata folded across the members.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub name: String,
    /// Member fragments; namespace names are unique within an environment.
    pub namespaces: Vec<NamespaceFragment>,
    /// Raw TTL literal of the member with the greatest parsed duration.
    pub ttl: String,
    pub replenish_ratio: f64,
    /// Sorted, deduplicated union of member factors.
    pub notification_factors: Vec<f64>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub update_timestamp: Option<DateTime<Utc>>,
}

/// Derived, recomputed-on-demand view of an environment.
#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    pub name: String,
    pub namespaces: Vec<String>,
    pub remaining_ttl: Duration,
    /// Reserved for notification countdowns; unused downstream today.
    pub remaining_notifications: Vec<Duration>,
}

/// Fold one fragment into an environment aggregate. Pure and idempotent:
/// merging the same fragment twice changes nothing further. Fails only if a
/// TTL literal does not parse.
pub fn merge(
    env: &Environment,
    fragment: &NamespaceFragment,
    policy: CreationPolicy,
) -> Result<Environment, DurationError> {
    let mut merged = env.clone();
    if merged.name.is_empty() {
        merged.name = fragment.env_name.clone();
    }

    merged.namespaces.retain(|n| n.name != fragment.name);
    merged.namespaces.push(fragment.clone());

    // The first fragment's literal is validated before it is adopted, so a
    // namespace with a bad TTL can never become the environment's effective
    // TTL and poison every later merge.
    merged.ttl = if merged.ttl.is_empty() {
        parse_ttl(&fragment.ttl)?;
        fragment.ttl.clone()
    } else {
        greater_duration(&merged.ttl, &fragment.ttl)?
    };
    merged.replenish_ratio =
        merged.replenish_ratio.max(fragment.replenish_ratio);

    merged
        .notification_factors
        .extend_from_slice(&fragment.notification_factors);
    merged.notification_factors.sort_by(|a, b| {
        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.notification_factors.dedup();

    merged.creation_timestamp = Some(match merged.creation_timestamp {
        Some(current) => policy.combine(current, fragment.creation_timestamp),
        None => fragment.creation_timestamp,
    });
    merged.update_timestamp = Some(match merged.update_timestamp {
        Some(current) => later_of(current, fragment.update_timestamp),
        None => fragment.update_timestamp,
    });

    Ok(merged)
}

/// List namespaces matching `selector` and fold them into environments.
/// Namespaces failing extraction or merge are logged and skipped; only the
/// underlying list call aborts the whole collection.
pub async fn collect_environments(
    store: &dyn NamespaceStore,
    selector: &str,
    policy: CreationPolicy,
) -> Result<HashMap<String, Environment>, StoreError> {
    let listed = store.list(selector).await?;
    let mut envs: HashMap<String, Environment> = HashMap::new();
    for ns in listed {
        let fragment = match extract(&ns) {
            Ok(f) => f,
            Err(err) => {
                warn!(error = %err, "skipping namespace");
                continue;
            }
        };
        let entry = envs.entry(fragment.env_name.clone()).or_default();
        match merge(entry, &fragment, policy) {
            Ok(updated) => *entry = updated,
            Err(err) => {
                warn!(namespace = %fragment.name, error = %err, "skipping namespace with unparsable TTL");
            }
        }
    }
    // A merge failure on the first fragment of a name leaves an empty
    // aggregate behind; drop it.
    envs.retain(|_, env| !env.namespaces.is_empty());
    Ok(envs)
}

/// Compute the runtime view of an environment from its effective metadata.
pub fn to_runtime(env: &Environment) -> Result<RuntimeEnv, DurationError> {
    let creation = env.creation_timestamp.unwrap_or_else(Utc::now);
    let remaining_ttl =
        remaining_duration(creation, &env.ttl, env.replenish_ratio)?;
    let remaining_notifications = env
        .notification_factors
        .iter()
        .map(|factor| {
            remaining_duration(creation, &env.ttl, env.replenish_ratio * factor)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut namespaces: Vec<String> =
        env.namespaces.iter().map(|f| f.name.clone()).collect();
    namespaces.sort();

    Ok(RuntimeEnv {
        name: env.name.clone(),
        namespaces,
        remaining_ttl,
        remaining_notifications,
    })
}
