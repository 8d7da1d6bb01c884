//! The reconciliation loop: one task owning the countdown handles, fed by
//! the namespace watch stream. Handle cancellation and re-arming for an
//! environment happen within a single event-handling step, so each
//! environment has at most one live countdown at any instant.

pub mod inflight;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReaperConfig;
use crate::countdown::{Scenario, run_countdown};
use crate::deletion::force_delete_namespaces;
use crate::envs::{
    CreationPolicy, Environment, collect_environments, to_runtime,
};
use crate::metadata::{ENV_NAME_LABEL, MANAGED_LABEL, extract};
use crate::store::{EventKind, NamespaceEvent, NamespaceStore};

pub use inflight::InFlightDeletions;

/// Cancellation capability for one environment's live countdown, paired
/// with the countdown task so handles of terminated countdowns can be
/// recognized and dropped.
pub struct CountdownHandle {
    pub env_name: String,
    pub ttl_secs: i64,
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl CountdownHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct ControllerContext {
    pub store: Arc<dyn NamespaceStore>,
    pub cfg: ReaperConfig,
    pub in_flight: InFlightDeletions,
}

pub fn managed_selector() -> String {
    format!("{MANAGED_LABEL}=true")
}

pub fn env_selector(env_name: &str) -> String {
    format!("{MANAGED_LABEL}=true,{ENV_NAME_LABEL}={env_name}")
}

/// Arm a countdown for one environment at its freshly computed remaining
/// TTL and record the handle. Environments whose effective TTL no longer
/// parses are logged and left without a countdown.
fn arm_countdown(
    ctx: &Arc<ControllerContext>,
    env: &Environment,
    handles: &mut Vec<CountdownHandle>,
) {
    let view = match to_runtime(env) {
        Ok(v) => v,
        Err(err) => {
            warn!(env = %env.name, error = %err, "cannot schedule environment");
            return;
        }
    };
    let ttl_secs = view.remaining_ttl.as_secs() as i64;
    let token = CancellationToken::new();
    info!(env = %view.name, ttl_secs, "arming removal countdown");

    let store = ctx.store.clone();
    let in_flight = ctx.in_flight.clone();
    let timeout = Duration::from_secs(ctx.cfg.delete_timeout_secs);
    let polling = Duration::from_secs(ctx.cfg.poll_period_secs);
    let env_name = view.name.clone();
    let namespaces = view.namespaces;
    let task_token = token.clone();
    let task = tokio::spawn(async move {
        let outcome = run_countdown(
            &env_name,
            namespaces,
            ttl_secs,
            Scenario::Removal,
            task_token,
            move |names| async move {
                in_flight.insert_all(&names).await;
                let results = force_delete_namespaces(
                    store.as_ref(),
                    &names,
                    timeout,
                    polling,
                )
                .await;
                for r in &results {
                    info!(
                        namespace = %r.namespace,
                        state = ?r.state,
                        elapsed = ?r.elapsed,
                        "namespace removal finished"
                    );
                }
                in_flight.remove_all(&names).await;
            },
        )
        .await;
        debug!(env = %env_name, ?outcome, "countdown finished");
    });
    handles.push(CountdownHandle {
        env_name: view.name,
        ttl_secs,
        token,
        task,
    });
}

/// Handle one namespace change event: suppress self-induced churn, work out
/// the affected environment, cancel its stale countdown and re-arm from the
/// cluster's current state.
async fn handle_event(
    ctx: &Arc<ControllerContext>,
    event: NamespaceEvent,
    handles: &mut Vec<CountdownHandle>,
) {
    // A countdown that ran to completion leaves its handle behind; the
    // deletion it triggered suppresses the resulting watch events, so this
    // sweep is the only thing that reclaims it.
    handles.retain(|handle| !handle.is_terminated());

    let ns_name = event.namespace.name_any();
    if ctx.in_flight.contains(&ns_name).await {
        debug!(namespace = %ns_name, "ignoring event for namespace under deletion");
        return;
    }

    let env_name = match extract(&event.namespace) {
        Ok(fragment) => fragment.env_name,
        Err(err) => {
            // A deleted namespace may carry any metadata; its env-name
            // label still tells us which environment to recompute.
            if event.kind == EventKind::Deleted {
                match event.namespace.labels().get(ENV_NAME_LABEL) {
                    Some(v) if !v.is_empty() => v.clone(),
                    _ => {
                        warn!(namespace = %ns_name, error = %err, "deleted namespace without environment label");
                        return;
                    }
                }
            } else {
                warn!(namespace = %ns_name, error = %err, "ignoring namespace with invalid metadata");
                return;
            }
        }
    };
    info!(kind = ?event.kind, namespace = %ns_name, env = %env_name, "namespace event");

    handles.retain(|handle| {
        if handle.env_name == env_name {
            handle.cancel();
            false
        } else {
            true
        }
    });

    match collect_environments(
        ctx.store.as_ref(),
        &env_selector(&env_name),
        CreationPolicy::Latest,
    )
    .await
    {
        Ok(envs) if envs.is_empty() => {
            info!(env = %env_name, "environment has no managed namespaces left");
        }
        Ok(envs) => {
            for env in envs.values() {
                arm_countdown(ctx, env, handles);
            }
        }
        Err(err) => {
            error!(env = %env_name, error = %err, "failed to re-collect environment");
        }
    }
}

/// Arm countdowns for every environment currently in the cluster, then
/// process watch events sequentially for the life of the process. The
/// initial listing and the watch stream itself failing are fatal; armed
/// countdowns keep running either way.
pub async fn run_controller(
    ctx: Arc<ControllerContext>,
) -> anyhow::Result<()> {
    let envs = collect_environments(
        ctx.store.as_ref(),
        &managed_selector(),
        CreationPolicy::Latest,
    )
    .await?;
    info!(environments = envs.len(), "initial environment inventory");

    let mut handles: Vec<CountdownHandle> = Vec::new();
    for env in envs.values() {
        arm_countdown(&ctx, env, &mut handles);
    }

    let mut events = ctx.store.watch(&managed_selector()).await?;
    info!("watching managed namespaces");
    while let Some(item) = events.next().await {
        let event = item?;
        handle_event(&ctx, event, &mut handles).await;
    }

    Err(anyhow::anyhow!("namespace watch stream closed"))
}
