use std::sync::Arc;

use kube::Client;
use tokio::task::JoinHandle;

use crate::{
    config::ReaperConfig,
    controller::{ControllerContext, InFlightDeletions, run_controller},
    store::{KubeNamespaceStore, NamespaceStore},
};

/// Spawn the reconciliation loop.
pub fn spawn_controller(
    ctx: Arc<ControllerContext>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controller(ctx).await })
}

/// Build the cluster-backed store and drive the loop until it exits.
pub async fn run(client: Client, cfg: ReaperConfig) -> anyhow::Result<()> {
    let store: Arc<dyn NamespaceStore> =
        Arc::new(KubeNamespaceStore::new(client));
    let ctx = Arc::new(ControllerContext {
        store,
        cfg,
        in_flight: InFlightDeletions::new(),
    });
    spawn_controller(ctx).await?
}
