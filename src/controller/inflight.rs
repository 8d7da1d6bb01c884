use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Names of namespaces currently being deleted by the operator. Expiry
/// callbacks write it from their own tasks; the event loop reads it to
/// suppress self-induced watch churn.
#[derive(Clone, Default)]
pub struct InFlightDeletions(Arc<RwLock<HashSet<String>>>);

impl InFlightDeletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_all(&self, names: &[String]) {
        let mut w = self.0.write().await;
        for name in names {
            w.insert(name.clone());
        }
    }

    pub async fn remove_all(&self, names: &[String]) {
        let mut w = self.0.write().await;
        for name in names {
            w.remove(name);
        }
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.0.read().await.contains(name)
    }
}
