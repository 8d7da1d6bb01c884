//! Per-namespace metadata extraction. A [`NamespaceFragment`] is produced
//! only from a managed namespace whose labels and annotations pass the full
//! validation chain; anything else fails with the first violated rule.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;

use crate::durations::parse_timestamp;

pub const MANAGED_LABEL: &str = "envreaper.io/managed";
pub const ENV_NAME_LABEL: &str = "envreaper.io/env-name";
pub const TTL_ANNOTATION: &str = "envreaper.io/ttl.removal";
pub const REPLENISH_RATIO_ANNOTATION: &str =
    "envreaper.io/ttl.replenish-ratio";
pub const NOTIFICATION_FACTORS_ANNOTATION: &str =
    "envreaper.io/ttl.notification-factors";
pub const UPDATE_TIMESTAMP_ANNOTATION: &str = "envreaper.io/update-timestamp";

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("namespace {0:?} is not managed")]
    NotManaged(String),
    #[error("namespace {0:?} has no environment name label")]
    MissingEnvName(String),
    #[error("namespace {0:?} has no removal TTL annotation")]
    MissingTtl(String),
    #[error("namespace {0:?} has an invalid replenish ratio {1:?}")]
    InvalidReplenishRatio(String, String),
    #[error("namespace {0:?} has invalid notification factors {1:?}")]
    InvalidNotificationFactors(String, String),
    #[error("namespace {0:?} has an invalid update timestamp {1:?}")]
    InvalidUpdateTimestamp(String, String),
}

/// Parsed environment metadata of a single namespace, prior to aggregation.
#[derive(Debug, Clone)]
pub struct NamespaceFragment {
    pub name: String,
    pub managed: bool,
    pub env_name: String,
    /// Raw TTL literal (e.g. `"2h"`); parsed only when compared or spent.
    pub ttl: String,
    pub replenish_ratio: f64,
    pub notification_factors: Vec<f64>,
    pub creation_timestamp: DateTime<Utc>,
    pub update_timestamp: DateTime<Utc>,
    /// The raw record, kept for the deletion path.
    pub raw: Namespace,
}

/// Validate and parse one raw namespace record. Pure; the first failed rule
/// wins and later rules are not evaluated.
pub fn extract(ns: &Namespace) -> Result<NamespaceFragment, ValidationError> {
    let name = ns.name_any();
    let labels = ns.labels();
    let annotations = ns.annotations();

    if labels.get(MANAGED_LABEL).map(String::as_str) != Some("true") {
        return Err(ValidationError::NotManaged(name));
    }

    let env_name = match labels.get(ENV_NAME_LABEL) {
        Some(v) if !v.is_empty() => v.clone(),
        _ => return Err(ValidationError::MissingEnvName(name)),
    };

    let ttl = match annotations.get(TTL_ANNOTATION) {
        Some(v) if !v.is_empty() => v.clone(),
        _ => return Err(ValidationError::MissingTtl(name)),
    };

    // Absent ratio means the TTL applies unscaled.
    let replenish_ratio = match annotations.get(REPLENISH_RATIO_ANNOTATION) {
        Some(text) => text.parse::<f64>().map_err(|_| {
            ValidationError::InvalidReplenishRatio(name.clone(), text.clone())
        })?,
        None => 1.0,
    };

    let notification_factors =
        match annotations.get(NOTIFICATION_FACTORS_ANNOTATION) {
            Some(text) => {
                serde_json::from_str::<Vec<f64>>(text).map_err(|_| {
                    ValidationError::InvalidNotificationFactors(
                        name.clone(),
                        text.clone(),
                    )
                })?
            }
            None => Vec::new(),
        };

    let creation_timestamp = ns
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_else(Utc::now);

    let update_timestamp = match annotations.get(UPDATE_TIMESTAMP_ANNOTATION) {
        Some(text) => parse_timestamp(text).map_err(|_| {
            ValidationError::InvalidUpdateTimestamp(name.clone(), text.clone())
        })?,
        None => creation_timestamp,
    };

    Ok(NamespaceFragment {
        name,
        managed: true,
        env_name,
        ttl,
        replenish_ratio,
        notification_factors,
        creation_timestamp,
        update_timestamp,
        raw: ns.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn base_namespace() -> Namespace {
        let labels = BTreeMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (ENV_NAME_LABEL.to_string(), "env1".to_string()),
        ]);
        let annotations = BTreeMap::from([
            (TTL_ANNOTATION.to_string(), "1h".to_string()),
            (REPLENISH_RATIO_ANNOTATION.to_string(), "1.5".to_string()),
            (
                NOTIFICATION_FACTORS_ANNOTATION.to_string(),
                "[0.5,0.8]".to_string(),
            ),
            (
                UPDATE_TIMESTAMP_ANNOTATION.to_string(),
                Utc::now().to_rfc3339(),
            ),
        ]);
        Namespace {
            metadata: ObjectMeta {
                name: Some("test-ns".to_string()),
                labels: Some(labels),
                annotations: Some(annotations),
                creation_timestamp: Some(Time(
                    Utc::now() - chrono::Duration::hours(2),
                )),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn with_label(mut ns: Namespace, key: &str, value: Option<&str>) -> Namespace {
        let labels = ns.metadata.labels.get_or_insert_default();
        match value {
            Some(v) => {
                labels.insert(key.to_string(), v.to_string());
            }
            None => {
                labels.remove(key);
            }
        }
        ns
    }

    fn with_annotation(
        mut ns: Namespace,
        key: &str,
        value: Option<&str>,
    ) -> Namespace {
        let annotations = ns.metadata.annotations.get_or_insert_default();
        match value {
            Some(v) => {
                annotations.insert(key.to_string(), v.to_string());
            }
            None => {
                annotations.remove(key);
            }
        }
        ns
    }

    #[test]
    fn valid_namespace_extracts() {
        let frag = extract(&base_namespace()).unwrap();
        assert_eq!(frag.name, "test-ns");
        assert_eq!(frag.env_name, "env1");
        assert_eq!(frag.ttl, "1h");
        assert_eq!(frag.replenish_ratio, 1.5);
        assert_eq!(frag.notification_factors, vec![0.5, 0.8]);
        assert!(frag.managed);
    }

    #[test]
    fn defaults_for_optional_annotations() {
        let ns = with_annotation(
            with_annotation(
                with_annotation(
                    base_namespace(),
                    REPLENISH_RATIO_ANNOTATION,
                    None,
                ),
                NOTIFICATION_FACTORS_ANNOTATION,
                None,
            ),
            UPDATE_TIMESTAMP_ANNOTATION,
            None,
        );
        let frag = extract(&ns).unwrap();
        assert_eq!(frag.replenish_ratio, 1.0);
        assert!(frag.notification_factors.is_empty());
        assert_eq!(frag.update_timestamp, frag.creation_timestamp);
    }

    #[test]
    fn not_managed_fails() {
        let ns = with_label(base_namespace(), MANAGED_LABEL, Some("false"));
        assert!(matches!(
            extract(&ns),
            Err(ValidationError::NotManaged(_))
        ));
    }

    #[test]
    fn missing_env_name_fails() {
        let ns = with_label(base_namespace(), ENV_NAME_LABEL, None);
        assert!(matches!(
            extract(&ns),
            Err(ValidationError::MissingEnvName(_))
        ));
    }

    #[test]
    fn missing_ttl_fails() {
        let ns = with_annotation(base_namespace(), TTL_ANNOTATION, None);
        assert!(matches!(extract(&ns), Err(ValidationError::MissingTtl(_))));
    }

    #[test]
    fn bad_replenish_ratio_fails() {
        let ns = with_annotation(
            base_namespace(),
            REPLENISH_RATIO_ANNOTATION,
            Some("bad"),
        );
        assert!(matches!(
            extract(&ns),
            Err(ValidationError::InvalidReplenishRatio(_, _))
        ));
    }

    #[test]
    fn bad_notification_factors_fail() {
        let ns = with_annotation(
            base_namespace(),
            NOTIFICATION_FACTORS_ANNOTATION,
            Some("notjson"),
        );
        assert!(matches!(
            extract(&ns),
            Err(ValidationError::InvalidNotificationFactors(_, _))
        ));
    }

    #[test]
    fn bad_update_timestamp_fails() {
        let ns = with_annotation(
            base_namespace(),
            UPDATE_TIMESTAMP_ANNOTATION,
            Some("badtime"),
        );
        assert!(matches!(
            extract(&ns),
            Err(ValidationError::InvalidUpdateTimestamp(_, _))
        ));
    }
}
