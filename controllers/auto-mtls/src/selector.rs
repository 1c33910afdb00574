//! Service selector to Deployment matching.
//!
//! Nothing is cached: the relation is recomputed from live objects on every
//! reconcile.

use k8s_openapi::api::apps::v1::Deployment;
use std::collections::BTreeMap;

/// True when every key/value of `selector` is present and equal in `labels`.
///
/// An empty selector matches nothing. A Service without a selector has no
/// backing pods, so it must not claim an arbitrary workload.
pub fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    if selector.is_empty() {
        return false;
    }
    let Some(labels) = labels else {
        return false;
    };
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Labels stamped on the Deployment's pods.
pub fn pod_template_labels(deployment: &Deployment) -> Option<&BTreeMap<String, String>> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .labels
        .as_ref()
}

/// First Deployment, in enumeration order, whose pod template satisfies `selector`.
pub fn find_backing_workload<'a>(
    selector: Option<&BTreeMap<String, String>>,
    deployments: &'a [Deployment],
) -> Option<&'a Deployment> {
    let selector = selector?;
    deployments
        .iter()
        .find(|d| selector_matches(selector, pod_template_labels(d)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn deployment(name: &str, template_labels: &[(&str, &str)]) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels(template_labels)),
                        ..Default::default()
                    }),
                    spec: None,
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn test_subset_matches() {
        let selector = labels(&[("app", "payments")]);
        assert!(selector_matches(
            &selector,
            Some(&labels(&[("app", "payments"), ("tier", "backend")]))
        ));
    }

    #[test]
    fn test_value_mismatch_or_missing_key() {
        let selector = labels(&[("app", "payments"), ("tier", "backend")]);
        assert!(!selector_matches(&selector, Some(&labels(&[("app", "payments")]))));
        assert!(!selector_matches(
            &selector,
            Some(&labels(&[("app", "payments"), ("tier", "frontend")]))
        ));
        assert!(!selector_matches(&selector, None));
    }

    #[test]
    fn test_empty_selector_matches_nothing() {
        assert!(!selector_matches(&BTreeMap::new(), Some(&labels(&[("app", "x")]))));
        assert!(find_backing_workload(None, &[deployment("x", &[("app", "x")])]).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let deployments = vec![
            deployment("other", &[("app", "billing")]),
            deployment("payments-v1", &[("app", "payments"), ("version", "v1")]),
            deployment("payments-v2", &[("app", "payments"), ("version", "v2")]),
        ];
        let selector = labels(&[("app", "payments")]);
        let found = find_backing_workload(Some(&selector), &deployments).unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("payments-v1"));
    }

    #[test]
    fn test_no_candidates() {
        let selector = labels(&[("app", "payments")]);
        assert!(find_backing_workload(Some(&selector), &[]).is_none());
    }

    #[test]
    fn test_matches_iff_every_pair_present() {
        let keys = ["a", "b", "c"];
        let values = ["1", "2"];
        // Enumerate small selector/label combinations and check against a direct definition.
        for mask_s in 1u8..8 {
            for mask_l in 0u8..8 {
                for v in values {
                    let selector: BTreeMap<String, String> = keys
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| mask_s & (1 << i) != 0)
                        .map(|(_, k)| ((*k).to_string(), "1".to_string()))
                        .collect();
                    let label_map: BTreeMap<String, String> = keys
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| mask_l & (1 << i) != 0)
                        .map(|(_, k)| ((*k).to_string(), v.to_string()))
                        .collect();
                    let expected = selector
                        .iter()
                        .all(|(k, val)| label_map.get(k) == Some(val));
                    assert_eq!(selector_matches(&selector, Some(&label_map)), expected);
                }
            }
        }
    }
}
