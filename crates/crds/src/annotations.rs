//! Annotation and label vocabulary
//!
//! These keys are the only surface workload owners author. Everything else is
//! derived by the controller.

use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

/// Opts a Service into certificate issuance and mounting (`"true"`).
pub const ENABLED_ANNOTATION: &str = "auto-mtls.kupher.io/enabled";

/// Selects issuance mode for a Service: `Server`, `Client` or `Both`.
pub const ROLE_ANNOTATION: &str = "auto-mtls.kupher.io/role";

/// Opts a Deployment into receiving the namespace CA trust copy (`"true"`).
pub const CA_PUBLIC_CERT_ANNOTATION: &str = "auto-mtls.kupher.io/ca-public-cert";

/// Provenance stamped on leaf secrets: `<namespace>/<service>`.
pub const GENERATED_FOR_ANNOTATION: &str = "auto-mtls.kupher.io/generated-for";

/// Label placed on every secret the controller causes to exist.
pub const MANAGED_LABEL: &str = "auto-mtls.kupher.io/managed";

/// Finalizer held on annotated Services until their certificate is removed.
pub const CLEANUP_FINALIZER: &str = "auto-mtls.kupher.io/cleanup";

/// True when `key` is present and set to the literal `"true"`.
pub fn annotation_is_true(annotations: Option<&BTreeMap<String, String>>, key: &str) -> bool {
    annotations
        .and_then(|a| a.get(key))
        .is_some_and(|v| v == "true")
}

/// Issuance mode requested through [`ROLE_ANNOTATION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MtlsRole {
    Server,
    Client,
    #[default]
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid auto-mtls.kupher.io/role value '{0}', expected Server, Client or Both")]
pub struct RoleParseError(pub String);

impl FromStr for MtlsRole {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Server" => Ok(Self::Server),
            "Client" => Ok(Self::Client),
            "Both" => Ok(Self::Both),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

impl MtlsRole {
    /// Reads the role from an object's annotations. Absent means [`MtlsRole::Both`].
    pub fn from_annotations(
        annotations: Option<&BTreeMap<String, String>>,
    ) -> Result<Self, RoleParseError> {
        match annotations.and_then(|a| a.get(ROLE_ANNOTATION)) {
            Some(value) => value.parse(),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_enabled_requires_literal_true() {
        assert!(annotation_is_true(
            Some(&annotations(&[(ENABLED_ANNOTATION, "true")])),
            ENABLED_ANNOTATION
        ));
        assert!(!annotation_is_true(
            Some(&annotations(&[(ENABLED_ANNOTATION, "True")])),
            ENABLED_ANNOTATION
        ));
        assert!(!annotation_is_true(None, ENABLED_ANNOTATION));
    }

    #[test]
    fn test_role_defaults_to_both() {
        assert_eq!(MtlsRole::from_annotations(None), Ok(MtlsRole::Both));
        assert_eq!(
            MtlsRole::from_annotations(Some(&annotations(&[]))),
            Ok(MtlsRole::Both)
        );
    }

    #[test]
    fn test_role_parse() {
        let a = annotations(&[(ROLE_ANNOTATION, "Server")]);
        assert_eq!(MtlsRole::from_annotations(Some(&a)), Ok(MtlsRole::Server));

        let bad = annotations(&[(ROLE_ANNOTATION, "server")]);
        assert_eq!(
            MtlsRole::from_annotations(Some(&bad)),
            Err(RoleParseError("server".to_string()))
        );
    }
}
