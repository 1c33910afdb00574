//! cert-manager `ClusterIssuer` (cert-manager.io/v1)
//!
//! auto-mtls only creates two flavours: a self-signed root and a CA issuer
//! backed by the root-signed CA secret.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "ClusterIssuer",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIssuerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaIssuer>,
}

/// Marker for a self-signed issuer; serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SelfSignedIssuer {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    /// Secret (in the cert-manager cluster resource namespace) holding the CA key pair
    pub secret_name: String,
}

impl ClusterIssuerSpec {
    pub fn self_signed() -> Self {
        Self {
            self_signed: Some(SelfSignedIssuer {}),
            ca: None,
        }
    }

    pub fn ca(secret_name: impl Into<String>) -> Self {
        Self {
            self_signed: None,
            ca: Some(CaIssuer {
                secret_name: secret_name.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_self_signed_serializes_as_empty_object() {
        let value = serde_json::to_value(ClusterIssuerSpec::self_signed()).unwrap();
        assert_eq!(value, json!({"selfSigned": {}}));
    }

    #[test]
    fn test_ca_issuer_shape() {
        let value = serde_json::to_value(ClusterIssuerSpec::ca("ca-secret")).unwrap();
        assert_eq!(value, json!({"ca": {"secretName": "ca-secret"}}));
    }
}
