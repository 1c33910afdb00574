//! cert-manager `Certificate` (cert-manager.io/v1)
//!
//! Only the fields auto-mtls sets are modelled. Unknown fields returned by the
//! API server are ignored on read.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced,
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Secret the signer writes `tls.key`, `tls.crt` and `ca.crt` into
    pub secret_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,

    /// Requested validity, Go duration syntax (e.g. `8760h0m0s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// How long before expiry the signer renews, Go duration syntax
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,

    #[serde(rename = "isCA", default, skip_serializing_if = "Option::is_none")]
    pub is_ca: Option<bool>,

    pub issuer_ref: IssuerRef,

    /// Metadata copied onto the generated secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_template: Option<SecretTemplate>,
}

/// Reference to the issuer that signs a certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    pub name: String,

    /// `Issuer` or `ClusterIssuer`
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl IssuerRef {
    /// Reference to a cluster-scoped issuer.
    pub fn cluster_issuer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "ClusterIssuer".to_string(),
            group: Some("cert-manager.io".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_ca_uses_upstream_field_name() {
        let spec = CertificateSpec {
            secret_name: "ca-secret".to_string(),
            is_ca: Some(true),
            issuer_ref: IssuerRef::cluster_issuer("root"),
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["isCA"], json!(true));
        assert_eq!(value["issuerRef"]["kind"], json!("ClusterIssuer"));
        assert!(value.get("dnsNames").is_none());
    }

    #[test]
    fn test_deserializes_signer_managed_object() {
        // cert-manager adds fields we do not model; they must not break reads
        let value = json!({
            "secretName": "payments-cert-tls",
            "dnsNames": ["payments"],
            "issuerRef": {"name": "auto-mtls-cluster-ca-issuer", "kind": "ClusterIssuer"},
            "privateKey": {"rotationPolicy": "Always"}
        });
        let spec: CertificateSpec = serde_json::from_value(value).unwrap();
        assert_eq!(spec.dns_names, vec!["payments".to_string()]);
        assert_eq!(spec.issuer_ref.group, None);
    }
}
