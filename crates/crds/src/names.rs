//! Well-known object names and the naming scheme for per-service objects.

/// Self-signed root `ClusterIssuer`.
pub const SELF_SIGNED_ISSUER_NAME: &str = "auto-mtls-cluster-selfsigned-issuer";

/// CA `Certificate`, created in the signing namespace.
pub const CA_CERTIFICATE_NAME: &str = "auto-mtls-cluster-ca-cert";

/// Secret the signer writes the CA key pair into.
pub const CA_SECRET_NAME: &str = "auto-mtls-cluster-ca-cert-secret";

/// Common name of the CA certificate.
pub const CA_COMMON_NAME: &str = "auto-mtls-cluster-ca";

/// CA-backed `ClusterIssuer` that signs every leaf certificate.
pub const CA_ISSUER_NAME: &str = "auto-mtls-cluster-ca-issuer";

/// Default signing namespace (where cert-manager reads cluster issuer secrets).
pub const DEFAULT_CA_NAMESPACE: &str = "cert-manager";

/// Per-namespace read-only copy of the CA public certificate.
pub const TRUST_COPY_SECRET_NAME: &str = "auto-mtls-ca-cert";

/// Data key holding the PEM CA certificate.
pub const CA_CERT_KEY: &str = "ca.crt";

/// Default cluster DNS suffix.
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// `<service>-cert`
pub fn leaf_certificate_name(service: &str) -> String {
    format!("{service}-cert")
}

/// `<service>-cert-tls`
pub fn leaf_secret_name(service: &str) -> String {
    format!("{}-tls", leaf_certificate_name(service))
}

/// DNS identities of a Service, shortest first.
pub fn service_dns_names(service: &str, namespace: &str, cluster_domain: &str) -> Vec<String> {
    vec![
        service.to_string(),
        format!("{service}.{namespace}"),
        format!("{service}.{namespace}.svc"),
        format!("{service}.{namespace}.svc.{cluster_domain}"),
    ]
}

/// Fully-qualified service name used as the leaf common name.
pub fn service_fqdn(service: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("{service}.{namespace}.svc.{cluster_domain}")
}

/// Value of the provenance annotation for a Service.
pub fn generated_for(namespace: &str, service: &str) -> String {
    format!("{namespace}/{service}")
}

/// Inverse of [`generated_for`].
pub fn parse_generated_for(value: &str) -> Option<(&str, &str)> {
    let (namespace, service) = value.split_once('/')?;
    if namespace.is_empty() || service.is_empty() || service.contains('/') {
        return None;
    }
    Some((namespace, service))
}
