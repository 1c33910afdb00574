//! Controller configuration loaded from environment variables.

use crate::error::ControllerError;
use crds::{DEFAULT_CA_NAMESPACE, DEFAULT_CLUSTER_DOMAIN};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace holding the CA certificate and its secret (`CA_NAMESPACE`).
    ///
    /// A `ca` ClusterIssuer reads its secret from cert-manager's cluster
    /// resource namespace (`--cluster-resource-namespace`, `cert-manager` by
    /// default). This must name that namespace or the CA issuer never becomes
    /// ready.
    pub ca_namespace: String,
    /// DNS suffix used for leaf certificate names
    pub cluster_domain: String,
    /// Period of the CA infrastructure timer
    pub ca_reconcile_interval: Duration,
    pub leaf_duration_hours: u64,
    pub leaf_renew_before_hours: u64,
    /// Where the leaf secret is mounted in workload containers
    pub tls_mount_path: String,
    /// Where the namespace trust copy is mounted in workload containers
    pub ca_mount_path: String,
    /// Restrict Service and Deployment watches to one namespace
    pub watch_namespace: Option<String>,
    pub metrics_addr: SocketAddr,
    /// Max concurrent reconciles per controller
    pub concurrency: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ca_namespace: DEFAULT_CA_NAMESPACE.to_string(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            ca_reconcile_interval: Duration::from_secs(10),
            leaf_duration_hours: 8760,
            leaf_renew_before_hours: 720,
            tls_mount_path: "/etc/tls".to_string(),
            ca_mount_path: "/etc/ca".to_string(),
            watch_namespace: None,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            concurrency: 4,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{key}={raw}: {e}"))
        }),
        None => Ok(default),
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Loads configuration through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let interval_secs = parse(
            "CA_RECONCILE_INTERVAL_SECS",
            lookup("CA_RECONCILE_INTERVAL_SECS"),
            defaults.ca_reconcile_interval.as_secs(),
        )?;

        let config = Self {
            ca_namespace: lookup("CA_NAMESPACE").unwrap_or(defaults.ca_namespace),
            cluster_domain: lookup("CLUSTER_DOMAIN").unwrap_or(defaults.cluster_domain),
            ca_reconcile_interval: Duration::from_secs(interval_secs),
            leaf_duration_hours: parse(
                "LEAF_CERT_DURATION_HOURS",
                lookup("LEAF_CERT_DURATION_HOURS"),
                defaults.leaf_duration_hours,
            )?,
            leaf_renew_before_hours: parse(
                "LEAF_CERT_RENEW_BEFORE_HOURS",
                lookup("LEAF_CERT_RENEW_BEFORE_HOURS"),
                defaults.leaf_renew_before_hours,
            )?,
            tls_mount_path: lookup("TLS_MOUNT_PATH").unwrap_or(defaults.tls_mount_path),
            ca_mount_path: lookup("CA_MOUNT_PATH").unwrap_or(defaults.ca_mount_path),
            watch_namespace: lookup("WATCH_NAMESPACE"),
            metrics_addr: parse("METRICS_ADDR", lookup("METRICS_ADDR"), defaults.metrics_addr)?,
            concurrency: parse(
                "CONTROLLER_CONCURRENCY",
                lookup("CONTROLLER_CONCURRENCY"),
                defaults.concurrency,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.ca_reconcile_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "CA_RECONCILE_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }
        if self.leaf_duration_hours == 0 {
            return Err(ControllerError::InvalidConfig(
                "LEAF_CERT_DURATION_HOURS must be greater than 0".to_string(),
            ));
        }
        if self.leaf_renew_before_hours >= self.leaf_duration_hours {
            return Err(ControllerError::InvalidConfig(format!(
                "LEAF_CERT_RENEW_BEFORE_HOURS ({}) must be less than LEAF_CERT_DURATION_HOURS ({})",
                self.leaf_renew_before_hours, self.leaf_duration_hours
            )));
        }
        if self.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "CONTROLLER_CONCURRENCY must be greater than 0".to_string(),
            ));
        }
        for (key, path) in [
            ("TLS_MOUNT_PATH", &self.tls_mount_path),
            ("CA_MOUNT_PATH", &self.ca_mount_path),
        ] {
            if !path.starts_with('/') {
                return Err(ControllerError::InvalidConfig(format!(
                    "{key} must be an absolute path, got '{path}'"
                )));
            }
        }
        if self.tls_mount_path == self.ca_mount_path {
            return Err(ControllerError::InvalidConfig(
                "TLS_MOUNT_PATH and CA_MOUNT_PATH must differ".to_string(),
            ));
        }
        if self.ca_namespace.is_empty() || self.cluster_domain.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "CA_NAMESPACE and CLUSTER_DOMAIN must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.ca_namespace, "cert-manager");
        assert_eq!(config.ca_mount_path, "/etc/ca");
        assert_eq!(config.ca_reconcile_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("CA_NAMESPACE", "pki"),
            ("CLUSTER_DOMAIN", "corp.internal"),
            ("WATCH_NAMESPACE", "billing"),
            ("CONTROLLER_CONCURRENCY", "8"),
            ("METRICS_ADDR", "127.0.0.1:9090"),
        ]))
        .unwrap();
        assert_eq!(config.ca_namespace, "pki");
        assert_eq!(config.cluster_domain, "corp.internal");
        assert_eq!(config.watch_namespace.as_deref(), Some("billing"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.metrics_addr.port(), 9090);
    }

    #[test]
    fn test_renew_before_must_be_shorter_than_duration() {
        let err = Config::from_lookup(lookup(&[
            ("LEAF_CERT_DURATION_HOURS", "24"),
            ("LEAF_CERT_RENEW_BEFORE_HOURS", "24"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Config::from_lookup(lookup(&[("CA_RECONCILE_INTERVAL_SECS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CA_RECONCILE_INTERVAL_SECS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("TLS_MOUNT_PATH", "etc/tls")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CA_MOUNT_PATH", "/etc/tls")])).is_err());
    }
}
