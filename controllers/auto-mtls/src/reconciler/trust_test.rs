//! Unit tests for namespace trust distribution

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::ca_infra::Ensured;
    use crate::test_utils::*;
    use cluster_client::MockClusterClient;
    use crds::{CA_CERT_KEY, MANAGED_LABEL, TRUST_COPY_SECRET_NAME};

    #[tokio::test]
    async fn test_copies_only_the_public_certificate() {
        let mock = MockClusterClient::new();
        seed_ca_secret(&mock, true);
        let reconciler = test_reconciler(&mock);

        assert_eq!(reconciler.ensure_trust_copy("billing").await.unwrap(), Ensured::Created);

        let copy = mock.secret("billing", TRUST_COPY_SECRET_NAME).unwrap();
        assert_eq!(copy.type_.as_deref(), Some("Opaque"));
        let data = copy.data.unwrap();
        assert_eq!(data.keys().collect::<Vec<_>>(), vec![CA_CERT_KEY]);
        assert_eq!(data[CA_CERT_KEY].0, TEST_CA_PEM);
        assert_eq!(copy.metadata.labels.unwrap()[MANAGED_LABEL], "true");
    }

    #[tokio::test]
    async fn test_existing_copy_is_left_alone() {
        let mock = MockClusterClient::new();
        seed_ca_secret(&mock, true);
        mock.add_secret(create_test_secret(
            TRUST_COPY_SECRET_NAME,
            "billing",
            &[(CA_CERT_KEY, b"older ca")],
        ));
        let reconciler = test_reconciler(&mock);

        assert_eq!(
            reconciler.ensure_trust_copy("billing").await.unwrap(),
            Ensured::AlreadyPresent
        );
        assert_eq!(mock.write_count(), 0);
        let copy = mock.secret("billing", TRUST_COPY_SECRET_NAME).unwrap();
        assert_eq!(copy.data.unwrap()[CA_CERT_KEY].0, b"older ca");
    }

    #[tokio::test]
    async fn test_missing_ca_crt_creates_nothing() {
        let mock = MockClusterClient::new();
        seed_ca_secret(&mock, false);
        let reconciler = test_reconciler(&mock);

        let err = reconciler.ensure_trust_copy("billing").await.unwrap_err();
        assert!(matches!(err, ControllerError::MissingField(_)));
        assert!(err.is_retryable());
        assert!(mock.secret("billing", TRUST_COPY_SECRET_NAME).is_none());
        assert_eq!(mock.write_count(), 0);
    }

    #[tokio::test]
    async fn test_ca_secret_not_issued_yet_is_retryable() {
        let mock = MockClusterClient::new();
        let reconciler = test_reconciler(&mock);

        let err = reconciler.ensure_trust_copy("billing").await.unwrap_err();
        assert!(matches!(err, ControllerError::Cluster(ref e) if e.is_not_found()));
        assert!(err.is_retryable());
        assert_eq!(mock.write_count(), 0);
    }

    #[tokio::test]
    async fn test_one_copy_per_namespace() {
        let mock = MockClusterClient::new();
        seed_ca_secret(&mock, true);
        let reconciler = test_reconciler(&mock);

        let (a, b) = tokio::join!(
            reconciler.ensure_trust_copy("billing"),
            reconciler.ensure_trust_copy("billing")
        );
        a.unwrap();
        b.unwrap();
        reconciler.ensure_trust_copy("shipping").await.unwrap();

        assert!(mock.secret("billing", TRUST_COPY_SECRET_NAME).is_some());
        assert!(mock.secret("shipping", TRUST_COPY_SECRET_NAME).is_some());
        assert_eq!(mock.write_count(), 2);
    }
}
