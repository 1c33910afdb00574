//! Kubernetes resource watchers.
//!
//! This module wires the reconcilers to `kube_runtime::Controller` streams and
//! owns the retry policy. All object watchers go through `run_controller()`,
//! which records metrics and maps each outcome to an [`Action`]:
//!
//! - settled: forget the object's backoff, wait for the next change
//! - still waiting on cert-manager: requeue with the object's Fibonacci backoff
//! - conflict: short fixed requeue, the next run starts from a fresh read
//! - malformed or unimplemented: log, no retry until the object changes
//!
//! The cluster-scoped CA infrastructure has no object to watch and runs on a timer.

use crate::backoff::RetryTracker;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, ServiceOutcome, WorkloadOutcome};
use crate::selector::{pod_template_labels, selector_matches};
use crds::{ENABLED_ANNOTATION, GENERATED_FOR_ANNOTATION, MANAGED_LABEL, annotation_is_true, parse_generated_for};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig, Error as RuntimeError}, watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Shared state handed to every reconcile invocation.
#[derive(Debug)]
pub struct Context {
    pub reconciler: Arc<Reconciler>,
    pub retries: RetryTracker,
    pub metrics: Arc<Metrics>,
}

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<bool, ControllerError>> + Send>>;

fn object_key<K: Resource>(resource_name: &str, obj: &K) -> String {
    format!(
        "{}/{}/{}",
        resource_name,
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Decides what to do after a failed reconcile.
pub fn requeue_on_error(error: &ControllerError, retries: &RetryTracker, key: &str) -> Action {
    if !error.is_retryable() {
        error!("Not retrying {} until it changes: {}", key, error);
        retries.reset(key);
        return Action::await_change();
    }
    if let Some(delay) = error.retry_after() {
        debug!("Retrying {} in {:?}: {}", key, delay, error);
        return Action::requeue(delay);
    }
    let delay = retries.next_delay(key);
    warn!("Reconciliation of {} failed, retrying in {:?}: {}", key, delay, error);
    Action::requeue(delay)
}

/// Drives `controller` until its watch streams end.
///
/// `reconcile_fn` returns `Ok(true)` when the object is settled and
/// `Ok(false)` when it should be looked at again after a backoff.
async fn run_controller<K, F>(
    controller: Controller<K>,
    ctx: Arc<Context>,
    reconcile_fn: F,
    resource_name: &'static str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Context>| {
        requeue_on_error(error, &ctx.retries, &object_key(resource_name, obj.as_ref()))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Context>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = object_key(resource_name, obj.as_ref());
            debug!("Reconciling {}", key);
            let started = Instant::now();

            let result = reconcile_fn(Arc::clone(&ctx.reconciler), obj).await;
            let elapsed = started.elapsed();
            match result {
                Ok(true) => {
                    ctx.metrics.record(resource_name, "settled", elapsed);
                    ctx.retries.reset(&key);
                    Ok(Action::await_change())
                }
                Ok(false) => {
                    ctx.metrics.record(resource_name, "pending", elapsed);
                    let delay = ctx.retries.next_delay(&key);
                    debug!("{} waiting on a dependency, checking again in {:?}", key, delay);
                    Ok(Action::requeue(delay))
                }
                Err(e) => {
                    let outcome = if e.is_retryable() { "error" } else { "fatal" };
                    ctx.metrics.record(resource_name, outcome, elapsed);
                    Err(e)
                }
            }
        }
    };

    // Debounce batches bursts of watch events for the same object.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    controller
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj),
                // Already logged by the error policy
                Err(RuntimeError::ReconcilerFailed(_, obj)) => debug!("Reconcile of {} failed", obj),
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    info!("{} watcher stopped", resource_name);
    Ok(())
}

/// Maps a managed leaf secret back to the Service it was issued for.
pub fn service_for_secret(secret: &Secret) -> Option<ObjectRef<Service>> {
    let value = secret.annotations().get(GENERATED_FOR_ANNOTATION)?;
    let (namespace, service) = parse_generated_for(value)?;
    Some(ObjectRef::new(service).within(namespace))
}

/// Annotated Services in the Deployment's namespace whose selector matches its pods.
pub fn services_for_deployment(services: &[Arc<Service>], deployment: &Deployment) -> Vec<ObjectRef<Service>> {
    let namespace = deployment.namespace();
    let labels = pod_template_labels(deployment);
    services
        .iter()
        .filter(|svc| svc.namespace() == namespace)
        .filter(|svc| annotation_is_true(svc.metadata.annotations.as_ref(), ENABLED_ANNOTATION))
        .filter(|svc| {
            svc.spec
                .as_ref()
                .and_then(|s| s.selector.as_ref())
                .is_some_and(|selector| selector_matches(selector, labels))
        })
        .map(|svc| ObjectRef::from_obj(svc.as_ref()))
        .collect()
}

fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Watches Kubernetes resources for changes.
#[derive(Clone)]
pub struct Watcher {
    ctx: Arc<Context>,
    client: Client,
    namespace: Option<String>,
    concurrency: u16,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("namespace", &self.namespace)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(ctx: Arc<Context>, client: Client, namespace: Option<String>, concurrency: u16) -> Self {
        Self {
            ctx,
            client,
            namespace,
            concurrency,
        }
    }

    /// Starts watching Services, plus the managed Secrets and the Deployments
    /// that feed back into them.
    pub async fn watch_services(&self) -> Result<(), ControllerError> {
        let ns = self.namespace.as_deref();
        let services: Api<Service> = scoped_api(self.client.clone(), ns);
        let secrets: Api<Secret> = scoped_api(self.client.clone(), ns);
        let deployments: Api<Deployment> = scoped_api(self.client.clone(), ns);

        let controller = Controller::new(services, watcher::Config::default());
        let store = controller.store();
        let controller = controller
            .watches(
                secrets,
                watcher::Config::default().labels(&format!("{MANAGED_LABEL}=true")),
                |secret: Secret| service_for_secret(&secret),
            )
            .watches(deployments, watcher::Config::default(), move |deployment: Deployment| {
                services_for_deployment(&store.state(), &deployment)
            });

        run_controller(
            controller,
            Arc::clone(&self.ctx),
            |reconciler, service| {
                Box::pin(async move {
                    reconciler
                        .reconcile_service(&service)
                        .await
                        .map(ServiceOutcome::is_settled)
                })
            },
            "Service",
            self.concurrency,
        )
        .await
    }

    /// Starts watching Deployments for the CA public certificate annotation.
    pub async fn watch_ca_public_cert_deployments(&self) -> Result<(), ControllerError> {
        let deployments: Api<Deployment> = scoped_api(self.client.clone(), self.namespace.as_deref());
        let controller = Controller::new(deployments, watcher::Config::default());

        run_controller(
            controller,
            Arc::clone(&self.ctx),
            |reconciler, deployment| {
                Box::pin(async move {
                    reconciler
                        .reconcile_ca_public_cert_deployment(&deployment)
                        .await
                        .map(|outcome: WorkloadOutcome| {
                            debug!("Deployment outcome: {:?}", outcome);
                            true
                        })
                })
            },
            "Deployment",
            self.concurrency,
        )
        .await
    }

    /// Re-runs the CA infrastructure reconcile every `period`, forever.
    pub async fn watch_ca_infrastructure(&self, period: Duration) -> Result<(), ControllerError> {
        info!("Starting CA infrastructure timer ({:?})", period);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            run_ca_pass(&self.ctx).await;
        }
    }
}

/// One CA infrastructure reconcile, with metrics and readiness bookkeeping.
pub async fn run_ca_pass(ctx: &Context) -> bool {
    let started = Instant::now();
    match ctx.reconciler.reconcile_ca_infrastructure().await {
        Ok(()) => {
            ctx.metrics.record("ClusterCA", "settled", started.elapsed());
            ctx.metrics.set_ready();
            true
        }
        Err(e) => {
            ctx.metrics.record("ClusterCA", "error", started.elapsed());
            warn!("CA infrastructure reconcile failed, will retry on next tick: {}", e);
            false
        }
    }
}
