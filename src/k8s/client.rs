use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::{debug, info};

use crate::discovery::{CandidateSource, DiscoveryScope};
use crate::k8s::types::{CandidateResource, AGENT_LABEL_SELECTOR};
use crate::{Result, Scout8Error};

pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    pub async fn try_default() -> Result<Self> {
        debug!("Initializing Kubernetes client");

        let client = Client::try_default().await.map_err(|e| {
            Scout8Error::KubernetesError(format!("Failed to create K8s client: {}", e))
        })?;

        info!("Successfully connected to Kubernetes cluster");

        Ok(Self { client })
    }

    fn services(&self, scope: &DiscoveryScope) -> Api<Service> {
        match scope {
            DiscoveryScope::Namespace(ns) => Api::namespaced(self.client.clone(), ns),
            DiscoveryScope::AllNamespaces => Api::all(self.client.clone()),
        }
    }

    async fn ingresses_in(&self, namespace: &str) -> Result<Vec<Ingress>> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await.map_err(|e| {
            Scout8Error::KubernetesError(format!(
                "Failed to list ingresses in {}: {}",
                namespace, e
            ))
        })?;
        Ok(list.items)
    }
}

#[async_trait]
impl CandidateSource for K8sClient {
    async fn list_candidates(&self, scope: &DiscoveryScope) -> Result<Vec<CandidateResource>> {
        let params = ListParams::default().labels(AGENT_LABEL_SELECTOR);
        let services = self
            .services(scope)
            .list(&params)
            .await
            .map_err(|e| Scout8Error::KubernetesError(format!("Failed to list services: {}", e)))?
            .items;

        debug!(services = services.len(), "Listed labeled candidate services");

        // Ingresses are fetched once per namespace seen in the listing.
        let mut ingress_cache: HashMap<String, Vec<Ingress>> = HashMap::new();
        let mut candidates = Vec::with_capacity(services.len());

        for service in &services {
            let Some(mut candidate) = CandidateResource::from_service(service) else {
                continue;
            };
            if !ingress_cache.contains_key(&candidate.namespace) {
                let fetched = self.ingresses_in(&candidate.namespace).await?;
                ingress_cache.insert(candidate.namespace.clone(), fetched);
            }
            candidate.address = resolve_address(service, &ingress_cache[&candidate.namespace]);
            candidates.push(candidate);
        }

        Ok(candidates)
    }
}

/// Resolve a candidate Service's serving origin.
///
/// An Ingress routing to the Service wins (https when it carries TLS for
/// the host); otherwise fall back to the cluster-internal DNS name. `None`
/// when the Service declares no port and no Ingress matches.
pub fn resolve_address(service: &Service, ingresses: &[Ingress]) -> Option<String> {
    let name = service.metadata.name.as_deref()?;
    let namespace = service.metadata.namespace.as_deref().unwrap_or("default");

    for ingress in ingresses {
        let Some(spec) = ingress.spec.as_ref() else { continue };
        for rule in spec.rules.iter().flatten() {
            let Some(host) = rule.host.as_deref() else { continue };
            let routes_here = rule
                .http
                .as_ref()
                .map(|http| {
                    http.paths
                        .iter()
                        .any(|path| {
                            path.backend
                                .service
                                .as_ref()
                                .map(|backend| backend.name == name)
                                .unwrap_or(false)
                        })
                })
                .unwrap_or(false);
            if !routes_here {
                continue;
            }
            let tls = spec
                .tls
                .iter()
                .flatten()
                .any(|t| t.hosts.iter().flatten().any(|h| h == host));
            let scheme = if tls { "https" } else { "http" };
            return Some(format!("{scheme}://{host}"));
        }
    }

    CandidateResource::service_port(service)
        .map(|port| format!("http://{name}.{namespace}.svc.cluster.local:{port}"))
}
