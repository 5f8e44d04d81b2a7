use std::{collections::HashMap, sync::Arc};

use reqwest::Client;
use url::Url;

use crate::{
    AuthorizationServerDescriptor, ConfigError, DiscoveryCache, DiscoveryError, KeySetCache,
    ProtectedResourceConfig, ProtectedResourceDescriptor, RegistryConfig, ResolveError,
    ServerMetadata, TrustPolicy,
};

const DEFAULT_RESOURCE: &str = "(default)";

#[derive(Debug)]
struct Entry {
    policy: TrustPolicy,
    descriptor: ProtectedResourceDescriptor,
}

#[derive(Debug)]
enum Mode {
    /// One policy applies to every request
    Legacy {
        policy: TrustPolicy,
        resource: Option<ProtectedResourceDescriptor>,
    },
    /// Each resource has its own policy
    MultiResource {
        entries: Vec<Entry>,
        by_resource: HashMap<String, usize>,
    },
}

/// Maps protected resources to the trust policies that guard them
///
/// The mode is fixed at construction: either a single policy guards every
/// request, or each configured resource has its own. All policies share
/// one [`DiscoveryCache`]; each policy has its own [`KeySetCache`].
#[derive(Debug)]
pub struct VerifierRegistry {
    mode: Mode,
    discovery: DiscoveryCache,
}

impl VerifierRegistry {
    /// Validates the configuration and builds every trust policy
    ///
    /// Any malformed or duplicate entry fails construction.
    pub fn new(config: RegistryConfig) -> Result<Self, ConfigError> {
        Self::with_client(config, crate::default_client()?)
    }

    /// Like [`new`](Self::new), fetching with the given client
    pub fn with_client(config: RegistryConfig, client: Client) -> Result<Self, ConfigError> {
        let discovery = DiscoveryCache::with_client(client.clone());

        let mode = match (config.authorization_server, config.protected_resources) {
            (Some(_), Some(_)) => return Err(ConfigError::BothModes),
            (None, None) => return Err(ConfigError::NoMode),
            (Some(server), None) => {
                let (servers, resource) = match config.resource {
                    Some(resource) => {
                        let descriptor =
                            ProtectedResourceDescriptor::from_config(&ProtectedResourceConfig {
                                resource,
                                authorization_servers: vec![server],
                                scopes_supported: config.scopes_supported,
                            })?;
                        (descriptor.authorization_servers().to_vec(), Some(descriptor))
                    }
                    None if config.scopes_supported.is_some() => {
                        return Err(ConfigError::ScopesWithoutResource);
                    }
                    None => (
                        vec![AuthorizationServerDescriptor::from_config(
                            DEFAULT_RESOURCE,
                            &server,
                        )?],
                        None,
                    ),
                };

                let policy = TrustPolicy::new(
                    resource.as_ref().map_or(DEFAULT_RESOURCE, |r| r.resource()),
                    servers,
                    discovery.clone(),
                    KeySetCache::with_client(client),
                )?;

                Mode::Legacy { policy, resource }
            }
            (None, Some(resources)) => {
                if resources.is_empty() {
                    return Err(ConfigError::NoMode);
                }

                let mut entries = Vec::with_capacity(resources.len());
                let mut by_resource = HashMap::with_capacity(resources.len());
                let mut by_path = HashMap::<String, String>::with_capacity(resources.len());

                for resource in &resources {
                    let descriptor = ProtectedResourceDescriptor::from_config(resource)?;
                    let key = descriptor.resource_url().to_string();
                    if by_resource.contains_key(&key) {
                        return Err(ConfigError::DuplicateResource {
                            resource: resource.resource.clone(),
                        });
                    }

                    let path = descriptor.metadata_path();
                    if let Some(other) = by_path.get(&path) {
                        return Err(ConfigError::MetadataPathCollision {
                            resource: resource.resource.clone(),
                            other: other.clone(),
                            path,
                        });
                    }

                    let policy = TrustPolicy::new(
                        descriptor.resource(),
                        descriptor.authorization_servers().to_vec(),
                        discovery.clone(),
                        KeySetCache::with_client(client.clone()),
                    )?;

                    by_resource.insert(key, entries.len());
                    by_path.insert(path, descriptor.resource().to_owned());
                    entries.push(Entry { policy, descriptor });
                }

                Mode::MultiResource {
                    entries,
                    by_resource,
                }
            }
        };

        Ok(Self { mode, discovery })
    }

    /// Whether each resource has its own trust policy
    pub fn is_multi_resource(&self) -> bool {
        matches!(self.mode, Mode::MultiResource { .. })
    }

    /// The metadata cache shared by every policy
    pub fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    /// Selects the trust policy for a request
    ///
    /// With a single policy, the hint is ignored. Otherwise the hint is
    /// required and must name a configured resource.
    pub fn resolve_verifier(&self, resource: Option<&str>) -> Result<&TrustPolicy, ResolveError> {
        match &self.mode {
            Mode::Legacy { policy, .. } => Ok(policy),
            Mode::MultiResource {
                entries,
                by_resource,
            } => {
                let resource = resource
                    .filter(|r| !r.is_empty())
                    .ok_or(ResolveError::ResourceRequired)?;

                Url::parse(resource)
                    .ok()
                    .and_then(|url| by_resource.get(url.as_str()))
                    .map(|&idx| &entries[idx].policy)
                    .ok_or_else(|| ResolveError::ResourceNotConfigured {
                        resource: resource.to_owned(),
                    })
            }
        }
    }

    /// The protected resources with a metadata document to serve
    ///
    /// With a single policy, this is the configured `resource`, if any.
    pub fn protected_resources(&self) -> Vec<&ProtectedResourceDescriptor> {
        match &self.mode {
            Mode::Legacy { resource, .. } => resource.iter().collect(),
            Mode::MultiResource { entries, .. } => entries.iter().map(|e| &e.descriptor).collect(),
        }
    }

    /// The metadata of the single trusted authorization server
    ///
    /// Returns `None` when each resource has its own policy.
    pub async fn authorization_server_metadata(
        &self,
    ) -> Result<Option<Arc<ServerMetadata>>, DiscoveryError> {
        match &self.mode {
            Mode::Legacy { policy, .. } => match policy.authorization_servers().first() {
                Some(server) => self.discovery.resolve(server).await.map(Some),
                None => Ok(None),
            },
            Mode::MultiResource { .. } => Ok(None),
        }
    }
}
