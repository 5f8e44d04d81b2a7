use std::{collections::HashSet, sync::Arc};

use url::Url;

use crate::{
    config::{AuthorizationServerConfig, ProtectedResourceConfig},
    metadata::{self, ProtectedResourceMetadata, ServerKind, ServerMetadata},
    ConfigError,
};

/// A trusted authorization server
///
/// The issuer is always known without network access, so trust decisions
/// never wait on discovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationServerDescriptor {
    /// Metadata is known up front
    Resolved {
        /// The flavor of authorization server
        kind: ServerKind,
        /// The server's metadata
        metadata: Arc<ServerMetadata>,
    },
    /// Metadata is discovered from the issuer on first use
    Discovery {
        /// The flavor of authorization server
        kind: ServerKind,
        /// The server's issuer identifier
        issuer: String,
    },
}

impl AuthorizationServerDescriptor {
    /// The issuer identifier of the server
    pub fn issuer(&self) -> &str {
        match self {
            Self::Resolved { metadata, .. } => &metadata.issuer,
            Self::Discovery { issuer, .. } => issuer,
        }
    }

    /// The flavor of authorization server
    pub fn kind(&self) -> ServerKind {
        match self {
            Self::Resolved { kind, .. } | Self::Discovery { kind, .. } => *kind,
        }
    }

    pub(crate) fn from_config(
        resource: &str,
        config: &AuthorizationServerConfig,
    ) -> Result<Self, ConfigError> {
        match (&config.metadata, &config.issuer) {
            (Some(document), None) => {
                let metadata = ServerMetadata::parse(config.kind, document).map_err(|source| {
                    ConfigError::InvalidMetadata {
                        resource: resource.to_owned(),
                        source,
                    }
                })?;

                Ok(Self::Resolved {
                    kind: config.kind,
                    metadata: Arc::new(metadata),
                })
            }
            (None, Some(issuer)) => {
                if !is_valid_issuer(issuer) {
                    return Err(ConfigError::InvalidIssuer {
                        resource: resource.to_owned(),
                        issuer: issuer.clone(),
                    });
                }

                Ok(Self::Discovery {
                    kind: config.kind,
                    issuer: issuer.clone(),
                })
            }
            _ => Err(ConfigError::AmbiguousServer {
                resource: resource.to_owned(),
            }),
        }
    }
}

fn is_valid_issuer(issuer: &str) -> bool {
    match Url::parse(issuer) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.query().is_none()
                && url.fragment().is_none()
        }
        Err(_) => false,
    }
}

/// Checks that each issuer appears at most once among `servers`
pub(crate) fn ensure_unique_issuers(
    resource: &str,
    servers: &[AuthorizationServerDescriptor],
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for server in servers {
        if !seen.insert(server.issuer()) {
            return Err(ConfigError::DuplicateIssuer {
                resource: resource.to_owned(),
                issuer: server.issuer().to_owned(),
            });
        }
    }
    Ok(())
}

/// A protected resource and the authorization servers it trusts
#[derive(Clone, Debug)]
pub struct ProtectedResourceDescriptor {
    identifier: String,
    resource: Url,
    authorization_servers: Vec<AuthorizationServerDescriptor>,
    scopes_supported: Option<Vec<String>>,
}

impl ProtectedResourceDescriptor {
    pub(crate) fn from_config(config: &ProtectedResourceConfig) -> Result<Self, ConfigError> {
        let resource =
            Url::parse(&config.resource).map_err(|source| ConfigError::InvalidResource {
                resource: config.resource.clone(),
                source,
            })?;

        if config.authorization_servers.is_empty() {
            return Err(ConfigError::NoAuthorizationServers {
                resource: config.resource.clone(),
            });
        }

        let authorization_servers = config
            .authorization_servers
            .iter()
            .map(|server| AuthorizationServerDescriptor::from_config(&config.resource, server))
            .collect::<Result<Vec<_>, _>>()?;

        ensure_unique_issuers(&config.resource, &authorization_servers)?;

        Ok(Self {
            identifier: config.resource.clone(),
            resource,
            authorization_servers,
            scopes_supported: config.scopes_supported.clone(),
        })
    }

    /// The resource identifier, as configured
    pub fn resource(&self) -> &str {
        &self.identifier
    }

    /// The resource identifier, parsed
    pub fn resource_url(&self) -> &Url {
        &self.resource
    }

    /// The authorization servers trusted for the resource
    pub fn authorization_servers(&self) -> &[AuthorizationServerDescriptor] {
        &self.authorization_servers
    }

    /// The scopes advertised for the resource
    pub fn scopes_supported(&self) -> Option<&[String]> {
        self.scopes_supported.as_deref()
    }

    /// The protected resource metadata document for the resource
    pub fn metadata(&self) -> ProtectedResourceMetadata {
        ProtectedResourceMetadata::new(
            self.identifier.clone(),
            self.authorization_servers
                .iter()
                .map(|s| s.issuer().to_owned())
                .collect(),
            self.scopes_supported.clone(),
        )
    }

    /// The path at which the resource's metadata document is served
    pub fn metadata_path(&self) -> String {
        metadata::protected_resource_metadata_path(&self.resource)
    }
}
