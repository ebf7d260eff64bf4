//! Known downstream services and their resolved endpoints.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::config::{ServiceEndpointConfig, ServicesConfig};
use crate::error::GatewayError;

/// A downstream the gateway knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    /// Business data service.
    Data,
    /// Rules, identity and audit service.
    Rules,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::Data, Service::Rules];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Data => "data",
            Service::Rules => "rules",
        }
    }

    /// Position in [`Service::ALL`].
    pub(crate) fn index(&self) -> usize {
        match self {
            Service::Data => 0,
            Service::Rules => 1,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "data" | "data-service" => Ok(Service::Data),
            "rules" | "rules-service" => Ok(Service::Rules),
            other => Err(GatewayError::Configuration(format!("unknown service: {other}"))),
        }
    }
}

/// Where a service lives and the credential the gateway presents to it.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub base_url: Url,
    pub service_key: String,
}

impl ServiceEndpoint {
    /// Join a request path onto the base URL, keeping any base path prefix.
    pub fn url_for(&self, path: &str) -> Result<Url, GatewayError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| GatewayError::Configuration(format!("invalid path '{path}': {e}")))
    }
}

/// Resolved endpoints for every configured service.
#[derive(Debug, Clone, Default)]
pub struct ServiceDirectory {
    endpoints: HashMap<Service, ServiceEndpoint>,
}

impl ServiceDirectory {
    /// Build from config. Entries whose URL does not parse are left out and
    /// surface as configuration errors when used.
    pub fn from_config(config: &ServicesConfig) -> Self {
        let mut directory = Self::default();
        for (service, endpoint) in [(Service::Data, &config.data), (Service::Rules, &config.rules)] {
            match Self::resolve_config(endpoint) {
                Ok(resolved) => {
                    directory.endpoints.insert(service, resolved);
                }
                Err(e) => {
                    tracing::error!(service = %service, error = %e, "Service endpoint unusable");
                }
            }
        }
        directory
    }

    fn resolve_config(endpoint: &ServiceEndpointConfig) -> Result<ServiceEndpoint, url::ParseError> {
        Ok(ServiceEndpoint {
            base_url: Url::parse(&endpoint.base_url)?,
            service_key: endpoint.service_key.clone(),
        })
    }

    pub fn insert(&mut self, service: Service, endpoint: ServiceEndpoint) {
        self.endpoints.insert(service, endpoint);
    }

    pub fn resolve(&self, service: Service) -> Result<&ServiceEndpoint, GatewayError> {
        self.endpoints
            .get(&service)
            .ok_or_else(|| GatewayError::Configuration(format!("no endpoint configured for {service}")))
    }
}
