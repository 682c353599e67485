use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{HttpRegistryClient, RegistryClient};
use crate::config::RegistryConfig;
use crate::error::{Error, Result};

/// Holds one client per configured registry. The map is fixed at
/// construction and shared read-only between workers.
pub struct RegistryManager {
    clients: HashMap<String, Arc<dyn RegistryClient>>,
}

impl RegistryManager {
    pub fn from_configs(configs: &[RegistryConfig], timeout: Duration) -> Result<Self> {
        let clients = configs
            .iter()
            .map(|config| {
                HttpRegistryClient::new(config, timeout)
                    .map(|c| Arc::new(c) as Arc<dyn RegistryClient>)
                    .map_err(Error::from)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_clients(clients)
    }

    pub fn from_clients<I>(clients: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn RegistryClient>>,
    {
        let mut map = HashMap::new();
        for client in clients {
            let name = client.name().to_string();
            if map.insert(name.clone(), client).is_some() {
                return Err(Error::Config(format!("duplicate registry name '{name}'")));
            }
        }
        if map.is_empty() {
            return Err(Error::Config("no registry configurations provided".to_string()));
        }
        Ok(Self { clients: map })
    }

    pub fn client(&self, name: &str) -> Result<Arc<dyn RegistryClient>> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownRegistry(name.to_string()))
    }

    /// Registry names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }
}
