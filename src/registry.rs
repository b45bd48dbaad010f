use crate::client::Client;
use crate::config::{ClientConfig, ConfigError};
use crate::domain::{EventLevel, Fault, Metadata};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Tracker instance '{0}' not found")]
    NotFound(String),
    #[error("No default tracker initialized; call create() first")]
    NoDefault,
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Name → client map plus one unnamed default client.
///
/// An empty name is treated the same as no name.
#[derive(Debug, Default)]
pub struct Registry {
    default: RwLock<Option<Client>>,
    named: RwLock<HashMap<String, Client>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and starts a client, then stores it.
    ///
    /// Without a name the client becomes the default only if none exists yet;
    /// it is returned to the caller either way. A name replaces any client
    /// previously stored under it.
    pub fn create(&self, config: ClientConfig, name: Option<&str>) -> Result<Client, RegistryError> {
        let client = Client::new(config)?;
        Ok(self.insert(client, name))
    }

    /// Stores an already-built client under the same rules as [`create`](Self::create).
    pub fn insert(&self, client: Client, name: Option<&str>) -> Client {
        match normalize(name) {
            Some(name) => {
                if self
                    .named
                    .write()
                    .insert(name.to_string(), client.clone())
                    .is_some()
                {
                    debug!("Replaced tracker instance '{}'", name);
                }
            }
            None => {
                let mut default = self.default.write();
                if default.is_none() {
                    *default = Some(client.clone());
                } else {
                    debug!("Default tracker already set; new client not stored");
                }
            }
        }

        client.start();
        client
    }

    pub fn get(&self, name: Option<&str>) -> Result<Client, RegistryError> {
        match normalize(name) {
            Some(name) => self
                .named
                .read()
                .get(name)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(name.to_string())),
            None => self.default.read().clone().ok_or(RegistryError::NoDefault),
        }
    }

    pub fn has(&self, name: Option<&str>) -> bool {
        match normalize(name) {
            Some(name) => self.named.read().contains_key(name),
            None => self.default.read().is_some(),
        }
    }

    /// Reports a fault through the default client.
    pub fn error(&self, fault: impl Into<Fault>) -> Result<(), RegistryError> {
        self.get(None)?.error(fault);
        Ok(())
    }

    /// Reports a named event through the default client.
    pub fn event(
        &self,
        title: &str,
        level: EventLevel,
        metadata: Option<Metadata>,
    ) -> Result<(), RegistryError> {
        self.get(None)?.event(title, level, metadata);
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), RegistryError> {
        let client = self.get(None)?;
        client.force_flush().await;
        Ok(())
    }

    pub fn pause(&self) -> Result<(), RegistryError> {
        self.get(None)?.pause();
        Ok(())
    }

    pub fn resume(&self) -> Result<(), RegistryError> {
        self.get(None)?.resume();
        Ok(())
    }

    /// Shuts down the default and every named client, then forgets them all.
    pub async fn shutdown_all(&self) {
        let default = self.default.write().take();
        let named: Vec<Client> = self.named.write().drain().map(|(_, client)| client).collect();

        let count = named.len() + usize::from(default.is_some());
        join_all(default.iter().chain(named.iter()).map(Client::shutdown)).await;

        info!("Shut down {} tracker instance(s)", count);
    }
}

fn normalize(name: Option<&str>) -> Option<&str> {
    name.filter(|name| !name.is_empty())
}
