//! Data-source registry
//!
//! Vendors turn a [`DataSourceDescriptor`] into an opened [`DataSource`];
//! the registry keeps the opened sources by id until they are removed.

use crate::config::{Bootstrap, BrowseSettings, DataSourceDescriptor};
use crate::datasource::DataSource;
use crate::error::{BrowserError, ConfigError, Result};
use crate::store::{MemoryStore, RedisStore};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Opens data sources of one kind of store
pub trait Vendor: Send + Sync {
    /// Name matched against the descriptor's `vendor`
    fn name(&self) -> &str;

    /// Check whether this vendor handles `descriptor`
    fn accepts(&self, descriptor: &DataSourceDescriptor) -> bool {
        descriptor.vendor.eq_ignore_ascii_case(self.name())
    }

    /// Connect and bind the store to `descriptor`
    fn create(
        &self,
        id: &str,
        descriptor: &DataSourceDescriptor,
        settings: BrowseSettings,
    ) -> Result<DataSource>;
}

/// Redis standalone and cluster deployments
#[derive(Debug, Default)]
pub struct RedisVendor;

impl Vendor for RedisVendor {
    fn name(&self) -> &str {
        "redis"
    }

    fn create(
        &self,
        id: &str,
        descriptor: &DataSourceDescriptor,
        settings: BrowseSettings,
    ) -> Result<DataSource> {
        let config = Bootstrap::parse(&descriptor.bootstrap)?.redis_config(descriptor)?;
        let store = RedisStore::connect(config)?;
        Ok(DataSource::new(id, descriptor.clone(), Arc::new(store), settings))
    }
}

/// In-process store, built from the bootstrap or shared with the caller
#[derive(Debug, Default)]
pub struct MemoryVendor {
    store: Option<MemoryStore>,
}

impl MemoryVendor {
    /// Vendor building a fresh store per data source
    pub fn new() -> Self {
        Self::default()
    }

    /// Vendor handing out views of `store`
    pub fn with_store(store: MemoryStore) -> Self {
        Self { store: Some(store) }
    }
}

impl Vendor for MemoryVendor {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(
        &self,
        id: &str,
        descriptor: &DataSourceDescriptor,
        settings: BrowseSettings,
    ) -> Result<DataSource> {
        let store = match &self.store {
            Some(store) => store.clone(),
            None => {
                let bootstrap = Bootstrap::parse(&descriptor.bootstrap)?;
                let (primaries, replicas) = bootstrap.memory_layout(descriptor)?;
                match bootstrap {
                    Bootstrap::Memory { partitioned: true } => {
                        MemoryStore::partitioned(primaries, replicas)
                    }
                    _ => MemoryStore::standalone(),
                }
            }
        };
        Ok(DataSource::new(id, descriptor.clone(), Arc::new(store), settings))
    }
}

/// Summary of a registered data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceHeader {
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub description: String,
    #[serde(rename = "readonly")]
    pub read_only: bool,
}

/// Opened data sources, by id
pub struct Registry {
    vendors: RwLock<Vec<Arc<dyn Vendor>>>,
    sources: RwLock<HashMap<String, Arc<DataSource>>>,
    settings: BrowseSettings,
}

impl Registry {
    /// Empty registry without vendors
    pub fn new(settings: BrowseSettings) -> Self {
        Self {
            vendors: RwLock::new(Vec::new()),
            sources: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Registry knowing the `redis` and `memory` vendors
    pub fn with_default_vendors(settings: BrowseSettings) -> Self {
        let registry = Self::new(settings);
        registry.register_vendor(RedisVendor);
        registry.register_vendor(MemoryVendor::new());
        registry
    }

    /// Add a vendor; later registrations win over earlier ones
    pub fn register_vendor(&self, vendor: impl Vendor + 'static) {
        self.vendors.write().insert(0, Arc::new(vendor));
    }

    /// Open, ping and register a data source; returns its id
    pub fn create_data_source(&self, descriptor: &DataSourceDescriptor) -> Result<String> {
        let vendor = self
            .vendors
            .read()
            .iter()
            .find(|v| v.accepts(descriptor))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownVendor(descriptor.vendor.clone()))?;

        let id = if descriptor.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            descriptor.id.clone()
        };

        let source = vendor.create(&id, descriptor, self.settings)?;
        if let Err(e) = source.ping() {
            warn!(id = %id, bootstrap = %descriptor.bootstrap, error = %e, "Data source unreachable");
            source.close();
            return Err(e);
        }

        info!(
            id = %id,
            vendor = vendor.name(),
            bootstrap = %descriptor.bootstrap,
            read_only = descriptor.read_only,
            "Data source registered"
        );
        if let Some(previous) = self.sources.write().insert(id.clone(), Arc::new(source)) {
            previous.close();
        }
        Ok(id)
    }

    /// Registered data source
    pub fn get(&self, id: &str) -> Result<Arc<DataSource>> {
        self.sources
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| BrowserError::UnknownDataSource(id.to_string()))
    }

    /// Headers of every registered source, by name
    pub fn headers(&self) -> Vec<DataSourceHeader> {
        let mut headers: Vec<DataSourceHeader> = self
            .sources
            .read()
            .values()
            .map(|source| {
                let d = source.descriptor();
                DataSourceHeader {
                    id: source.id().to_string(),
                    name: d.name.clone(),
                    vendor: d.vendor.clone(),
                    description: d.description.clone(),
                    read_only: d.read_only,
                }
            })
            .collect();
        headers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        headers
    }

    /// Close and forget one source
    pub fn remove(&self, id: &str) -> Result<()> {
        let source = self
            .sources
            .write()
            .remove(id)
            .ok_or_else(|| BrowserError::UnknownDataSource(id.to_string()))?;
        source.close();
        info!(id = %id, "Data source removed");
        Ok(())
    }

    /// Close every source
    pub fn shutdown(&self) {
        let sources: Vec<_> = self.sources.write().drain().collect();
        for (_, source) in &sources {
            source.close();
        }
        info!(count = sources.len(), "Registry shut down");
    }
}
