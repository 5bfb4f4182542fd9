use crate::provider::{InstanceProvider, MachineInstance};
use crate::RuntimeError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Instance providers keyed by the machine type they realize.
#[derive(Clone, Default)]
pub struct InstanceProviders {
    providers: BTreeMap<String, Arc<dyn InstanceProvider>>,
}

impl InstanceProviders {
    pub fn new(providers: impl IntoIterator<Item = Arc<dyn InstanceProvider>>) -> Self {
        let mut registry = Self::default();
        for provider in providers {
            registry.register(provider);
        }
        registry
    }

    /// Register a provider, replacing any previous one for the same type.
    pub fn register(&mut self, provider: Arc<dyn InstanceProvider>) {
        let machine_type = provider.machine_type().to_owned();
        debug!("registering instance provider for type '{machine_type}'");
        self.providers.insert(machine_type, provider);
    }

    pub fn get(&self, machine_type: &str) -> Result<Arc<dyn InstanceProvider>, RuntimeError> {
        self.providers
            .get(machine_type)
            .cloned()
            .ok_or_else(|| RuntimeError::ProviderNotFound(machine_type.to_owned()))
    }

    pub fn has(&self, machine_type: &str) -> bool {
        self.providers.contains_key(machine_type)
    }

    pub fn machine_types(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Destroy through the provider of the instance's type, or directly
    /// when that provider has since been unregistered.
    pub fn destroy(&self, instance: &dyn MachineInstance) -> Result<(), RuntimeError> {
        match self.providers.get(&instance.machine().config.machine_type) {
            Some(provider) => provider.destroy_instance(instance),
            None => instance.destroy(),
        }
    }
}
