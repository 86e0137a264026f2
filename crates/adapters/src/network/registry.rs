// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PluginError;
use crate::network::{driver_for, ApinetPlugin, IsolatedPlugin, NetworkInterfacePlugin, ProviderNetPlugin};

#[derive(Clone)]
pub struct NetworkInterfacePluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn NetworkInterfacePlugin>>,
}

impl NetworkInterfacePluginRegistry {
    pub fn new() -> Self {
        Self { plugins: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(IsolatedPlugin));
        reg.register(Arc::new(ProviderNetPlugin));
        reg.register(Arc::new(ApinetPlugin));
        reg
    }

    pub fn register(&mut self, plugin: Arc<dyn NetworkInterfacePlugin>) {
        self.plugins.insert(plugin.name(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NetworkInterfacePlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn find_plugin_by_spec(
        &self,
        spec: &lvp_core::NetworkInterfaceSpec,
    ) -> Result<Arc<dyn NetworkInterfacePlugin>, PluginError> {
        let driver = driver_for(spec);
        self.get(driver).ok_or_else(|| PluginError::UnknownNetworkDriver(driver.to_string()))
    }
}

impl Default for NetworkInterfacePluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lvp_core::NetworkInterfaceSpec;
    use std::collections::HashMap;

    #[test]
    fn spec_with_no_driver_attribute_resolves_to_isolated() {
        let reg = NetworkInterfacePluginRegistry::with_builtins();
        let spec = NetworkInterfaceSpec {
            name: "nic-1".into(),
            network_id: "net-a".into(),
            ips: Vec::new(),
            attributes: HashMap::new(),
        };
        assert_eq!(reg.find_plugin_by_spec(&spec).unwrap().name(), "isolated");
    }

    #[test]
    fn unknown_driver_errors() {
        let reg = NetworkInterfacePluginRegistry::with_builtins();
        let mut attributes = HashMap::new();
        attributes.insert("driver".to_string(), "sriov".to_string());
        let spec = NetworkInterfaceSpec {
            name: "nic-1".into(),
            network_id: "net-a".into(),
            ips: Vec::new(),
            attributes,
        };
        assert!(reg.find_plugin_by_spec(&spec).is_err());
    }
}
