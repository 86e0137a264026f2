// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use lvp_core::VolumeSpec;

use crate::error::PluginError;
use crate::volume::{CephPlugin, EmptyDiskPlugin, LocalDiskPlugin, VolumePlugin};

/// Registry of named volume plugins, keyed by the unique name persisted in
/// disk aliases and handles (I4, I5, §6).
#[derive(Clone)]
pub struct VolumePluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn VolumePlugin>>,
}

impl VolumePluginRegistry {
    pub fn new() -> Self {
        Self { plugins: HashMap::new() }
    }

    /// The registry pre-populated with the three built-in plugins.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(LocalDiskPlugin));
        reg.register(Arc::new(EmptyDiskPlugin));
        reg.register(Arc::new(CephPlugin));
        reg
    }

    pub fn register(&mut self, plugin: Arc<dyn VolumePlugin>) {
        self.plugins.insert(plugin.name(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VolumePlugin>> {
        self.plugins.get(name).cloned()
    }

    /// The unique plugin whose `can_support` is true for `spec`; zero or
    /// more than one match is an error.
    pub fn find_plugin_by_spec(&self, spec: &VolumeSpec) -> Result<Arc<dyn VolumePlugin>, PluginError> {
        let mut matches: Vec<_> = self.plugins.values().filter(|p| p.can_support(spec)).collect();
        match matches.len() {
            0 => Err(PluginError::NoPluginFor(spec.name.clone())),
            1 => Ok(matches.remove(0).clone()),
            n => Err(PluginError::AmbiguousPlugin(n, spec.name.clone())),
        }
    }
}

impl Default for VolumePluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lvp_core::VolumeSource;

    #[test]
    fn find_plugin_by_spec_resolves_each_builtin_source_kind() {
        let reg = VolumePluginRegistry::with_builtins();

        let local = VolumeSpec {
            name: "a".into(),
            device: "oda".into(),
            source: VolumeSource::LocalDisk { size: 1, image_ref: None },
        };
        assert_eq!(reg.find_plugin_by_spec(&local).unwrap().name(), "local-disk");

        let empty = VolumeSpec {
            name: "b".into(),
            device: "odb".into(),
            source: VolumeSource::EmptyDisk { size: 1 },
        };
        assert_eq!(reg.find_plugin_by_spec(&empty).unwrap().name(), "empty-disk");

        let ceph = VolumeSpec {
            name: "c".into(),
            device: "odc".into(),
            source: VolumeSource::Connection {
                driver: "ceph".into(),
                handle: "h".into(),
                attributes: Default::default(),
                secret_data: Default::default(),
                encryption_data: Default::default(),
                effective_storage_bytes: None,
            },
        };
        assert_eq!(reg.find_plugin_by_spec(&ceph).unwrap().name(), "ceph");
    }

    #[test]
    fn unknown_connection_driver_matches_no_plugin() {
        let reg = VolumePluginRegistry::with_builtins();
        let spec = VolumeSpec {
            name: "d".into(),
            device: "odd".into(),
            source: VolumeSource::Connection {
                driver: "nfs".into(),
                handle: "h".into(),
                attributes: Default::default(),
                secret_data: Default::default(),
                encryption_data: Default::default(),
                effective_storage_bytes: None,
            },
        };
        assert!(matches!(reg.find_plugin_by_spec(&spec), Err(PluginError::NoPluginFor(_))));
    }
}
