// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine class resolution (§4.10.2): a small TOML file naming the
//! `cpu`/`memory_bytes` shapes `CreateMachine` may request, loaded once at
//! startup.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MachineClassError {
    #[error("could not read machine class file {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),

    #[error("could not parse machine class file {0}: {1}")]
    Parse(std::path::PathBuf, toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineClass {
    pub name: String,
    pub cpu: u32,
    pub memory_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct MachineClassFile {
    #[serde(default)]
    classes: Vec<MachineClass>,
}

/// Loaded machine classes, keyed by name. `CreateMachine` looks up its
/// requested class here; an unknown name is `InvalidRequest`.
#[derive(Debug, Clone, Default)]
pub struct MachineClassSet {
    by_name: HashMap<String, MachineClass>,
}

impl MachineClassSet {
    pub fn load(path: &Path) -> Result<Self, MachineClassError> {
        let text = std::fs::read_to_string(path).map_err(|e| MachineClassError::Read(path.to_path_buf(), e))?;
        let file: MachineClassFile = toml::from_str(&text).map_err(|e| MachineClassError::Parse(path.to_path_buf(), e))?;

        let by_name = file.classes.into_iter().map(|c| (c.name.clone(), c)).collect();
        Ok(Self { by_name })
    }

    pub fn get(&self, name: &str) -> Option<&MachineClass> {
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MachineClass> {
        self.by_name.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_classes_from_toml_list() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"
            [[classes]]
            name = "standard-2"
            cpu = 2
            memory_bytes = 4294967296

            [[classes]]
            name = "standard-4"
            cpu = 4
            memory_bytes = 8589934592
            "#,
        )
        .unwrap();

        let classes = MachineClassSet::load(tmp.path()).unwrap();
        assert_eq!(classes.get("standard-2").unwrap().cpu, 2);
        assert_eq!(classes.get("standard-4").unwrap().memory_bytes, 8589934592);
        assert!(classes.get("unknown").is_none());
        assert_eq!(classes.iter().count(), 2);
    }
}
