//! Hardhat build artifacts.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Bytes;
use serde::Deserialize;

use crate::error::DeployError;

/// A compiled contract as written by `hardhat compile`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    pub source_name: String,
    pub bytecode: Bytes,
    #[serde(skip)]
    pub path: PathBuf,
}

impl Artifact {
    /// `path/To.sol:Name`, as block explorers expect it.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: String,
}

/// The compiler input a contract was built from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub solc_long_version: String,
    pub input: serde_json::Value,
}

/// Lookup of artifacts under a hardhat `artifacts/` directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `contracts/unified/Vault.sol:Vault` or a bare `GatewaySend`.
    pub fn load(&self, name: &str) -> Result<Artifact, DeployError> {
        let path = match name.split_once(':') {
            Some((source, contract)) => self.root.join(source).join(format!("{contract}.json")),
            None => self.find_unique(name)?,
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            DeployError::config(format!(
                "artifact `{name}` not readable at {}: {e}",
                path.display()
            ))
        })?;
        let mut artifact: Artifact = serde_json::from_str(&content).map_err(|e| {
            DeployError::config(format!("artifact {} is malformed: {e}", path.display()))
        })?;

        if artifact.bytecode.is_empty() {
            return Err(DeployError::config(format!(
                "artifact `{name}` has no bytecode (abstract contract or interface?)"
            )));
        }

        artifact.path = path;
        Ok(artifact)
    }

    /// Compiler input and version recorded next to an artifact.
    pub fn build_info(&self, artifact: &Artifact) -> Result<BuildInfo, DeployError> {
        let dbg_path = artifact.path.with_extension("dbg.json");
        let dbg: DebugFile = read_json(&dbg_path)?;

        let dir = dbg_path.parent().unwrap_or(&self.root);
        read_json(&dir.join(dbg.build_info))
    }

    fn find_unique(&self, contract: &str) -> Result<PathBuf, DeployError> {
        let file_name = format!("{contract}.json");
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|e| {
                DeployError::config(format!("cannot read artifacts dir {}: {e}", dir.display()))
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    if path.file_name().is_some_and(|n| n != "build-info") {
                        pending.push(path);
                    }
                } else if path.file_name().is_some_and(|n| n == file_name.as_str()) {
                    found.push(path);
                }
            }
        }

        match found.len() {
            0 => Err(DeployError::config(format!(
                "artifact `{contract}` not found under {}",
                self.root.display()
            ))),
            1 => Ok(found.remove(0)),
            _ => Err(DeployError::config(format!(
                "artifact `{contract}` is ambiguous, use a fully qualified name: {}",
                found
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DeployError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DeployError::config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| DeployError::config(format!("{} is malformed: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn artifact_json(name: &str, source: &str, bytecode: &str) -> String {
        serde_json::json!({
            "_format": "hh-sol-artifact-1",
            "contractName": name,
            "sourceName": source,
            "abi": [],
            "bytecode": bytecode,
            "deployedBytecode": "0x",
        })
        .to_string()
    }

    #[test]
    fn test_load_by_bare_and_qualified_name() {
        let dir = TempDir::new("gantry-test").unwrap();
        let root = dir.path();
        write(
            root,
            "contracts/GatewaySend.sol/GatewaySend.json",
            &artifact_json("GatewaySend", "contracts/GatewaySend.sol", "0x6080"),
        );
        write(
            root,
            "contracts/unified/Vault.sol/Vault.json",
            &artifact_json("Vault", "contracts/unified/Vault.sol", "0x6001"),
        );
        write(
            root,
            "contracts/Vault.sol/Vault.json",
            &artifact_json("Vault", "contracts/Vault.sol", "0x6002"),
        );

        let store = ArtifactStore::new(root);
        let gateway = store.load("GatewaySend").unwrap();
        assert_eq!(gateway.bytecode.as_ref(), &[0x60, 0x80]);
        assert_eq!(gateway.fully_qualified_name(), "contracts/GatewaySend.sol:GatewaySend");

        let err = store.load("Vault").unwrap_err();
        assert!(matches!(err, DeployError::Configuration(m) if m.contains("ambiguous")));

        let vault = store.load("contracts/unified/Vault.sol:Vault").unwrap();
        assert_eq!(vault.bytecode.as_ref(), &[0x60, 0x01]);

        assert!(store.load("Missing").is_err());
    }

    #[test]
    fn test_interfaces_without_bytecode_are_rejected() {
        let dir = TempDir::new("gantry-test").unwrap();
        write(
            dir.path(),
            "contracts/IVault.sol/IVault.json",
            &artifact_json("IVault", "contracts/IVault.sol", "0x"),
        );
        let err = ArtifactStore::new(dir.path()).load("IVault").unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }

    #[test]
    fn test_build_info_follows_debug_file() {
        let dir = TempDir::new("gantry-test").unwrap();
        let root = dir.path();
        write(
            root,
            "contracts/Vault.sol/Vault.json",
            &artifact_json("Vault", "contracts/Vault.sol", "0x6002"),
        );
        write(
            root,
            "contracts/Vault.sol/Vault.dbg.json",
            r#"{"_format":"hh-sol-dbg-1","buildInfo":"../../build-info/abc.json"}"#,
        );
        write(
            root,
            "build-info/abc.json",
            r#"{"solcLongVersion":"0.8.26+commit.8a97fa7a","input":{"language":"Solidity"}}"#,
        );

        let store = ArtifactStore::new(root);
        let artifact = store.load("Vault").unwrap();
        let info = store.build_info(&artifact).unwrap();
        assert_eq!(info.solc_long_version, "0.8.26+commit.8a97fa7a");
        assert_eq!(info.input["language"], "Solidity");
    }
}
