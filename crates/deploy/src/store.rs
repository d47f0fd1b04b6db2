//! Durable, exclusively-owned registry file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::DeployError;
use crate::registry::AddressRegistry;

/// A registry loaded from disk and locked for the duration of a run.
///
/// Every mutation goes through [`RegistryStore::record`], which writes the
/// registry back before returning so a crash never loses a confirmed address.
#[derive(Debug)]
pub struct RegistryStore {
    path: PathBuf,
    registry: AddressRegistry,
    // Held for the advisory lock; released on drop.
    _lock: File,
}

fn io_err(action: &str, path: &Path, e: std::io::Error) -> DeployError {
    DeployError::Registry(format!("failed to {action} {}: {e}", path.display()))
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

impl RegistryStore {
    /// Lock and load the registry at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeployError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(DeployError::config(format!(
                "registry file not found: {}",
                path.display()
            )));
        }

        let lock = Self::acquire_lock(&path)?;

        let content =
            std::fs::read_to_string(&path).map_err(|e| io_err("read", &path, e))?;
        let registry = AddressRegistry::from_toml_str(&content)?;

        tracing::info!(
            path = %path.display(),
            network = %registry.network.name,
            chain_id = registry.network.chain_id,
            "Registry loaded"
        );

        Ok(Self {
            path,
            registry,
            _lock: lock,
        })
    }

    /// Write a fresh registry to `path` and lock it. Fails if the file exists.
    pub fn create(path: impl AsRef<Path>, registry: AddressRegistry) -> Result<Self, DeployError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(DeployError::config(format!(
                "registry file already exists: {}",
                path.display()
            )));
        }

        let lock = Self::acquire_lock(&path)?;
        let store = Self {
            path,
            registry,
            _lock: lock,
        };
        store.persist()?;
        Ok(store)
    }

    fn acquire_lock(path: &Path) -> Result<File, DeployError> {
        let lock_path = lock_path(path);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| io_err("open", &lock_path, e))?;

        lock.try_lock_exclusive().map_err(|_| {
            DeployError::config(format!(
                "registry {} is locked by another run",
                path.display()
            ))
        })?;

        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    /// Apply a mutation and persist it before returning.
    ///
    /// If the mutation fails, the in-memory registry is left untouched.
    pub fn record<T>(
        &mut self,
        mutate: impl FnOnce(&mut AddressRegistry) -> Result<T, DeployError>,
    ) -> Result<T, DeployError> {
        let mut next = self.registry.clone();
        let out = mutate(&mut next)?;
        self.registry = next;
        self.persist()?;
        Ok(out)
    }

    /// Atomically replace the registry file: temp file, fsync, rename.
    fn persist(&self) -> Result<(), DeployError> {
        let content = self.registry.to_toml_string()?;
        let tmp = tmp_path(&self.path);

        let mut file = File::create(&tmp).map_err(|e| io_err("create", &tmp, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| io_err("write", &tmp, e))?;
        file.sync_all().map_err(|e| io_err("sync", &tmp, e))?;
        drop(file);

        std::fs::rename(&tmp, &self.path).map_err(|e| io_err("replace", &self.path, e))?;

        tracing::debug!(path = %self.path.display(), "Registry persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, TxHash};
    use tempdir::TempDir;

    use super::*;
    use crate::network::Network;
    use crate::registry::ContractName;

    #[test]
    fn test_record_persists_immediately() {
        let dir = TempDir::new("gantry-test").unwrap();
        let path = dir.path().join("base.toml");

        let mut store = RegistryStore::create(&path, AddressRegistry::new(Network::Base.profile()))
            .unwrap();
        store
            .record(|r| {
                r.record_proxy(
                    &ContractName::from("Vault"),
                    Address::with_last_byte(1),
                    Address::with_last_byte(2),
                    TxHash::ZERO,
                )
            })
            .unwrap();

        let on_disk =
            AddressRegistry::from_toml_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(&on_disk, store.registry());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_failed_mutation_leaves_registry_unchanged() {
        let dir = TempDir::new("gantry-test").unwrap();
        let path = dir.path().join("base.toml");
        let mut store = RegistryStore::create(&path, AddressRegistry::new(Network::Base.profile()))
            .unwrap();

        let before = store.registry().clone();
        let result: Result<(), _> = store.record(|r| {
            r.params.insert("gas_limit".into(), "1".into());
            Err(DeployError::config("nope"))
        });

        assert!(result.is_err());
        assert_eq!(store.registry(), &before);
    }

    #[test]
    fn test_second_open_is_rejected_while_locked() {
        let dir = TempDir::new("gantry-test").unwrap();
        let path = dir.path().join("base.toml");
        let store = RegistryStore::create(&path, AddressRegistry::new(Network::Base.profile()))
            .unwrap();

        let err = RegistryStore::open(&path).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));

        drop(store);
        assert!(RegistryStore::open(&path).is_ok());
    }

    #[test]
    fn test_missing_registry_is_a_configuration_error() {
        let dir = TempDir::new("gantry-test").unwrap();
        let err = RegistryStore::open(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }
}
