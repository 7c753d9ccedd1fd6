//! Model bank persistence.
//!
//! A bank is stored next to a JSON manifest: `<base>.json` holds the bank key,
//! its shape and when it was built; `<base>.bin` holds the time courses as a
//! matrix store. Loading succeeds only when the stored key equals the key the
//! current configuration would produce.

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PrfError;
use crate::io::store::{MatrixStore, write_matrix_store};
use crate::models::{ModelBank, ModelKey};

/// Where model banks are kept between runs.
pub trait ModelBankRepository {
    fn put(&self, bank: &ModelBank) -> Result<(), PrfError>;

    /// Fails with `ModelBankMissing` if nothing matching `key` is stored.
    fn get(&self, key: &ModelKey) -> Result<ModelBank, PrfError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheManifest {
    key: ModelKey,
    candidates: usize,
    volumes: usize,
    created: DateTime<Utc>,
}

/// File-system repository rooted at a base path (no extension).
#[derive(Debug, Clone)]
pub struct FileModelCache {
    base: PathBuf,
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = base.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl FileModelCache {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn manifest_path(&self) -> PathBuf {
        with_suffix(&self.base, ".json")
    }

    pub fn data_path(&self) -> PathBuf {
        with_suffix(&self.base, ".bin")
    }
}

impl ModelBankRepository for FileModelCache {
    fn put(&self, bank: &ModelBank) -> Result<(), PrfError> {
        let manifest_path = self.manifest_path();
        if let Some(dir) = manifest_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| PrfError::io("create model directory", dir, e))?;
        }
        let data_path = self.data_path();
        write_matrix_store(&data_path, bank.values())?;

        let manifest = CacheManifest {
            key: bank.key().clone(),
            candidates: bank.n_candidates(),
            volumes: bank.n_volumes(),
            created: Utc::now(),
        };
        let file = File::create(&manifest_path).map_err(|e| PrfError::io("create model manifest", &manifest_path, e))?;
        serde_json::to_writer_pretty(file, &manifest)
            .map_err(|e| PrfError::format(format!("Failed to write model manifest: {e}")))?;

        info!(path = %data_path.display(), candidates = bank.n_candidates(), "model bank saved");
        Ok(())
    }

    fn get(&self, key: &ModelKey) -> Result<ModelBank, PrfError> {
        let manifest_path = self.manifest_path();
        let data_path = self.data_path();
        if !manifest_path.is_file() || !data_path.is_file() {
            return Err(PrfError::ModelBankMissing(format!(
                "No model bank at '{}' (set lgcCrteMdl to build one).",
                self.base.display()
            )));
        }

        let file = File::open(&manifest_path).map_err(|e| PrfError::io("open model manifest", &manifest_path, e))?;
        let manifest: CacheManifest = serde_json::from_reader(file)
            .map_err(|e| PrfError::format(format!("Invalid model manifest '{}': {e}", manifest_path.display())))?;
        if &manifest.key != key {
            return Err(PrfError::ModelBankMissing(format!(
                "Model bank at '{}' was built for a different grid, stimulus or timing.",
                self.base.display()
            )));
        }

        let store = MatrixStore::open(&data_path)?;
        if store.rows() != manifest.candidates || store.cols() != manifest.volumes {
            return Err(PrfError::format(format!(
                "Model bank data is {}x{} but its manifest says {}x{}.",
                store.rows(),
                store.cols(),
                manifest.candidates,
                manifest.volumes
            )));
        }
        info!(path = %data_path.display(), built = %manifest.created, "model bank loaded");
        ModelBank::new(manifest.key, store.to_matrix()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bank::tests::build_test_bank;

    #[test]
    fn put_then_get_returns_identical_bank() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileModelCache::new(dir.path().join("models").join("bank"));
        let bank = build_test_bank(3, 2, 2, 12);
        cache.put(&bank).unwrap();

        assert!(cache.manifest_path().ends_with("bank.json"));
        let loaded = cache.get(bank.key()).unwrap();
        assert_eq!(loaded.values(), bank.values());
        assert_eq!(loaded.key(), bank.key());
    }

    #[test]
    fn missing_bank_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileModelCache::new(dir.path().join("nothing"));
        let bank = build_test_bank(2, 1, 1, 8);
        assert!(matches!(cache.get(bank.key()), Err(PrfError::ModelBankMissing(_))));
    }

    #[test]
    fn bank_for_other_configuration_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileModelCache::new(dir.path().join("bank"));
        let bank = build_test_bank(3, 2, 1, 10);
        cache.put(&bank).unwrap();

        let mut key = bank.key().clone();
        key.bank.sd_smth_tmp = 1.0;
        assert!(matches!(cache.get(&key), Err(PrfError::ModelBankMissing(_))));
    }
}
