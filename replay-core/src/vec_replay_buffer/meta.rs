//! Metadata written next to memory-mapped columns.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

const META_FILE: &str = "buffer.yaml";

/// State needed to reopen a memory-mapped buffer.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub(super) struct BufferMeta {
    pub capacity: usize,
    pub n_envs: usize,
    pub pos: usize,
    pub full: bool,

    /// Feature shape of each field.
    pub fields: BTreeMap<String, Vec<usize>>,
}

impl BufferMeta {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(META_FILE)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let file = File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
        let rdr = BufReader::new(file);
        let meta = serde_yaml::from_reader(rdr)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(meta)
    }

    /// Writes through a temporary file that is then renamed into place.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = Self::path(dir);
        let tmp = dir.join(format!("{}.tmp", META_FILE));
        let mut file = File::create(&tmp).with_context(|| format!("Failed to create {:?}", tmp))?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {:?}", tmp))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Removes the metadata of a previous buffer, if any.
    pub fn remove(dir: &Path) -> Result<bool> {
        let path = Self::path(dir);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    fn meta() -> BufferMeta {
        let mut fields = BTreeMap::new();
        fields.insert("rgb".to_string(), vec![3, 64, 64]);
        fields.insert("rewards".to_string(), vec![1]);
        BufferMeta {
            capacity: 10,
            n_envs: 2,
            pos: 3,
            full: true,
            fields,
        }
    }

    #[test]
    fn test_save_load() -> Result<()> {
        let dir = TempDir::new("buffer_meta")?;
        meta().save(dir.path())?;
        assert_eq!(BufferMeta::load(dir.path())?, meta());
        assert!(BufferMeta::remove(dir.path())?);
        assert!(!BufferMeta::remove(dir.path())?);
        Ok(())
    }

    #[test]
    fn test_save_error_names_the_file() -> Result<()> {
        let dir = TempDir::new("buffer_meta")?;
        let missing = dir.path().join("missing");
        let err = meta().save(&missing).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.starts_with("Failed to create"));
        assert!(msg.contains("buffer.yaml.tmp"));
        Ok(())
    }
}
