//! File-backed blob store with atomic replace.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

use super::AtomicBlobStore;

/// [`AtomicBlobStore`] writing blobs as files under one directory.
///
/// Writes go to a temporary sibling, are synced, and are renamed over the
/// target, so a crash mid-write leaves either the old blob or the new one.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Creates a store rooted at `root`. The directory is created on first
    /// write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn map_io(context: &str, err: &std::io::Error) -> VaultError {
        VaultError::Store(format!("{context}: {err}"))
    }
}

impl AtomicBlobStore for FileBlobStore {
    fn read(&self, name: &str) -> VaultResult<Option<Vec<u8>>> {
        match fs::read(self.blob_path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::map_io("read", &err)),
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> VaultResult<()> {
        fs::create_dir_all(&self.root).map_err(|err| Self::map_io("create dir", &err))?;

        let path = self.blob_path(name);
        let tmp_path = tmp_sibling(&path);

        let mut file = fs::File::create(&tmp_path).map_err(|err| Self::map_io("create", &err))?;
        file.write_all(bytes)
            .map_err(|err| Self::map_io("write", &err))?;
        file.sync_all().map_err(|err| Self::map_io("sync", &err))?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(|err| Self::map_io("rename", &err))
    }

    fn delete(&self, name: &str) -> VaultResult<()> {
        match fs::remove_file(self.blob_path(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::map_io("delete", &err)),
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| "blob".into(), std::ffi::OsStr::to_os_string);
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_delete_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("vault"));

        assert!(store.read("record").unwrap().is_none());

        store.write_atomic("record", b"payload").unwrap();
        assert_eq!(store.read("record").unwrap(), Some(b"payload".to_vec()));

        store.write_atomic("record", b"replaced").unwrap();
        assert_eq!(store.read("record").unwrap(), Some(b"replaced".to_vec()));

        store.delete("record").unwrap();
        store.delete("record").unwrap();
        assert!(store.read("record").unwrap().is_none());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());

        store.write_atomic("record", b"payload").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("record")]);
    }
}
