//! Raw document bytes, one file per slug under the uploads directory.
//!
//! The repository never interprets content; text extraction happens in
//! [`crate::extract`].

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::persist::write_atomic;
use crate::slug::Slug;

pub struct DocumentRepository {
    root: PathBuf,
}

impl DocumentRepository {
    /// Opens (creating if needed) the uploads directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage location for `slug`, derived from the slug alone.
    pub fn path_for(&self, slug: &Slug) -> Result<PathBuf> {
        let path = self.root.join(slug.as_str());
        // Must stay a direct child of the root.
        if path.parent() != Some(self.root.as_path()) {
            return Err(Error::InvalidSlug(slug.to_string()));
        }
        Ok(path)
    }

    pub fn store(&self, slug: &Slug, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.path_for(slug)?, bytes)?;
        tracing::debug!(slug = %slug, bytes = bytes.len(), "stored document bytes");
        Ok(())
    }

    pub fn load(&self, slug: &Slug) -> Result<Vec<u8>> {
        match std::fs::read(self.path_for(slug)?) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("document bytes for {}", slug)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, slug: &Slug) -> bool {
        self.path_for(slug).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Removes the blob. Returns `false` if nothing was stored.
    pub fn delete(&self, slug: &Slug) -> Result<bool> {
        match std::fs::remove_file(self.path_for(slug)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn store_load_delete() {
        let tmp = TempDir::new().unwrap();
        let repo = DocumentRepository::open(tmp.path().join("uploads")).unwrap();
        let slug = Slug::parse("intro-to-cs").unwrap();

        assert!(matches!(repo.load(&slug), Err(Error::NotFound(_))));
        repo.store(&slug, b"%PDF-1.4 bytes").unwrap();
        assert!(repo.exists(&slug));
        assert_eq!(repo.load(&slug).unwrap(), b"%PDF-1.4 bytes");
        assert_eq!(
            repo.path_for(&slug).unwrap(),
            tmp.path().join("uploads").join("intro-to-cs")
        );

        assert!(repo.delete(&slug).unwrap());
        assert!(!repo.delete(&slug).unwrap());
        assert!(!repo.exists(&slug));
    }
}
