//! Metadata store: the `index.json` mapping slug → [`DocumentRecord`].
//!
//! The whole index is held in memory behind a mutex and rewritten atomically
//! (temp file, fsync, rename) before every mutating call returns. Removed
//! slugs stay in a `retired` list so they are never handed out again; a stale
//! cache entry can therefore never be attributed to a different document.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::DocumentRecord;
use crate::persist::write_atomic;
use crate::slug::Slug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    #[serde(default)]
    syllabi: Vec<DocumentRecord>,
    #[serde(default)]
    retired: Vec<Slug>,
}

impl Index {
    fn position(&self, slug: &Slug) -> Option<usize> {
        self.syllabi.iter().position(|r| &r.slug == slug)
    }

    fn is_taken(&self, slug: &Slug) -> bool {
        self.position(slug).is_some() || self.retired.contains(slug)
    }

    fn next_free(&self, base: &Slug) -> Slug {
        if !self.is_taken(base) {
            return base.clone();
        }
        (2..)
            .map(|n| base.with_suffix(n))
            .find(|candidate| !self.is_taken(candidate))
            .unwrap_or_else(|| base.clone())
    }
}

pub struct MetadataStore {
    path: PathBuf,
    index: Mutex<Index>,
}

impl MetadataStore {
    /// Loads the index at `path`. A missing file is an empty index and is
    /// written out immediately so the layout exists after `open`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let index = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let index = Index::default();
                write_atomic(&path, &serde_json::to_vec_pretty(&index)?)?;
                index
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            index: Mutex::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All live records, oldest upload first.
    pub fn list(&self) -> Vec<DocumentRecord> {
        let mut records = self.lock().syllabi.clone();
        records.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.slug.cmp(&b.slug))
        });
        records
    }

    pub fn get(&self, slug: &Slug) -> Result<DocumentRecord> {
        let index = self.lock();
        index
            .position(slug)
            .map(|i| index.syllabi[i].clone())
            .ok_or_else(|| Error::NotFound(format!("syllabus {}", slug)))
    }

    pub fn contains(&self, slug: &Slug) -> bool {
        self.lock().position(slug).is_some()
    }

    /// True if the slug is live or retired.
    pub fn is_taken(&self, slug: &Slug) -> bool {
        self.lock().is_taken(slug)
    }

    /// First of `base`, `base-2`, `base-3`, … that has never been assigned.
    pub fn next_free_slug(&self, base: &Slug) -> Slug {
        self.lock().next_free(base)
    }

    /// Inserts a new record. Fails with `AlreadyExists` if the slug was ever
    /// assigned; the stored index is left untouched in that case.
    pub fn put(&self, record: DocumentRecord) -> Result<()> {
        let mut index = self.lock();
        if index.is_taken(&record.slug) {
            let suggestion = index.next_free(&record.slug).to_string();
            return Err(Error::AlreadyExists {
                slug: record.slug.to_string(),
                suggestion,
            });
        }

        index.syllabi.push(record);
        if let Err(e) = self.save(&index) {
            index.syllabi.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Removes a record and retires its slug.
    pub fn remove(&self, slug: &Slug) -> Result<DocumentRecord> {
        let mut index = self.lock();
        let pos = index
            .position(slug)
            .ok_or_else(|| Error::NotFound(format!("syllabus {}", slug)))?;

        let record = index.syllabi.remove(pos);
        index.retired.push(slug.clone());
        if let Err(e) = self.save(&index) {
            index.retired.pop();
            index.syllabi.insert(pos, record);
            return Err(e);
        }
        Ok(record)
    }

    /// Removes (and retires) every record for which `keep` returns false.
    pub fn retain(&self, mut keep: impl FnMut(&DocumentRecord) -> bool) -> Result<Vec<Slug>> {
        let mut index = self.lock();
        let (kept, dropped): (Vec<_>, Vec<_>) =
            index.syllabi.iter().cloned().partition(|r| keep(r));
        if dropped.is_empty() {
            return Ok(Vec::new());
        }

        let previous = std::mem::replace(&mut index.syllabi, kept);
        let retired_len = index.retired.len();
        let dropped_slugs: Vec<Slug> = dropped.into_iter().map(|r| r.slug).collect();
        index.retired.extend(dropped_slugs.iter().cloned());
        if let Err(e) = self.save(&index) {
            index.syllabi = previous;
            index.retired.truncate(retired_len);
            return Err(e);
        }
        Ok(dropped_slugs)
    }

    fn save(&self, index: &Index) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(index)?)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Index> {
        // Poisoning cannot leave the on-disk index half-written.
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record(slug: &str, secs: i64) -> DocumentRecord {
        DocumentRecord {
            slug: Slug::parse(slug).unwrap(),
            filename: format!("{}.pdf", slug),
            title: String::new(),
            course_code: String::new(),
            instructor: String::new(),
            quarter: String::new(),
            year: None,
            content_type: "application/pdf".into(),
            uploaded_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn put_get_list_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        {
            let store = MetadataStore::open(&path).unwrap();
            store.put(record("later", 200)).unwrap();
            store.put(record("earlier", 100)).unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        let slugs: Vec<_> = store.list().into_iter().map(|r| r.slug.to_string()).collect();
        assert_eq!(slugs, ["earlier", "later"]);
        assert_eq!(
            store.get(&Slug::parse("later").unwrap()).unwrap().filename,
            "later.pdf"
        );
        assert!(matches!(
            store.get(&Slug::parse("missing").unwrap()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_put_fails_and_keeps_original() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::open(tmp.path().join("index.json")).unwrap();
        store.put(record("intro-to-cs", 1)).unwrap();

        let mut dup = record("intro-to-cs", 2);
        dup.filename = "other.pdf".into();
        match store.put(dup) {
            Err(Error::AlreadyExists { slug, suggestion }) => {
                assert_eq!(slug, "intro-to-cs");
                assert_eq!(suggestion, "intro-to-cs-2");
            }
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
        let kept = store.get(&Slug::parse("intro-to-cs").unwrap()).unwrap();
        assert_eq!(kept.filename, "intro-to-cs.pdf");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn removed_slugs_are_never_reassigned() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        let store = MetadataStore::open(&path).unwrap();
        let slug = Slug::parse("intro-to-cs").unwrap();
        store.put(record("intro-to-cs", 1)).unwrap();
        store.remove(&slug).unwrap();

        assert!(!store.contains(&slug));
        assert!(store.is_taken(&slug));
        assert!(matches!(
            store.put(record("intro-to-cs", 2)),
            Err(Error::AlreadyExists { .. })
        ));
        assert_eq!(store.next_free_slug(&slug).as_str(), "intro-to-cs-2");

        let reopened = MetadataStore::open(&path).unwrap();
        assert!(reopened.is_taken(&slug));
    }

    #[test]
    fn retain_drops_and_retires() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::open(tmp.path().join("index.json")).unwrap();
        store.put(record("a", 1)).unwrap();
        store.put(record("b", 2)).unwrap();

        let dropped = store.retain(|r| r.slug.as_str() == "a").unwrap();
        assert_eq!(dropped, vec![Slug::parse("b").unwrap()]);
        assert_eq!(store.list().len(), 1);
        assert!(store.is_taken(&Slug::parse("b").unwrap()));
        assert!(store.retain(|_| true).unwrap().is_empty());
    }

    #[test]
    fn corrupt_index_is_a_storage_failure() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(MetadataStore::open(&path), Err(Error::Storage(_))));
    }
}
