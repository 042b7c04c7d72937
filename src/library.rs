//! The syllabus library: upload, browse, fetch insights, remove.
//!
//! [`Library`] owns the three stores and is shared (behind an `Arc`) by the
//! HTTP handlers and the CLI commands. All persisted state goes through it so
//! the invariants spanning stores hold in one place:
//!
//! - uploads publish bytes before metadata, so a listed slug always has
//!   retrievable bytes;
//! - removing a document deletes its bytes and purges its cache entries;
//! - slugs are never reassigned.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::cache::{InsightCache, InsightOutcome};
use crate::config::Config;
use crate::documents::DocumentRepository;
use crate::error::{Error, Result};
use crate::extract::{content_type_for_filename, extract_text_bounded, ExtractError};
use crate::generator::{create_generator, InsightGenerator};
use crate::metadata::MetadataStore;
use crate::models::{DocumentRecord, InsightKind, NewDocument};
use crate::slug::Slug;

pub struct Library {
    metadata: MetadataStore,
    documents: Arc<DocumentRepository>,
    cache: InsightCache,
    max_input_chars: usize,
    max_upload_bytes: usize,
    /// Serializes uploads so the collision check, the byte write and the
    /// record write act as one unit.
    upload_lock: Mutex<()>,
}

/// Result of [`Library::prune`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<Slug>,
    pub orphaned_entries: usize,
}

impl Library {
    /// Opens the stores under `storage.root` with the generator selected in
    /// the config.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let generator = create_generator(&config.generation)?;
        Ok(Self::open_with_generator(config, generator)?)
    }

    /// Like [`Library::open`] with an explicit generator.
    pub fn open_with_generator(
        config: &Config,
        generator: Arc<dyn InsightGenerator>,
    ) -> Result<Self> {
        let storage = &config.storage;
        let metadata = MetadataStore::open(storage.index_path())?;
        let documents = Arc::new(DocumentRepository::open(storage.uploads_dir())?);
        let cache = InsightCache::open(
            storage.cache_dir(),
            generator,
            Duration::from_secs(config.generation.timeout_secs),
        )?;

        tracing::debug!(
            index = %metadata.path().display(),
            uploads = %documents.root().display(),
            cache = %cache.dir().display(),
            generator = %cache.generator_name(),
            "library opened"
        );
        Ok(Self {
            metadata,
            documents,
            cache,
            max_input_chars: config.generation.max_input_chars,
            max_upload_bytes: storage.max_upload_bytes,
            upload_lock: Mutex::new(()),
        })
    }

    pub fn list(&self) -> Vec<DocumentRecord> {
        self.metadata.list()
    }

    pub fn get(&self, slug: &Slug) -> Result<DocumentRecord> {
        self.metadata.get(slug)
    }

    /// Raw bytes plus the record they belong to.
    pub fn file(&self, slug: &Slug) -> Result<(DocumentRecord, Vec<u8>)> {
        let record = self.metadata.get(slug)?;
        let bytes = self.documents.load(slug)?;
        Ok((record, bytes))
    }

    pub fn cached_kinds(&self, slug: &Slug) -> Vec<InsightKind> {
        self.cache.cached_kinds(slug)
    }

    /// Stores a new syllabus and returns its record.
    ///
    /// The slug is validated and checked for collisions before anything is
    /// written. Bytes are committed first and the metadata record last; if
    /// the record cannot be written the bytes are removed again.
    pub fn upload(&self, new: NewDocument, bytes: &[u8]) -> Result<DocumentRecord> {
        let content_type = content_type_for_filename(&new.filename).ok_or_else(|| {
            Error::UnsupportedFile(format!(
                "{} (expected .pdf, .docx, .pptx, .txt or .md)",
                new.filename
            ))
        })?;
        if bytes.is_empty() {
            return Err(Error::UnsupportedFile(format!("{} is empty", new.filename)));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(Error::UnsupportedFile(format!(
                "{} is larger than {} bytes",
                new.filename, self.max_upload_bytes
            )));
        }

        let _upload = self
            .upload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slug = match new.slug.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(explicit) => Slug::parse(explicit.trim())?,
            None => Slug::derive(&new.slug_source())?,
        };
        if self.metadata.is_taken(&slug) {
            return Err(Error::AlreadyExists {
                suggestion: self.metadata.next_free_slug(&slug).to_string(),
                slug: slug.to_string(),
            });
        }

        let record = DocumentRecord {
            slug: slug.clone(),
            filename: new.filename,
            title: new.title.trim().to_string(),
            course_code: new.course_code.trim().to_string(),
            instructor: new.instructor.trim().to_string(),
            quarter: new.quarter.trim().to_string(),
            year: new.year,
            content_type: content_type.to_string(),
            uploaded_at: Utc::now(),
        };

        self.documents.store(&slug, bytes)?;
        if let Err(e) = self.metadata.put(record.clone()) {
            if let Err(cleanup) = self.documents.delete(&slug) {
                tracing::warn!(slug = %slug, error = %cleanup, "could not remove orphaned upload");
            }
            return Err(e);
        }

        tracing::info!(slug = %slug, filename = %record.filename, bytes = bytes.len(), "syllabus uploaded");
        Ok(record)
    }

    /// Cached or freshly generated insight for `(slug, kind)`.
    ///
    /// Fails with `NotFound` for unknown slugs without touching the cache or
    /// the generator.
    pub async fn insight(&self, slug: &Slug, kind: InsightKind) -> Result<InsightOutcome> {
        let record = self.metadata.get(slug)?;
        let documents = self.documents.clone();
        let max_chars = self.max_input_chars;

        self.cache
            .get_or_compute(slug, kind, move || {
                extract_off_runtime(documents, record, max_chars)
            })
            .await
    }

    /// Computes every missing insight kind for `slug`, logging failures.
    /// The document is extracted once and the kinds are generated
    /// concurrently. Used after uploads when precompute is enabled.
    pub async fn precompute(&self, slug: &Slug) {
        let missing: Vec<InsightKind> = InsightKind::ALL
            .into_iter()
            .filter(|kind| !self.cache.cached_kinds(slug).contains(kind))
            .collect();
        if missing.is_empty() {
            return;
        }

        let text = match self.metadata.get(slug) {
            Ok(record) => {
                extract_off_runtime(self.documents.clone(), record, self.max_input_chars).await
            }
            Err(e) => Err(e),
        };
        let text: Arc<str> = match text {
            Ok(text) => text.into(),
            Err(e) => {
                tracing::warn!(slug = %slug, error = %e, "precompute skipped");
                return;
            }
        };

        let mut pending: FuturesUnordered<_> = missing
            .into_iter()
            .map(|kind| {
                let text = text.clone();
                async move {
                    let result = self
                        .cache
                        .get_or_compute(slug, kind, move || async move { Ok::<_, Error>(text.to_string()) })
                        .await;
                    (kind, result)
                }
            })
            .collect();

        while let Some((kind, result)) = pending.next().await {
            match result {
                Ok(_) => tracing::debug!(slug = %slug, %kind, "precomputed"),
                Err(e) => tracing::warn!(slug = %slug, %kind, error = %e, "precompute failed"),
            }
        }
    }

    /// Removes a syllabus: metadata (retiring the slug), then bytes, then
    /// cache entries. Cache purging waits for in-flight generations, and
    /// with the bytes gone no new generation can start.
    pub async fn remove(&self, slug: &Slug) -> Result<DocumentRecord> {
        let record = self.metadata.remove(slug)?;
        self.documents.delete(slug)?;
        self.cache.purge(slug).await?;
        tracing::info!(slug = %slug, "syllabus removed");
        Ok(record)
    }

    /// Drops every cached insight for `slug`; they are regenerated on demand.
    pub async fn clear_cache(&self, slug: &Slug) -> Result<usize> {
        self.metadata.get(slug)?;
        self.cache.purge(slug).await
    }

    /// Drops records whose bytes have disappeared and cache entries that
    /// belong to no live record.
    pub async fn prune(&self) -> Result<PruneReport> {
        let removed = self.metadata.retain(|r| self.documents.exists(&r.slug))?;
        for slug in &removed {
            tracing::warn!(slug = %slug, "document bytes missing; record pruned");
            self.cache.purge(slug).await?;
        }

        let live: HashSet<Slug> = self.metadata.list().into_iter().map(|r| r.slug).collect();
        let orphaned_entries = self.cache.sweep_orphans(&live)?;
        if orphaned_entries > 0 {
            tracing::info!(count = orphaned_entries, "removed orphaned cache entries");
        }

        Ok(PruneReport {
            removed,
            orphaned_entries,
        })
    }
}

/// Loads and extracts a document on the blocking pool; PDF and OOXML parsing
/// is CPU-bound.
async fn extract_off_runtime(
    documents: Arc<DocumentRepository>,
    record: DocumentRecord,
    max_chars: usize,
) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let bytes = documents.load(&record.slug)?;
        let text = extract_text_bounded(&bytes, &record.content_type, max_chars)?;
        if text.is_empty() {
            return Err(Error::NoText(record.filename));
        }
        Ok(text)
    })
    .await
    .map_err(|join_err| Error::Extraction(ExtractError::Aborted(join_err.to_string())))?
}
