//! Insight cache: cache-or-compute for `(slug, insight kind)` pairs.
//!
//! Each entry is one text file, `<cache dir>/<slug>__<kind>.txt`. Slugs cannot
//! contain `_` (see [`crate::slug`]) so the name is unambiguous. Presence of
//! the file is the only "already computed" signal; entries never expire.
//!
//! # Concurrency
//!
//! A miss either starts a computation for the key or joins the one already
//! running. Every computation owns a `watch` channel registered under its key;
//! requests that arrive while it runs subscribe to that channel and receive
//! its outcome, success or error. The generator therefore runs at most once
//! per key at a time, and a failed attempt costs every waiter one timeout,
//! not one each. Requests arriving after the attempt has finished start a
//! fresh computation. Different keys never wait on each other.
//!
//! The computation runs in its own task. If the requester goes away the task
//! still finishes and publishes its result.
//!
//! # Failure
//!
//! Entries are written with [`write_atomic`], and only after the text
//! provider and the generator both succeeded. A failed attempt leaves no
//! trace on disk.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::generator::{GenerationError, InsightGenerator};
use crate::models::InsightKind;
use crate::persist::write_atomic;
use crate::slug::Slug;

const SEPARATOR: &str = "__";
const EXTENSION: &str = ".txt";

/// Where an insight came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSource {
    Cache,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightOutcome {
    pub text: String,
    pub source: InsightSource,
}

/// Outcome slot of one computation; `None` while it is running.
type Outcome = Option<Result<String>>;

type InFlight = Arc<Mutex<HashMap<String, watch::Receiver<Outcome>>>>;

/// `<slug>__<kind>`, the file stem of a cache entry.
pub fn cache_key(slug: &Slug, kind: InsightKind) -> String {
    format!("{}{}{}", slug, SEPARATOR, kind.key())
}

pub struct InsightCache {
    dir: PathBuf,
    generator: Arc<dyn InsightGenerator>,
    timeout: Duration,
    in_flight: InFlight,
}

enum Flight {
    Cached(String),
    Joined(watch::Receiver<Outcome>),
    Leading(watch::Sender<Outcome>, watch::Receiver<Outcome>),
}

/// Unregisters a computation when its task ends, however it ends.
struct FlightGuard {
    key: String,
    in_flight: InFlight,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

impl InsightCache {
    /// Opens (creating if needed) the cache directory.
    pub fn open(
        dir: impl Into<PathBuf>,
        generator: Arc<dyn InsightGenerator>,
        timeout: Duration,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            generator,
            timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generator_name(&self) -> String {
        self.generator.name()
    }

    pub fn path_for(&self, slug: &Slug, kind: InsightKind) -> PathBuf {
        self.dir.join(format!("{}{}", cache_key(slug, kind), EXTENSION))
    }

    /// Stored text for the key, if any. Never computes.
    pub fn get(&self, slug: &Slug, kind: InsightKind) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(slug, kind)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Kinds that currently have an entry for `slug`.
    pub fn cached_kinds(&self, slug: &Slug) -> Vec<InsightKind> {
        InsightKind::ALL
            .into_iter()
            .filter(|kind| self.path_for(slug, *kind).is_file())
            .collect()
    }

    /// Returns the cached text for `(slug, kind)`, or computes it.
    ///
    /// `text_provider` yields the document's extractable text and is only
    /// invoked on a miss. Its failure, or the generator's, is returned as-is
    /// to this request and to every request that joined the same attempt;
    /// no entry is written. A generator call exceeding the configured
    /// timeout fails with [`Error::GenerationFailed`].
    pub async fn get_or_compute<F, Fut>(
        &self,
        slug: &Slug,
        kind: InsightKind,
        text_provider: F,
    ) -> Result<InsightOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        if let Some(text) = self.get(slug, kind)? {
            return Ok(hit(text));
        }

        let key = cache_key(slug, kind);
        let (mut outcome, source) = match self.join_or_lead(&key, slug, kind)? {
            Flight::Cached(text) => return Ok(hit(text)),
            Flight::Joined(rx) => {
                tracing::debug!(%key, "waiting on in-flight computation");
                (rx, InsightSource::Cache)
            }
            Flight::Leading(tx, rx) => {
                let guard = FlightGuard {
                    key: key.clone(),
                    in_flight: self.in_flight.clone(),
                };
                let path = self.path_for(slug, kind);
                let generator = self.generator.clone();
                let timeout = self.timeout;

                tokio::spawn(async move {
                    let result =
                        compute(&guard.key, kind, &path, generator, timeout, text_provider).await;
                    if let Err(e) = &result {
                        tracing::warn!(key = %guard.key, error = %e, "insight computation failed; nothing cached");
                    }
                    let _ = tx.send(Some(result));
                    drop(guard);
                });
                (rx, InsightSource::Generated)
            }
        };

        let text = wait_for_outcome(&mut outcome).await?;
        Ok(InsightOutcome { text, source })
    }

    /// Under the registry lock: join a running computation, pick up an entry
    /// published since the first check, or register a new computation.
    fn join_or_lead(&self, key: &str, slug: &Slug, kind: InsightKind) -> Result<Flight> {
        let mut in_flight = lock(&self.in_flight);
        if let Some(rx) = in_flight.get(key) {
            return Ok(Flight::Joined(rx.clone()));
        }
        if let Some(text) = self.get(slug, kind)? {
            return Ok(Flight::Cached(text));
        }
        let (tx, rx) = watch::channel(None);
        in_flight.insert(key.to_string(), rx.clone());
        Ok(Flight::Leading(tx, rx))
    }

    /// Waits until no computation for `key` is running.
    async fn settle(&self, key: &str) {
        let running = lock(&self.in_flight).get(key).cloned();
        if let Some(mut rx) = running {
            let _ = rx.wait_for(Option::is_some).await;
        }
    }

    /// Deletes every entry for `slug`. Waits for in-flight computations of
    /// the slug so none can publish after the purge.
    pub async fn purge(&self, slug: &Slug) -> Result<usize> {
        let mut removed = 0;
        for kind in InsightKind::ALL {
            self.settle(&cache_key(slug, kind)).await;
            if remove_if_present(&self.path_for(slug, kind))? {
                removed += 1;
            }
        }

        // Entries for kinds that are no longer recognised.
        for (entry_slug, path) in self.entries()? {
            if entry_slug == slug.as_str() && remove_if_present(&path)? {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(slug = %slug, removed, "purged cached insights");
        }
        Ok(removed)
    }

    /// Deletes entries whose slug is not in `live`. Returns how many went.
    pub fn sweep_orphans(&self, live: &HashSet<Slug>) -> Result<usize> {
        let live: HashSet<&str> = live.iter().map(Slug::as_str).collect();
        let mut removed = 0;
        for (entry_slug, path) in self.entries()? {
            if !live.contains(entry_slug.as_str()) && remove_if_present(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// `(slug, path)` for every entry file in the cache directory.
    fn entries(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(EXTENSION) else {
                continue;
            };
            if let Some((entry_slug, _kind)) = stem.split_once(SEPARATOR) {
                out.push((entry_slug.to_string(), entry.path()));
            }
        }
        Ok(out)
    }
}

/// Cold-miss path: text → generator (bounded) → atomic publish.
async fn compute<F, Fut>(
    key: &str,
    kind: InsightKind,
    path: &Path,
    generator: Arc<dyn InsightGenerator>,
    timeout: Duration,
    text_provider: F,
) -> Result<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let text = text_provider().await?;

    tracing::info!(%key, generator = %generator.name(), chars = text.len(), "generating insight");
    let generated = tokio::time::timeout(timeout, generator.generate(kind, &text))
        .await
        .map_err(|_| GenerationError::new(format!("timed out after {}s", timeout.as_secs_f64())))??;
    if generated.trim().is_empty() {
        return Err(GenerationError::new("empty response").into());
    }

    write_atomic(path, generated.as_bytes())?;
    Ok(generated)
}

async fn wait_for_outcome(rx: &mut watch::Receiver<Outcome>) -> Result<String> {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    };
    outcome.unwrap_or_else(|| {
        Err(Error::GenerationFailed(GenerationError::new(
            "insight task aborted before publishing",
        )))
    })
}

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashMap<String, watch::Receiver<Outcome>>> {
    in_flight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn hit(text: String) -> InsightOutcome {
    InsightOutcome {
        text,
        source: InsightSource::Cache,
    }
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::PlaceholderGenerator;
    use tempfile::TempDir;

    async fn provide(text: &'static str) -> Result<String> {
        Ok(text.to_string())
    }

    fn cache(tmp: &TempDir) -> InsightCache {
        InsightCache::open(
            tmp.path().join("cache"),
            Arc::new(PlaceholderGenerator),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn key_is_slug_then_kind() {
        let slug = Slug::parse("intro-to-cs").unwrap();
        assert_eq!(cache_key(&slug, InsightKind::Summary), "intro-to-cs__summary");
    }

    #[tokio::test]
    async fn purge_only_touches_the_given_slug() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let a = Slug::parse("intro").unwrap();
        let b = Slug::parse("intro-2").unwrap();
        for slug in [&a, &b] {
            cache
                .get_or_compute(slug, InsightKind::Summary, || provide("text"))
                .await
                .unwrap();
        }
        std::fs::write(cache.dir().join("intro__retired-kind.txt"), "old").unwrap();

        assert_eq!(cache.purge(&a).await.unwrap(), 2);
        assert!(cache.get(&a, InsightKind::Summary).unwrap().is_none());
        assert!(cache.get(&b, InsightKind::Summary).unwrap().is_some());
        assert_eq!(cache.cached_kinds(&b), vec![InsightKind::Summary]);
    }

    #[tokio::test]
    async fn sweep_removes_entries_of_unknown_slugs() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let live = Slug::parse("live").unwrap();
        cache
            .get_or_compute(&live, InsightKind::Grading, || provide("t"))
            .await
            .unwrap();
        std::fs::write(cache.dir().join("gone__summary.txt"), "stale").unwrap();
        std::fs::write(cache.dir().join("unrelated.json"), "{}").unwrap();

        let removed = cache.sweep_orphans(&HashSet::from([live.clone()])).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get(&live, InsightKind::Grading).unwrap().is_some());
        assert!(cache.dir().join("unrelated.json").exists());
    }
}
