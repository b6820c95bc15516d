use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;

use crate::services::sink::LocalKind;

/// A time-boxed record in the local test store. There is at most one
/// live entry per key; re-uploading a key replaces the entry and bumps
/// its generation so a previously scheduled eviction cannot remove the
/// newer data.
#[derive(Debug, Clone)]
pub struct EphemeralEntry {
    pub storage_path: PathBuf,
    pub content_type: String,
    pub expires_at: Instant,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Eviction {
    at: Instant,
    generation: u64,
    key: String,
}

impl Ord for Eviction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at
            .cmp(&other.at)
            .then(self.generation.cmp(&other.generation))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for Eviction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Self-expiring key/value store backing the local upload sink.
///
/// Entries live in a concurrent map; a single eviction worker owns a
/// min-heap of (expiry, generation, key) and removes entries when they
/// fall due. Reads also evict lazily, so expired entries are invisible
/// even before the worker gets to them.
pub struct EphemeralStore {
    root: PathBuf,
    ttl: Duration,
    entries: DashMap<String, EphemeralEntry>,
    queue: Mutex<BinaryHeap<Reverse<Eviction>>>,
    notify: Notify,
    generation: AtomicU64,
}

impl EphemeralStore {
    pub fn new(root: PathBuf, ttl: Duration) -> Result<Self> {
        for kind in [LocalKind::Original, LocalKind::Preview] {
            std::fs::create_dir_all(root.join(kind.as_str()))
                .with_context(|| format!("creating local store dir under {:?}", root))?;
        }
        Ok(Self {
            root,
            ttl,
            entries: DashMap::new(),
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            generation: AtomicU64::new(0),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn map_key(kind: LocalKind, key: &str) -> String {
        format!("{}/{}", kind.as_str(), key)
    }

    /// Copy `source` into the store under (kind, key), replacing any
    /// live entry and resetting the expiry to now + TTL.
    ///
    /// Each generation gets its own on-disk file, so an eviction of an
    /// overwritten generation can never delete the replacement's bytes.
    pub async fn put(
        &self,
        kind: LocalKind,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let storage_path = self
            .root
            .join(kind.as_str())
            .join(format!("{}-{}", generation, key));
        tokio::fs::copy(source, &storage_path)
            .await
            .with_context(|| format!("copying into local store at {:?}", storage_path))?;

        let expires_at = Instant::now() + self.ttl;
        let map_key = Self::map_key(kind, key);

        let replaced = self.entries.insert(
            map_key.clone(),
            EphemeralEntry {
                storage_path,
                content_type: content_type.to_string(),
                expires_at,
                generation,
            },
        );
        if let Some(old) = replaced {
            let _ = tokio::fs::remove_file(&old.storage_path).await;
        }

        self.queue.lock().unwrap().push(Reverse(Eviction {
            at: expires_at,
            generation,
            key: map_key,
        }));
        self.notify.notify_one();

        tracing::debug!(
            "Local store: recorded {}/{} (expires in {:?})",
            kind.as_str(),
            key,
            self.ttl
        );
        Ok(())
    }

    /// Fetch a live entry. Expired entries are evicted on read and
    /// reported as absent, indistinguishable from never-stored keys.
    pub fn get(&self, kind: LocalKind, key: &str) -> Option<(PathBuf, String)> {
        let map_key = Self::map_key(kind, key);
        let entry = self.entries.get(&map_key)?.clone();

        if Instant::now() >= entry.expires_at {
            // Only remove the generation that was read as expired; a
            // concurrent re-upload may have replaced it already.
            let removed = self
                .entries
                .remove_if(&map_key, |_, e| e.generation == entry.generation);
            if let Some((_, removed)) = removed {
                tokio::spawn(async move {
                    let _ = tokio::fs::remove_file(removed.storage_path).await;
                });
                tracing::debug!("Local store: lazily evicted expired entry {}", map_key);
            }
            return None;
        }

        Some((entry.storage_path, entry.content_type))
    }

    /// Eviction worker: sleeps until the earliest scheduled expiry and
    /// removes the entry, unless the key has been overwritten since
    /// (generation mismatch) in which case the stale timer is dropped.
    pub async fn run_eviction(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = self.queue.lock().unwrap().peek().map(|Reverse(e)| e.clone());

            match next {
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Some(eviction) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(eviction.at) => {
                            // The heap may have changed while sleeping;
                            // act on the item actually popped, and only
                            // if it is due.
                            let due = {
                                let mut queue = self.queue.lock().unwrap();
                                match queue.pop() {
                                    Some(Reverse(e)) if e.at <= Instant::now() => Some(e),
                                    Some(e) => {
                                        queue.push(e);
                                        None
                                    }
                                    None => None,
                                }
                            };
                            if let Some(due) = due {
                                self.evict_if_current(&due).await;
                            }
                        }
                        // A new entry may have an earlier deadline.
                        _ = self.notify.notified() => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        tracing::info!("Local store eviction worker stopped.");
    }

    async fn evict_if_current(&self, eviction: &Eviction) {
        let removed = self
            .entries
            .remove_if(&eviction.key, |_, entry| {
                entry.generation == eviction.generation
            });

        if let Some((key, entry)) = removed {
            let _ = tokio::fs::remove_file(&entry.storage_path).await;
            tracing::debug!("Local store: evicted {}", key);
        }
    }
}
