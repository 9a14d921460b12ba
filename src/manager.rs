// SPDX-FileCopyrightText: 2023 SAP SE or an SAP affiliate company and IronCore contributors
// SPDX-License-Identifier: Apache-2.0

use crate::clock::Clock;
use crate::error::{ImageGcError, RemovalFailure};
use crate::policy::ImageGcPolicy;
use crate::runtime::{Image, RuntimeService};
use crate::stats::ImageFsStatsProvider;
use crate::{ImageGcEvent, ImageGcEventKind};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

/// What the collector remembers about one image between scans.
///
/// `UNIX_EPOCH` acts as the "unset" sentinel for both timestamps: a record
/// first detected at the epoch is treated as known since forever, and a
/// record last used at the epoch has never been observed in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRecord {
    pub first_detected: SystemTime,
    pub last_used: SystemTime,
    pub size_bytes: u64,
    pub pinned: bool,
}

/// One evictable image, snapshotted from the record store.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub id: String,
    pub record: ImageRecord,
}

/// Keeps the image filesystem below the configured high-water mark by
/// evicting images that are neither pinned nor referenced by any running
/// container.
pub struct ImageGcManager {
    runtime: Arc<dyn RuntimeService>,
    stats_provider: Arc<dyn ImageFsStatsProvider>,
    clock: Arc<dyn Clock>,
    policy: ImageGcPolicy,
    image_records: Mutex<HashMap<String, ImageRecord>>,
    image_cache: Mutex<Vec<Image>>,
    events_tx: broadcast::Sender<ImageGcEvent>,
}

impl ImageGcManager {
    pub fn new(
        runtime: Arc<dyn RuntimeService>,
        stats_provider: Arc<dyn ImageFsStatsProvider>,
        clock: Arc<dyn Clock>,
        policy: ImageGcPolicy,
    ) -> Result<Self, ImageGcError> {
        policy.validate()?;
        let (events_tx, _) = broadcast::channel(32);
        Ok(Self {
            runtime,
            stats_provider,
            clock,
            policy,
            image_records: Mutex::new(HashMap::new()),
            image_cache: Mutex::new(Vec::new()),
            events_tx,
        })
    }

    pub fn policy(&self) -> &ImageGcPolicy {
        &self.policy
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ImageGcEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn emit(&self, kind: ImageGcEventKind, message: String) {
        let _ = self.events_tx.send(ImageGcEvent { kind, message });
    }

    /// Reconcile the record store against the runtime's current image list.
    ///
    /// `scan_time` becomes `first_detected` of newly inserted records;
    /// `last_used` of in-use images is stamped from the clock. Returns the
    /// set of image ids referenced by at least one container.
    pub async fn detect_images(
        &self,
        token: &CancellationToken,
        scan_time: SystemTime,
    ) -> Result<HashSet<String>, ImageGcError> {
        if token.is_cancelled() {
            return Err(ImageGcError::Cancelled);
        }
        let now = self.clock.now();

        let pods = self.runtime.list_pods().await?;
        let mut in_use = HashSet::new();
        for pod in &pods {
            for container in &pod.containers {
                if container.image_id.is_empty() {
                    continue;
                }
                debug!(
                    "GcManager: container {} of pod {} keeps image {} in use",
                    container.id, pod.name, container.image_id
                );
                in_use.insert(container.image_id.clone());
            }
        }

        if token.is_cancelled() {
            return Err(ImageGcError::Cancelled);
        }
        let current_images = self.runtime.list_images().await?;
        let current_ids: HashSet<&str> = current_images.iter().map(|img| img.id.as_str()).collect();

        let mut records = self.image_records.lock().await;
        for image in &current_images {
            let record = records.entry(image.id.clone()).or_insert_with(|| {
                debug!("GcManager: image {} is new", image.id);
                ImageRecord {
                    first_detected: scan_time,
                    last_used: UNIX_EPOCH,
                    size_bytes: 0,
                    pinned: false,
                }
            });
            record.size_bytes = image.size_bytes;
            record.pinned = image.pinned;
            if in_use.contains(&image.id) {
                record.last_used = now;
            }
        }
        records.retain(|id, _| {
            let keep = current_ids.contains(id.as_str());
            if !keep {
                debug!("GcManager: image {id} is no longer present; dropping its record");
            }
            keep
        });

        Ok(in_use)
    }

    /// `detect_images` with the scan timestamp taken from the clock.
    pub async fn detect_images_now(
        &self,
        token: &CancellationToken,
    ) -> Result<HashSet<String>, ImageGcError> {
        let scan_time = self.clock.now();
        self.detect_images(token, scan_time).await
    }

    /// Refresh the cached copy of the runtime image list served by
    /// [`Self::image_list`]. Largest images first.
    pub async fn refresh_image_cache(&self, token: &CancellationToken) -> Result<(), ImageGcError> {
        if token.is_cancelled() {
            return Err(ImageGcError::Cancelled);
        }
        let mut images = self.runtime.list_images().await?;
        images.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.id.cmp(&b.id)));
        *self.image_cache.lock().await = images;
        Ok(())
    }

    /// Point-in-time copy of the runtime image list, as of the most recent
    /// cache refresh.
    pub async fn image_list(&self) -> Vec<Image> {
        self.image_cache.lock().await.clone()
    }

    /// Run a detection pass at `free_time` and return every unpinned,
    /// not-in-use image, least recently used first. Ties fall back to the
    /// older `first_detected`, then to the id, so the order is total.
    pub async fn images_in_eviction_order(
        &self,
        token: &CancellationToken,
        free_time: SystemTime,
    ) -> Result<Vec<EvictionCandidate>, ImageGcError> {
        let in_use = self.detect_images(token, free_time).await?;

        let records = self.image_records.lock().await;
        let mut candidates: Vec<EvictionCandidate> = records
            .iter()
            .filter(|(id, record)| {
                if in_use.contains(*id) {
                    debug!("GcManager: image {id} is in use, skipping");
                    return false;
                }
                if record.pinned {
                    debug!("GcManager: image {id} is pinned, skipping");
                    return false;
                }
                true
            })
            .map(|(id, record)| EvictionCandidate {
                id: id.clone(),
                record: *record,
            })
            .collect();
        drop(records);

        candidates.sort_by(|a, b| {
            a.record
                .last_used
                .cmp(&b.record.last_used)
                .then_with(|| a.record.first_detected.cmp(&b.record.first_detected))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(candidates)
    }

    /// Evict every candidate whose `last_used` is older than the policy's
    /// `max_age`, regardless of filesystem fullness. Returns the candidates
    /// that survive, ready for a capacity sweep, plus per-image failures.
    /// A `max_age` of zero disables the sweep.
    pub async fn free_old_images(
        &self,
        token: &CancellationToken,
        candidates: Vec<EvictionCandidate>,
        free_time: SystemTime,
    ) -> Result<(Vec<EvictionCandidate>, Vec<RemovalFailure>), ImageGcError> {
        if self.policy.max_age.is_zero() {
            return Ok((candidates, Vec::new()));
        }

        let mut remaining = Vec::new();
        let mut failures = Vec::new();
        for candidate in candidates {
            if token.is_cancelled() {
                return Err(ImageGcError::Cancelled);
            }
            let unused_for = free_time
                .duration_since(candidate.record.last_used)
                .unwrap_or_default();
            if unused_for <= self.policy.max_age {
                remaining.push(candidate);
                continue;
            }
            info!(
                "GcManager: image {} unused for {}s exceeds the max age of {}s, removing",
                candidate.id,
                unused_for.as_secs(),
                self.policy.max_age.as_secs()
            );
            if let Err(e) = self.free_image(&candidate).await {
                warn!("GcManager: failed to remove image {}: {e}", candidate.id);
                failures.push(RemovalFailure {
                    image_id: candidate.id.clone(),
                    reason: e.to_string(),
                });
                remaining.push(candidate);
            }
        }
        Ok((remaining, failures))
    }

    /// Delete candidates in order until at least `bytes_to_free` bytes are
    /// reclaimed or the sequence runs out. Candidates younger than the
    /// policy's `min_age`, or used since `free_time`, are skipped. Removal
    /// failures never stop the sweep; they are returned alongside the byte
    /// count and the caller decides whether the shortfall matters.
    pub async fn free_space(
        &self,
        token: &CancellationToken,
        bytes_to_free: u64,
        free_time: SystemTime,
        candidates: Vec<EvictionCandidate>,
    ) -> Result<(u64, Vec<RemovalFailure>), ImageGcError> {
        let mut freed: u64 = 0;
        let mut failures = Vec::new();
        for candidate in &candidates {
            if token.is_cancelled() {
                return Err(ImageGcError::Cancelled);
            }
            // Referenced again between detection and this sweep.
            if candidate.record.last_used >= free_time {
                debug!(
                    "GcManager: image {} was used after the sweep began, skipping",
                    candidate.id
                );
                continue;
            }
            let age = free_time
                .duration_since(candidate.record.first_detected)
                .unwrap_or_default();
            if age < self.policy.min_age {
                debug!(
                    "GcManager: image {} is only {}s old, below the min age of {}s, skipping",
                    candidate.id,
                    age.as_secs(),
                    self.policy.min_age.as_secs()
                );
                continue;
            }
            match self.free_image(candidate).await {
                Ok(()) => {
                    freed += candidate.record.size_bytes;
                    if freed >= bytes_to_free {
                        break;
                    }
                }
                Err(e) => {
                    warn!("GcManager: failed to remove image {}: {e}", candidate.id);
                    failures.push(RemovalFailure {
                        image_id: candidate.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok((freed, failures))
    }

    /// Delete one image and drop its record. An image that already vanished
    /// from the runtime counts as deleted.
    async fn free_image(&self, candidate: &EvictionCandidate) -> Result<(), ImageGcError> {
        info!(
            "GcManager: removing image {} to free {} bytes",
            candidate.id, candidate.record.size_bytes
        );
        match self.runtime.remove_image(&candidate.id).await {
            Ok(()) => {}
            Err(ImageGcError::NotFound(_)) => {
                info!("GcManager: image {} already gone from the runtime", candidate.id);
            }
            Err(e) => return Err(e),
        }

        self.image_records.lock().await.remove(&candidate.id);
        self.emit(
            ImageGcEventKind::ImageFreed,
            format!(
                "freed image {} ({} bytes)",
                candidate.id, candidate.record.size_bytes
            ),
        );
        Ok(())
    }

    /// One collection cycle: age sweep first, then a capacity sweep if the
    /// image filesystem is over the high threshold.
    pub async fn garbage_collect(&self, token: &CancellationToken) -> Result<(), ImageGcError> {
        let free_time = self.clock.now();
        let candidates = self.images_in_eviction_order(token, free_time).await?;
        let (candidates, age_failures) = self.free_old_images(token, candidates, free_time).await?;
        if !age_failures.is_empty() {
            return Err(ImageGcError::Removal(age_failures));
        }

        if token.is_cancelled() {
            return Err(ImageGcError::Cancelled);
        }
        let stats = self.stats_provider.image_fs_stats().await?;
        if stats.capacity_bytes == 0 {
            self.emit(
                ImageGcEventKind::InvalidDiskCapacity,
                "invalid capacity 0 on image filesystem".to_string(),
            );
            return Err(ImageGcError::InvalidCapacity);
        }
        let available = stats.available_bytes.min(stats.capacity_bytes);
        let used = stats.capacity_bytes - available;
        let usage_percent = used * 100 / stats.capacity_bytes;
        if usage_percent < self.policy.high_threshold_percent as u64 {
            debug!(
                "GcManager: image filesystem usage {usage_percent}% is below the high threshold {}%",
                self.policy.high_threshold_percent
            );
            return Ok(());
        }

        let target_used = stats.capacity_bytes * self.policy.low_threshold_percent as u64 / 100;
        let bytes_to_free = used - target_used;
        info!(
            "GcManager: usage {usage_percent}% is over the high threshold {}%, trying to free {bytes_to_free} bytes down to {}%",
            self.policy.high_threshold_percent, self.policy.low_threshold_percent
        );

        let (freed, failures) = self
            .free_space(token, bytes_to_free, free_time, candidates)
            .await?;
        if freed < bytes_to_free {
            let err = ImageGcError::Shortfall {
                requested: bytes_to_free,
                freed,
                failures,
            };
            self.emit(ImageGcEventKind::FreeDiskSpaceFailed, err.to_string());
            return Err(err);
        }
        Ok(())
    }

    /// Evict every candidate, ignoring thresholds and age gates.
    pub async fn delete_unused_images(
        &self,
        token: &CancellationToken,
    ) -> Result<(), ImageGcError> {
        info!("GcManager: attempting to delete all unused images");
        let free_time = self.clock.now();
        let candidates = self.images_in_eviction_order(token, free_time).await?;

        let mut failures = Vec::new();
        for candidate in &candidates {
            if token.is_cancelled() {
                return Err(ImageGcError::Cancelled);
            }
            if let Err(e) = self.free_image(candidate).await {
                warn!("GcManager: failed to remove image {}: {e}", candidate.id);
                failures.push(RemovalFailure {
                    image_id: candidate.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
        if !failures.is_empty() {
            return Err(ImageGcError::Removal(failures));
        }
        Ok(())
    }

    // Accessors used for thread-safe testing.

    pub async fn image_records_len(&self) -> usize {
        self.image_records.lock().await.len()
    }

    pub async fn get_image_record(&self, image_id: &str) -> Option<ImageRecord> {
        self.image_records.lock().await.get(image_id).copied()
    }
}
