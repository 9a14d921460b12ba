// SPDX-FileCopyrightText: 2023 SAP SE or an SAP affiliate company and IronCore contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::ImageGcError;
use crate::manager::ImageGcManager;
use crate::{
    ImageGcEventKind, DEFAULT_CACHE_REFRESH_PERIOD, DEFAULT_COLLECTION_PERIOD,
    DEFAULT_DETECTION_PERIOD,
};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct GcWorkerConfig {
    pub detection_period: Duration,
    pub collection_period: Duration,
    pub cache_refresh_period: Duration,
}

impl Default for GcWorkerConfig {
    fn default() -> Self {
        Self {
            detection_period: DEFAULT_DETECTION_PERIOD,
            collection_period: DEFAULT_COLLECTION_PERIOD,
            cache_refresh_period: DEFAULT_CACHE_REFRESH_PERIOD,
        }
    }
}

/// Drives the manager's periodic loops: image detection, image-cache
/// refresh and the collection cycle itself. The enclosing agent spawns
/// `run` once and cancels the token on shutdown.
pub struct GcWorker {
    manager: Arc<ImageGcManager>,
    config: GcWorkerConfig,
}

impl GcWorker {
    pub fn new(manager: Arc<ImageGcManager>, config: GcWorkerConfig) -> Self {
        Self { manager, config }
    }

    pub async fn run(self, token: CancellationToken) {
        info!(
            "GcWorker: starting (detect every {}s, collect every {}s)",
            self.config.detection_period.as_secs(),
            self.config.collection_period.as_secs()
        );

        // The first scan passes the epoch sentinel so that images already
        // on disk at startup are immediately old enough to evict.
        let mut initialized = false;
        match self.manager.detect_images(&token, UNIX_EPOCH).await {
            Ok(_) => initialized = true,
            Err(ImageGcError::Cancelled) => return,
            Err(e) => warn!("GcWorker: initial image detection failed: {e}"),
        }

        let mut detect_ticker = tokio::time::interval(self.config.detection_period);
        let mut collect_ticker = tokio::time::interval(self.config.collection_period);
        let mut cache_ticker = tokio::time::interval(self.config.cache_refresh_period);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("GcWorker: shutting down");
                    break;
                }
                _ = detect_ticker.tick() => {
                    let result = if initialized {
                        self.manager.detect_images_now(&token).await
                    } else {
                        self.manager.detect_images(&token, UNIX_EPOCH).await
                    };
                    match result {
                        Ok(_) => initialized = true,
                        Err(ImageGcError::Cancelled) => break,
                        Err(e) => warn!("GcWorker: image detection failed: {e}"),
                    }
                }
                _ = cache_ticker.tick() => {
                    match self.manager.refresh_image_cache(&token).await {
                        Ok(()) => {}
                        Err(ImageGcError::Cancelled) => break,
                        Err(e) => warn!("GcWorker: image cache refresh failed: {e}"),
                    }
                }
                _ = collect_ticker.tick() => {
                    match self.manager.garbage_collect(&token).await {
                        Ok(()) => {}
                        Err(ImageGcError::Cancelled) => break,
                        Err(e) => {
                            error!("GcWorker: image garbage collection failed: {e}");
                            self.manager.emit(
                                ImageGcEventKind::ImageGcFailed,
                                format!("image garbage collection failed: {e}"),
                            );
                        }
                    }
                }
            }
        }
    }
}
