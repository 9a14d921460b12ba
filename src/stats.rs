// SPDX-FileCopyrightText: 2023 SAP SE or an SAP affiliate company and IronCore contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::ImageGcError;
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFsStats {
    pub available_bytes: u64,
    pub capacity_bytes: u64,
}

/// Capacity and availability of the filesystem backing the image store.
#[async_trait]
pub trait ImageFsStatsProvider: Send + Sync {
    async fn image_fs_stats(&self) -> Result<ImageFsStats, ImageGcError>;
}

/// Production provider reading `statvfs` for the image filesystem mount.
pub struct StatvfsStatsProvider {
    path: PathBuf,
}

impl StatvfsStatsProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ImageFsStatsProvider for StatvfsStatsProvider {
    async fn image_fs_stats(&self) -> Result<ImageFsStats, ImageGcError> {
        let stat = nix::sys::statvfs::statvfs(self.path.as_path()).map_err(|e| {
            ImageGcError::Stats(format!("statvfs on {} failed: {e}", self.path.display()))
        })?;
        let fragment_size = stat.fragment_size() as u64;
        Ok(ImageFsStats {
            available_bytes: stat.blocks_available() as u64 * fragment_size,
            capacity_bytes: stat.blocks() as u64 * fragment_size,
        })
    }
}
