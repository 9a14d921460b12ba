// SPDX-FileCopyrightText: 2023 SAP SE or an SAP affiliate company and IronCore contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub mod clock;
pub mod error;
pub mod manager;
pub mod policy;
pub mod runtime;
pub mod stats;
pub mod testing;
pub mod worker;

pub use clock::{Clock, SystemClock};
pub use error::{ImageGcError, RemovalFailure};
pub use manager::{EvictionCandidate, ImageGcManager, ImageRecord};
pub use policy::ImageGcPolicy;
pub use runtime::{Container, Image, Pod, RuntimeService};
pub use stats::{ImageFsStats, ImageFsStatsProvider, StatvfsStatsProvider};
pub use worker::{GcWorker, GcWorkerConfig};

pub const DEFAULT_DETECTION_PERIOD: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_COLLECTION_PERIOD: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CACHE_REFRESH_PERIOD: Duration = Duration::from_secs(30);

/// Fire-and-forget notification emitted while collecting.
/// It must be `Clone` to be sent over a broadcast channel.
#[derive(Debug, Clone)]
pub struct ImageGcEvent {
    pub kind: ImageGcEventKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageGcEventKind {
    ImageFreed,
    FreeDiskSpaceFailed,
    InvalidDiskCapacity,
    ImageGcFailed,
}
