// SPDX-FileCopyrightText: 2023 SAP SE or an SAP affiliate company and IronCore contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::ImageGcError;
use std::time::Duration;

/// Thresholds and age gates driving image eviction. Immutable for the life
/// of the manager.
#[derive(Debug, Clone)]
pub struct ImageGcPolicy {
    /// Image filesystem fullness (percent) above which a collection is
    /// triggered.
    pub high_threshold_percent: i32,
    /// Target fullness (percent) a collection tries to reach.
    pub low_threshold_percent: i32,
    /// Minimum age since first detection before an image may be evicted for
    /// capacity reasons.
    pub min_age: Duration,
    /// Images unused for longer than this are evicted regardless of
    /// fullness. Zero disables the age sweep.
    pub max_age: Duration,
}

impl Default for ImageGcPolicy {
    fn default() -> Self {
        Self {
            high_threshold_percent: 85,
            low_threshold_percent: 80,
            min_age: Duration::from_secs(2 * 60),
            max_age: Duration::ZERO,
        }
    }
}

impl ImageGcPolicy {
    pub fn validate(&self) -> Result<(), ImageGcError> {
        if !(0..=100).contains(&self.high_threshold_percent) {
            return Err(ImageGcError::InvalidHighThreshold(
                self.high_threshold_percent,
            ));
        }
        if !(0..=100).contains(&self.low_threshold_percent) {
            return Err(ImageGcError::InvalidLowThreshold(self.low_threshold_percent));
        }
        if self.low_threshold_percent > self.high_threshold_percent {
            return Err(ImageGcError::ThresholdOrdering {
                low: self.low_threshold_percent,
                high: self.high_threshold_percent,
            });
        }
        Ok(())
    }
}
