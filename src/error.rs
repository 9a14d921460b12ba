// SPDX-FileCopyrightText: 2023 SAP SE or an SAP affiliate company and IronCore contributors
// SPDX-License-Identifier: Apache-2.0

/// A single image the runtime refused to delete during a sweep.
#[derive(Debug, Clone, thiserror::Error)]
#[error("removing image {image_id} failed: {reason}")]
pub struct RemovalFailure {
    pub image_id: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ImageGcError {
    #[error("runtime call failed: {0}")]
    Runtime(String),

    #[error("image with ID '{0}' not found")]
    NotFound(String),

    #[error("image filesystem stats unavailable: {0}")]
    Stats(String),

    #[error("invalid capacity 0 on image filesystem")]
    InvalidCapacity,

    #[error("invalid HighThresholdPercent {0}, must be in range [0-100]")]
    InvalidHighThreshold(i32),

    #[error("invalid LowThresholdPercent {0}, must be in range [0-100]")]
    InvalidLowThreshold(i32),

    #[error("LowThresholdPercent {low} can not be higher than HighThresholdPercent {high}")]
    ThresholdOrdering { low: i32, high: i32 },

    #[error("failed to remove {} image(s): {}", .0.len(), summarize(.0))]
    Removal(Vec<RemovalFailure>),

    #[error(
        "failed to garbage collect required amount of images: attempted to free {} bytes, but only freed {} bytes{}",
        .requested,
        .freed,
        summarize_suffix(.failures)
    )]
    Shortfall {
        requested: u64,
        freed: u64,
        failures: Vec<RemovalFailure>,
    },

    #[error("operation cancelled")]
    Cancelled,
}

fn summarize(failures: &[RemovalFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn summarize_suffix(failures: &[RemovalFailure]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(" ({})", summarize(failures))
    }
}
