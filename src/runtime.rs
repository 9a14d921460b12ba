// SPDX-FileCopyrightText: 2023 SAP SE or an SAP affiliate company and IronCore contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::ImageGcError;
use async_trait::async_trait;

/// An image as reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub size_bytes: u64,
    /// Pinned images are never eligible for eviction (e.g. the sandbox
    /// image).
    pub pinned: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Container {
    pub id: String,
    /// Human-readable image name. Ignored for identity; may be empty.
    pub image: String,
    /// Runtime-assigned image id this container runs from; may be empty.
    pub image_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct Pod {
    pub id: String,
    pub name: String,
    pub containers: Vec<Container>,
}

/// Read-only view of the container runtime, plus image deletion.
///
/// No ordering is assumed among list results. An id that was just removed
/// successfully must not reappear from `list_images` until re-pulled.
#[async_trait]
pub trait RuntimeService: Send + Sync {
    async fn list_images(&self) -> Result<Vec<Image>, ImageGcError>;

    async fn list_pods(&self) -> Result<Vec<Pod>, ImageGcError>;

    async fn remove_image(&self, image_id: &str) -> Result<(), ImageGcError>;
}
