// SPDX-FileCopyrightText: 2023 SAP SE or an SAP affiliate company and IronCore contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory doubles for the collector's collaborators, used by the test
//! suites to drive deterministic scenarios.

use crate::clock::Clock;
use crate::error::ImageGcError;
use crate::runtime::{Image, Pod, RuntimeService};
use crate::stats::{ImageFsStats, ImageFsStatsProvider};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[derive(Default)]
struct FakeRuntimeState {
    images: Vec<Image>,
    pods: Vec<Pod>,
    removed: Vec<String>,
    failing_removals: HashSet<String>,
    list_error: Option<String>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeRuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_images(&self, images: Vec<Image>) {
        self.state.lock().unwrap().images = images;
    }

    pub fn set_pods(&self, pods: Vec<Pod>) {
        self.state.lock().unwrap().pods = pods;
    }

    /// Make `remove_image` fail for the given id until cleared.
    pub fn fail_removal_of(&self, image_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_removals
            .insert(image_id.to_string());
    }

    /// Make both list calls fail with the given message.
    pub fn set_list_error(&self, message: &str) {
        self.state.lock().unwrap().list_error = Some(message.to_string());
    }

    pub fn image_list(&self) -> Vec<Image> {
        self.state.lock().unwrap().images.clone()
    }

    /// Ids passed to successful `remove_image` calls, in call order.
    pub fn removed_images(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }
}

#[async_trait]
impl RuntimeService for FakeRuntime {
    async fn list_images(&self) -> Result<Vec<Image>, ImageGcError> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.list_error {
            return Err(ImageGcError::Runtime(message.clone()));
        }
        Ok(state.images.clone())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, ImageGcError> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.list_error {
            return Err(ImageGcError::Runtime(message.clone()));
        }
        Ok(state.pods.clone())
    }

    async fn remove_image(&self, image_id: &str) -> Result<(), ImageGcError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_removals.contains(image_id) {
            return Err(ImageGcError::Runtime(format!(
                "injected removal failure for {image_id}"
            )));
        }
        // Only the first matching entry goes away, mirroring a runtime that
        // lists duplicate entries for one id.
        match state.images.iter().position(|img| img.id == image_id) {
            Some(index) => {
                state.images.remove(index);
                state.removed.push(image_id.to_string());
                Ok(())
            }
            None => Err(ImageGcError::NotFound(image_id.to_string())),
        }
    }
}

pub struct FakeStatsProvider {
    state: Mutex<Result<ImageFsStats, String>>,
}

impl FakeStatsProvider {
    pub fn new(available_bytes: u64, capacity_bytes: u64) -> Self {
        Self {
            state: Mutex::new(Ok(ImageFsStats {
                available_bytes,
                capacity_bytes,
            })),
        }
    }

    pub fn set_stats(&self, available_bytes: u64, capacity_bytes: u64) {
        *self.state.lock().unwrap() = Ok(ImageFsStats {
            available_bytes,
            capacity_bytes,
        });
    }

    pub fn set_error(&self, message: &str) {
        *self.state.lock().unwrap() = Err(message.to_string());
    }
}

#[async_trait]
impl ImageFsStatsProvider for FakeStatsProvider {
    async fn image_fs_stats(&self) -> Result<ImageFsStats, ImageGcError> {
        self.state
            .lock()
            .unwrap()
            .clone()
            .map_err(ImageGcError::Stats)
    }
}

/// Clock that only moves when the test says so.
pub struct FakeClock {
    now: Mutex<SystemTime>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn step(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }

    pub fn set(&self, to: SystemTime) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}
