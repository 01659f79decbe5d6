//! Persisted map records.
//!
//! The map editing tools consume this purely as a data-access API; nothing
//! here knows about their UI. A map is a named, ordered list of platform
//! definitions stored as one bincode record. Saving serializes the whole
//! record first and writes it in a single pass, so a concurrent load never
//! observes a partially written file.

use std::io;
use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::objects::PlatformRecord;

/// A named platform list persisted on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    name: String,
    platforms: Vec<PlatformRecord>,
}

impl MapConfig {
    /// Creates an empty map with the given on-disk name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platforms: Vec::new(),
        }
    }

    /// Loads the map stored under `name`.
    ///
    /// A missing file is not an error: it yields an empty map, logged at
    /// info. A corrupt file is logged at warn and also yields an empty map;
    /// no load path fails the caller.
    pub fn load(name: &str) -> Self {
        let path = Self::path_for(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("map '{}' not found, starting empty", name);
                return Self::new(name);
            }
            Err(e) => {
                warn!("failed to read map '{}': {}", name, e);
                return Self::new(name);
            }
        };

        match bincode::deserialize::<MapConfig>(&bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!("map '{}' is corrupt ({}), starting empty", name, e);
                Self::new(name)
            }
        }
    }

    /// Writes the whole record to disk, replacing any previous contents.
    pub fn save(&self) -> io::Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(Self::path_for(&self.name), bytes)?;
        info!("saved map '{}' ({} platforms)", self.name, self.platforms.len());
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platforms(&self) -> &[PlatformRecord] {
        &self.platforms
    }

    pub fn add_platform(&mut self, platform: PlatformRecord) {
        self.platforms.push(platform);
    }

    /// Removes and returns the platform at `index`, if any.
    pub fn remove_platform(&mut self, index: usize) -> Option<PlatformRecord> {
        if index < self.platforms.len() {
            Some(self.platforms.remove(index))
        } else {
            None
        }
    }

    pub fn clear_platforms(&mut self) {
        self.platforms.clear();
    }

    fn path_for(name: &str) -> PathBuf {
        PathBuf::from(format!("{}.map", name))
    }
}
