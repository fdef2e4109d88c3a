/*!
Storage adapters for save slots.

This module defines the storage abstraction (port) the save manager works
against and the local filesystem adapter. Storage owns the on-disk layout: one
directory per profile, one file per slot, and a metadata sidecar next to each
slot file. Body streaming itself goes through [`crate::stream`]; storage
resolves where files live and handles the small text files around them.
*/

pub mod local;

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

pub use local::LocalSlotStorage;

/// Extension of save files.
pub const SAVE_EXTENSION: &str = "keep";

/// Suffix of sidecar metadata files.
pub const META_SUFFIX: &str = ".meta.json";

/// A manual slot or a rolling autosave slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotId {
    Manual(u32),
    Autosave(u32),
}

impl SlotId {
    /// File stem shared by the save file and its sidecar
    pub fn file_stem(&self) -> String {
        match self {
            Self::Manual(n) => format!("slot_{n}"),
            Self::Autosave(k) => format!("slot_autosave_{k}"),
        }
    }

    /// Inverse of [`SlotId::file_stem`]
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let rest = stem.strip_prefix("slot_")?;
        match rest.strip_prefix("autosave_") {
            Some(index) => index.parse().ok().map(Self::Autosave),
            None => rest.parse().ok().map(Self::Manual),
        }
    }

    pub fn is_autosave(&self) -> bool {
        matches!(self, Self::Autosave(_))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// One slot found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub slot: SlotId,
    pub save_path: PathBuf,
    /// Sidecar path; the file may not exist
    pub meta_path: PathBuf,
}

/// Reject profile names that could escape the storage root.
pub fn validate_profile_name(profile: &str) -> Result<()> {
    let invalid = profile.trim().is_empty()
        || profile == "."
        || profile == ".."
        || profile.starts_with('.')
        || profile.contains(['/', '\\', '\0', ':']);
    if invalid {
        return Err(crate::KeepsakeError::validation(format!(
            "invalid profile name '{profile}'"
        )));
    }
    Ok(())
}

/// Storage abstraction for save slots
///
/// Path resolution is pure; everything that touches the filesystem is async
/// so callers on the runtime never block on disk I/O. Implementations must be
/// safe to share between concurrent operations on different slots.
#[async_trait]
pub trait SlotStorage: Send + Sync {
    /// Root directory holding all profiles
    fn root(&self) -> &Path;

    /// Directory of a profile (not created)
    fn profile_dir(&self, profile: &str) -> Result<PathBuf>;

    /// Path of a slot's save file
    fn slot_path(&self, profile: &str, slot: SlotId) -> Result<PathBuf> {
        Ok(self
            .profile_dir(profile)?
            .join(format!("{}.{SAVE_EXTENSION}", slot.file_stem())))
    }

    /// Path of a slot's sidecar metadata
    fn meta_path(&self, profile: &str, slot: SlotId) -> Result<PathBuf> {
        Ok(self
            .profile_dir(profile)?
            .join(format!("{}{META_SUFFIX}", slot.file_stem())))
    }

    /// Atomically replace a small text file
    async fn write_text(&self, path: &Path, text: &str) -> Result<()>;

    async fn read_text(&self, path: &Path) -> Result<String>;

    async fn exists(&self, path: &Path) -> bool;

    /// Delete a file; returns whether it existed
    async fn delete(&self, path: &Path) -> Result<bool>;

    async fn create_profile(&self, profile: &str) -> Result<PathBuf>;

    /// Remove a profile and every slot in it
    async fn delete_profile(&self, profile: &str) -> Result<()>;

    /// Profile names, sorted
    async fn list_profiles(&self) -> Result<Vec<String>>;

    /// Slots of a profile, manual slots first, each group by index
    async fn list_slots(&self, profile: &str) -> Result<Vec<SlotEntry>>;
}

#[async_trait]
impl<T: SlotStorage + ?Sized> SlotStorage for std::sync::Arc<T> {
    fn root(&self) -> &Path {
        (**self).root()
    }

    fn profile_dir(&self, profile: &str) -> Result<PathBuf> {
        (**self).profile_dir(profile)
    }

    fn slot_path(&self, profile: &str, slot: SlotId) -> Result<PathBuf> {
        (**self).slot_path(profile, slot)
    }

    fn meta_path(&self, profile: &str, slot: SlotId) -> Result<PathBuf> {
        (**self).meta_path(profile, slot)
    }

    async fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        (**self).write_text(path, text).await
    }

    async fn read_text(&self, path: &Path) -> Result<String> {
        (**self).read_text(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        (**self).exists(path).await
    }

    async fn delete(&self, path: &Path) -> Result<bool> {
        (**self).delete(path).await
    }

    async fn create_profile(&self, profile: &str) -> Result<PathBuf> {
        (**self).create_profile(profile).await
    }

    async fn delete_profile(&self, profile: &str) -> Result<()> {
        (**self).delete_profile(profile).await
    }

    async fn list_profiles(&self) -> Result<Vec<String>> {
        (**self).list_profiles().await
    }

    async fn list_slots(&self, profile: &str) -> Result<Vec<SlotEntry>> {
        (**self).list_slots(profile).await
    }
}
