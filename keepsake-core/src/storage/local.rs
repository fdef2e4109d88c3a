/*!
Local filesystem slot storage.
*/

use super::{validate_profile_name, SlotEntry, SlotId, SlotStorage, SAVE_EXTENSION, META_SUFFIX};
use crate::stream::AtomicFileWriter;
use crate::{KeepsakeError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Slot storage rooted at a local directory
///
/// Directories are created on first write.
///
/// # Example
/// ```rust
/// use keepsake_core::storage::{LocalSlotStorage, SlotId, SlotStorage};
///
/// let storage = LocalSlotStorage::new("/var/games/saves");
/// let path = storage.slot_path("Player1", SlotId::Manual(0))?;
/// assert!(path.ends_with("Player1/slot_0.keep"));
/// # Ok::<(), keepsake_core::KeepsakeError>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalSlotStorage {
    root: PathBuf,
}

impl LocalSlotStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

/// Directory entries, or none when the directory does not exist yet
async fn read_dir_if_present(dir: &Path) -> Result<Option<fs::ReadDir>> {
    match fs::read_dir(dir).await {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SlotStorage for LocalSlotStorage {
    fn root(&self) -> &Path {
        &self.root
    }

    fn profile_dir(&self, profile: &str) -> Result<PathBuf> {
        validate_profile_name(profile)?;
        Ok(self.root.join(profile))
    }

    async fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        let mut writer = AtomicFileWriter::create(path).await?;
        writer.write(text.as_bytes()).await?;
        writer.commit().await?;
        Ok(())
    }

    async fn read_text(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path).await?)
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.is_ok_and(|m| m.is_file())
    }

    async fn delete(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_profile(&self, profile: &str) -> Result<PathBuf> {
        let dir = self.profile_dir(profile)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            KeepsakeError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create directory {}: {e}", dir.display()),
            ))
        })?;
        Ok(dir)
    }

    async fn delete_profile(&self, profile: &str) -> Result<()> {
        let dir = self.profile_dir(profile)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_profiles(&self) -> Result<Vec<String>> {
        let Some(mut entries) = read_dir_if_present(&self.root).await? else {
            return Ok(Vec::new());
        };

        let mut profiles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_profile_name(name).is_ok() {
                    profiles.push(name.to_string());
                }
            }
        }
        profiles.sort();
        Ok(profiles)
    }

    async fn list_slots(&self, profile: &str) -> Result<Vec<SlotEntry>> {
        let dir = self.profile_dir(profile)?;
        let Some(mut entries) = read_dir_if_present(&dir).await? else {
            return Ok(Vec::new());
        };

        let suffix = format!(".{SAVE_EXTENSION}");
        let mut slots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(&suffix)) else {
                continue;
            };
            let Some(slot) = SlotId::from_file_stem(stem) else {
                continue;
            };
            slots.push(SlotEntry {
                slot,
                save_path: entry.path(),
                meta_path: dir.join(format!("{stem}{META_SUFFIX}")),
            });
        }
        slots.sort_by_key(|s| s.slot);
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let storage = LocalSlotStorage::new("/saves");
        assert_eq!(
            storage.slot_path("Player1", SlotId::Manual(2)).unwrap(),
            PathBuf::from("/saves/Player1/slot_2.keep")
        );
        assert_eq!(
            storage.meta_path("Player1", SlotId::Autosave(1)).unwrap(),
            PathBuf::from("/saves/Player1/slot_autosave_1.meta.json")
        );
        assert!(storage.slot_path("../escape", SlotId::Manual(0)).is_err());
    }

    #[tokio::test]
    async fn test_text_roundtrip_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalSlotStorage::new(temp_dir.path());
        let path = storage.meta_path("Player1", SlotId::Manual(0)).unwrap();

        storage.write_text(&path, "{\"Slot\":0}").await.unwrap();
        assert!(storage.exists(&path).await);
        assert_eq!(storage.read_text(&path).await.unwrap(), "{\"Slot\":0}");

        storage.write_text(&path, "{\"Slot\":1}").await.unwrap();
        assert_eq!(storage.read_text(&path).await.unwrap(), "{\"Slot\":1}");

        assert!(storage.delete(&path).await.unwrap());
        assert!(!storage.exists(&path).await);
        assert!(!storage.delete(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_profiles_and_slots() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalSlotStorage::new(temp_dir.path());
        assert!(storage.list_profiles().await.unwrap().is_empty());

        let dir = storage.create_profile("Beta").await.unwrap();
        storage.create_profile("Alpha").await.unwrap();
        assert_eq!(storage.list_profiles().await.unwrap(), vec!["Alpha", "Beta"]);

        std::fs::write(dir.join("slot_autosave_0.keep"), b"x").unwrap();
        std::fs::write(dir.join("slot_10.keep"), b"x").unwrap();
        std::fs::write(dir.join("slot_2.keep"), b"x").unwrap();
        std::fs::write(dir.join("slot_2.meta.json"), b"{}").unwrap();
        std::fs::write(dir.join(".keepsake-abc.tmp"), b"x").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();

        let slots: Vec<_> = storage
            .list_slots("Beta")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.slot)
            .collect();
        assert_eq!(
            slots,
            vec![SlotId::Manual(2), SlotId::Manual(10), SlotId::Autosave(0)]
        );

        storage.delete_profile("Beta").await.unwrap();
        assert_eq!(storage.list_profiles().await.unwrap(), vec!["Alpha"]);
        assert!(storage.list_slots("Beta").await.unwrap().is_empty());
    }
}
