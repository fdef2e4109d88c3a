/*!
# Keepsake Core

Tamper-evident save slots for interactive applications.

This crate captures the state of registered participants, writes it to
per-profile save slots and restores it, with support for:

- Deterministic snapshots keyed by stable participant keys
- Optional gzip compression and AES-256-GCM authenticated encryption
- SHA-256 integrity checks over the exact on-disk body
- Chunked, cancellable async I/O with progress reporting
- Atomic commits: a crash never leaves a half-written save behind
- Rolling autosaves driven by a background task

## Architecture

Transforms and storage are ports with swappable adapters:
- [`Serializer`] turns snapshots into text (JSON by default)
- [`Compressor`] and [`Encryptor`] transform the body bytes
- [`SlotStorage`](storage::SlotStorage) owns the on-disk layout
- [`SaveManager`] composes them into the save and load pipelines

A save file is one plaintext header line (JSON), a `\n` byte and the body.

## Usage

```rust,no_run
use keepsake_core::storage::LocalSlotStorage;
use keepsake_core::{
    FieldReader, FieldWriter, GzipCompressor, LoadOptions, Result, SaveManager, SaveOptions,
    Saveable,
};
use std::sync::{Arc, Mutex};

struct Player {
    level: u32,
}

impl Saveable for Player {
    fn key_override(&self) -> Option<String> {
        Some("Player".to_string())
    }

    fn save_fields(&self, fields: &mut FieldWriter<'_>) -> Result<()> {
        fields.field("level", &self.level)
    }

    fn load_fields(&mut self, fields: &FieldReader<'_>) -> Result<()> {
        fields.read_into("level", &mut self.level)?;
        Ok(())
    }
}

# async fn run() {
let manager = SaveManager::new(LocalSlotStorage::new("saves"))
    .with_compressor(GzipCompressor::new());
manager.register(Arc::new(Mutex::new(Player { level: 12 })));

let options = SaveOptions::new().with_profile("Player1").with_compression(true);
let saved = manager.save(0, &options).await;
println!("{}: {}", saved.pipeline, saved.message);

let loaded = manager.load(0, &LoadOptions::from(&options)).await;
assert!(loaded.status.is_ok());
# }
```
*/

pub mod autosave;
pub mod capture;
pub mod compression;
pub mod config;
pub mod encryption;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod observability;
pub mod options;
pub mod participant;
pub mod results;
pub mod serializer;
pub mod storage;
pub mod stream;

pub use autosave::{autosave_once, rotation_index, AutosaveController, AutosaveOutcome};
pub use capture::{
    apply_all, capture_all, decode_body, ComponentSnapshot, FieldEntry, GeneratedSnapshot,
    SnapshotRegistry,
};
pub use compression::{Compressor, GzipCompressor, NoCompression};
pub use config::{AutosaveConfig, SaveSettings, StreamingConfig};
pub use encryption::{AesGcmEncryptor, Encryptor, InMemoryKeyProvider, KeyProvider, KeyRegistry};
pub use error::{KeepsakeError, Result};
pub use manager::{create_manager_from_settings, SaveManager, SaveObserver};
pub use metadata::{compute_hash, SaveHeader, SlotMetadata};
pub use observability::{init_default_observability, init_observability};
pub use options::{LoadOptions, OperationContext, ProgressSink, SaveOptions};
pub use participant::{
    FieldReader, FieldWriter, KeyContext, KeyStrategy, PathTypeIndexKeys, Saveable,
    SharedSaveable,
};
pub use results::{DeleteResult, LoadResult, ResultStatus, SaveDiagnostics, SaveResult};
pub use serializer::{JsonSerializer, Serializer, SerializerExt};
pub use storage::{LocalSlotStorage, SlotId, SlotStorage};
