/*!
Save manager that orchestrates save, load and delete operations.

The manager composes the injected serializer, transforms and storage into the
end-to-end pipelines:

```text
save: hooks -> capture -> serialize -> [compress] -> [encrypt] -> temp body
      -> checksum -> header + '\n' + body -> atomic commit -> sidecar
load: header line -> body -> checksum -> [decrypt] -> [decompress]
      -> deserialize -> apply -> hooks
```

Stages run strictly in order: the checksum covers the final body bytes and the
encryption tag covers a specific header state. Every error is translated into
a result status at this boundary; nothing is raised to the caller.
*/

use crate::capture::{apply_all, capture_all, decode_body, ComponentSnapshot, SnapshotRegistry};
use crate::compression::{Compressor, GzipCompressor};
use crate::config::{SaveSettings, StreamingConfig};
use crate::encryption::{random_nonce, AesGcmEncryptor, Encryptor, KeyProvider};
use crate::metadata::{compute_hash, SaveHeader, SlotMetadata};
use crate::options::{LoadOptions, OperationContext, SaveOptions};
use crate::participant::{lock_participant, KeyStrategy, PathTypeIndexKeys, Saveable, SharedSaveable};
use crate::results::{
    compression_ratio, pipeline_label, DeleteResult, LoadResult, ResultStatus, SaveDiagnostics,
    SaveResult,
};
use crate::serializer::{JsonSerializer, Serializer, SerializerExt};
use crate::storage::{LocalSlotStorage, SlotEntry, SlotId, SlotStorage};
use crate::stream::{checksum_file, read_body, read_header_line, AtomicFileWriter, ScratchFile};
use crate::{KeepsakeError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::borrow::Cow;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// File written under the storage root with the diagnostics of the last save.
pub const PROFILER_FILE: &str = "save_profiler.json";

/// Lifecycle signals emitted around every save and load.
///
/// All methods default to no-ops.
pub trait SaveObserver: Send + Sync {
    fn before_save(&self, _profile: &str, _slot: SlotId, _options: &SaveOptions) {}

    fn after_save(
        &self,
        _profile: &str,
        _slot: SlotId,
        _result: &SaveResult,
        _diagnostics: Option<&SaveDiagnostics>,
    ) {
    }

    fn before_load(&self, _profile: &str, _slot: SlotId, _options: &LoadOptions) {}

    fn after_load(&self, _profile: &str, _slot: SlotId, _result: &LoadResult) {}
}

/// One async mutex per slot path, dropped once nobody holds or awaits it
#[derive(Default)]
struct SlotLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl SlotLocks {
    async fn acquire(&self, path: &Path) -> SlotLease<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        SlotLease {
            guard: Some(lock.lock_owned().await),
            path: path.to_path_buf(),
            locks: self,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exclusive access to one slot path
struct SlotLease<'a> {
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    path: PathBuf,
    locks: &'a SlotLocks,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the Arc under this map lock, so a count of one is final
        if locks.get(&self.path).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.path);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Run a participant hook on every participant, logging failures and panics.
fn run_hooks<F>(participants: &[SharedSaveable], stage: &'static str, hook: F)
where
    F: Fn(&mut dyn Saveable) -> Result<()>,
{
    for shared in participants {
        let mut guard = lock_participant(shared);
        let participant: &mut dyn Saveable = &mut *guard;
        let type_name = participant.type_name();
        match panic::catch_unwind(AssertUnwindSafe(|| hook(participant))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    participant = type_name,
                    stage,
                    error = %e,
                    "Participant hook failed; continuing"
                );
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(
                    participant = type_name,
                    stage,
                    reason = %reason,
                    "Participant hook panicked; continuing"
                );
            }
        }
    }
}

/// Write `bytes` to `scratch` in chunks, reporting progress over `span`.
async fn write_chunks(
    scratch: &mut ScratchFile,
    bytes: &[u8],
    chunk_size: usize,
    span: Option<(f32, f32)>,
    ctx: &OperationContext,
) -> Result<()> {
    let total = bytes.len().max(1) as f32;
    let mut written = 0usize;
    for piece in bytes.chunks(chunk_size) {
        ctx.ensure_active()?;
        scratch.write(piece).await?;
        written += piece.len();
        if let Some((start, width)) = span {
            ctx.report(start + width * written as f32 / total);
        }
    }
    Ok(())
}

fn decode_b64(value: Option<&str>, what: &str) -> Result<Vec<u8>> {
    let value = value.ok_or_else(|| KeepsakeError::invalid_format(format!("missing {what}")))?;
    BASE64
        .decode(value)
        .map_err(|e| KeepsakeError::invalid_format(format!("malformed {what}: {e}")))
}

/// Main engine for save and load operations
///
/// # Example
/// ```rust,no_run
/// use keepsake_core::{
///     FieldReader, FieldWriter, GzipCompressor, LoadOptions, Result, SaveManager, SaveOptions,
///     Saveable,
/// };
/// use keepsake_core::storage::LocalSlotStorage;
/// use std::sync::{Arc, Mutex};
///
/// struct Hero {
///     hp: i32,
/// }
///
/// impl Saveable for Hero {
///     fn key_override(&self) -> Option<String> {
///         Some("Hero".to_string())
///     }
///
///     fn save_fields(&self, fields: &mut FieldWriter<'_>) -> Result<()> {
///         fields.field("hp", &self.hp)
///     }
///
///     fn load_fields(&mut self, fields: &FieldReader<'_>) -> Result<()> {
///         fields.read_into("hp", &mut self.hp)?;
///         Ok(())
///     }
/// }
///
/// # async fn run() {
/// let manager = SaveManager::new(LocalSlotStorage::new("saves"))
///     .with_compressor(GzipCompressor::new());
/// let hero = Arc::new(Mutex::new(Hero { hp: 10 }));
/// manager.register(hero.clone());
///
/// let saved = manager.save(0, &SaveOptions::new().with_compression(true)).await;
/// assert!(saved.status.is_ok());
///
/// let loaded = manager.load(0, &LoadOptions::new()).await;
/// assert!(loaded.status.is_ok());
/// # }
/// ```
pub struct SaveManager<S: SlotStorage> {
    storage: S,
    serializer: Arc<dyn Serializer>,
    compressor: Option<Arc<dyn Compressor>>,
    encryptor: Option<Arc<dyn Encryptor>>,
    registry: SnapshotRegistry,
    key_strategy: Arc<dyn KeyStrategy>,
    streaming: StreamingConfig,
    observers: Vec<Arc<dyn SaveObserver>>,
    participants: Mutex<Vec<SharedSaveable>>,
    slot_locks: SlotLocks,
    write_profiler: bool,
}

impl<S: SlotStorage> SaveManager<S> {
    /// Manager with JSON serialization and no transforms bound
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            serializer: Arc::new(JsonSerializer::new()),
            compressor: None,
            encryptor: None,
            registry: SnapshotRegistry::new(),
            key_strategy: Arc::new(PathTypeIndexKeys),
            streaming: StreamingConfig::default(),
            observers: Vec::new(),
            participants: Mutex::new(Vec::new()),
            slot_locks: SlotLocks::default(),
            write_profiler: true,
        }
    }

    pub fn with_serializer<T: Serializer + 'static>(mut self, serializer: T) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn with_compressor<C: Compressor + 'static>(mut self, compressor: C) -> Self {
        self.compressor = Some(Arc::new(compressor));
        self
    }

    pub fn with_encryptor<E: Encryptor + 'static>(mut self, encryptor: E) -> Self {
        self.encryptor = Some(Arc::new(encryptor));
        self
    }

    /// Fast-path bindings used by capture and apply
    pub fn with_registry(mut self, registry: SnapshotRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Strategy for participants without an explicit or declared key
    pub fn with_key_strategy<K: KeyStrategy + 'static>(mut self, strategy: K) -> Self {
        self.key_strategy = Arc::new(strategy);
        self
    }

    pub fn with_streaming(mut self, streaming: StreamingConfig) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SaveObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Toggle writing [`PROFILER_FILE`] after each save (on by default)
    pub fn with_profiler(mut self, enabled: bool) -> Self {
        self.write_profiler = enabled;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn streaming(&self) -> StreamingConfig {
        self.streaming
    }

    /// Register a participant; registering the same handle twice is a no-op
    pub fn register(&self, participant: SharedSaveable) {
        let mut participants = self.participants.lock().unwrap_or_else(PoisonError::into_inner);
        if !participants.iter().any(|p| same_participant(p, &participant)) {
            participants.push(participant);
        }
    }

    /// Returns whether the participant was registered
    pub fn unregister(&self, participant: &SharedSaveable) -> bool {
        let mut participants = self.participants.lock().unwrap_or_else(PoisonError::into_inner);
        let before = participants.len();
        participants.retain(|p| !same_participant(p, participant));
        participants.len() != before
    }

    pub fn participant_count(&self) -> usize {
        self.participants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn participants(&self) -> Vec<SharedSaveable> {
        self.participants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Capture the registered participants without writing anything
    pub fn capture(&self) -> Result<Vec<ComponentSnapshot>> {
        capture_all(
            &self.participants(),
            &self.registry,
            self.key_strategy.as_ref(),
            self.serializer.as_ref(),
        )
    }

    /// Save to a manual slot
    pub async fn save(&self, slot: u32, options: &SaveOptions) -> SaveResult {
        self.save_with(SlotId::Manual(slot), options, &OperationContext::default())
            .await
    }

    /// Save to a rolling autosave slot
    pub async fn save_autosave(&self, index: u32, options: &SaveOptions) -> SaveResult {
        self.save_with(SlotId::Autosave(index), options, &OperationContext::default())
            .await
    }

    /// Save with progress reporting and cancellation
    pub async fn save_with(
        &self,
        slot: SlotId,
        options: &SaveOptions,
        ctx: &OperationContext,
    ) -> SaveResult {
        let started = Instant::now();
        let profile = options.profile.as_str();
        for observer in &self.observers {
            observer.before_save(profile, slot, options);
        }

        let (result, diagnostics) = match self.storage.slot_path(profile, slot) {
            Ok(path) => {
                let _guard = self.slot_locks.acquire(&path).await;
                match self.run_save(slot, &path, options, ctx, started).await {
                    Ok((result, diagnostics)) => (result, Some(diagnostics)),
                    Err(e) => {
                        warn!(slot = %slot, profile, error = %e, "Save failed");
                        (SaveResult::failed(&e, path, elapsed_ms(started)), None)
                    }
                }
            }
            Err(e) => {
                warn!(slot = %slot, profile, error = %e, "Save failed");
                (SaveResult::failed(&e, PathBuf::new(), elapsed_ms(started)), None)
            }
        };

        #[cfg(feature = "metrics")]
        let _ = crate::observability::KeepsakeMetrics::global().map(|m| m.record_save(&result));

        for observer in &self.observers {
            observer.after_save(profile, slot, &result, diagnostics.as_ref());
        }
        result
    }

    async fn run_save(
        &self,
        slot: SlotId,
        path: &Path,
        options: &SaveOptions,
        ctx: &OperationContext,
        started: Instant,
    ) -> Result<(SaveResult, SaveDiagnostics)> {
        let serializer = self.serializer.as_ref();
        let participants = self.participants();

        debug!(slot = %slot, participants = participants.len(), "Capturing");
        run_hooks(&participants, "before_save", |p| p.before_save());
        let snapshots = capture_all(
            &participants,
            &self.registry,
            self.key_strategy.as_ref(),
            serializer,
        )?;
        let plain = serializer.serialize(&snapshots)?.into_bytes();
        ctx.ensure_active()?;

        let mut header = SaveHeader::new(options.profile.as_str(), options.app_version.as_str())
            .with_content_type(options.content_type.as_str())
            .with_summary(options.summary.clone())
            .with_playtime(options.playtime_seconds);

        let compressor = if options.use_compression {
            if self.compressor.is_none() {
                warn!(slot = %slot, "Compression requested but no compressor is bound");
            }
            self.compressor.as_deref()
        } else {
            None
        };
        let encryptor = if options.use_encryption {
            if self.encryptor.is_none() {
                warn!(slot = %slot, "Encryption requested but no encryptor is bound");
            }
            self.encryptor.as_deref()
        } else {
            None
        };

        let chunk_size = self.streaming.chunk_size.max(1);
        let large = self.streaming.is_large(plain.len() as u64);
        let profile_dir = self.storage.profile_dir(&options.profile)?;
        let mut scratch = ScratchFile::create_in(&profile_dir).await?;

        match (compressor, encryptor) {
            (_, Some(encryptor)) => {
                let staged: Cow<'_, [u8]> = match compressor {
                    Some(compressor) => {
                        debug!(slot = %slot, algorithm = compressor.name(), "Compressing");
                        header.compress = Some(compressor.name().to_string());
                        Cow::Owned(compressor.compress(&plain)?)
                    }
                    None => Cow::Borrowed(&plain),
                };

                debug!(slot = %slot, algorithm = encryptor.name(), "Encrypting");
                let nonce = random_nonce();
                header.encrypt = Some(encryptor.name().to_string());
                header.nonce_b64 = Some(BASE64.encode(nonce));
                let aad = header.associated_data(serializer)?;
                let (ciphertext, tag) = encryptor.encrypt(&staged, &nonce, &aad)?;
                header.tag_b64 = Some(BASE64.encode(tag));

                let span = large.then_some((0.0, 0.6));
                write_chunks(&mut scratch, &ciphertext, chunk_size, span, ctx).await?;
            }
            (Some(compressor), None) => {
                debug!(slot = %slot, algorithm = compressor.name(), "Compressing (streamed)");
                header.compress = Some(compressor.name().to_string());
                let mut stream = compressor.begin_stream();
                let total = plain.len().max(1) as f32;
                let mut consumed = 0usize;
                for piece in plain.chunks(chunk_size) {
                    ctx.ensure_active()?;
                    let out = stream.write_chunk(piece)?;
                    if !out.is_empty() {
                        scratch.write(&out).await?;
                    }
                    consumed += piece.len();
                    if large {
                        ctx.report(0.6 * consumed as f32 / total);
                    }
                }
                let tail = stream.finish()?;
                scratch.write(&tail).await?;
            }
            (None, None) => {
                let span = large.then_some((0.0, 0.6));
                write_chunks(&mut scratch, &plain, chunk_size, span, ctx).await?;
            }
        }

        let body = scratch.finish().await?;
        let body_len = body.len();

        debug!(slot = %slot, bytes = body_len, "Checksumming");
        header.checksum = checksum_file(body.path(), chunk_size, ctx).await?;
        if large {
            ctx.report(0.7);
        }

        let header_line = header.to_line(serializer)?;
        let mut writer = AtomicFileWriter::create(path).await?;
        writer.write(header_line.as_bytes()).await?;
        writer.write(b"\n").await?;

        let mut source = body.open().await?;
        let mut buffer = vec![0u8; chunk_size];
        let mut copied = 0u64;
        loop {
            ctx.ensure_active()?;
            let read = source.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            writer.write(&buffer[..read]).await?;
            copied += read as u64;
            if large && body_len > 0 {
                ctx.report(0.7 + 0.3 * copied as f32 / body_len as f32);
            }
        }
        drop(source);

        ctx.ensure_active()?;
        let file_bytes = writer.written();
        writer.commit().await?;
        body.discard().await;

        let duration_ms = elapsed_ms(started);
        let pipeline = pipeline_label(header.compress.as_deref(), header.encrypt.as_deref());
        let ratio = compression_ratio(body_len, plain.len() as u64);
        info!(
            slot = %slot,
            profile = %options.profile,
            bytes = body_len,
            duration_ms,
            pipeline = %pipeline,
            "Save committed"
        );

        self.write_sidecar(slot, options, duration_ms, file_bytes).await;
        let diagnostics = SaveDiagnostics {
            duration_ms,
            bytes_written: body_len,
            bytes_read: 0,
            compression_ratio: ratio,
            pipeline: pipeline.clone(),
            recovered_from_backup: false,
        };
        self.write_profile(&diagnostics).await;
        ctx.report(1.0);

        let result = SaveResult {
            status: ResultStatus::Ok,
            message: ResultStatus::Ok.friendly().to_string(),
            path: path.to_path_buf(),
            duration_ms,
            bytes_written: body_len,
            compression_ratio: ratio,
            pipeline,
        };
        Ok((result, diagnostics))
    }

    /// Sidecar metadata is informational; failures are logged only
    async fn write_sidecar(
        &self,
        slot: SlotId,
        options: &SaveOptions,
        duration_ms: u64,
        bytes: u64,
    ) {
        let profile = options.profile.as_str();
        let metadata = match slot {
            SlotId::Manual(n) => {
                SlotMetadata::for_manual(n, profile, duration_ms, options.summary.clone(), bytes)
            }
            SlotId::Autosave(k) => {
                SlotMetadata::for_autosave(k, profile, duration_ms, options.summary.clone(), bytes)
            }
        }
        .with_scene(options.scene.clone().unwrap_or_default());

        let written = async {
            let path = self.storage.meta_path(profile, slot)?;
            let text = self.serializer.serialize(&metadata)?;
            self.storage.write_text(&path, &text).await?;
            Ok::<_, KeepsakeError>(())
        };
        if let Err(e) = written.await {
            warn!(slot = %slot, profile, error = %e, "Failed to write slot metadata");
        }
    }

    async fn write_profile(&self, diagnostics: &SaveDiagnostics) {
        if !self.write_profiler {
            return;
        }
        let path = self.storage.root().join(PROFILER_FILE);
        let written = match self.serializer.serialize(diagnostics) {
            Ok(text) => self.storage.write_text(&path, &text).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "Failed to write save diagnostics");
        }
    }

    /// Load from a manual slot
    pub async fn load(&self, slot: u32, options: &LoadOptions) -> LoadResult {
        self.load_with(SlotId::Manual(slot), options, &OperationContext::default())
            .await
    }

    /// Load from a rolling autosave slot
    pub async fn load_autosave(&self, index: u32, options: &LoadOptions) -> LoadResult {
        self.load_with(SlotId::Autosave(index), options, &OperationContext::default())
            .await
    }

    /// Load with progress reporting and cancellation
    pub async fn load_with(
        &self,
        slot: SlotId,
        options: &LoadOptions,
        ctx: &OperationContext,
    ) -> LoadResult {
        let started = Instant::now();
        let profile = options.profile.as_str();
        for observer in &self.observers {
            observer.before_load(profile, slot, options);
        }

        let resolved = match self.storage.slot_path(profile, slot) {
            Ok(path) => {
                let exists = self.storage.exists(&path).await;
                Ok((path, exists))
            }
            Err(e) => Err(e),
        };
        let result = match resolved {
            Ok((path, false)) => {
                debug!(slot = %slot, profile, "No save at slot");
                LoadResult::not_found(path)
            }
            Ok((path, true)) => {
                let _guard = self.slot_locks.acquire(&path).await;
                match self.run_load(slot, &path, ctx, started).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(slot = %slot, profile, error = %e, "Load failed");
                        LoadResult::failed(&e, path, elapsed_ms(started))
                    }
                }
            }
            Err(e) => {
                warn!(slot = %slot, profile, error = %e, "Load failed");
                LoadResult::failed(&e, PathBuf::new(), elapsed_ms(started))
            }
        };

        #[cfg(feature = "metrics")]
        let _ = crate::observability::KeepsakeMetrics::global().map(|m| m.record_load(&result));

        for observer in &self.observers {
            observer.after_load(profile, slot, &result);
        }
        result
    }

    async fn run_load(
        &self,
        slot: SlotId,
        path: &Path,
        ctx: &OperationContext,
        started: Instant,
    ) -> Result<LoadResult> {
        let serializer = self.serializer.as_ref();
        let chunk_size = self.streaming.chunk_size.max(1);

        let mut file = tokio::fs::File::open(path).await?;
        let large = self.streaming.is_large(file.metadata().await?.len());
        let header_line = read_header_line(&mut file, chunk_size, ctx).await?;
        let header = SaveHeader::from_line(&header_line, serializer)?;
        let body = read_body(&mut file, chunk_size, large, ctx).await?;
        drop(file);
        let bytes_read = body.len() as u64;

        header.verify_checksum(&compute_hash(&body))?;

        let mut payload = body;
        if header.is_encrypted() {
            let name = header.encrypt.as_deref().unwrap_or_default();
            let encryptor = self
                .encryptor
                .as_deref()
                .filter(|e| e.name() == name)
                .ok_or_else(|| {
                    KeepsakeError::MissingTransform(format!("encryptor '{name}' is not bound"))
                })?;
            let nonce = decode_b64(header.nonce_b64.as_deref(), "nonce")?;
            let tag = decode_b64(header.tag_b64.as_deref(), "tag")?;
            let aad = SaveHeader::associated_data_from_line(&header_line, serializer)?;
            debug!(slot = %slot, algorithm = name, "Decrypting");
            payload = encryptor.decrypt(&payload, &nonce, &aad, &tag)?;
        }
        if header.is_compressed() {
            let name = header.compress.as_deref().unwrap_or_default();
            let compressor = self
                .compressor
                .as_deref()
                .filter(|c| c.name() == name)
                .ok_or_else(|| {
                    KeepsakeError::MissingTransform(format!("compressor '{name}' is not bound"))
                })?;
            debug!(slot = %slot, algorithm = name, "Decompressing");
            payload = compressor.decompress(&payload)?;
        }
        ctx.ensure_active()?;

        let snapshots = decode_body(&payload, serializer)?;
        let participants = self.participants();
        let applied = apply_all(
            &participants,
            &snapshots,
            &self.registry,
            self.key_strategy.as_ref(),
            serializer,
        )?;
        run_hooks(&participants, "after_load", |p| p.after_load());

        let duration_ms = elapsed_ms(started);
        info!(
            slot = %slot,
            profile = %header.profile,
            bytes = bytes_read,
            applied,
            duration_ms,
            "Load complete"
        );
        ctx.report(1.0);

        Ok(LoadResult {
            status: ResultStatus::Ok,
            message: ResultStatus::Ok.friendly().to_string(),
            path: path.to_path_buf(),
            duration_ms,
            bytes_read,
            compression_ratio: compression_ratio(bytes_read, payload.len() as u64),
            recovered_from_backup: false,
        })
    }

    /// Delete a manual slot and its sidecar
    pub async fn delete(&self, slot: u32, profile: &str) -> DeleteResult {
        self.delete_slot(SlotId::Manual(slot), profile).await
    }

    /// Delete any slot and its sidecar; a missing slot is not an error
    pub async fn delete_slot(&self, slot: SlotId, profile: &str) -> DeleteResult {
        let path = match self.storage.slot_path(profile, slot) {
            Ok(path) => path,
            Err(e) => return delete_failed(&e, PathBuf::new()),
        };
        let _guard = self.slot_locks.acquire(&path).await;

        let deleted = async {
            let existed = self.storage.delete(&path).await?;
            let meta = self.storage.meta_path(profile, slot)?;
            self.storage.delete(&meta).await?;
            Ok::<_, KeepsakeError>(existed)
        };
        match deleted.await {
            Ok(existed) => {
                debug!(slot = %slot, profile, existed, "Slot deleted");
                DeleteResult {
                    status: ResultStatus::Ok,
                    message: ResultStatus::Ok.friendly().to_string(),
                    path,
                }
            }
            Err(e) => {
                warn!(slot = %slot, profile, error = %e, "Delete failed");
                delete_failed(&e, path)
            }
        }
    }

    /// Slots present for a profile
    pub async fn list_slots(&self, profile: &str) -> Result<Vec<SlotEntry>> {
        self.storage.list_slots(profile).await
    }

    pub async fn list_profiles(&self) -> Result<Vec<String>> {
        self.storage.list_profiles().await
    }

    /// Sidecar metadata of a slot, if it has been written
    pub async fn slot_metadata(
        &self,
        profile: &str,
        slot: SlotId,
    ) -> Result<Option<SlotMetadata>> {
        let path = self.storage.meta_path(profile, slot)?;
        if !self.storage.exists(&path).await {
            return Ok(None);
        }
        let text = self.storage.read_text(&path).await?;
        Ok(Some(self.serializer.deserialize(&text)?))
    }
}

fn delete_failed(error: &KeepsakeError, path: PathBuf) -> DeleteResult {
    DeleteResult {
        status: error.status(),
        message: crate::results::friendly_message(error),
        path,
    }
}

fn same_participant(a: &SharedSaveable, b: &SharedSaveable) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Build a manager over local storage from settings.
///
/// A gzip compressor is always bound. An AES-GCM encryptor is bound when a key
/// provider is supplied; enabling encryption without one is an error.
pub fn create_manager_from_settings(
    settings: &SaveSettings,
    keys: Option<Arc<dyn KeyProvider>>,
) -> Result<SaveManager<LocalSlotStorage>> {
    let settings = settings.effective();
    settings.validate()?;

    let manager = SaveManager::new(LocalSlotStorage::new(&settings.root_folder))
        .with_streaming(settings.streaming())
        .with_compressor(GzipCompressor::new());

    match keys {
        Some(keys) => Ok(manager.with_encryptor(AesGcmEncryptor::new(keys))),
        None if settings.enable_encryption => Err(KeepsakeError::validation(
            "encryption is enabled but no key provider was supplied",
        )),
        None => Ok(manager),
    }
}
