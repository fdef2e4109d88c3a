/*!
End-to-end integration tests for the Keepsake save pipeline.
These tests drive the save manager against real files in a temp directory.
*/

use keepsake_core::{
    compute_hash, AesGcmEncryptor, FieldReader, FieldWriter, GeneratedSnapshot, GzipCompressor,
    InMemoryKeyProvider, KeyProvider, LoadOptions, LoadResult, LocalSlotStorage, OperationContext,
    Result, ResultStatus, SaveDiagnostics, SaveManager, SaveObserver, SaveOptions, SaveResult,
    Saveable, SlotId, SlotStorage, SnapshotRegistry, StreamingConfig,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Hero {
    hp: i32,
}

impl Saveable for Hero {
    fn key_override(&self) -> Option<String> {
        Some("Hero".to_string())
    }

    fn save_fields(&self, fields: &mut FieldWriter<'_>) -> Result<()> {
        fields.field("hp", &self.hp)
    }

    fn load_fields(&mut self, fields: &FieldReader<'_>) -> Result<()> {
        fields.read_into("hp", &mut self.hp)?;
        Ok(())
    }
}

struct Inventory {
    gold: i32,
}

impl Saveable for Inventory {
    fn key_override(&self) -> Option<String> {
        Some("Inventory".to_string())
    }

    fn save_fields(&self, fields: &mut FieldWriter<'_>) -> Result<()> {
        fields.field("gold", &self.gold)
    }

    fn load_fields(&mut self, fields: &FieldReader<'_>) -> Result<()> {
        fields.read_into("gold", &mut self.gold)?;
        Ok(())
    }
}

/// Large world state, persisted through a generated snapshot
struct World {
    seed: u64,
    tiles: Vec<u16>,
}

#[derive(Serialize, Deserialize)]
struct WorldDto {
    seed: u64,
    tiles: Vec<u16>,
}

impl Saveable for World {
    fn declared_key(&self) -> Option<&'static str> {
        Some("World")
    }
}

impl GeneratedSnapshot for World {
    type Snapshot = WorldDto;

    fn capture_snapshot(&self) -> WorldDto {
        WorldDto {
            seed: self.seed,
            tiles: self.tiles.clone(),
        }
    }

    fn restore_snapshot(&mut self, snapshot: WorldDto) {
        self.seed = snapshot.seed;
        self.tiles = snapshot.tiles;
    }
}

struct Fixture {
    _dir: TempDir,
    root: std::path::PathBuf,
    keys: Arc<dyn KeyProvider>,
    hero: Arc<Mutex<Hero>>,
    inventory: Arc<Mutex<Inventory>>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self {
            root: dir.path().to_path_buf(),
            _dir: dir,
            keys: Arc::new(InMemoryKeyProvider::random()),
            hero: Arc::new(Mutex::new(Hero { hp: 42 })),
            inventory: Arc::new(Mutex::new(Inventory { gold: 1500 })),
        }
    }

    fn manager(&self) -> SaveManager<LocalSlotStorage> {
        let manager = SaveManager::new(LocalSlotStorage::new(&self.root))
            .with_compressor(GzipCompressor::new())
            .with_encryptor(AesGcmEncryptor::new(self.keys.clone()));
        manager.register(self.hero.clone());
        manager.register(self.inventory.clone());
        manager
    }

    fn scramble(&self) {
        self.hero.lock().unwrap().hp = -1;
        self.inventory.lock().unwrap().gold = -1;
    }

    fn state(&self) -> (i32, i32) {
        (self.hero.lock().unwrap().hp, self.inventory.lock().unwrap().gold)
    }
}

/// Split a save file into its header JSON and body bytes
fn split_file(path: &Path) -> (serde_json::Value, Vec<u8>) {
    let bytes = std::fs::read(path).unwrap();
    let newline = bytes.iter().position(|&b| b == b'\n').unwrap();
    let header = serde_json::from_slice(&bytes[..newline]).unwrap();
    (header, bytes[newline + 1..].to_vec())
}

fn write_file(path: &Path, header: &serde_json::Value, body: &[u8]) {
    let mut bytes = serde_json::to_vec(header).unwrap();
    bytes.push(b'\n');
    bytes.extend_from_slice(body);
    std::fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn test_roundtrip_every_pipeline() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    let cases = [
        (false, false, "plain"),
        (true, false, "gzip"),
        (false, true, "aes-gcm"),
        (true, true, "gzip+aes-gcm"),
    ];
    for (slot, (compress, encrypt, pipeline)) in cases.into_iter().enumerate() {
        let options = SaveOptions::new()
            .with_compression(compress)
            .with_encryption(encrypt);
        let saved = manager.save(slot as u32, &options).await;
        assert_eq!(saved.status, ResultStatus::Ok, "{pipeline}: {}", saved.message);
        assert_eq!(saved.pipeline, pipeline);

        fixture.scramble();
        let loaded = manager.load(slot as u32, &LoadOptions::from(&options)).await;
        assert_eq!(loaded.status, ResultStatus::Ok, "{pipeline}: {}", loaded.message);
        assert_eq!(fixture.state(), (42, 1500), "{pipeline}");
        assert!(!loaded.recovered_from_backup);
    }
}

#[tokio::test]
async fn test_plain_save_scenario() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    let saved = manager.save(0, &SaveOptions::new()).await;
    assert!(saved.status.is_ok());

    let (header, body) = split_file(&saved.path);
    assert!(header.get("Compress").is_none());
    assert!(header.get("Encrypt").is_none());
    let checksum = header["Checksum"].as_str().unwrap();
    assert_eq!(checksum.len(), 64);
    assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(checksum, compute_hash(&body));

    let snapshots: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(snapshots[0]["Key"], "Hero");
    assert_eq!(snapshots[1]["Key"], "Inventory");

    fixture.scramble();
    let loaded = manager.load(0, &LoadOptions::new()).await;
    assert!(loaded.status.is_ok());
    assert_eq!(fixture.state(), (42, 1500));
}

#[tokio::test]
async fn test_compressed_save_scenario() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    let plain = manager.save(0, &SaveOptions::new()).await;
    let compressed = manager
        .save(1, &SaveOptions::new().with_compression(true))
        .await;
    assert!(compressed.status.is_ok());

    let (plain_header, plain_body) = split_file(&plain.path);
    let (header, body) = split_file(&compressed.path);
    assert_eq!(header["Compress"], "gzip");
    assert_ne!(body, plain_body);
    assert_ne!(header["Checksum"], plain_header["Checksum"]);

    fixture.scramble();
    let loaded = manager.load(1, &LoadOptions::new()).await;
    assert!(loaded.status.is_ok());
    assert_eq!(fixture.state(), (42, 1500));
}

#[tokio::test]
async fn test_flipped_body_byte_is_corrupt() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    for (slot, compress, encrypt) in [(0, false, false), (1, true, false), (2, true, true)] {
        let options = SaveOptions::new()
            .with_compression(compress)
            .with_encryption(encrypt);
        let saved = manager.save(slot, &options).await;
        let (header, mut body) = split_file(&saved.path);
        let index = rand::thread_rng().gen_range(0..body.len());
        body[index] ^= 0x01;
        write_file(&saved.path, &header, &body);

        fixture.scramble();
        let loaded = manager.load(slot, &LoadOptions::new()).await;
        assert_eq!(loaded.status, ResultStatus::Corrupt);
        assert_eq!(fixture.state(), (-1, -1), "state changed after a corrupt load");
    }
}

#[tokio::test]
async fn test_appended_byte_is_corrupt() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    let saved = manager.save(0, &SaveOptions::new()).await;
    let mut bytes = std::fs::read(&saved.path).unwrap();
    bytes.push(b' ');
    std::fs::write(&saved.path, bytes).unwrap();

    let loaded = manager.load(0, &LoadOptions::new()).await;
    assert_eq!(loaded.status, ResultStatus::Corrupt);
    assert_eq!(loaded.message, "Save data appears to be corrupted.");
}

#[tokio::test]
async fn test_header_edit_breaks_decryption() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    let options = SaveOptions::new().with_encryption(true);
    let saved = manager.save(0, &options).await;
    let (mut header, body) = split_file(&saved.path);
    header["Profile"] = serde_json::Value::from("Mallory");
    // Body is untouched, so the checksum still matches
    write_file(&saved.path, &header, &body);

    fixture.scramble();
    let loaded = manager.load(0, &LoadOptions::new()).await;
    assert_eq!(loaded.status, ResultStatus::Corrupt);
    assert_eq!(
        loaded.message,
        "Decryption failed. The save may be corrupted or the key is invalid."
    );
    assert_eq!(fixture.state(), (-1, -1));
}

#[tokio::test]
async fn test_header_key_changes_are_corrupt() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let saved = manager
        .save(0, &SaveOptions::new().with_encryption(true))
        .await;
    assert!(saved.status.is_ok());
    let (header, body) = split_file(&saved.path);
    assert!(header.get("Summary").is_none());

    let mut injected = header.clone();
    injected["Injected"] = serde_json::Value::from("evil");
    injected.as_object_mut().unwrap().remove("PlaytimeSeconds");

    // Parses to the same header, but the stored bytes differ
    let mut nulled = header.clone();
    nulled["Summary"] = serde_json::Value::Null;

    for tampered in [injected, nulled] {
        write_file(&saved.path, &tampered, &body);
        fixture.scramble();
        let loaded = manager.load(0, &LoadOptions::new()).await;
        assert_eq!(loaded.status, ResultStatus::Corrupt, "{tampered}");
        assert_eq!(fixture.state(), (-1, -1));
    }

    // The untouched header still authenticates
    write_file(&saved.path, &header, &body);
    let loaded = manager.load(0, &LoadOptions::new()).await;
    assert!(loaded.status.is_ok(), "{}", loaded.message);
    assert_eq!(fixture.state(), (42, 1500));
}

#[tokio::test]
async fn test_wrong_key_is_corrupt() {
    let fixture = Fixture::new();
    let saved = fixture
        .manager()
        .save(0, &SaveOptions::new().with_encryption(true))
        .await;
    assert!(saved.status.is_ok());

    let other = SaveManager::new(LocalSlotStorage::new(&fixture.root))
        .with_encryptor(AesGcmEncryptor::new(Arc::new(InMemoryKeyProvider::random())));
    let loaded = other.load(0, &LoadOptions::new()).await;
    assert_eq!(loaded.status, ResultStatus::Corrupt);
}

#[tokio::test]
async fn test_unbound_transform_is_an_error() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    manager
        .save(0, &SaveOptions::new().with_compression(true))
        .await;
    manager
        .save(1, &SaveOptions::new().with_encryption(true))
        .await;

    let bare = SaveManager::new(LocalSlotStorage::new(&fixture.root));
    for slot in [0, 1] {
        let loaded = bare.load(slot, &LoadOptions::new()).await;
        assert_eq!(loaded.status, ResultStatus::Error);
    }

    // A header naming an algorithm nobody provides
    let path = bare.storage().slot_path("Default", SlotId::Manual(0)).unwrap();
    let (mut header, body) = split_file(&path);
    header["Compress"] = serde_json::Value::from("zstd");
    write_file(&path, &header, &body);
    let loaded = manager.load(0, &LoadOptions::new()).await;
    assert_eq!(loaded.status, ResultStatus::Error);
}

#[tokio::test]
async fn test_missing_slot_is_not_found() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let loaded = manager.load(9, &LoadOptions::new()).await;
    assert_eq!(loaded.status, ResultStatus::NotFound);
    assert_eq!(loaded.message, "Save not found.");
    assert!(loaded.path.ends_with("Default/slot_9.keep"));
}

#[tokio::test]
async fn test_unchanged_state_saves_identical_bodies() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    for options in [SaveOptions::new(), SaveOptions::new().with_compression(true)] {
        let first = manager.save(0, &options).await;
        let (_, first_body) = split_file(&first.path);
        let second = manager.save(1, &options).await;
        let (_, second_body) = split_file(&second.path);
        assert_eq!(first_body, second_body);
    }
}

#[tokio::test]
async fn test_registration_order_does_not_matter() {
    let fixture = Fixture::new();
    let forward = fixture.manager();
    let reversed = SaveManager::new(LocalSlotStorage::new(&fixture.root));
    reversed.register(fixture.inventory.clone());
    reversed.register(fixture.hero.clone());

    let a = forward.save(0, &SaveOptions::new()).await;
    let b = reversed.save(1, &SaveOptions::new()).await;
    assert_eq!(split_file(&a.path).1, split_file(&b.path).1);
}

#[tokio::test]
async fn test_streaming_threshold_paths_load_identically() {
    let dir = TempDir::new().unwrap();
    let mut rng = rand::thread_rng();
    let tiles: Vec<u16> = (0..20_000).map(|_| rng.gen()).collect();
    let world = Arc::new(Mutex::new(World {
        seed: 7,
        tiles: tiles.clone(),
    }));
    let keys: Arc<dyn KeyProvider> = Arc::new(InMemoryKeyProvider::random());

    let build = |streaming: StreamingConfig| {
        let manager = SaveManager::new(LocalSlotStorage::new(dir.path()))
            .with_compressor(GzipCompressor::new())
            .with_encryptor(AesGcmEncryptor::new(keys.clone()))
            .with_registry(SnapshotRegistry::new().with::<World>())
            .with_streaming(streaming);
        manager.register(world.clone());
        manager
    };
    let small = build(StreamingConfig::default());
    let large = build(StreamingConfig {
        chunk_size: 4096,
        stream_threshold: 1024,
    });

    for (compress, encrypt) in [(false, false), (true, false), (true, true)] {
        let options = SaveOptions::new()
            .with_compression(compress)
            .with_encryption(encrypt);
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();
        let ctx = OperationContext::new().with_progress(move |p: f32| sink.lock().unwrap().push(p));

        let below = small.save(0, &options).await;
        let above = large.save_with(SlotId::Manual(1), &options, &ctx).await;
        assert!(below.status.is_ok() && above.status.is_ok());
        assert!(progress.lock().unwrap().len() > 2);
        if !compress && !encrypt {
            assert_eq!(split_file(&below.path).1, split_file(&above.path).1);
        }

        for (manager, slot) in [(&small, 1), (&large, 0)] {
            world.lock().unwrap().tiles.clear();
            let loaded = manager.load(slot, &LoadOptions::new()).await;
            assert!(loaded.status.is_ok(), "{}", loaded.message);
            assert_eq!(world.lock().unwrap().tiles, tiles);
        }
    }
}

#[tokio::test]
async fn test_crlf_header_terminator_is_accepted() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let saved = manager
        .save(0, &SaveOptions::new().with_compression(true))
        .await;

    let (header, body) = split_file(&saved.path);
    let mut bytes = serde_json::to_vec(&header).unwrap();
    bytes.extend_from_slice(b"\r\n");
    bytes.extend_from_slice(&body);
    std::fs::write(&saved.path, bytes).unwrap();

    fixture.scramble();
    let loaded = manager.load(0, &LoadOptions::new()).await;
    assert!(loaded.status.is_ok(), "{}", loaded.message);
    assert_eq!(fixture.state(), (42, 1500));
}

#[tokio::test]
async fn test_failed_apply_changes_nothing() {
    struct LoudHero;

    impl Saveable for LoudHero {
        fn key_override(&self) -> Option<String> {
            Some("Hero".to_string())
        }

        fn save_fields(&self, fields: &mut FieldWriter<'_>) -> Result<()> {
            fields.field("hp", "lots")
        }
    }

    let fixture = Fixture::new();
    let writer = SaveManager::new(LocalSlotStorage::new(&fixture.root));
    writer.register(Arc::new(Mutex::new(LoudHero)));
    writer.register(fixture.inventory.clone());
    fixture.inventory.lock().unwrap().gold = 99;
    assert!(writer.save(0, &SaveOptions::new()).await.status.is_ok());

    fixture.scramble();
    let loaded = fixture.manager().load(0, &LoadOptions::new()).await;
    assert_eq!(loaded.status, ResultStatus::Error);
    assert_eq!(fixture.state(), (-1, -1));
}

#[tokio::test]
async fn test_failed_save_keeps_previous_file() {
    struct Broken;

    impl Saveable for Broken {
        fn key_override(&self) -> Option<String> {
            Some("Broken".to_string())
        }

        fn save_fields(&self, fields: &mut FieldWriter<'_>) -> Result<()> {
            let map: std::collections::HashMap<(u8, u8), u8> = [((1, 2), 3)].into();
            fields.field("map", &map)
        }
    }

    let fixture = Fixture::new();
    let manager = fixture.manager();
    let first = manager.save(0, &SaveOptions::new()).await;
    let before = std::fs::read(&first.path).unwrap();

    manager.register(Arc::new(Mutex::new(Broken)));
    let failed = manager.save(0, &SaveOptions::new()).await;
    assert_eq!(failed.status, ResultStatus::Error);
    assert_eq!(std::fs::read(&first.path).unwrap(), before);
}

#[tokio::test]
async fn test_non_finite_float_fails_the_save() {
    struct Runner {
        speed: f64,
    }

    impl Saveable for Runner {
        fn key_override(&self) -> Option<String> {
            Some("Runner".to_string())
        }

        fn save_fields(&self, fields: &mut FieldWriter<'_>) -> Result<()> {
            fields.field("speed", &self.speed)
        }
    }

    let fixture = Fixture::new();
    let manager = fixture.manager();
    let runner = Arc::new(Mutex::new(Runner { speed: 2.5 }));
    manager.register(runner.clone());
    let first = manager.save(0, &SaveOptions::new()).await;
    assert!(first.status.is_ok());
    let before = std::fs::read(&first.path).unwrap();

    runner.lock().unwrap().speed = f64::NAN;
    let failed = manager.save(0, &SaveOptions::new()).await;
    assert_eq!(failed.status, ResultStatus::Error);
    assert_eq!(std::fs::read(&first.path).unwrap(), before);

    fixture.scramble();
    let loaded = manager.load(0, &LoadOptions::new()).await;
    assert!(loaded.status.is_ok(), "{}", loaded.message);
    assert_eq!(fixture.state(), (42, 1500));
}

#[tokio::test]
async fn test_oversized_summary_fails_before_commit() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let first = manager.save(0, &SaveOptions::new()).await;
    let before = std::fs::read(&first.path).unwrap();

    let huge = "a".repeat(2 * 1024 * 1024);
    let failed = manager
        .save(0, &SaveOptions::new().with_summary(huge))
        .await;
    assert_eq!(failed.status, ResultStatus::Error);
    assert_eq!(std::fs::read(&first.path).unwrap(), before);

    let loaded = manager.load(0, &LoadOptions::new()).await;
    assert!(loaded.status.is_ok(), "{}", loaded.message);
}

#[tokio::test]
async fn test_delete_removes_slot_and_sidecar() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let saved = manager.save(3, &SaveOptions::new()).await;
    let meta = manager.storage().meta_path("Default", SlotId::Manual(3)).unwrap();
    assert!(saved.path.exists());
    assert!(meta.exists());

    let deleted = manager.delete(3, "Default").await;
    assert_eq!(deleted.status, ResultStatus::Ok);
    assert!(!saved.path.exists());
    assert!(!meta.exists());

    let loaded = manager.load(3, &LoadOptions::new()).await;
    assert_eq!(loaded.status, ResultStatus::NotFound);
}

#[tokio::test]
async fn test_concurrent_saves_to_one_slot() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let options = SaveOptions::new().with_compression(true);

    let (a, b, c) = tokio::join!(
        manager.save(0, &options),
        manager.save(0, &options),
        manager.save(0, &options),
    );
    assert!(a.status.is_ok() && b.status.is_ok() && c.status.is_ok());

    let entries: Vec<_> = std::fs::read_dir(fixture.root.join("Default"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.iter().all(|name| !name.ends_with(".tmp")), "{entries:?}");

    fixture.scramble();
    assert!(manager.load(0, &LoadOptions::new()).await.status.is_ok());
    assert_eq!(fixture.state(), (42, 1500));
}

#[tokio::test]
async fn test_profiles_are_isolated() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    manager
        .save(0, &SaveOptions::new().with_profile("Alice"))
        .await;
    fixture.hero.lock().unwrap().hp = 7;
    manager.save(0, &SaveOptions::new().with_profile("Bob")).await;

    assert_eq!(manager.list_profiles().await.unwrap(), vec!["Alice", "Bob"]);
    assert_eq!(manager.list_slots("Alice").await.unwrap().len(), 1);

    manager
        .load(0, &LoadOptions::new().with_profile("Alice"))
        .await;
    assert_eq!(fixture.state().0, 42);
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl SaveObserver for Recorder {
    fn before_save(&self, profile: &str, slot: SlotId, _options: &SaveOptions) {
        self.events
            .lock()
            .unwrap()
            .push(format!("before_save {profile} {slot}"));
    }

    fn after_save(
        &self,
        _profile: &str,
        _slot: SlotId,
        result: &SaveResult,
        diagnostics: Option<&SaveDiagnostics>,
    ) {
        let pipeline = diagnostics.map(|d| d.pipeline.clone()).unwrap_or_default();
        self.events
            .lock()
            .unwrap()
            .push(format!("after_save {:?} {pipeline}", result.status));
    }

    fn before_load(&self, _profile: &str, slot: SlotId, _options: &LoadOptions) {
        self.events.lock().unwrap().push(format!("before_load {slot}"));
    }

    fn after_load(&self, _profile: &str, _slot: SlotId, result: &LoadResult) {
        self.events
            .lock()
            .unwrap()
            .push(format!("after_load {:?}", result.status));
    }
}

#[tokio::test]
async fn test_observers_see_every_operation() {
    let fixture = Fixture::new();
    let recorder = Arc::new(Recorder::default());
    let manager = SaveManager::new(LocalSlotStorage::new(&fixture.root))
        .with_compressor(GzipCompressor::new())
        .with_observer(recorder.clone());
    manager.register(fixture.hero.clone());

    manager
        .save(1, &SaveOptions::new().with_compression(true))
        .await;
    manager.load(1, &LoadOptions::new()).await;
    manager.load(2, &LoadOptions::new()).await;

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "before_save Default slot_1",
            "after_save Ok gzip",
            "before_load slot_1",
            "after_load Ok",
            "before_load slot_2",
            "after_load NotFound",
        ]
    );
}
