/*!
Save/load benchmark example for hyperfine performance testing.
*/

use keepsake_core::{
    init_default_observability, AesGcmEncryptor, FieldReader, FieldWriter, GzipCompressor,
    InMemoryKeyProvider, LoadOptions, LocalSlotStorage, Result, SaveManager, SaveOptions,
    Saveable,
};
use std::sync::{Arc, Mutex};
use std::time::Instant;

struct Party {
    members: Vec<String>,
    levels: Vec<u32>,
    gold: u64,
}

impl Saveable for Party {
    fn key_override(&self) -> Option<String> {
        Some("Party".to_string())
    }

    fn save_fields(&self, fields: &mut FieldWriter<'_>) -> Result<()> {
        fields.field("members", &self.members)?;
        fields.field("levels", &self.levels)?;
        fields.field("gold", &self.gold)
    }

    fn load_fields(&mut self, fields: &FieldReader<'_>) -> Result<()> {
        fields.read_into("members", &mut self.members)?;
        fields.read_into("levels", &mut self.levels)?;
        fields.read_into("gold", &mut self.gold)?;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // RUST_LOG=keepsake_core=debug shows the pipeline stages
    let _ = init_default_observability();
    let temp_dir = tempfile::TempDir::new().unwrap();

    let manager = SaveManager::new(LocalSlotStorage::new(temp_dir.path()))
        .with_compressor(GzipCompressor::new())
        .with_encryptor(AesGcmEncryptor::new(Arc::new(InMemoryKeyProvider::random())))
        .with_profiler(false);

    let party = Arc::new(Mutex::new(Party {
        members: (0..5_000).map(|i| format!("adventurer_{i}")).collect(),
        levels: (0..5_000).map(|i| i % 99 + 1).collect(),
        gold: 123_456,
    }));
    manager.register(party.clone());

    let options = SaveOptions::new()
        .with_profile("Benchmark")
        .with_compression(true)
        .with_encryption(true);

    let start = Instant::now();
    let saved = manager.save(0, &options).await;
    party.lock().unwrap().gold = 0;
    let loaded = manager.load(0, &LoadOptions::from(&options)).await;
    let duration = start.elapsed();

    // Verify correctness
    assert!(saved.status.is_ok(), "{}", saved.message);
    assert!(loaded.status.is_ok(), "{}", loaded.message);
    assert_eq!(party.lock().unwrap().gold, 123_456);

    println!("Benchmark operation completed in: {:?}", duration);
    println!("Pipeline: {}", saved.pipeline);
    println!("Body size: {} bytes", saved.bytes_written);
    println!(
        "File size: {} bytes",
        std::fs::metadata(&saved.path).unwrap().len()
    );
    println!(
        "Compression ratio: {:.2}%",
        saved.compression_ratio * 100.0
    );
}
