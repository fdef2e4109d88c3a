/*!
Snapshot capture and apply.

Converts the registered participant set to and from the canonical
[`ComponentSnapshot`] list. Output is deterministic: snapshots are sorted by
stable key and field entries by member name, so unchanged state always
serializes to the same bytes.

Types with a generated fast path register it in a [`SnapshotRegistry`]. Their
state is stored as a single `"__dto"` entry holding one typed document instead
of one entry per member.
*/

use crate::participant::{
    lock_participant, resolve_keys, FieldReader, FieldWriter, KeyStrategy, ReadMode, Saveable,
    SharedSaveable,
};
use crate::serializer::{Serializer, SerializerExt};
use crate::{KeepsakeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Field name of the opaque fast-path entry.
pub const DTO_FIELD: &str = "__dto";

/// One serialized member of a participant
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct FieldEntry {
    pub name: String,
    /// Declared type of the member, or the concrete document type for `__dto`
    #[serde(rename = "Type")]
    pub type_name: String,
    pub json_value: String,
}

/// Captured state of one participant
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ComponentSnapshot {
    pub key: String,
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
}

impl ComponentSnapshot {
    /// The fast-path document, if this snapshot was captured through one
    pub fn dto(&self) -> Option<&FieldEntry> {
        match self.fields.as_slice() {
            [entry] if entry.name == DTO_FIELD => Some(entry),
            _ => None,
        }
    }
}

/// Generated capture/restore binding for a participant type.
///
/// # Example
/// ```rust
/// use keepsake_core::{GeneratedSnapshot, Saveable, SnapshotRegistry};
/// use serde::{Deserialize, Serialize};
///
/// struct Inventory {
///     gold: u32,
/// }
///
/// #[derive(Serialize, Deserialize)]
/// struct InventoryDto {
///     gold: u32,
/// }
///
/// impl Saveable for Inventory {}
///
/// impl GeneratedSnapshot for Inventory {
///     type Snapshot = InventoryDto;
///
///     fn capture_snapshot(&self) -> InventoryDto {
///         InventoryDto { gold: self.gold }
///     }
///
///     fn restore_snapshot(&mut self, snapshot: InventoryDto) {
///         self.gold = snapshot.gold;
///     }
/// }
///
/// let registry = SnapshotRegistry::new().with::<Inventory>();
/// assert!(registry.has_binding::<Inventory>());
/// ```
pub trait GeneratedSnapshot: Saveable + Sized + 'static {
    type Snapshot: Serialize + DeserializeOwned + Send + 'static;

    fn capture_snapshot(&self) -> Self::Snapshot;

    fn restore_snapshot(&mut self, snapshot: Self::Snapshot);
}

type CaptureFn = fn(&dyn Any, &dyn Serializer) -> Result<String>;
type DecodeFn = fn(&str, &dyn Serializer) -> Result<Box<dyn Any + Send>>;
type RestoreFn = fn(&mut dyn Any, Box<dyn Any + Send>) -> Result<()>;

#[derive(Clone, Copy)]
struct Binding {
    snapshot_type: &'static str,
    capture: CaptureFn,
    decode: DecodeFn,
    restore: RestoreFn,
}

fn binding_mismatch<T>() -> KeepsakeError {
    KeepsakeError::validation(format!(
        "fast-path binding invoked on a value that is not {}",
        std::any::type_name::<T>()
    ))
}

fn capture_erased<T: GeneratedSnapshot>(target: &dyn Any, serializer: &dyn Serializer) -> Result<String> {
    let target = target
        .downcast_ref::<T>()
        .ok_or_else(binding_mismatch::<T>)?;
    serializer.serialize(&target.capture_snapshot()).map_err(|e| {
        KeepsakeError::unsupported_type(DTO_FIELD, std::any::type_name::<T::Snapshot>(), e.to_string())
    })
}

fn decode_erased<T: GeneratedSnapshot>(
    text: &str,
    serializer: &dyn Serializer,
) -> Result<Box<dyn Any + Send>> {
    let snapshot: T::Snapshot = serializer.deserialize(text).map_err(|e| {
        KeepsakeError::unsupported_type(DTO_FIELD, std::any::type_name::<T::Snapshot>(), e.to_string())
    })?;
    Ok(Box::new(snapshot))
}

fn restore_erased<T: GeneratedSnapshot>(target: &mut dyn Any, snapshot: Box<dyn Any + Send>) -> Result<()> {
    let target = target
        .downcast_mut::<T>()
        .ok_or_else(binding_mismatch::<T>)?;
    let snapshot = snapshot
        .downcast::<T::Snapshot>()
        .map_err(|_| binding_mismatch::<T::Snapshot>())?;
    target.restore_snapshot(*snapshot);
    Ok(())
}

/// Fast-path bindings keyed by the participant's concrete type.
///
/// Built once in the composition root; lookups are a single map probe per
/// participant.
#[derive(Clone, Default)]
pub struct SnapshotRegistry {
    bindings: HashMap<TypeId, Binding>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the generated snapshot of `T`
    pub fn register<T: GeneratedSnapshot>(&mut self) -> &mut Self {
        self.bindings.insert(
            TypeId::of::<T>(),
            Binding {
                snapshot_type: std::any::type_name::<T::Snapshot>(),
                capture: capture_erased::<T>,
                decode: decode_erased::<T>,
                restore: restore_erased::<T>,
            },
        );
        self
    }

    pub fn with<T: GeneratedSnapshot>(mut self) -> Self {
        self.register::<T>();
        self
    }

    pub fn has_binding<T: 'static>(&self) -> bool {
        self.bindings.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn binding_for(&self, participant: &dyn Saveable) -> Option<Binding> {
        self.bindings.get(&participant.as_any().type_id()).copied()
    }
}

impl std::fmt::Debug for SnapshotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.bindings.values().map(|b| b.snapshot_type).collect();
        types.sort_unstable();
        f.debug_struct("SnapshotRegistry").field("bindings", &types).finish()
    }
}

/// Capture every participant, sorted by stable key.
pub fn capture_all(
    participants: &[SharedSaveable],
    registry: &SnapshotRegistry,
    strategy: &dyn KeyStrategy,
    serializer: &dyn Serializer,
) -> Result<Vec<ComponentSnapshot>> {
    let keys = resolve_keys(participants, strategy)?;
    let mut ordered: Vec<(String, &SharedSaveable)> = keys.into_iter().zip(participants).collect();
    ordered.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut snapshots = Vec::with_capacity(ordered.len());
    for (key, shared) in ordered {
        let guard = lock_participant(shared);
        let participant: &dyn Saveable = &*guard;

        let fields = match registry.binding_for(participant) {
            Some(binding) => vec![FieldEntry {
                name: DTO_FIELD.to_string(),
                type_name: binding.snapshot_type.to_string(),
                json_value: (binding.capture)(participant.as_any(), serializer)?,
            }],
            None => {
                let mut writer = FieldWriter::new(serializer);
                participant.save_fields(&mut writer)?;
                writer.into_sorted_entries()
            }
        };
        snapshots.push(ComponentSnapshot { key, fields });
    }
    Ok(snapshots)
}

enum Planned<'a> {
    Restore {
        target: &'a SharedSaveable,
        binding: Binding,
        snapshot: Box<dyn Any + Send>,
    },
    Fields {
        target: &'a SharedSaveable,
        entries: &'a [FieldEntry],
    },
}

/// Apply captured snapshots to the live participants.
///
/// Snapshots whose key matches no participant are skipped. Every snapshot is
/// decoded before any participant is modified, so a decode failure leaves the
/// whole set untouched. Returns the number of participants restored.
pub fn apply_all(
    participants: &[SharedSaveable],
    snapshots: &[ComponentSnapshot],
    registry: &SnapshotRegistry,
    strategy: &dyn KeyStrategy,
    serializer: &dyn Serializer,
) -> Result<usize> {
    let keys = resolve_keys(participants, strategy)?;
    let by_key: HashMap<&str, &SharedSaveable> =
        keys.iter().map(String::as_str).zip(participants).collect();

    let mut plan = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        let Some(&target) = by_key.get(snapshot.key.as_str()) else {
            tracing::debug!(key = %snapshot.key, "No participant for snapshot, skipping");
            continue;
        };

        let mut guard = lock_participant(target);
        let participant: &mut dyn Saveable = &mut *guard;

        match (registry.binding_for(participant), snapshot.dto()) {
            (Some(binding), Some(dto)) => {
                let decoded = (binding.decode)(&dto.json_value, serializer)?;
                plan.push(Planned::Restore {
                    target,
                    binding,
                    snapshot: decoded,
                });
            }
            _ => {
                let reader = FieldReader::new(serializer, &snapshot.fields, ReadMode::Validate);
                participant.load_fields(&reader)?;
                plan.push(Planned::Fields {
                    target,
                    entries: &snapshot.fields,
                });
            }
        }
    }

    let applied = plan.len();
    for step in plan {
        match step {
            Planned::Restore {
                target,
                binding,
                snapshot,
            } => {
                let mut guard = lock_participant(target);
                let participant: &mut dyn Saveable = &mut *guard;
                (binding.restore)(participant.as_any_mut(), snapshot)?;
            }
            Planned::Fields { target, entries } => {
                let mut guard = lock_participant(target);
                let participant: &mut dyn Saveable = &mut *guard;
                let reader = FieldReader::new(serializer, entries, ReadMode::Commit);
                participant.load_fields(&reader)?;
            }
        }
    }
    Ok(applied)
}

/// Top-level shapes accepted for a decoded body
#[derive(Deserialize)]
#[serde(untagged)]
enum BodyDocument {
    Array(Vec<ComponentSnapshot>),
    Items {
        #[serde(rename = "Items")]
        items: Vec<ComponentSnapshot>,
    },
    Components {
        #[serde(rename = "Components")]
        components: Vec<ComponentSnapshot>,
    },
}

/// Parse a decoded body into snapshots.
///
/// The canonical shape is a bare array; object wrappers with an `Items` or
/// `Components` array are also accepted.
pub fn decode_body(plain: &[u8], serializer: &dyn Serializer) -> Result<Vec<ComponentSnapshot>> {
    let text = std::str::from_utf8(plain)
        .map_err(|e| KeepsakeError::invalid_format(format!("body is not UTF-8: {e}")))?;
    let document: BodyDocument = serializer
        .deserialize(text)
        .map_err(|e| KeepsakeError::invalid_format(format!("malformed snapshot body: {e}")))?;
    Ok(match document {
        BodyDocument::Array(snapshots) => snapshots,
        BodyDocument::Items { items } => items,
        BodyDocument::Components { components } => components,
    })
}
