/*!
Save participants and stable key resolution.

A participant is any live object registered with the save manager. It lists
its persisted members through a [`FieldWriter`] and restores them through a
[`FieldReader`]. Participants are matched back to captured snapshots by a
stable key: an explicit override, a declared key, or a key derived by a
pluggable [`KeyStrategy`].
*/

use crate::capture::FieldEntry;
use crate::serializer::{Serializer, SerializerExt};
use crate::{KeepsakeError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Access to a participant as `Any`, implemented for every `'static` type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A stateful object whose members are persisted in save files.
///
/// # Example
/// ```rust
/// use keepsake_core::{FieldReader, FieldWriter, Result, Saveable};
///
/// struct Hero {
///     hp: i32,
///     name: String,
/// }
///
/// impl Saveable for Hero {
///     fn key_override(&self) -> Option<String> {
///         Some("Hero".to_string())
///     }
///
///     fn save_fields(&self, fields: &mut FieldWriter<'_>) -> Result<()> {
///         fields.field("hp", &self.hp)?;
///         fields.field("name", &self.name)
///     }
///
///     fn load_fields(&mut self, fields: &FieldReader<'_>) -> Result<()> {
///         fields.read_into("hp", &mut self.hp)?;
///         fields.read_into("name", &mut self.name)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Saveable: AsAny + Send {
    /// Concrete type name, used for derived keys and diagnostics
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Explicit per-instance key; wins over every other key source
    fn key_override(&self) -> Option<String> {
        None
    }

    /// Key declared for the whole type
    fn declared_key(&self) -> Option<&'static str> {
        None
    }

    /// Location of the participant in the host's object graph, used by
    /// derived keys (e.g. "World/Player")
    fn structural_path(&self) -> String {
        String::new()
    }

    /// Write persisted members
    fn save_fields(&self, _fields: &mut FieldWriter<'_>) -> Result<()> {
        Ok(())
    }

    /// Restore persisted members.
    ///
    /// Members must only be assigned through [`FieldReader::read_into`]: the
    /// reader is first run in a validating pass that decodes without
    /// assigning, so a failing load never leaves a participant half-applied.
    fn load_fields(&mut self, _fields: &FieldReader<'_>) -> Result<()> {
        Ok(())
    }

    /// Called before state is captured
    fn before_save(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after state has been applied
    fn after_load(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Participant handle shared between the host and the save manager
pub type SharedSaveable = Arc<Mutex<dyn Saveable>>;

/// Lock a participant, recovering the state if a previous holder panicked.
pub(crate) fn lock_participant(
    participant: &SharedSaveable,
) -> MutexGuard<'_, dyn Saveable + 'static> {
    participant.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collects one serialized entry per persisted member
pub struct FieldWriter<'a> {
    serializer: &'a dyn Serializer,
    entries: Vec<FieldEntry>,
}

impl<'a> FieldWriter<'a> {
    pub(crate) fn new(serializer: &'a dyn Serializer) -> Self {
        Self {
            serializer,
            entries: Vec::new(),
        }
    }

    /// Serialize one member.
    ///
    /// Values the serializer cannot represent fail with
    /// [`KeepsakeError::UnsupportedType`].
    pub fn field<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        let type_name = std::any::type_name::<T>();
        if name.is_empty() || name == crate::capture::DTO_FIELD {
            return Err(KeepsakeError::validation(format!(
                "invalid field name '{name}' on {type_name}"
            )));
        }
        if self.entries.iter().any(|e| e.name == name) {
            return Err(KeepsakeError::validation(format!(
                "field '{name}' written twice"
            )));
        }
        let json_value = self
            .serializer
            .serialize(value)
            .map_err(|e| KeepsakeError::unsupported_type(name, type_name, e.to_string()))?;
        self.entries.push(FieldEntry {
            name: name.to_string(),
            type_name: type_name.to_string(),
            json_value,
        });
        Ok(())
    }

    /// Entries sorted by member name
    pub(crate) fn into_sorted_entries(mut self) -> Vec<FieldEntry> {
        self.entries.sort_by(|a, b| a.name.cmp(&b.name));
        self.entries
    }
}

/// Whether a reader only decodes or also assigns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadMode {
    Validate,
    Commit,
}

/// Reads captured member entries back into a participant
pub struct FieldReader<'a> {
    serializer: &'a dyn Serializer,
    entries: HashMap<&'a str, &'a FieldEntry>,
    mode: ReadMode,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(
        serializer: &'a dyn Serializer,
        entries: &'a [FieldEntry],
        mode: ReadMode,
    ) -> Self {
        Self {
            serializer,
            entries: entries.iter().map(|e| (e.name.as_str(), e)).collect(),
            mode,
        }
    }

    /// Decode the entry named `name` as the member's declared type and assign it.
    ///
    /// Returns `Ok(false)` when the snapshot has no such entry; the member is
    /// left untouched. An entry that cannot be decoded as `T` fails with
    /// [`KeepsakeError::UnsupportedType`].
    pub fn read_into<T: DeserializeOwned>(&self, name: &str, target: &mut T) -> Result<bool> {
        let Some(entry) = self.entries.get(name) else {
            return Ok(false);
        };
        let value: T = self.serializer.deserialize(&entry.json_value).map_err(|e| {
            KeepsakeError::unsupported_type(name, std::any::type_name::<T>(), e.to_string())
        })?;
        if self.mode == ReadMode::Commit {
            *target = value;
        }
        Ok(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names of all captured members
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().copied()
    }
}

/// Inputs available to a derived key
#[derive(Debug, Clone, Copy)]
pub struct KeyContext<'a> {
    pub path: &'a str,
    pub type_name: &'a str,
    /// Position among participants with the same path and type, in
    /// registration order
    pub sibling_index: usize,
}

/// Derives a key for participants that have neither an override nor a
/// declared key
pub trait KeyStrategy: Send + Sync {
    fn derive_key(&self, context: &KeyContext<'_>) -> String;
}

/// Default strategy: `"{path}|{type}|{sibling_index}"`
#[derive(Debug, Clone, Copy, Default)]
pub struct PathTypeIndexKeys;

impl KeyStrategy for PathTypeIndexKeys {
    fn derive_key(&self, context: &KeyContext<'_>) -> String {
        format!(
            "{}|{}|{}",
            context.path, context.type_name, context.sibling_index
        )
    }
}

impl<F> KeyStrategy for F
where
    F: Fn(&KeyContext<'_>) -> String + Send + Sync,
{
    fn derive_key(&self, context: &KeyContext<'_>) -> String {
        self(context)
    }
}

fn non_blank(key: Option<String>) -> Option<String> {
    key.filter(|k| !k.trim().is_empty())
}

/// Resolve the stable key of every participant, in the given order.
///
/// Keys must be unique; a collision fails with [`KeepsakeError::DuplicateKey`].
pub(crate) fn resolve_keys(
    participants: &[SharedSaveable],
    strategy: &dyn KeyStrategy,
) -> Result<Vec<String>> {
    let mut sibling_counts: HashMap<(String, &'static str), usize> = HashMap::new();
    let mut keys = Vec::with_capacity(participants.len());

    for participant in participants {
        let guard = lock_participant(participant);
        let participant: &dyn Saveable = &*guard;
        let type_name = participant.type_name();
        let path = participant.structural_path();

        let counter = sibling_counts.entry((path.clone(), type_name)).or_insert(0);
        let sibling_index = *counter;
        *counter += 1;

        let key = non_blank(participant.key_override())
            .or_else(|| non_blank(participant.declared_key().map(str::to_string)))
            .unwrap_or_else(|| {
                strategy.derive_key(&KeyContext {
                    path: &path,
                    type_name,
                    sibling_index,
                })
            });
        keys.push(key);
    }

    let mut seen = HashSet::with_capacity(keys.len());
    for key in &keys {
        if !seen.insert(key.as_str()) {
            return Err(KeepsakeError::DuplicateKey(key.clone()));
        }
    }
    Ok(keys)
}
