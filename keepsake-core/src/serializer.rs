/*!
Text serializer abstraction.

`Serializer` is object-safe and works on `serde_json::Value` documents so it
can be injected as `Arc<dyn Serializer>`. Typed `serialize<T>`/`deserialize<T>`
are provided for every serializer through [`SerializerExt`].

JSON supports bare top-level primitives and arrays, so field values and the
snapshot array are written directly with no wrapper types. JSON has no NaN or
infinity; typed serialization rejects them instead of writing `null`.
*/

use crate::Result;
use serde::de::DeserializeOwned;
use serde::{ser, Serialize};
use serde_json::Value;

/// Converts documents to and from a textual representation
pub trait Serializer: Send + Sync {
    /// Name of the textual format (e.g. "json")
    fn format_name(&self) -> &str;

    /// Write a document as text. Output for equal documents must be identical.
    fn write_value(&self, value: &Value) -> Result<String>;

    /// Parse text back into a document
    fn read_value(&self, text: &str) -> Result<Value>;
}

/// Typed helpers available on every [`Serializer`], including trait objects.
pub trait SerializerExt: Serializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        value.serialize(FiniteFloats)?;
        let document = serde_json::to_value(value)?;
        self.write_value(&document)
    }

    fn deserialize<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        let document = self.read_value(text)?;
        Ok(serde_json::from_value(document)?)
    }
}

impl<S: Serializer + ?Sized> SerializerExt for S {}

type Checked = std::result::Result<(), serde_json::Error>;

fn non_finite(value: f64) -> serde_json::Error {
    ser::Error::custom(format!("{value} is not representable in JSON"))
}

/// Walks a value and fails on the first NaN or infinite float.
struct FiniteFloats;

impl ser::Serializer for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _: bool) -> Checked {
        Ok(())
    }

    fn serialize_i8(self, _: i8) -> Checked {
        Ok(())
    }

    fn serialize_i16(self, _: i16) -> Checked {
        Ok(())
    }

    fn serialize_i32(self, _: i32) -> Checked {
        Ok(())
    }

    fn serialize_i64(self, _: i64) -> Checked {
        Ok(())
    }

    fn serialize_i128(self, _: i128) -> Checked {
        Ok(())
    }

    fn serialize_u8(self, _: u8) -> Checked {
        Ok(())
    }

    fn serialize_u16(self, _: u16) -> Checked {
        Ok(())
    }

    fn serialize_u32(self, _: u32) -> Checked {
        Ok(())
    }

    fn serialize_u64(self, _: u64) -> Checked {
        Ok(())
    }

    fn serialize_u128(self, _: u128) -> Checked {
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Checked {
        if v.is_finite() {
            Ok(())
        } else {
            Err(non_finite(f64::from(v)))
        }
    }

    fn serialize_f64(self, v: f64) -> Checked {
        if v.is_finite() {
            Ok(())
        } else {
            Err(non_finite(v))
        }
    }

    fn serialize_char(self, _: char) -> Checked {
        Ok(())
    }

    fn serialize_str(self, _: &str) -> Checked {
        Ok(())
    }

    fn serialize_bytes(self, _: &[u8]) -> Checked {
        Ok(())
    }

    fn serialize_none(self) -> Checked {
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Checked {
        Ok(())
    }

    fn serialize_unit_struct(self, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Checked {
        key.serialize(FiniteFloats)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Checked {
        value
            .serialize(FiniteFloats)
            .map_err(|e| ser::Error::custom(format!("{key}: {e}")))
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Checked {
        value
            .serialize(FiniteFloats)
            .map_err(|e| ser::Error::custom(format!("{key}: {e}")))
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

/// Compact JSON serializer.
///
/// Objects are written with sorted keys, so output is byte-stable for equal
/// documents regardless of how they were built.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn format_name(&self) -> &str {
        "json"
    }

    fn write_value(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn read_value(&self, text: &str) -> Result<Value> {
        Ok(serde_json::from_str(text)?)
    }
}
