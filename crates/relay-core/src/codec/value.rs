//! Encode/decode traits and the dynamic [`Value`] type.
//!
//! Tagged values (`WireEncode`/`WireDecode`) are written with their type tag.
//! Array elements (`ElementEncode`/`ElementDecode`) are written bare because
//! the array header already names the element type.

use super::reader::DataBlockReader;
use super::tag::WireType;
use super::writer::DataBlockWriter;
use crate::{RelayError, Result};
use bytes::{BufMut, BytesMut};

/// A value that can be appended to a data block with its type tag.
pub trait WireEncode {
    fn encode(&self, buf: &mut BytesMut);
}

/// A value that can be read back from a data block.
pub trait WireDecode: Sized {
    fn decode(reader: &mut DataBlockReader) -> Result<Self>;
}

/// A value that can appear as an array element.
pub trait ElementEncode {
    const ELEMENT: WireType;
    fn encode_element(&self, buf: &mut BytesMut);
}

pub trait ElementDecode: Sized {
    const ELEMENT: WireType;
    fn decode_element(reader: &mut DataBlockReader) -> Result<Self>;
}

/// Complex number, encoded as two consecutive doubles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// Length and count fields are 32-bit on the wire. Oversized blocks are
/// rejected when framed, so saturating here never reaches a peer.
pub(crate) fn wire_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

impl ElementEncode for u8 {
    const ELEMENT: WireType = WireType::Byte;
    fn encode_element(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }
}

impl ElementDecode for u8 {
    const ELEMENT: WireType = WireType::Byte;
    fn decode_element(reader: &mut DataBlockReader) -> Result<Self> {
        reader.raw_u8(WireType::Byte)
    }
}

impl ElementEncode for i32 {
    const ELEMENT: WireType = WireType::Integer;
    fn encode_element(&self, buf: &mut BytesMut) {
        buf.put_i32_le(*self);
    }
}

impl ElementDecode for i32 {
    const ELEMENT: WireType = WireType::Integer;
    fn decode_element(reader: &mut DataBlockReader) -> Result<Self> {
        reader.raw_i32(WireType::Integer)
    }
}

impl ElementEncode for f64 {
    const ELEMENT: WireType = WireType::Double;
    fn encode_element(&self, buf: &mut BytesMut) {
        buf.put_f64_le(*self);
    }
}

impl ElementDecode for f64 {
    const ELEMENT: WireType = WireType::Double;
    fn decode_element(reader: &mut DataBlockReader) -> Result<Self> {
        reader.raw_f64(WireType::Double)
    }
}

impl ElementEncode for bool {
    const ELEMENT: WireType = WireType::Boolean;
    fn encode_element(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl ElementDecode for bool {
    const ELEMENT: WireType = WireType::Boolean;
    fn decode_element(reader: &mut DataBlockReader) -> Result<Self> {
        Ok(reader.raw_u8(WireType::Boolean)? != 0)
    }
}

impl ElementEncode for Complex {
    const ELEMENT: WireType = WireType::Complex;
    fn encode_element(&self, buf: &mut BytesMut) {
        buf.put_f64_le(self.re);
        buf.put_f64_le(self.im);
    }
}

impl ElementDecode for Complex {
    const ELEMENT: WireType = WireType::Complex;
    fn decode_element(reader: &mut DataBlockReader) -> Result<Self> {
        let re = reader.raw_f64(WireType::Complex)?;
        let im = reader.raw_f64(WireType::Complex)?;
        Ok(Complex { re, im })
    }
}

impl ElementEncode for str {
    const ELEMENT: WireType = WireType::String;
    fn encode_element(&self, buf: &mut BytesMut) {
        buf.put_i32_le(wire_len(self.len()));
        buf.put_slice(self.as_bytes());
    }
}

impl ElementEncode for String {
    const ELEMENT: WireType = WireType::String;
    fn encode_element(&self, buf: &mut BytesMut) {
        self.as_str().encode_element(buf);
    }
}

impl ElementDecode for String {
    const ELEMENT: WireType = WireType::String;
    fn decode_element(reader: &mut DataBlockReader) -> Result<Self> {
        reader.raw_string()
    }
}

impl ElementEncode for DataBlockWriter {
    const ELEMENT: WireType = WireType::List;
    fn encode_element(&self, buf: &mut BytesMut) {
        buf.put_i32_le(wire_len(self.item_count()));
        buf.put_slice(self.as_bytes());
    }
}

impl ElementDecode for DataBlockReader {
    const ELEMENT: WireType = WireType::List;
    fn decode_element(reader: &mut DataBlockReader) -> Result<Self> {
        reader.raw_list_body()
    }
}

macro_rules! tagged_codec {
    ($($ty:ty),* $(,)?) => {$(
        impl WireEncode for $ty {
            fn encode(&self, buf: &mut BytesMut) {
                buf.put_u8(<$ty as ElementEncode>::ELEMENT.to_byte());
                self.encode_element(buf);
            }
        }
    )*};
}

macro_rules! tagged_decode {
    ($($ty:ty),* $(,)?) => {$(
        impl WireDecode for $ty {
            fn decode(reader: &mut DataBlockReader) -> Result<Self> {
                reader.expect_tag(<$ty as ElementDecode>::ELEMENT)?;
                <$ty as ElementDecode>::decode_element(reader)
            }
        }
    )*};
}

tagged_codec!(u8, i32, f64, bool, Complex, str, String, DataBlockWriter);
tagged_decode!(u8, i32, f64, bool, Complex, String, DataBlockReader);

impl<T: ElementEncode> WireEncode for [T] {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(WireType::Array.to_byte());
        buf.put_u8(T::ELEMENT.to_byte());
        buf.put_i32_le(1);
        buf.put_i32_le(wire_len(self.len()));
        for item in self {
            item.encode_element(buf);
        }
    }
}

impl<T: ElementEncode> WireEncode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_slice().encode(buf);
    }
}

impl<T: ElementDecode> WireDecode for Vec<T> {
    fn decode(reader: &mut DataBlockReader) -> Result<Self> {
        let sizes = reader.array_header_for(T::ELEMENT, 1)?;
        let mut items = Vec::with_capacity(sizes[0].min(reader.remaining()));
        for _ in 0..sizes[0] {
            items.push(T::decode_element(reader)?);
        }
        Ok(items)
    }
}

/// Array payload of a dynamic [`Value`]. Items are stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub element: WireType,
    pub dimensions: Vec<usize>,
    pub items: Vec<Value>,
}

/// A self-describing value, decoded without knowing its type in advance.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Integer(i32),
    Double(f64),
    Boolean(bool),
    String(String),
    Complex(Complex),
    List(Vec<Value>),
    Array(ArrayValue),
}

impl Value {
    pub fn wire_type(&self) -> WireType {
        match self {
            Value::Byte(_) => WireType::Byte,
            Value::Integer(_) => WireType::Integer,
            Value::Double(_) => WireType::Double,
            Value::Boolean(_) => WireType::Boolean,
            Value::String(_) => WireType::String,
            Value::Complex(_) => WireType::Complex,
            Value::List(_) => WireType::List,
            Value::Array(_) => WireType::Array,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Append this value with its tag.
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Value::List(items) => {
                buf.put_u8(WireType::List.to_byte());
                buf.put_i32_le(wire_len(items.len()));
                for item in items {
                    item.encode_into(buf)?;
                }
            }
            Value::Array(array) => {
                validate_array(array)?;
                buf.put_u8(WireType::Array.to_byte());
                buf.put_u8(array.element.to_byte());
                buf.put_i32_le(wire_len(array.dimensions.len()));
                for size in &array.dimensions {
                    buf.put_i32_le(wire_len(*size));
                }
                for item in &array.items {
                    item.encode_element_into(array.element, buf)?;
                }
            }
            scalar => {
                buf.put_u8(scalar.wire_type().to_byte());
                scalar.encode_element_into(scalar.wire_type(), buf)?;
            }
        }
        Ok(())
    }

    fn encode_element_into(&self, element: WireType, buf: &mut BytesMut) -> Result<()> {
        if self.wire_type() != element {
            return Err(RelayError::type_mismatch(format!(
                "encountered {} required {}",
                self.wire_type(),
                element
            )));
        }
        match self {
            Value::Byte(v) => v.encode_element(buf),
            Value::Integer(v) => v.encode_element(buf),
            Value::Double(v) => v.encode_element(buf),
            Value::Boolean(v) => v.encode_element(buf),
            Value::String(v) => v.encode_element(buf),
            Value::Complex(v) => v.encode_element(buf),
            Value::List(items) => {
                buf.put_i32_le(wire_len(items.len()));
                for item in items {
                    item.encode_into(buf)?;
                }
            }
            Value::Array(_) => {
                return Err(RelayError::unsupported_type(
                    "arrays of arrays are not supported",
                ))
            }
        }
        Ok(())
    }

    /// Decode one bare array element of the given type.
    pub(crate) fn decode_element(reader: &mut DataBlockReader, element: WireType) -> Result<Self> {
        Ok(match element {
            WireType::Byte => Value::Byte(u8::decode_element(reader)?),
            WireType::Integer => Value::Integer(i32::decode_element(reader)?),
            WireType::Double => Value::Double(f64::decode_element(reader)?),
            WireType::Boolean => Value::Boolean(bool::decode_element(reader)?),
            WireType::String => Value::String(String::decode_element(reader)?),
            WireType::Complex => Value::Complex(Complex::decode_element(reader)?),
            WireType::List => Value::List(reader.raw_list_body()?.values()?),
            WireType::Array | WireType::Terminator => {
                return Err(RelayError::unsupported_type(
                    "arrays of arrays are not supported",
                ))
            }
        })
    }
}

fn validate_array(array: &ArrayValue) -> Result<()> {
    if !(1..=2).contains(&array.dimensions.len()) {
        return Err(RelayError::unsupported_type(
            "1 and 2 dimension arrays supported only",
        ));
    }
    if matches!(array.element, WireType::Array | WireType::Terminator) {
        return Err(RelayError::unsupported_type(
            "arrays of arrays are not supported",
        ));
    }
    let count = array
        .dimensions
        .iter()
        .try_fold(1usize, |acc, size| acc.checked_mul(*size))
        .ok_or_else(|| RelayError::unsupported_type("array too large"))?;
    if count != array.items.len() {
        return Err(RelayError::type_mismatch(format!(
            "array declares {} items but holds {}",
            count,
            array.items.len()
        )));
    }
    Ok(())
}

impl WireDecode for Value {
    fn decode(reader: &mut DataBlockReader) -> Result<Self> {
        reader.get_value()
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Complex> for Value {
    fn from(v: Complex) -> Self {
        Value::Complex(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_list_round_trip() {
        let value = Value::List(vec![
            Value::from(7),
            Value::from("seven"),
            Value::List(vec![Value::from(true), Value::from(Complex::new(1.0, -1.0))]),
        ]);
        let mut writer = DataBlockWriter::new();
        writer.add_value(&value).unwrap();

        let mut reader = writer.reader();
        assert_eq!(reader.get_value().unwrap(), value);
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_dynamic_2d_array_round_trip() {
        let value = Value::Array(ArrayValue {
            element: WireType::Double,
            dimensions: vec![2, 3],
            items: (0..6).map(|i| Value::Double(f64::from(i) / 2.0)).collect(),
        });
        let mut writer = DataBlockWriter::new();
        writer.add_value(&value).unwrap();
        assert_eq!(writer.reader().get_value().unwrap(), value);
    }

    #[test]
    fn test_three_dimensional_value_is_unsupported() {
        let value = Value::Array(ArrayValue {
            element: WireType::Integer,
            dimensions: vec![1, 1, 1],
            items: vec![Value::Integer(1)],
        });
        let mut writer = DataBlockWriter::new();
        let err = writer.add_value(&value).unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedType { .. }));
        assert!(writer.is_empty());
        assert_eq!(writer.item_count(), 0);
    }

    #[test]
    fn test_array_item_of_wrong_type() {
        let value = Value::Array(ArrayValue {
            element: WireType::Integer,
            dimensions: vec![2],
            items: vec![Value::Integer(1), Value::from("two")],
        });
        let mut writer = DataBlockWriter::new();
        let err = writer.add_value(&value).unwrap_err();
        assert_eq!(err.user_message(), "encountered string required integer");
    }

    #[test]
    fn test_array_of_lists() {
        let mut first = DataBlockWriter::new();
        first.add(&1).add("one");
        let mut second = DataBlockWriter::new();
        second.add(&2);

        let mut writer = DataBlockWriter::new();
        writer.add(&vec![first, second]);

        let mut reader = writer.reader();
        let mut lists: Vec<DataBlockReader> = reader.get().unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].get::<i32>().unwrap(), 1);
        assert_eq!(lists[0].get::<String>().unwrap(), "one");
        assert_eq!(lists[1].get::<i32>().unwrap(), 2);
        assert!(lists[1].is_at_end());
    }
}
