//! Sequential decoder over a data block.

use super::tag::WireType;
use super::value::{ArrayValue, ElementDecode, Value, WireDecode};
use crate::{RelayError, Result};
use bytes::{Buf, Bytes};
use std::fmt::Write as _;

/// Read cursor over an immutable data block.
///
/// The underlying bytes are reference-counted, so cloning a reader or
/// extracting a nested list never copies data. Each clone carries its own
/// cursor.
#[derive(Debug, Clone, Default)]
pub struct DataBlockReader {
    data: Bytes,
    pos: usize,
}

impl DataBlockReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// Decode the next value as `T`.
    pub fn get<T: WireDecode>(&mut self) -> Result<T> {
        T::decode(self)
    }

    /// Decode the next value as a nested list and return a reader over it.
    pub fn get_list(&mut self) -> Result<DataBlockReader> {
        self.get()
    }

    /// Decode a 2-D array into rows.
    pub fn get_2d<T: ElementDecode>(&mut self) -> Result<Vec<Vec<T>>> {
        let sizes = self.array_header_for(T::ELEMENT, 2)?;
        let (rows, columns) = (sizes[0], sizes[1]);
        let mut out = Vec::with_capacity(rows.min(self.remaining()));
        for _ in 0..rows {
            let mut row = Vec::with_capacity(columns.min(self.remaining()));
            for _ in 0..columns {
                row.push(T::decode_element(self)?);
            }
            out.push(row);
        }
        Ok(out)
    }

    /// Decode the next value whatever its type.
    pub fn get_value(&mut self) -> Result<Value> {
        Ok(match self.next_type()? {
            WireType::Byte => Value::Byte(self.get()?),
            WireType::Integer => Value::Integer(self.get()?),
            WireType::Double => Value::Double(self.get()?),
            WireType::Boolean => Value::Boolean(self.get()?),
            WireType::String => Value::String(self.get()?),
            WireType::Complex => Value::Complex(self.get()?),
            WireType::List => Value::List(self.get_list()?.values()?),
            WireType::Array => {
                self.expect_tag(WireType::Array)?;
                let (element, dimensions) = self.array_header()?;
                let count = item_count(&dimensions)?;
                let mut items = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    items.push(Value::decode_element(self, element)?);
                }
                Value::Array(ArrayValue {
                    element,
                    dimensions,
                    items,
                })
            }
            WireType::Terminator => {
                return Err(self.missing("value"));
            }
        })
    }

    /// Decode every remaining value.
    pub fn values(mut self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        while !self.is_at_end() {
            values.push(self.get_value()?);
        }
        Ok(values)
    }

    /// Type of the next value without consuming it. The end of the block
    /// reads as `Terminator`.
    pub fn next_type(&self) -> Result<WireType> {
        match self.data.get(self.pos) {
            None => Ok(WireType::Terminator),
            Some(byte) => WireType::from_byte(*byte).ok_or_else(|| unknown_tag(*byte)),
        }
    }

    /// Element type of the array at the cursor.
    pub fn next_array_type(&self) -> Result<WireType> {
        let mut probe = self.clone();
        probe.expect_tag(WireType::Array)?;
        let byte = probe.raw_u8(WireType::Array)?;
        WireType::from_byte(byte).ok_or_else(|| unknown_tag(byte))
    }

    /// Dimension count of the array at the cursor.
    pub fn next_array_dimensions(&self) -> Result<usize> {
        let mut probe = self.clone();
        probe.expect_tag(WireType::Array)?;
        probe.raw_u8(WireType::Array)?;
        probe.raw_len(WireType::Array)
    }

    /// Step over the next value without decoding it.
    pub fn skip_object(&mut self) -> Result<()> {
        let tag = self.next_type()?;
        match tag {
            WireType::Terminator => return Err(self.missing("object")),
            WireType::Array => {
                self.pos += 1;
                let (element, dimensions) = self.array_header()?;
                for _ in 0..item_count(&dimensions)? {
                    self.skip_element(element)?;
                }
            }
            other => {
                self.pos += 1;
                self.skip_element(other)?;
            }
        }
        Ok(())
    }

    /// True once the cursor reaches the end of the block or a terminator.
    pub fn is_at_end(&self) -> bool {
        self.data
            .get(self.pos)
            .map_or(true, |byte| *byte == WireType::TERMINATOR_BYTE)
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unread bytes as a shared slice.
    pub fn remaining_bytes(&self) -> Bytes {
        self.data.slice(self.pos.min(self.data.len())..)
    }

    /// Decimal byte dump with `>` marking the cursor.
    pub fn dump(&self) -> String {
        let mut out = String::with_capacity(self.data.len() * 4 + 1);
        for (index, byte) in self.data.iter().enumerate() {
            if index > 0 {
                out.push(' ');
            }
            if index == self.pos {
                out.push('>');
            }
            let _ = write!(out, "{byte}");
        }
        if self.pos >= self.data.len() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push('>');
        }
        out
    }

    pub(crate) fn expect_tag(&mut self, expected: WireType) -> Result<()> {
        let Some(byte) = self.data.get(self.pos).copied() else {
            return Err(self.missing(expected.name()));
        };
        match WireType::from_byte(byte) {
            Some(found) if found == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(RelayError::type_mismatch(format!(
                "encountered {found} required {expected}"
            ))),
            None => Err(unknown_tag(byte)),
        }
    }

    fn take(&mut self, len: usize, expecting: WireType) -> Result<&[u8]> {
        if self.remaining() < len {
            return Err(self.missing(expecting.name()));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..self.pos])
    }

    pub(crate) fn raw_u8(&mut self, expecting: WireType) -> Result<u8> {
        Ok(self.take(1, expecting)?[0])
    }

    pub(crate) fn raw_i32(&mut self, expecting: WireType) -> Result<i32> {
        let mut bytes = self.take(4, expecting)?;
        Ok(bytes.get_i32_le())
    }

    pub(crate) fn raw_f64(&mut self, expecting: WireType) -> Result<f64> {
        let mut bytes = self.take(8, expecting)?;
        Ok(bytes.get_f64_le())
    }

    /// Length or count field. Negative values are corrupt data.
    pub(crate) fn raw_len(&mut self, expecting: WireType) -> Result<usize> {
        let len = self.raw_i32(expecting)?;
        usize::try_from(len).map_err(|_| {
            RelayError::type_mismatch(format!("negative {expecting} length {len}"))
        })
    }

    pub(crate) fn raw_string(&mut self) -> Result<String> {
        let len = self.raw_len(WireType::String)?;
        let bytes = self.take(len, WireType::String)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Item count followed by the items; returns a reader over the items.
    pub(crate) fn raw_list_body(&mut self) -> Result<DataBlockReader> {
        let count = self.raw_len(WireType::List)?;
        let start = self.pos;
        for _ in 0..count {
            self.skip_object()?;
        }
        Ok(DataBlockReader::new(self.data.slice(start..self.pos)))
    }

    /// Reads a full array header and checks it against the requested shape.
    pub(crate) fn array_header_for(
        &mut self,
        element: WireType,
        dimensions: usize,
    ) -> Result<Vec<usize>> {
        self.expect_tag(WireType::Array)?;
        let (found, sizes) = self.array_header()?;
        if found != element {
            return Err(RelayError::type_mismatch(format!(
                "encountered {found} array required {element} array"
            )));
        }
        if sizes.len() != dimensions {
            return Err(RelayError::type_mismatch(format!(
                "encountered {} dimensional array required {} dimensional array",
                sizes.len(),
                dimensions
            )));
        }
        Ok(sizes)
    }

    /// Element tag, dimension count and sizes. The array tag is already consumed.
    fn array_header(&mut self) -> Result<(WireType, Vec<usize>)> {
        let byte = self.raw_u8(WireType::Array)?;
        let element = WireType::from_byte(byte).ok_or_else(|| unknown_tag(byte))?;
        if matches!(element, WireType::Array | WireType::Terminator) {
            return Err(RelayError::unsupported_type(
                "arrays of arrays are not supported",
            ));
        }
        let dimensions = self.raw_i32(WireType::Array)?;
        if !(1..=2).contains(&dimensions) {
            return Err(RelayError::unsupported_type(
                "1 and 2 dimension arrays supported only",
            ));
        }
        let mut sizes = Vec::with_capacity(2);
        for _ in 0..dimensions {
            sizes.push(self.raw_len(WireType::Array)?);
        }
        Ok((element, sizes))
    }

    fn skip_element(&mut self, element: WireType) -> Result<()> {
        match element {
            WireType::String => {
                let len = self.raw_len(WireType::String)?;
                self.take(len, WireType::String)?;
            }
            WireType::List => {
                self.raw_list_body()?;
            }
            WireType::Array | WireType::Terminator => {
                return Err(RelayError::unsupported_type(
                    "arrays of arrays are not supported",
                ));
            }
            fixed => {
                let width = fixed.fixed_width().unwrap_or(0);
                self.take(width, fixed)?;
            }
        }
        Ok(())
    }

    fn missing(&self, expecting: &str) -> RelayError {
        RelayError::out_of_data(format!("reached end of data when expecting {expecting}"))
    }
}

impl From<Bytes> for DataBlockReader {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

fn unknown_tag(byte: u8) -> RelayError {
    RelayError::type_mismatch(format!("encountered unknown type {byte}"))
}

fn item_count(dimensions: &[usize]) -> Result<usize> {
    dimensions
        .iter()
        .try_fold(1usize, |acc, size| acc.checked_mul(*size))
        .ok_or_else(|| RelayError::unsupported_type("array too large"))
}
