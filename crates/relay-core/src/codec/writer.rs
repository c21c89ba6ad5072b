//! Append-only encoder for data blocks.

use super::reader::DataBlockReader;
use super::value::{wire_len, ElementEncode, Value, WireEncode};
use super::tag::WireType;
use crate::config::RpcConfig;
use crate::{RelayError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Growable buffer that values are appended to, each with its type tag.
///
/// The writer also counts the top-level values it holds so that it can be
/// embedded in another block as a list.
#[derive(Debug, Clone)]
pub struct DataBlockWriter {
    buf: BytesMut,
    items: usize,
}

impl Default for DataBlockWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataBlockWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(RpcConfig::INITIAL_BLOCK_CAPACITY),
            items: 0,
        }
    }

    /// Append one value.
    pub fn add<T: WireEncode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(&mut self.buf);
        self.items += 1;
        self
    }

    /// Append another block as a nested list.
    pub fn add_list(&mut self, list: &DataBlockWriter) -> &mut Self {
        self.add(list)
    }

    /// Append a 2-D array. Every row must have the same length.
    pub fn add_2d<T: ElementEncode>(&mut self, rows: &[Vec<T>]) -> Result<&mut Self> {
        let columns = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != columns) {
            return Err(RelayError::unsupported_type(
                "2 dimensional arrays must be rectangular",
            ));
        }
        self.buf.put_u8(WireType::Array.to_byte());
        self.buf.put_u8(T::ELEMENT.to_byte());
        self.buf.put_i32_le(2);
        self.buf.put_i32_le(wire_len(rows.len()));
        self.buf.put_i32_le(wire_len(columns));
        for item in rows.iter().flatten() {
            item.encode_element(&mut self.buf);
        }
        self.items += 1;
        Ok(self)
    }

    /// Append a dynamic value. Nothing is written if the value cannot be encoded.
    pub fn add_value(&mut self, value: &Value) -> Result<&mut Self> {
        let mut scratch = BytesMut::new();
        value.encode_into(&mut scratch)?;
        self.buf.extend_from_slice(&scratch);
        self.items += 1;
        Ok(self)
    }

    /// Number of top-level values appended so far.
    pub fn item_count(&self) -> usize {
        self.items
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Reader over a snapshot of the current contents.
    pub fn reader(&self) -> DataBlockReader {
        DataBlockReader::new(Bytes::copy_from_slice(&self.buf))
    }

    /// Decimal byte dump.
    pub fn dump(&self) -> String {
        self.buf
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<DataBlockWriter> for DataBlockReader {
    fn from(writer: DataBlockWriter) -> Self {
        DataBlockReader::new(writer.freeze())
    }
}
