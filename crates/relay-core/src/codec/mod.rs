//! Binary data-block codec.
//!
//! Every value is written as a one-byte type tag followed by its payload.
//! Integers and doubles are little-endian regardless of host byte order.
//!
//! ```text
//! integer  [1][i32 LE]
//! string   [4][i32 LE len][bytes]
//! list     [6][i32 LE count][tagged items...]
//! array    [5][element tag][i32 dims][i32 size]*dims[untagged elements...]
//! ```

mod reader;
mod tag;
mod value;
mod writer;

pub use reader::DataBlockReader;
pub use tag::WireType;
pub use value::{
    ArrayValue, Complex, ElementDecode, ElementEncode, Value, WireDecode, WireEncode,
};
pub use writer::DataBlockWriter;
