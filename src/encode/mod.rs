//! Row encoding against compiled descriptors.

mod encoder;
mod value;

pub use encoder::{EncodeError, RowEncoder};
pub use value::{row_from_json, Row, RowValue};
