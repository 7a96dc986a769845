//! Protocol Layer: Thrift binary protocol
//!
//! Prinsip desain:
//! - Resumable: every decoder keeps explicit per-field progress
//! - Bounded: length fields are checked before anything is allocated
//! - Big-endian: all integers on the wire are network byte order

mod args;
mod binary;
mod encoder;
mod envelope;
mod message;
mod value;

pub use args::ArgsReader;
pub use binary::{check_len, read_f64, read_i16, read_i32, read_i64, read_i8, FieldSkipper};
pub use encoder::Encoder;
pub use envelope::{Envelope, EnvelopeDecoder, ProtocolVariant};
pub use message::{MessageType, TType, TYPE_MASK, VERSION_1, VERSION_MASK};
pub use value::{decode_struct, decode_struct_with, decode_value, Value, DEFAULT_MAX_DEPTH};
