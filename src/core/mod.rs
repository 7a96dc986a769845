//! Core module: fragment-aware byte buffering
//!
//! Prinsip desain:
//! - Zero-Copy: spans that fit in the current read are borrowed, never copied
//! - Copy-on-span: bytes are copied only when a field straddles reads
//! - Explicit ownership: borrowed vs owned results are distinct variants

mod byte_cursor;

pub use byte_cursor::{ByteCursor, Feed, NeedMore, Taken};
