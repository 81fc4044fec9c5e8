//! # vr-media
//!
//! Byte-serving building blocks for the HTTP media endpoints:
//!
//! - **Range calculation** ([`resolve_range`]) -- turn an optional `Range`
//!   header and a file size into a validated [`ServeWindow`].
//! - **Chunked reading** ([`ChunkedFileReader`], [`looping_stream`]) -- lazy,
//!   bounded (or endlessly looping) sequences of file chunks.
//! - **Registry** ([`MediaRegistry`]) -- logical stream name to backing file.
//! - **Content types** ([`guess_content_type`]).

pub mod content_type;
pub mod range;
pub mod reader;
pub mod registry;

pub use content_type::guess_content_type;
pub use range::{resolve_range, ByteRange, ServeWindow};
pub use reader::{looping_stream, ChunkedFileReader};
pub use registry::{MediaEntry, MediaRegistry};
