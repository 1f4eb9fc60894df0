//! Byte-source polymorphism: the framing parser, the archive opener, and
//! the pre-load phase all want the same read/seek capability set whether
//! the bytes come from a local file, an HTTP range source, or a slice of a
//! ZIP entry. We express that as a plain `Read + Seek` trait object rather
//! than an enum, since the number of concrete backends is open-ended
//! (local, http, zip-over-local, zip-over-http).

pub mod http;
pub mod local;
pub mod zip;

use std::io::{Read, Seek};

/// A seekable, readable byte source that can be sent across the thread
/// boundary into the pre-load phase (see `crate::pool`).
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send + ?Sized> ReadSeek for T {}

/// Boxed trait object alias used everywhere a concrete backend type would
/// otherwise have to be threaded through generics for no benefit -- the
/// framing parser and archive opener only ever need one of these at a time.
pub type BoxSource = Box<dyn ReadSeek>;
