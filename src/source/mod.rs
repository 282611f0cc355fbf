//! Source enumeration
//!
//! The delivery engine asks a [`SourceProvider`] for the next FLV source
//! whenever the current one ends. How sources are found is entirely up to
//! the provider:
//!
//! - [`Playlist`]: a fixed list of files, optionally looped and shuffled
//!   (a single file is a playlist of one)
//! - [`ScriptSource`]: runs a generator executable that prints the next path
//! - [`VecSource`]: in-memory buffers, for tests and embedding

pub mod playlist;
pub mod script;

pub use playlist::Playlist;
pub use script::ScriptSource;

use crate::error::Result;
use std::collections::VecDeque;
use std::io::{Cursor, Read, Seek};

/// One container source handed to the engine
pub struct Source<R> {
    /// Human-readable name for logging (usually the path)
    pub label: String,
    pub reader: R,
}

impl<R> Source<R> {
    pub fn new<S: Into<String>>(label: S, reader: R) -> Self {
        Source {
            label: label.into(),
            reader,
        }
    }
}

/// Supplier of FLV sources for the delivery engine
pub trait SourceProvider {
    type Reader: Read + Seek;

    /// Next source to stream, or `None` when exhausted
    fn next_source(&mut self) -> Result<Option<Source<Self::Reader>>>;
}

/// Serves in-memory FLV buffers in order
#[derive(Debug, Default)]
pub struct VecSource {
    queue: VecDeque<(String, Vec<u8>)>,
}

impl VecSource {
    pub fn new() -> Self {
        VecSource {
            queue: VecDeque::new(),
        }
    }

    /// Queue a buffer
    pub fn with_source<S: Into<String>>(mut self, label: S, data: Vec<u8>) -> Self {
        self.queue.push_back((label.into(), data));
        self
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl SourceProvider for VecSource {
    type Reader = Cursor<Vec<u8>>;

    fn next_source(&mut self) -> Result<Option<Source<Self::Reader>>> {
        Ok(self
            .queue
            .pop_front()
            .map(|(label, data)| Source::new(label, Cursor::new(data))))
    }
}
