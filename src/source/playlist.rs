//! File playlists

use super::{Source, SourceProvider};
use crate::error::{Error, OpenError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// An ordered list of FLV files
///
/// `loops` counts complete passes over the list; 0 repeats forever. With
/// `shuffle` set the order is reshuffled at the start of every pass.
#[derive(Debug)]
pub struct Playlist {
    entries: Vec<PathBuf>,
    loops: u32,
    shuffle: bool,
    rng: fastrand::Rng,
    pass: u32,
    position: usize,
    started: bool,
}

impl Playlist {
    /// Create a playlist from paths
    pub fn new(entries: Vec<PathBuf>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::config("playlist contains no entries"));
        }
        Ok(Self::from_entries(entries))
    }

    /// A playlist of exactly one file
    pub fn single<P: AsRef<Path>>(path: P) -> Self {
        Self::from_entries(vec![path.as_ref().to_path_buf()])
    }

    fn from_entries(entries: Vec<PathBuf>) -> Self {
        let position = entries.len();
        Playlist {
            entries,
            loops: 1,
            shuffle: false,
            rng: fastrand::Rng::new(),
            pass: 0,
            position,
            started: false,
        }
    }

    /// Load a playlist file
    ///
    /// One path per line. Blank lines and lines starting with `#` are
    /// skipped; relative paths are resolved against the playlist's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let entries = parse_entries(&contents, base);
        debug!("Loaded {} entries from {}", entries.len(), path.display());
        Self::new(entries).map_err(|_| {
            Error::config(format!("playlist {} contains no entries", path.display()))
        })
    }

    /// Number of passes over the list (0 = forever)
    pub fn with_loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    /// Reshuffle the order on every pass
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Seed the shuffle for reproducible ordering
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Next path in play order, or `None` once all passes are done
    pub fn next_path(&mut self) -> Option<PathBuf> {
        if self.position >= self.entries.len() {
            if self.started {
                self.pass = self.pass.saturating_add(1);
            }
            if self.loops != 0 && self.pass >= self.loops {
                return None;
            }
            self.position = 0;
            if self.shuffle {
                self.rng.shuffle(&mut self.entries);
            }
            if self.started {
                info!("Starting playlist pass {}", self.pass + 1);
            }
        }
        self.started = true;
        let path = self.entries[self.position].clone();
        self.position += 1;
        Some(path)
    }
}

impl SourceProvider for Playlist {
    type Reader = BufReader<File>;

    fn next_source(&mut self) -> Result<Option<Source<Self::Reader>>> {
        let Some(path) = self.next_path() else {
            return Ok(None);
        };
        let file = File::open(&path).map_err(|e| OpenError::file(&path, e))?;
        Ok(Some(Source::new(
            path.display().to_string(),
            BufReader::new(file),
        )))
    }
}

fn parse_entries(contents: &str, base: &Path) -> Vec<PathBuf> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let entry = PathBuf::from(line);
            if entry.is_absolute() {
                entry
            } else {
                base.join(entry)
            }
        })
        .collect()
}
