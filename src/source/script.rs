//! Generator-script sources

use super::{Source, SourceProvider};
use crate::error::{Error, OpenError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Environment variable carrying the 0-based request number to the script
pub const SEQUENCE_ENV: &str = "FLVCAST_SEQUENCE";

/// Asks an external executable for each next source
///
/// The script is run once per request. The first non-empty line it prints
/// on stdout is the path of the next FLV file; printing nothing ends the
/// session. A non-zero exit status is an error.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    script: PathBuf,
    sequence: u64,
}

impl ScriptSource {
    pub fn new<P: AsRef<Path>>(script: P) -> Self {
        ScriptSource {
            script: script.as_ref().to_path_buf(),
            sequence: 0,
        }
    }

    /// Run the script and return the path it names, if any
    pub fn next_path(&mut self) -> Result<Option<PathBuf>> {
        debug!(
            "Running {} (request {})",
            self.script.display(),
            self.sequence
        );
        let output = Command::new(&self.script)
            .env(SEQUENCE_ENV, self.sequence.to_string())
            .output()
            .map_err(|e| {
                Error::source_error(format!("failed to run {}: {}", self.script.display(), e))
            })?;
        self.sequence += 1;

        if !output.status.success() {
            return Err(Error::source_error(format!(
                "{} exited with {}",
                self.script.display(),
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let next = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from);

        if next.is_none() {
            info!("{} produced no further source", self.script.display());
        }
        Ok(next)
    }
}

impl SourceProvider for ScriptSource {
    type Reader = BufReader<File>;

    fn next_source(&mut self) -> Result<Option<Source<Self::Reader>>> {
        let Some(path) = self.next_path()? else {
            return Ok(None);
        };
        let file = File::open(&path).map_err(|e| OpenError::file(&path, e))?;
        Ok(Some(Source::new(
            path.display().to_string(),
            BufReader::new(file),
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("next.sh");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        file.write_all(body.as_bytes()).unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_script_names_next_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "if [ \"$FLVCAST_SEQUENCE\" = \"0\" ]; then echo; echo clip.flv; fi\n",
        );
        let mut source = ScriptSource::new(&script);
        assert_eq!(source.next_path().unwrap(), Some(PathBuf::from("clip.flv")));
        assert_eq!(source.next_path().unwrap(), None);
    }

    #[test]
    fn test_script_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exit 3\n");
        let mut source = ScriptSource::new(&script);
        assert!(matches!(source.next_path(), Err(Error::Source(_))));
    }

    #[test]
    fn test_script_names_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo /no/such/clip.flv\n");
        let mut source = ScriptSource::new(&script);
        match source.next_source() {
            Err(Error::Open(err @ OpenError::File { .. })) => {
                assert!(err.to_string().starts_with("failed to open /no/such/clip.flv"));
            }
            other => panic!("expected file open error, got {:?}", other.map(|s| s.is_some())),
        }
    }

    #[test]
    fn test_missing_script_is_error() {
        let mut source = ScriptSource::new("/no/such/generator");
        assert!(matches!(source.next_path(), Err(Error::Source(_))));
    }
}
