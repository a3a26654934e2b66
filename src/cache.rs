//! Content-addressed keys for intermediate pipeline artifacts.
//!
//! A key is the truncated SHA-256 hash of a stage name, a stage version, the contents of the
//! stage's input files and its parameters. Artifacts are reused only if their key matches, so
//! results from changed inputs or an older stage version are never picked up.

use sha2::{Digest, Sha256};
use tracing::debug;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{AlicError, Result};

/// Number of hex characters of the hash kept in keys.
pub const KEY_LENGTH: usize = 16;


/// Incrementally built cache key of one pipeline stage.
#[derive(Debug, Clone)]
pub struct StageKey {
    hasher: Sha256,
}


impl StageKey {

    pub fn new(stage: &str, version: u32) -> StageKey {
        let mut key = StageKey { hasher: Sha256::new() };
        key.field(stage.as_bytes());
        key.field(&version.to_le_bytes());
        key
    }

    fn field(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    /// Mix in the full contents of an input file.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Result<StageKey> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(AlicError::MissingInput(path.to_path_buf()));
        }
        let len = fs::metadata(path)?.len();
        self.hasher.update(len.to_le_bytes());
        io::copy(&mut File::open(path)?, &mut self.hasher)?;
        Ok(self)
    }

    /// Mix in a named parameter.
    pub fn param(mut self, name: &str, value: &str) -> StageKey {
        self.field(name.as_bytes());
        self.field(value.as_bytes());
        self
    }

    pub fn finish(self) -> String {
        let digest = format!("{:x}", self.hasher.finalize());
        digest[..KEY_LENGTH].to_string()
    }
}


/// Path of the stamp file recording the key an artifact was produced with.
pub fn stamp_path<P: AsRef<Path>>(artifact: P) -> PathBuf {
    let mut name = artifact.as_ref().as_os_str().to_owned();
    name.push(".stamp");
    PathBuf::from(name)
}


/// Whether the stamp exists and holds `key`.
pub fn is_fresh<P: AsRef<Path>>(stamp: P, key: &str) -> bool {
    match fs::read_to_string(stamp.as_ref()) {
        Ok(content) => {
            let fresh = content.trim() == key;
            if !fresh {
                debug!(stamp = %stamp.as_ref().display(), "stale stamp");
            }
            fresh
        }
        Err(_) => false,
    }
}


pub fn write_stamp<P: AsRef<Path>>(stamp: P, key: &str) -> Result<()> {
    fs::write(stamp, format!("{}\n", key))?;
    Ok(())
}


/// Hidden sibling of `path` that keeps its extensions, used while the artifact is being written.
fn partial_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".partial.{}", name))
}


/// Write an artifact next to `path` with `write` and move it into place once complete.
///
/// Readers never see a half written file under `path`. A failed write leaves no file behind.
pub fn write_atomically<P, F>(path: P, write: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&Path) -> Result<()>,
{
    let path = path.as_ref();
    let partial = partial_path(path);
    if let Err(e) = write(&partial) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, path)?;
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys_follow_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tracks.tck");
        fs::write(&input, b"first").unwrap();
        let a = StageKey::new("orient", 1).file(&input).unwrap().finish();
        let again = StageKey::new("orient", 1).file(&input).unwrap().finish();
        assert_eq!(a, again);
        assert_eq!(KEY_LENGTH, a.len());

        fs::write(&input, b"second").unwrap();
        let b = StageKey::new("orient", 1).file(&input).unwrap().finish();
        assert_ne!(a, b);
        assert_ne!(b, StageKey::new("orient", 2).file(&input).unwrap().finish());
        assert_ne!(b, StageKey::new("orient", 1).file(&input).unwrap().param("axis", "1").finish());
    }

    #[test]
    fn stamps_are_checked_against_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = stamp_path(dir.path().join("bundle.tck"));
        assert!(stamp.ends_with("bundle.tck.stamp"));
        assert!(!is_fresh(&stamp, "abc"));
        write_stamp(&stamp, "abc").unwrap();
        assert!(is_fresh(&stamp, "abc"));
        assert!(!is_fresh(&stamp, "abd"));
    }

    #[test]
    fn atomic_writes_replace_the_artifact_or_leave_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("tracks_oriented.tck");
        write_atomically(&artifact, |p| {
            assert!(p.to_string_lossy().ends_with(".partial.tracks_oriented.tck"));
            fs::write(p, b"complete")?;
            Ok(())
        }).unwrap();
        assert_eq!(b"complete".to_vec(), fs::read(&artifact).unwrap());

        let failed = dir.path().join("broken.tck");
        let result = write_atomically(&failed, |p| {
            fs::write(p, b"half")?;
            Err(AlicError::InvalidTck(String::from("interrupted")))
        });
        assert!(result.is_err());
        assert!(!failed.exists());
        assert_eq!(1, fs::read_dir(dir.path()).unwrap().count());
    }
}
