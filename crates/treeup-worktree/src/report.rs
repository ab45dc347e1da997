//! Verbosity-gated change reporting, with display-depth path trimming.

use std::collections::BTreeSet;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Collects and prints the per-path change lines (` + `, ` * `, ` - `),
/// trimmed to the configured directory depth, plus the UPDATING notices
/// echoed at the end of a run.
pub struct Reporter {
    verbosity: u8,
    display_depth: usize,
    trim_seen: BTreeSet<PathBuf>,
    updating: Vec<PathBuf>,
}

impl Reporter {
    /// `display_depth` is the configured depth; it is widened by the number
    /// of path components in the target so trimming counts from the target
    /// root, not the filesystem root.
    pub fn new(verbosity: u8, display_depth: usize, target: &Path) -> Self {
        let adjusted = if display_depth > 0 {
            display_depth
                + target
                    .as_os_str()
                    .as_bytes()
                    .iter()
                    .skip(1)
                    .filter(|&&b| b == b'/')
                    .count()
        } else {
            0
        };
        Self {
            verbosity,
            display_depth: adjusted,
            trim_seen: BTreeSet::new(),
            updating: Vec::new(),
        }
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// A `# ...` status line on stderr.
    pub fn status(&self, message: &str) {
        if self.verbosity > 0 {
            eprintln!("# {message}");
        }
    }

    /// Trim `path` to the display depth. The second value is true the
    /// first time this trimmed form is seen.
    fn trim(&mut self, path: &Path) -> (PathBuf, bool) {
        if self.display_depth == 0 {
            return (path.to_path_buf(), true);
        }
        let bytes = path.as_os_str().as_bytes();
        let mut cut = Some(0usize);
        for _ in 0..=self.display_depth {
            cut = cut.and_then(|p| {
                bytes[p + 1..]
                    .iter()
                    .position(|&b| b == b'/')
                    .map(|q| p + 1 + q)
            });
            if cut.is_none() {
                break;
            }
        }
        let trimmed = match cut {
            Some(p) => PathBuf::from(std::ffi::OsStr::from_bytes(&bytes[..p])),
            None => path.to_path_buf(),
        };
        let just_added = self.trim_seen.insert(trimmed.clone());
        (trimmed, just_added)
    }

    /// A file was written; `existed` marks an overwrite.
    pub fn file_written(&mut self, path: &Path, mut existed: bool) {
        let (display, just_added) = self.trim(path);
        if self.display_depth > 0 {
            existed |= display.exists();
        }
        if self.verbosity > 0 && (self.display_depth == 0 || just_added) {
            println!(" {} {}", if existed { '*' } else { '+' }, display.display());
        }
    }

    pub fn file_deleted(&mut self, path: &Path) {
        if self.verbosity > 0 && self.display_depth == 0 {
            println!(" - {}", path.display());
        }
    }

    pub fn dir_pruned(&mut self, path: &Path) {
        if self.verbosity == 0 {
            return;
        }
        if self.display_depth == 0 {
            println!(" - {}", path.display());
            return;
        }
        let (display, just_added) = self.trim(path);
        if just_added && display == path {
            println!(" - {}", display.display());
        }
    }

    /// A repair target: missing locally or hash mismatch.
    pub fn repair_needed(&mut self, path: &Path, missing: bool) {
        if self.verbosity > 0 {
            let what = if missing {
                "is missing."
            } else {
                "has been modified."
            };
            eprintln!(" ! {} {}", path.display(), what);
        }
    }

    pub fn note_updating(&mut self, path: &Path) {
        self.updating.push(path.to_path_buf());
    }

    /// Paths containing UPDATING that were materialized this run.
    pub fn updating_paths(&self) -> &[PathBuf] {
        &self.updating
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_zero_never_trims() {
        let mut reporter = Reporter::new(1, 0, Path::new("/t"));
        let (display, just_added) = reporter.trim(Path::new("/t/a/b/c"));
        assert_eq!(display, Path::new("/t/a/b/c"));
        assert!(just_added);
    }

    #[test]
    fn trims_to_depth_below_target() {
        // Target "/usr/ports" has one inner slash, so depth 1 keeps
        // /usr/ports/<category>.
        let mut reporter = Reporter::new(1, 1, Path::new("/usr/ports"));
        let (display, first) = reporter.trim(Path::new("/usr/ports/lang/rust/Makefile"));
        assert_eq!(display, Path::new("/usr/ports/lang"));
        assert!(first);

        let (display, second) = reporter.trim(Path::new("/usr/ports/lang/perl/pkg"));
        assert_eq!(display, Path::new("/usr/ports/lang"));
        assert!(!second);
    }

    #[test]
    fn short_paths_stay_whole() {
        let mut reporter = Reporter::new(1, 2, Path::new("/t"));
        let (display, _) = reporter.trim(Path::new("/t/a"));
        assert_eq!(display, Path::new("/t/a"));
    }

    #[test]
    fn collects_updating_paths() {
        let mut reporter = Reporter::new(1, 0, Path::new("/t"));
        reporter.note_updating(Path::new("/t/UPDATING"));
        assert_eq!(reporter.updating_paths().len(), 1);
    }
}
