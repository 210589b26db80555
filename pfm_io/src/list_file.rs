//! The `.pfm` list file: a small text manifest naming the bin file, the depth
//! file and every source file loaded into the structure.
//!
//! ```text
//! PFM_LIST_FILE 1
//! BIN_FILE survey.bin
//! DEPTH_FILE survey.dep
//! FILE 0 - /data/line_001.gsf
//! FILE 1 D /data/line_002.gsf
//! ```
//!
//! `D` marks a logically deleted source file. Relative paths resolve against
//! the list file's directory. Saves go through a temporary file and a rename.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PfmError, Result};

/// First line of every list file.
pub const LIST_FILE_TAG: &str = "PFM_LIST_FILE";

/// List file format version.
pub const LIST_FILE_VERSION: u32 = 1;

/// One source file in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Dense file number, as stored in depth records.
    pub number: u16,
    /// Path as written in the manifest.
    pub path: PathBuf,
    /// Logically deleted.
    pub deleted: bool,
}

/// Parsed list file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFile {
    /// Bin file as written.
    pub bin_file: PathBuf,
    /// Depth file as written.
    pub depth_file: PathBuf,
    entries: Vec<ListEntry>,
}

fn corrupt(path: &Path, line: usize, what: &str) -> PfmError {
    PfmError::CorruptFile {
        reason: format!("{}:{}: {}", path.display(), line, what),
    }
}

/// Resolve `p` against the directory holding `list_path`.
pub fn resolve(list_path: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match list_path.parent() {
        Some(dir) => dir.join(p),
        None => p.to_path_buf(),
    }
}

impl ListFile {
    /// Empty manifest.
    pub fn new(bin_file: impl Into<PathBuf>, depth_file: impl Into<PathBuf>) -> Self {
        Self {
            bin_file: bin_file.into(),
            depth_file: depth_file.into(),
            entries: Vec::new(),
        }
    }

    /// Read and parse `list_path`.
    pub fn load(list_path: &Path) -> Result<Self> {
        let text = fs::read(list_path)?;
        let text = String::from_utf8(text).map_err(|_| PfmError::NotAPfmFile {
            path: list_path.to_path_buf(),
        })?;
        Self::parse(&text, list_path)
    }

    /// Parse list file text. `list_path` only names the file in errors.
    pub fn parse(text: &str, list_path: &Path) -> Result<Self> {
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

        let version_ok = match lines.next() {
            Some((_, first)) => {
                let mut parts = first.split_whitespace();
                parts.next() == Some(LIST_FILE_TAG)
                    && parts.next().and_then(|v| v.parse::<u32>().ok()) == Some(LIST_FILE_VERSION)
            }
            None => false,
        };
        if !version_ok {
            return Err(PfmError::NotAPfmFile {
                path: list_path.to_path_buf(),
            });
        }

        let mut bin_file = None;
        let mut depth_file = None;
        let mut entries: Vec<ListEntry> = Vec::new();

        for (idx, line) in lines {
            let line_no = idx + 1;
            let line = line.trim_end();
            let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
            match keyword {
                "BIN_FILE" => bin_file = Some(PathBuf::from(rest.trim())),
                "DEPTH_FILE" => depth_file = Some(PathBuf::from(rest.trim())),
                "FILE" => {
                    let mut parts = rest.splitn(3, ' ');
                    let number = parts
                        .next()
                        .and_then(|n| n.parse::<u16>().ok())
                        .ok_or_else(|| corrupt(list_path, line_no, "bad file number"))?;
                    let deleted = match parts.next() {
                        Some("-") => false,
                        Some("D") => true,
                        _ => return Err(corrupt(list_path, line_no, "bad file status")),
                    };
                    let path = parts
                        .next()
                        .filter(|p| !p.is_empty())
                        .ok_or_else(|| corrupt(list_path, line_no, "missing source path"))?;
                    if number as usize != entries.len() {
                        return Err(corrupt(list_path, line_no, "file numbers are not dense"));
                    }
                    entries.push(ListEntry {
                        number,
                        path: PathBuf::from(path),
                        deleted,
                    });
                }
                _ => return Err(corrupt(list_path, line_no, "unknown keyword")),
            }
        }

        match (bin_file, depth_file) {
            (Some(bin_file), Some(depth_file)) => Ok(Self {
                bin_file,
                depth_file,
                entries,
            }),
            _ => Err(PfmError::CorruptFile {
                reason: format!("{}: missing BIN_FILE or DEPTH_FILE", list_path.display()),
            }),
        }
    }

    /// Text form of the manifest.
    pub fn to_text(&self) -> String {
        let mut out = format!("{} {}\n", LIST_FILE_TAG, LIST_FILE_VERSION);
        out.push_str(&format!("BIN_FILE {}\n", self.bin_file.display()));
        out.push_str(&format!("DEPTH_FILE {}\n", self.depth_file.display()));
        for e in &self.entries {
            out.push_str(&format!(
                "FILE {} {} {}\n",
                e.number,
                if e.deleted { "D" } else { "-" },
                e.path.display()
            ));
        }
        out
    }

    /// Write the manifest through `<list>.tmp` and rename it into place.
    pub fn save(&self, list_path: &Path) -> Result<()> {
        let tmp = sibling(list_path, "tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(self.to_text().as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, list_path)?;
        Ok(())
    }

    /// Register a source file; returns its number.
    pub fn add(&mut self, path: impl Into<PathBuf>) -> Result<u16> {
        let number = u16::try_from(self.entries.len()).map_err(|_| PfmError::InvalidParams {
            reason: format!("list file already holds {} source files", self.entries.len()),
        })?;
        self.entries.push(ListEntry {
            number,
            path: path.into(),
            deleted: false,
        });
        Ok(number)
    }

    /// Every source file in number order.
    #[inline]
    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    /// Source file `number`.
    #[inline]
    pub fn entry(&self, number: u16) -> Option<&ListEntry> {
        self.entries.get(number as usize)
    }

    /// Whether source file `number` is deleted.
    pub fn is_deleted(&self, number: u16) -> Result<bool> {
        self.entry(number)
            .map(|e| e.deleted)
            .ok_or(PfmError::UnknownFile { file_number: number })
    }

    /// Flip a file's deleted flag. Returns the previous value.
    pub fn set_deleted(&mut self, number: u16, deleted: bool) -> Result<bool> {
        let entry = self
            .entries
            .get_mut(number as usize)
            .ok_or(PfmError::UnknownFile { file_number: number })?;
        Ok(std::mem::replace(&mut entry.deleted, deleted))
    }
}

/// `<list>.<ext>`, next to the list file.
pub fn sibling(list_path: &Path, ext: &str) -> PathBuf {
    let mut s = list_path.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// A delete or restore whose record sweep has not finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepIntent {
    /// Set DELETED on the file's records.
    Delete(u16),
    /// Clear DELETED on the file's records.
    Restore(u16),
}

impl SweepIntent {
    /// Marker file for `list_path`.
    pub fn marker_path(list_path: &Path) -> PathBuf {
        sibling(list_path, "sweep")
    }

    /// File the sweep applies to.
    pub fn file_number(self) -> u16 {
        match self {
            SweepIntent::Delete(n) | SweepIntent::Restore(n) => n,
        }
    }

    /// Whether the sweep sets DELETED.
    pub fn deletes(self) -> bool {
        matches!(self, SweepIntent::Delete(_))
    }

    /// Durably record the intent before the manifest changes.
    pub fn write(self, list_path: &Path) -> Result<()> {
        let text = match self {
            SweepIntent::Delete(n) => format!("DELETE {}\n", n),
            SweepIntent::Restore(n) => format!("RESTORE {}\n", n),
        };
        let mut f = fs::File::create(Self::marker_path(list_path))?;
        f.write_all(text.as_bytes())?;
        f.sync_all()?;
        Ok(())
    }

    /// Read a leftover marker, if any.
    pub fn read(list_path: &Path) -> Result<Option<Self>> {
        let path = Self::marker_path(list_path);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut parts = text.split_whitespace();
        let op = parts.next();
        let n = parts.next().and_then(|n| n.parse::<u16>().ok());
        match (op, n) {
            (Some("DELETE"), Some(n)) => Ok(Some(SweepIntent::Delete(n))),
            (Some("RESTORE"), Some(n)) => Ok(Some(SweepIntent::Restore(n))),
            _ => Err(PfmError::CorruptFile {
                reason: format!("unreadable sweep marker {}", path.display()),
            }),
        }
    }

    /// Remove the marker once the sweep is complete.
    pub fn clear(list_path: &Path) -> Result<()> {
        match fs::remove_file(Self::marker_path(list_path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
