use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Append-only handle on the frontier file.
///
/// Without dedup every discovered link is appended, including ones already
/// in the file. With dedup, links already present (in the file or earlier in
/// this run) are dropped.
pub struct FrontierWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    seen: Option<HashSet<String>>,
    // Existing file lacks a final newline; terminate it before the first link.
    unterminated: bool,
    appended: usize,
    duplicates: usize,
}

impl FrontierWriter {
    /// `dry_run` opens nothing and writes nothing, but still counts.
    pub fn open(path: &Path, dedup: bool, dry_run: bool) -> Result<Self> {
        let seen = if dedup {
            Some(existing_lines(path)?.into_iter().collect())
        } else {
            None
        };

        let unterminated = !dry_run && lacks_final_newline(path)?;
        let out = if dry_run {
            None
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open frontier {}", path.display()))?;
            Some(BufWriter::new(file))
        };

        Ok(Self {
            path: path.to_path_buf(),
            out,
            seen,
            unterminated,
            appended: 0,
            duplicates: 0,
        })
    }

    /// Append one index page's links and flush them to disk.
    pub fn append_page(&mut self, links: &[String]) -> Result<usize> {
        let mut written = 0;
        for link in links {
            if let Some(seen) = self.seen.as_mut() {
                if !seen.insert(link.clone()) {
                    self.duplicates += 1;
                    continue;
                }
            }
            if let Some(out) = self.out.as_mut() {
                if std::mem::take(&mut self.unterminated) {
                    writeln!(out)
                        .with_context(|| format!("Failed to append to {}", self.path.display()))?;
                }
                writeln!(out, "{}", link)
                    .with_context(|| format!("Failed to append to {}", self.path.display()))?;
            }
            written += 1;
        }
        if let Some(out) = self.out.as_mut() {
            out.flush()
                .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        }
        self.appended += written;
        Ok(written)
    }

    pub fn appended(&self) -> usize {
        self.appended
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

/// Every frontier entry as an absolute URL, in file order.
pub fn read_urls(path: &Path, origin: &str, dedup: bool) -> Result<Vec<String>> {
    let lines = existing_lines(path)?;
    let mut seen = HashSet::new();
    Ok(lines
        .into_iter()
        .filter(|line| !dedup || seen.insert(line.clone()))
        .map(|line| resolve(origin, &line))
        .collect())
}

/// Relative paths get the origin prefixed; absolute URLs pass through.
pub fn resolve(origin: &str, entry: &str) -> String {
    if entry.starts_with("http://") || entry.starts_with("https://") {
        entry.to_string()
    } else {
        format!("{}{}", origin.trim_end_matches('/'), entry)
    }
}

pub struct FrontierStats {
    pub lines: usize,
    pub unique: usize,
}

pub fn stats(path: &Path) -> Result<FrontierStats> {
    let lines = existing_lines(path)?;
    let unique = lines.iter().collect::<HashSet<_>>().len();
    Ok(FrontierStats {
        lines: lines.len(),
        unique,
    })
}

fn lacks_final_newline(path: &Path) -> Result<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("Failed to read frontier {}", path.display())),
    };
    let mut last = [0u8; 1];
    let read = file
        .seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last));
    match read {
        Ok(()) => Ok(last[0] != b'\n'),
        // Seeking before the start means the file is empty.
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to read frontier {}", path.display())),
    }
}

/// Non-blank lines with trailing whitespace removed. A missing file is an
/// empty frontier.
fn existing_lines(path: &Path) -> Result<Vec<String>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read frontier {}", path.display())),
    };
    Ok(text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
