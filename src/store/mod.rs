use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};

/// Every record occupies exactly this many physical lines in the log.
pub const LINES_PER_RECORD: usize = 3;

pub const HEADER_PREFIX: &str = "# ";
pub const START_PREFIX: &str = "start    ";
pub const STOP_PREFIX: &str = "stop     ";

/// Backwards-scan chunk used when locating the tail to keep.
const TAIL_CHUNK: u64 = 8 * 1024;

/// One completed command: its text and when it started and stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub text: String,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
}

impl CommandRecord {
    /// Serialize as the three log lines, each newline-terminated.
    pub fn to_lines(&self) -> String {
        format!(
            "{HEADER_PREFIX}{}\n{START_PREFIX}{}\n{STOP_PREFIX}{}\n",
            escape(&self.text),
            self.start_time.to_rfc2822(),
            self.stop_time.to_rfc2822()
        )
    }

    /// Parse a record back from its three lines (without terminators).
    ///
    /// Returns `None` if any line has the wrong prefix or a timestamp does not parse.
    pub fn from_lines(header: &str, start: &str, stop: &str) -> Option<Self> {
        let text = header.strip_prefix(HEADER_PREFIX)?;
        let start_time = parse_timestamp(start.strip_prefix(START_PREFIX)?)?;
        let stop_time = parse_timestamp(stop.strip_prefix(STOP_PREFIX)?)?;
        Some(Self {
            text: unescape(text),
            start_time,
            stop_time,
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Fold a possibly multi-line command onto one line.
///
/// `\` becomes `\\` and each newline becomes `\n`, so [`unescape`] restores
/// the original text exactly (modulo `\r\n` line endings, folded to `\n`).
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.replace("\r\n", "\n").chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`]. Unknown escapes are kept verbatim.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Append-only, size-bounded history log backed by a single text file.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as three lines, creating the file (and its parent
    /// directory) if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the write fails.
    pub fn append(&self, record: &CommandRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open log {}", self.path.display()))?;
        // Single write so concurrent sessions don't interleave inside a record.
        file.write_all(record.to_lines().as_bytes())
            .with_context(|| format!("append to log {}", self.path.display()))?;
        Ok(())
    }

    /// Keep only the last `max_records` records.
    ///
    /// Only the retained tail is read (scanning backwards from EOF), copied to a
    /// sibling temp file and renamed over the log. Returns `Ok(false)` when the
    /// log already fits and nothing was rewritten.
    ///
    /// # Errors
    /// Returns an error if reading the log or writing/renaming the temp file fails.
    pub fn rotate(&self, max_records: usize) -> anyhow::Result<bool> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("open log {}", self.path.display())));
            }
        };
        let len = file.metadata().context("stat log")?.len();
        let keep_lines = max_records.saturating_mul(LINES_PER_RECORD);
        let Some(offset) = tail_offset(&mut file, len, keep_lines).context("scan log tail")?
        else {
            return Ok(false);
        };

        file.seek(SeekFrom::Start(offset)).context("seek log tail")?;
        let tmp_path = self.tmp_path();
        copy_aligned_tail(BufReader::new(file), &tmp_path)
            .with_context(|| format!("write rotated log {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "replace {} with {}",
                self.path.display(),
                tmp_path.display()
            )
        })?;
        Ok(true)
    }

    /// Append `record`, then rotate down to `max_records`.
    ///
    /// # Errors
    /// Propagates errors from [`Self::append`] and [`Self::rotate`].
    pub fn record(&self, record: &CommandRecord, max_records: usize) -> anyhow::Result<()> {
        self.append(record)?;
        self.rotate(max_records)?;
        Ok(())
    }

    /// Per-process temp file next to the log, so two sessions rotating at
    /// once do not write into the same temp file.
    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

/// Byte offset at which the last `keep_lines` lines of `file` begin, or
/// `None` when the file holds no more than `keep_lines` lines.
fn tail_offset(file: &mut File, len: u64, keep_lines: usize) -> std::io::Result<Option<u64>> {
    if len == 0 {
        return Ok(None);
    }
    if keep_lines == 0 {
        return Ok(Some(len));
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    // A trailing newline terminates the last line; an unterminated last line
    // counts as a line of its own.
    let target = if last[0] == b'\n' {
        keep_lines + 1
    } else {
        keep_lines
    };

    #[allow(clippy::cast_possible_truncation)]
    let mut buf = vec![0u8; TAIL_CHUNK as usize];
    let mut seen = 0usize;
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK);
        #[allow(clippy::cast_possible_truncation)]
        let n = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..n])?;
        for (i, &b) in buf[..n].iter().enumerate().rev() {
            if b == b'\n' {
                seen += 1;
                if seen == target {
                    return Ok(Some(start + i as u64 + 1));
                }
            }
        }
        end = start;
    }
    Ok(None)
}

/// Copy `reader` into a fresh file at `dest`, dropping any leading lines
/// before the first record header (a torn record left by an earlier crash).
fn copy_aligned_tail<R: BufRead>(mut reader: R, dest: &Path) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(dest)?);
    let mut aligned = false;
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if !aligned {
            if !line.starts_with(HEADER_PREFIX.as_bytes()) {
                continue;
            }
            aligned = true;
        }
        out.write_all(&line)?;
    }
    out.flush()?;
    out.get_ref().sync_all()
}
