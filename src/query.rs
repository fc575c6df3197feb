//! Read-only access to the on-disk log.
//!
//! Readers are best effort: another session may append or rotate the file
//! while it is being read, in which case entries can be skipped or reported
//! as not found, but never parsed from two different records.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::store::{CommandRecord, HEADER_PREFIX, unescape};

/// Read one line without its terminator. Invalid UTF-8 is decoded lossily
/// so a single bad line cannot hide the rest of the log.
fn read_line(reader: &mut impl BufRead, buf: &mut Vec<u8>) -> Option<String> {
    buf.clear();
    match reader.read_until(b'\n', buf) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            if buf.ends_with(b"\n") {
                buf.pop();
                if buf.ends_with(b"\r") {
                    buf.pop();
                }
            }
            Some(String::from_utf8_lossy(buf).into_owned())
        }
    }
}

/// Lazy scan of the header lines, yielding `(sequence_number, command_text)`.
///
/// Sequence numbers are 1-based physical positions of headers in the file, so
/// the same number can name a different record after a rotation.
pub struct Entries {
    reader: Option<BufReader<File>>,
    buf: Vec<u8>,
    seq: usize,
}

impl Iterator for Entries {
    type Item = (usize, String);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // A read error ends the listing rather than skipping ahead.
            let Some(line) = read_line(self.reader.as_mut()?, &mut self.buf) else {
                self.reader = None;
                return None;
            };
            if let Some(text) = line.strip_prefix(HEADER_PREFIX) {
                self.seq += 1;
                return Some((self.seq, unescape(text)));
            }
        }
    }
}

fn open(path: &Path) -> anyhow::Result<Option<BufReader<File>>> {
    match File::open(path) {
        Ok(f) => Ok(Some(BufReader::new(f))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::Error::new(e).context(format!("open log {}", path.display()))),
    }
}

/// List every logged command. A missing log is an empty listing.
///
/// Each call re-opens the file, so the result reflects the log as it is now.
///
/// # Errors
/// Returns an error if the log exists but cannot be opened.
pub fn list(path: &Path) -> anyhow::Result<Entries> {
    Ok(Entries {
        reader: open(path)?,
        buf: Vec::new(),
        seq: 0,
    })
}

/// Fetch the record whose header is the `seq`-th header line (1-based).
///
/// Returns `Ok(None)` when `seq` is out of range or the triple is incomplete
/// or unparseable (e.g. read while another session was rotating).
///
/// # Errors
/// Returns an error if the log exists but cannot be opened.
pub fn show(path: &Path, seq: usize) -> anyhow::Result<Option<CommandRecord>> {
    if seq == 0 {
        return Ok(None);
    }
    let Some(mut reader) = open(path)? else {
        return Ok(None);
    };
    let mut buf = Vec::new();
    let mut lines = std::iter::from_fn(|| read_line(&mut reader, &mut buf));
    let mut seen = 0usize;
    while let Some(line) = lines.next() {
        if !line.starts_with(HEADER_PREFIX) {
            continue;
        }
        seen += 1;
        if seen == seq {
            let (Some(start), Some(stop)) = (lines.next(), lines.next()) else {
                return Ok(None);
            };
            return Ok(CommandRecord::from_lines(&line, &start, &stop));
        }
    }
    Ok(None)
}
