//! CSV-style field quoting shared by the descriptor store and attendance log.
//!
//! Only the subset the two line formats need: comma separators, fields
//! optionally wrapped in double quotes, `""` as an escaped quote. Records never
//! span lines.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Quote a field if it would otherwise be ambiguous.
pub fn quote_field(field: &str) -> String {
    let needs_quotes = field.contains([',', '"'])
        || field.starts_with(char::is_whitespace)
        || field.ends_with(char::is_whitespace);
    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one line into fields, honouring quotes.
pub fn split_fields(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;
    let mut field_was_quoted = false;

    while let Some(c) = chars.next() {
        match (in_quotes, c) {
            (true, '"') => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            (true, c) => current.push(c),
            (false, '"') if current.is_empty() && !field_was_quoted => {
                in_quotes = true;
                field_was_quoted = true;
            }
            (false, ',') => {
                fields.push(std::mem::take(&mut current));
                field_was_quoted = false;
            }
            (false, _) if field_was_quoted => {
                return Err(format!("unexpected {c:?} after closing quote"));
            }
            (false, c) => current.push(c),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    fields.push(current);
    Ok(fields)
}

/// Read every line of `path` as raw bytes, decoding each one separately.
///
/// A line that is not UTF-8 yields its own error and does not affect the
/// others. Line numbers are 1-based. Blank lines are omitted.
pub fn read_lines(path: &Path) -> io::Result<Vec<(usize, Result<String, String>)>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for (index, raw) in reader.split(b'\n').enumerate() {
        let mut raw = raw?;
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let decoded = String::from_utf8(raw).map_err(|e| format!("not valid UTF-8: {e}"));
        if matches!(&decoded, Ok(line) if line.trim().is_empty()) {
            continue;
        }
        lines.push((index + 1, decoded));
    }
    Ok(lines)
}

/// Append `line` to `path`, first terminating a trailing partial line.
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    let len = file.metadata()?.len();
    let mut record = String::with_capacity(line.len() + 2);
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            record.push('\n');
        }
    }
    record.push_str(line);
    record.push('\n');
    file.write_all(record.as_bytes())
}
