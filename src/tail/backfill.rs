use super::TailError;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// The last complete lines of a file plus the byte offset just past them,
/// where incremental reading should continue.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Backfill {
    pub lines: Vec<String>,
    pub position: u64,
}

/// Read up to `max_lines` non-empty complete lines from the end of `path`.
/// A trailing line without `\n` is left for the tailer to pick up once the
/// writer finishes it.
pub fn read_last_lines(path: &Path, max_lines: usize) -> Result<Backfill, TailError> {
    let file = File::open(path).map_err(|source| TailError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let length = file
        .metadata()
        .map_err(|source| TailError::Metadata {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    // Zero-length files cannot be mapped
    if length == 0 {
        return Ok(Backfill::default());
    }

    let mmap = unsafe { Mmap::map(&file) }.map_err(|source| TailError::Map {
        path: path.to_path_buf(),
        source,
    })?;

    let Some(last_newline) = mmap.iter().rposition(|&b| b == b'\n') else {
        return Ok(Backfill::default());
    };
    let position = last_newline as u64 + 1;
    if max_lines == 0 {
        return Ok(Backfill {
            lines: Vec::new(),
            position,
        });
    }

    let mut lines = Vec::with_capacity(max_lines.min(4096));
    for raw in mmap[..last_newline].rsplit(|&b| b == b'\n') {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }
        lines.push(String::from_utf8_lossy(raw).into_owned());
        if lines.len() == max_lines {
            break;
        }
    }
    lines.reverse();

    Ok(Backfill { lines, position })
}
