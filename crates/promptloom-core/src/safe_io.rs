//! Crash-safe file writes used by generator tools.
//!
//! Every write goes to a `.tmp` sibling, is fsynced, then renamed over the
//! target, so a reader sees either the old file or the complete new one.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write `value` as pretty-printed JSON, atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write(path, &json)
}

/// Write bytes atomically, creating parent directories as needed.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp_path)?;
    {
        let mut writer = BufWriter::new(&mut file);
        writer.write_all(contents)?;
        writer.flush()?;
    }
    file.sync_all()?;

    fs::rename(tmp_path, path)
}
