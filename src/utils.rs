//! Identifier utilities and small formatting helpers.
//!
//! Tape file names, pack IDs, version IDs and locally minted block IDs are
//! all ULIDs: 128-bit, 26-character Crockford base-32, with the leading
//! 48 bits carrying a millisecond timestamp. Sorting the string form and
//! sorting the embedded timestamp agree.

use crate::error::{RestoreError, Result};
use chrono::{TimeZone, Utc};
use ulid::Ulid;

pub const VERSION_SUFFIX: &str = ".ver";
pub const BLOCK_SUFFIX: &str = ".blk";

/// Parse the ULID out of a tape file name, accepting either the bare
/// 26-character form or a `.ver`/`.blk` suffixed form.
pub fn id_from_file_name(name: &str) -> Result<Ulid> {
    let base = name
        .strip_suffix(BLOCK_SUFFIX)
        .or_else(|| name.strip_suffix(VERSION_SUFFIX))
        .unwrap_or(name);
    Ulid::from_string(base).map_err(|e| RestoreError::id(format!("{}: {}", name, e)))
}

/// Millisecond timestamp embedded in an identifier string.
pub fn id_timestamp_ms(id: &str) -> Result<u64> {
    Ok(id_from_file_name(id)?.timestamp_ms())
}

/// Mint a fresh identifier for a locally created record.
pub fn mint_id() -> String {
    Ulid::new().to_string()
}

/// Sort identifier strings oldest first by embedded timestamp, using the
/// full string as a tie-break so the order is total.
pub fn sort_ids_by_time(ids: &mut [String]) {
    ids.sort_by(|a, b| {
        let ta = id_timestamp_ms(a).unwrap_or(0);
        let tb = id_timestamp_ms(b).unwrap_or(0);
        ta.cmp(&tb).then_with(|| a.cmp(b))
    });
}

/// Render an identifier's embedded timestamp for log output.
pub fn id_time_string(id: &str) -> String {
    match id_timestamp_ms(id) {
        Ok(ms) => match Utc.timestamp_millis_opt(ms as i64).single() {
            Some(t) => t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            None => format!("{}ms", ms),
        },
        Err(_) => "<invalid id>".to_string(),
    }
}

/// Format bytes in human-readable form (B, KB, MB, GB, TB).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    const THRESHOLD: u64 = 1024;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_file_name_suffixes() {
        let id = Ulid::from_parts(1_000_000, 42);
        let s = id.to_string();
        assert_eq!(id_from_file_name(&s).unwrap(), id);
        assert_eq!(id_from_file_name(&format!("{}.ver", s)).unwrap(), id);
        assert_eq!(id_from_file_name(&format!("{}.blk", s)).unwrap(), id);
        assert!(id_from_file_name("not-an-id").is_err());
    }

    #[test]
    fn test_timestamp_extraction() {
        let id = Ulid::from_parts(123_456, 7).to_string();
        assert_eq!(id_timestamp_ms(&id).unwrap(), 123_456);
    }

    #[test]
    fn test_string_and_time_order_agree() {
        let older = Ulid::from_parts(1_000, 99).to_string();
        let newer = Ulid::from_parts(2_000, 1).to_string();
        assert!(older < newer);

        let mut ids = vec![newer.clone(), older.clone()];
        sort_ids_by_time(&mut ids);
        assert_eq!(ids, vec![older, newer]);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
    }
}
