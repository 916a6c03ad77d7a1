use std::io::Write;
use tempfile::NamedTempFile;

pub const MIB: u64 = 1024 * 1024;

/// Deterministic, non-repeating-per-chunk test bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 4096) % 251) as u8).collect()
}

/// Write `data` to a temp file that lives as long as the returned handle.
pub fn write_archive(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(data).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}
