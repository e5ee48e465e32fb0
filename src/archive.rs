use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// Compress a completed generation file into the channel archive as one zstd
/// frame, then remove the original. Creates the archive on first use.
pub(crate) fn archive_generation(archive_path: &Path, completed: &Path) -> io::Result<()> {
    let data = fs::read(completed)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(archive_path)?;
    let mut encoder = zstd::Encoder::new(file, 3)?;
    encoder.write_all(&data)?;
    let file = encoder.finish()?;
    file.sync_data()?;
    fs::remove_file(completed)
}

/// Read every archived line back, decompressing through all concatenated
/// frames as one continuous stream. Returns an empty list when no archive
/// exists.
pub(crate) fn read_archived_lines(archive_path: &Path) -> io::Result<Vec<String>> {
    if !archive_path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(archive_path)?;
    let decoder = zstd::Decoder::new(file)?;
    BufReader::new(decoder).lines().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn archives_frames_in_order_and_removes_originals() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app_log.archive.zst");

        let first = dir.path().join("app_log.txt");
        fs::write(&first, "one\ntwo\n").unwrap();
        archive_generation(&archive, &first).unwrap();
        assert!(!first.exists());

        let second = dir.path().join("app_log.1.txt");
        fs::write(&second, "three\n").unwrap();
        archive_generation(&archive, &second).unwrap();

        let lines = read_archived_lines(&archive).unwrap();
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn missing_archive_reads_empty() {
        let dir = tempdir().unwrap();
        let lines = read_archived_lines(&dir.path().join("absent.zst")).unwrap();
        assert!(lines.is_empty());
    }
}
