//! Directory reader for the file sync.
//!
//! Lists the regular files directly under the configured directory (no
//! recursion, no extension filter) and reads each one as UTF-8. Entries come
//! back in the order the platform lists them, which is not sorted and may
//! differ between runs.
//!
//! The first error (permission, I/O, invalid UTF-8) stops the scan. Files
//! read before it are still returned alongside the error, so one bad file can
//! truncate the result but never corrupt it.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info};
use walkdir::WalkDir;

use crate::models::FileRecord;
use crate::report::Collected;

pub fn read_directory(root: &Path) -> Collected<FileRecord, anyhow::Error> {
    let mut records = Vec::new();
    match scan(root, &mut records) {
        Ok(()) => {
            info!("Read {} files from {}.", records.len(), root.display());
            Collected::complete(records)
        }
        Err(e) => {
            error!(
                "Error reading files from {} after {} files: {:#}",
                root.display(),
                records.len(),
                e
            );
            Collected::truncated(records, e)
        }
    }
}

fn scan(root: &Path, records: &mut Vec<FileRecord>) -> Result<()> {
    let walker = WalkDir::new(root).min_depth(1).max_depth(1);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;

        // Symlinks count when they resolve to a regular file.
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let filename = entry
            .file_name()
            .to_str()
            .ok_or_else(|| anyhow!("Filename is not valid UTF-8: {}", path.display()))?
            .to_string();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        records.push(FileRecord { filename, content });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn reads_top_level_files_only() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("alpha.md"), "# Alpha").unwrap();
        fs::write(tmp.path().join("beta"), "no extension").unwrap();
        fs::create_dir(tmp.path().join("nested")).unwrap();
        fs::write(tmp.path().join("nested/gamma.txt"), "too deep").unwrap();

        let collected = read_directory(tmp.path());
        assert!(collected.failure.is_none());

        let mut names: Vec<_> = collected
            .items
            .iter()
            .map(|r| (r.filename.as_str(), r.content.as_str()))
            .collect();
        names.sort();
        assert_eq!(names, vec![("alpha.md", "# Alpha"), ("beta", "no extension")]);
    }

    #[test]
    fn empty_directory() {
        let tmp = TempDir::new().unwrap();
        let collected = read_directory(tmp.path());
        assert!(collected.items.is_empty());
        assert!(collected.failure.is_none());
    }

    #[test]
    fn missing_directory_reports_failure() {
        let tmp = TempDir::new().unwrap();
        let collected = read_directory(&tmp.path().join("absent"));
        assert!(collected.items.is_empty());
        assert!(collected.failure.is_some());
    }

    #[test]
    fn undecodable_file_truncates_in_listing_order() {
        let tmp = TempDir::new().unwrap();
        for name in ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"] {
            fs::write(tmp.path().join(name), format!("body of {name}")).unwrap();
        }
        fs::write(tmp.path().join("bad.bin"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let listing: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        let bad_at = listing.iter().position(|n| n == "bad.bin").unwrap();

        let collected = read_directory(tmp.path());
        assert!(collected.failure.is_some());
        let names: Vec<_> = collected.items.iter().map(|r| r.filename.clone()).collect();
        assert_eq!(names, listing[..bad_at].to_vec());
        for record in &collected.items {
            assert_eq!(record.content, format!("body of {}", record.filename));
        }
    }
}
