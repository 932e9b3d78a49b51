//! Packages artifacts a finished test leaves behind in its leaked temp
//! directory into a single zip archive for upload.

use std::io::Write;
use std::path::Path;

use zip::write::FileOptions;
use zip::ZipWriter;

/// Matched artifacts exceeding this uncompressed size are replaced with a
/// single-entry error archive instead of being packaged.
const MAX_UNCOMPRESSED_BYTES: u64 = 200 * 1024 * 1024;

const TOO_BIG_ENTRY_NAME: &str = "_ARCHIVE_TOO_BIG_";

/// The built archive, ready to upload under the attempt's artifact key.
pub struct PackagedArchive {
    pub bytes: Vec<u8>,
}

/// Build a zip archive of every file under `leaked_dir` matching any of
/// `globs`. Returns `None` if `globs` is empty or nothing matched —
/// mirroring "no archive uploaded" rather than an empty zip.
pub fn package_artifacts(leaked_dir: &Path, globs: &[String]) -> Option<PackagedArchive> {
    if globs.is_empty() {
        tracing::warn!("no artifact_archive_globs given, skipping archive");
        return None;
    }

    let canonical_root = match std::fs::canonicalize(leaked_dir) {
        Ok(root) => root,
        Err(err) => {
            tracing::warn!(error = %err, dir = %leaked_dir.display(), "leaked dir does not exist, skipping archive");
            return None;
        }
    };

    let mut matched: std::collections::BTreeSet<std::path::PathBuf> = std::collections::BTreeSet::new();
    let mut total_size: u64 = 0;

    for pattern in globs {
        let full_pattern = canonical_root.join(pattern);
        let full_pattern_str = full_pattern.to_string_lossy().to_string();
        let entries = match glob::glob(&full_pattern_str) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(glob = %pattern, error = %err, "invalid artifact glob, skipping");
                continue;
            }
        };
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    tracing::warn!(glob = %pattern, error = %err, "error while globbing");
                    continue;
                }
            };
            let canonical = match std::fs::canonicalize(&path) {
                Ok(canonical) => canonical,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "could not canonicalize matched artifact");
                    continue;
                }
            };
            if !canonical.starts_with(&canonical_root) {
                tracing::warn!(
                    glob = %pattern,
                    matched = %canonical.display(),
                    "glob matched file outside of leaked dir, skipping"
                );
                continue;
            }
            let metadata = match std::fs::metadata(&canonical) {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if metadata.is_file() && matched.insert(canonical.clone()) {
                total_size += metadata.len();
            }
        }
    }

    if matched.is_empty() {
        return None;
    }

    if total_size > MAX_UNCOMPRESSED_BYTES {
        tracing::info!(
            total_size,
            max_size = MAX_UNCOMPRESSED_BYTES,
            "matched artifacts exceed maximum size, uploading error archive instead"
        );
        return Some(too_big_archive(total_size));
    }

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut buffer);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for path in &matched {
            let arcname = path
                .strip_prefix(&canonical_root)
                .unwrap_or(path)
                .to_string_lossy()
                .trim_start_matches('/')
                .to_string();
            if writer.start_file(&arcname, options).is_err() {
                tracing::warn!(path = %path.display(), "failed to start zip entry, skipping");
                continue;
            }
            match std::fs::read(path) {
                Ok(contents) => {
                    if let Err(err) = writer.write_all(&contents) {
                        tracing::warn!(path = %path.display(), error = %err, "failed to write zip entry");
                    }
                }
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to read artifact"),
            }
        }
        writer.finish().ok()?;
    }

    Some(PackagedArchive {
        bytes: buffer.into_inner(),
    })
}

fn too_big_archive(total_size: u64) -> PackagedArchive {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut buffer);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let _ = writer.start_file(TOO_BIG_ENTRY_NAME, options);
        let message = format!(
            "Size of matched uncompressed test artifacts exceeded maximum size ({total_size} bytes > {MAX_UNCOMPRESSED_BYTES} bytes)!"
        );
        let _ = writer.write_all(message.as_bytes());
        let _ = writer.finish();
    }
    PackagedArchive {
        bytes: buffer.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    fn write_file(dir: &Path, rel: &str, contents: &[u8]) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn no_globs_means_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        assert!(package_artifacts(dir.path(), &[]).is_none());
    }

    #[test]
    fn no_matches_means_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        assert!(package_artifacts(dir.path(), &["*.log".to_string()]).is_none());
    }

    #[test]
    fn matched_files_are_zipped_with_relative_names() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "out.log", b"hello");
        write_file(dir.path(), "nested/extra.log", b"world");
        let archive = package_artifacts(
            dir.path(),
            &["*.log".to_string(), "nested/*.log".to_string()],
        )
        .expect("archive expected");

        let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive.bytes)).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["nested/extra.log", "out.log"]);
    }

    #[test]
    fn path_traversal_outside_leaked_dir_is_skipped() {
        let outer = tempfile::tempdir().unwrap();
        let inner = outer.path().join("leaked");
        std::fs::create_dir_all(&inner).unwrap();
        write_file(outer.path(), "secret.txt", b"nope");
        // a glob that can't actually escape the dir via std glob matching,
        // but simulates the guard: a symlink pointing outside.
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outer.path().join("secret.txt"), inner.join("link.txt")).unwrap();
            let result = package_artifacts(&inner, &["*.txt".to_string()]);
            assert!(result.is_none());
        }
    }

    #[test]
    fn oversized_artifacts_produce_too_big_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "huge.bin", &vec![0u8; 10]);
        let archive = too_big_archive(300 * 1024 * 1024);
        let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive.bytes)).unwrap();
        assert_eq!(zip.len(), 1);
        let mut entry = zip.by_index(0).unwrap();
        assert_eq!(entry.name(), TOO_BIG_ENTRY_NAME);
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert!(contents.contains("exceeded maximum size"));
    }
}
