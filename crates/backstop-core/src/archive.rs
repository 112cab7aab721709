//! Archive packaging and sidecar files.
//!
//! Archives are gzip-compressed tarballs written to a `.partial` file and
//! renamed into place, so a reader never sees a half-written artifact.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};

use crate::artifact::{
    ArtifactId, ArtifactMetadata, archive_file_name, checksum_file_name, metadata_file_name,
};

/// Pack the contents of `src` into a tar.gz at `dest`. Returns the archive size.
pub fn pack_directory(src: &Path, dest: &Path) -> io::Result<u64> {
    let partial = partial_path(dest);
    let result = (|| {
        let file = File::create(&partial)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.append_dir_all(".", src)?;
        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()?;
        fs::rename(&partial, dest)?;
        Ok(fs::metadata(dest)?.len())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

/// Extract a tar.gz archive into `dest`, creating it if needed.
///
/// Entries that would escape `dest` are skipped by the tar reader.
pub fn unpack_archive(archive: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    let file = File::open(archive)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut tarball = tar::Archive::new(decoder);
    tarball.set_preserve_permissions(true);
    tarball.set_overwrite(true);
    tarball.unpack(dest)
}

/// Compute SHA-256 of a file, streaming.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute SHA-256 of bytes.
#[must_use]
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Paths of the three files that make up one artifact in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFiles {
    pub archive: PathBuf,
    pub metadata: PathBuf,
    pub checksum: PathBuf,
}

impl ArtifactFiles {
    #[must_use]
    pub fn in_dir(dir: &Path, id: &ArtifactId) -> Self {
        Self {
            archive: dir.join(archive_file_name(id)),
            metadata: dir.join(metadata_file_name(id)),
            checksum: dir.join(checksum_file_name(id)),
        }
    }

    /// Remove all three files; missing files are not an error.
    pub fn remove(&self) -> io::Result<()> {
        for path in [&self.archive, &self.metadata, &self.checksum] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Render the `.sha256` sidecar line: `<hex>  <file>`.
#[must_use]
pub fn checksum_line(checksum: &str, archive_name: &str) -> String {
    format!("{checksum}  {archive_name}\n")
}

/// Parse the first line of a `.sha256` sidecar into `(hex, file)`.
#[must_use]
pub fn parse_checksum_line(content: &str) -> Option<(String, String)> {
    let line = content.lines().next()?.trim();
    let (hex, file) = line.split_once("  ")?;
    let hex = hex.trim();
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((hex.to_ascii_lowercase(), file.trim().to_string()))
}

/// Write both sidecars for an artifact next to its archive.
pub fn write_sidecars(files: &ArtifactFiles, metadata: &ArtifactMetadata) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(metadata)?;
    write_atomic(&files.metadata, &json)?;
    let archive_name = files
        .archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    write_atomic(
        &files.checksum,
        checksum_line(&metadata.checksum, &archive_name).as_bytes(),
    )
}

/// Read a `{name}.metadata.json` sidecar.
pub fn read_metadata(path: &Path) -> crate::Result<ArtifactMetadata> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Write `data` to `path` via a temp file and rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let partial = partial_path(path);
    let result = (|| {
        let mut file = File::create(&partial)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&partial, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

/// Recursively copy a directory tree. Returns bytes copied.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut total = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            total += copy_dir_all(&entry.path(), &target)?;
        } else if file_type.is_file() {
            total += fs::copy(entry.path(), &target)?;
        }
    }
    Ok(total)
}

/// Total size of all regular files under `path`.
#[must_use]
pub fn dir_size(path: &Path) -> u64 {
    fs::read_dir(path).map_or(0, |entries| {
        entries
            .filter_map(Result::ok)
            .map(|entry| match entry.file_type() {
                Ok(t) if t.is_dir() => dir_size(&entry.path()),
                Ok(_) => entry.metadata().map_or(0, |m| m.len()),
                Err(_) => 0,
            })
            .sum()
    })
}

/// Move a directory, falling back to copy + delete across filesystems.
pub fn move_dir(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if copy_dir_all(src, dst).is_err() {
                let _ = fs::remove_dir_all(dst);
                return Err(rename_err);
            }
            fs::remove_dir_all(src)
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("nested").join("deeper")).unwrap();
        fs::write(dir.join("top.txt"), "top level").unwrap();
        fs::write(dir.join("nested").join("mid.json"), r#"{"a":1}"#).unwrap();
        fs::write(dir.join("nested").join("deeper").join("leaf.bin"), [0u8, 1, 2, 3]).unwrap();
    }

    #[test]
    fn pack_then_unpack_restores_tree() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        populate(&src);

        let archive = tmp.path().join("out.tar.gz");
        let size = pack_directory(&src, &archive).unwrap();
        assert!(size > 0);
        assert!(!tmp.path().join("out.tar.gz.partial").exists());

        let dest = tmp.path().join("dest");
        unpack_archive(&archive, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("top.txt")).unwrap(), "top level");
        assert_eq!(
            fs::read(dest.join("nested").join("deeper").join("leaf.bin")).unwrap(),
            vec![0u8, 1, 2, 3]
        );
    }

    #[test]
    fn pack_missing_source_leaves_no_partial() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("out.tar.gz");
        assert!(pack_directory(&tmp.path().join("missing"), &archive).is_err());
        assert!(!archive.exists());
        assert!(!tmp.path().join("out.tar.gz.partial").exists());
    }

    #[test]
    fn unpack_garbage_fails() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("bad.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();
        assert!(unpack_archive(&archive, &tmp.path().join("dest")).is_err());
    }

    #[test]
    fn sha256_file_matches_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");
        fs::write(&path, b"hello world").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_bytes(b"hello world"));
        assert_eq!(
            sha256_bytes(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn checksum_line_round_trip() {
        let hex = sha256_bytes(b"x");
        let line = checksum_line(&hex, "metrics_20260101_000000.tar.gz");
        assert_eq!(
            parse_checksum_line(&line),
            Some((hex, "metrics_20260101_000000.tar.gz".to_string()))
        );
        assert_eq!(parse_checksum_line("nothex  file"), None);
        assert_eq!(parse_checksum_line(""), None);
    }

    #[test]
    fn copy_and_size_are_recursive() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        populate(&src);
        let copied = copy_dir_all(&src, &tmp.path().join("copy")).unwrap();
        assert_eq!(copied, dir_size(&src));
        assert_eq!(dir_size(&tmp.path().join("copy")), dir_size(&src));
    }

    #[test]
    fn move_dir_relocates_tree() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("live");
        populate(&src);
        let dst = tmp.path().join("quarantine").join("live_1");
        move_dir(&src, &dst).unwrap();
        assert!(!src.exists());
        assert!(dst.join("top.txt").exists());
    }

    #[test]
    fn artifact_files_remove_tolerates_missing() {
        let tmp = TempDir::new().unwrap();
        let files = ArtifactFiles::in_dir(tmp.path(), &ArtifactId::new("metrics_20260101_000000"));
        fs::write(&files.archive, b"a").unwrap();
        files.remove().unwrap();
        assert!(!files.archive.exists());
        files.remove().unwrap();
    }
}
