//! Packaging of reduced reproducers.
//!
//! An archive is a gzipped ustar stream holding the reduced target artifact,
//! its sources and a `violation.json` record describing what was reduced.
//! Entries longer than 100 bytes are preceded by a GNU `L` longname record.
//! Headers carry fixed owner and time fields, so the same inputs give the same
//! bytes. File permission bits are kept.

use crate::model::{FinishedJob, Target};
use crate::violation::{DiffEdge, PotentialViolation};
use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const TAR_BLOCK_LEN: usize = 512;
const NAME_FIELD_LEN: usize = 100;
/// Largest payload an 11-digit octal size field can describe.
const MAX_ENTRY_SIZE: u64 = (1 << 33) - 1;
/// Mode of entries that do not come from a file.
const DEFAULT_MODE: u32 = 0o644;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive {0:?} already exists")]
    Exists(PathBuf),
    #[error("Entry '{name}' is {size} bytes, larger than a tar header can describe")]
    EntryTooLarge { name: String, size: u64 },
    #[error("Archive I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize archive record: {0}")]
    Json(#[from] serde_json::Error),
}

/// The `violation.json` stored inside a reduction archive.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArchiveRecord {
    pub job1: FinishedJob,
    pub job2: FinishedJob,
    pub option: String,
    pub expected_relation: String,
    pub edge: DiffEdge,
    pub observed_diffs: BTreeSet<String>,
}

impl ArchiveRecord {
    pub fn new(violation: &PotentialViolation, edge: DiffEdge) -> Self {
        Self {
            job1: violation.job1.clone(),
            job2: violation.job2.clone(),
            option: violation.option.clone(),
            expected_relation: violation.expected_relation(),
            edge,
            observed_diffs: violation.expected_diffs.clone(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    mode: u32,
    payload: Vec<u8>,
}

/// Regular-file entries, keyed and emitted by archive name.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: BTreeMap<String, Entry>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn add_bytes(&mut self, name: impl Into<String>, payload: Vec<u8>) {
        self.add_entry(name, payload, DEFAULT_MODE);
    }

    fn add_entry(&mut self, name: impl Into<String>, payload: Vec<u8>, mode: u32) {
        self.entries.insert(name.into(), Entry { mode, payload });
    }

    /// Adds `path` under `name`. Directories are walked recursively and only
    /// their regular files are stored.
    pub fn add_path(&mut self, name: &str, path: &Path) -> Result<(), ArchiveError> {
        let meta = fs::metadata(path).map_err(|source| io_error(path, source))?;
        if meta.is_dir() {
            let mut children: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|source| io_error(path, source))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<_, _>>()
                .map_err(|source| io_error(path, source))?;
            children.sort();
            for child in children {
                let child_name = match child.file_name() {
                    Some(file) => format!("{name}/{}", file.to_string_lossy()),
                    None => continue,
                };
                self.add_path(&child_name, &child)?;
            }
        } else if meta.is_file() {
            let payload = fs::read(path).map_err(|source| io_error(path, source))?;
            self.add_entry(name, payload, file_mode(&meta));
        }
        Ok(())
    }

    /// Serializes all entries as an uncompressed tar stream.
    pub fn tar_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut out = Vec::new();
        let mut hdr = [0u8; TAR_BLOCK_LEN];
        for (name, Entry { mode, payload }) in &self.entries {
            let size = payload.len() as u64;
            if size > MAX_ENTRY_SIZE {
                return Err(ArchiveError::EntryTooLarge {
                    name: name.clone(),
                    size,
                });
            }
            let name_bytes = name.as_bytes();
            let name_field = if name_bytes.len() > NAME_FIELD_LEN {
                let mut long_bytes = name_bytes.to_vec();
                long_bytes.push(0);
                write_header(&mut hdr, b"././@LongLink", long_bytes.len() as u64, DEFAULT_MODE, b'L');
                out.extend_from_slice(&hdr);
                out.extend_from_slice(&long_bytes);
                out.resize(out.len() + tar_pad(long_bytes.len()), 0);
                &name_bytes[..NAME_FIELD_LEN]
            } else {
                name_bytes
            };
            write_header(&mut hdr, name_field, size, *mode, b'0');
            out.extend_from_slice(&hdr);
            out.extend_from_slice(payload);
            out.resize(out.len() + tar_pad(payload.len()), 0);
        }
        out.resize(out.len() + 2 * TAR_BLOCK_LEN, 0);
        Ok(out)
    }

    /// Writes the gzipped archive to `path`. An existing file is never replaced.
    pub fn write_to(&self, path: &Path) -> Result<(), ArchiveError> {
        let tar = self.tar_bytes()?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::AlreadyExists => ArchiveError::Exists(path.to_path_buf()),
                _ => io_error(path, source),
            })?;
        let mut enc = GzBuilder::new().mtime(0).write(file, Compression::default());
        enc.write_all(&tar).map_err(|source| io_error(path, source))?;
        enc.finish().map_err(|source| io_error(path, source))?;
        debug!(?path, entries = self.entries.len(), "archive written");
        Ok(())
    }
}

/// Packages the reduced `target` and `record` into `archive_path`.
///
/// Entry names are relative to `root` when the file lives under it, otherwise
/// the file's own name is used.
pub fn package(
    archive_path: &Path,
    root: &Path,
    target: &Target,
    record: &ArchiveRecord,
) -> Result<(), ArchiveError> {
    if archive_path.exists() {
        return Err(ArchiveError::Exists(archive_path.to_path_buf()));
    }
    let mut builder = ArchiveBuilder::new();
    for path in std::iter::once(&target.name).chain(&target.sources) {
        if path.exists() {
            builder.add_path(&entry_name(root, path), path)?;
        }
    }
    builder.add_bytes("violation.json", serde_json::to_vec_pretty(record)?);
    builder.write_to(archive_path)?;
    info!(archive = ?archive_path, entries = builder.len(), "packaged reduced target");
    Ok(())
}

fn entry_name(root: &Path, path: &Path) -> String {
    let relative = path
        .strip_prefix(root)
        .ok()
        .filter(|rest| !rest.as_os_str().is_empty())
        .or_else(|| path.file_name().map(Path::new))
        .unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn io_error(path: &Path, source: io::Error) -> ArchiveError {
    ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> u32 {
    DEFAULT_MODE
}

fn tar_pad(len: usize) -> usize {
    (TAR_BLOCK_LEN - len % TAR_BLOCK_LEN) % TAR_BLOCK_LEN
}

fn write_header(buf: &mut [u8; TAR_BLOCK_LEN], name: &[u8], size: u64, mode: u32, typeflag: u8) {
    buf.fill(0);
    let name_len = name.len().min(NAME_FIELD_LEN);
    buf[0..name_len].copy_from_slice(&name[..name_len]);
    let mode_field = format!("{:07o}\0", mode & 0o7777);
    buf[100..108].copy_from_slice(mode_field.as_bytes());
    buf[108..116].copy_from_slice(b"0000000\0");
    buf[116..124].copy_from_slice(b"0000000\0");

    let mut size_field = [b'0'; 11];
    let mut v = size;
    for i in (0..11).rev() {
        size_field[i] = b'0' + ((v & 7) as u8);
        v >>= 3;
    }
    buf[124..135].copy_from_slice(&size_field);
    buf[135] = 0;
    buf[136..148].copy_from_slice(b"00000000000\0");
    buf[148..156].fill(b' ');
    buf[156] = typeflag;
    buf[257..263].copy_from_slice(b"ustar\0");
    buf[263..265].copy_from_slice(b"00");

    let sum: u32 = buf.iter().map(|&b| b as u32).sum();
    let chk = format!("{:06o}\0 ", sum);
    buf[148..156].copy_from_slice(chk.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::violation::tests::sample;
    use flate2::read::GzDecoder;
    use std::io::Read;

    /// Minimal ustar reader: (name, payload) pairs, resolving GNU longnames.
    fn read_tar(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut entries = Vec::new();
        let mut pos = 0;
        let mut long_name: Option<String> = None;
        while pos + TAR_BLOCK_LEN <= bytes.len() {
            let hdr = &bytes[pos..pos + TAR_BLOCK_LEN];
            if hdr.iter().all(|&b| b == 0) {
                break;
            }
            let name_end = hdr[..100].iter().position(|&b| b == 0).unwrap_or(100);
            let name = String::from_utf8_lossy(&hdr[..name_end]).into_owned();
            let size_str = std::str::from_utf8(&hdr[124..135]).unwrap();
            let size = usize::from_str_radix(size_str, 8).unwrap();
            let data = bytes[pos + TAR_BLOCK_LEN..pos + TAR_BLOCK_LEN + size].to_vec();
            pos += TAR_BLOCK_LEN + size + tar_pad(size);
            if hdr[156] == b'L' {
                long_name = Some(String::from_utf8_lossy(&data[..data.len() - 1]).into_owned());
                continue;
            }
            entries.push((long_name.take().unwrap_or(name), data));
        }
        entries
    }

    fn checksum_ok(hdr: &[u8]) -> bool {
        let stored = std::str::from_utf8(&hdr[148..154]).unwrap();
        let stored = u32::from_str_radix(stored, 8).unwrap();
        let sum: u32 = hdr
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { b' ' as u32 } else { b as u32 })
            .sum();
        stored == sum
    }

    #[test]
    fn tar_stream_is_block_aligned_with_valid_headers() {
        let mut builder = ArchiveBuilder::new();
        builder.add_bytes("a.txt", b"hello".to_vec());
        let tar = builder.tar_bytes().unwrap();
        assert_eq!(tar.len() % TAR_BLOCK_LEN, 0);
        assert_eq!(tar.len(), 4 * TAR_BLOCK_LEN, "header, payload, two end blocks");
        assert!(checksum_ok(&tar[..TAR_BLOCK_LEN]));
        assert_eq!(&tar[257..262], b"ustar");
        assert_eq!(&tar[100..108], b"0000644\0");
        assert_eq!(read_tar(&tar), vec![("a.txt".to_string(), b"hello".to_vec())]);
    }

    #[test]
    fn long_names_use_longname_records() {
        let long = format!("{}/file.java", "deeply/nested".repeat(12));
        assert!(long.len() > 100);
        let mut builder = ArchiveBuilder::new();
        builder.add_bytes(long.clone(), b"class A {}".to_vec());
        let tar = builder.tar_bytes().unwrap();
        assert_eq!(tar[156], b'L');
        assert!(checksum_ok(&tar[..TAR_BLOCK_LEN]));
        let entries = read_tar(&tar);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, long);
    }

    #[test]
    fn directories_are_walked_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("pkg")).unwrap();
        fs::write(src.join("Main.java"), "main").unwrap();
        fs::write(src.join("pkg/Util.java"), "util").unwrap();
        let mut builder = ArchiveBuilder::new();
        builder.add_path("src", &src).unwrap();
        assert_eq!(
            builder.names().collect::<Vec<_>>(),
            vec!["src/Main.java", "src/pkg/Util.java"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn file_permission_bits_are_kept() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("build.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let plain = dir.path().join("A.java");
        fs::write(&plain, "class A {}").unwrap();
        fs::set_permissions(&plain, fs::Permissions::from_mode(0o600)).unwrap();

        let mut builder = ArchiveBuilder::new();
        builder.add_path("build.sh", &script).unwrap();
        builder.add_path("A.java", &plain).unwrap();
        let tar = builder.tar_bytes().unwrap();
        // A.java sorts first: header, one payload block, then build.sh.
        let second = 2 * TAR_BLOCK_LEN;
        assert_eq!(&tar[100..108], b"0000600\0");
        assert_eq!(&tar[second..second + 8], b"build.sh");
        assert_eq!(&tar[second + 100..second + 108], b"0000755\0");
        assert!(checksum_ok(&tar[second..second + TAR_BLOCK_LEN]));
    }

    #[test]
    fn package_writes_artifact_sources_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("benchmarks/app/src")).unwrap();
        fs::write(root.join("benchmarks/app/app.jar"), "jar").unwrap();
        fs::write(root.join("benchmarks/app/src/A.java"), "class A {}").unwrap();
        let target = Target::new(
            root.join("benchmarks/app/app.jar"),
            vec![root.join("benchmarks/app/src")],
        );
        let violation = sample();
        let (_, edge) = violation.edges().next().unwrap();
        let record = ArchiveRecord::new(&violation, edge.clone());
        let archive = root.join("reduced.tar.gz");

        package(&archive, root, &target, &record).unwrap();

        let mut tar = Vec::new();
        GzDecoder::new(fs::File::open(&archive).unwrap())
            .read_to_end(&mut tar)
            .unwrap();
        let entries = read_tar(&tar);
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["benchmarks/app/app.jar", "benchmarks/app/src/A.java", "violation.json"]
        );
        let stored: ArchiveRecord = serde_json::from_slice(&entries[2].1).unwrap();
        assert_eq!(stored.edge, edge);
        assert_eq!(stored.expected_relation, "precision: high is at least as precise as low");
        assert_eq!(stored.observed_diffs.len(), 2);
    }

    #[test]
    fn existing_archive_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("reduced.tar.gz");
        fs::write(&archive, "previous").unwrap();
        let mut builder = ArchiveBuilder::new();
        builder.add_bytes("x", vec![1]);
        assert!(matches!(builder.write_to(&archive), Err(ArchiveError::Exists(_))));
        assert_eq!(fs::read_to_string(&archive).unwrap(), "previous");
    }
}
