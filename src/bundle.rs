//! Content-addressed bundle archives.
//!
//! A bundle is a directory containing a `bundlerun.toml` run configuration
//! plus any files the job needs. [`create_bundle`] packs the directory into a
//! plain tar archive and names the archive after the SHA-256 of its bytes:
//!
//! ```text
//! project/                         /tmp/
//! ├── bundlerun.toml      ──►      └── 9f86d0...0a08.bundle
//! ├── main.sh                           ├── bundlerun.toml
//! ├── data/input.csv                    ├── data/
//! └── .git/  (excluded)                 ├── data/input.csv
//!                                       └── main.sh
//! ```
//!
//! ## Determinism
//!
//! Entries are written in sorted order with zeroed mtime/uid/gid, so the
//! same directory contents always produce the same digest and therefore the
//! same storage identifier.
//!
//! ## Integrity
//!
//! The archive name is its own checksum. Loading an archive
//! ([`BundleInfo::from_archive`]) does not re-hash it; call
//! [`BundleInfo::verify`] to detect corruption.
//!
//! ## Security
//!
//! Extraction rejects absolute entry paths and `..` components, and bounds
//! the total unpacked size by [`MAX_ARCHIVE_SIZE`].

use crate::config::BundleConfig;
use crate::constants::{
    BUNDLE_CONFIG_FILENAME, BUNDLE_EXTENSION, DIGEST_BUFFER_SIZE, MAX_ARCHIVE_SIZE,
    MAX_CONFIG_SIZE, SHA256_HEX_LEN, is_vcs_path, validate_relative_path,
};
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, info};

const PARTIAL_PREFIX: &str = ".bundle-";
const PARTIAL_SUFFIX: &str = ".tar.partial";

// =============================================================================
// Bundle Info
// =============================================================================

/// A bundle archive on disk together with its parsed configuration.
///
/// `BundleInfo` only records where the archive lives; deleting the archive
/// is the holder's responsibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    config: BundleConfig,
    archive_path: PathBuf,
}

impl BundleInfo {
    /// Pairs a config with an archive path without touching the filesystem.
    pub fn new(config: BundleConfig, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            archive_path: archive_path.into(),
        }
    }

    /// Opens an archive and parses its embedded `bundlerun.toml`.
    ///
    /// The digest is not checked here; see [`BundleInfo::verify`].
    pub fn from_archive(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut archive = Archive::new(BufReader::new(File::open(path)?));

        for entry in archive.entries()? {
            let entry = entry?;
            if normalize_entry_path(&entry.path()?) != Path::new(BUNDLE_CONFIG_FILENAME) {
                continue;
            }

            if entry.size() > MAX_CONFIG_SIZE {
                return Err(Error::ConfigParse(format!(
                    "{} in {} exceeds limit of {} bytes",
                    BUNDLE_CONFIG_FILENAME,
                    path.display(),
                    MAX_CONFIG_SIZE
                )));
            }

            let config = BundleConfig::load(entry)?;
            debug!("Loaded bundle '{}' from {}", config.name(), path.display());
            return Ok(Self::new(config, path));
        }

        Err(Error::BundleConfigNotPresent {
            path: path.to_path_buf(),
        })
    }

    /// Parsed run configuration.
    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Path of the archive file.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Storage identifier: the archive file name (`<digest>.bundle`).
    pub fn storage_id(&self) -> String {
        self.archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Digest encoded in the archive name (the file stem).
    pub fn digest(&self) -> String {
        self.archive_path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Re-hashes the archive and compares against its name.
    pub fn verify(&self) -> Result<()> {
        verify_archive(&self.archive_path)
    }
}

// =============================================================================
// Bundle Creation
// =============================================================================

/// Packages `directory` into an archive in the system temp directory.
pub fn create_bundle(directory: impl AsRef<Path>) -> Result<BundleInfo> {
    create_bundle_in(directory, std::env::temp_dir())
}

/// Packages `directory` into a content-addressed archive under `out_dir`.
///
/// Fails with [`Error::BundleConfigNotPresent`] if `directory` has no
/// `bundlerun.toml` at its top level.
pub fn create_bundle_in(directory: impl AsRef<Path>, out_dir: impl AsRef<Path>) -> Result<BundleInfo> {
    let directory = directory.as_ref();
    let out_dir = out_dir.as_ref();

    let config_path = directory.join(BUNDLE_CONFIG_FILENAME);
    let config_file = match File::open(&config_path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::BundleConfigNotPresent {
                path: directory.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    if !config_path.is_file() {
        return Err(Error::BundleConfigNotPresent {
            path: directory.to_path_buf(),
        });
    }
    let config = BundleConfig::load(config_file)?;

    fs::create_dir_all(out_dir)?;

    // Digest is computed over the finished temp file, before the rename.
    let temp = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(out_dir)?;
    {
        let mut builder = Builder::new(BufWriter::new(temp.as_file()));
        builder.follow_symlinks(false);
        append_directory(&mut builder, directory, Path::new(""))?;
        builder.into_inner()?.flush()?;
    }

    let digest = compute_digest(temp.path())?;
    let archive_path = out_dir.join(format!("{}.{}", digest, BUNDLE_EXTENSION));
    temp.persist(&archive_path).map_err(|e| Error::Io(e.error))?;

    info!(
        "Created bundle '{}' at {}",
        config.name(),
        archive_path.display()
    );

    Ok(BundleInfo::new(config, archive_path))
}

/// Recursively appends `root/rel` to the archive in sorted order, skipping
/// version-control directories.
fn append_directory<W: Write>(builder: &mut Builder<W>, root: &Path, rel: &Path) -> Result<()> {
    let mut entries = fs::read_dir(root.join(rel))?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let archive_name = rel.join(&name);
        let full_path = entry.path();
        let meta = fs::symlink_metadata(&full_path)?;

        if meta.is_dir() {
            if is_vcs_path(Path::new(&name)) {
                debug!("Skipping VCS directory {}", full_path.display());
                continue;
            }
            let mut header = normalized_header(EntryType::Directory, file_mode(&meta, 0o755), 0);
            builder.append_data(&mut header, &archive_name, io::empty())?;
            append_directory(builder, root, &archive_name)?;
        } else if meta.file_type().is_symlink() {
            let target = fs::read_link(&full_path)?;
            let mut header = normalized_header(EntryType::Symlink, 0o777, 0);
            builder.append_link(&mut header, &archive_name, &target)?;
        } else if meta.is_file() {
            if is_partial_archive(&name.to_string_lossy()) {
                continue;
            }
            let mut header = normalized_header(EntryType::Regular, file_mode(&meta, 0o644), meta.len());
            builder.append_data(&mut header, &archive_name, File::open(&full_path)?)?;
        } else {
            debug!("Skipping special file {}", full_path.display());
        }
    }

    Ok(())
}

/// In-progress archives, including the one being written when `out_dir`
/// lies inside the bundled directory.
fn is_partial_archive(name: &str) -> bool {
    name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX)
}

fn normalized_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata, default: u32) -> u32 {
    default
}

// =============================================================================
// Digests
// =============================================================================

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn compute_digest(path: impl AsRef<Path>) -> Result<String> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Checks that an archive is named `<hex sha256>.bundle` and that its bytes
/// hash to that name.
pub fn verify_archive(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let invalid = |reason: &str| Error::InvalidArchiveName {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if path.extension().and_then(|e| e.to_str()) != Some(BUNDLE_EXTENSION) {
        return Err(invalid("wrong extension"));
    }
    let expected = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid("missing file stem"))?;
    if expected.len() != SHA256_HEX_LEN || !expected.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("file stem is not a sha256 hex digest"));
    }

    let computed = compute_digest(path)?;
    if !computed.eq_ignore_ascii_case(expected) {
        return Err(Error::DigestMismatch {
            expected: expected.to_string(),
            computed,
        });
    }

    debug!("Verified archive {}", path.display());
    Ok(())
}

// =============================================================================
// Inspection and Extraction
// =============================================================================

/// Lists entry names in archive order.
pub fn archive_entries(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut archive = Archive::new(BufReader::new(File::open(path.as_ref())?));
    let mut names = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        names.push(normalize_entry_path(&entry.path()?).to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Extracts every entry of the bundle under `destination`.
pub fn extract(bundle: &BundleInfo, destination: impl AsRef<Path>) -> Result<()> {
    let destination = destination.as_ref();
    let count = extract_matching(bundle.archive_path(), destination, |_| true)?;
    debug!(
        "Extracted {} entries of '{}' into {}",
        count,
        bundle.config().name(),
        destination.display()
    );
    Ok(())
}

/// Extracts only the entries referenced by the bundle's volume keys (the
/// key itself and anything beneath it).
///
/// Keys that are not safe relative paths are ignored here; mount resolution
/// reports them.
pub fn extract_volume_files(bundle: &BundleInfo, destination: impl AsRef<Path>) -> Result<()> {
    let destination = destination.as_ref();
    let keys: Vec<PathBuf> = bundle
        .config()
        .volumes()
        .keys()
        .filter(|k| validate_relative_path(k).is_ok())
        .map(|k| normalize_entry_path(Path::new(k)))
        .filter(|k| !k.as_os_str().is_empty())
        .collect();

    if keys.is_empty() {
        return Ok(());
    }

    let count = extract_matching(bundle.archive_path(), destination, |entry_path| {
        keys.iter().any(|k| entry_path.starts_with(k))
    })?;
    debug!(
        "Extracted {} volume entries of '{}' into {}",
        count,
        bundle.config().name(),
        destination.display()
    );
    Ok(())
}

fn extract_matching(
    archive_path: &Path,
    destination: &Path,
    mut select: impl FnMut(&Path) -> bool,
) -> Result<usize> {
    fs::create_dir_all(destination)?;
    let mut archive = Archive::new(BufReader::new(File::open(archive_path)?));
    let mut total_size = 0u64;
    let mut count = 0usize;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        // SECURITY: Check for path traversal
        let path_str = path.to_string_lossy();
        if validate_relative_path(&path_str).is_err() {
            return Err(Error::PathTraversal {
                path: path_str.into_owned(),
            });
        }

        let normalized = normalize_entry_path(&path);
        if normalized.as_os_str().is_empty() || !select(&normalized) {
            continue;
        }

        total_size += entry.size();
        if total_size > MAX_ARCHIVE_SIZE {
            return Err(Error::ArchiveTooLarge {
                size: total_size,
                limit: MAX_ARCHIVE_SIZE,
            });
        }

        entry.unpack_in(destination)?;
        count += 1;
    }

    Ok(count)
}

/// Strips `.` components and trailing separators from an entry path.
fn normalize_entry_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
