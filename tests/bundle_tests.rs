//! Tests for bundle archive creation, loading and extraction.
//!
//! Includes security tests for:
//! - Path traversal protection on extraction
//! - Digest verification of archive names
//! - Version-control directory exclusion

use bundlerun::bundle::{
    BundleInfo, archive_entries, compute_digest, create_bundle, create_bundle_in, extract,
    extract_volume_files, verify_archive,
};
use bundlerun::{BUNDLE_CONFIG_FILENAME, BundleConfig, Error};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_config(dir: &Path, text: &str) {
    fs::write(dir.join(BUNDLE_CONFIG_FILENAME), text).unwrap();
}

/// Writes a tar whose single entry has a raw, unvalidated name.
fn write_raw_tar(path: &Path, entry_name: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    let name = entry_name.as_bytes();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let mut builder = tar::Builder::new(fs::File::create(path).unwrap());
    builder.append(&header, data).unwrap();
    builder.finish().unwrap();
}

// =============================================================================
// Creation
// =============================================================================

#[test]
fn test_config_only_directory() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "demo""#);

    let bundle = create_bundle_in(src.path(), out.path()).unwrap();

    assert_eq!(
        archive_entries(bundle.archive_path()).unwrap(),
        vec![BUNDLE_CONFIG_FILENAME]
    );
    assert_eq!(bundle.config().name(), "demo");
    assert!(bundle.config().cmd().is_none());
    assert!(bundle.config().entrypoint().is_none());
    assert!(bundle.config().volumes().is_empty());
}

#[test]
fn test_output_dir_inside_source() {
    let src = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "self""#);

    let bundle = create_bundle_in(src.path(), src.path().join("dist")).unwrap();

    let entries = archive_entries(bundle.archive_path()).unwrap();
    assert!(
        entries.iter().all(|e| !e.ends_with(".tar.partial")),
        "in-progress archive must not be archived: {:?}",
        entries
    );
    bundle.verify().unwrap();
}

#[test]
fn test_missing_config() {
    let src = TempDir::new().unwrap();
    fs::write(src.path().join("main.sh"), "echo hi").unwrap();

    let err = create_bundle_in(src.path(), src.path()).unwrap_err();
    match err {
        Error::BundleConfigNotPresent { path } => assert_eq!(path, src.path()),
        other => panic!("expected BundleConfigNotPresent, got {:?}", other),
    }
}

#[test]
fn test_config_in_subdirectory_does_not_count() {
    let src = TempDir::new().unwrap();
    fs::create_dir(src.path().join("sub")).unwrap();
    write_config(&src.path().join("sub"), r#"name = "nested""#);

    let err = create_bundle_in(src.path(), src.path().join("out")).unwrap_err();
    assert!(matches!(err, Error::BundleConfigNotPresent { .. }));
}

#[test]
fn test_invalid_config_fails_creation() {
    let src = TempDir::new().unwrap();
    write_config(src.path(), r#"cmd = "echo""#);

    let err = create_bundle_in(src.path(), src.path().join("out")).unwrap_err();
    assert!(matches!(err, Error::MissingKey { .. }));
}

#[test]
fn test_entries_sorted_and_recursive() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "tree""#);
    fs::create_dir_all(src.path().join("data/inner")).unwrap();
    fs::write(src.path().join("data/inner/b.txt"), "b").unwrap();
    fs::write(src.path().join("data/a.txt"), "a").unwrap();
    fs::write(src.path().join("main.sh"), "echo").unwrap();

    let bundle = create_bundle_in(src.path(), out.path()).unwrap();

    assert_eq!(
        archive_entries(bundle.archive_path()).unwrap(),
        vec![
            BUNDLE_CONFIG_FILENAME,
            "data",
            "data/a.txt",
            "data/inner",
            "data/inner/b.txt",
            "main.sh",
        ]
    );
}

#[test]
fn test_vcs_directories_excluded() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "vcs""#);
    for dir in [".git", ".hg", ".svn", "sub/.git"] {
        fs::create_dir_all(src.path().join(dir)).unwrap();
        fs::write(src.path().join(dir).join("config"), "x").unwrap();
    }
    fs::write(src.path().join("sub/keep.txt"), "k").unwrap();
    fs::write(src.path().join(".gitignore"), "target").unwrap();

    let bundle = create_bundle_in(src.path(), out.path()).unwrap();
    let entries = archive_entries(bundle.archive_path()).unwrap();

    for entry in &entries {
        assert!(
            !Path::new(entry)
                .components()
                .any(|c| [".git", ".hg", ".svn"].contains(&c.as_os_str().to_str().unwrap())),
            "VCS path archived: {}",
            entry
        );
    }
    assert!(entries.contains(&".gitignore".to_string()));
    assert!(entries.contains(&"sub/keep.txt".to_string()));
}

#[test]
fn test_create_bundle_uses_temp_dir() {
    let src = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "tmp""#);
    fs::write(src.path().join("unique.txt"), uuid::Uuid::now_v7().to_string()).unwrap();

    let bundle = create_bundle(src.path()).unwrap();
    assert!(bundle.archive_path().starts_with(std::env::temp_dir()));
    fs::remove_file(bundle.archive_path()).unwrap();
}

// =============================================================================
// Content Addressing
// =============================================================================

#[test]
fn test_name_is_sha256_of_bytes() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "digest""#);
    fs::write(src.path().join("payload.bin"), [0u8, 1, 2, 3]).unwrap();

    let bundle = create_bundle_in(src.path(), out.path()).unwrap();
    let bytes = fs::read(bundle.archive_path()).unwrap();
    let expected = hex::encode(Sha256::digest(&bytes));

    assert_eq!(bundle.digest(), expected);
    assert_eq!(bundle.storage_id(), format!("{}.bundle", expected));
    assert_eq!(compute_digest(bundle.archive_path()).unwrap(), expected);
    bundle.verify().unwrap();
}

#[test]
fn test_different_contents_different_names() {
    let out = TempDir::new().unwrap();
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write_config(a.path(), r#"name = "a""#);
    write_config(b.path(), r#"name = "b""#);

    let bundle_a = create_bundle_in(a.path(), out.path()).unwrap();
    let bundle_b = create_bundle_in(b.path(), out.path()).unwrap();
    assert_ne!(bundle_a.storage_id(), bundle_b.storage_id());
}

#[test]
fn test_verify_detects_corruption() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "corrupt""#);

    let bundle = create_bundle_in(src.path(), out.path()).unwrap();
    let mut bytes = fs::read(bundle.archive_path()).unwrap();
    bytes[600] ^= 0xff;
    fs::write(bundle.archive_path(), bytes).unwrap();

    let err = bundle.verify().unwrap_err();
    match err {
        Error::DigestMismatch { expected, computed } => {
            assert_eq!(expected, bundle.digest());
            assert_ne!(computed, expected);
        }
        other => panic!("expected DigestMismatch, got {:?}", other),
    }
}

#[test]
fn test_verify_rejects_bad_names() {
    let temp = TempDir::new().unwrap();
    for name in ["archive.tar", "abc.bundle", "noext"] {
        let path = temp.path().join(name);
        fs::write(&path, b"data").unwrap();
        assert!(
            matches!(verify_archive(&path), Err(Error::InvalidArchiveName { .. })),
            "{} should be rejected",
            name
        );
    }
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_from_archive_roundtrip() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_config(
        src.path(),
        r#"
name = "load"
cmd = ["python", "main.py"]
volumes = { "data.txt" = "/data.txt" }
"#,
    );
    fs::write(src.path().join("data.txt"), "x").unwrap();

    let created = create_bundle_in(src.path(), out.path()).unwrap();
    let loaded = BundleInfo::from_archive(created.archive_path()).unwrap();
    assert_eq!(loaded, created);
}

#[test]
fn test_from_archive_does_not_verify() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "renamed""#);

    let created = create_bundle_in(src.path(), out.path()).unwrap();
    let renamed = out.path().join(format!("{}.bundle", "0".repeat(64)));
    fs::rename(created.archive_path(), &renamed).unwrap();

    let loaded = BundleInfo::from_archive(&renamed).unwrap();
    assert_eq!(loaded.config().name(), "renamed");
    assert!(matches!(loaded.verify(), Err(Error::DigestMismatch { .. })));
}

#[test]
fn test_from_archive_without_config() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("noconfig.bundle");
    write_raw_tar(&path, "main.sh", b"echo hi");

    let err = BundleInfo::from_archive(&path).unwrap_err();
    assert!(matches!(err, Error::BundleConfigNotPresent { .. }));
}

// =============================================================================
// Extraction
// =============================================================================

#[test]
fn test_extract_all() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "extract""#);
    fs::create_dir(src.path().join("data")).unwrap();
    fs::write(src.path().join("data/input.csv"), "1,2,3").unwrap();

    let bundle = create_bundle_in(src.path(), out.path()).unwrap();
    extract(&bundle, dest.path()).unwrap();

    assert!(dest.path().join(BUNDLE_CONFIG_FILENAME).is_file());
    assert_eq!(
        fs::read_to_string(dest.path().join("data/input.csv")).unwrap(),
        "1,2,3"
    );
}

#[test]
fn test_extract_volume_files_only() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_config(
        src.path(),
        r#"
name = "volumes"

[volumes]
"data.txt" = "/data.txt"
"dir" = "/dir"
myvol = "/data/"
"#,
    );
    fs::write(src.path().join("data.txt"), "payload").unwrap();
    fs::write(src.path().join("data.txt2"), "not a volume").unwrap();
    fs::create_dir(src.path().join("dir")).unwrap();
    fs::write(src.path().join("dir/nested.txt"), "n").unwrap();
    fs::write(src.path().join("other.txt"), "o").unwrap();

    let bundle = create_bundle_in(src.path(), out.path()).unwrap();
    extract_volume_files(&bundle, dest.path()).unwrap();

    assert!(dest.path().join("data.txt").is_file());
    assert!(dest.path().join("dir/nested.txt").is_file());
    assert!(!dest.path().join("data.txt2").exists());
    assert!(!dest.path().join("other.txt").exists());
    assert!(!dest.path().join(BUNDLE_CONFIG_FILENAME).exists());
    assert!(!dest.path().join("myvol").exists());
}

#[test]
fn test_extract_rejects_parent_traversal() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("evil.bundle");
    write_raw_tar(&archive, "../evil.txt", b"owned");

    let bundle = BundleInfo::new(BundleConfig::new("evil").unwrap(), &archive);
    let dest = temp.path().join("dest");

    let err = extract(&bundle, &dest).unwrap_err();
    assert!(matches!(err, Error::PathTraversal { .. }));
    assert!(!temp.path().join("evil.txt").exists());
}

#[test]
fn test_extract_rejects_absolute_paths() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("abs.bundle");
    write_raw_tar(&archive, "/tmp/bundlerun-abs-evil.txt", b"owned");

    let bundle = BundleInfo::new(BundleConfig::new("abs").unwrap(), &archive);
    let err = extract(&bundle, temp.path().join("dest")).unwrap_err();
    assert!(matches!(err, Error::PathTraversal { .. }));
}

#[cfg(unix)]
#[test]
fn test_file_mode_preserved() {
    use std::os::unix::fs::PermissionsExt;

    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_config(src.path(), r#"name = "modes""#);
    let script = src.path().join("run.sh");
    fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let bundle = create_bundle_in(src.path(), out.path()).unwrap();
    extract(&bundle, dest.path()).unwrap();

    let mode = fs::metadata(dest.path().join("run.sh")).unwrap().permissions().mode();
    assert_ne!(mode & 0o111, 0, "executable bit should survive");
}
