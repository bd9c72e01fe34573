//! Tests for bundle run configuration parsing.
//!
//! Validates required keys, command shapes, volume normalization, the
//! validation order of volume entries, and dump/parse round trips.

use bundlerun::{BundleConfig, CommandSpec, Error, VolumeMode, VolumeSpec};

// =============================================================================
// Required Keys
// =============================================================================

#[test]
fn test_minimal_config() {
    let config = BundleConfig::parse(r#"name = "demo""#).unwrap();
    assert_eq!(config.name(), "demo");
    assert!(config.cmd().is_none());
    assert!(config.entrypoint().is_none());
    assert!(config.volumes().is_empty());
}

#[test]
fn test_missing_name() {
    let err = BundleConfig::parse(r#"cmd = "echo hi""#).unwrap_err();
    match &err {
        Error::MissingKey { key, .. } => assert_eq!(key, "name"),
        other => panic!("expected MissingKey, got {:?}", other),
    }
    assert!(err.to_string().contains("name"), "message should name the key");
    assert!(err.is_config_error());
}

#[test]
fn test_invalid_toml() {
    let err = BundleConfig::parse("name = ").unwrap_err();
    assert!(matches!(err, Error::ConfigParse(_)));
    assert!(err.is_config_error());
}

#[test]
fn test_unknown_top_level_keys_ignored() {
    let config = BundleConfig::parse("name = \"demo\"\nowner = \"ops\"").unwrap();
    assert_eq!(config, BundleConfig::new("demo").unwrap());
}

// =============================================================================
// cmd / entrypoint
// =============================================================================

#[test]
fn test_cmd_string_and_array() {
    let config = BundleConfig::parse(
        r#"
name = "demo"
cmd = "python main.py"
entrypoint = ["/bin/sh", "-c"]
"#,
    )
    .unwrap();

    assert_eq!(
        config.cmd(),
        Some(&CommandSpec::Shell("python main.py".to_string()))
    );
    assert_eq!(
        config.entrypoint(),
        Some(&CommandSpec::Exec(vec!["/bin/sh".to_string(), "-c".to_string()]))
    );
    assert_eq!(config.cmd().unwrap().to_args(), vec!["python", "main.py"]);
}

#[test]
fn test_cmd_array_with_non_string() {
    let err = BundleConfig::parse(
        r#"
name = "demo"
cmd = ["echo", 1]
"#,
    )
    .unwrap_err();
    match err {
        Error::InvalidType { key, .. } => assert_eq!(key, "cmd[1]"),
        other => panic!("expected InvalidType, got {:?}", other),
    }
}

#[test]
fn test_entrypoint_wrong_type() {
    let err = BundleConfig::parse(
        r#"
name = "demo"
entrypoint = 5
"#,
    )
    .unwrap_err();
    match err {
        Error::InvalidType { key, .. } => assert_eq!(key, "entrypoint"),
        other => panic!("expected InvalidType, got {:?}", other),
    }
}

// =============================================================================
// Volumes
// =============================================================================

#[test]
fn test_volume_shorthand_normalized() {
    let config = BundleConfig::parse(
        r#"
name = "demo"
volumes = { "data.txt" = "/data.txt" }
"#,
    )
    .unwrap();

    let spec = &config.volumes()["data.txt"];
    assert_eq!(spec, &VolumeSpec::new("/data.txt"));
    assert_eq!(spec.mode, VolumeMode::ReadWrite);
}

#[test]
fn test_volume_mapping_unchanged() {
    let config = BundleConfig::parse(
        r#"
name = "demo"

[volumes]
cache = { bind = "/cache", mode = "ro" }
scratch = { bind = "/scratch", mode = "rw" }
"#,
    )
    .unwrap();

    assert_eq!(config.volumes()["cache"], VolumeSpec::read_only("/cache"));
    assert_eq!(config.volumes()["scratch"], VolumeSpec::new("/scratch"));
}

#[test]
fn test_volume_missing_bind() {
    let err = BundleConfig::parse(
        r#"
name = "demo"
volumes = { cache = { mode = "ro" } }
"#,
    )
    .unwrap_err();
    match &err {
        Error::MissingKey { key, context } => {
            assert_eq!(key, "bind");
            assert!(context.contains("cache"));
        }
        other => panic!("expected MissingKey, got {:?}", other),
    }
}

#[test]
fn test_volume_missing_mode() {
    let err = BundleConfig::parse(
        r#"
name = "demo"
volumes = { cache = { bind = "/cache" } }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::MissingKey { ref key, .. } if key == "mode"));
}

#[test]
fn test_volume_bind_wrong_type() {
    let err = BundleConfig::parse(
        r#"
name = "demo"
volumes = { cache = { bind = 3, mode = "ro" } }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidType { ref key, .. } if key == "volumes.cache.bind"));
}

#[test]
fn test_volume_invalid_mode() {
    let err = BundleConfig::parse(
        r#"
name = "demo"
volumes = { cache = { bind = "/cache", mode = "wo" } }
"#,
    )
    .unwrap_err();
    match &err {
        Error::InvalidValue { key, value, .. } => {
            assert_eq!(key, "volumes.cache.mode");
            assert_eq!(value, "wo");
        }
        other => panic!("expected InvalidValue, got {:?}", other),
    }
}

#[test]
fn test_volume_extra_key() {
    let err = BundleConfig::parse(
        r#"
name = "demo"
volumes = { cache = { bind = "/cache", mode = "ro", driver = "local" } }
"#,
    )
    .unwrap_err();
    match &err {
        Error::InvalidKey { key, .. } => assert_eq!(key, "driver"),
        other => panic!("expected InvalidKey, got {:?}", other),
    }
    assert!(err.to_string().contains("driver"));
}

#[test]
fn test_volume_bind_checked_before_extra_keys() {
    // Missing bind wins over an unexpected key in the same entry.
    let err = BundleConfig::parse(
        r#"
name = "demo"
volumes = { cache = { mode = "ro", driver = "local" } }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::MissingKey { ref key, .. } if key == "bind"));
}

#[test]
fn test_volume_value_wrong_type() {
    let err = BundleConfig::parse(
        r#"
name = "demo"
volumes = { cache = 7 }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidType { .. }));
}

#[test]
fn test_volumes_not_a_table() {
    let err = BundleConfig::parse(
        r#"
name = "demo"
volumes = ["a"]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidType { ref key, .. } if key == "volumes"));
}

// =============================================================================
// Serialization
// =============================================================================

#[test]
fn test_dumps_parse_roundtrip() {
    let configs = vec![
        BundleConfig::new("demo").unwrap(),
        BundleConfig::new("shell")
            .unwrap()
            .with_cmd(Some(CommandSpec::from("echo 'hello world'"))),
        BundleConfig::new("full")
            .unwrap()
            .with_entrypoint(Some(CommandSpec::from(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
            ])))
            .with_cmd(Some(CommandSpec::from(vec!["run.sh".to_string()])))
            .with_volume("data.txt", VolumeSpec::new("/data.txt"))
            .with_volume("nested/dir", VolumeSpec::read_only("/in"))
            .with_volume("myvol", VolumeSpec::new("/data/")),
    ];

    for config in configs {
        let text = config.dumps().unwrap();
        let reparsed = BundleConfig::parse(&text).unwrap();
        assert_eq!(reparsed, config, "round trip failed for:\n{}", text);
    }
}

#[test]
fn test_shorthand_dumps_expanded() {
    let config = BundleConfig::parse(
        r#"
name = "demo"
volumes = { "data.txt" = "/data.txt" }
"#,
    )
    .unwrap();

    let text = config.dumps().unwrap();
    assert!(text.contains("bind"));
    assert!(text.contains("mode"));
    assert_eq!(BundleConfig::parse(&text).unwrap(), config);
}

#[test]
fn test_dump_and_load() {
    let config = BundleConfig::new("io")
        .unwrap()
        .with_cmd(Some(CommandSpec::from("true")));

    let mut buf = Vec::new();
    config.dump(&mut buf).unwrap();
    let loaded = BundleConfig::load(buf.as_slice()).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_with_helpers_do_not_mutate() {
    let base = BundleConfig::new("base").unwrap();
    let changed = base.with_volume("x", VolumeSpec::new("/x"));
    assert!(base.volumes().is_empty());
    assert_eq!(changed.volumes().len(), 1);
}
