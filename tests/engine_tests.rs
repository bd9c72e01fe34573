//! Tests for the docker engine over a recording container backend.
//!
//! The backend never talks to a daemon; it records every request and
//! snapshots what the bundle looked like on disk while the engine held it.

use async_trait::async_trait;
use bundlerun::engine::{BuildRequest, ImageInfo, RunRequest};
use bundlerun::{
    BUNDLE_CONFIG_FILENAME, BundleInfo, ContainerBackend, DIGEST_LABEL, DockerEngine, Engine,
    Error, ExecutionOutput, Mount, VolumeMode, create_bundle_in,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const IMAGE_ID: &str = "sha256:0123456789abcdef0123456789abcdef";

/// A run request plus the contents of each bind source at run time.
#[derive(Debug, Clone)]
struct RecordedRun {
    request: RunRequest,
    bind_contents: Vec<Option<String>>,
}

#[derive(Default)]
struct RecordingBackend {
    builds: Mutex<Vec<(BuildRequest, bool)>>,
    volumes: Mutex<Vec<String>>,
    runs: Mutex<Vec<RecordedRun>>,
    exit_code: i32,
    fail_build: bool,
}

impl RecordingBackend {
    fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    fn failing_build() -> Self {
        Self {
            fail_build: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ContainerBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn build_image(&self, request: &BuildRequest) -> bundlerun::Result<ImageInfo> {
        let has_config = request.context_dir.join(BUNDLE_CONFIG_FILENAME).is_file();
        self.builds.lock().unwrap().push((request.clone(), has_config));

        if self.fail_build {
            return Err(Error::BuildFailed {
                name: request.tag.clone(),
                reason: "no base image".to_string(),
            });
        }
        Ok(ImageInfo {
            id: IMAGE_ID.to_string(),
            tags: vec![request.tag.clone()],
            labels: request.labels.clone(),
        })
    }

    async fn create_volume(&self, name: &str) -> bundlerun::Result<()> {
        self.volumes.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn run(&self, request: &RunRequest) -> bundlerun::Result<ExecutionOutput> {
        let bind_contents = request
            .mounts
            .iter()
            .map(|m| match m {
                Mount::Bind { source, .. } => fs::read_to_string(source).ok(),
                Mount::Volume { .. } => None,
            })
            .collect();
        self.runs.lock().unwrap().push(RecordedRun {
            request: request.clone(),
            bind_contents,
        });

        Ok(ExecutionOutput {
            exit_code: self.exit_code,
            stdout: b"hello\n".to_vec(),
            stderr: if self.exit_code == 0 {
                Vec::new()
            } else {
                b"boom\n".to_vec()
            },
        })
    }
}

fn bundle_with(dir: &Path, config: &str, files: &[(&str, &str)]) -> BundleInfo {
    fs::write(dir.join(BUNDLE_CONFIG_FILENAME), config).unwrap();
    for (name, content) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    create_bundle_in(dir, dir.join("out")).unwrap()
}

fn engine(backend: RecordingBackend, scratch: &Path) -> DockerEngine<RecordingBackend> {
    DockerEngine::new(backend).with_scratch_root(scratch)
}

fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}

// =============================================================================
// Build
// =============================================================================

#[tokio::test]
async fn test_build_tags_and_labels_image() {
    let src = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let bundle = bundle_with(src.path(), "name = \"Hello World\"\ncmd = \"echo hi\"\n", &[]);
    let engine = engine(RecordingBackend::default(), scratch.path());

    let artifact = engine.build(&bundle).await.unwrap();

    assert_eq!(artifact.id, IMAGE_ID);
    assert_eq!(artifact.bundle, bundle);
    assert_eq!(
        artifact.metadata["short_id"],
        serde_json::json!("0123456789ab")
    );
    assert_eq!(
        artifact.metadata["tags"],
        serde_json::json!(["bundlerun.runner/hello-world"])
    );

    let builds = engine.backend().builds.lock().unwrap().clone();
    assert_eq!(builds.len(), 1);
    let (request, had_config) = &builds[0];
    assert!(had_config, "build context should hold the extracted bundle");
    assert_eq!(request.labels[DIGEST_LABEL], bundle.digest());
    assert!(
        !request.context_dir.exists(),
        "build context should be removed after build"
    );
}

#[tokio::test]
async fn test_build_failure_propagates() {
    let src = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let bundle = bundle_with(src.path(), "name = \"broken\"\n", &[]);
    let engine = engine(RecordingBackend::failing_build(), scratch.path());

    let err = engine.build(&bundle).await.unwrap_err();
    assert!(matches!(err, Error::BuildFailed { .. }));
    assert!(dir_is_empty(scratch.path()));
}

// =============================================================================
// Execute
// =============================================================================

#[tokio::test]
async fn test_execute_binds_bundle_file() {
    let src = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let bundle = bundle_with(
        src.path(),
        r#"
name = "bind"
cmd = "cat /data.txt"
volumes = { "data.txt" = "/data.txt" }
"#,
        &[("data.txt", "payload")],
    );
    let engine = engine(RecordingBackend::default(), scratch.path());

    let artifact = engine.build(&bundle).await.unwrap();
    let output = engine.execute(&artifact).await.unwrap();
    assert_eq!(output.stdout_lossy(), "hello\n");

    let runs = engine.backend().runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.request.image, IMAGE_ID);
    assert_eq!(run.request.args, vec!["cat", "/data.txt"]);

    match &run.request.mounts[..] {
        [Mount::Bind { source, target, mode }] => {
            assert!(source.is_absolute());
            assert!(source.ends_with("data.txt"));
            assert_eq!(target, "/data.txt");
            assert_eq!(*mode, VolumeMode::ReadWrite);
        }
        other => panic!("expected one bind mount, got {:?}", other),
    }
    assert_eq!(run.bind_contents, vec![Some("payload".to_string())]);
    assert!(engine.backend().volumes.lock().unwrap().is_empty());
    assert!(dir_is_empty(scratch.path()), "scratch should be removed");
}

#[tokio::test]
async fn test_execute_creates_named_volume() {
    let src = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let bundle = bundle_with(
        src.path(),
        r#"
name = "named"

[volumes]
myvol = { bind = "/data/", mode = "ro" }
"#,
        &[],
    );
    let engine = engine(RecordingBackend::default(), scratch.path());

    let artifact = engine.build(&bundle).await.unwrap();
    engine.execute(&artifact).await.unwrap();

    assert_eq!(
        engine.backend().volumes.lock().unwrap().clone(),
        vec!["myvol".to_string()]
    );
    let runs = engine.backend().runs.lock().unwrap().clone();
    assert_eq!(
        runs[0].request.mounts,
        vec![Mount::Volume {
            name: "myvol".to_string(),
            target: "/data/".to_string(),
            mode: VolumeMode::ReadOnly,
        }]
    );
}

#[tokio::test]
async fn test_execute_binds_nested_directory() {
    let src = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let bundle = bundle_with(
        src.path(),
        r#"
name = "nested"
volumes = { "inputs/set1" = "/in" }
"#,
        &[("inputs/set1/a.csv", "1,2"), ("inputs/other.txt", "no")],
    );
    let engine = engine(RecordingBackend::default(), scratch.path());

    let artifact = engine.build(&bundle).await.unwrap();
    engine.execute(&artifact).await.unwrap();

    let runs = engine.backend().runs.lock().unwrap().clone();
    match &runs[0].request.mounts[..] {
        [Mount::Bind { source, target, .. }] => {
            assert!(source.ends_with(PathBuf::from("inputs").join("set1")));
            assert_eq!(target, "/in");
        }
        other => panic!("expected one bind mount, got {:?}", other),
    }
}

#[tokio::test]
async fn test_execute_missing_nested_volume_file() {
    let src = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let bundle = bundle_with(
        src.path(),
        r#"
name = "missing"
volumes = { "nested/missing.txt" = "/x" }
"#,
        &[],
    );
    let engine = engine(RecordingBackend::default(), scratch.path());

    let artifact = engine.build(&bundle).await.unwrap();
    let err = engine.execute(&artifact).await.unwrap_err();

    match &err {
        Error::MissingVolumeFile { path } => assert_eq!(path, "nested/missing.txt"),
        other => panic!("expected MissingVolumeFile, got {:?}", other),
    }
    assert!(err.to_string().contains("nested/missing.txt"));
    assert!(engine.backend().runs.lock().unwrap().is_empty());
    assert!(dir_is_empty(scratch.path()));
}

#[tokio::test]
async fn test_execute_nonzero_exit_is_run_failed() {
    let src = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let bundle = bundle_with(src.path(), "name = \"fails\"\ncmd = \"false\"\n", &[]);
    let engine = engine(RecordingBackend::exiting_with(3), scratch.path());

    let artifact = engine.build(&bundle).await.unwrap();
    let err = engine.execute(&artifact).await.unwrap_err();

    match err {
        Error::RunFailed {
            artifact: id,
            exit_code,
            stderr,
        } => {
            assert_eq!(id, IMAGE_ID);
            assert_eq!(exit_code, 3);
            assert_eq!(stderr, "boom");
        }
        other => panic!("expected RunFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_execute_entrypoint_override() {
    let src = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let bundle = bundle_with(
        src.path(),
        r#"
name = "ep"
entrypoint = ["/bin/sh", "-c"]
cmd = ["echo hello"]
"#,
        &[],
    );
    let engine = engine(RecordingBackend::default(), scratch.path());

    let artifact = engine.build(&bundle).await.unwrap();
    engine.execute(&artifact).await.unwrap();

    let runs = engine.backend().runs.lock().unwrap().clone();
    assert_eq!(runs[0].request.entrypoint.as_deref(), Some("/bin/sh"));
    assert_eq!(runs[0].request.args, vec!["-c", "echo hello"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_execute_rejects_links_leaving_bundle() {
    use std::os::unix::fs::symlink;

    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("secret.txt"), "host only").unwrap();

    for (key, link_target) in [
        ("data.txt", outside.path().join("secret.txt")),
        ("hostroot", outside.path().to_path_buf()),
    ] {
        let src = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        symlink(&link_target, src.path().join(key)).unwrap();
        let config = format!("name = \"escape\"\nvolumes = {{ \"{}\" = \"/mnt\" }}\n", key);
        let bundle = bundle_with(src.path(), &config, &[]);
        let engine = engine(RecordingBackend::default(), scratch.path());

        let artifact = engine.build(&bundle).await.unwrap();
        let err = engine.execute(&artifact).await.unwrap_err();

        match &err {
            Error::PathTraversal { path } => assert_eq!(path, key),
            other => panic!("expected PathTraversal for {}, got {:?}", key, other),
        }
        assert!(engine.backend().runs.lock().unwrap().is_empty());
        assert!(dir_is_empty(scratch.path()));
    }
}

// =============================================================================
// Docker CLI
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_docker_run_timeout_removes_container() {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    let dir = TempDir::new().unwrap();
    let log = dir.path().join("calls.log");
    let script = dir.path().join("docker");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\nif [ \"$1\" = run ]; then exec sleep 10; fi\n",
            log.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let cli = bundlerun::DockerCli::new(script.to_string_lossy())
        .with_run_timeout(Duration::from_millis(500));
    let request = RunRequest {
        image: "img".to_string(),
        name: Some("bundlerun-test-1".to_string()),
        ..RunRequest::default()
    };

    let err = cli.run(&request).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    let calls = fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines[0], "run --rm --name bundlerun-test-1 img");
    assert_eq!(lines[1], "rm -f bundlerun-test-1");
}
