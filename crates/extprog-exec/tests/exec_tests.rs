//! Directory + environment + executor working together, the way a lifecycle step uses them
#![cfg(unix)]

use extprog_core::{BridgeConfig, CaptureMode, CommandSpec, ManagedFile, Retention};
use extprog_exec::{CapturedOutput, CommandExecutor, FieldSet, InterchangeDir, ProgramEnv, ENV_MANAGED_FILES};
use tokio_util::sync::CancellationToken;

fn seeded() -> FieldSet {
    let mut fields = FieldSet::new();
    fields.insert_file(ManagedFile::Input, "ping");
    fields.insert_file(ManagedFile::Output, "");
    fields.insert_file(ManagedFile::Stdall, "");
    fields
}

#[tokio::test]
async fn program_sees_directory_through_env() {
    let base = tempfile::tempdir().unwrap();
    let config = BridgeConfig::with_tmpdir_base(base.path());
    let dir = InterchangeDir::open(&config, &seeded(), None, Retention::default())
        .await
        .unwrap();
    let env = ProgramEnv::for_dir(&dir).unwrap();
    assert_eq!(
        env.get(ENV_MANAGED_FILES).unwrap().to_str().unwrap(),
        "input:output:stdall"
    );

    let spec = CommandSpec::new([
        "sh",
        "-c",
        r#"printf '%s-pong' "$(cat "$TF_EXTERNAL_DIR_ABS/input")" > "$TF_EXTERNAL_DIR/output"; echo "files=$TF_EXTERNAL_MANAGED_FILES""#,
    ])
    .unwrap();
    let exec = CommandExecutor::new("read", &spec)
        .env(&env)
        .run_captured(dir.path(), CaptureMode::Combined, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        exec.output,
        CapturedOutput::Combined("files=input:output:stdall\n".into())
    );
    assert_eq!(dir.read_file("output").await.unwrap(), "ping-pong");
    assert_eq!(dir.read_file("stdall").await.unwrap(), "files=input:output:stdall\n");

    let path = dir.path().to_path_buf();
    dir.close(false).await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn failed_run_keeps_directory_on_error() {
    let base = tempfile::tempdir().unwrap();
    let config = BridgeConfig::with_tmpdir_base(base.path());
    let retention = Retention {
        keep_always: false,
        keep_on_error: true,
    };
    let dir = InterchangeDir::open(&config, &seeded(), None, retention).await.unwrap();
    let env = ProgramEnv::for_dir(&dir).unwrap();

    let spec = CommandSpec::new(["sh", "-c", "echo nope; exit 5"]).unwrap();
    let result = CommandExecutor::new("update", &spec)
        .env(&env)
        .run_captured(dir.path(), CaptureMode::Combined, &CancellationToken::new())
        .await;
    assert!(result.is_err());

    let path = dir.path().to_path_buf();
    dir.close(true).await.unwrap();
    assert!(path.join("stdall").exists());
}
