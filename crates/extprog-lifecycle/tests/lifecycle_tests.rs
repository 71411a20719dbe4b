//! Lifecycle tests: every verb against real `sh` programs in a scratch base directory
#![cfg(unix)]

use extprog_core::{BridgeConfig, CommandSpec, ResourceData, Severity, Verb};
use extprog_lifecycle::ExternalResource;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new(["sh", "-c", script]).unwrap()
}

const NOOP: &str = "true";

fn resource(base: &Path) -> ExternalResource {
    ExternalResource::new(BridgeConfig::with_tmpdir_base(base.join("base")))
}

fn data(read: &str, update: &str, delete: &str) -> ResourceData {
    ResourceData::new(sh(read), sh(update), sh(delete))
}

fn leftover_dirs(base: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(base.join("base")) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn mode(path: &Path) -> u32 {
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

// ===========================================================================
// Create
// ===========================================================================

#[tokio::test]
async fn create_without_create_program_runs_update() {
    let tmp = tempfile::tempdir().unwrap();
    let update = r#"printf from-update > "$TF_EXTERNAL_DIR/id"
printf '%s' "$TF_EXTERNAL_MANAGED_FILES" > "$TF_EXTERNAL_DIR/output""#;
    let mut d = data(NOOP, update, NOOP);

    let diags = resource(tmp.path()).create(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.id, "from-update");
    assert_eq!(
        d.output,
        "id:input:input_sensitive:old_state:output:output_sensitive:state:stdall"
    );
}

#[tokio::test]
async fn create_prefers_create_program() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data(NOOP, r#"printf wrong > "$TF_EXTERNAL_DIR/id""#, NOOP);
    d.program_create = Some(sh(r#"printf right > "$TF_EXTERNAL_DIR/id""#));

    let diags = resource(tmp.path()).create(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.id, "right");
}

#[tokio::test]
async fn state_round_trips_through_create() {
    let tmp = tempfile::tempdir().unwrap();
    let update = r#"printf id1 > "$TF_EXTERNAL_DIR/id"
cat "$TF_EXTERNAL_DIR/input" > "$TF_EXTERNAL_DIR/state""#;
    let mut d = data(NOOP, update, NOOP);
    d.input = "payload".into();

    let diags = resource(tmp.path()).create(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.state, "payload");
}

#[tokio::test]
async fn create_without_id_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data(NOOP, NOOP, NOOP);
    d.state = "untouched".into();

    let diags = resource(tmp.path()).create(&mut d, &CancellationToken::new()).await;
    assert!(diags.has_error());
    let err = diags.errors().next().unwrap();
    assert_eq!(err.attribute.as_deref(), Some("id"));
    assert!(err.summary.contains("create>update"));
    assert!(!d.exists());
    assert!(leftover_dirs(tmp.path()).is_empty());
}

#[tokio::test]
async fn create_seeds_empty_id_and_old_state() {
    let tmp = tempfile::tempdir().unwrap();
    let update = r#"printf '[%s|%s]' "$(cat "$TF_EXTERNAL_DIR/id")" "$(cat "$TF_EXTERNAL_DIR/old_state")" > "$TF_EXTERNAL_DIR/output"
printf new > "$TF_EXTERNAL_DIR/id""#;
    let mut d = data(NOOP, update, NOOP);
    d.id = "stale".into();
    d.prior_state = Some("stale-state".into());

    let diags = resource(tmp.path()).create(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.output, "[|]");
}

#[tokio::test]
async fn non_utf8_state_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let update = r#"printf x > "$TF_EXTERNAL_DIR/id"; printf '\377\376ab' > "$TF_EXTERNAL_DIR/state""#;
    let mut d = data(NOOP, update, NOOP);
    d.state = "planned".into();

    let diags = resource(tmp.path()).create(&mut d, &CancellationToken::new()).await;
    assert!(diags.has_error());
    let err = diags.errors().next().unwrap();
    assert!(err.summary.contains("decode"), "{}", err.summary);
    assert!(err.summary.ends_with("state"), "{}", err.summary);
    assert_eq!(d.state, "planned");
}

// ===========================================================================
// Read
// ===========================================================================

#[tokio::test]
async fn read_replaces_state_from_old_state() {
    let tmp = tempfile::tempdir().unwrap();
    let read = r#"D="$TF_EXTERNAL_DIR"
[ "$(cat "$D/old_state")" = old ] || exit 9
printf new > "$D/state""#;
    let mut d = data(read, NOOP, NOOP);
    d.id = "abc".into();
    d.state = "old".into();

    let diags = resource(tmp.path()).read(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.id, "abc");
    assert_eq!(d.state, "new");
}

#[tokio::test]
async fn read_with_cleared_id_means_gone() {
    let tmp = tempfile::tempdir().unwrap();
    let read = r#": > "$TF_EXTERNAL_DIR/id"
printf ignored > "$TF_EXTERNAL_DIR/output""#;
    let mut d = data(read, NOOP, NOOP);
    d.id = "abc".into();
    d.output = "before".into();

    let diags = resource(tmp.path()).read(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert!(!d.exists());
    assert_eq!(d.output, "before");
}

#[tokio::test]
async fn output_files_start_write_only_and_are_restored() {
    let tmp = tempfile::tempdir().unwrap();
    let pinned = tmp.path().join("pinned");
    let read = r#"D="$TF_EXTERNAL_DIR"
printf '%s' "$(stat -c %a "$D/output")" > "$D/state"
printf visible > "$D/output"
printf secret > "$D/output_sensitive""#;
    let mut d = data(read, NOOP, NOOP);
    d.id = "abc".into();
    d.options.program_tmpdir = pinned.to_string_lossy().into_owned();
    d.options.program_tmpdir_keep = true;

    let diags = resource(tmp.path()).read(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.state, "200");
    assert_eq!(d.output, "visible");
    assert_eq!(d.output_sensitive, "secret");
    assert_eq!(mode(&pinned.join("output")), 0o200);
    assert_eq!(mode(&pinned.join("output_sensitive")), 0o200);
    assert_eq!(mode(&pinned.join("input")), 0o400);
    assert_eq!(mode(&pinned.join("id")), 0o600);
}

#[tokio::test]
async fn deleted_output_file_is_a_warning() {
    let tmp = tempfile::tempdir().unwrap();
    let read = r#"rm -f "$TF_EXTERNAL_DIR/output""#;
    let mut d = data(read, NOOP, NOOP);
    d.id = "abc".into();
    d.output = "before".into();

    let diags = resource(tmp.path()).read(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(diags.warnings().count(), 1);
    assert_eq!(d.output, "");
}

#[tokio::test]
async fn import_reads_existing_object() {
    let tmp = tempfile::tempdir().unwrap();
    let read = r#"D="$TF_EXTERNAL_DIR"; printf 'adopted %s' "$(cat "$D/id")" > "$D/state""#;
    let mut d = data(read, NOOP, NOOP);

    let diags = resource(tmp.path()).import("obj-7", &mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.id, "obj-7");
    assert_eq!(d.state, "adopted obj-7");
}

#[tokio::test]
async fn import_of_unknown_id_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data(r#": > "$TF_EXTERNAL_DIR/id""#, NOOP, NOOP);

    let diags = resource(tmp.path()).import("ghost", &mut d, &CancellationToken::new()).await;
    assert!(diags.has_error());
    let err = diags.errors().next().unwrap();
    assert_eq!(err.summary, "Cannot import non-existent remote object");
    assert!(!d.exists());
}

// ===========================================================================
// Update
// ===========================================================================

#[tokio::test]
async fn update_sees_prior_state() {
    let tmp = tempfile::tempdir().unwrap();
    let update = r#"D="$TF_EXTERNAL_DIR"
printf '%s->%s' "$(cat "$D/old_state")" "$(cat "$D/state")" > "$D/output""#;
    let mut d = data(NOOP, update, NOOP);
    d.id = "abc".into();
    d.state = "v2".into();
    d.prior_state = Some("v1".into());

    let diags = resource(tmp.path()).update(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.output, "v1->v2");
    assert_eq!(d.id, "abc");
}

// ===========================================================================
// Delete
// ===========================================================================

#[tokio::test]
async fn delete_clears_identity() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data(NOOP, NOOP, NOOP);
    d.id = "abc".into();

    let diags = resource(tmp.path()).delete(&mut d, &CancellationToken::new()).await;
    assert!(diags.is_empty(), "{:?}", diags);
    assert!(!d.exists());
}

#[tokio::test]
async fn delete_failure_still_clears_identity() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data(NOOP, NOOP, "echo $((40 + 2)); exit 4");
    d.id = "abc".into();

    let diags = resource(tmp.path()).delete(&mut d, &CancellationToken::new()).await;
    assert!(diags.has_error());
    assert!(!d.exists());
    let err = diags.errors().next().unwrap();
    assert_eq!(err.summary, "Error when running delete");
    assert!(err.detail.contains("Error Message: 42"));
}

// ===========================================================================
// Directory retention
// ===========================================================================

#[tokio::test]
async fn directory_removed_after_success_and_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let res = resource(tmp.path());

    let mut ok = data(NOOP, NOOP, NOOP);
    ok.id = "abc".into();
    assert!(!res.read(&mut ok, &CancellationToken::new()).await.has_error());

    let mut failing = data("exit 1", NOOP, NOOP);
    failing.id = "abc".into();
    assert!(res.read(&mut failing, &CancellationToken::new()).await.has_error());

    assert!(leftover_dirs(tmp.path()).is_empty());
}

#[tokio::test]
async fn keep_retains_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data(NOOP, NOOP, NOOP);
    d.id = "abc".into();
    d.options.program_tmpdir_keep = true;

    assert!(!resource(tmp.path()).read(&mut d, &CancellationToken::new()).await.has_error());
    let dirs = leftover_dirs(tmp.path());
    assert_eq!(dirs.len(), 1);
    assert!(dirs[0].join("stdall").exists());
}

#[tokio::test]
async fn keep_on_error_only_keeps_failures() {
    let tmp = tempfile::tempdir().unwrap();
    let res = resource(tmp.path());

    let mut ok = data(NOOP, NOOP, NOOP);
    ok.id = "abc".into();
    ok.options.program_tmpdir_keep_on_error = true;
    assert!(!res.read(&mut ok, &CancellationToken::new()).await.has_error());
    assert!(leftover_dirs(tmp.path()).is_empty());

    let mut failing = data("exit 1", NOOP, NOOP);
    failing.id = "abc".into();
    failing.options.program_tmpdir_keep_on_error = true;
    assert!(res.read(&mut failing, &CancellationToken::new()).await.has_error());
    assert_eq!(leftover_dirs(tmp.path()).len(), 1);
}

#[tokio::test]
async fn deprecated_tmp_dir_alias_pins_and_warns() {
    let tmp = tempfile::tempdir().unwrap();
    let pinned = tmp.path().join("legacy");
    let read = r#"printf '%s' "$TF_EXTERNAL_DIR" > "$TF_EXTERNAL_DIR/output""#;
    let mut d = data(read, NOOP, NOOP);
    d.id = "abc".into();
    d.options.program_tmp_dir = Some(pinned.to_string_lossy().into_owned());

    let diags = resource(tmp.path()).read(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(diags.warnings().count(), 1);
    assert_eq!(d.output, pinned.to_string_lossy());
    assert!(!pinned.exists());
}

#[tokio::test]
async fn relative_pinned_dir_is_usable_from_working_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    std::fs::create_dir(&work).unwrap();
    // Relative to the test's current directory, not to `work`.
    let scratch = tempfile::Builder::new().prefix("pinned-rel").tempdir_in(".").unwrap();
    let pinned = scratch.path().join("pinned");
    assert!(pinned.is_relative());

    let update = r#"printf created > "$TF_EXTERNAL_DIR/id"; pwd > "$TF_EXTERNAL_DIR/output""#;
    let mut d = data(NOOP, update, NOOP);
    d.options.program_tmpdir = pinned.to_string_lossy().into_owned();
    d.options.working_dir = Some(work.clone());

    let diags = resource(tmp.path()).create(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.id, "created");
    assert_eq!(
        std::fs::canonicalize(d.output.trim()).unwrap(),
        std::fs::canonicalize(&work).unwrap()
    );
}

// ===========================================================================
// Cleanup
// ===========================================================================

const REMOVE_DIR: &str = r#"rm -rf "$TF_EXTERNAL_DIR""#;

#[tokio::test]
async fn failed_cleanup_is_a_warning() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data(NOOP, NOOP, REMOVE_DIR);
    d.id = "abc".into();

    let diags = resource(tmp.path()).delete(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(diags.len(), 1);
    let warning = diags.warnings().next().unwrap();
    assert_eq!(warning.severity, Severity::Warning);
    assert!(
        warning.summary.starts_with("Error when cleaning up temporary directory"),
        "{}",
        warning.summary
    );
    assert!(!d.exists());
}

#[tokio::test]
async fn failed_cleanup_follows_program_error() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data(NOOP, NOOP, &format!("{}; exit 3", REMOVE_DIR));
    d.id = "abc".into();

    let diags = resource(tmp.path()).delete(&mut d, &CancellationToken::new()).await;
    assert!(diags.has_error());
    let all: Vec<_> = diags.iter().collect();
    assert_eq!(all.len(), 2, "{:?}", diags);
    assert_eq!(all[0].severity, Severity::Error);
    assert_eq!(all[0].summary, "Error when running delete");
    assert_eq!(all[1].severity, Severity::Warning);
    assert!(all[1].summary.starts_with("Error when cleaning up temporary directory"));
}

// ===========================================================================
// Execution
// ===========================================================================

#[tokio::test]
async fn split_output_reports_stderr() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data("echo noise; echo 'real problem' >&2; exit 2", NOOP, NOOP);
    d.id = "abc".into();
    d.options.program_output_combined = false;

    let diags = resource(tmp.path()).read(&mut d, &CancellationToken::new()).await;
    let err = diags.errors().next().unwrap();
    assert_eq!(err.attribute.as_deref(), Some("program"));
    assert!(err.detail.contains("Error Message: real problem"));
}

#[tokio::test]
async fn missing_program_is_lookup_error() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data(NOOP, NOOP, NOOP);
    d.program_read = CommandSpec::new(["extprog-no-such-program"]).unwrap();
    d.id = "abc".into();

    let diags = resource(tmp.path()).read(&mut d, &CancellationToken::new()).await;
    let err = diags.errors().next().unwrap();
    assert_eq!(err.summary, "External Program Lookup Failed");
    assert!(leftover_dirs(tmp.path()).is_empty());
}

#[tokio::test]
async fn relative_program_runs_from_working_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let script = work.join("read.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\nprintf '%s' \"$(basename \"$(pwd)\")\" > \"$TF_EXTERNAL_DIR_ABS/output\"\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut d = data(NOOP, NOOP, NOOP);
    d.program_read = CommandSpec::new(["./read.sh"]).unwrap();
    d.options.working_dir = Some(work);
    d.id = "abc".into();

    let diags = resource(tmp.path()).read(&mut d, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{:?}", diags);
    assert_eq!(d.output, "work");
}

#[tokio::test]
async fn cancelled_step_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = data("sleep 30", NOOP, NOOP);
    d.id = "abc".into();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let diags = resource(tmp.path()).run(Verb::Read, &mut d, &cancel).await;
    let err = diags.errors().next().unwrap();
    assert!(err.summary.starts_with("Cancelled"));
    assert!(leftover_dirs(tmp.path()).is_empty());
}
