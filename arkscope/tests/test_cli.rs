use std::process::Command;

fn arkscope() -> Command {
    Command::new(env!("CARGO_BIN_EXE_arkscope"))
}

#[test]
fn test_missing_target_is_a_usage_error() {
    let output = arkscope().output().expect("Failed to run arkscope");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Missing required argument"), "stderr: {stderr}");
}

#[test]
fn test_process_and_pid_together_is_a_usage_error() {
    let output = arkscope().args(["my-app", "--pid", "1"]).output().expect("Failed to run arkscope");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_missing_process_fails_preflight() {
    let output =
        arkscope().args(["--pid", "999999999", "--quiet"]).output().expect("Failed to run arkscope");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}

#[test]
fn test_bad_image_is_rejected_before_attaching() {
    let image = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(image.path(), b"not an elf").unwrap();
    let pid = std::process::id().to_string();

    let output = arkscope()
        .args(["--pid", &pid, "--quiet", "--image"])
        .arg(image.path())
        .output()
        .expect("Failed to run arkscope");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Not an object file"), "stderr: {stderr}");
}

#[test]
fn test_help_lists_outputs() {
    let output = arkscope().arg("--help").output().expect("Failed to run arkscope");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--fp", "--max-depth", "--image", "--jit-dump", "--export", "--no-region-check"] {
        assert!(stdout.contains(flag), "--help is missing {flag}");
    }
}
