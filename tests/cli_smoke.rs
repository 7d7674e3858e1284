use std::path::PathBuf;

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_retrack")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "retrack.exe"
            } else {
                "retrack"
            });
            p
        })
}

#[test]
fn cli_help_lists_dump() {
    let out = std::process::Command::new(exe())
        .arg("--help")
        .output()
        .unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("dump"));
}

#[test]
fn cli_without_arguments_fails() {
    let status = std::process::Command::new(exe())
        .stdin(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());
}

#[test]
fn cli_dump_with_missing_meta_fails() {
    let out = std::process::Command::new(exe())
        .args(["dump", "no/such/meta.json", "out.mp4"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("does not exist"), "stderr: {err}");
}

#[test]
fn cli_session_with_missing_meta_fails() {
    let status = std::process::Command::new(exe())
        .arg("no/such/meta.json")
        .stdin(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());
}
