use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::{fs, path::Path, process::Command};
use tempfile::tempdir;

fn tbconf(dir: &Path) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("tbconf")?;
    cmd.arg("--config-path").arg(dir.join("config.yaml"))
        .arg("--backup-dir").arg(dir.join("backups"));
    Ok(cmd)
}

#[test]
fn update_check_backups_restore() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("config.yaml"), "Foo: 1\n")?;

    tbconf(dir.path())?
        .args(["update", "--token", "T", "--chat-id", "123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup: ").and(predicate::str::contains("Installed")));

    tbconf(dir.path())?
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("targets chat 123"));

    tbconf(dir.path())?
        .arg("backups")
        .assert()
        .success()
        .stdout(predicate::str::contains("config.yaml.bak."));

    tbconf(dir.path())?
        .arg("restore")
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored"));
    assert_eq!(fs::read_to_string(dir.path().join("config.yaml"))?, "Foo: 1\n");

    // the restored file no longer carries a webhook
    tbconf(dir.path())?
        .arg("check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("WebhookTemplate is missing"));
    Ok(())
}

#[test]
fn failures_map_to_exit_codes() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let cfg = dir.path().join("config.yaml");

    fs::write(&cfg, "Foo: 1\n")?;
    tbconf(dir.path())?
        .args(["update", "--token", "T", "--chat-id", "  "])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Failed at input"));

    fs::write(&cfg, "- keep_me\n")?;
    tbconf(dir.path())?
        .args(["update", "--token", "T", "--chat-id", "123"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("rolled back from backup"));
    assert_eq!(fs::read_to_string(&cfg)?, "- keep_me\n");

    let blocked = tempdir()?;
    fs::write(blocked.path().join("config.yaml"), "Foo: 1\n")?;
    fs::write(blocked.path().join("backups"), "")?;
    tbconf(blocked.path())?
        .args(["update", "--token", "T", "--chat-id", "123"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed at backup"));

    tbconf(dir.path())?
        .args(["restore", "config.yaml.bak.19700101-000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no backup"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn restart_uses_configured_service_manager() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let ok = dir.path().join("ok.toml");
    let bad = dir.path().join("bad.toml");
    fs::write(&ok, "service_manager = \"true\"\nservice = \"tblocker\"\n")?;
    fs::write(&bad, "service_manager = \"false\"\n")?;

    Command::cargo_bin("tbconf")?
        .arg("-c").arg(&ok).arg("restart")
        .assert()
        .success()
        .stdout(predicate::str::contains("Restarted tblocker"));

    Command::cargo_bin("tbconf")?
        .arg("-c").arg(&bad).arg("restart")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Restart failed"));
    Ok(())
}
