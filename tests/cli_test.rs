use assert_cmd::cargo; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use tempfile;
use std::path::Path;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

fn mkpack(path: &Path,name: &str,tracks: &str) -> STDRESULT {
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("mkpack")
        .arg("-n").arg(name).arg("-t").arg(tracks)
        .arg("-d").arg(path)
        .assert()
        .success();
    Ok(())
}

#[test]
fn mkpack_and_inspect() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let pack_path = dir.path().join("fix1.pack");
    mkpack(&pack_path,"FIX1","600")?;
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("inspect")
        .arg("-d").arg(&pack_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("FIX1"))
        .stdout(predicate::str::contains("prep factor"))
        .stdout(predicate::str::contains("pack is not formatted"));
    Ok(())
}

#[test]
fn mkpack_bad_name() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("mkpack")
        .arg("-n").arg("TOOLONG1").arg("-t").arg("100")
        .arg("-d").arg(dir.path().join("bad.pack"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("pack name"));
    Ok(())
}

#[test]
fn mkpack_will_not_overwrite() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let pack_path = dir.path().join("fix1.pack");
    mkpack(&pack_path,"FIX1","100")?;
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("mkpack")
        .arg("-n").arg("FIX1").arg("-t").arg("100")
        .arg("-d").arg(&pack_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    Ok(())
}

#[test]
fn inspect_unlabeled() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let pack_path = dir.path().join("blank.pack");
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("mkpack")
        .arg("-n").arg("BLANK").arg("-t").arg("100").arg("--unlabeled")
        .arg("-d").arg(&pack_path)
        .assert()
        .success();
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("inspect")
        .arg("-d").arg(&pack_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("pack is not prepped"));
    Ok(())
}

#[test]
fn run_script() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let pack_path = dir.path().join("fix1.pack");
    mkpack(&pack_path,"FIX1","600")?;
    let config_path = dir.path().join("mfd.json");
    std::fs::write(&config_path,r#"{"packs": [{"path": "fix1.pack", "fixed": true}]}"#)?;
    let script_path = dir.path().join("work.txt");
    std::fs::write(&script_path,
"# make a file and give it some room
set sys$*testfile
cycle sys$*testfile(1) max=10
alloc sys$*testfile(1) 0 5
extents sys$*testfile(1)
catalog
packs
")?;
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("run")
        .arg("-c").arg(&config_path)
        .arg("-s").arg(&script_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("created SYS$*TESTFILE at"))
        .stdout(predicate::str::contains("SYS$*TESTFILE(1) allocated 5 tracks"))
        .stdout(predicate::str::contains("SYS$*TESTFILE(1) has 1 extents"))
        .stdout(predicate::str::contains("FIX1"));
    // the pack was saved formatted
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("inspect")
        .arg("-d").arg(&pack_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("pack index"))
        .stdout(predicate::str::contains("593"));
    Ok(())
}

#[test]
fn run_bad_line() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let pack_path = dir.path().join("fix1.pack");
    mkpack(&pack_path,"FIX1","100")?;
    let config_path = dir.path().join("mfd.json");
    std::fs::write(&config_path,r#"{"packs": [{"path": "fix1.pack"}]}"#)?;
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("run")
        .arg("-c").arg(&config_path)
        .write_stdin("catalog\nfrobnicate q*f\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
    Ok(())
}

#[test]
fn run_bad_config() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("mfd.json");
    std::fs::write(&config_path,r#"{"packs": [], "max_cycle_range": 99}"#)?;
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("run")
        .arg("-c").arg(&config_path)
        .write_stdin("catalog\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_cycle_range"));
    Ok(())
}

#[test]
fn bash_completions() -> STDRESULT {
    let mut cmd = cargo::cargo_bin_cmd!("mfdkit");
    cmd.arg("completions")
        .arg("-s").arg("bash")
        .assert()
        .success()
        .stdout(predicate::str::contains("mfdkit"));
    Ok(())
}
