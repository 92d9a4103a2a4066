use assert_cmd::Command;
use eep::{riff, ChannelInfo, CntWriter, FileType};
use predicates::prelude::*;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn cntdump() -> Command {
    let mut cmd = Command::cargo_bin("cntdump").unwrap();
    cmd.env_remove("EEP_LOG");
    cmd
}

fn write_recording(dir: &TempDir, name: &str, channels: usize, samples: usize, triggers: u64) -> PathBuf {
    let path = dir.path().join(name);
    let infos: Vec<ChannelInfo> = (0..channels)
        .map(|c| ChannelInfo::new(&format!("E{}", c + 1), "", "uV"))
        .collect();

    let mut writer = CntWriter::create(&path, 256.0, infos, FileType::Riff).unwrap();
    let rows: Vec<f32> = (0..samples * channels).map(|i| (i % 13) as f32 * 0.25).collect();
    writer.add_samples(&rows).unwrap();
    for t in 0..triggers {
        writer.add_trigger(t * 3, &format!("{}", t + 1)).unwrap();
    }
    writer.finalize().unwrap();
    path
}

/// Overwrites the method code of the first epoch with an unknown one.
fn corrupt_first_epoch(path: &Path) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let len = file.metadata().unwrap().len();

    let ft = riff::read_file_header(&mut file).unwrap();
    let top = riff::scan_chunks(&mut file, ft, riff::first_chunk_offset(ft), len).unwrap();
    let list = top.iter().find(|c| c.is(riff::LIST_ID)).unwrap();
    let inner = riff::scan_chunks(&mut file, ft, list.offset + 4, list.offset + list.size).unwrap();
    let data = inner.iter().find(|c| c.is(b"data")).unwrap();

    file.seek(SeekFrom::Start(data.offset)).unwrap();
    file.write_all(&[0xF0]).unwrap();
}

fn stdout_of(path: &Path) -> String {
    let output = cntdump().arg(path).output().unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_nonexistent_file_is_reported_and_skipped() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.cnt");

    cntdump()
        .arg(&missing)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("error opening"));
}

#[test]
fn test_unreadable_samples_are_reported_as_read_errors() {
    let dir = tempdir().unwrap();
    let bad = write_recording(&dir, "bad.cnt", 2, 20, 0);
    corrupt_first_epoch(&bad);
    let good = write_recording(&dir, "good.cnt", 1, 20, 0);

    cntdump()
        .arg(&bad)
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("channels: 2\nchannels: 1\n"))
        .stderr(predicate::str::contains("error reading"))
        .stderr(predicate::str::contains("bad.cnt"))
        .stderr(predicate::str::contains("error opening").not());
}

#[test]
fn test_failures_survive_silenced_logging() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.cnt");

    cntdump()
        .args(["--log-level", "off"])
        .arg(&missing)
        .assert()
        .success()
        .stderr(predicate::str::contains("error opening"));

    cntdump()
        .env("EEP_LOG", "off")
        .arg(&missing)
        .assert()
        .success()
        .stderr(predicate::str::contains("error opening"));
}

#[test]
fn test_default_dump_layout() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir, "layout.cnt", 5, 40, 3);
    let text = stdout_of(&path);
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], "channels: 5");

    let samples: Vec<&str> = lines.iter().copied().filter(|l| l.starts_with("sample[")).collect();
    assert_eq!(samples.len(), 10);
    assert_eq!(samples[0], "sample[    0]: 0.000000 0.250000 0.500000 0.750000 1.000000");
    for line in &samples {
        let (_, values) = line.split_once(':').unwrap();
        assert_eq!(values.split_whitespace().count(), 5, "{}", line);
    }

    assert_eq!(lines[11], "triggers: 3");
    let triggers: Vec<&str> = lines.iter().copied().filter(|l| l.starts_with("trigger(")).collect();
    assert_eq!(triggers, vec!["trigger(0, 1, 0)", "trigger(1, 2, 3)", "trigger(2, 3, 6)"]);
}

#[test]
fn test_failure_does_not_stop_later_files() {
    let dir = tempdir().unwrap();
    let first = write_recording(&dir, "first.cnt", 2, 20, 1);
    let missing = dir.path().join("missing.cnt");
    let last = write_recording(&dir, "last.cnt", 3, 20, 0);

    let output = cntdump().arg(&first).arg(&missing).arg(&last).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let channel_lines: Vec<&str> = stdout.lines().filter(|l| l.starts_with("channels:")).collect();
    assert_eq!(channel_lines, vec!["channels: 2", "channels: 3"]);

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error opening"));
    assert!(stderr.contains("missing.cnt"));
}

#[test]
fn test_strict_exit_status() {
    let dir = tempdir().unwrap();
    let good = write_recording(&dir, "good.cnt", 1, 20, 0);
    let missing = dir.path().join("missing.cnt");

    cntdump().arg("--strict").arg(&good).assert().success();
    cntdump().arg("--strict").arg(&good).arg(&missing).assert().code(1);
}

#[test]
fn test_row_options() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir, "rows.cnt", 2, 25, 0);

    let count_rows = |output: &[u8]| {
        String::from_utf8_lossy(output)
            .lines()
            .filter(|l| l.starts_with("sample["))
            .count()
    };

    let output = cntdump().arg("-n").arg("3").arg(&path).output().unwrap();
    assert_eq!(count_rows(&output.stdout), 3);

    let output = cntdump().arg("--all").arg(&path).output().unwrap();
    assert_eq!(count_rows(&output.stdout), 25);

    // 请求行数超过样本数时截断
    let output = cntdump().args(["--samples", "100"]).arg(&path).output().unwrap();
    assert!(output.status.success());
    assert_eq!(count_rows(&output.stdout), 25);
}

#[test]
fn test_external_triggers_flag() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir, "ext.cnt", 1, 20, 2);
    std::fs::write(dir.path().join("ext.trg"), "0.0039062500\n0.039062 10 99\n").unwrap();

    cntdump()
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("triggers: 1\ntrigger(0, 99, 10)\n"));

    cntdump()
        .arg("--no-external-triggers")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("triggers: 2\n"));
}

#[test]
fn test_argument_errors() {
    cntdump().assert().code(2);
    cntdump().args(["--samples", "many", "x.cnt"]).assert().code(2);
}
