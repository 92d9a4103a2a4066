use eep::trigger::{external_trigger_path, read_trg_file, write_trg_file};
use eep::{ChannelInfo, CntReader, CntWriter, EepError, FileType, Trigger};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

// 写入带内嵌触发的记录
fn write_with_triggers(path: &Path, triggers: &[(u64, &str)]) {
    let channels = vec![ChannelInfo::new("Cz", "", "uV")];
    let mut writer = CntWriter::create(path, 500.0, channels, FileType::Riff).unwrap();
    writer.add_samples(&vec![1.0; 2000]).unwrap();
    for &(sample, code) in triggers {
        writer.add_trigger(sample, code).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_external_file_overrides_embedded() {
    let dir = tempdir().unwrap();
    let cnt = dir.path().join("override.cnt");
    write_with_triggers(&cnt, &[(100, "1"), (200, "2")]);

    let external = vec![Trigger::new(1500, "Rest"), Trigger::new(10, "Go")];
    write_trg_file(&external_trigger_path(&cnt), &external, 500.0).unwrap();

    let reader = CntReader::open_with_external_triggers(&cnt).unwrap();
    assert_eq!(reader.triggers(), external.as_slice());

    // 普通打开仍使用内嵌触发
    let reader = CntReader::open(&cnt).unwrap();
    assert_eq!(reader.triggers(), &[Trigger::new(100, "1"), Trigger::new(200, "2")]);
}

#[test]
fn test_without_external_file_uses_embedded() {
    let dir = tempdir().unwrap();
    let cnt = dir.path().join("embedded.cnt");
    write_with_triggers(&cnt, &[(5, "A")]);

    let reader = CntReader::open_with_external_triggers(&cnt).unwrap();
    assert_eq!(reader.triggers(), &[Trigger::new(5, "A")]);
}

#[test]
fn test_empty_external_file_clears_triggers() {
    let dir = tempdir().unwrap();
    let cnt = dir.path().join("cleared.cnt");
    write_with_triggers(&cnt, &[(5, "A"), (6, "B")]);

    fs::write(external_trigger_path(&cnt), "0.002\n").unwrap();
    let reader = CntReader::open_with_external_triggers(&cnt).unwrap();
    assert!(reader.triggers().is_empty());
}

#[test]
fn test_malformed_external_file_fails_open() {
    let dir = tempdir().unwrap();
    let cnt = dir.path().join("malformed.cnt");
    write_with_triggers(&cnt, &[]);

    fs::write(external_trigger_path(&cnt), "not a period\n1.0 0 1\n").unwrap();
    assert!(matches!(
        CntReader::open_with_external_triggers(&cnt),
        Err(EepError::InvalidFormat(_))
    ));
}

#[test]
fn test_hand_written_trg_file() {
    let dir = tempdir().unwrap();
    let trg = dir.path().join("hand.trg");
    fs::write(&trg, "0.0020000000\n  0.100000  50 11\n  2.000000  1000 Eyes open\n").unwrap();

    let triggers = read_trg_file(&trg).unwrap();
    assert_eq!(triggers, vec![Trigger::new(50, "11"), Trigger::new(1000, "Eyes open")]);

    assert!(matches!(
        read_trg_file(&dir.path().join("absent.trg")),
        Err(EepError::FileNotFound(_))
    ));
}
