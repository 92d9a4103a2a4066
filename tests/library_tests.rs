use eep::{ChannelInfo, CntWriter, EepError, FileType, Handle, Library};
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn write_recording(dir: &TempDir, name: &str, channels: usize, samples: usize) -> PathBuf {
    let path = dir.path().join(name);
    let infos: Vec<ChannelInfo> = (0..channels)
        .map(|c| ChannelInfo::new(&format!("E{}", c + 1), "REF", "uV"))
        .collect();

    let mut writer = CntWriter::create(&path, 1000.0, infos, FileType::Riff).unwrap();
    let rows: Vec<f32> = (0..samples * channels).map(|i| (i % 97) as f32).collect();
    writer.add_samples(&rows).unwrap();
    writer.add_trigger(3, "7").unwrap();
    writer.finalize().unwrap();
    path
}

#[test]
fn test_handles_are_reused_after_close() {
    let dir = tempdir().unwrap();
    let a = write_recording(&dir, "a.cnt", 2, 50);
    let b = write_recording(&dir, "b.cnt", 3, 50);

    let mut lib = Library::init();
    let ha = lib.open(&a).unwrap();
    let hb = lib.open(&b).unwrap();
    assert_eq!(ha.value(), 0);
    assert_eq!(hb.value(), 1);
    assert_eq!(lib.open_handles(), 2);

    lib.close(ha).unwrap();
    assert!(matches!(lib.close(ha), Err(EepError::InvalidHandle(0))));
    assert!(matches!(lib.channel_count(ha), Err(EepError::InvalidHandle(0))));
    assert_eq!(lib.channel_count(hb).unwrap(), 3);

    // 空槽被下一次打开复用
    let hc = lib.open(&b).unwrap();
    assert_eq!(hc, ha);
    assert_eq!(lib.channel_count(hc).unwrap(), 3);

    lib.exit();
}

#[test]
fn test_queries() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir, "queries.cnt", 4, 120);

    let mut lib = Library::init();
    let h = lib.open_with_external_triggers(&path).unwrap();

    assert_eq!(lib.channel_count(h).unwrap(), 4);
    assert_eq!(lib.sample_count(h).unwrap(), 120);
    assert_eq!(lib.sample_frequency(h).unwrap(), 1000.0);
    assert_eq!(lib.channel_label(h, 2).unwrap(), "E3");
    assert_eq!(lib.channel_unit(h, 2).unwrap(), "uV");
    assert_eq!(lib.channel_reference(h, 2).unwrap(), "REF");
    assert_eq!(lib.channel_scale(h, 2).unwrap(), 1.0 / 256.0);
    assert!(matches!(lib.channel_label(h, 4), Err(EepError::InvalidChannelIndex(4))));

    let row = lib.samples(h, 1, 2).unwrap();
    assert_eq!(row, vec![4.0, 5.0, 6.0, 7.0]);
    assert_eq!(lib.samples(h, 0, 120).unwrap().len(), 480);
    assert!(lib.samples(h, 0, 121).is_err());

    assert_eq!(lib.trigger_count(h).unwrap(), 1);
    assert_eq!(lib.trigger(h, 0).unwrap(), ("7", 3));
    assert!(matches!(lib.trigger(h, 1), Err(EepError::InvalidTriggerIndex(1))));

    lib.close(h).unwrap();
}

#[test]
fn test_sentinel_handle_is_rejected() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir, "sentinel.cnt", 1, 10);

    let mut lib = Library::init();
    let h = lib.open(&path).unwrap();
    assert!(h.is_valid());

    assert!(matches!(lib.sample_count(Handle::INVALID), Err(EepError::InvalidHandle(-1))));
    assert!(lib.samples(Handle::from(99), 0, 1).is_err());
    assert_eq!(lib.sample_count(h).unwrap(), 10);
}

#[test]
fn test_failed_open_leaves_table_untouched() {
    let dir = tempdir().unwrap();
    let good = write_recording(&dir, "good.cnt", 1, 10);

    let mut lib = Library::init();
    assert!(lib.open(Path::new("/no/such/file.cnt")).is_err());
    assert_eq!(lib.open_handles(), 0);

    let h = lib.open(&good).unwrap();
    assert_eq!(h.value(), 0);
}

#[test]
fn test_drop_closes_open_recordings() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir, "dropped.cnt", 2, 10);

    let mut lib = Library::init();
    lib.open(&path).unwrap();
    lib.open(&path).unwrap();
    assert_eq!(lib.open_handles(), 2);
    drop(lib);
}
