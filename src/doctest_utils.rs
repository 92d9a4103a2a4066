// Internal utilities for documentation tests
// This file contains helper functions to generate test files for doctests

use crate::{ChannelInfo, CntWriter, FileType, Result};
use std::path::Path;

/// Creates a simple test CNT file for documentation examples
///
/// Two channels at 256 Hz, one second of data, one trigger.
pub fn create_simple_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let channels = vec![
        ChannelInfo::new("Fp1", "", "uV"),
        ChannelInfo::new("Fp2", "", "uV"),
    ];
    let mut writer = CntWriter::create(&path, 256.0, channels, FileType::Riff)?;

    // 10Hz正弦波
    let mut rows = Vec::new();
    for i in 0..256 {
        let t = i as f32 / 256.0;
        let value = 50.0 * (2.0 * std::f32::consts::PI * 10.0 * t).sin();
        rows.push(value);
        rows.push(-value);
    }

    writer.add_samples(&rows)?;
    writer.add_trigger(128, "1")?;
    writer.finalize()?;
    Ok(())
}

/// Creates a multi-channel test CNT file for documentation examples
pub fn create_multi_channel_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let channels = vec![
        ChannelInfo::new("C3", "M1", "uV"),
        ChannelInfo::new("C4", "M1", "uV"),
        ChannelInfo::new("Cz", "M1", "uV"),
        ChannelInfo::new("EOG", "", "uV"),
    ];
    let mut writer = CntWriter::create(&path, 512.0, channels, FileType::Riff)?;

    let mut rows = Vec::new();
    for i in 0..2048 {
        let t = i as f32 / 512.0;

        // 脑电：alpha波加工频干扰
        let eeg = 30.0 * (2.0 * std::f32::consts::PI * 10.0 * t).sin()
            + 5.0 * (2.0 * std::f32::consts::PI * 50.0 * t).sin();
        rows.push(eeg);
        rows.push(eeg * 0.8);
        rows.push(eeg * 1.2);
        rows.push(if i % 512 < 20 { 150.0 } else { 0.0 });
    }

    writer.add_samples(&rows)?;
    writer.add_trigger(0, "start")?;
    writer.add_trigger(1024, "2")?;
    writer.finalize()?;
    Ok(())
}

/// Creates a test file with known raw values for validation
pub fn create_validation_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut channel = ChannelInfo::new("Test", "", "uV");
    channel.rscale = 0.5;

    let mut writer = CntWriter::create(&path, 10.0, vec![channel], FileType::Riff)?;
    writer.add_samples(&[100.0, 50.0, 0.0, -50.0, -100.0, 75.0, 25.0, -25.0, -75.0, 0.0])?;
    writer.finalize()?;
    Ok(())
}
