//! Per-channel, per-probe-gain calibration constants, persisted as versioned
//! JSON with a one-level `_old` backup.
//!
//! Calibrated voltage is `(511 - (raw + offset)) * slope`. Slopes and offsets
//! carry a calibration date; constants older than a year produce an advisory
//! warning when applied.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{Error, Result};
use crate::proto::{Channel, ProbeGain};

/// Uncalibrated units have a slope close to this; it keeps traces legible
/// before the first calibration run.
pub const DEFAULT_SLOPE: f64 = 0.0445;

const STALE_AFTER_DAYS: i64 = 365;

const FORMAT_VERSION: u32 = 1;

fn default_slope() -> f64 {
    DEFAULT_SLOPE
}

fn format_version() -> u32 {
    FORMAT_VERSION
}

/// The slope/offset pair (and calibration dates) for one channel at one
/// probe gain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    #[serde(default = "default_slope")]
    pub slope: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub slope_caldate: Option<OffsetDateTime>,
    #[serde(default)]
    pub offset: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub offset_caldate: Option<OffsetDateTime>,
}

impl Default for ChannelCalibration {
    fn default() -> Self {
        ChannelCalibration {
            slope: DEFAULT_SLOPE,
            slope_caldate: None,
            offset: 0.0,
            offset_caldate: None,
        }
    }
}

/// Which probe gain is active on each channel. Decides which calibration
/// group applies during conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GainSelection {
    pub channel_a: ProbeGain,
    pub channel_b: ProbeGain,
}

impl GainSelection {
    pub fn for_channel(self, channel: Channel) -> ProbeGain {
        match channel {
            Channel::A => self.channel_a,
            Channel::B => self.channel_b,
        }
    }
}

/// The full calibration set: 2 channels x 2 probe gains x (slope, offset),
/// each with a calibration date.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(default = "format_version")]
    version: u32,
    #[serde(default)]
    pub channel_a_1x: ChannelCalibration,
    #[serde(default)]
    pub channel_a_10x: ChannelCalibration,
    #[serde(default)]
    pub channel_b_1x: ChannelCalibration,
    #[serde(default)]
    pub channel_b_10x: ChannelCalibration,
}

fn backup_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let mut name = format!("{}_old", stem);
    if let Some(extension) = path.extension() {
        name.push('.');
        name.push_str(&extension.to_string_lossy());
    }
    path.with_file_name(name)
}

impl Calibration {
    /// Load the calibration file. A missing file is not an error: defaults
    /// are returned and a warning is logged. Fields absent from an existing
    /// file are backfilled with defaults by the deserializer.
    pub fn load(path: &Path) -> Result<Calibration> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                log::info!("loading calibration from {}", path.display());
                serde_json::from_str(&contents).map_err(|error|
                    Error::Calibration(
                        format!("could not parse {}: {}", path.display(), error)))
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("calibration file {} not found, using defaults", path.display());
                Ok(Calibration::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Write the calibration file, archiving any existing version to the
    /// `_old` sibling first. Only one level of history is kept.
    pub fn save(&self, path: &Path) -> Result<()> {
        if path.exists() {
            let backup = backup_path(path);
            log::info!("backing up calibration file {} to {}",
                path.display(), backup.display());
            fs::copy(path, &backup)?;
        }
        log::info!("writing calibration to {}", path.display());
        let contents = serde_json::to_string_pretty(self).map_err(|error|
            Error::Calibration(format!("could not serialize calibration: {}", error)))?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn constants(&self, channel: Channel, gain: ProbeGain) -> &ChannelCalibration {
        match (channel, gain) {
            (Channel::A, ProbeGain::X1)  => &self.channel_a_1x,
            (Channel::A, ProbeGain::X10) => &self.channel_a_10x,
            (Channel::B, ProbeGain::X1)  => &self.channel_b_1x,
            (Channel::B, ProbeGain::X10) => &self.channel_b_10x,
        }
    }

    pub fn constants_mut(&mut self, channel: Channel, gain: ProbeGain) -> &mut ChannelCalibration {
        match (channel, gain) {
            (Channel::A, ProbeGain::X1)  => &mut self.channel_a_1x,
            (Channel::A, ProbeGain::X10) => &mut self.channel_a_10x,
            (Channel::B, ProbeGain::X1)  => &mut self.channel_b_1x,
            (Channel::B, ProbeGain::X10) => &mut self.channel_b_10x,
        }
    }

    /// Names of the active slope/offset fields whose calibration date is
    /// absent or more than a year in the past.
    pub fn stale_fields(&self, gains: GainSelection, now: OffsetDateTime) -> Vec<String> {
        let is_stale = |caldate: Option<OffsetDateTime>| match caldate {
            None => true,
            Some(date) => (now - date).whole_days() > STALE_AFTER_DAYS,
        };
        let mut fields = Vec::new();
        for channel in [Channel::A, Channel::B] {
            let gain = gains.for_channel(channel);
            let constants = self.constants(channel, gain);
            let label = match gain { ProbeGain::X1 => "1x", ProbeGain::X10 => "10x" };
            if is_stale(constants.slope_caldate) {
                fields.push(format!("channel {:?} {} slope", channel, label));
            }
            if is_stale(constants.offset_caldate) {
                fields.push(format!("channel {:?} {} offset", channel, label));
            }
        }
        fields
    }

    /// Convert raw (possibly averaged) samples to volts using the constants
    /// selected by the active gains. Stale constants are reported once per
    /// field per call, advisory only.
    pub fn apply(&self, gains: GainSelection, raw_a: &[f64], raw_b: &[f64])
            -> (Vec<f64>, Vec<f64>) {
        for field in self.stale_fields(gains, OffsetDateTime::now_utc()) {
            log::warn!("calibration for {} is out of date", field);
        }
        let convert = |constants: &ChannelCalibration, raw: &[f64]| {
            raw.iter()
                .map(|&sample| (511.0 - (sample + constants.offset)) * constants.slope)
                .collect()
        };
        (convert(self.constants(Channel::A, gains.channel_a), raw_a),
         convert(self.constants(Channel::B, gains.channel_b), raw_b))
    }

    /// Offset-only correction, used while measuring slopes during
    /// calibration: `511 - (raw + offset)`, still in counts.
    pub fn offset_correct(&self, gains: GainSelection, channel: Channel, raw: &[f64])
            -> Vec<f64> {
        let constants = self.constants(channel, gains.for_channel(channel));
        raw.iter().map(|&sample| 511.0 - (sample + constants.offset)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("cgr101-{}-{}", std::process::id(), name));
        path
    }

    #[test]
    fn test_defaults() {
        let cal = Calibration::default();
        assert_eq!(cal.channel_a_1x.slope, 0.0445);
        assert_eq!(cal.channel_a_1x.offset, 0.0);
        assert_eq!(cal.channel_b_10x.slope_caldate, None);
    }

    #[test]
    fn test_apply_identities() {
        let mut cal = Calibration::default();
        cal.channel_a_1x = ChannelCalibration { slope: 1.0, offset: 0.0,
            slope_caldate: None, offset_caldate: None };
        cal.channel_b_1x = cal.channel_a_1x;
        let (volts_a, volts_b) = cal.apply(
            GainSelection::default(), &[511.0, 0.0, 1023.0], &[511.0]);
        assert_eq!(volts_a, vec![0.0, 511.0, -512.0]);
        assert_eq!(volts_b, vec![0.0]);
    }

    #[test]
    fn test_apply_selects_gain_group() {
        let mut cal = Calibration::default();
        cal.channel_a_10x.slope = 0.445;
        cal.channel_a_10x.offset = 1.0;
        let gains = GainSelection { channel_a: ProbeGain::X10, channel_b: ProbeGain::X1 };
        let (volts_a, _) = cal.apply(gains, &[500.0], &[500.0]);
        assert!((volts_a[0] - (511.0 - 501.0) * 0.445).abs() < 1e-12);
    }

    #[test]
    fn test_offset_correct() {
        let mut cal = Calibration::default();
        cal.channel_a_1x.offset = 2.0;
        let corrected = cal.offset_correct(
            GainSelection::default(), Channel::A, &[509.0]);
        assert_eq!(corrected, vec![0.0]);
    }

    #[test]
    fn test_save_load_round_trip() {
        let path = temp_path("roundtrip.json");
        let mut cal = Calibration::default();
        cal.channel_a_1x.slope = 0.0440;
        cal.channel_a_1x.slope_caldate = Some(datetime!(2026-01-15 12:00 UTC));
        cal.channel_b_10x.offset = -3.5;
        cal.channel_b_10x.offset_caldate = Some(datetime!(2026-02-01 08:30 UTC));
        cal.save(&path).unwrap();
        let loaded = Calibration::load(&path).unwrap();
        assert_eq!(cal, loaded);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_save_archives_previous_version() {
        let path = temp_path("backup.json");
        let backup = backup_path(&path);
        let mut cal = Calibration::default();
        cal.channel_a_1x.slope = 1.0;
        cal.save(&path).unwrap();
        cal.channel_a_1x.slope = 2.0;
        cal.save(&path).unwrap();
        let old = Calibration::load(&backup).unwrap();
        assert_eq!(old.channel_a_1x.slope, 1.0);
        let new = Calibration::load(&path).unwrap();
        assert_eq!(new.channel_a_1x.slope, 2.0);
        fs::remove_file(&path).unwrap();
        fs::remove_file(&backup).unwrap();
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let cal = Calibration::load(Path::new("/nonexistent/cgrcal.json")).unwrap();
        assert_eq!(cal, Calibration::default());
    }

    #[test]
    fn test_load_backfills_missing_fields() {
        let path = temp_path("partial.json");
        fs::write(&path, r#"{"channel_a_1x": {"slope": 0.05}}"#).unwrap();
        let cal = Calibration::load(&path).unwrap();
        assert_eq!(cal.channel_a_1x.slope, 0.05);
        assert_eq!(cal.channel_a_1x.offset, 0.0);
        assert_eq!(cal.channel_a_10x.slope, DEFAULT_SLOPE);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_backup_path_keeps_extension() {
        assert_eq!(backup_path(Path::new("/tmp/cgrcal.json")),
                   PathBuf::from("/tmp/cgrcal_old.json"));
        assert_eq!(backup_path(Path::new("cgrcal")),
                   PathBuf::from("cgrcal_old"));
    }

    #[test]
    fn test_stale_fields() {
        let now = datetime!(2026-06-01 0:00 UTC);
        let mut cal = Calibration::default();
        // all dates absent: both active groups fully stale
        assert_eq!(cal.stale_fields(GainSelection::default(), now).len(), 4);
        cal.channel_a_1x.slope_caldate = Some(datetime!(2026-05-01 0:00 UTC));
        cal.channel_a_1x.offset_caldate = Some(datetime!(2024-01-01 0:00 UTC));
        cal.channel_b_1x.slope_caldate = Some(datetime!(2026-01-01 0:00 UTC));
        cal.channel_b_1x.offset_caldate = Some(datetime!(2026-01-01 0:00 UTC));
        let fields = cal.stale_fields(GainSelection::default(), now);
        assert_eq!(fields, vec!["channel A 1x offset".to_owned()]);
        // inactive groups are not checked
        let gains = GainSelection { channel_a: ProbeGain::X10, channel_b: ProbeGain::X1 };
        assert_eq!(cal.stale_fields(gains, now).len(), 2);
    }
}
