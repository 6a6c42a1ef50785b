//! Haptics controller reports: a vendor rumble output report, a feature
//! report with the waveform and duration lists, and a waveform trigger
//! output report.

use crate::descriptor::{Collection, Items, ABS, CNST, DATA, NULL, VAR};
use crate::error::{Error, Result};
use crate::usage::{haptics, page};

pub const WAVEFORM_STOP_INDEX: u16 = 1;
pub const WAVEFORM_NULL_INDEX: u16 = 2;
pub const WAVEFORM_RUMBLE_INDEX: u16 = 3;
pub const WAVEFORM_BUZZ_INDEX: u16 = 4;
pub const WAVEFORM_LAST_INDEX: u16 = WAVEFORM_BUZZ_INDEX;

/// Report ids assigned by [`crate::DescriptorBuilder::add_haptics`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HapticsReportIds {
    pub vendor_rumble: u8,
    pub features: u8,
    pub waveform: u8,
}

/// Haptics feature report payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HapticsFeatures {
    pub waveform_list: [u16; 2],
    pub duration_list: [u16; 2],
    /// Milliseconds.
    pub waveform_cutoff_time: u32,
}

impl Default for HapticsFeatures {
    fn default() -> Self {
        Self {
            waveform_list: [haptics::WAVEFORM_RUMBLE, haptics::WAVEFORM_BUZZ],
            duration_list: [0, 0],
            waveform_cutoff_time: 1000,
        }
    }
}

impl HapticsFeatures {
    /// Report length, id byte included.
    pub const REPORT_LEN: usize = 13;

    fn write(&self, payload: &mut [u8]) {
        payload[0..2].copy_from_slice(&self.waveform_list[0].to_le_bytes());
        payload[2..4].copy_from_slice(&self.waveform_list[1].to_le_bytes());
        payload[4..6].copy_from_slice(&self.duration_list[0].to_le_bytes());
        payload[6..8].copy_from_slice(&self.duration_list[1].to_le_bytes());
        payload[8..12].copy_from_slice(&self.waveform_cutoff_time.to_le_bytes());
    }

    pub(crate) fn read(report: &[u8]) -> Result<Self> {
        check_len(report, Self::REPORT_LEN)?;
        let u16_at = |at: usize| u16::from_le_bytes([report[at], report[at + 1]]);
        Ok(Self {
            waveform_list: [u16_at(1), u16_at(3)],
            duration_list: [u16_at(5), u16_at(7)],
            waveform_cutoff_time: u32::from_le_bytes([
                report[9], report[10], report[11], report[12],
            ]),
        })
    }
}

/// Haptics waveform trigger output report payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HapticsWaveform {
    pub manual_trigger: u16,
    pub intensity: u16,
}

impl HapticsWaveform {
    pub const REPORT_LEN: usize = 5;

    pub(crate) fn read(report: &[u8]) -> Result<Self> {
        check_len(report, Self::REPORT_LEN)?;
        Ok(Self {
            manual_trigger: u16::from_le_bytes([report[1], report[2]]),
            intensity: u16::from_le_bytes([report[3], report[4]]),
        })
    }
}

/// Motor magnitudes carried by the vendor rumble output report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RumbleReport {
    pub left: u16,
    pub right: u16,
}

impl RumbleReport {
    pub const REPORT_LEN: usize = 7;

    pub(crate) fn read(report: &[u8]) -> Result<Self> {
        check_len(report, Self::REPORT_LEN)?;
        Ok(Self {
            left: u16::from(report[3]) * 128,
            right: u16::from(report[4]) * 128,
        })
    }
}

/// Rumble a backend should play for the current waveform slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RumbleEffect {
    /// Large motor magnitude.
    pub strong: u16,
    /// Small motor magnitude.
    pub weak: u16,
    pub duration_ms: u32,
}

fn check_len(report: &[u8], expected: usize) -> Result<()> {
    if report.len() < expected {
        return Err(Error::SizeMismatch {
            expected,
            actual: report.len(),
        });
    }
    Ok(())
}

/// Per-device haptics state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Haptics {
    ids: HapticsReportIds,
    features: HapticsFeatures,
    waveforms: [HapticsWaveform; WAVEFORM_LAST_INDEX as usize + 1],
}

impl Haptics {
    pub fn new(ids: HapticsReportIds) -> Self {
        Self {
            ids,
            features: HapticsFeatures::default(),
            waveforms: [HapticsWaveform::default(); WAVEFORM_LAST_INDEX as usize + 1],
        }
    }

    pub fn ids(&self) -> HapticsReportIds {
        self.ids
    }

    pub fn features(&self) -> &HapticsFeatures {
        &self.features
    }

    /// Waveform stored in slot `index` (1..=4).
    pub fn waveform(&self, index: u16) -> Option<HapticsWaveform> {
        if index == 0 {
            return None;
        }
        self.waveforms.get(usize::from(index)).copied()
    }

    /// Handles a waveform trigger output report.
    ///
    /// Returns the number of bytes consumed.
    pub fn set_output_waveform(&mut self, report_id: u8, report: &[u8]) -> Result<usize> {
        if report_id != self.ids.waveform {
            return Err(Error::NotImplemented(report_id));
        }
        if report.len() < HapticsWaveform::REPORT_LEN {
            return Err(Error::BufferTooSmall {
                required: HapticsWaveform::REPORT_LEN,
            });
        }
        let output = HapticsWaveform::read(report)?;
        match output.manual_trigger {
            0 => return Err(Error::InvalidParameter("manual trigger")),
            WAVEFORM_STOP_INDEX => {
                self.waveforms = [HapticsWaveform::default(); WAVEFORM_LAST_INDEX as usize + 1];
            }
            trigger if trigger <= WAVEFORM_LAST_INDEX => {
                self.waveforms[usize::from(trigger)] = output;
            }
            _ => return Err(Error::InvalidParameter("manual trigger")),
        }
        Ok(HapticsWaveform::REPORT_LEN)
    }

    /// Handles a set-feature request. Only the cutoff time is writable.
    pub fn set_feature(&mut self, report_id: u8, report: &[u8]) -> Result<usize> {
        if report_id != self.ids.features {
            return Err(Error::NotImplemented(report_id));
        }
        if report.len() < HapticsFeatures::REPORT_LEN {
            return Err(Error::BufferTooSmall {
                required: HapticsFeatures::REPORT_LEN,
            });
        }
        let features = HapticsFeatures::read(report)?;
        self.features.waveform_cutoff_time = features.waveform_cutoff_time;
        Ok(HapticsFeatures::REPORT_LEN)
    }

    /// Fills `report` with the feature report.
    pub fn get_feature(&self, report_id: u8, report: &mut [u8]) -> Result<usize> {
        if report_id != self.ids.features {
            return Err(Error::NotImplemented(report_id));
        }
        if report.len() < HapticsFeatures::REPORT_LEN {
            return Err(Error::BufferTooSmall {
                required: HapticsFeatures::REPORT_LEN,
            });
        }
        report[0] = report_id;
        self.features.write(&mut report[1..HapticsFeatures::REPORT_LEN]);
        Ok(HapticsFeatures::REPORT_LEN)
    }

    pub fn rumble(&self) -> RumbleEffect {
        RumbleEffect {
            strong: self.waveforms[usize::from(WAVEFORM_RUMBLE_INDEX)].intensity,
            weak: self.waveforms[usize::from(WAVEFORM_BUZZ_INDEX)].intensity,
            duration_ms: self.features.waveform_cutoff_time,
        }
    }
}

pub(crate) fn append_items(items: &mut Items, ids: HapticsReportIds) {
    items
        .usage_page(page::VENDOR_DEFINED_BEGIN)
        .collection(Collection::Report)
        .report_id(ids.vendor_rumble)
        .report(8, 2)
        .output(CNST | VAR | ABS)
        .usage(0x01)
        .logical(0, 0xff)
        .physical(0, 0xff)
        .report(8, 2)
        .output(DATA | VAR | ABS)
        .report(8, 2)
        .output(CNST | VAR | ABS)
        .end_collection();

    items
        .usage_page(page::HAPTICS)
        .usage(haptics::SIMPLE_CONTROLLER)
        .collection(Collection::Logical)
        .report_id(ids.features);
    for list in [haptics::WAVEFORM_LIST, haptics::DURATION_LIST] {
        items
            .usage_page(page::HAPTICS)
            .usage(list)
            .collection(Collection::NamedArray)
            .usage_page(page::ORDINAL)
            .usage(WAVEFORM_RUMBLE_INDEX)
            .usage(WAVEFORM_BUZZ_INDEX)
            .logical(0, 0xffff)
            .report(16, 2)
            .feature(DATA | VAR | ABS | NULL)
            .end_collection();
    }
    items
        .usage_page(page::HAPTICS)
        .usage(haptics::WAVEFORM_CUTOFF_TIME)
        // seconds, 10^-3
        .unit(0x1001, -3)
        .logical(0, 0x7fff_ffff)
        .physical(0, 0x7fff_ffff)
        .report(32, 1)
        .feature(DATA | VAR | ABS)
        .unit(0, 0);

    items
        .report_id(ids.waveform)
        .usage(haptics::MANUAL_TRIGGER)
        .logical(1, i32::from(WAVEFORM_LAST_INDEX))
        .physical(1, i32::from(WAVEFORM_LAST_INDEX))
        .report(16, 1)
        .output(DATA | VAR | ABS)
        .usage(haptics::INTENSITY)
        .logical(0, 0xffff)
        .physical(0, 0xffff)
        .report(16, 1)
        .output(DATA | VAR | ABS)
        .end_collection();
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDS: HapticsReportIds = HapticsReportIds {
        vendor_rumble: 1,
        features: 1,
        waveform: 2,
    };

    fn waveform(trigger: u16, intensity: u16) -> [u8; 5] {
        let t = trigger.to_le_bytes();
        let i = intensity.to_le_bytes();
        [IDS.waveform, t[0], t[1], i[0], i[1]]
    }

    #[test]
    fn defaults() {
        let haptics = Haptics::new(IDS);
        let mut report = [0u8; 13];
        assert_eq!(haptics.get_feature(1, &mut report), Ok(13));
        assert_eq!(
            report,
            [1, 0x03, 0x10, 0x04, 0x10, 0, 0, 0, 0, 0xe8, 0x03, 0, 0]
        );
    }

    #[test]
    fn trigger_stores_slot() {
        let mut haptics = Haptics::new(IDS);
        haptics.set_output_waveform(2, &waveform(3, 0x8000)).unwrap();
        haptics.set_output_waveform(2, &waveform(4, 0x1000)).unwrap();
        assert_eq!(
            haptics.rumble(),
            RumbleEffect {
                strong: 0x8000,
                weak: 0x1000,
                duration_ms: 1000
            }
        );
    }

    #[test]
    fn stop_clears_every_slot() {
        let mut haptics = Haptics::new(IDS);
        for slot in 2..=4 {
            haptics.set_output_waveform(2, &waveform(slot, 0xffff)).unwrap();
        }
        haptics.set_output_waveform(2, &waveform(1, 0x1234)).unwrap();
        for slot in 1..=4 {
            assert_eq!(haptics.waveform(slot), Some(HapticsWaveform::default()));
        }
    }

    #[test]
    fn invalid_trigger_keeps_state() {
        let mut haptics = Haptics::new(IDS);
        haptics.set_output_waveform(2, &waveform(3, 7)).unwrap();
        let before = haptics.clone();
        for trigger in [0, 5, 0xffff] {
            assert_eq!(
                haptics.set_output_waveform(2, &waveform(trigger, 9)),
                Err(Error::InvalidParameter("manual trigger"))
            );
        }
        assert_eq!(haptics, before);
    }

    #[test]
    fn wrong_id_is_not_implemented() {
        let mut haptics = Haptics::new(IDS);
        assert_eq!(
            haptics.set_output_waveform(9, &waveform(3, 1)),
            Err(Error::NotImplemented(9))
        );
        let mut report = [0u8; 13];
        assert_eq!(haptics.get_feature(2, &mut report), Err(Error::NotImplemented(2)));
    }

    #[test]
    fn short_buffers_report_size() {
        let mut haptics = Haptics::new(IDS);
        assert_eq!(
            haptics.set_output_waveform(2, &[2, 3, 0]),
            Err(Error::BufferTooSmall { required: 5 })
        );
        assert_eq!(
            haptics.set_feature(1, &[1; 12]),
            Err(Error::BufferTooSmall { required: 13 })
        );
    }

    #[test]
    fn set_feature_writes_only_cutoff() {
        let mut haptics = Haptics::new(IDS);
        let report = [1, 0xaa, 0xaa, 0xbb, 0xbb, 5, 0, 6, 0, 0xf4, 0x01, 0, 0];
        haptics.set_feature(1, &report).unwrap();
        assert_eq!(haptics.features().waveform_cutoff_time, 500);
        assert_eq!(haptics.features().waveform_list, [0x1003, 0x1004]);
        assert_eq!(haptics.features().duration_list, [0, 0]);
    }

    #[test]
    fn vendor_rumble_scales_actuators() {
        let rumble = RumbleReport::read(&[1, 0, 0, 0xff, 0x10, 0, 0]).unwrap();
        assert_eq!(rumble, RumbleReport { left: 0xff * 128, right: 0x10 * 128 });
        assert_eq!(
            RumbleReport::read(&[1, 0, 0]),
            Err(Error::SizeMismatch { expected: 7, actual: 3 })
        );
    }
}
