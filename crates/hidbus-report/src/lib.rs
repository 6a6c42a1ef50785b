//! HID report descriptor synthesis and report encoding.
//!
//! A [`DescriptorBuilder`] assembles a descriptor and hands back the field
//! positions ([`ButtonBlock`], [`AxisBlock`], [`HatBlock`]) used to encode
//! live values into an [`InputReport`]. Output and feature reports are
//! decoded through [`ReportDescriptor::decode_output`] and
//! [`ReportDescriptor::decode_feature`].

mod codec;
mod descriptor;
mod error;
pub mod gamepad;
pub mod haptics;
mod parse;
pub mod physical;
pub mod usage;

pub use codec::{
    read_bits, write_bits, AxisBits, AxisBlock, ButtonBlock, Field, FieldKind, FieldOffset,
    HatBlock, HatDirection, InputLayout, InputReport,
};
pub use descriptor::{
    copy_descriptor, Collection, DescriptorBuilder, ReportDescriptor, ReportKind,
};
pub use error::{Error, Result};
pub use haptics::{Haptics, HapticsReportIds, RumbleReport};
pub use parse::{summarize, DescriptorSummary};
pub use physical::{PhysicalReport, PhysicalReportIds, PhysicalState};

/// Decoded output report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputReport {
    VendorRumble(RumbleReport),
    HapticsWaveform(haptics::HapticsWaveform),
    Physical(PhysicalReport),
}

/// Decoded feature report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureReport {
    Haptics(haptics::HapticsFeatures),
}

impl ReportDescriptor {
    /// Dispatches an output report on its leading id byte.
    pub fn decode_output(&self, report: &[u8]) -> Result<OutputReport> {
        let Some(&id) = report.first() else {
            return Err(Error::SizeMismatch {
                expected: 1,
                actual: 0,
            });
        };
        if let Some(ids) = self.haptics() {
            if id == ids.vendor_rumble {
                return RumbleReport::read(report).map(OutputReport::VendorRumble);
            }
            if id == ids.waveform {
                return haptics::HapticsWaveform::read(report).map(OutputReport::HapticsWaveform);
            }
        }
        if let Some(ids) = self.physical() {
            if ids.owns(id) {
                return ids.decode(report).map(OutputReport::Physical);
            }
        }
        Err(Error::NotImplemented(id))
    }

    /// Dispatches a feature report on its leading id byte.
    pub fn decode_feature(&self, report: &[u8]) -> Result<FeatureReport> {
        let Some(&id) = report.first() else {
            return Err(Error::SizeMismatch {
                expected: 1,
                actual: 0,
            });
        };
        match self.haptics() {
            Some(ids) if id == ids.features => {
                haptics::HapticsFeatures::read(report).map(FeatureReport::Haptics)
            }
            _ => Err(Error::NotImplemented(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::{DeviceControl, EffectType};
    use crate::usage::{generic, page};

    fn joystick() -> ReportDescriptor {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::JOYSTICK).unwrap();
        builder.begin_report(ReportKind::Input).unwrap();
        builder.add_buttons(page::BUTTON, 1, 8).unwrap();
        builder.end_report().unwrap();
        builder.add_haptics().unwrap();
        builder.add_physical(&[EffectType::ConstantForce]).unwrap();
        builder.end().unwrap()
    }

    #[test]
    fn dispatches_output_reports() {
        let desc = joystick();
        assert_eq!(
            desc.decode_output(&[1, 0, 0, 2, 3, 0, 0]),
            Ok(OutputReport::VendorRumble(RumbleReport {
                left: 256,
                right: 384
            }))
        );
        assert_eq!(
            desc.decode_output(&[2, 3, 0, 0xff, 0xff]),
            Ok(OutputReport::HapticsWaveform(haptics::HapticsWaveform {
                manual_trigger: 3,
                intensity: 0xffff
            }))
        );
        assert_eq!(
            desc.decode_output(&[3, 3]),
            Ok(OutputReport::Physical(PhysicalReport::DeviceControl(
                DeviceControl::StopAllEffects
            )))
        );
        assert_eq!(desc.decode_output(&[42]), Err(Error::NotImplemented(42)));
    }

    #[test]
    fn short_output_is_size_mismatch() {
        let desc = joystick();
        assert_eq!(
            desc.decode_output(&[2, 3]),
            Err(Error::SizeMismatch {
                expected: 5,
                actual: 2
            })
        );
        assert_eq!(
            desc.decode_output(&[]),
            Err(Error::SizeMismatch {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn dispatches_feature_reports() {
        let desc = joystick();
        let mut report = [0u8; 13];
        Haptics::new(desc.haptics().unwrap())
            .get_feature(1, &mut report)
            .unwrap();
        let FeatureReport::Haptics(features) = desc.decode_feature(&report).unwrap();
        assert_eq!(features.waveform_cutoff_time, 1000);
        assert_eq!(desc.decode_feature(&[2]), Err(Error::NotImplemented(2)));
    }

    #[test]
    fn end_to_end_two_buttons_one_stick() {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::JOYSTICK).unwrap();
        let buttons = builder.add_buttons(page::BUTTON, 1, 2).unwrap();
        builder.add_padding(6).unwrap();
        let stick = builder
            .add_axes(
                page::GENERIC,
                &[generic::X, generic::Y],
                false,
                AxisBits::Sixteen,
                0,
                65535,
            )
            .unwrap();
        let desc = builder.end().unwrap();

        let summary = summarize(desc.as_bytes()).unwrap();
        assert_eq!((summary.buttons, summary.axes), (2, 2));

        let mut report = InputReport::new(desc.input()).unwrap();
        buttons.set(report.as_mut_bytes(), 0, true);
        stick.set(report.as_mut_bytes(), 0, 40000).unwrap();
        stick.set(report.as_mut_bytes(), 1, 10000).unwrap();

        let bytes = report.as_bytes();
        assert_eq!(bytes.len(), 5);
        assert_eq!(buttons.get(bytes, 0), Some(true));
        assert_eq!(buttons.get(bytes, 1), Some(false));
        assert_eq!(stick.get(bytes, 0), Some(40000));
        assert_eq!(stick.get(bytes, 1), Some(10000));
    }
}
