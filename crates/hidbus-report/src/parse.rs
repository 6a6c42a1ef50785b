use smallvec::SmallVec;

use crate::descriptor::{
    CNST, COLLECTION, END_COLLECTION, FEATURE, INPUT, OUTPUT, POP, PUSH, REPORT_COUNT, REPORT_ID,
    REPORT_SIZE, USAGE, USAGE_MAXIMUM, USAGE_MINIMUM, USAGE_PAGE, VAR,
};
use crate::error::{Error, Result};
use crate::usage::{generic, page};

/// Counts of the input controls a descriptor declares.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorSummary {
    /// Usage page and usage of the first top-level collection.
    pub top_usage: (u16, u16),
    pub axes: usize,
    pub buttons: usize,
    pub hats: usize,
    pub input_report_ids: SmallVec<[u8; 8]>,
    pub output_report_ids: SmallVec<[u8; 8]>,
    pub feature_report_ids: SmallVec<[u8; 8]>,
    /// Largest input report in bytes, id byte included.
    pub max_input_len: usize,
}

#[derive(Clone, Copy, Default)]
struct Globals {
    usage_page: u16,
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

#[derive(Default)]
struct Locals {
    usages: SmallVec<[(u16, u16); 16]>,
    range: Option<(u32, u32)>,
}

impl Locals {
    fn usage_at(&self, index: usize, usage_page: u16) -> Option<(u16, u16)> {
        if let Some((min, max)) = self.range {
            let usage = (min + index as u32).min(max);
            return Some(extended(usage, usage_page));
        }
        self.usages
            .get(index)
            .or_else(|| self.usages.last())
            .copied()
    }
}

fn extended(usage: u32, usage_page: u16) -> (u16, u16) {
    if usage > 0xffff {
        ((usage >> 16) as u16, usage as u16)
    } else {
        (usage_page, usage as u16)
    }
}

fn add_id(ids: &mut SmallVec<[u8; 8]>, id: u8) {
    if id != 0 && !ids.contains(&id) {
        ids.push(id);
    }
}

/// Walks the items of a report descriptor.
pub fn summarize(descriptor: &[u8]) -> Result<DescriptorSummary> {
    let mut summary = DescriptorSummary::default();
    let mut globals = Globals::default();
    let mut stack: SmallVec<[Globals; 4]> = SmallVec::new();
    let mut locals = Locals::default();
    let mut input_bits: SmallVec<[(u8, u32); 4]> = SmallVec::new();
    let mut depth = 0usize;
    let mut pos = 0usize;

    while pos < descriptor.len() {
        let prefix = descriptor[pos];
        // long items carry no information we use
        if prefix == 0xfe {
            let size = usize::from(*descriptor.get(pos + 1).ok_or(Error::SizeMismatch {
                expected: pos + 2,
                actual: descriptor.len(),
            })?);
            pos += 3 + size;
            continue;
        }
        let size = match prefix & 0x03 {
            3 => 4,
            n => usize::from(n),
        };
        let data = descriptor
            .get(pos + 1..pos + 1 + size)
            .ok_or(Error::SizeMismatch {
                expected: pos + 1 + size,
                actual: descriptor.len(),
            })?;
        pos += 1 + size;

        let mut raw = [0u8; 4];
        raw[..size].copy_from_slice(data);
        let unsigned = u32::from_le_bytes(raw);

        match prefix & 0xfc {
            USAGE_PAGE => globals.usage_page = unsigned as u16,
            REPORT_SIZE => globals.report_size = unsigned,
            REPORT_COUNT => globals.report_count = unsigned,
            REPORT_ID => globals.report_id = unsigned as u8,
            PUSH => stack.push(globals),
            POP => {
                globals = stack
                    .pop()
                    .ok_or(Error::InvalidLayout("pop without push"))?;
            }
            USAGE => {
                let usage = extended(unsigned, globals.usage_page);
                locals.usages.push(usage);
            }
            USAGE_MINIMUM => {
                let max = locals.range.map_or(unsigned, |(_, max)| max);
                locals.range = Some((unsigned, max));
            }
            USAGE_MAXIMUM => {
                let min = locals.range.map_or(unsigned, |(min, _)| min);
                locals.range = Some((min, unsigned));
            }
            COLLECTION => {
                if depth == 0 && summary.top_usage == (0, 0) {
                    if let Some(usage) = locals.usages.first() {
                        summary.top_usage = *usage;
                    }
                }
                depth += 1;
                locals = Locals::default();
            }
            END_COLLECTION => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(Error::InvalidLayout("unbalanced end collection"))?;
            }
            INPUT => {
                let bits = globals.report_size * globals.report_count;
                match input_bits.iter_mut().find(|(id, _)| *id == globals.report_id) {
                    Some((_, total)) => *total += bits,
                    None => input_bits.push((globals.report_id, bits)),
                }
                add_id(&mut summary.input_report_ids, globals.report_id);
                if unsigned & u32::from(CNST) == 0 {
                    count_controls(&mut summary, &globals, &locals, unsigned);
                }
                locals = Locals::default();
            }
            OUTPUT => {
                add_id(&mut summary.output_report_ids, globals.report_id);
                locals = Locals::default();
            }
            FEATURE => {
                add_id(&mut summary.feature_report_ids, globals.report_id);
                locals = Locals::default();
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(Error::InvalidLayout("unterminated collection"));
    }
    summary.max_input_len = input_bits
        .iter()
        .map(|(id, bits)| bits.div_ceil(8) as usize + usize::from(*id != 0))
        .max()
        .unwrap_or(0);
    Ok(summary)
}

fn count_controls(summary: &mut DescriptorSummary, globals: &Globals, locals: &Locals, flags: u32) {
    let count = globals.report_count as usize;
    if flags & u32::from(VAR) == 0 {
        // array fields select from their usage range
        if let Some((min, max)) = locals.range {
            if extended(min, globals.usage_page).0 == page::BUTTON {
                summary.buttons += (max.saturating_sub(min) + 1) as usize;
            }
        }
        return;
    }
    for index in 0..count {
        let Some((usage_page, usage)) = locals.usage_at(index, globals.usage_page) else {
            if globals.usage_page == page::BUTTON {
                summary.buttons += 1;
            }
            continue;
        };
        match (usage_page, usage) {
            (page::BUTTON, _) => summary.buttons += 1,
            (page::GENERIC, generic::HATSWITCH) => summary.hats += 1,
            (page::GENERIC, generic::X..=generic::WHEEL) => summary.axes += 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AxisBits;
    use crate::descriptor::{DescriptorBuilder, ReportKind};
    use crate::physical::EffectType;

    #[test]
    fn summarizes_literal_joystick() {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::JOYSTICK).unwrap();
        builder.begin_report(ReportKind::Input).unwrap();
        builder
            .add_axes(
                page::GENERIC,
                &[generic::X, generic::Y, generic::SLIDER],
                false,
                AxisBits::ThirtyTwo,
                -512,
                511,
            )
            .unwrap();
        builder.add_buttons(page::BUTTON, 1, 11).unwrap();
        builder.add_hatswitch(2).unwrap();
        builder.align_input().unwrap();
        builder.end_report().unwrap();
        builder.add_haptics().unwrap();
        builder
            .add_physical(&[EffectType::Square, EffectType::Triangle])
            .unwrap();
        let desc = builder.end().unwrap();

        let summary = summarize(desc.as_bytes()).unwrap();
        assert_eq!(summary.top_usage, (page::GENERIC, generic::JOYSTICK));
        assert_eq!(summary.axes, 3);
        assert_eq!(summary.buttons, 11);
        assert_eq!(summary.hats, 2);
        assert_eq!(summary.input_report_ids.as_slice(), &[1]);
        assert_eq!(summary.output_report_ids.as_slice(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(summary.feature_report_ids.as_slice(), &[1]);
        assert_eq!(summary.max_input_len, desc.input().size());
    }

    #[test]
    fn counts_button_arrays() {
        // six array slots selecting from buttons 1..=16
        let desc = [
            0x05, 0x01, 0x09, 0x06, 0xa1, 0x01, 0x05, 0x09, 0x19, 0x01, 0x29, 0x10, 0x15, 0x00,
            0x25, 0x10, 0x75, 0x08, 0x95, 0x06, 0x81, 0x00, 0xc0,
        ];
        let summary = summarize(&desc).unwrap();
        assert_eq!(summary.buttons, 16);
        assert_eq!(summary.max_input_len, 6);
        assert!(summary.input_report_ids.is_empty());
    }

    #[test]
    fn rejects_truncated_items() {
        assert!(matches!(
            summarize(&[0x05, 0x01, 0x09]),
            Err(Error::SizeMismatch { .. })
        ));
        assert!(matches!(
            summarize(&[0x05, 0x01, 0x09, 0x04, 0xa1, 0x01]),
            Err(Error::InvalidLayout(_))
        ));
    }
}
