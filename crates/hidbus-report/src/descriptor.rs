use smallvec::SmallVec;

use crate::codec::{
    AxisBits, AxisBlock, ButtonBlock, Field, FieldKind, FieldOffset, HatBlock, InputLayout,
};
use crate::error::{Error, Result};
use crate::haptics::{self, HapticsReportIds};
use crate::physical::{self, EffectType, PhysicalReportIds};
use crate::usage::{generic, page};

// Item prefixes without the size bits.
pub(crate) const USAGE_PAGE: u8 = 0x04;
pub(crate) const USAGE: u8 = 0x08;
pub(crate) const USAGE_MINIMUM: u8 = 0x18;
pub(crate) const USAGE_MAXIMUM: u8 = 0x28;
pub(crate) const LOGICAL_MINIMUM: u8 = 0x14;
pub(crate) const LOGICAL_MAXIMUM: u8 = 0x24;
pub(crate) const PHYSICAL_MINIMUM: u8 = 0x34;
pub(crate) const PHYSICAL_MAXIMUM: u8 = 0x44;
pub(crate) const UNIT_EXPONENT: u8 = 0x54;
pub(crate) const UNIT: u8 = 0x64;
pub(crate) const REPORT_SIZE: u8 = 0x74;
pub(crate) const REPORT_ID: u8 = 0x84;
pub(crate) const REPORT_COUNT: u8 = 0x94;
pub(crate) const PUSH: u8 = 0xa4;
pub(crate) const POP: u8 = 0xb4;
pub(crate) const INPUT: u8 = 0x80;
pub(crate) const OUTPUT: u8 = 0x90;
pub(crate) const COLLECTION: u8 = 0xa0;
pub(crate) const FEATURE: u8 = 0xb0;
pub(crate) const END_COLLECTION: u8 = 0xc0;

// Main item flags.
pub(crate) const DATA: u8 = 0x00;
pub(crate) const CNST: u8 = 0x01;
pub(crate) const ARY: u8 = 0x00;
pub(crate) const VAR: u8 = 0x02;
pub(crate) const ABS: u8 = 0x00;
pub(crate) const REL: u8 = 0x04;
pub(crate) const NULL: u8 = 0x40;

/// Collection types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Collection {
    Physical = 0x00,
    Application = 0x01,
    Logical = 0x02,
    Report = 0x03,
    NamedArray = 0x04,
}

/// Report categories, each with its own id sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportKind {
    Input = 0,
    Output = 1,
    Feature = 2,
}

/// Staging area for the items of a single builder call.
///
/// Items are collected here first and appended to the descriptor in one
/// step, so a failed call never leaves a half-written item behind.
#[derive(Default)]
pub(crate) struct Items {
    bytes: SmallVec<[u8; 128]>,
    failed: bool,
}

impl Items {
    fn put(&mut self, bytes: &[u8]) {
        if self.failed || self.bytes.try_reserve(bytes.len()).is_err() {
            self.failed = true;
            return;
        }
        self.bytes.extend_from_slice(bytes);
    }

    fn short(&mut self, prefix: u8, data: &[u8]) -> &mut Self {
        let size = match data.len() {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 3,
        };
        self.put(&[prefix | size]);
        self.put(data);
        self
    }

    /// Emits an item with unsigned data in the smallest fitting size.
    pub(crate) fn unsigned(&mut self, prefix: u8, value: u32) -> &mut Self {
        let bytes = value.to_le_bytes();
        match value {
            0..=0xff => self.short(prefix, &bytes[..1]),
            0x100..=0xffff => self.short(prefix, &bytes[..2]),
            _ => self.short(prefix, &bytes),
        }
    }

    /// Emits an item with signed data in the smallest fitting size.
    pub(crate) fn signed(&mut self, prefix: u8, value: i32) -> &mut Self {
        let bytes = value.to_le_bytes();
        if i8::try_from(value).is_ok() {
            self.short(prefix, &bytes[..1])
        } else if i16::try_from(value).is_ok() {
            self.short(prefix, &bytes[..2])
        } else {
            self.short(prefix, &bytes)
        }
    }

    pub(crate) fn usage_page(&mut self, usage_page: u16) -> &mut Self {
        self.unsigned(USAGE_PAGE, u32::from(usage_page))
    }

    pub(crate) fn usage(&mut self, usage: u16) -> &mut Self {
        self.unsigned(USAGE, u32::from(usage))
    }

    pub(crate) fn logical(&mut self, min: i32, max: i32) -> &mut Self {
        self.signed(LOGICAL_MINIMUM, min).signed(LOGICAL_MAXIMUM, max)
    }

    pub(crate) fn physical(&mut self, min: i32, max: i32) -> &mut Self {
        self.signed(PHYSICAL_MINIMUM, min).signed(PHYSICAL_MAXIMUM, max)
    }

    pub(crate) fn report(&mut self, size: u8, count: u16) -> &mut Self {
        self.unsigned(REPORT_SIZE, u32::from(size))
            .unsigned(REPORT_COUNT, u32::from(count))
    }

    /// Unit exponents are four-bit two's complement values.
    pub(crate) fn unit(&mut self, unit: u32, exponent: i8) -> &mut Self {
        self.unsigned(UNIT, unit)
            .short(UNIT_EXPONENT, &[(exponent as u8) & 0x0f])
    }

    pub(crate) fn report_id(&mut self, id: u8) -> &mut Self {
        self.short(REPORT_ID, &[id])
    }

    pub(crate) fn collection(&mut self, kind: Collection) -> &mut Self {
        self.short(COLLECTION, &[kind as u8])
    }

    pub(crate) fn end_collection(&mut self) -> &mut Self {
        self.short(END_COLLECTION, &[])
    }

    pub(crate) fn input(&mut self, flags: u8) -> &mut Self {
        self.short(INPUT, &[flags])
    }

    pub(crate) fn output(&mut self, flags: u8) -> &mut Self {
        self.short(OUTPUT, &[flags])
    }

    pub(crate) fn feature(&mut self, flags: u8) -> &mut Self {
        self.short(FEATURE, &[flags])
    }
}

/// Input fields recorded while the descriptor is being built.
#[derive(Default)]
struct LayoutRecorder {
    report_id: Option<u8>,
    bits: u32,
    fields: Vec<Field>,
    open: bool,
}

impl LayoutRecorder {
    fn record(&mut self, field: Field) -> FieldOffset {
        let offset = FieldOffset::from_bits(self.bits);
        self.bits += u32::from(field.width) * u32::from(field.count);
        self.fields.push(Field { offset, ..field });
        offset
    }
}

/// Append-only assembler for HID report descriptors.
///
/// Every `add_*` call returns the position its value will occupy in the
/// input report, which callers keep for encoding.
pub struct DescriptorBuilder {
    data: Vec<u8>,
    next_report_id: [u8; 3],
    depth: usize,
    input: LayoutRecorder,
    haptics: Option<HapticsReportIds>,
    physical: Option<PhysicalReportIds>,
}

impl DescriptorBuilder {
    /// Opens the top-level application collection.
    pub fn begin(usage_page: u16, usage: u16) -> Result<Self> {
        let mut builder = Self {
            data: Vec::new(),
            next_report_id: [0; 3],
            depth: 0,
            input: LayoutRecorder::default(),
            haptics: None,
            physical: None,
        };
        let mut items = Items::default();
        items
            .usage_page(usage_page)
            .usage(usage)
            .collection(Collection::Application);
        builder.append(&items)?;
        builder.depth = 1;
        Ok(builder)
    }

    /// Bytes appended so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn append(&mut self, items: &Items) -> Result<()> {
        if items.failed {
            return Err(Error::OutOfMemory);
        }
        let needed = self.data.len() + items.bytes.len();
        if needed > self.data.capacity() {
            let grown = (self.data.capacity() * 3 / 2).max(needed);
            self.data
                .try_reserve_exact(grown - self.data.len())
                .map_err(|_| Error::OutOfMemory)?;
        }
        self.data.extend_from_slice(&items.bytes);
        Ok(())
    }

    fn next_id(&mut self, kind: ReportKind) -> Result<u8> {
        let slot = &mut self.next_report_id[kind as usize];
        *slot = slot
            .checked_add(1)
            .ok_or(Error::InvalidLayout("report ids exhausted"))?;
        Ok(*slot)
    }

    /// Runs `block`, restoring the report id counters if it fails.
    fn with_rollback<T>(&mut self, block: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.next_report_id;
        let result = block(self);
        if result.is_err() {
            self.next_report_id = saved;
        }
        result
    }

    /// Opens a report collection and assigns it the next id of its category.
    pub fn begin_report(&mut self, kind: ReportKind) -> Result<u8> {
        if kind == ReportKind::Input
            && (self.input.report_id.is_some() || !self.input.fields.is_empty())
        {
            return Err(Error::InvalidLayout("only one input report is supported"));
        }
        let id = self.next_id(kind)?;
        let mut items = Items::default();
        items.collection(Collection::Report).report_id(id);
        self.append(&items)?;
        self.depth += 1;
        if kind == ReportKind::Input {
            self.input.report_id = Some(id);
            self.input.bits = 8;
            self.input.open = true;
        }
        Ok(id)
    }

    /// Closes the report collection opened by [`Self::begin_report`].
    pub fn end_report(&mut self) -> Result<()> {
        if self.depth < 2 {
            return Err(Error::InvalidLayout("no open report collection"));
        }
        let mut items = Items::default();
        items.end_collection();
        self.append(&items)?;
        self.depth -= 1;
        self.input.open = false;
        Ok(())
    }

    fn check_input_open(&self) -> Result<()> {
        if self.input.report_id.is_some() && !self.input.open {
            return Err(Error::InvalidLayout("input report already closed"));
        }
        Ok(())
    }

    /// Appends a one-bit-per-usage button field covering `usage_min..=usage_max`.
    pub fn add_buttons(
        &mut self,
        usage_page: u16,
        usage_min: u16,
        usage_max: u16,
    ) -> Result<ButtonBlock> {
        self.check_input_open()?;
        if usage_max < usage_min {
            return Err(Error::InvalidLayout("empty button range"));
        }
        let count = usage_max - usage_min + 1;
        let mut items = Items::default();
        items
            .usage_page(usage_page)
            .unsigned(USAGE_MINIMUM, u32::from(usage_min))
            .unsigned(USAGE_MAXIMUM, u32::from(usage_max))
            .logical(0, 1)
            .physical(0, 1)
            .report(1, count)
            .input(DATA | VAR | ABS);
        self.append(&items)?;

        let offset = self.input.record(Field {
            kind: FieldKind::Buttons,
            offset: FieldOffset::default(),
            width: 1,
            count,
            usage_page,
            usage: usage_min,
            logical_min: 0,
            logical_max: 1,
        });
        Ok(ButtonBlock::new(offset, count))
    }

    /// Appends constant filler bits.
    pub fn add_padding(&mut self, bits: u8) -> Result<FieldOffset> {
        self.check_input_open()?;
        if bits == 0 {
            return Err(Error::InvalidLayout("zero-width padding"));
        }
        let mut items = Items::default();
        items.report(1, u16::from(bits)).input(CNST | VAR | ABS);
        self.append(&items)?;

        Ok(self.input.record(Field {
            kind: FieldKind::Padding,
            offset: FieldOffset::default(),
            width: 1,
            count: u16::from(bits),
            usage_page: 0,
            usage: 0,
            logical_min: 0,
            logical_max: 0,
        }))
    }

    /// Pads the input report to the next byte boundary, if needed.
    pub fn align_input(&mut self) -> Result<()> {
        let rem = self.input.bits % 8;
        if rem != 0 {
            self.add_padding((8 - rem) as u8)?;
        }
        Ok(())
    }

    /// Appends `count` nullable 4-bit hatswitch fields.
    pub fn add_hatswitch(&mut self, count: u8) -> Result<HatBlock> {
        self.check_input_open()?;
        if count == 0 {
            return Err(Error::InvalidLayout("no hatswitches"));
        }
        let mut items = Items::default();
        items
            .usage_page(page::GENERIC)
            .usage(generic::HATSWITCH)
            .logical(1, 8)
            .physical(0, 315)
            // English rotation, degrees
            .unit(0x14, 0)
            .report(4, u16::from(count))
            .input(DATA | VAR | ABS | NULL)
            .unit(0, 0);
        self.append(&items)?;

        let offset = self.input.record(Field {
            kind: FieldKind::Hatswitch,
            offset: FieldOffset::default(),
            width: 4,
            count: u16::from(count),
            usage_page: page::GENERIC,
            usage: generic::HATSWITCH,
            logical_min: 1,
            logical_max: 8,
        });
        Ok(HatBlock::new(offset, count))
    }

    /// Appends one axis per usage, wrapped in a physical collection.
    ///
    /// Relative axes must be 8 bits wide; their values are clamped to
    /// -127..=127 on encode.
    pub fn add_axes(
        &mut self,
        usage_page: u16,
        usages: &[u16],
        relative: bool,
        bits: AxisBits,
        min: i32,
        max: i32,
    ) -> Result<AxisBlock> {
        self.check_input_open()?;
        let count = u8::try_from(usages.len())
            .ok()
            .filter(|count| *count > 0)
            .ok_or(Error::InvalidLayout("axis count must be 1..=255"))?;
        if min > max {
            return Err(Error::InvalidLayout("axis minimum above maximum"));
        }
        if relative && bits != AxisBits::Eight {
            return Err(Error::InvalidLayout("relative axes are 8 bits wide"));
        }

        let mut items = Items::default();
        items.usage_page(usage_page).collection(Collection::Physical);
        for usage in usages {
            items.usage(*usage);
        }
        items
            .logical(min, max)
            .physical(min, max)
            .report(bits.width(), u16::from(count))
            .input(DATA | VAR | if relative { REL } else { ABS })
            .end_collection();
        self.append(&items)?;

        let offset = self.input.record(Field {
            kind: FieldKind::Axis { relative },
            offset: FieldOffset::default(),
            width: bits.width(),
            count: u16::from(count),
            usage_page,
            usage: usages[0],
            logical_min: min,
            logical_max: max,
        });
        Ok(AxisBlock::new(offset, count, bits, relative, min, max))
    }

    /// Appends the vendor rumble report and the haptics controller reports.
    pub fn add_haptics(&mut self) -> Result<HapticsReportIds> {
        if self.depth != 1 {
            return Err(Error::InvalidLayout("haptics must be added at top level"));
        }
        let ids = self.with_rollback(|builder| {
            let ids = HapticsReportIds {
                vendor_rumble: builder.next_id(ReportKind::Output)?,
                features: builder.next_id(ReportKind::Feature)?,
                waveform: builder.next_id(ReportKind::Output)?,
            };
            let mut items = Items::default();
            haptics::append_items(&mut items, ids);
            builder.append(&items)?;
            Ok(ids)
        })?;
        self.haptics = Some(ids);
        Ok(ids)
    }

    /// Appends the force-feedback (PID) reports for the given effect types.
    pub fn add_physical(&mut self, effect_types: &[EffectType]) -> Result<PhysicalReportIds> {
        if self.depth != 1 {
            return Err(Error::InvalidLayout("physical block must be added at top level"));
        }
        if effect_types.is_empty() {
            return Err(Error::InvalidLayout("no effect types"));
        }
        let has_periodic = effect_types.iter().any(|t| t.is_periodic());
        let has_constant = effect_types.contains(&EffectType::ConstantForce);
        let ids = self.with_rollback(|builder| {
            let ids = PhysicalReportIds {
                device_control: builder.next_id(ReportKind::Output)?,
                effect_operation: builder.next_id(ReportKind::Output)?,
                set_effect: builder.next_id(ReportKind::Output)?,
                set_periodic: if has_periodic {
                    Some(builder.next_id(ReportKind::Output)?)
                } else {
                    None
                },
                set_constant_force: if has_constant {
                    Some(builder.next_id(ReportKind::Output)?)
                } else {
                    None
                },
                effect_types: effect_types.iter().copied().collect(),
            };
            let mut items = Items::default();
            physical::append_items(&mut items, &ids);
            builder.append(&items)?;
            Ok(ids)
        })?;
        self.physical = Some(ids.clone());
        Ok(ids)
    }

    /// Closes the application collection and freezes the descriptor.
    pub fn end(mut self) -> Result<ReportDescriptor> {
        if self.depth != 1 {
            return Err(Error::InvalidLayout("unbalanced collections"));
        }
        let numbered = self.next_report_id[1..].iter().any(|id| *id > 0);
        if numbered && self.input.report_id.is_none() && !self.input.fields.is_empty() {
            return Err(Error::InvalidLayout(
                "input report needs an id when other reports are numbered",
            ));
        }
        let mut items = Items::default();
        items.end_collection();
        self.append(&items)?;

        let input = InputLayout {
            report_id: self.input.report_id,
            size: self.input.bits.div_ceil(8) as usize,
            fields: self.input.fields,
        };
        Ok(ReportDescriptor {
            data: self.data,
            input,
            haptics: self.haptics,
            physical: self.physical,
        })
    }
}

/// A finished report descriptor together with the layout it describes.
#[derive(Debug, Clone)]
pub struct ReportDescriptor {
    data: Vec<u8>,
    input: InputLayout,
    haptics: Option<HapticsReportIds>,
    physical: Option<PhysicalReportIds>,
}

impl ReportDescriptor {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn input(&self) -> &InputLayout {
        &self.input
    }

    pub fn haptics(&self) -> Option<HapticsReportIds> {
        self.haptics
    }

    pub fn physical(&self) -> Option<&PhysicalReportIds> {
        self.physical.as_ref()
    }

    /// Copies the descriptor into `buffer`, returning the written length.
    pub fn copy_to(&self, buffer: &mut [u8]) -> Result<usize> {
        copy_descriptor(&self.data, buffer)
    }
}

/// Copies descriptor bytes into a caller buffer, reporting the required size
/// when it is too small.
pub fn copy_descriptor(descriptor: &[u8], buffer: &mut [u8]) -> Result<usize> {
    let Some(target) = buffer.get_mut(..descriptor.len()) else {
        return Err(Error::BufferTooSmall {
            required: descriptor.len(),
        });
    };
    target.copy_from_slice(descriptor);
    Ok(descriptor.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::summarize;
    use crate::usage::{generic, page};

    #[test]
    fn begin_opens_application_collection() {
        let builder = DescriptorBuilder::begin(page::GENERIC, generic::JOYSTICK).unwrap();
        assert_eq!(builder.as_bytes(), &[0x05, 0x01, 0x09, 0x04, 0xa1, 0x01]);
    }

    #[test]
    fn end_closes_application_collection() {
        let desc = DescriptorBuilder::begin(page::GENERIC, generic::GAMEPAD)
            .unwrap()
            .end()
            .unwrap();
        assert_eq!(desc.as_bytes().last(), Some(&0xc0));
        assert_eq!(desc.input().size(), 0);
    }

    #[test]
    fn end_rejects_open_report() {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::GAMEPAD).unwrap();
        builder.begin_report(ReportKind::Input).unwrap();
        assert!(matches!(builder.end(), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn report_ids_increase_per_category() {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::GAMEPAD).unwrap();
        assert_eq!(builder.begin_report(ReportKind::Input).unwrap(), 1);
        builder.end_report().unwrap();
        let haptics = builder.add_haptics().unwrap();
        assert_eq!(haptics.vendor_rumble, 1);
        assert_eq!(haptics.features, 1);
        assert_eq!(haptics.waveform, 2);

        let physical = builder
            .add_physical(&[EffectType::Sine, EffectType::ConstantForce])
            .unwrap();
        assert_eq!(physical.device_control, 3);
        assert_eq!(physical.effect_operation, 4);
        assert_eq!(physical.set_effect, 5);
        assert_eq!(physical.set_periodic, Some(6));
        assert_eq!(physical.set_constant_force, Some(7));
    }

    #[test]
    fn offsets_follow_report_id_byte() {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::JOYSTICK).unwrap();
        builder.begin_report(ReportKind::Input).unwrap();
        let axes = builder
            .add_axes(
                page::GENERIC,
                &[generic::X, generic::Y],
                false,
                AxisBits::Sixteen,
                -32768,
                32767,
            )
            .unwrap();
        let buttons = builder.add_buttons(page::BUTTON, 1, 10).unwrap();
        let hats = builder.add_hatswitch(1).unwrap();
        builder.align_input().unwrap();
        builder.end_report().unwrap();
        let desc = builder.end().unwrap();

        assert_eq!(axes.offset().byte(), 1);
        assert_eq!(buttons.offset().byte(), 5);
        assert_eq!(hats.offset().bits(), 5 * 8 + 10);
        // 54 bits rounded up to whole bytes
        assert_eq!(desc.input().size(), 7);
        assert_eq!(desc.input().report_id(), Some(1));
    }

    #[test]
    fn exhausted_ids_leave_counters_untouched() {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::JOYSTICK).unwrap();
        builder.next_report_id[ReportKind::Output as usize] = u8::MAX - 1;
        let before = builder.next_report_id;
        let len = builder.as_bytes().len();

        // vendor rumble and features get ids, the waveform report does not
        assert!(builder.add_haptics().is_err());
        assert_eq!(builder.next_report_id, before);
        assert_eq!(builder.as_bytes().len(), len);

        assert!(builder.add_physical(&[EffectType::Sine]).is_err());
        assert_eq!(builder.next_report_id, before);
        assert!(builder.haptics.is_none() && builder.physical.is_none());
    }

    #[test]
    fn numbered_outputs_require_numbered_input() {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::JOYSTICK).unwrap();
        builder.add_buttons(page::BUTTON, 1, 8).unwrap();
        builder.add_haptics().unwrap();
        assert!(matches!(builder.end(), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn relative_axes_must_be_bytes() {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::MOUSE).unwrap();
        let err = builder
            .add_axes(page::GENERIC, &[generic::X], true, AxisBits::Sixteen, -127, 127)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLayout(_)));
        // Nothing was appended by the failed call.
        assert_eq!(builder.as_bytes().len(), 6);
    }

    #[test]
    fn growth_keeps_descriptor_parseable() {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::JOYSTICK).unwrap();
        for _ in 0..40 {
            builder.add_buttons(page::BUTTON, 1, 8).unwrap();
        }
        let desc = builder.end().unwrap();
        let summary = summarize(desc.as_bytes()).unwrap();
        assert_eq!(summary.buttons, 320);
        assert_eq!(desc.input().size(), 40);
    }

    #[test]
    fn large_logical_ranges_use_wide_items() {
        let mut items = Items::default();
        items.logical(0, 65535);
        assert_eq!(
            items.bytes.as_slice(),
            &[0x15, 0x00, 0x27, 0xff, 0xff, 0x00, 0x00]
        );
        let mut items = Items::default();
        items.logical(-127, 127);
        assert_eq!(items.bytes.as_slice(), &[0x15, 0x81, 0x25, 0x7f]);
    }

    #[test]
    fn copy_to_reports_required_size() {
        let desc = DescriptorBuilder::begin(page::GENERIC, generic::GAMEPAD)
            .unwrap()
            .end()
            .unwrap();
        let mut small = [0u8; 3];
        assert_eq!(
            desc.copy_to(&mut small),
            Err(Error::BufferTooSmall { required: desc.len() })
        );
        let mut buf = [0u8; 64];
        assert_eq!(desc.copy_to(&mut buf), Ok(desc.len()));
        assert_eq!(&buf[..desc.len()], desc.as_bytes());
    }
}
