use crate::error::{Error, Result};

/// Bit position of a field inside an input report, counted from the first
/// byte of the report (the report id byte when the report is numbered).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldOffset(u32);

impl FieldOffset {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Byte holding the first bit of the field.
    pub const fn byte(self) -> usize {
        (self.0 / 8) as usize
    }

    /// Bit position of the field inside [`Self::byte`].
    pub const fn shift(self) -> u8 {
        (self.0 % 8) as u8
    }

    const fn advance(self, bits: u32) -> Self {
        Self(self.0 + bits)
    }
}

/// Supported axis widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisBits {
    Eight,
    Sixteen,
    ThirtyTwo,
}

impl AxisBits {
    pub const fn width(self) -> u8 {
        match self {
            AxisBits::Eight => 8,
            AxisBits::Sixteen => 16,
            AxisBits::ThirtyTwo => 32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Buttons,
    Axis { relative: bool },
    Hatswitch,
    Padding,
}

/// One entry of the input field table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub offset: FieldOffset,
    pub width: u8,
    pub count: u16,
    pub usage_page: u16,
    /// First usage of the field (usage minimum for buttons).
    pub usage: u16,
    pub logical_min: i32,
    pub logical_max: i32,
}

/// Shape of the input report described by a synthesized descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputLayout {
    pub(crate) report_id: Option<u8>,
    pub(crate) size: usize,
    pub(crate) fields: Vec<Field>,
}

impl InputLayout {
    pub fn report_id(&self) -> Option<u8> {
        self.report_id
    }

    /// Report length in bytes, id byte included.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// Fixed-size input report buffer, prefilled with its report id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputReport {
    data: Vec<u8>,
}

impl InputReport {
    pub fn new(layout: &InputLayout) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(layout.size)
            .map_err(|_| Error::OutOfMemory)?;
        data.resize(layout.size, 0);
        if let (Some(id), Some(first)) = (layout.report_id, data.first_mut()) {
            *first = id;
        }
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies the current state out, failing instead of aborting on
    /// allocation failure.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let mut copy = Vec::new();
        copy.try_reserve_exact(self.data.len())
            .map_err(|_| Error::OutOfMemory)?;
        copy.extend_from_slice(&self.data);
        Ok(copy)
    }
}

/// Writes the low `width` bits of `value` at `offset`, little endian.
pub fn write_bits(report: &mut [u8], offset: FieldOffset, width: u8, value: u32) -> Result<()> {
    let end = offset.bits() + u32::from(width);
    let required = end.div_ceil(8) as usize;
    if report.len() < required {
        return Err(Error::BufferTooSmall { required });
    }
    let mut bit = offset.bits();
    let mut remaining = u32::from(width);
    let mut value = value;
    while remaining > 0 {
        let byte = &mut report[(bit / 8) as usize];
        let shift = bit % 8;
        let take = (8 - shift).min(remaining);
        let mask = (((1u16 << take) - 1) as u8) << shift;
        *byte = (*byte & !mask) | (((value as u8) << shift) & mask);
        value = value.checked_shr(take).unwrap_or(0);
        bit += take;
        remaining -= take;
    }
    Ok(())
}

/// Reads `width` bits at `offset` as an unsigned value.
pub fn read_bits(report: &[u8], offset: FieldOffset, width: u8) -> Option<u32> {
    let end = offset.bits() + u32::from(width);
    if report.len() < end.div_ceil(8) as usize {
        return None;
    }
    let mut bit = offset.bits();
    let mut filled = 0u32;
    let mut value = 0u32;
    while filled < u32::from(width) {
        let byte = report[(bit / 8) as usize];
        let shift = bit % 8;
        let take = (8 - shift).min(u32::from(width) - filled);
        let part = (u32::from(byte) >> shift) & ((1u32 << take) - 1);
        value |= part << filled;
        filled += take;
        bit += take;
    }
    Some(value)
}

fn sign_extend(value: u32, width: u8) -> i32 {
    let unused = 32 - u32::from(width);
    ((value << unused) as i32) >> unused
}

/// A contiguous one-bit-per-usage button field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ButtonBlock {
    offset: FieldOffset,
    count: u16,
}

impl ButtonBlock {
    pub(crate) const fn new(offset: FieldOffset, count: u16) -> Self {
        Self { offset, count }
    }

    pub fn offset(&self) -> FieldOffset {
        self.offset
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// Sets button `index`; indices past the block are ignored.
    pub fn set(&self, report: &mut [u8], index: u16, pressed: bool) {
        if index >= self.count {
            return;
        }
        let bit = self.offset.advance(u32::from(index));
        let mask = 1u8 << bit.shift();
        if let Some(byte) = report.get_mut(bit.byte()) {
            if pressed {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }

    pub fn get(&self, report: &[u8], index: u16) -> Option<bool> {
        if index >= self.count {
            return None;
        }
        let bit = self.offset.advance(u32::from(index));
        report
            .get(bit.byte())
            .map(|byte| byte & (1 << bit.shift()) != 0)
    }
}

/// A run of equally sized axes sharing one logical range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisBlock {
    offset: FieldOffset,
    count: u8,
    bits: AxisBits,
    relative: bool,
    logical_min: i32,
    logical_max: i32,
}

impl AxisBlock {
    pub(crate) const fn new(
        offset: FieldOffset,
        count: u8,
        bits: AxisBits,
        relative: bool,
        logical_min: i32,
        logical_max: i32,
    ) -> Self {
        Self {
            offset,
            count,
            bits,
            relative,
            logical_min,
            logical_max,
        }
    }

    pub fn offset(&self) -> FieldOffset {
        self.offset
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn is_relative(&self) -> bool {
        self.relative
    }

    pub fn range(&self) -> (i32, i32) {
        (self.logical_min, self.logical_max)
    }

    fn axis_offset(&self, index: u8) -> FieldOffset {
        self.offset
            .advance(u32::from(index) * u32::from(self.bits.width()))
    }

    /// Encodes axis `index`.
    ///
    /// Relative values are clamped to -127..=127. Absolute values outside the
    /// logical range are rejected and the field keeps its previous value.
    pub fn set(&self, report: &mut [u8], index: u8, value: i32) -> Result<()> {
        if index >= self.count {
            return Err(Error::InvalidParameter("axis index"));
        }
        let raw = if self.relative {
            value.clamp(-127, 127)
        } else if (self.logical_min..=self.logical_max).contains(&value) {
            value
        } else {
            return Err(Error::OutOfRange {
                value,
                min: self.logical_min,
                max: self.logical_max,
            });
        };
        write_bits(report, self.axis_offset(index), self.bits.width(), raw as u32)
    }

    pub fn get(&self, report: &[u8], index: u8) -> Option<i32> {
        if index >= self.count {
            return None;
        }
        let width = self.bits.width();
        let raw = read_bits(report, self.axis_offset(index), width)?;
        if self.relative || self.logical_min < 0 {
            Some(sign_extend(raw, width))
        } else {
            Some(raw as i32)
        }
    }
}

/// Nine-way hatswitch position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HatDirection {
    #[default]
    Centered = 0,
    Up = 1,
    UpRight = 2,
    Right = 3,
    DownRight = 4,
    Down = 5,
    DownLeft = 6,
    Left = 7,
    UpLeft = 8,
}

impl HatDirection {
    pub const fn value(self) -> u8 {
        self as u8
    }

    pub const fn from_value(value: u8) -> Option<Self> {
        Some(match value {
            0 => HatDirection::Centered,
            1 => HatDirection::Up,
            2 => HatDirection::UpRight,
            3 => HatDirection::Right,
            4 => HatDirection::DownRight,
            5 => HatDirection::Down,
            6 => HatDirection::DownLeft,
            7 => HatDirection::Left,
            8 => HatDirection::UpLeft,
            _ => return None,
        })
    }

    /// Direction from two perpendicular hat axes. Negative `y` points up.
    pub fn from_axes(x: i32, y: i32) -> Self {
        match (x.signum(), y.signum()) {
            (0, 0) => HatDirection::Centered,
            (0, -1) => HatDirection::Up,
            (1, -1) => HatDirection::UpRight,
            (1, 0) => HatDirection::Right,
            (1, 1) => HatDirection::DownRight,
            (0, 1) => HatDirection::Down,
            (-1, 1) => HatDirection::DownLeft,
            (-1, 0) => HatDirection::Left,
            _ => HatDirection::UpLeft,
        }
    }

    /// Direction from four directional buttons; opposing presses cancel.
    pub fn from_dpad(up: bool, down: bool, left: bool, right: bool) -> Self {
        let x = i32::from(right) - i32::from(left);
        let y = i32::from(down) - i32::from(up);
        Self::from_axes(x, y)
    }
}

/// A run of 4-bit hatswitch fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HatBlock {
    offset: FieldOffset,
    count: u8,
}

impl HatBlock {
    pub(crate) const fn new(offset: FieldOffset, count: u8) -> Self {
        Self { offset, count }
    }

    pub fn offset(&self) -> FieldOffset {
        self.offset
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn set(&self, report: &mut [u8], index: u8, direction: HatDirection) -> Result<()> {
        if index >= self.count {
            return Err(Error::InvalidParameter("hatswitch index"));
        }
        let offset = self.offset.advance(u32::from(index) * 4);
        write_bits(report, offset, 4, u32::from(direction.value()))
    }

    pub fn get(&self, report: &[u8], index: u8) -> Option<HatDirection> {
        if index >= self.count {
            return None;
        }
        let offset = self.offset.advance(u32::from(index) * 4);
        read_bits(report, offset, 4).and_then(|value| HatDirection::from_value(value as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIRECTIONS: [HatDirection; 9] = [
        HatDirection::Centered,
        HatDirection::Up,
        HatDirection::UpRight,
        HatDirection::Right,
        HatDirection::DownRight,
        HatDirection::Down,
        HatDirection::DownLeft,
        HatDirection::Left,
        HatDirection::UpLeft,
    ];

    #[test]
    fn button_touches_only_its_bit() {
        let block = ButtonBlock::new(FieldOffset::from_bits(8), 20);
        for index in 0..20u16 {
            let mut report = [0u8; 4];
            block.set(&mut report, index, true);
            let byte = 1 + usize::from(index / 8);
            for (i, b) in report.iter().enumerate() {
                let expected = if i == byte { 1 << (index % 8) } else { 0 };
                assert_eq!(*b, expected, "index {index}");
            }
            assert_eq!(block.get(&report, index), Some(true));
            block.set(&mut report, index, false);
            assert_eq!(report, [0; 4]);
        }
    }

    #[test]
    fn button_out_of_block_is_ignored() {
        let block = ButtonBlock::new(FieldOffset::from_bits(0), 3);
        let mut report = [0u8; 1];
        block.set(&mut report, 3, true);
        assert_eq!(report, [0]);
        assert_eq!(block.get(&report, 3), None);
    }

    #[test]
    fn axes_keep_in_range_values() {
        let cases = [
            (AxisBits::Eight, -128, 127),
            (AxisBits::Eight, 0, 255),
            (AxisBits::Sixteen, -32768, 32767),
            (AxisBits::Sixteen, 0, 65535),
            (AxisBits::ThirtyTwo, i32::MIN, i32::MAX),
            (AxisBits::ThirtyTwo, 0, 1023),
        ];
        for (bits, min, max) in cases {
            let block = AxisBlock::new(FieldOffset::from_bits(8), 2, bits, false, min, max);
            let mut report = [0u8; 9];
            for value in [min, max, min / 2 + max / 2, 0.clamp(min, max)] {
                block.set(&mut report, 1, value).unwrap();
                assert_eq!(block.get(&report, 1), Some(value), "{bits:?} {value}");
                assert_eq!(block.get(&report, 0), Some(0));
            }
        }
    }

    #[test]
    fn absolute_out_of_range_leaves_field() {
        let block = AxisBlock::new(FieldOffset::from_bits(0), 1, AxisBits::Sixteen, false, 0, 1000);
        let mut report = [0u8; 2];
        block.set(&mut report, 0, 500).unwrap();
        let err = block.set(&mut report, 0, 1001).unwrap_err();
        assert_eq!(err, Error::OutOfRange { value: 1001, min: 0, max: 1000 });
        assert_eq!(block.get(&report, 0), Some(500));
    }

    #[test]
    fn relative_axes_clamp() {
        let block = AxisBlock::new(FieldOffset::from_bits(0), 2, AxisBits::Eight, true, -127, 127);
        let mut report = [0u8; 2];
        block.set(&mut report, 0, 500).unwrap();
        block.set(&mut report, 1, -500).unwrap();
        assert_eq!(report, [127, 0x81]);
        assert_eq!(block.get(&report, 1), Some(-127));
    }

    #[test]
    fn hats_in_both_nibbles() {
        let block = HatBlock::new(FieldOffset::from_bits(8), 2);
        for direction in DIRECTIONS {
            let mut report = [0u8; 2];
            block.set(&mut report, 0, direction).unwrap();
            assert_eq!(report[1], direction.value());
            block.set(&mut report, 1, direction).unwrap();
            assert_eq!(report[1], direction.value() | direction.value() << 4);
            assert_eq!(block.get(&report, 0), Some(direction));
            assert_eq!(block.get(&report, 1), Some(direction));
        }
    }

    #[test]
    fn hat_after_buttons_keeps_buttons() {
        let buttons = ButtonBlock::new(FieldOffset::from_bits(0), 4);
        let hat = HatBlock::new(FieldOffset::from_bits(4), 1);
        let mut report = [0u8; 1];
        buttons.set(&mut report, 0, true);
        buttons.set(&mut report, 3, true);
        hat.set(&mut report, 0, HatDirection::UpLeft).unwrap();
        assert_eq!(report[0], 0x89);
        hat.set(&mut report, 0, HatDirection::Centered).unwrap();
        assert_eq!(report[0], 0x09);
    }

    #[test]
    fn hat_straddling_bytes() {
        let hat = HatBlock::new(FieldOffset::from_bits(6), 1);
        let mut report = [0u8; 2];
        hat.set(&mut report, 0, HatDirection::UpLeft).unwrap();
        assert_eq!(report, [0x00, 0x02]);
        hat.set(&mut report, 0, HatDirection::Left).unwrap();
        assert_eq!(report, [0xc0, 0x01]);
        assert_eq!(hat.get(&report, 0), Some(HatDirection::Left));
    }

    #[test]
    fn hat_from_axes() {
        assert_eq!(HatDirection::from_axes(0, -1), HatDirection::Up);
        assert_eq!(HatDirection::from_axes(1, 1), HatDirection::DownRight);
        assert_eq!(HatDirection::from_axes(-32767, -1), HatDirection::UpLeft);
        assert_eq!(
            HatDirection::from_dpad(true, true, false, true),
            HatDirection::Right
        );
    }

    #[test]
    fn write_bits_checks_length() {
        let mut report = [0u8; 2];
        assert_eq!(
            write_bits(&mut report, FieldOffset::from_bits(12), 8, 0xff),
            Err(Error::BufferTooSmall { required: 3 })
        );
        assert_eq!(report, [0, 0]);
    }

    #[test]
    fn input_report_starts_with_id() {
        let layout = InputLayout {
            report_id: Some(3),
            size: 4,
            fields: Vec::new(),
        };
        let report = InputReport::new(&layout).unwrap();
        assert_eq!(report.as_bytes(), &[3, 0, 0, 0]);
        assert_eq!(report.snapshot().unwrap(), vec![3, 0, 0, 0]);
    }
}
