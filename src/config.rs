use alloc::string::String;
use snafu::Snafu;

use crate::crc::{CrcParams, CrcWidth};
use crate::{HEADER_MAX_LEN, HEADER_SLOTS};

/// Framing segment a length or CRC span is counted from, independent of
/// where the field itself sits in the packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CountOrigin {
    Preamble,
    Header,
    HeaderPad,
    Length,
    LengthPad,
    Data,
}

/// Stream byte order of a two-byte length field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LengthOrder {
    /// `"01"`: the first streamed byte is the low byte.
    LowThenHigh,
    /// `"10"`: the first streamed byte is the high byte.
    HighThenLow,
}

impl LengthOrder {
    pub const fn high_index(self) -> usize {
        match self {
            LengthOrder::LowThenHigh => 1,
            LengthOrder::HighThenLow => 0,
        }
    }

    pub const fn low_index(self) -> usize {
        1 - self.high_index()
    }
}

/// Stream byte order of the CRC field. Each streamed byte carries a
/// significance between 0 (low byte) and 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcByteOrder {
    /// `"0123"`: first streamed byte is the low byte.
    Ascending,
    /// `"1032"`: bytes swapped within 16-bit halves.
    ByteSwapped,
    /// `"2301"`: 16-bit halves swapped.
    WordSwapped,
    /// `"3210"`: first streamed byte is the high byte.
    Descending,
}

impl CrcByteOrder {
    pub const fn significance(self, pos: usize) -> u32 {
        const TABLE: [[u32; 4]; 4] = [[0, 1, 2, 3], [1, 0, 3, 2], [2, 3, 0, 1], [3, 2, 1, 0]];
        TABLE[self as usize][pos]
    }
}

/// One configurable header candidate, as entered by the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderSetting {
    pub active: bool,
    /// Hex string for header bytes 0..=3, up to 8 nibbles.
    pub value_high: String,
    /// Hex string for header bytes 4..=7, up to 8 nibbles.
    pub value_low: String,
}

/// Raw host-supplied configuration surface.
///
/// Every field mirrors one setting of the capture host; times are in
/// milliseconds, hex strings hold up to 8 ASCII nibbles. [`Settings::resolve`]
/// turns this into a typed [`Config`] and is the only place configuration
/// errors can surface.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Fixed total packet length; 0 disables it.
    pub packet_fix_length: u16,
    /// Idle time in ms required before a packet may start; 0 selects the
    /// flexible sliding-window header search.
    pub packet_starttime: f64,
    /// Mid-packet idle time in ms that aborts the current attempt; 0 disables.
    pub packet_timeout: f64,
    pub preamble_length: u16,
    /// Fixed header length in bytes, 0..=8.
    pub header_length: u8,
    pub header_mask_high: String,
    pub header_mask_low: String,
    pub headers: [HeaderSetting; HEADER_SLOTS],
    pub header_pad_length: u16,
    pub length_cnt_start: CountOrigin,
    /// Packet length used when `length_length == 0`.
    pub length_fix: u16,
    /// Additive length adjustment, -16384..=16384.
    pub length_offset: i32,
    /// Length field width in bytes, 0..=2.
    pub length_length: u8,
    pub length_order: LengthOrder,
    /// Per-byte length bit mask as a hex string.
    pub length_mask: String,
    pub length_pad_length: u16,
    pub data_pad_length: u16,
    pub crc_polynomial: String,
    pub crc_start_value: String,
    pub crc_finalize_value: String,
    pub crc_mirror_inputs: bool,
    pub crc_mirror_results: bool,
    /// CRC width in bits: 8, 16 or 32.
    pub crc_type: u8,
    /// Segment the CRC span is counted from; `None` disables the CRC engine.
    pub crc_cnt_start: Option<CountOrigin>,
    /// CRC field width in bytes, 0..=4.
    pub crc_length: u8,
    pub crc_order: CrcByteOrder,
    pub crc_pad_length: u16,
    pub trigger_value_high: String,
    pub trigger_value_low: String,
    pub trigger_mask_high: String,
    pub trigger_mask_low: String,
    /// Maximum trigger-to-trigger window in ms.
    pub trigger_tmax: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            packet_fix_length: 0,
            packet_starttime: 0.0,
            packet_timeout: 0.0,
            preamble_length: 0,
            header_length: 0,
            header_mask_high: String::new(),
            header_mask_low: String::new(),
            headers: core::array::from_fn(|_| HeaderSetting::default()),
            header_pad_length: 0,
            length_cnt_start: CountOrigin::Preamble,
            length_fix: 0,
            length_offset: 0,
            length_length: 0,
            length_order: LengthOrder::LowThenHigh,
            length_mask: String::new(),
            length_pad_length: 0,
            data_pad_length: 0,
            crc_polynomial: String::new(),
            crc_start_value: String::new(),
            crc_finalize_value: String::new(),
            crc_mirror_inputs: false,
            crc_mirror_results: false,
            crc_type: 8,
            crc_cnt_start: None,
            crc_length: 0,
            crc_order: CrcByteOrder::Ascending,
            crc_pad_length: 0,
            trigger_value_high: String::new(),
            trigger_value_low: String::new(),
            trigger_mask_high: String::new(),
            trigger_mask_low: String::new(),
            trigger_tmax: 0.0,
        }
    }
}

/// Enum of configuration errors.
#[non_exhaustive]
#[derive(Debug, PartialEq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[snafu(display("Non-hex character {found:?} in {field}"))]
    InvalidHexDigit { field: &'static str, found: char },
    #[snafu(display("{field} = {value} is outside the allowed range"))]
    ValueOutOfRange { field: &'static str, value: i64 },
    #[snafu(display("Timing {field} = {value} ms is outside 0..=999.999"))]
    TimingOutOfRange { field: &'static str, value: f64 },
    #[snafu(display("Unsupported CRC width {width}, must be 8, 16 or 32"))]
    InvalidCrcWidth { width: u8 },
}

/// One resolved header candidate: pre-masked bytes plus active flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderCandidate {
    pub bytes: [u8; HEADER_MAX_LEN],
    pub len: usize,
    pub active: bool,
}

impl HeaderCandidate {
    pub fn pattern(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Resolved length-field extraction parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LengthSpec {
    pub fix: u16,
    pub offset: i32,
    pub width: u8,
    pub order: LengthOrder,
    pub mask: [u8; 2],
    /// Bytes preceding the counting-origin segment; added to the raw length.
    pub shift: i64,
    pub pad: i64,
}

/// Resolved CRC field placement plus engine parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrcFieldSpec {
    pub params: CrcParams,
    pub len: i64,
    pub order: CrcByteOrder,
    /// Bytes preceding the counting-origin segment; accumulation starts
    /// once the position counter exceeds it.
    pub shift: i64,
    pub pad: i64,
    pub enabled: bool,
}

/// Immutable per-session configuration, resolved from [`Settings`].
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Required pre-packet idle gap in seconds; 0 selects flexible mode.
    pub start_idle: f64,
    /// Mid-packet abort gap in seconds; 0 disables.
    pub timeout: f64,
    pub preamble_len: i64,
    pub header_len: i64,
    pub header_mask: [u8; HEADER_MAX_LEN],
    pub headers: [HeaderCandidate; HEADER_SLOTS],
    pub header_pad: i64,
    pub length: LengthSpec,
    pub data_pad: i64,
    pub crc: CrcFieldSpec,
    pub trigger_value: [u8; HEADER_MAX_LEN],
    pub trigger_mask: [u8; HEADER_MAX_LEN],
    /// Maximum trigger-to-trigger window in seconds.
    pub trigger_tmax: f64,
    pub packet_fix_length: i64,
}

impl Config {
    /// Flexible sliding-window header search instead of the fixed-offset
    /// comparison evaluated after the start idle gap.
    pub fn is_flex(&self) -> bool {
        self.start_idle == 0.0
    }
}

/// Parses up to 8 ASCII hex nibbles into 4 bytes, left aligned. Nibbles
/// beyond the eighth are ignored; any non-hex character is a hard error.
pub(crate) fn parse_hex(field: &'static str, s: &str) -> Result<[u8; 4], ConfigError> {
    let mut out = [0u8; 4];
    for (i, b) in s.bytes().take(8).enumerate() {
        let nibble = match b {
            b'0'..=b'9' => b - b'0',
            b'A'..=b'F' => b - b'A' + 10,
            b'a'..=b'f' => b - b'a' + 10,
            _ => {
                return Err(ConfigError::InvalidHexDigit {
                    field,
                    found: b as char,
                })
            }
        };
        if i % 2 == 0 {
            out[i / 2] |= nibble << 4;
        } else {
            out[i / 2] |= nibble;
        }
    }
    Ok(out)
}

fn parse_hex8(
    field: &'static str,
    high: &str,
    low: &str,
) -> Result<[u8; HEADER_MAX_LEN], ConfigError> {
    let mut out = [0u8; HEADER_MAX_LEN];
    out[..4].copy_from_slice(&parse_hex(field, high)?);
    out[4..].copy_from_slice(&parse_hex(field, low)?);
    Ok(out)
}

fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::ValueOutOfRange { field, value });
    }
    Ok(())
}

fn check_timing(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=999.999).contains(&value) {
        return Err(ConfigError::TimingOutOfRange { field, value });
    }
    Ok(())
}

impl Settings {
    /// Resolves the raw settings into a typed [`Config`].
    ///
    /// Only ranges and hex syntax are validated; the resulting framing is not
    /// checked for protocol plausibility.
    pub fn resolve(&self) -> Result<Config, ConfigError> {
        check_range("header_length", self.header_length as i64, 0, 8)?;
        check_range("length_length", self.length_length as i64, 0, 2)?;
        check_range("crc_length", self.crc_length as i64, 0, 4)?;
        check_range("length_offset", self.length_offset as i64, -16384, 16384)?;
        check_timing("packet_starttime", self.packet_starttime)?;
        check_timing("packet_timeout", self.packet_timeout)?;
        check_timing("trigger_tmax", self.trigger_tmax)?;
        let width = CrcWidth::try_from(self.crc_type).map_err(|_| ConfigError::InvalidCrcWidth {
            width: self.crc_type,
        })?;

        let mut header_mask = parse_hex8("header mask", &self.header_mask_high, &self.header_mask_low)?;
        if header_mask.iter().all(|&m| m == 0) {
            header_mask = [0xff; HEADER_MAX_LEN];
        }

        let flex_lengths = self.header_length == 0 && self.packet_starttime == 0.0;
        let mut headers: [HeaderCandidate; HEADER_SLOTS] = core::array::from_fn(|_| HeaderCandidate {
            bytes: [0; HEADER_MAX_LEN],
            len: 0,
            active: false,
        });
        for (slot, setting) in self.headers.iter().enumerate() {
            let mut bytes = parse_hex8("header value", &setting.value_high, &setting.value_low)?;
            let len = if flex_lengths {
                // Candidate length follows the hex input, like the stream:
                // left aligned, whole bytes only.
                if setting.value_high.len() == 8 {
                    4 + setting.value_low.len() / 2
                } else {
                    setting.value_high.len() / 2
                }
            } else {
                self.header_length as usize
            };
            let len = len.min(HEADER_MAX_LEN);
            for j in 0..len {
                bytes[j] &= header_mask[j];
            }
            headers[slot] = HeaderCandidate {
                bytes,
                len,
                active: setting.active,
            };
        }

        let trigger_value =
            parse_hex8("trigger value", &self.trigger_value_high, &self.trigger_value_low)?;
        let mut trigger_mask =
            parse_hex8("trigger mask", &self.trigger_mask_high, &self.trigger_mask_low)?;
        if trigger_mask.iter().all(|&m| m == 0) {
            trigger_mask = trigger_value;
        }

        let preamble_len = self.preamble_length as i64;
        let header_len = self.header_length as i64;
        let header_pad = self.header_pad_length as i64;
        let length_len = self.length_length as i64;
        let length_pad = self.length_pad_length as i64;
        let origin_shift = |origin: CountOrigin| -> i64 {
            match origin {
                CountOrigin::Preamble => 0,
                CountOrigin::Header => preamble_len,
                CountOrigin::HeaderPad => preamble_len + header_len,
                CountOrigin::Length => preamble_len + header_len + header_pad,
                CountOrigin::LengthPad => preamble_len + header_len + header_pad + length_len,
                CountOrigin::Data => {
                    preamble_len + header_len + header_pad + length_len + length_pad
                }
            }
        };

        let length_mask = parse_hex("length mask", &self.length_mask)?;
        let length = LengthSpec {
            fix: self.length_fix,
            offset: self.length_offset,
            width: self.length_length,
            order: self.length_order,
            mask: [length_mask[0], length_mask[1]],
            shift: origin_shift(self.length_cnt_start),
            pad: length_pad,
        };

        let hex_shift = 32 - u8::from(width) as u32;
        let poly = u32::from_be_bytes(parse_hex("crc polynomial", &self.crc_polynomial)?) >> hex_shift;
        let init = u32::from_be_bytes(parse_hex("crc start value", &self.crc_start_value)?) >> hex_shift;
        let xorout =
            u32::from_be_bytes(parse_hex("crc finalize value", &self.crc_finalize_value)?) >> hex_shift;
        let crc = CrcFieldSpec {
            params: CrcParams {
                width,
                poly,
                init,
                xorout,
                reflect_in: self.crc_mirror_inputs,
                reflect_out: self.crc_mirror_results,
            },
            len: self.crc_length as i64,
            order: self.crc_order,
            shift: self.crc_cnt_start.map(origin_shift).unwrap_or(0),
            pad: self.crc_pad_length as i64,
            enabled: self.crc_cnt_start.is_some(),
        };

        let config = Config {
            start_idle: self.packet_starttime / 1000.0,
            timeout: self.packet_timeout / 1000.0,
            preamble_len,
            header_len,
            header_mask,
            headers,
            header_pad,
            length,
            data_pad: self.data_pad_length as i64,
            crc,
            trigger_value,
            trigger_mask,
            trigger_tmax: self.trigger_tmax / 1000.0,
            packet_fix_length: self.packet_fix_length as i64,
        };
        config.log_summary();
        Ok(config)
    }
}

impl Config {
    fn log_summary(&self) {
        log::debug!("header mask {:02x?}", self.header_mask);
        for (i, cand) in self.headers.iter().enumerate() {
            log::debug!(
                "header {} value {:02x?} active {}",
                i,
                cand.pattern(),
                cand.active
            );
        }
        log::debug!(
            "trigger value {:02x?} mask {:02x?} tmax {} ms",
            self.trigger_value,
            self.trigger_mask,
            self.trigger_tmax * 1000.0
        );
        log::debug!(
            "length width {} mask {:02x?} shift {} offset {}",
            self.length.width,
            self.length.mask,
            self.length.shift,
            self.length.offset
        );
        if self.crc.enabled {
            log::debug!(
                "crc poly {:#x} init {:#x} finalize {:#x} width {:?} shift {}",
                self.crc.params.poly,
                self.crc.params.init,
                self.crc.params.xorout,
                self.crc.params.width,
                self.crc.shift
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_left_aligned() {
        assert_eq!(parse_hex("t", "A5").unwrap(), [0xa5, 0, 0, 0]);
        assert_eq!(parse_hex("t", "a55a0fF0").unwrap(), [0xa5, 0x5a, 0x0f, 0xf0]);
        // Nibbles beyond the eighth are ignored
        assert_eq!(parse_hex("t", "1122334455").unwrap(), [0x11, 0x22, 0x33, 0x44]);
        // Odd nibble counts leave the low nibble clear
        assert_eq!(parse_hex("t", "ABC").unwrap(), [0xab, 0xc0, 0, 0]);
    }

    #[test]
    fn test_parse_hex_rejects_non_hex() {
        assert_eq!(
            parse_hex("header mask", "0G"),
            Err(ConfigError::InvalidHexDigit {
                field: "header mask",
                found: 'G'
            })
        );
    }

    #[test]
    fn test_header_mask_defaults_to_all_ones() {
        let settings = Settings::default();
        let config = settings.resolve().unwrap();
        assert_eq!(config.header_mask, [0xff; HEADER_MAX_LEN]);
    }

    #[test]
    fn test_trigger_mask_falls_back_to_value() {
        let mut settings = Settings::default();
        settings.trigger_value_high = "C0".into();
        let config = settings.resolve().unwrap();
        assert_eq!(config.trigger_mask, config.trigger_value);
        assert_eq!(config.trigger_value[0], 0xc0);
    }

    #[test]
    fn test_flex_candidate_length_follows_hex_input() {
        let mut settings = Settings::default();
        settings.headers[0].active = true;
        settings.headers[0].value_high = "AABB".into();
        settings.headers[1].active = true;
        settings.headers[1].value_high = "11223344".into();
        settings.headers[1].value_low = "CC".into();
        settings.headers[2].active = true;
        settings.headers[2].value_high = "A".into(); // single nibble, rounds down
        let config = settings.resolve().unwrap();
        assert_eq!(config.headers[0].pattern(), &[0xaa, 0xbb]);
        assert_eq!(config.headers[1].pattern(), &[0x11, 0x22, 0x33, 0x44, 0xcc]);
        assert_eq!(config.headers[2].pattern(), &[] as &[u8]);
    }

    #[test]
    fn test_fixed_candidate_length_follows_header_length() {
        let mut settings = Settings::default();
        settings.packet_starttime = 1.0;
        settings.header_length = 2;
        settings.headers[0].active = true;
        settings.headers[0].value_high = "A55A1122".into();
        let config = settings.resolve().unwrap();
        assert_eq!(config.headers[0].pattern(), &[0xa5, 0x5a]);
    }

    #[test]
    fn test_candidates_are_pre_masked() {
        let mut settings = Settings::default();
        settings.packet_starttime = 1.0;
        settings.header_length = 2;
        settings.header_mask_high = "F0FF".into();
        settings.headers[0].active = true;
        settings.headers[0].value_high = "A55A".into();
        let config = settings.resolve().unwrap();
        assert_eq!(config.headers[0].pattern(), &[0xa0, 0x5a]);
    }

    #[test]
    fn test_counting_origin_shifts() {
        let mut settings = Settings::default();
        settings.packet_starttime = 1.0;
        settings.preamble_length = 2;
        settings.header_length = 3;
        settings.header_pad_length = 1;
        settings.length_length = 2;
        settings.length_pad_length = 4;
        settings.length_cnt_start = CountOrigin::Data;
        settings.crc_cnt_start = Some(CountOrigin::Length);
        let config = settings.resolve().unwrap();
        assert_eq!(config.length.shift, 2 + 3 + 1 + 2 + 4);
        assert_eq!(config.crc.shift, 2 + 3 + 1);
    }

    #[test]
    fn test_crc_constants_shifted_to_width() {
        let mut settings = Settings::default();
        settings.crc_type = 16;
        settings.crc_polynomial = "1021".into();
        settings.crc_start_value = "FFFF".into();
        settings.crc_cnt_start = Some(CountOrigin::Preamble);
        let config = settings.resolve().unwrap();
        assert_eq!(config.crc.params.poly, 0x1021);
        assert_eq!(config.crc.params.init, 0xffff);
        assert_eq!(config.crc.params.xorout, 0);
        assert!(config.crc.enabled);
    }

    #[test]
    fn test_range_validation() {
        let mut settings = Settings::default();
        settings.header_length = 9;
        assert!(matches!(
            settings.resolve(),
            Err(ConfigError::ValueOutOfRange { field: "header_length", .. })
        ));

        let mut settings = Settings::default();
        settings.crc_type = 12;
        assert_eq!(
            settings.resolve(),
            Err(ConfigError::InvalidCrcWidth { width: 12 })
        );

        let mut settings = Settings::default();
        settings.packet_timeout = 1500.0;
        assert!(matches!(
            settings.resolve(),
            Err(ConfigError::TimingOutOfRange { field: "packet_timeout", .. })
        ));
    }
}
