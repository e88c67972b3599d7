//! Typed sort keys and the byte-comparable key encoder.
//!
//! Every ordering requirement is paid once per record, at key-extraction
//! time: each declared key part reads its field from the raw record and
//! appends an encoding whose plain byte order equals the declared semantic
//! order. The hot comparison path in the tournament is then a raw byte
//! compare over the assembled key, with no type dispatch.

use std::ops::Range;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::SortError;

/// Maximum encoded key length in bytes. The encode buffer is one byte
/// larger to leave room for the string sentinel on a maximum-length key.
pub const MAX_KEY_BYTES: usize = 255;

/// Direction of one key part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    /// Ascending (A).
    Ascending,
    /// Descending (D).
    Descending,
    /// Ascending over absolute values.
    AbsAscending,
    /// Descending over absolute values.
    AbsDescending,
}

impl KeyDirection {
    /// Parse a direction code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_uppercase().as_str() {
            "ASC" | "A" => Some(KeyDirection::Ascending),
            "DESC" | "D" => Some(KeyDirection::Descending),
            "AASC" => Some(KeyDirection::AbsAscending),
            "ADESC" => Some(KeyDirection::AbsDescending),
            _ => None,
        }
    }

    /// Returns the canonical code.
    pub fn code(&self) -> &'static str {
        match self {
            KeyDirection::Ascending => "ASC",
            KeyDirection::Descending => "DESC",
            KeyDirection::AbsAscending => "AASC",
            KeyDirection::AbsDescending => "ADESC",
        }
    }

    /// True for DESC and ADESC.
    pub fn is_descending(&self) -> bool {
        matches!(self, KeyDirection::Descending | KeyDirection::AbsDescending)
    }

    /// True for AASC and ADESC.
    pub fn is_absolute(&self) -> bool {
        matches!(self, KeyDirection::AbsAscending | KeyDirection::AbsDescending)
    }

    /// The opposite direction, preserving absoluteness. Used when the
    /// Reverse duplicate disposition inverts the whole ordering.
    pub fn reversed(&self) -> Self {
        match self {
            KeyDirection::Ascending => KeyDirection::Descending,
            KeyDirection::Descending => KeyDirection::Ascending,
            KeyDirection::AbsAscending => KeyDirection::AbsDescending,
            KeyDirection::AbsDescending => KeyDirection::AbsAscending,
        }
    }
}

/// Data type of one key part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Text compared byte-wise, 0x00-padded and sentinel-terminated.
    String,
    /// Raw bytes; encoded exactly like String.
    Byte,
    /// Signed big-endian binary integer of 1, 2, 4, or 8 bytes.
    Integer,
    /// Unsigned big-endian binary integer of 1, 2, 4, or 8 bytes.
    UnsignedInteger,
    /// IEEE-754 single precision, big-endian, 4 bytes.
    Float,
    /// IEEE-754 double precision, big-endian, 8 bytes.
    Double,
    /// Text parsed with a chrono format to epoch milliseconds.
    Date,
    /// The record ordinal itself; used by the keyless copy orders.
    RecordNumber,
}

impl KeyType {
    /// Parse a type code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "string" => Some(KeyType::String),
            "byte" => Some(KeyType::Byte),
            "int" | "integer" => Some(KeyType::Integer),
            "uint" | "uinteger" => Some(KeyType::UnsignedInteger),
            "float" => Some(KeyType::Float),
            "double" => Some(KeyType::Double),
            "date" => Some(KeyType::Date),
            _ => None,
        }
    }

    /// Returns the canonical code.
    pub fn code(&self) -> &'static str {
        match self {
            KeyType::String => "String",
            KeyType::Byte => "Byte",
            KeyType::Integer => "Integer",
            KeyType::UnsignedInteger => "UInteger",
            KeyType::Float => "Float",
            KeyType::Double => "Double",
            KeyType::Date => "Date",
            KeyType::RecordNumber => "RecordNumber",
        }
    }

    /// Default field length when a declaration omits one.
    pub fn default_length(&self) -> usize {
        match self {
            KeyType::String | KeyType::Byte | KeyType::Date => MAX_KEY_BYTES,
            KeyType::Integer | KeyType::UnsignedInteger => 4,
            KeyType::Float => 4,
            KeyType::Double | KeyType::RecordNumber => 8,
        }
    }
}

/// One declared key part: where the field lives, how to interpret it, and
/// which way it sorts. Parts form an ordered list, primary first.
#[derive(Debug, Clone)]
pub struct KeyPart {
    /// Column name this part was derived from, if any.
    pub column_name: Option<String>,
    /// Data type.
    pub kind: KeyType,
    /// Byte offset within the record (or within the CSV field slice).
    pub offset: usize,
    /// Field length in bytes.
    pub length: usize,
    /// Sort direction.
    pub direction: KeyDirection,
    /// chrono format string for Date parts.
    pub parse_format: Option<String>,
    /// 0-relative CSV field index; when present, `offset`/`length` address
    /// bytes within that field's slice instead of the raw record.
    pub csv_field: Option<usize>,
}

impl KeyPart {
    /// Creates a key part with no format and no CSV field.
    pub fn new(kind: KeyType, offset: usize, length: usize, direction: KeyDirection) -> Self {
        Self {
            column_name: None,
            kind,
            offset,
            length,
            direction,
            parse_format: None,
            csv_field: None,
        }
    }

    /// Sets the date parse format.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.parse_format = Some(format.into());
        self
    }

    /// Sets the 0-relative CSV field index.
    pub fn with_csv_field(mut self, field: usize) -> Self {
        self.csv_field = Some(field);
        self
    }

    /// Checks length and format constraints for this part's type.
    pub fn validate(&self) -> Result<(), SortError> {
        match self.kind {
            KeyType::Integer | KeyType::UnsignedInteger => {
                if !matches!(self.length, 1 | 2 | 4 | 8) {
                    return Err(SortError::UnsupportedKeyLength {
                        kind: self.kind.code(),
                        length: self.length,
                    });
                }
            }
            KeyType::Float => {
                if self.length != 4 {
                    return Err(SortError::UnsupportedKeyLength { kind: "Float", length: self.length });
                }
            }
            KeyType::Double => {
                if self.length != 8 {
                    return Err(SortError::UnsupportedKeyLength { kind: "Double", length: self.length });
                }
            }
            KeyType::Date => {
                if self.parse_format.is_none() {
                    return Err(SortError::InvalidKeySpec {
                        detail: format!(
                            "date key at offset {} requires a parse format",
                            self.offset
                        ),
                    });
                }
            }
            KeyType::String | KeyType::Byte | KeyType::RecordNumber => {}
        }
        if self.length == 0 {
            return Err(SortError::InvalidKeySpec {
                detail: format!("{} key has zero length", self.kind.code()),
            });
        }
        Ok(())
    }

    /// Bytes this part consumes in the encode buffer, given `space` bytes
    /// still free. Strings clamp; fixed-width types need their full width.
    fn encoded_width(&self, space: usize) -> Result<usize, SortError> {
        match self.kind {
            KeyType::String | KeyType::Byte => Ok(self.length.min(space)),
            KeyType::Integer | KeyType::UnsignedInteger | KeyType::Float | KeyType::Double => {
                if self.length > space {
                    Err(SortError::InvalidKeySpec {
                        detail: format!("key parts exceed {MAX_KEY_BYTES} bytes"),
                    })
                } else {
                    Ok(self.length)
                }
            }
            KeyType::Date | KeyType::RecordNumber => {
                if space < 8 {
                    Err(SortError::InvalidKeySpec {
                        detail: format!("key parts exceed {MAX_KEY_BYTES} bytes"),
                    })
                } else {
                    Ok(8)
                }
            }
        }
    }
}

/// Encodes the declared key parts of a record into one byte-comparable key.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    parts: Vec<KeyPart>,
}

impl KeyCodec {
    /// Builds a codec, validating every part and the total key width.
    pub fn new(parts: Vec<KeyPart>) -> Result<Self, SortError> {
        if parts.is_empty() {
            return Err(SortError::InvalidKeySpec { detail: "no key parts declared".to_string() });
        }
        let mut space = MAX_KEY_BYTES;
        for part in &parts {
            part.validate()?;
            space -= part.encoded_width(space)?;
        }
        Ok(Self { parts })
    }

    /// Key parts for the keyless copy orders: ByKey sorts the whole record
    /// (CSV: the first field) as text, Original and Reverse sort by record
    /// ordinal.
    pub fn for_copy(order: CopyOrder, csv: bool) -> Result<Self, SortError> {
        let part = match order {
            CopyOrder::ByKey => {
                let mut p = KeyPart::new(KeyType::String, 0, MAX_KEY_BYTES, KeyDirection::Ascending);
                if csv {
                    p.csv_field = Some(0);
                }
                p
            }
            CopyOrder::Original => {
                KeyPart::new(KeyType::RecordNumber, 0, 8, KeyDirection::Ascending)
            }
            CopyOrder::Reverse => {
                KeyPart::new(KeyType::RecordNumber, 0, 8, KeyDirection::Descending)
            }
        };
        Self::new(vec![part])
    }

    /// The declared parts, primary first.
    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Inverts the direction of every part. Applied when the Reverse
    /// duplicate disposition flips the output ordering.
    pub fn reverse_directions(&mut self) {
        for part in &mut self.parts {
            part.direction = part.direction.reversed();
        }
    }

    /// Capacity the key buffer must reserve.
    pub fn key_capacity() -> usize {
        MAX_KEY_BYTES + 1
    }

    /// Encodes the key of one record into `key` (cleared first).
    ///
    /// `fields` carries the CSV field slices when the input is delimited;
    /// `source` names the input for error reporting.
    pub fn extract(
        &self,
        record: &[u8],
        fields: Option<&[Range<usize>]>,
        record_number: i64,
        source: &str,
        key: &mut Vec<u8>,
    ) -> Result<(), SortError> {
        key.clear();
        for part in &self.parts {
            pack_part(part, record, fields, record_number, source, key)?;
        }
        Ok(())
    }
}

/// Keyless processing orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOrder {
    /// Sort the whole record as a text key.
    ByKey,
    /// Preserve input order.
    Original,
    /// Reverse input order.
    Reverse,
}

impl CopyOrder {
    /// Parse a copy order code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "bykey" => Some(CopyOrder::ByKey),
            "original" => Some(CopyOrder::Original),
            "reverse" => Some(CopyOrder::Reverse),
            _ => None,
        }
    }
}

fn pack_part(
    part: &KeyPart,
    record: &[u8],
    fields: Option<&[Range<usize>]>,
    record_number: i64,
    source: &str,
    key: &mut Vec<u8>,
) -> Result<(), SortError> {
    // Resolve the source slice: the raw record, or one CSV field of it.
    let slice: &[u8] = match part.csv_field {
        Some(f) => fields
            .and_then(|ranges| ranges.get(f))
            .map(|r| &record[r.clone()])
            .unwrap_or(&[]),
        None => record,
    };

    match part.kind {
        KeyType::String | KeyType::Byte => pack_text(part, slice, key),
        KeyType::Integer => {
            let v = read_be_signed(part, slice, record_number, source)?;
            pack_signed(part.direction, v, part.length, key);
            Ok(())
        }
        KeyType::UnsignedInteger => {
            let v = read_be_unsigned(part, slice, record_number, source)?;
            pack_unsigned(part.direction, v, part.length, key);
            Ok(())
        }
        KeyType::Float => {
            let raw = field_bytes(part, slice, record_number, source)?;
            let v = f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            pack_f32(part.direction, v, key);
            Ok(())
        }
        KeyType::Double => {
            let raw = field_bytes(part, slice, record_number, source)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(raw);
            pack_f64(part.direction, f64::from_be_bytes(buf), key);
            Ok(())
        }
        KeyType::Date => {
            let ms = parse_date_field(part, slice, record_number)?;
            pack_signed(part.direction, ms, 8, key);
            Ok(())
        }
        KeyType::RecordNumber => {
            pack_signed(part.direction, record_number, 8, key);
            Ok(())
        }
    }
}

/// Text keys tolerate short records: copy what exists, pad with 0x00 to
/// the declared length, then terminate with a 0x00 sentinel so that a key
/// truncated by the buffer limit still orders before any longer key.
fn pack_text(part: &KeyPart, slice: &[u8], key: &mut Vec<u8>) -> Result<(), SortError> {
    let space = MAX_KEY_BYTES.saturating_sub(key.len());
    let width = part.length.min(space);
    let start = key.len();

    let from = part.offset.min(slice.len());
    let to = (part.offset + width).min(slice.len());
    key.extend_from_slice(&slice[from..to]);
    key.resize(start + width, 0x00);
    if key.len() < MAX_KEY_BYTES + 1 {
        key.push(0x00); // sentinel
    }

    if part.direction.is_descending() {
        for byte in &mut key[start..] {
            *byte = !*byte;
        }
    }
    Ok(())
}

/// The exact field bytes for a fixed-width part, or ShortRecord.
fn field_bytes<'a>(
    part: &KeyPart,
    slice: &'a [u8],
    record_number: i64,
    source: &str,
) -> Result<&'a [u8], SortError> {
    let end = part.offset + part.length;
    if end > slice.len() {
        return Err(SortError::ShortRecord {
            record_number,
            source_file: source.to_string(),
            needed: end,
            actual: slice.len(),
        });
    }
    Ok(&slice[part.offset..end])
}

/// Big-endian signed read with sign extension.
fn read_be_signed(
    part: &KeyPart,
    slice: &[u8],
    record_number: i64,
    source: &str,
) -> Result<i64, SortError> {
    let raw = field_bytes(part, slice, record_number, source)?;
    let mut value: i64 = 0;
    for &byte in raw {
        value = (value << 8) | i64::from(byte);
    }
    if raw[0] & 0x80 != 0 && raw.len() < 8 {
        let bits = raw.len() * 8;
        value |= !((1i64 << bits) - 1);
    }
    Ok(value)
}

/// Big-endian unsigned read.
fn read_be_unsigned(
    part: &KeyPart,
    slice: &[u8],
    record_number: i64,
    source: &str,
) -> Result<u64, SortError> {
    let raw = field_bytes(part, slice, record_number, source)?;
    let mut value: u64 = 0;
    for &byte in raw {
        value = (value << 8) | u64::from(byte);
    }
    Ok(value)
}

/// Signed integers: fold direction into the value, write big-endian, then
/// flip the sign bit so negatives order before positives byte-wise.
fn pack_signed(direction: KeyDirection, value: i64, length: usize, key: &mut Vec<u8>) {
    let mut v = value;
    if direction.is_absolute() && v < 0 {
        v = v.wrapping_neg();
    }
    if direction.is_descending() {
        v = v.wrapping_neg();
    }
    let bytes = v.to_be_bytes();
    let start = key.len();
    key.extend_from_slice(&bytes[8 - length..]);
    key[start] ^= 0x80;
}

/// Unsigned integers: no sign bit to fix; descending is a bitwise NOT.
fn pack_unsigned(direction: KeyDirection, value: u64, length: usize, key: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let start = key.len();
    key.extend_from_slice(&bytes[8 - length..]);
    if direction.is_descending() {
        for byte in &mut key[start..] {
            *byte = !*byte;
        }
    }
}

/// Single-precision variant of the IEEE-754 total-order transform.
fn pack_f32(direction: KeyDirection, value: f32, key: &mut Vec<u8>) {
    let mut v = value;
    if direction.is_absolute() {
        v = v.abs();
    }
    if direction.is_descending() {
        v = -v;
    }
    if v.is_nan() {
        v = f32::NAN;
    }
    let bits = v.to_bits();
    let ordered = if bits & 0x8000_0000 != 0 { !bits } else { bits ^ 0x8000_0000 };
    key.extend_from_slice(&ordered.to_be_bytes());
}

/// IEEE-754 total-order transform: negative values invert all bits,
/// non-negative values flip the sign bit. NaN canonicalizes to the
/// greatest ascending key.
fn pack_f64(direction: KeyDirection, value: f64, key: &mut Vec<u8>) {
    let mut v = value;
    if direction.is_absolute() {
        v = v.abs();
    }
    if direction.is_descending() {
        v = -v;
    }
    if v.is_nan() {
        v = f64::NAN;
    }
    let bits = v.to_bits();
    let ordered = if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits ^ 0x8000_0000_0000_0000
    };
    key.extend_from_slice(&ordered.to_be_bytes());
}

/// Parses a text date field to epoch milliseconds. Padding and
/// surrounding whitespace are stripped before parsing.
fn parse_date_field(part: &KeyPart, slice: &[u8], record_number: i64) -> Result<i64, SortError> {
    let format = part.parse_format.as_deref().unwrap_or("%Y-%m-%d");
    let from = part.offset.min(slice.len());
    let to = (part.offset + part.length).min(slice.len());
    let raw = &slice[from..to];
    let text = std::str::from_utf8(raw)
        .unwrap_or("")
        .trim_matches(|c: char| c.is_whitespace() || c == '\0');

    let parsed = NaiveDateTime::parse_from_str(text, format)
        .or_else(|_| NaiveDate::parse_from_str(text, format).map(|d| d.and_hms_opt(0, 0, 0).unwrap()));

    match parsed {
        Ok(dt) => Ok(dt.and_utc().timestamp_millis()),
        Err(_) => Err(SortError::InvalidDateFormat {
            record_number,
            text: text.to_string(),
            format: format.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(part: KeyPart, record: &[u8]) -> Vec<u8> {
        let codec = KeyCodec::new(vec![part]).unwrap();
        let mut key = Vec::with_capacity(KeyCodec::key_capacity());
        codec.extract(record, None, 1, "test", &mut key).unwrap();
        key
    }

    #[test]
    fn test_string_ascending_order() {
        let part = || KeyPart::new(KeyType::String, 0, 6, KeyDirection::Ascending);
        let apple = encode(part(), b"apple");
        let banana = encode(part(), b"banana");
        let cherry = encode(part(), b"cherry");
        assert!(apple < banana);
        assert!(banana < cherry);
    }

    #[test]
    fn test_string_descending_order() {
        let part = || KeyPart::new(KeyType::String, 0, 6, KeyDirection::Descending);
        let apple = encode(part(), b"apple");
        let banana = encode(part(), b"banana");
        assert!(banana < apple);
    }

    #[test]
    fn test_string_pads_and_terminates() {
        let key = encode(KeyPart::new(KeyType::String, 0, 6, KeyDirection::Ascending), b"ab");
        assert_eq!(key, vec![b'a', b'b', 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_string_shorter_sorts_first() {
        let part = || KeyPart::new(KeyType::String, 0, 10, KeyDirection::Ascending);
        let a = encode(part(), b"ab");
        let ab = encode(part(), b"abc");
        assert!(a < ab);
    }

    #[test]
    fn test_signed_int_order_includes_negatives() {
        let part = || KeyPart::new(KeyType::Integer, 0, 4, KeyDirection::Ascending);
        let minus_one = encode(part(), &(-1i32).to_be_bytes());
        let zero = encode(part(), &0i32.to_be_bytes());
        let one = encode(part(), &1i32.to_be_bytes());
        let min = encode(part(), &i32::MIN.to_be_bytes());
        let max = encode(part(), &i32::MAX.to_be_bytes());
        assert!(min < minus_one);
        assert!(minus_one < zero);
        assert!(zero < one);
        assert!(one < max);
    }

    #[test]
    fn test_signed_int_descending() {
        let part = || KeyPart::new(KeyType::Integer, 0, 4, KeyDirection::Descending);
        let one = encode(part(), &1i32.to_be_bytes());
        let zero = encode(part(), &0i32.to_be_bytes());
        let minus_one = encode(part(), &(-1i32).to_be_bytes());
        // Descending: 1, 0, -1.
        assert!(one < zero);
        assert!(zero < minus_one);
    }

    #[test]
    fn test_signed_int_absolute() {
        let part = || KeyPart::new(KeyType::Integer, 0, 2, KeyDirection::AbsAscending);
        let minus_three = encode(part(), &(-3i16).to_be_bytes());
        let two = encode(part(), &2i16.to_be_bytes());
        assert!(two < minus_three);
    }

    #[test]
    fn test_unsigned_int_order() {
        let part = || KeyPart::new(KeyType::UnsignedInteger, 0, 2, KeyDirection::Ascending);
        let small = encode(part(), &1u16.to_be_bytes());
        let big = encode(part(), &0xFFFFu16.to_be_bytes());
        assert!(small < big);

        let desc = || KeyPart::new(KeyType::UnsignedInteger, 0, 2, KeyDirection::Descending);
        let small_d = encode(desc(), &1u16.to_be_bytes());
        let big_d = encode(desc(), &0xFFFFu16.to_be_bytes());
        assert!(big_d < small_d);
    }

    #[test]
    fn test_double_order_with_negatives_and_nan() {
        let part = || KeyPart::new(KeyType::Double, 0, 8, KeyDirection::Ascending);
        let neg = encode(part(), &(-2.5f64).to_be_bytes());
        let zero = encode(part(), &0.0f64.to_be_bytes());
        let pos = encode(part(), &3.25f64.to_be_bytes());
        let inf = encode(part(), &f64::INFINITY.to_be_bytes());
        let nan = encode(part(), &f64::NAN.to_be_bytes());
        assert!(neg < zero);
        assert!(zero < pos);
        assert!(pos < inf);
        assert!(inf < nan);
    }

    #[test]
    fn test_float_single_precision() {
        let part = || KeyPart::new(KeyType::Float, 0, 4, KeyDirection::Ascending);
        let a = encode(part(), &(-1.5f32).to_be_bytes());
        let b = encode(part(), &1.5f32.to_be_bytes());
        assert!(a < b);
    }

    #[test]
    fn test_date_key_order() {
        let part = || {
            KeyPart::new(KeyType::Date, 0, 10, KeyDirection::Ascending).with_format("%Y-%m-%d")
        };
        let early = encode(part(), b"2020-01-02");
        let late = encode(part(), b"2021-06-30");
        assert!(early < late);
    }

    #[test]
    fn test_date_parse_failure() {
        let part =
            KeyPart::new(KeyType::Date, 0, 10, KeyDirection::Ascending).with_format("%Y-%m-%d");
        let codec = KeyCodec::new(vec![part]).unwrap();
        let mut key = Vec::new();
        let err = codec.extract(b"not-a-date", None, 7, "in.dat", &mut key).unwrap_err();
        assert!(matches!(err, SortError::InvalidDateFormat { record_number: 7, .. }));
    }

    #[test]
    fn test_short_record_for_binary_key() {
        let part = KeyPart::new(KeyType::Integer, 2, 4, KeyDirection::Ascending);
        let codec = KeyCodec::new(vec![part]).unwrap();
        let mut key = Vec::new();
        let err = codec.extract(b"abc", None, 3, "in.dat", &mut key).unwrap_err();
        assert!(matches!(err, SortError::ShortRecord { needed: 6, actual: 3, .. }));
    }

    #[test]
    fn test_csv_field_slice() {
        let part = KeyPart::new(KeyType::String, 0, 4, KeyDirection::Ascending).with_csv_field(1);
        let codec = KeyCodec::new(vec![part]).unwrap();
        let record = b"zz,abc,yy";
        let fields = vec![0..2, 3..6, 7..9];
        let mut key = Vec::new();
        codec.extract(record, Some(&fields), 1, "t", &mut key).unwrap();
        assert_eq!(&key[..3], b"abc");
    }

    #[test]
    fn test_multi_part_key_composes() {
        let codec = KeyCodec::new(vec![
            KeyPart::new(KeyType::String, 0, 2, KeyDirection::Ascending),
            KeyPart::new(KeyType::Integer, 2, 4, KeyDirection::Descending),
        ])
        .unwrap();

        let mut rec_a = b"aa".to_vec();
        rec_a.extend_from_slice(&5i32.to_be_bytes());
        let mut rec_b = b"aa".to_vec();
        rec_b.extend_from_slice(&9i32.to_be_bytes());

        let mut key_a = Vec::new();
        let mut key_b = Vec::new();
        codec.extract(&rec_a, None, 1, "t", &mut key_a).unwrap();
        codec.extract(&rec_b, None, 2, "t", &mut key_b).unwrap();
        // Same primary, secondary is descending: 9 before 5.
        assert!(key_b < key_a);
    }

    #[test]
    fn test_unsupported_integer_length() {
        let part = KeyPart::new(KeyType::Integer, 0, 3, KeyDirection::Ascending);
        assert!(matches!(
            KeyCodec::new(vec![part]),
            Err(SortError::UnsupportedKeyLength { length: 3, .. })
        ));
    }

    #[test]
    fn test_copy_orders() {
        let by_key = KeyCodec::for_copy(CopyOrder::ByKey, false).unwrap();
        assert_eq!(by_key.parts()[0].kind, KeyType::String);

        let original = KeyCodec::for_copy(CopyOrder::Original, false).unwrap();
        assert_eq!(original.parts()[0].kind, KeyType::RecordNumber);

        let reverse = KeyCodec::for_copy(CopyOrder::Reverse, false).unwrap();
        assert!(reverse.parts()[0].direction.is_descending());
    }

    #[test]
    fn test_record_number_key_orders_by_ordinal() {
        let codec = KeyCodec::for_copy(CopyOrder::Original, false).unwrap();
        let mut first = Vec::new();
        let mut second = Vec::new();
        codec.extract(b"zzz", None, 1, "t", &mut first).unwrap();
        codec.extract(b"aaa", None, 2, "t", &mut second).unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_reverse_directions() {
        let mut codec = KeyCodec::new(vec![KeyPart::new(
            KeyType::String,
            0,
            4,
            KeyDirection::Ascending,
        )])
        .unwrap();
        codec.reverse_directions();
        assert_eq!(codec.parts()[0].direction, KeyDirection::Descending);
    }
}
