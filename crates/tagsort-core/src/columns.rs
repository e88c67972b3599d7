//! Input column layout and per-row typed value extraction.
//!
//! Columns are key-part declarations with names; `--orderBy` resolves key
//! parts from them, and WHERE/STOP predicates and aggregates read their
//! typed values row by row.

use std::ops::Range;

use crate::error::SortError;
use crate::key::{KeyPart, KeyType};

/// A typed value extracted from one column of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// Text columns (String, Byte).
    Text(String),
    /// Integer columns, and dates as epoch milliseconds.
    Integer(i64),
    /// Floating-point columns.
    Decimal(f64),
    /// The column lies beyond the end of this record, or matched the
    /// configured CSV null string.
    Missing,
}

impl ColumnValue {
    /// Numeric view used by predicates and aggregates.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Integer(v) => Some(*v as f64),
            ColumnValue::Decimal(v) => Some(*v),
            ColumnValue::Text(t) => t.trim().parse().ok(),
            ColumnValue::Missing => None,
        }
    }
}

/// The declared input columns, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ColumnLayout {
    columns: Vec<KeyPart>,
}

impl ColumnLayout {
    /// Creates an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column. Names are lowercased and must be unique; an
    /// unspecified offset defaults to just past the previous column.
    pub fn push(&mut self, mut column: KeyPart, offset_given: bool) -> Result<(), SortError> {
        let name = column
            .column_name
            .as_deref()
            .map(str::to_lowercase)
            .ok_or_else(|| SortError::InvalidKeySpec { detail: "column without a name".into() })?;
        if self.exists(&name) {
            return Err(SortError::InvalidKeySpec {
                detail: format!("duplicate column name '{name}'"),
            });
        }
        if !offset_given {
            column.offset = self
                .columns
                .last()
                .map(|prev| prev.offset + prev.length)
                .unwrap_or(0);
        }
        column.column_name = Some(name);
        column.validate()?;
        self.columns.push(column);
        Ok(())
    }

    /// Looks up a column by (case-insensitive) name.
    pub fn get(&self, name: &str) -> Option<&KeyPart> {
        let name = name.to_lowercase();
        self.columns.iter().find(|c| c.column_name.as_deref() == Some(name.as_str()))
    }

    /// True when the name is declared.
    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All declared columns.
    pub fn columns(&self) -> &[KeyPart] {
        &self.columns
    }

    /// True when no columns are declared.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Extracts the typed value of one column from a row.
    pub fn value_of(
        &self,
        column: &KeyPart,
        record: &[u8],
        fields: Option<&[Range<usize>]>,
    ) -> ColumnValue {
        let slice: &[u8] = match column.csv_field {
            Some(f) => match fields.and_then(|ranges| ranges.get(f)) {
                Some(r) => &record[r.clone()],
                None => return ColumnValue::Missing,
            },
            None => record,
        };
        extract_value(column, slice)
    }
}

fn extract_value(column: &KeyPart, slice: &[u8]) -> ColumnValue {
    let end = column.offset + column.length;
    match column.kind {
        KeyType::String | KeyType::Byte => {
            if column.offset >= slice.len() {
                return ColumnValue::Missing;
            }
            let raw = &slice[column.offset..end.min(slice.len())];
            let text = String::from_utf8_lossy(raw);
            ColumnValue::Text(text.trim_end_matches(['\0', ' ']).to_string())
        }
        KeyType::Integer => match fixed_bytes(slice, column.offset, column.length) {
            Some(raw) => ColumnValue::Integer(be_signed(raw)),
            None => ColumnValue::Missing,
        },
        KeyType::UnsignedInteger => match fixed_bytes(slice, column.offset, column.length) {
            Some(raw) => ColumnValue::Integer(be_unsigned(raw) as i64),
            None => ColumnValue::Missing,
        },
        KeyType::Float => match fixed_bytes(slice, column.offset, 4) {
            Some(raw) => {
                ColumnValue::Decimal(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64)
            }
            None => ColumnValue::Missing,
        },
        KeyType::Double => match fixed_bytes(slice, column.offset, 8) {
            Some(raw) => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                ColumnValue::Decimal(f64::from_be_bytes(buf))
            }
            None => ColumnValue::Missing,
        },
        KeyType::Date => {
            if column.offset >= slice.len() {
                return ColumnValue::Missing;
            }
            let raw = &slice[column.offset..end.min(slice.len())];
            let text = String::from_utf8_lossy(raw);
            let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
            let format = column.parse_format.as_deref().unwrap_or("%Y-%m-%d");
            let parsed = chrono::NaiveDateTime::parse_from_str(text, format).or_else(|_| {
                chrono::NaiveDate::parse_from_str(text, format)
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
            });
            match parsed {
                Ok(dt) => ColumnValue::Integer(dt.and_utc().timestamp_millis()),
                Err(_) => ColumnValue::Missing,
            }
        }
        KeyType::RecordNumber => ColumnValue::Missing,
    }
}

fn fixed_bytes(slice: &[u8], offset: usize, length: usize) -> Option<&[u8]> {
    let end = offset.checked_add(length)?;
    if end > slice.len() {
        None
    } else {
        Some(&slice[offset..end])
    }
}

/// Big-endian signed read with sign extension, as in the key encoder.
fn be_signed(raw: &[u8]) -> i64 {
    let mut value: i64 = 0;
    for &byte in raw {
        value = (value << 8) | i64::from(byte);
    }
    if !raw.is_empty() && raw[0] & 0x80 != 0 && raw.len() < 8 {
        let bits = raw.len() * 8;
        value |= !((1i64 << bits) - 1);
    }
    value
}

fn be_unsigned(raw: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for &byte in raw {
        value = (value << 8) | u64::from(byte);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyDirection;

    fn named(name: &str, kind: KeyType, offset: usize, length: usize) -> KeyPart {
        let mut part = KeyPart::new(kind, offset, length, KeyDirection::Ascending);
        part.column_name = Some(name.to_string());
        part
    }

    #[test]
    fn test_offset_defaults_to_previous_end() {
        let mut layout = ColumnLayout::new();
        layout.push(named("a", KeyType::String, 0, 5), true).unwrap();
        layout.push(named("b", KeyType::String, 0, 3), false).unwrap();
        assert_eq!(layout.get("b").unwrap().offset, 5);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut layout = ColumnLayout::new();
        layout.push(named("City", KeyType::String, 0, 5), true).unwrap();
        let err = layout.push(named("city", KeyType::String, 5, 5), true);
        assert!(err.is_err());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut layout = ColumnLayout::new();
        layout.push(named("Amount", KeyType::Integer, 0, 4), true).unwrap();
        assert!(layout.exists("amount"));
        assert!(layout.exists("AMOUNT"));
    }

    #[test]
    fn test_text_value_trims_padding() {
        let mut layout = ColumnLayout::new();
        layout.push(named("name", KeyType::String, 0, 8), true).unwrap();
        let col = layout.get("name").unwrap();
        let v = layout.value_of(col, b"abc     ", None);
        assert_eq!(v, ColumnValue::Text("abc".to_string()));
    }

    #[test]
    fn test_integer_value() {
        let mut layout = ColumnLayout::new();
        layout.push(named("v", KeyType::Integer, 0, 4), true).unwrap();
        let col = layout.get("v").unwrap();
        let v = layout.value_of(col, &(-7i32).to_be_bytes(), None);
        assert_eq!(v, ColumnValue::Integer(-7));
    }

    #[test]
    fn test_short_record_yields_missing() {
        let mut layout = ColumnLayout::new();
        layout.push(named("v", KeyType::Integer, 4, 4), true).unwrap();
        let col = layout.get("v").unwrap();
        assert_eq!(layout.value_of(col, b"ab", None), ColumnValue::Missing);
    }

    #[test]
    fn test_csv_field_value() {
        let mut layout = ColumnLayout::new();
        let mut col = named("f", KeyType::String, 0, 10);
        col.csv_field = Some(1);
        layout.push(col, true).unwrap();
        let col = layout.get("f").unwrap();
        let record = b"x,hello,y";
        let fields = vec![0..1, 2..7, 8..9];
        assert_eq!(
            layout.value_of(col, record, Some(&fields)),
            ColumnValue::Text("hello".to_string())
        );
    }

    #[test]
    fn test_text_parses_as_number() {
        assert_eq!(ColumnValue::Text(" 42 ".into()).as_f64(), Some(42.0));
        assert_eq!(ColumnValue::Missing.as_f64(), None);
    }
}
