//! CSV field slicing.
//!
//! The sorter never rewrites delimited records; it only needs to know
//! where each field's bytes live so key parts and columns can address
//! them. The splitter therefore returns byte ranges over the raw record,
//! with enclosing quotes excluded.

use std::ops::Range;

use crate::error::SortError;

/// Predefined CSV dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsvPreset {
    /// Comma-delimited, double-quoted.
    #[default]
    Default,
    /// Excel: like Default, empty lines significant.
    Excel,
    /// MySQL dumps: tab-delimited, backslash-escaped, `\N` for null.
    Mysql,
    /// RFC 4180.
    Rfc4180,
    /// Tab-delimited fields.
    Tdf,
}

impl CsvPreset {
    /// Parse a preset name.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "default" => Some(CsvPreset::Default),
            "excel" => Some(CsvPreset::Excel),
            "mysql" => Some(CsvPreset::Mysql),
            "rfc4180" => Some(CsvPreset::Rfc4180),
            "tdf" => Some(CsvPreset::Tdf),
            _ => None,
        }
    }
}

/// The CSV dialect in force for delimited input.
#[derive(Debug, Clone)]
pub struct CsvFormat {
    /// Field delimiter.
    pub delimiter: u8,
    /// Quote character, if quoting is recognized.
    pub quote: Option<u8>,
    /// Escape character: the following byte is taken literally.
    pub escape: Option<u8>,
    /// Comment marker; a record starting with it is skipped entirely.
    pub comment: Option<u8>,
    /// First record is a header: withheld from sorting, replayed on output.
    pub header: bool,
    /// Skip records with no bytes at all.
    pub ignore_empty_lines: bool,
    /// Trim unquoted spaces at both ends of each field.
    pub trim: bool,
    /// Fields equal to this string read as null (missing).
    pub null_string: Option<Vec<u8>>,
}

impl Default for CsvFormat {
    fn default() -> Self {
        CsvFormat::preset(CsvPreset::Default)
    }
}

impl CsvFormat {
    /// Builds the format for a predefined dialect.
    pub fn preset(preset: CsvPreset) -> Self {
        let base = Self {
            delimiter: b',',
            quote: Some(b'"'),
            escape: None,
            comment: None,
            header: false,
            ignore_empty_lines: true,
            trim: false,
            null_string: None,
        };
        match preset {
            CsvPreset::Default => base,
            CsvPreset::Excel => Self { ignore_empty_lines: false, ..base },
            CsvPreset::Mysql => Self {
                delimiter: b'\t',
                quote: None,
                escape: Some(b'\\'),
                ignore_empty_lines: false,
                null_string: Some(b"\\N".to_vec()),
                ..base
            },
            CsvPreset::Rfc4180 => Self { ignore_empty_lines: false, ..base },
            CsvPreset::Tdf => Self { delimiter: b'\t', ..base },
        }
    }

    /// Parses the `--csv` option text: whitespace-separated tokens, each a
    /// flag (`h`, `e`, `s`) or a `key value` pair (`f`, `d`, `q`, `x`,
    /// `c`, `n`).
    pub fn parse_spec(spec: &str) -> Result<Self, SortError> {
        let mut tokens = spec.split_whitespace();
        let mut format = CsvFormat::default();
        while let Some(token) = tokens.next() {
            match token {
                "h" | "header" => format.header = true,
                "e" | "ignoreEmptyLines" => format.ignore_empty_lines = true,
                "s" | "ignoreSurroundingSpaces" => format.trim = true,
                "f" | "predefinedFormat" => {
                    let name = expect_value(spec, &mut tokens, token)?;
                    let preset = CsvPreset::from_code(name).ok_or_else(|| {
                        SortError::InvalidKeySpec {
                            detail: format!("unknown csv format '{name}'"),
                        }
                    })?;
                    let header = format.header;
                    format = CsvFormat::preset(preset);
                    format.header = header;
                }
                "d" | "delimiter" => {
                    format.delimiter = parse_byte(expect_value(spec, &mut tokens, token)?)?
                }
                "q" | "quote" => {
                    format.quote = Some(parse_byte(expect_value(spec, &mut tokens, token)?)?)
                }
                "x" | "escape" => {
                    format.escape = Some(parse_byte(expect_value(spec, &mut tokens, token)?)?)
                }
                "c" | "commentMarker" => {
                    format.comment = Some(parse_byte(expect_value(spec, &mut tokens, token)?)?)
                }
                "n" | "nullString" => {
                    format.null_string =
                        Some(expect_value(spec, &mut tokens, token)?.as_bytes().to_vec())
                }
                other => {
                    return Err(SortError::InvalidKeySpec {
                        detail: format!("unknown csv option '{other}'"),
                    })
                }
            }
        }
        Ok(format)
    }

    /// True when the record is a comment line under this dialect.
    pub fn is_comment(&self, record: &[u8]) -> bool {
        matches!((self.comment, record.first()), (Some(marker), Some(&first)) if first == marker)
    }

    /// True when the record should be skipped as an empty line.
    pub fn is_ignored_empty(&self, record: &[u8]) -> bool {
        self.ignore_empty_lines && record.is_empty()
    }

    /// True when a field's bytes represent null under this dialect.
    pub fn field_is_null(&self, field: &[u8]) -> bool {
        matches!(&self.null_string, Some(null) if field == null.as_slice())
    }

    /// Splits a record into field ranges. Quoted fields have their quotes
    /// excluded from the range; doubled quotes and escaped bytes stay raw.
    pub fn split_fields(&self, record: &[u8]) -> Vec<Range<usize>> {
        let mut fields = Vec::new();
        let mut start = 0usize;
        let mut end = 0usize; // exclusive end of field content seen so far
        let mut i = 0usize;
        let mut quoted = false;

        while i < record.len() {
            let byte = record[i];
            if quoted {
                if Some(byte) == self.quote {
                    if record.get(i + 1) == self.quote.as_ref() {
                        // Doubled quote stays inside the field.
                        i += 2;
                        end = i;
                        continue;
                    }
                    quoted = false;
                    i += 1;
                    continue;
                }
                i += 1;
                end = i;
            } else if Some(byte) == self.escape {
                i += 2;
                end = i.min(record.len());
            } else if Some(byte) == self.quote && end == start {
                // Opening quote at the start of a field.
                quoted = true;
                i += 1;
                start = i;
                end = i;
            } else if byte == self.delimiter {
                fields.push(self.trimmed(record, start, end));
                i += 1;
                start = i;
                end = i;
            } else {
                i += 1;
                end = i;
            }
        }
        fields.push(self.trimmed(record, start, end));
        fields
    }

    fn trimmed(&self, record: &[u8], mut start: usize, mut end: usize) -> Range<usize> {
        if self.trim {
            while start < end && record[start] == b' ' {
                start += 1;
            }
            while end > start && record[end - 1] == b' ' {
                end -= 1;
            }
        }
        start..end
    }
}

fn expect_value<'a>(
    spec: &str,
    tokens: &mut impl Iterator<Item = &'a str>,
    key: &str,
) -> Result<&'a str, SortError> {
    tokens.next().ok_or_else(|| SortError::InvalidKeySpec {
        detail: format!("csv option '{key}' in '{spec}' needs a value"),
    })
}

/// A byte option: a single character, a `\t`-style escape, or a decimal
/// byte value.
fn parse_byte(token: &str) -> Result<u8, SortError> {
    let bytes = token.as_bytes();
    if bytes.len() == 1 {
        return Ok(bytes[0]);
    }
    match token {
        "\\t" => return Ok(b'\t'),
        "\\s" => return Ok(b' '),
        "\\\\" => return Ok(b'\\'),
        _ => {}
    }
    token.parse::<u8>().map_err(|_| SortError::InvalidKeySpec {
        detail: format!("'{token}' is not a delimiter byte"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields<'a>(format: &CsvFormat, record: &'a [u8]) -> Vec<&'a [u8]> {
        format.split_fields(record).into_iter().map(|r| &record[r]).collect()
    }

    #[test]
    fn test_plain_fields() {
        let f = CsvFormat::default();
        assert_eq!(fields(&f, b"a,bb,ccc"), vec![&b"a"[..], b"bb", b"ccc"]);
    }

    #[test]
    fn test_empty_fields_kept() {
        let f = CsvFormat::default();
        assert_eq!(fields(&f, b"a,,c"), vec![&b"a"[..], b"", b"c"]);
        assert_eq!(fields(&f, b",").len(), 2);
    }

    #[test]
    fn test_quoted_field_excludes_quotes() {
        let f = CsvFormat::default();
        assert_eq!(fields(&f, b"\"a,b\",c"), vec![&b"a,b"[..], b"c"]);
    }

    #[test]
    fn test_doubled_quote_stays_raw() {
        let f = CsvFormat::default();
        let got = fields(&f, b"\"he said \"\"hi\"\"\",x");
        assert_eq!(got[0], b"he said \"\"hi\"\"");
        assert_eq!(got[1], b"x");
    }

    #[test]
    fn test_escape_byte_protects_delimiter() {
        let f = CsvFormat::preset(CsvPreset::Mysql);
        assert_eq!(fields(&f, b"a\\\tb\tc"), vec![&b"a\\\tb"[..], b"c"]);
    }

    #[test]
    fn test_trim_surrounding_spaces() {
        let mut f = CsvFormat::default();
        f.trim = true;
        assert_eq!(fields(&f, b"  a , b "), vec![&b"a"[..], b"b"]);
    }

    #[test]
    fn test_comment_and_null() {
        let mut f = CsvFormat::default();
        f.comment = Some(b'#');
        assert!(f.is_comment(b"# note"));
        assert!(!f.is_comment(b"data,#x"));

        let mysql = CsvFormat::preset(CsvPreset::Mysql);
        assert!(mysql.field_is_null(b"\\N"));
        assert!(!mysql.field_is_null(b"N"));
    }

    #[test]
    fn test_parse_spec() {
        let f = CsvFormat::parse_spec("h d ; q ' s").unwrap();
        assert!(f.header);
        assert!(f.trim);
        assert_eq!(f.delimiter, b';');
        assert_eq!(f.quote, Some(b'\''));

        let f = CsvFormat::parse_spec("f mysql h").unwrap();
        assert_eq!(f.delimiter, b'\t');
        assert!(f.header);

        assert!(CsvFormat::parse_spec("bogus").is_err());
    }

    #[test]
    fn test_tab_preset() {
        let f = CsvFormat::preset(CsvPreset::Tdf);
        assert_eq!(fields(&f, b"a\tb"), vec![&b"a"[..], b"b"]);
    }
}
