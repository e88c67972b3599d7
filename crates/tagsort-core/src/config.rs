//! The configuration surface and its startup validation.
//!
//! `SortConfig` is the raw option set as the caller supplied it; nothing
//! is checked until `validate`, which either rejects the whole run with a
//! configuration error — before any input is opened — or resolves it into
//! a `SortPlan` the engine can execute without further decisions.

use std::path::PathBuf;

use crate::aggregate::{AggregateOp, AggregateSpec};
use crate::columns::ColumnLayout;
use crate::csv::CsvFormat;
use crate::dedup::DuplicateDisposition;
use crate::error::SortError;
use crate::key::{CopyOrder, KeyCodec, KeyDirection, KeyPart, KeyType};
use crate::predicate::{parse_all, ComparePredicate};
use crate::reader::Framing;
use crate::tournament::{MAX_DEPTH, MIN_DEPTH};

/// Default tree depth; the leaf row then holds 32768 rows.
pub const DEFAULT_POWER: u32 = 16;

/// Largest record the engine accepts by default.
pub const DEFAULT_MAX_RECORD: usize = 4096;

/// The raw option set.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Input files; empty means stdin.
    pub input_files: Vec<PathBuf>,
    /// Output file; absent means stdout.
    pub output_file: Option<PathBuf>,
    /// Sort each input back onto itself.
    pub replace: bool,
    /// Fixed input record length.
    pub fixed_in: Option<usize>,
    /// Fixed output record length; defaults to `fixed_in`.
    pub fixed_out: Option<usize>,
    /// Input end-of-record delimiter; absent means the host line separator.
    pub variable_in: Option<Vec<u8>>,
    /// Output end-of-record delimiter; defaults to the input delimiter.
    pub variable_out: Option<Vec<u8>>,
    /// Declared input columns.
    pub columns: ColumnLayout,
    /// Sort keys: column name plus optional direction.
    pub order_by: Vec<(String, Option<KeyDirection>)>,
    /// Keyless processing order.
    pub copy_order: Option<CopyOrder>,
    /// Duplicate-key disposition.
    pub duplicate: DuplicateDisposition,
    /// WHERE expressions; all must hold for a row to be selected.
    pub where_exprs: Vec<String>,
    /// STOP expressions; input ends when all hold.
    pub stop_exprs: Vec<String>,
    /// Planning hint for unknown-size inputs.
    pub row_max: Option<u64>,
    /// Explicit tree depth (2..=16).
    pub power: Option<u32>,
    /// CSV dialect; present iff the input is delimited-field.
    pub csv: Option<CsvFormat>,
    /// Withhold the first record as a header even without `--csv h`.
    pub header_in: bool,
    /// Replay the captured header at the top of the output.
    pub header_out: bool,
    /// Declared aggregates.
    pub aggregates: Vec<AggregateSpec>,
    /// Directory for work files; defaults to the system temp directory.
    pub work_directory: Option<PathBuf>,
    /// Cache inputs in memory (the default).
    pub cache_input: bool,
    /// Keep runs in a work file instead of memory.
    pub disk_work: bool,
    /// Length guard ceiling for delimited records.
    pub max_record_len: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            input_files: Vec::new(),
            output_file: None,
            replace: false,
            fixed_in: None,
            fixed_out: None,
            variable_in: None,
            variable_out: None,
            columns: ColumnLayout::new(),
            order_by: Vec::new(),
            copy_order: None,
            duplicate: DuplicateDisposition::Original,
            where_exprs: Vec::new(),
            stop_exprs: Vec::new(),
            row_max: None,
            power: None,
            csv: None,
            header_in: false,
            header_out: true,
            aggregates: Vec::new(),
            work_directory: None,
            cache_input: true,
            disk_work: false,
            max_record_len: DEFAULT_MAX_RECORD,
        }
    }
}

impl SortConfig {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves and checks the whole configuration. Every configuration
    /// error surfaces here, before any input is opened.
    pub fn validate(&self) -> Result<SortPlan, SortError> {
        self.check_exclusions()?;

        let depth = self.resolve_depth()?;
        let leaf_capacity = 1u64 << (depth - 1);
        if let (Some(power), Some(row_max)) = (self.power, self.row_max) {
            // Refused up front: one sorting pass plus one merge pass is
            // what the plan guarantees.
            let capacity = leaf_capacity.saturating_mul(leaf_capacity);
            if row_max > capacity {
                return Err(SortError::PowerTooSmall { power, capacity, row_max });
            }
        }

        let codec = self.build_codec()?;
        let where_predicates = parse_all(&self.where_exprs, &self.columns)?;
        let stop_predicates = parse_all(&self.stop_exprs, &self.columns)?;

        // Aggregate declarations are validated now even though the
        // aggregator itself is built per run.
        crate::aggregate::Aggregator::new(self.aggregates.clone(), &self.columns)?;

        let framing_in = match self.fixed_in {
            Some(len) => Framing::Fixed(len),
            None => match &self.variable_in {
                Some(delim) => Framing::Delimited(delim.clone()),
                None => Framing::host_lines(),
            },
        };
        let framing_out = match (self.fixed_out.or(self.fixed_in), &self.variable_out) {
            (Some(len), None) => Framing::Fixed(len),
            (_, Some(delim)) => Framing::Delimited(delim.clone()),
            (None, None) => framing_in.clone(),
        };

        let capture_header =
            self.header_in || self.csv.as_ref().map(|c| c.header).unwrap_or(false);

        Ok(SortPlan {
            depth,
            framing_in,
            framing_out,
            csv: self.csv.clone(),
            layout: self.columns.clone(),
            codec,
            where_predicates,
            stop_predicates,
            duplicate: self.duplicate,
            aggregates: self.aggregates.clone(),
            capture_header,
            emit_header: capture_header && self.header_out,
            input_files: self.input_files.clone(),
            output_file: self.output_file.clone(),
            in_place: self.replace,
            cache_input: self.cache_input,
            disk_work: self.disk_work,
            work_directory: self
                .work_directory
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            row_max: self.row_max.unwrap_or(u64::MAX),
            max_record_len: self.max_record_len,
            power: self.power.unwrap_or(DEFAULT_POWER),
        })
    }

    fn check_exclusions(&self) -> Result<(), SortError> {
        let conflict = |detail: &str| {
            Err(SortError::ConflictingOptions { detail: detail.to_string() })
        };
        if self.replace && self.output_file.is_some() {
            return conflict("--replace writes over the input; --outputFileName cannot be given");
        }
        if self.replace && self.input_files.is_empty() {
            return conflict("--replace needs named input files, not stdin");
        }
        if self.fixed_out.is_some() && self.variable_out.is_some() {
            return conflict("--fixedOut and --variableOutput are mutually exclusive");
        }
        if self.fixed_in.is_some() && self.variable_in.is_some() {
            return conflict("--fixedIn and --variableInput are mutually exclusive");
        }
        if self.csv.is_some() && self.fixed_in.is_some() {
            return conflict("--csv applies to delimited records, not --fixedIn");
        }
        if self.copy_order.is_some() && !self.order_by.is_empty() {
            return conflict("--copy and --orderBy are mutually exclusive");
        }
        for (name, len) in
            [("fixedIn", self.fixed_in), ("fixedOut", self.fixed_out)]
        {
            if let Some(len) = len {
                if len == 0 || len > DEFAULT_MAX_RECORD {
                    return Err(SortError::InvalidOption {
                        detail: format!("--{name} must be 1..=4096, got {len}"),
                    });
                }
            }
        }
        if let Some(delim) = &self.variable_in {
            if delim.is_empty() {
                return Err(SortError::InvalidOption {
                    detail: "--variableInput needs at least one delimiter byte".to_string(),
                });
            }
        }
        if self.csv.is_none() {
            let csv_column = self.columns.columns().iter().find(|c| c.csv_field.is_some());
            if let Some(column) = csv_column {
                return Err(SortError::InvalidOption {
                    detail: format!(
                        "column '{}' uses --field but --csv was not given",
                        column.column_name.as_deref().unwrap_or("?")
                    ),
                });
            }
        }
        Ok(())
    }

    fn resolve_depth(&self) -> Result<u32, SortError> {
        if let Some(power) = self.power {
            if !(MIN_DEPTH..=MAX_DEPTH).contains(&power) {
                return Err(SortError::InvalidOption {
                    detail: format!("--power must be {MIN_DEPTH}..={MAX_DEPTH}, got {power}"),
                });
            }
            return Ok(power);
        }
        if let Some(row_max) = self.row_max {
            // The smallest depth whose leaf row holds the declared rows.
            for depth in MIN_DEPTH..=MAX_DEPTH {
                if (1u64 << (depth - 1)) >= row_max {
                    return Ok(depth);
                }
            }
        }
        Ok(DEFAULT_POWER)
    }

    fn build_codec(&self) -> Result<KeyCodec, SortError> {
        let mut codec = if self.order_by.is_empty() {
            KeyCodec::for_copy(
                self.copy_order.unwrap_or(CopyOrder::ByKey),
                self.csv.is_some(),
            )?
        } else {
            let mut parts = Vec::with_capacity(self.order_by.len());
            for (name, direction) in &self.order_by {
                let column = self
                    .columns
                    .get(name)
                    .ok_or_else(|| SortError::UnknownColumn { name: name.clone() })?;
                let mut part = column.clone();
                if let Some(direction) = direction {
                    part.direction = *direction;
                }
                parts.push(part);
            }
            KeyCodec::new(parts)?
        };
        if self.duplicate.reverses_keys() {
            codec.reverse_directions();
        }
        Ok(codec)
    }
}

/// The resolved, checked plan the engine executes.
#[derive(Debug, Clone)]
pub struct SortPlan {
    pub depth: u32,
    pub framing_in: Framing,
    pub framing_out: Framing,
    pub csv: Option<CsvFormat>,
    pub layout: ColumnLayout,
    pub codec: KeyCodec,
    pub where_predicates: Vec<ComparePredicate>,
    pub stop_predicates: Vec<ComparePredicate>,
    pub duplicate: DuplicateDisposition,
    pub aggregates: Vec<AggregateSpec>,
    pub capture_header: bool,
    pub emit_header: bool,
    pub input_files: Vec<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub in_place: bool,
    pub cache_input: bool,
    pub disk_work: bool,
    pub work_directory: PathBuf,
    pub row_max: u64,
    pub max_record_len: usize,
    pub power: u32,
}

impl SortPlan {
    /// Rows per phase.
    pub fn leaf_capacity(&self) -> usize {
        1 << (self.depth - 1)
    }
}

/// Parses one `--columnsIn` group: `name <n> type <t> [offset <o>]
/// [length <l>] [field <f>] [format <rest…>]`. A leading bare word is the
/// name. Returns the column and whether an offset was given.
pub fn parse_column_spec(spec: &str) -> Result<(KeyPart, bool), SortError> {
    let bad = |detail: String| SortError::InvalidKeySpec { detail };
    let mut tokens = spec.split_whitespace().peekable();

    let mut name: Option<String> = None;
    let mut kind: Option<KeyType> = None;
    let mut offset: Option<usize> = None;
    let mut length: Option<usize> = None;
    let mut field: Option<usize> = None;
    let mut format: Option<String> = None;

    // A leading bare word names the column.
    if let Some(&first) = tokens.peek() {
        if !is_column_keyword(first) {
            name = Some(first.to_string());
            tokens.next();
        }
    }

    while let Some(key) = tokens.next() {
        match key {
            "name" | "n" => name = Some(next_value(&mut tokens, key, spec)?),
            "type" | "t" => {
                let code = next_value(&mut tokens, key, spec)?;
                kind = Some(KeyType::from_code(&code).ok_or_else(|| {
                    bad(format!("unknown column type '{code}'"))
                })?);
            }
            "offset" | "o" => {
                offset = Some(parse_number(&next_value(&mut tokens, key, spec)?, spec)?);
            }
            "length" | "l" => {
                length = Some(parse_number(&next_value(&mut tokens, key, spec)?, spec)?);
            }
            "field" | "f" => {
                let number: usize =
                    parse_number(&next_value(&mut tokens, key, spec)?, spec)?;
                if number == 0 {
                    return Err(bad("csv fields are numbered from 1".to_string()));
                }
                field = Some(number - 1);
            }
            "format" | "d" => {
                // The format is the remainder of the spec; chrono patterns
                // may contain spaces.
                let rest: Vec<&str> = tokens.by_ref().collect();
                if rest.is_empty() {
                    return Err(bad(format!("'format' in '{spec}' needs a value")));
                }
                format = Some(rest.join(" "));
            }
            other => return Err(bad(format!("unknown column attribute '{other}'"))),
        }
    }

    let name = name.ok_or_else(|| bad(format!("column '{spec}' has no name")))?;
    let kind = kind.unwrap_or(KeyType::String);
    let mut part = KeyPart::new(
        kind,
        offset.unwrap_or(0),
        length.unwrap_or_else(|| kind.default_length()),
        KeyDirection::Ascending,
    );
    part.column_name = Some(name);
    part.parse_format = format;
    part.csv_field = field;
    Ok((part, offset.is_some()))
}

fn next_value<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    key: &str,
    spec: &str,
) -> Result<String, SortError> {
    tokens.next().map(str::to_string).ok_or_else(|| SortError::InvalidKeySpec {
        detail: format!("'{key}' in '{spec}' needs a value"),
    })
}

fn is_column_keyword(token: &str) -> bool {
    matches!(
        token,
        "name" | "n" | "type" | "t" | "offset" | "o" | "length" | "l" | "field" | "f"
            | "format" | "d"
    )
}

/// Parses one `--orderBy` entry: `columnName [direction]`.
pub fn parse_order_spec(spec: &str) -> Result<(String, Option<KeyDirection>), SortError> {
    let mut tokens = spec.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| SortError::InvalidKeySpec {
            detail: "orderBy needs a column name".to_string(),
        })?
        .to_string();
    let direction = match tokens.next() {
        Some(code) => Some(KeyDirection::from_code(code).ok_or_else(|| {
            SortError::InvalidKeySpec { detail: format!("unknown direction '{code}'") }
        })?),
        None => None,
    };
    if let Some(extra) = tokens.next() {
        return Err(SortError::InvalidKeySpec {
            detail: format!("unexpected '{extra}' in orderBy '{spec}'"),
        });
    }
    Ok((name, direction))
}

/// Parses one aggregate option: `name [columnName]`.
pub fn parse_aggregate_spec(op: AggregateOp, spec: &str) -> Result<AggregateSpec, SortError> {
    let mut tokens = spec.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| SortError::InvalidKeySpec {
            detail: "aggregate needs a name".to_string(),
        })?
        .to_string();
    let column = tokens.next().map(str::to_string);
    Ok(AggregateSpec { name, op, column })
}

fn parse_number<T: std::str::FromStr>(token: &str, spec: &str) -> Result<T, SortError> {
    token.parse().map_err(|_| SortError::InvalidKeySpec {
        detail: format!("'{token}' in '{spec}' is not a number"),
    })
}

/// Parses a delimiter option value: each item is a single character, an
/// escape (`\t`, `\r`, `\n`), or a decimal byte.
pub fn parse_delimiter(tokens: &[String]) -> Result<Vec<u8>, SortError> {
    let mut bytes = Vec::new();
    for token in tokens {
        match token.as_str() {
            "\\n" => bytes.push(b'\n'),
            "\\r" => bytes.push(b'\r'),
            "\\t" => bytes.push(b'\t'),
            t if t.len() == 1 => bytes.push(t.as_bytes()[0]),
            t => match t.parse::<u8>() {
                Ok(b) => bytes.push(b),
                Err(_) => {
                    return Err(SortError::InvalidOption {
                        detail: format!("'{t}' is not a delimiter byte"),
                    })
                }
            },
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_column(spec: &str) -> SortConfig {
        let mut config = SortConfig::new();
        let (column, offset_given) = parse_column_spec(spec).unwrap();
        config.columns.push(column, offset_given).unwrap();
        config
    }

    #[test]
    fn test_minimal_config_defaults_to_bykey_copy() {
        let plan = SortConfig::new().validate().unwrap();
        assert_eq!(plan.depth, DEFAULT_POWER);
        assert_eq!(plan.leaf_capacity(), 32768);
        assert_eq!(plan.codec.parts()[0].kind, KeyType::String);
        assert_eq!(plan.framing_in, Framing::host_lines());
    }

    #[test]
    fn test_parse_column_spec_forms() {
        let (col, given) = parse_column_spec("name type String offset 0 length 6").unwrap();
        assert_eq!(col.column_name.as_deref(), Some("name"));
        assert_eq!(col.length, 6);
        assert!(given);

        let (col, given) = parse_column_spec("ts type Date length 19 format %Y-%m-%d %H:%M:%S")
            .unwrap();
        assert_eq!(col.parse_format.as_deref(), Some("%Y-%m-%d %H:%M:%S"));
        assert!(!given);

        let (col, _) = parse_column_spec("city type String field 2").unwrap();
        assert_eq!(col.csv_field, Some(1));

        assert!(parse_column_spec("type String").is_err()); // no name
        assert!(parse_column_spec("x type Nope").is_err());
        assert!(parse_column_spec("x field 0").is_err());
    }

    #[test]
    fn test_parse_order_spec() {
        assert_eq!(parse_order_spec("v").unwrap(), ("v".to_string(), None));
        assert_eq!(
            parse_order_spec("v DESC").unwrap(),
            ("v".to_string(), Some(KeyDirection::Descending))
        );
        assert!(parse_order_spec("v sideways").is_err());
        assert!(parse_order_spec("  ").is_err());
    }

    #[test]
    fn test_order_by_builds_keys_from_columns() {
        let mut config = config_with_column("v type Integer offset 0 length 4");
        config.order_by.push(("v".to_string(), Some(KeyDirection::Descending)));
        let plan = config.validate().unwrap();
        assert_eq!(plan.codec.parts()[0].kind, KeyType::Integer);
        assert!(plan.codec.parts()[0].direction.is_descending());
    }

    #[test]
    fn test_unknown_order_column_rejected() {
        let mut config = SortConfig::new();
        config.order_by.push(("ghost".to_string(), None));
        assert!(matches!(config.validate(), Err(SortError::UnknownColumn { .. })));
    }

    #[test]
    fn test_exclusions() {
        let mut config = SortConfig::new();
        config.replace = true;
        assert!(matches!(config.validate(), Err(SortError::ConflictingOptions { .. })));

        let mut config = SortConfig::new();
        config.input_files.push(PathBuf::from("in.dat"));
        config.replace = true;
        config.output_file = Some(PathBuf::from("out.dat"));
        assert!(matches!(config.validate(), Err(SortError::ConflictingOptions { .. })));

        let mut config = SortConfig::new();
        config.fixed_out = Some(80);
        config.variable_out = Some(b"\n".to_vec());
        assert!(matches!(config.validate(), Err(SortError::ConflictingOptions { .. })));

        let mut config = SortConfig::new();
        config.copy_order = Some(CopyOrder::Original);
        config.order_by.push(("x".to_string(), None));
        assert!(matches!(config.validate(), Err(SortError::ConflictingOptions { .. })));
    }

    #[test]
    fn test_fixed_length_bounds() {
        let mut config = SortConfig::new();
        config.fixed_in = Some(0);
        assert!(matches!(config.validate(), Err(SortError::InvalidOption { .. })));

        let mut config = SortConfig::new();
        config.fixed_in = Some(5000);
        assert!(matches!(config.validate(), Err(SortError::InvalidOption { .. })));
    }

    #[test]
    fn test_depth_resolution() {
        let mut config = SortConfig::new();
        config.row_max = Some(1000);
        let plan = config.validate().unwrap();
        // 1 << (11-1) = 1024 is the smallest leaf row covering 1000.
        assert_eq!(plan.depth, 11);

        let mut config = SortConfig::new();
        config.power = Some(3);
        assert_eq!(config.validate().unwrap().leaf_capacity(), 4);

        let mut config = SortConfig::new();
        config.power = Some(1);
        assert!(matches!(config.validate(), Err(SortError::InvalidOption { .. })));
    }

    #[test]
    fn test_power_too_small_refused_up_front() {
        let mut config = SortConfig::new();
        config.power = Some(3); // leaf row of 4, two-pass capacity 16
        config.row_max = Some(100);
        assert!(matches!(config.validate(), Err(SortError::PowerTooSmall { .. })));
    }

    #[test]
    fn test_reverse_duplicate_inverts_key_directions() {
        let mut config = config_with_column("v type String offset 0 length 4");
        config.order_by.push(("v".to_string(), None));
        config.duplicate = DuplicateDisposition::Reverse;
        let plan = config.validate().unwrap();
        assert!(plan.codec.parts()[0].direction.is_descending());
    }

    #[test]
    fn test_csv_field_requires_csv() {
        let mut config = SortConfig::new();
        let (column, given) = parse_column_spec("c type String field 1").unwrap();
        config.columns.push(column, given).unwrap();
        assert!(matches!(config.validate(), Err(SortError::InvalidOption { .. })));
    }

    #[test]
    fn test_output_framing_defaults() {
        let mut config = SortConfig::new();
        config.fixed_in = Some(20);
        let plan = config.validate().unwrap();
        assert_eq!(plan.framing_out, Framing::Fixed(20));

        let mut config = SortConfig::new();
        config.variable_in = Some(b"\r\n".to_vec());
        let plan = config.validate().unwrap();
        assert_eq!(plan.framing_out, Framing::Delimited(b"\r\n".to_vec()));
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(
            parse_delimiter(&["\\r".to_string(), "\\n".to_string()]).unwrap(),
            b"\r\n".to_vec()
        );
        assert_eq!(parse_delimiter(&["124".to_string()]).unwrap(), vec![124]);
        assert_eq!(parse_delimiter(&[";".to_string()]).unwrap(), vec![b';']);
        assert!(parse_delimiter(&["xx".to_string()]).is_err());
    }

    #[test]
    fn test_parse_aggregate_spec() {
        let agg = parse_aggregate_spec(AggregateOp::Sum, "total price").unwrap();
        assert_eq!(agg.name, "total");
        assert_eq!(agg.column.as_deref(), Some("price"));

        let count = parse_aggregate_spec(AggregateOp::Count, "rows").unwrap();
        assert!(count.column.is_none());
    }
}
