//! Command-line interface for tagsort.
//!
//! Maps the published option surface onto a `SortConfig`, checks it, and
//! runs the engine. All configuration errors surface before any input is
//! opened; processing errors carry the originating record number and
//! source name.
//!
//! # Examples
//!
//! ```bash
//! # Sort lines of a file by a leading name column
//! tagsort --inputFileName in.txt --outputFileName out.txt \
//!     --columnsIn "name type String offset 0 length 6" \
//!     --orderBy "name ASC"
//!
//! # Keep only even-numbered rows, stop at row 10
//! tagsort --inputFileName in.txt --copy Original \
//!     --where 'recordnumber%2==0' --stopWhen 'recordnumber>=10'
//!
//! # Sort a CSV with a header row by its first field
//! tagsort --inputFileName in.csv --csv "h d ," \
//!     --columnsIn "k type String field 1" --orderBy "k ASC"
//! ```

use std::path::PathBuf;

use clap::Parser;
use miette::Result;
use tracing::debug;

use tagsort_core::{
    parse_aggregate_spec, parse_column_spec, parse_delimiter, parse_order_spec, AggregateOp,
    CopyOrder, CsvFormat, DuplicateDisposition, SortConfig, SortEngine, SortError,
};

#[derive(Parser, Debug)]
#[command(name = "tagsort")]
#[command(version, about = "Sort, merge, and copy large record-oriented files by typed keys")]
#[command(disable_help_flag = false)]
struct Cli {
    /// Input file(s) to process; stdin is read when absent
    #[arg(long = "inputFileName", value_name = "PATH")]
    input_file_name: Vec<PathBuf>,

    /// Output file; stdout is written when absent
    #[arg(long = "outputFileName", value_name = "PATH")]
    output_file_name: Option<PathBuf>,

    /// Sort each input file back onto itself
    #[arg(long)]
    replace: bool,

    /// Fixed input record length in bytes (1..4096)
    #[arg(long = "fixedIn", value_name = "N")]
    fixed_in: Option<usize>,

    /// Fixed output record length; defaults to --fixedIn
    #[arg(long = "fixedOut", value_name = "N")]
    fixed_out: Option<usize>,

    /// End-of-record byte(s) for variable-length input (default: newline)
    #[arg(long = "variableInput", value_name = "BYTE")]
    variable_input: Vec<String>,

    /// End-of-record byte(s) for output; defaults to --variableInput
    #[arg(long = "variableOutput", value_name = "BYTE")]
    variable_output: Vec<String>,

    /// Column definition: `NAME type T [offset O] [length L] [field F] [format FMT]`
    #[arg(long = "columnsIn", value_name = "SPEC")]
    columns_in: Vec<String>,

    /// Sort key: `COLUMNNAME [ASC|DESC|AASC|ADESC]`
    #[arg(long = "orderBy", value_name = "SPEC")]
    order_by: Vec<String>,

    /// Keyless processing order: ByKey, Original, or Reverse
    #[arg(long, value_name = "ORDER")]
    copy: Option<String>,

    /// Duplicate-key handling: Original, FirstOnly, LastOnly, or Reverse
    #[arg(long, value_name = "DISPOSITION")]
    duplicate: Option<String>,

    /// Row filter; rows where all expressions hold are selected
    #[arg(long = "where", value_name = "EXPR")]
    where_exprs: Vec<String>,

    /// Stop reading input when all expressions hold
    #[arg(long = "stopWhen", value_name = "EXPR")]
    stop_when: Vec<String>,

    /// Planning hint: the most rows the input may contain
    #[arg(long = "rowMax", value_name = "N")]
    row_max: Option<u64>,

    /// Tournament depth 2..16; the leaf row holds 2^(P-1) rows
    #[arg(long, value_name = "P")]
    power: Option<u32>,

    /// CSV input dialect: `[f PRESET] [h] [d BYTE] [q BYTE] [x BYTE] [c BYTE] [e] [s] [n STR]`
    #[arg(long, value_name = "SPEC", num_args = 0..=1, default_missing_value = "")]
    csv: Option<String>,

    /// Withhold the first record as a header and replay it on output
    #[arg(long = "headerIn")]
    header_in: bool,

    /// Suppress the header on output
    #[arg(long = "noHeaderOut")]
    no_header_out: bool,

    /// Count published rows: `NAME`
    #[arg(long, value_name = "SPEC")]
    count: Vec<String>,

    /// Sum a column over published rows: `NAME COLUMNNAME`
    #[arg(long, value_name = "SPEC")]
    sum: Vec<String>,

    /// Minimum of a column over published rows: `NAME COLUMNNAME`
    #[arg(long, value_name = "SPEC")]
    min: Vec<String>,

    /// Maximum of a column over published rows: `NAME COLUMNNAME`
    #[arg(long, value_name = "SPEC")]
    max: Vec<String>,

    /// Average of a column over published rows: `NAME COLUMNNAME`
    #[arg(long, value_name = "SPEC")]
    avg: Vec<String>,

    /// Directory for work files (default: the system temp directory)
    #[arg(long = "workDirectory", value_name = "PATH")]
    work_directory: Option<PathBuf>,

    /// Stream inputs instead of caching them in memory
    #[arg(long = "noCacheInput")]
    no_cache_input: bool,

    /// Keep intermediate runs in a work file instead of memory
    #[arg(long = "diskWork")]
    disk_work: bool,

    /// Check the configuration and stop before any I/O
    #[arg(long = "syntaxOnly")]
    syntax_only: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;

    if cli.syntax_only {
        config.validate()?;
        println!("Syntax only run - OK");
        return Ok(());
    }

    let mut engine = SortEngine::new(&config)?;
    let stats = engine.run()?;
    debug!(
        input = stats.input_records,
        output = stats.output_records,
        passes = stats.passes,
        "done"
    );

    for (name, value) in &stats.aggregates {
        match value {
            Some(value) => eprintln!("{name} = {value}"),
            None => eprintln!("{name} = (no rows)"),
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<SortConfig, SortError> {
    let mut config = SortConfig::new();
    config.input_files = cli.input_file_name.clone();
    config.output_file = cli.output_file_name.clone();
    config.replace = cli.replace;
    config.fixed_in = cli.fixed_in;
    config.fixed_out = cli.fixed_out;
    if !cli.variable_input.is_empty() {
        config.variable_in = Some(parse_delimiter(&cli.variable_input)?);
    }
    if !cli.variable_output.is_empty() {
        config.variable_out = Some(parse_delimiter(&cli.variable_output)?);
    }

    for spec in &cli.columns_in {
        let (column, offset_given) = parse_column_spec(spec)?;
        config.columns.push(column, offset_given)?;
    }
    for spec in &cli.order_by {
        config.order_by.push(parse_order_spec(spec)?);
    }

    if let Some(order) = &cli.copy {
        config.copy_order = Some(CopyOrder::from_code(order).ok_or_else(|| {
            SortError::InvalidOption { detail: format!("unknown copy order '{order}'") }
        })?);
    }
    if let Some(disposition) = &cli.duplicate {
        config.duplicate =
            DuplicateDisposition::from_code(disposition).ok_or_else(|| {
                SortError::InvalidOption {
                    detail: format!("unknown duplicate disposition '{disposition}'"),
                }
            })?;
    }

    config.where_exprs = cli.where_exprs.clone();
    config.stop_exprs = cli.stop_when.clone();
    config.row_max = cli.row_max;
    config.power = cli.power;
    if let Some(spec) = &cli.csv {
        config.csv = Some(CsvFormat::parse_spec(spec)?);
    }
    config.header_in = cli.header_in;
    config.header_out = !cli.no_header_out;

    let aggregate_groups = [
        (AggregateOp::Count, &cli.count),
        (AggregateOp::Sum, &cli.sum),
        (AggregateOp::Min, &cli.min),
        (AggregateOp::Max, &cli.max),
        (AggregateOp::Avg, &cli.avg),
    ];
    for (op, specs) in aggregate_groups {
        for spec in specs {
            config.aggregates.push(parse_aggregate_spec(op, spec)?);
        }
    }

    config.work_directory = cli.work_directory.clone();
    config.cache_input = !cli.no_cache_input;
    config.disk_work = cli.disk_work;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tagsort").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_option_names_match_published_surface() {
        let cli = parse(&[
            "--inputFileName",
            "a.txt",
            "--inputFileName",
            "b.txt",
            "--outputFileName",
            "out.txt",
            "--columnsIn",
            "v type Integer offset 0 length 4",
            "--orderBy",
            "v DESC",
            "--rowMax",
            "100",
            "--power",
            "8",
            "--workDirectory",
            "/tmp",
            "--diskWork",
        ]);
        assert_eq!(cli.input_file_name.len(), 2);
        assert_eq!(cli.power, Some(8));
        assert!(cli.disk_work);

        let config = build_config(&cli).unwrap();
        assert_eq!(config.order_by.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_csv_flag_without_value() {
        let cli = parse(&["--csv"]);
        let config = build_config(&cli).unwrap();
        assert!(config.csv.is_some());

        let cli = parse(&["--csv", "h d ;"]);
        let config = build_config(&cli).unwrap();
        assert!(config.csv.as_ref().unwrap().header);
    }

    #[test]
    fn test_bad_copy_order_rejected() {
        let cli = parse(&["--copy", "Sideways"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_aggregate_options() {
        let cli = parse(&[
            "--columnsIn",
            "price type String offset 0 length 8",
            "--count",
            "rows",
            "--sum",
            "total price",
        ]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.aggregates.len(), 2);
        assert_eq!(config.aggregates[1].column.as_deref(), Some("price"));
    }
}
