//! Row predicates for `--where` and `--stopWhen`.
//!
//! The engine only depends on the `RowPredicate` capability: evaluate a
//! row to true, false, or null. Null is never an error here — WHERE
//! treats it as *not selected* and STOP treats it as *not stop* — but a
//! predicate that cannot produce a boolean at all must fail with
//! `PredicateNotBoolean`.
//!
//! The built-in implementation covers single comparisons over column
//! names and the builtin variables `recordnumber` and `recordsize`, with
//! an optional modulus on the left side, e.g. `recordnumber%2==0` or
//! `state == NY`.

use std::ops::Range;

use crate::columns::{ColumnLayout, ColumnValue};
use crate::error::SortError;

/// Everything a predicate may inspect about the current row.
pub struct RowContext<'a> {
    /// Raw record bytes.
    pub record: &'a [u8],
    /// CSV field slices, when the input is delimited.
    pub fields: Option<&'a [Range<usize>]>,
    /// 1-relative record number across the whole input.
    pub record_number: i64,
    /// Raw record length in bytes.
    pub record_size: usize,
    /// Declared columns.
    pub layout: &'a ColumnLayout,
}

/// The WHERE/STOP capability.
pub trait RowPredicate {
    /// Evaluates the predicate: `Some(true)`, `Some(false)`, or `None`
    /// for null (for example a column missing from a short record).
    fn evaluate(&self, row: &RowContext<'_>) -> Result<Option<bool>, SortError>;

    /// The source text, for error messages.
    fn text(&self) -> &str;
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn apply(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Ne => ordering != Equal,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    RecordNumber,
    RecordSize,
    Column(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
}

/// The built-in single-comparison predicate.
#[derive(Debug, Clone)]
pub struct ComparePredicate {
    text: String,
    operand: Operand,
    modulus: Option<i64>,
    op: CompareOp,
    literal: Literal,
}

impl ComparePredicate {
    /// Parses an expression, resolving column references against the
    /// declared layout up front so bad references fail at configuration.
    pub fn parse(expression: &str, layout: &ColumnLayout) -> Result<Self, SortError> {
        let fail = |detail: &str| SortError::PredicateParse {
            expression: expression.to_string(),
            detail: detail.to_string(),
        };

        let (lhs, op, rhs) = split_comparison(expression)
            .ok_or_else(|| fail("expected <term> <op> <literal>"))?;

        let (ident, modulus) = match lhs.split_once('%') {
            Some((ident, m)) => {
                let m: i64 = m.trim().parse().map_err(|_| fail("modulus must be an integer"))?;
                if m == 0 {
                    return Err(fail("modulus by zero"));
                }
                (ident.trim(), Some(m))
            }
            None => (lhs.trim(), None),
        };
        if ident.is_empty() {
            return Err(fail("missing left-hand term"));
        }

        let operand = match ident.to_lowercase().as_str() {
            "recordnumber" => Operand::RecordNumber,
            "recordsize" => Operand::RecordSize,
            name => {
                if !layout.exists(name) {
                    return Err(SortError::UnknownColumn { name: name.to_string() });
                }
                Operand::Column(name.to_string())
            }
        };

        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(fail("missing right-hand literal"));
        }
        let literal = if let Ok(n) = rhs.parse::<f64>() {
            Literal::Number(n)
        } else {
            Literal::Text(rhs.trim_matches(['\'', '"']).to_string())
        };

        Ok(Self { text: expression.to_string(), operand, modulus, op, literal })
    }

    fn operand_value(&self, row: &RowContext<'_>) -> ColumnValue {
        match &self.operand {
            Operand::RecordNumber => ColumnValue::Integer(row.record_number),
            Operand::RecordSize => ColumnValue::Integer(row.record_size as i64),
            Operand::Column(name) => match row.layout.get(name) {
                Some(column) => row.layout.value_of(column, row.record, row.fields),
                None => ColumnValue::Missing,
            },
        }
    }
}

impl RowPredicate for ComparePredicate {
    fn evaluate(&self, row: &RowContext<'_>) -> Result<Option<bool>, SortError> {
        let mut value = self.operand_value(row);
        if let Some(m) = self.modulus {
            value = match value.as_f64() {
                Some(v) => ColumnValue::Integer((v as i64) % m),
                None => return Ok(None),
            };
        }

        let ordering = match (&value, &self.literal) {
            (ColumnValue::Missing, _) => return Ok(None),
            (_, Literal::Number(rhs)) => match value.as_f64() {
                Some(lhs) => match lhs.partial_cmp(rhs) {
                    Some(ord) => ord,
                    None => return Ok(None),
                },
                None => return Ok(None),
            },
            (ColumnValue::Text(lhs), Literal::Text(rhs)) => lhs.as_str().cmp(rhs.as_str()),
            (_, Literal::Text(_)) => return Ok(None),
        };
        Ok(Some(self.op.apply(ordering)))
    }

    fn text(&self) -> &str {
        &self.text
    }
}

/// Splits `expr` at the first comparison operator, longest match first.
fn split_comparison(expr: &str) -> Option<(&str, CompareOp, &str)> {
    const OPS: [(&str, CompareOp); 6] = [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];
    for (symbol, op) in OPS {
        if let Some(at) = expr.find(symbol) {
            // A bare ">" match inside ">=" is prevented by ordering, but a
            // "<" found left of an earlier "<=" is not possible either:
            // the first find of the longer symbol wins by iteration order.
            return Some((&expr[..at], op, &expr[at + symbol.len()..]));
        }
    }
    None
}

/// Parses every expression of an option list against the layout.
pub fn parse_all(
    expressions: &[String],
    layout: &ColumnLayout,
) -> Result<Vec<ComparePredicate>, SortError> {
    expressions.iter().map(|e| ComparePredicate::parse(e, layout)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyDirection, KeyPart, KeyType};

    fn layout_with_state() -> ColumnLayout {
        let mut layout = ColumnLayout::new();
        let mut col = KeyPart::new(KeyType::String, 0, 2, KeyDirection::Ascending);
        col.column_name = Some("state".to_string());
        layout.push(col, true).unwrap();
        layout
    }

    fn row<'a>(layout: &'a ColumnLayout, record: &'a [u8], number: i64) -> RowContext<'a> {
        RowContext {
            record,
            fields: None,
            record_number: number,
            record_size: record.len(),
            layout,
        }
    }

    #[test]
    fn test_recordnumber_modulus() {
        let layout = ColumnLayout::new();
        let p = ComparePredicate::parse("recordnumber%2==0", &layout).unwrap();
        assert_eq!(p.evaluate(&row(&layout, b"x", 4)).unwrap(), Some(true));
        assert_eq!(p.evaluate(&row(&layout, b"x", 5)).unwrap(), Some(false));
    }

    #[test]
    fn test_recordnumber_threshold() {
        let layout = ColumnLayout::new();
        let p = ComparePredicate::parse("recordnumber>=10", &layout).unwrap();
        assert_eq!(p.evaluate(&row(&layout, b"x", 9)).unwrap(), Some(false));
        assert_eq!(p.evaluate(&row(&layout, b"x", 10)).unwrap(), Some(true));
    }

    #[test]
    fn test_recordsize() {
        let layout = ColumnLayout::new();
        let p = ComparePredicate::parse("recordsize<3", &layout).unwrap();
        assert_eq!(p.evaluate(&row(&layout, b"ab", 1)).unwrap(), Some(true));
        assert_eq!(p.evaluate(&row(&layout, b"abcd", 1)).unwrap(), Some(false));
    }

    #[test]
    fn test_column_text_compare() {
        let layout = layout_with_state();
        let p = ComparePredicate::parse("state == NY", &layout).unwrap();
        assert_eq!(p.evaluate(&row(&layout, b"NY123", 1)).unwrap(), Some(true));
        assert_eq!(p.evaluate(&row(&layout, b"CA123", 1)).unwrap(), Some(false));
    }

    #[test]
    fn test_missing_column_is_null() {
        let mut layout = ColumnLayout::new();
        let mut col = KeyPart::new(KeyType::Integer, 4, 4, KeyDirection::Ascending);
        col.column_name = Some("v".to_string());
        layout.push(col, true).unwrap();

        let p = ComparePredicate::parse("v > 0", &layout).unwrap();
        assert_eq!(p.evaluate(&row(&layout, b"ab", 1)).unwrap(), None);
    }

    #[test]
    fn test_unknown_column_rejected_at_parse() {
        let layout = ColumnLayout::new();
        let err = ComparePredicate::parse("nosuch == 1", &layout).unwrap_err();
        assert!(matches!(err, SortError::UnknownColumn { .. }));
    }

    #[test]
    fn test_parse_errors() {
        let layout = ColumnLayout::new();
        assert!(ComparePredicate::parse("recordnumber", &layout).is_err());
        assert!(ComparePredicate::parse("recordnumber%0==1", &layout).is_err());
        assert!(ComparePredicate::parse("recordnumber%x==1", &layout).is_err());
        assert!(ComparePredicate::parse("== 3", &layout).is_err());
    }

    #[test]
    fn test_quoted_string_literal() {
        let layout = layout_with_state();
        let p = ComparePredicate::parse("state != 'NY'", &layout).unwrap();
        assert_eq!(p.evaluate(&row(&layout, b"TX999", 1)).unwrap(), Some(true));
    }
}
