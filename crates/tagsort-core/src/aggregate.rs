//! Aggregates over published rows.
//!
//! Each aggregate binds a name to an operation over a declared column (or
//! the record number, for Count). They accumulate while the final pass
//! publishes and are reported when the run completes.

use crate::columns::{ColumnLayout, ColumnValue};
use crate::error::SortError;
use crate::predicate::RowContext;

/// Aggregate operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateOp {
    /// Parse an operation name.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "count" => Some(AggregateOp::Count),
            "sum" => Some(AggregateOp::Sum),
            "min" => Some(AggregateOp::Min),
            "max" => Some(AggregateOp::Max),
            "avg" => Some(AggregateOp::Avg),
            _ => None,
        }
    }
}

/// One declared aggregate.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    /// Name the result is reported under.
    pub name: String,
    /// Operation.
    pub op: AggregateOp,
    /// Source column; not used by Count.
    pub column: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct AggState {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

/// Accumulates every declared aggregate across the published stream.
#[derive(Debug, Default)]
pub struct Aggregator {
    specs: Vec<AggregateSpec>,
    states: Vec<AggState>,
}

impl Aggregator {
    /// Validates the declarations against the column layout.
    pub fn new(specs: Vec<AggregateSpec>, layout: &ColumnLayout) -> Result<Self, SortError> {
        for spec in &specs {
            match (&spec.op, &spec.column) {
                (AggregateOp::Count, _) => {}
                (_, Some(column)) => {
                    if !layout.exists(column) {
                        return Err(SortError::UnknownColumn { name: column.clone() });
                    }
                }
                (_, None) => {
                    return Err(SortError::InvalidKeySpec {
                        detail: format!("aggregate '{}' needs a columnName", spec.name),
                    })
                }
            }
        }
        let states = vec![AggState::default(); specs.len()];
        Ok(Self { specs, states })
    }

    /// True when nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Feeds one published row into every aggregate.
    pub fn update(&mut self, row: &RowContext<'_>) {
        for (spec, state) in self.specs.iter().zip(self.states.iter_mut()) {
            if spec.op == AggregateOp::Count {
                state.count += 1;
                continue;
            }
            let column = spec.column.as_deref().and_then(|name| row.layout.get(name));
            let value = match column {
                Some(column) => row.layout.value_of(column, row.record, row.fields),
                None => ColumnValue::Missing,
            };
            if let Some(v) = value.as_f64() {
                state.count += 1;
                state.sum += v;
                state.min = Some(state.min.map_or(v, |m| m.min(v)));
                state.max = Some(state.max.map_or(v, |m| m.max(v)));
            }
        }
    }

    /// Final values, in declaration order. Min/Max/Avg over no rows are
    /// reported as None.
    pub fn results(&self) -> Vec<(String, Option<f64>)> {
        self.specs
            .iter()
            .zip(self.states.iter())
            .map(|(spec, state)| {
                let value = match spec.op {
                    AggregateOp::Count => Some(state.count as f64),
                    AggregateOp::Sum => Some(state.sum),
                    AggregateOp::Min => state.min,
                    AggregateOp::Max => state.max,
                    AggregateOp::Avg => {
                        (state.count > 0).then(|| state.sum / state.count as f64)
                    }
                };
                (spec.name.clone(), value)
            })
            .collect()
    }
}
