//! Row filters written in config files as `[column, op, value]`, e.g. `[Year, ">", 2014]`.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==", alias = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            FilterOp::Eq => "==",
            FilterOp::NotEq => "!=",
            FilterOp::Gt => ">",
            FilterOp::GtEq => ">=",
            FilterOp::Lt => "<",
            FilterOp::LtEq => "<=",
            FilterOp::In => "in",
            FilterOp::NotIn => "not in",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FilterScalar {
    fn to_lit(&self) -> Expr {
        match self {
            FilterScalar::Bool(b) => lit(*b),
            FilterScalar::Int(i) => lit(*i),
            FilterScalar::Float(f) => lit(*f),
            FilterScalar::Str(s) => lit(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Scalar(FilterScalar),
    List(Vec<FilterScalar>),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnFilterError {
    #[error("Filter '{column} {op}' needs a list of values")]
    ExpectedList { column: String, op: FilterOp },

    #[error("Filter '{column} {op}' needs a single value, not a list")]
    ExpectedScalar { column: String, op: FilterOp },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "(String, FilterOp, FilterValue)",
    into = "(String, FilterOp, FilterValue)"
)]
pub struct ColumnFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl From<(String, FilterOp, FilterValue)> for ColumnFilter {
    fn from((column, op, value): (String, FilterOp, FilterValue)) -> Self {
        Self { column, op, value }
    }
}

impl From<ColumnFilter> for (String, FilterOp, FilterValue) {
    fn from(f: ColumnFilter) -> Self {
        (f.column, f.op, f.value)
    }
}

impl ColumnFilter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: FilterValue) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    /// The boolean predicate. Rows where the column is null never pass.
    pub fn to_expr(&self) -> Result<Expr, ColumnFilterError> {
        let column = col(self.column.as_str());
        let compare: Option<fn(Expr, Expr) -> Expr> = match self.op {
            FilterOp::Eq => Some(Expr::eq::<Expr>),
            FilterOp::NotEq => Some(Expr::neq::<Expr>),
            FilterOp::Gt => Some(Expr::gt::<Expr>),
            FilterOp::GtEq => Some(Expr::gt_eq::<Expr>),
            FilterOp::Lt => Some(Expr::lt::<Expr>),
            FilterOp::LtEq => Some(Expr::lt_eq::<Expr>),
            FilterOp::In | FilterOp::NotIn => None,
        };

        match (compare, &self.value) {
            (Some(compare), FilterValue::Scalar(value)) => Ok(compare(column, value.to_lit())),
            (Some(_), FilterValue::List(_)) => Err(ColumnFilterError::ExpectedScalar {
                column: self.column.clone(),
                op: self.op,
            }),
            (None, FilterValue::List(values)) => {
                let any = values
                    .iter()
                    .map(|v| column.clone().eq(v.to_lit()))
                    .reduce(|acc, e| acc.or(e))
                    .unwrap_or(lit(false));
                Ok(if self.op == FilterOp::In {
                    any
                } else {
                    column.is_not_null().and(any.not())
                })
            }
            (None, FilterValue::Scalar(_)) => Err(ColumnFilterError::ExpectedList {
                column: self.column.clone(),
                op: self.op,
            }),
        }
    }
}

/// All filters ANDed together, or `None` when there are none.
pub fn combine_filters(filters: &[ColumnFilter]) -> Result<Option<Expr>, ColumnFilterError> {
    Ok(filters
        .iter()
        .map(ColumnFilter::to_expr)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .reduce(|acc, e| acc.and(e)))
}
