//! Static per-table column maps for partial updates.
//!
//! A [`ColumnSet`] lists the only fields a caller may change, the column each
//! one writes, and how its JSON value is checked. Anything not listed is
//! ignored, so identity and linkage columns can never be reached through an
//! update body.

use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::{Postgres, QueryBuilder};

use crate::error::{ClinicalError, FieldError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text { max: usize },
    Date,
    /// A calendar date strictly before today.
    PastDate,
    Int { min: i32, max: i32 },
    BigInt,
    /// Arbitrary JSON kept as serialized text.
    Json,
    /// Text restricted to a fixed vocabulary.
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub field: &'static str,
    pub column: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl Column {
    pub const fn required(field: &'static str, kind: ColumnKind) -> Self {
        Self {
            field,
            column: field,
            kind,
            nullable: false,
        }
    }

    pub const fn optional(field: &'static str, kind: ColumnKind) -> Self {
        Self {
            field,
            column: field,
            kind,
            nullable: true,
        }
    }

    /// Writes to a column whose name differs from the field name.
    pub const fn stored_as(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }
}

/// A checked value ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Int(Option<i32>),
    BigInt(Option<i64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: &'static str,
    pub column: &'static str,
    pub value: SqlValue,
}

#[derive(Debug)]
pub struct ColumnSet {
    pub table: &'static str,
    pub columns: &'static [Column],
}

impl ColumnSet {
    pub fn get(&self, field: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// Checks every whitelisted field present in `input`, in table order.
    /// Unlisted keys are skipped.
    pub fn resolve(&self, input: &Map<String, Value>) -> Result<Vec<Assignment>, ClinicalError> {
        let ignored: Vec<&str> = input
            .keys()
            .filter(|k| self.get(k).is_none())
            .map(String::as_str)
            .collect();
        if !ignored.is_empty() {
            tracing::debug!(table = self.table, ?ignored, "ignoring non-updatable fields");
        }

        let mut assignments = Vec::new();
        let mut errors = Vec::new();
        for column in self.columns {
            let Some(raw) = input.get(column.field) else {
                continue;
            };
            match convert(column, raw) {
                Ok(value) => assignments.push(Assignment {
                    field: column.field,
                    column: column.column,
                    value,
                }),
                Err(message) => errors.push(FieldError::new(column.field, message)),
            }
        }

        if errors.is_empty() {
            Ok(assignments)
        } else {
            Err(ClinicalError::ValidationFailed(errors))
        }
    }

    /// `UPDATE <table> SET ..., updated_at = NOW() WHERE id = $n RETURNING id`
    pub fn update_statement(&self, id: i64, assignments: Vec<Assignment>) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", self.table));
        for assignment in assignments {
            qb.push(assignment.column).push(" = ");
            match assignment.value {
                SqlValue::Text(v) => qb.push_bind(v),
                SqlValue::Date(v) => qb.push_bind(v),
                SqlValue::Int(v) => qb.push_bind(v),
                SqlValue::BigInt(v) => qb.push_bind(v),
            };
            qb.push(", ");
        }
        qb.push("updated_at = NOW() WHERE id = ");
        qb.push_bind(id);
        qb.push(" RETURNING id");
        qb
    }
}

fn convert(column: &Column, raw: &Value) -> Result<SqlValue, String> {
    if raw.is_null() {
        if !column.nullable {
            return Err("may not be null".to_string());
        }
        return Ok(match column.kind {
            ColumnKind::Date | ColumnKind::PastDate => SqlValue::Date(None),
            ColumnKind::Int { .. } => SqlValue::Int(None),
            ColumnKind::BigInt => SqlValue::BigInt(None),
            _ => SqlValue::Text(None),
        });
    }

    match column.kind {
        ColumnKind::Text { max } => {
            let text = raw.as_str().ok_or("must be a string")?.trim();
            if text.is_empty() {
                return if column.nullable {
                    Ok(SqlValue::Text(None))
                } else {
                    Err("may not be empty".to_string())
                };
            }
            if text.chars().count() > max {
                return Err(format!("must be at most {} characters", max));
            }
            Ok(SqlValue::Text(Some(text.to_string())))
        }
        ColumnKind::Date | ColumnKind::PastDate => {
            let text = raw.as_str().ok_or("must be a date (YYYY-MM-DD)")?;
            let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map_err(|_| "must be a date (YYYY-MM-DD)".to_string())?;
            if column.kind == ColumnKind::PastDate && date >= Utc::now().date_naive() {
                return Err("must be in the past".to_string());
            }
            Ok(SqlValue::Date(Some(date)))
        }
        ColumnKind::Int { min, max } => {
            let value = raw
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or("must be an integer")?;
            if value < min || value > max {
                return Err(format!("must be between {} and {}", min, max));
            }
            Ok(SqlValue::Int(Some(value)))
        }
        ColumnKind::BigInt => raw
            .as_i64()
            .map(|v| SqlValue::BigInt(Some(v)))
            .ok_or_else(|| "must be an integer".to_string()),
        ColumnKind::Json => Ok(SqlValue::Text(Some(raw.to_string()))),
        ColumnKind::Choice(values) => {
            let text = raw.as_str().ok_or("must be a string")?;
            if values.contains(&text) {
                Ok(SqlValue::Text(Some(text.to_string())))
            } else {
                Err(format!("must be one of: {}", values.join(", ")))
            }
        }
    }
}
