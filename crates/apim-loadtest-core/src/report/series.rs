//! Turning result tables into chart series.

use serde_json::Value;

use crate::analytics::{as_f64, QueryTable};
use crate::error::{LoadTestError, LoadTestResult};

/// Pivot of a long-format table into one series per group.
///
/// Rows are `(id, group, value)`; the output has one point per distinct id
/// (in order of first appearance) for every distinct group (also in order of
/// first appearance), with `missing_value` where a group has no row for an id.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDefinition {
    pub id_column: String,
    pub group_column: String,
    pub value_column: String,
    pub missing_value: f64,
}

impl GroupDefinition {
    pub fn new(id_column: &str, group_column: &str, value_column: &str) -> Self {
        Self {
            id_column: id_column.to_string(),
            group_column: group_column.to_string(),
            value_column: value_column.to_string(),
            missing_value: f64::NAN,
        }
    }

    /// Groups in first-appearance order, each with its series.
    pub fn group(&self, table: &QueryTable) -> LoadTestResult<Vec<(String, Vec<f64>)>> {
        let id_idx = require_column(table, &self.id_column)?;
        let group_idx = require_column(table, &self.group_column)?;
        let value_idx = require_column(table, &self.value_column)?;

        let mut ids: Vec<String> = Vec::new();
        let mut groups: Vec<(String, Vec<f64>)> = Vec::new();

        for row in &table.rows {
            let id = cell_key(row.get(id_idx));
            let group = cell_key(row.get(group_idx));
            let value = row.get(value_idx).map(as_f64).unwrap_or(self.missing_value);

            let id_pos = match ids.iter().position(|i| *i == id) {
                Some(pos) => pos,
                None => {
                    ids.push(id);
                    for (_, series) in groups.iter_mut() {
                        series.push(self.missing_value);
                    }
                    ids.len() - 1
                }
            };

            let group_pos = match groups.iter().position(|(g, _)| *g == group) {
                Some(pos) => pos,
                None => {
                    groups.push((group, vec![self.missing_value; ids.len()]));
                    groups.len() - 1
                }
            };

            groups[group_pos].1[id_pos] = value;
        }

        Ok(groups)
    }
}

/// Series for each named column, in the given order.
pub fn column_series(table: &QueryTable, columns: &[String]) -> LoadTestResult<Vec<Vec<f64>>> {
    columns
        .iter()
        .map(|name| {
            table
                .numeric_column(name)
                .ok_or_else(|| LoadTestError::Query(format!("column `{}` not in result", name)))
        })
        .collect()
}

fn require_column(table: &QueryTable, name: &str) -> LoadTestResult<usize> {
    table
        .column_index(name)
        .ok_or_else(|| LoadTestError::Query(format!("column `{}` not in result", name)))
}

fn cell_key(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
