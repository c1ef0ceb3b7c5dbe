//! Post-run report: a sequence of analytics queries rendered as text.

pub mod chart;
pub mod link;
pub mod prioritization;
pub mod series;

pub use chart::{plot, ChartColor, ChartConfig};
pub use link::PortalLink;
pub use series::GroupDefinition;

use std::fmt::Write as _;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

use crate::analytics::{LogStore, QueryTable, TimeSpan};
use crate::error::LoadTestResult;

/// What to print alongside a query's result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    pub show_query: bool,
    pub include_link: bool,
}

/// One query of the report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    pub title: String,
    pub query: String,
    pub is_chart: bool,
    /// Columns plotted as series when no group definition is given.
    pub columns: Vec<String>,
    pub chart_config: ChartConfig,
    pub group_definition: Option<GroupDefinition>,
    pub timespan: TimeSpan,
    pub display: DisplayOptions,
}

/// Destination for rendered report text.
pub trait ReportSink: Send + Sync {
    fn write_report(&self, text: &str);
}

/// Prints reports to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn write_report(&self, text: &str) {
        println!("{}", text);
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    text: Mutex<String>,
}

impl MemoryReportSink {
    pub fn contents(&self) -> String {
        self.text.lock().clone()
    }
}

impl ReportSink for MemoryReportSink {
    fn write_report(&self, text: &str) {
        let mut buffer = self.text.lock();
        buffer.push_str(text);
        buffer.push('\n');
    }
}

/// Runs report queries against a log store and renders their results.
pub struct QueryProcessor<'a> {
    store: &'a dyn LogStore,
    link: Option<PortalLink>,
    queries: Vec<ReportQuery>,
}

impl<'a> QueryProcessor<'a> {
    pub fn new(store: &'a dyn LogStore, link: Option<PortalLink>) -> Self {
        Self {
            store,
            link,
            queries: Vec::new(),
        }
    }

    pub fn add_query(&mut self, query: ReportQuery) {
        self.queries.push(query);
    }

    pub fn queries(&self) -> &[ReportQuery] {
        &self.queries
    }

    /// Runs every query in order and returns the rendered report.
    pub async fn run_queries(&self) -> LoadTestResult<String> {
        let mut out = String::new();
        for query in &self.queries {
            info!("Running report query: {}", query.title);
            let table = self.store.run(&query.query, Some(&query.timespan)).await?;
            out.push_str(&self.render(query, &table)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Renders one query and its result table.
    pub fn render(&self, query: &ReportQuery, table: &QueryTable) -> LoadTestResult<String> {
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", query.title);
        let _ = writeln!(out, "{}", "=".repeat(query.title.chars().count()));

        if query.display.show_query {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", query.query);
        }

        if query.display.include_link {
            if let Some(link) = &self.link {
                let _ = writeln!(out);
                let _ = writeln!(out, "{}", link.url(&query.query, &query.timespan)?);
            }
        }

        let _ = writeln!(out);
        if query.is_chart {
            let series = match &query.group_definition {
                Some(group) => group.group(table)?.into_iter().map(|(_, s)| s).collect(),
                None => series::column_series(table, &query.columns)?,
            };
            let chart = plot(&series, &query.chart_config);
            if chart.is_empty() {
                let _ = writeln!(out, "(no data)");
            } else {
                let _ = writeln!(out, "{}", chart);
            }
        } else {
            out.push_str(&render_table(table));
        }

        Ok(out)
    }
}

/// Plain-text table with left-aligned, padded columns.
pub fn render_table(table: &QueryTable) -> String {
    if table.rows.is_empty() {
        return "(no rows)\n".to_string();
    }

    let cells: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.name.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let format_row = |values: Vec<&str>| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    let header: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    let _ = writeln!(out, "{}", format_row(header));
    let _ = writeln!(
        out,
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  ")
    );
    for row in &cells {
        let _ = writeln!(out, "{}", format_row(row.iter().map(String::as_str).collect()));
    }
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
