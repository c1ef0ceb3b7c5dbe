//! The fixed set of queries reported after a prioritization run.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::{ChartColor, ChartConfig, DisplayOptions, GroupDefinition, ReportQuery};
use crate::analytics::{TimeSpan, DATETIME_FORMAT};

/// Trailing slice of the run checked for ingested gateway logs.
pub const INGESTION_CHECK_WINDOW_SECS: i64 = 10;

/// Count query over the last few seconds of the run, used to wait for log
/// ingestion to catch up before reporting.
pub fn ingestion_check_query(stop: DateTime<Utc>) -> String {
    let check_time = stop - ChronoDuration::seconds(INGESTION_CHECK_WINDOW_SECS);
    format!(
        "ApiManagementGatewayLogs\n| where TimeGenerated >= datetime({})\n| count",
        check_time.format(DATETIME_FORMAT)
    )
}

/// KQL filter on the run window, logged for reference.
pub fn time_range_filter(span: &TimeSpan) -> String {
    format!(
        "TimeGenerated > datetime({}) and TimeGenerated < datetime({})",
        span.start.format(DATETIME_FORMAT),
        span.end.format(DATETIME_FORMAT)
    )
}

fn time_vars(span: &TimeSpan) -> String {
    format!(
        "let startTime = datetime({});\nlet endTime = datetime({});",
        span.start.format(DATETIME_FORMAT),
        span.end.format(DATETIME_FORMAT)
    )
}

fn chart_query(title: &str, query: String, span: &TimeSpan, colors: Vec<ChartColor>) -> ReportQuery {
    ReportQuery {
        title: title.to_string(),
        // No leading whitespace so the portal runs the query on open
        query: query.trim().to_string(),
        is_chart: true,
        columns: Vec::new(),
        chart_config: ChartConfig::report(colors),
        group_definition: None,
        timespan: *span,
        display: DisplayOptions {
            show_query: true,
            include_link: true,
        },
    }
}

/// Report queries for the run window, in display order.
pub fn report_queries(span: &TimeSpan) -> Vec<ReportQuery> {
    let vars = time_vars(span);

    let mut overall = chart_query(
        "Overall request count",
        format!(
            r#"
{vars}
ApiManagementGatewayLogs
| where OperationName != "" and  TimeGenerated > startTime and TimeGenerated < endTime
| where BackendId != ""
| summarize request_count = count() by bin(TimeGenerated, 10s)
| order by TimeGenerated asc
| render timechart with (title="Overall request count")
"#
        ),
        span,
        vec![ChartColor::Yellow, ChartColor::Blue],
    );
    overall.columns = vec!["request_count".to_string()];

    let mut by_priority = chart_query(
        "Successful request count by request type (High Priority -> Blue, Low Priority -> Yellow)",
        format!(
            r#"
{vars}
ApiManagementGatewayLogs
| where OperationName != "" and  TimeGenerated > startTime and TimeGenerated < endTime
| where BackendId != ""
| where ResponseCode == 200
| extend label = coalesce(RequestHeaders["x-priority"], "high")
| summarize request_count = count() by bin(TimeGenerated, 10s), label
| order by TimeGenerated asc
| render timechart with (title="Successful request count by request type")
"#
        ),
        span,
        vec![ChartColor::Yellow, ChartColor::Blue],
    );
    by_priority.group_definition = Some(GroupDefinition::new(
        "TimeGenerated",
        "label",
        "request_count",
    ));

    let mut remaining_tokens = chart_query(
        "Remaining tokens (Min -> Blue, Max -> Yellow, Avg -> Green)",
        format!(
            r#"
{vars}
ApiManagementGatewayLogs
| where TimeGenerated > startTime and TimeGenerated < endTime
| extend
    remaining_tokens = toint(ResponseHeaders["x-gw-remaining-tokens"])
| summarize max_remaining_tokens=max(remaining_tokens), min_remaining_tokens=min(remaining_tokens), avg_remaining_tokens=sum(remaining_tokens)/count(remaining_tokens) by bin(TimeGenerated, 10s)
| order by TimeGenerated asc
| render timechart with (title="Remaining tokens")
"#
        ),
        span,
        vec![ChartColor::Yellow, ChartColor::Blue, ChartColor::Green],
    );
    remaining_tokens.columns = vec![
        "max_remaining_tokens".to_string(),
        "min_remaining_tokens".to_string(),
        "avg_remaining_tokens".to_string(),
    ];

    // Sliding sum over lags 1,2,3,5,6 (lag 4 is skipped)
    let mut rate_limit = chart_query(
        "Rate-limit tokens consumed (Simulator metric)",
        format!(
            r#"
{vars}
AppMetrics
| where TimeGenerated > startTime and TimeGenerated < endTime
| where Name == "aoai-simulator.tokens.rate-limit"
| extend deployment = tostring(Properties["deployment"])
| summarize number=sum(Sum) by bin(TimeGenerated, 10s), deployment
| order by TimeGenerated asc
| serialize
| extend sliding_average = number
                + coalesce(prev(number, 1),0.0)
                + coalesce(prev(number, 2),0.0)
                + coalesce(prev(number, 3),0.0)
                + coalesce(prev(number, 5),0.0)
                + coalesce(prev(number, 6),0.0)
| project TimeGenerated, sliding_average, number
| render timechart with (title="rate-limit tokens (with sliding 60s average)")
"#
        ),
        span,
        vec![ChartColor::Yellow, ChartColor::Blue],
    );
    rate_limit.columns = vec!["number".to_string(), "sliding_average".to_string()];

    vec![overall, by_priority, remaining_tokens, rate_limit]
}
