//! Terminal line charts drawn with box-drawing characters.
//!
//! Layout: a y-axis with numeric labels on the left, one column per data
//! point, one row per scaled unit. NaN points leave gaps in a series.

use colored::{Color, Colorize};

const SYMBOLS: [&str; 10] = ["┼", "┤", "╶", "╴", "─", "╰", "╭", "╮", "╯", "│"];

/// Series color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartColor {
    Yellow,
    Blue,
    Green,
    Red,
    Cyan,
    Magenta,
}

impl From<ChartColor> for Color {
    fn from(color: ChartColor) -> Self {
        match color {
            ChartColor::Yellow => Color::Yellow,
            ChartColor::Blue => Color::Blue,
            ChartColor::Green => Color::Green,
            ChartColor::Red => Color::Red,
            ChartColor::Cyan => Color::Cyan,
            ChartColor::Magenta => Color::Magenta,
        }
    }
}

/// Chart styling.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartConfig {
    /// Number of rows above the lowest label; defaults to the data range.
    pub height: Option<usize>,
    /// Lower bound of the y-axis; defaults to the data minimum.
    pub min: Option<f64>,
    /// Upper bound of the y-axis; defaults to the data maximum.
    pub max: Option<f64>,
    /// Columns reserved left of the plot area (axis included).
    pub offset: usize,
    /// Colors cycled over the series; empty draws uncolored.
    pub colors: Vec<ChartColor>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            height: None,
            min: None,
            max: None,
            offset: 3,
            colors: Vec::new(),
        }
    }
}

impl ChartConfig {
    /// Styling shared by the post-run report charts.
    pub fn report(colors: Vec<ChartColor>) -> Self {
        Self {
            height: Some(15),
            min: Some(0.0),
            colors,
            ..Default::default()
        }
    }
}

/// Draws `series` as a multi-line string. Returns an empty string when there
/// is nothing to plot.
pub fn plot(series: &[Vec<f64>], config: &ChartConfig) -> String {
    let values: Vec<f64> = series.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
    if values.is_empty() {
        return String::new();
    }

    let data_min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let data_max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let minimum = config.min.unwrap_or(data_min);
    let maximum = config.max.unwrap_or(data_max).max(minimum);

    let interval = maximum - minimum;
    let offset = config.offset.max(1);
    let height = config.height.map(|h| h as f64).unwrap_or(interval);
    let ratio = if interval > 0.0 { height / interval } else { 1.0 };

    let min2 = (minimum * ratio).floor() as i64;
    let max2 = (maximum * ratio).ceil() as i64;
    let rows = (max2 - min2) as usize;

    let clamp = |n: f64| n.max(minimum).min(maximum);
    let scaled = |y: f64| (clamp(y) * ratio).round() as i64 - min2;
    let row_of = |y: i64| (rows as i64 - y) as usize;

    let width = series.iter().map(Vec::len).max().unwrap_or(0) + offset;
    let mut grid = vec![vec![" ".to_string(); width]; rows + 1];

    for y in min2..=max2 {
        let step = if rows > 0 { rows as f64 } else { 1.0 };
        let label = format!("{:8.2} ", maximum - ((y - min2) as f64 * interval / step));
        let row = (y - min2) as usize;
        let label_col = offset.saturating_sub(label.chars().count());
        grid[row][label_col] = label;
        // Zero line gets a cross tick
        let level = max2 - (y - min2);
        grid[row][offset - 1] = if level == 0 { SYMBOLS[0] } else { SYMBOLS[1] }.to_string();
    }

    if let Some(first) = series.first().and_then(|s| s.first()) {
        if !first.is_nan() {
            grid[row_of(scaled(*first))][offset - 1] = SYMBOLS[0].to_string();
        }
    }

    for (i, line) in series.iter().enumerate() {
        let color = if config.colors.is_empty() {
            None
        } else {
            Some(config.colors[i % config.colors.len()])
        };
        let paint = |symbol: &str| match color {
            Some(c) => symbol.color(Color::from(c)).to_string(),
            None => symbol.to_string(),
        };

        for x in 0..line.len().saturating_sub(1) {
            let (d0, d1) = (line[x], line[x + 1]);
            let col = x + offset;

            match (d0.is_nan(), d1.is_nan()) {
                (true, true) => continue,
                (true, false) => {
                    grid[row_of(scaled(d1))][col] = paint(SYMBOLS[2]);
                    continue;
                }
                (false, true) => {
                    grid[row_of(scaled(d0))][col] = paint(SYMBOLS[3]);
                    continue;
                }
                (false, false) => {}
            }

            let y0 = scaled(d0);
            let y1 = scaled(d1);
            if y0 == y1 {
                grid[row_of(y0)][col] = paint(SYMBOLS[4]);
                continue;
            }

            grid[row_of(y1)][col] = paint(if y0 > y1 { SYMBOLS[5] } else { SYMBOLS[6] });
            grid[row_of(y0)][col] = paint(if y0 > y1 { SYMBOLS[7] } else { SYMBOLS[8] });

            for y in (y0.min(y1) + 1)..y0.max(y1) {
                grid[row_of(y)][col] = paint(SYMBOLS[9]);
            }
        }
    }

    grid.iter()
        .map(|row| row.concat().trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
