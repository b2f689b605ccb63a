use crate::error::PipeResult;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Csv,
    Align,
    Simple,
    Psql,
    Presto,
    #[value(name = "fancy_grid", alias = "fancy-grid")]
    FancyGrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alignment {
    Left,
    Right,
}

pub fn render(output: &str, is_query: bool, format: Option<OutputFormat>) -> PipeResult<String> {
    let layout: fn(Vec<String>, Vec<Vec<String>>) -> String = match format {
        None | Some(OutputFormat::Csv) => return Ok(output.to_string()),
        Some(OutputFormat::Align) => |headers, rows| Table::aligned(headers, rows).render_plain(),
        Some(OutputFormat::Simple) => {
            |headers, rows| Table::numbered(headers, rows).render_simple()
        }
        Some(OutputFormat::Psql) => |headers, rows| Table::numbered(headers, rows).render_psql(),
        Some(OutputFormat::Presto) => {
            |headers, rows| Table::numbered(headers, rows).render_presto()
        }
        Some(OutputFormat::FancyGrid) => {
            |headers, rows| Table::numbered(headers, rows).render_fancy_grid()
        }
    };
    let trimmed = output.trim();
    if !is_query || trimmed.contains("no rows selected") || trimmed.contains("ERROR at line") {
        return Ok(output.to_string());
    }

    let data = strip_row_count(trimmed);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(data.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect::<Vec<_>>());
    }
    Ok(layout(headers, rows))
}

fn strip_row_count(data: &str) -> String {
    data.lines()
        .filter(|line| {
            let line = line.trim();
            !(line.ends_with("rows selected.") || line.ends_with("row selected."))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    align: Vec<Alignment>,
    widths: Vec<usize>,
}

impl Table {
    fn numbered(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers = std::iter::once("rn".to_string()).chain(headers).collect();
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| std::iter::once((idx + 1).to_string()).chain(row).collect())
            .collect();
        Self::new(headers, rows, None)
    }

    fn aligned(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers = std::iter::once(String::new()).chain(headers).collect();
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| std::iter::once(idx.to_string()).chain(row).collect())
            .collect();
        Self::new(headers, rows, Some(Alignment::Right))
    }

    fn new(
        mut headers: Vec<String>,
        mut rows: Vec<Vec<String>>,
        fixed: Option<Alignment>,
    ) -> Self {
        let columns = rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(headers.len()))
            .max()
            .unwrap_or(0);
        headers.resize(columns, String::new());
        for row in &mut rows {
            row.resize(columns, String::new());
        }

        let align = (0..columns)
            .map(|col| {
                fixed.unwrap_or_else(|| {
                    let numeric = rows
                        .iter()
                        .map(|row| row[col].trim())
                        .filter(|cell| !cell.is_empty())
                        .all(|cell| cell.parse::<f64>().is_ok());
                    if numeric && !rows.is_empty() {
                        Alignment::Right
                    } else {
                        Alignment::Left
                    }
                })
            })
            .collect();
        let widths = (0..columns)
            .map(|col| {
                rows.iter()
                    .map(|row| row[col].chars().count())
                    .chain(std::iter::once(headers[col].chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        Self {
            headers,
            rows,
            align,
            widths,
        }
    }

    fn cells<'a>(&'a self, row: &'a [String]) -> impl Iterator<Item = String> + 'a {
        row.iter()
            .enumerate()
            .map(|(col, cell)| pad(cell, self.widths[col], self.align[col]))
    }

    fn rule(&self, fill: char, extra: usize, left: &str, mid: &str, right: &str) -> String {
        let parts: Vec<String> = self
            .widths
            .iter()
            .map(|width| fill.to_string().repeat(width + extra))
            .collect();
        format!("{left}{}{right}", parts.join(mid))
    }

    fn line(&self, row: &[String], left: &str, mid: &str, right: &str) -> String {
        let cells: Vec<String> = self.cells(row).collect();
        format!("{left}{}{right}", cells.join(mid))
    }

    fn render_plain(&self) -> String {
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        out.push(self.line(&self.headers, "", "  ", ""));
        for row in &self.rows {
            out.push(self.line(row, "", "  ", ""));
        }
        join_lines(out)
    }

    fn render_simple(&self) -> String {
        let mut out = Vec::with_capacity(self.rows.len() + 2);
        out.push(self.line(&self.headers, "", "  ", ""));
        out.push(self.rule('-', 0, "", "  ", ""));
        for row in &self.rows {
            out.push(self.line(row, "", "  ", ""));
        }
        join_lines(out)
    }

    fn render_psql(&self) -> String {
        let mut out = Vec::with_capacity(self.rows.len() + 4);
        out.push(self.rule('-', 2, "+", "+", "+"));
        out.push(self.line(&self.headers, "| ", " | ", " |"));
        out.push(self.rule('-', 2, "|", "+", "|"));
        for row in &self.rows {
            out.push(self.line(row, "| ", " | ", " |"));
        }
        out.push(self.rule('-', 2, "+", "+", "+"));
        join_lines(out)
    }

    fn render_presto(&self) -> String {
        let mut out = Vec::with_capacity(self.rows.len() + 2);
        out.push(self.line(&self.headers, " ", " | ", ""));
        out.push(self.rule('-', 2, "", "+", ""));
        for row in &self.rows {
            out.push(self.line(row, " ", " | ", ""));
        }
        join_lines(out)
    }

    fn render_fancy_grid(&self) -> String {
        let mut out = Vec::with_capacity(self.rows.len() * 2 + 3);
        out.push(self.rule('═', 2, "╒", "╤", "╕"));
        out.push(self.line(&self.headers, "│ ", " │ ", " │"));
        out.push(self.rule('═', 2, "╞", "╪", "╡"));
        for (idx, row) in self.rows.iter().enumerate() {
            if idx > 0 {
                out.push(self.rule('─', 2, "├", "┼", "┤"));
            }
            out.push(self.line(row, "│ ", " │ ", " │"));
        }
        out.push(self.rule('═', 2, "╘", "╧", "╛"));
        join_lines(out)
    }
}

fn pad(cell: &str, width: usize, align: Alignment) -> String {
    match align {
        Alignment::Left => format!("{cell:<width$}"),
        Alignment::Right => format!("{cell:>width$}"),
    }
}

fn join_lines(lines: Vec<String>) -> String {
    let mut text = lines
        .into_iter()
        .map(|line| line.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    text.push('\n');
    text
}
