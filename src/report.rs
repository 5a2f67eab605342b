//! Rendering of profiles and store statistics.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::interpreter::ReplaySummary;
use crate::profiler::{CallSiteSummary, ProfileReport};
use crate::store::TableInfo;

const MAX_COLUMN_WIDTH: usize = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "table" => Ok(Self::Table),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => bail!("Invalid output format: {s}. Must be one of: table, csv, json"),
        }
    }
}

#[derive(Serialize)]
struct JsonProfile<'a> {
    replay: &'a ReplaySummary,
    #[serde(flatten)]
    profile: &'a ProfileReport,
}

const CALL_SITE_HEADERS: [&str; 11] = [
    "call_site",
    "file",
    "line",
    "count",
    "work",
    "span",
    "local_work",
    "local_span",
    "top_count",
    "top_work",
    "top_span",
];

fn call_site_row(site: &CallSiteSummary) -> Vec<String> {
    let p = &site.profile;
    vec![
        site.signature.clone(),
        site.file.clone(),
        site.line.to_string(),
        p.count.to_string(),
        p.work.to_string(),
        p.span.to_string(),
        p.local_work.to_string(),
        p.local_span.to_string(),
        p.top_count.to_string(),
        p.top_work.to_string(),
        p.top_span.to_string(),
    ]
}

/// Write a finished profile. `top` limits the number of call sites shown.
pub fn write_profile<W: Write>(
    out: &mut W,
    report: &ProfileReport,
    summary: &ReplaySummary,
    format: OutputFormat,
    top: Option<usize>,
) -> Result<()> {
    let limit = top.unwrap_or(report.call_sites.len());
    let shown = &report.call_sites[..limit.min(report.call_sites.len())];

    match format {
        OutputFormat::Json => {
            let truncated = ProfileReport {
                call_sites: shown.to_vec(),
                ..report.clone()
            };
            let json = JsonProfile {
                replay: summary,
                profile: &truncated,
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
        }
        OutputFormat::Csv => {
            writeln!(out, "{}", CALL_SITE_HEADERS.join(","))?;
            for site in shown {
                let row: Vec<String> = call_site_row(site).iter().map(|v| csv_field(v)).collect();
                writeln!(out, "{}", row.join(","))?;
            }
        }
        OutputFormat::Table => {
            let totals = &report.totals;
            writeln!(out, "work:        {}", totals.work)?;
            writeln!(out, "span:        {}", totals.span)?;
            match report.parallelism {
                Some(p) => writeln!(out, "parallelism: {p:.3}")?,
                None => writeln!(out, "parallelism: undefined (zero span)")?,
            }
            writeln!(out, "lock span:   {}", totals.lock_span)?;
            writeln!(out, "lock work:   {}", totals.lock_work)?;
            if summary.has_dangling() {
                writeln!(
                    out,
                    "skipped:     {} dangling reference(s)",
                    summary.dangling_total
                )?;
            }
            writeln!(out)?;

            let headers: Vec<String> = CALL_SITE_HEADERS.iter().map(|h| h.to_string()).collect();
            let rows: Vec<Vec<String>> = shown.iter().map(call_site_row).collect();
            write_table(out, &headers, &rows)?;
        }
    }
    Ok(())
}

/// Write the row count of every store table.
pub fn write_tables<W: Write>(
    out: &mut W,
    tables: &[TableInfo],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(tables)?)?;
        }
        OutputFormat::Csv => {
            writeln!(out, "table,rows")?;
            for t in tables {
                writeln!(out, "{},{}", t.name, t.row_count)?;
            }
        }
        OutputFormat::Table => {
            let headers = vec!["table".to_string(), "rows".to_string()];
            let rows: Vec<Vec<String>> = tables
                .iter()
                .map(|t| vec![t.name.clone(), t.row_count.to_string()])
                .collect();
            write_table(out, &headers, &rows)?;
        }
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_table<W: Write>(out: &mut W, headers: &[String], rows: &[Vec<String>]) -> Result<()> {
    if rows.is_empty() {
        writeln!(out, "(no results)")?;
        return Ok(());
    }

    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in rows {
        for (i, val) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(val.chars().count());
            }
        }
    }

    for w in &mut widths {
        *w = (*w).min(MAX_COLUMN_WIDTH);
    }

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths.get(i).copied().unwrap_or(10)))
        .collect();
    writeln!(out, "{}", header_line.join(" | "))?;

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(out, "{}", sep.join("-+-"))?;

    for row in rows {
        let row_line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let width = widths.get(i).copied().unwrap_or(10);
                let truncated = if v.chars().count() > width && width > 3 {
                    let head: String = v.chars().take(width - 3).collect();
                    format!("{head}...")
                } else {
                    v.clone()
                };
                format!("{truncated:width$}")
            })
            .collect();
        writeln!(out, "{}", row_line.join(" | ").trim_end())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::{CallSiteProfile, WorkSpanProfile};
    use crate::trace::FunctionId;

    fn report() -> ProfileReport {
        let site = |id: i64, signature: &str, work: u64| CallSiteSummary {
            call_site: FunctionId(id),
            signature: signature.to_string(),
            file: "main.c".to_string(),
            line: 3,
            profile: CallSiteProfile {
                count: 1,
                work,
                span: work,
                ..Default::default()
            },
        };
        ProfileReport {
            totals: WorkSpanProfile {
                work: 15,
                span: 15,
                lock_span: 0,
                lock_work: 0,
            },
            parallelism: Some(1.0),
            call_sites: vec![site(1, "int main(int, char**)", 15), site(2, "work", 10)],
        }
    }

    fn render(format: OutputFormat, top: Option<usize>) -> String {
        let mut out = Vec::new();
        write_profile(&mut out, &report(), &ReplaySummary::default(), format, top).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("csv".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_table_output() {
        let text = render(OutputFormat::Table, None);
        assert!(text.contains("work:        15"));
        assert!(text.contains("parallelism: 1.000"));
        assert!(text.contains("int main(int, char**)"));
        assert!(text.contains("-+-"));
    }

    #[test]
    fn test_zero_span_table_output() {
        let mut report = report();
        report.parallelism = None;
        let mut out = Vec::new();
        write_profile(
            &mut out,
            &report,
            &ReplaySummary::default(),
            OutputFormat::Table,
            None,
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("parallelism: undefined (zero span)"));
    }

    #[test]
    fn test_csv_quotes_signatures() {
        let text = render(OutputFormat::Csv, None);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("call_site,file,line,count,work"));
        assert!(lines[1].starts_with("\"int main(int, char**)\",main.c,3,1,15"));
    }

    #[test]
    fn test_json_respects_top() {
        let text = render(OutputFormat::Json, Some(1));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["work"], 15);
        assert_eq!(value["parallelism"], 1.0);
        assert_eq!(value["call_sites"].as_array().unwrap().len(), 1);
        assert_eq!(value["call_sites"][0]["signature"], "int main(int, char**)");
        assert!(value["replay"]["instructions"].is_number());
    }

    #[test]
    fn test_tables_listing() {
        let tables = vec![
            TableInfo {
                name: "Call".to_string(),
                row_count: 4,
            },
            TableInfo {
                name: "Thread".to_string(),
                row_count: 1,
            },
        ];
        let mut out = Vec::new();
        write_tables(&mut out, &tables, OutputFormat::Csv).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "table,rows\nCall,4\nThread,1\n");
    }
}
