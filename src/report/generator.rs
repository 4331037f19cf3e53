//! Markdown and JSON rendering of scan results.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;

use crate::models::{Asset, RawResult, Report, ReportCollection, ResolvedPack};

/// Rendering switches taken from the `[report]` config section.
#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub include_data: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self { include_data: true }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(rc: &ReportCollection, options: ReportOptions) -> String {
    let mut output = String::new();

    output.push_str("# Packscan Report\n\n");
    output.push_str(&format!(
        "*Generated {}*\n\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&generate_summary_section(rc));

    if !rc.reports.is_empty() {
        output.push_str("## Assets\n\n");
        for (mrn, report) in &rc.reports {
            output.push_str(&generate_asset_section(
                rc.assets.get(mrn),
                report,
                rc.resolved.get(mrn),
                options,
            ));
        }
    }

    output.push_str(&generate_errors_section(rc));
    output.push_str("---\n\n*Report generated by packscan*\n");

    output
}

fn generate_summary_section(rc: &ReportCollection) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Assets | Succeeded | Failed |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} |\n\n",
        rc.assets.len(),
        rc.reports.len(),
        rc.errors.len()
    ));

    if let Some(bundle) = &rc.bundle {
        if !bundle.packs.is_empty() {
            section.push_str("**Query packs:**\n\n");
            for pack in &bundle.packs {
                let name = if pack.name.is_empty() { &pack.mrn } else { &pack.name };
                section.push_str(&format!("- {} ({} queries)\n", name, pack.queries.len()));
            }
            section.push('\n');
        }
    }

    section
}

fn generate_asset_section(
    asset: Option<&Asset>,
    report: &Report,
    resolved: Option<&ResolvedPack>,
    options: ReportOptions,
) -> String {
    let mut section = String::new();

    let name = asset.map(Asset::human_name).unwrap_or(&report.entity_mrn);
    section.push_str(&format!("### {}\n\n", name));
    section.push_str(&format!("- **MRN:** `{}`\n", report.entity_mrn));
    if let Some(platform) = asset.and_then(|a| a.platform.as_ref()) {
        let version = if platform.version.is_empty() {
            String::new()
        } else {
            format!(" {}", platform.version)
        };
        section.push_str(&format!("- **Platform:** {}{}\n", platform.name, version));
    }
    if let Some(resolved) = resolved {
        section.push_str(&format!(
            "- **Execution checksum:** `{}`\n",
            short(&resolved.graph_execution_checksum)
        ));
    }
    section.push_str(&format!("- **Datapoints:** {}\n\n", report.data.len()));

    if !options.include_data || report.data.is_empty() {
        return section;
    }

    section.push_str("| Query | Checksum | Type | Value |\n");
    section.push_str("|:---|:---|:---:|:---|\n");
    match resolved {
        Some(resolved) => {
            for query in resolved.execution_job.queries.values() {
                for checksum in query.code.entrypoint_checksums() {
                    if let Some(res) = report.data.get(checksum) {
                        section.push_str(&data_row(&query.query, res));
                    }
                }
            }
        }
        None => {
            for res in report.data.values() {
                section.push_str(&data_row("", res));
            }
        }
    }
    section.push('\n');

    section
}

fn data_row(query: &str, res: &RawResult) -> String {
    let value = match &res.error {
        Some(err) => format!("error: {}", err),
        None => res.value.to_string(),
    };
    format!(
        "| `{}` | `{}` | {} | {} |\n",
        escape(query),
        short(&res.checksum),
        res.value.data_type(),
        escape(&value)
    )
}

fn generate_errors_section(rc: &ReportCollection) -> String {
    if rc.errors.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Errors\n\n");
    for (mrn, err) in &rc.errors {
        let name = rc.assets.get(mrn).map(Asset::human_name).unwrap_or(mrn);
        section.push_str(&format!("- **{}**: {}\n", name, err));
    }
    section.push('\n');

    section
}

fn short(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}

fn escape(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate a JSON report.
pub fn generate_json_report(rc: &ReportCollection, options: ReportOptions) -> Result<String> {
    if options.include_data {
        return serde_json::to_string_pretty(rc).map_err(Into::into);
    }

    let mut stripped = rc.clone();
    for report in stripped.reports.values_mut() {
        report.data.clear();
    }
    serde_json::to_string_pretty(&stripped).map_err(Into::into)
}

/// Renders the collection in `format` (`markdown` or `json`) and writes it.
pub fn write_report(
    rc: &ReportCollection,
    format: &str,
    options: ReportOptions,
    path: &Path,
) -> Result<()> {
    let content = render(rc, format, options)?;
    std::fs::write(path, content)?;
    Ok(())
}

pub fn render(rc: &ReportCollection, format: &str, options: ReportOptions) -> Result<String> {
    match format {
        "json" => generate_json_report(rc, options),
        _ => Ok(generate_markdown_report(rc, options)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bundle, ExecutionJob, ExecutionQuery, Platform, QueryPack, Value};
    use crate::query::{QueryCompiler, SimpleCompiler};

    fn create_test_collection() -> ReportCollection {
        let code = SimpleCompiler.compile("platform.name == debian").unwrap();
        let entrypoint = code.entrypoint_checksums()[0].clone();

        let mut job = ExecutionJob::default();
        job.queries.insert(
            code.id.clone(),
            ExecutionQuery {
                query: "platform.name == debian".to_string(),
                query_mrn: String::new(),
                code,
            },
        );

        let mut report = Report::empty("//assets/web-1", "//assets/web-1");
        report
            .data
            .insert(entrypoint.clone(), RawResult::new(&entrypoint, Value::Bool(true)));

        let mut rc = ReportCollection::default();
        rc.assets.insert(
            "//assets/web-1".to_string(),
            Asset {
                mrn: "//assets/web-1".to_string(),
                name: "web-1".to_string(),
                platform: Some(Platform {
                    name: "debian".to_string(),
                    version: "12".to_string(),
                    ..Platform::default()
                }),
                ..Asset::default()
            },
        );
        rc.assets.insert(
            "//assets/db-1".to_string(),
            Asset {
                mrn: "//assets/db-1".to_string(),
                name: "db-1".to_string(),
                ..Asset::default()
            },
        );
        rc.reports.insert("//assets/web-1".to_string(), report);
        rc.resolved.insert(
            "//assets/web-1".to_string(),
            ResolvedPack::new(job, String::new()),
        );
        rc.errors.insert(
            "//assets/db-1".to_string(),
            "failed to connect to asset db-1: refused".to_string(),
        );
        rc.bundle = Some(Bundle {
            owner_mrn: String::new(),
            packs: vec![QueryPack {
                name: "Linux Baseline".to_string(),
                ..QueryPack::default()
            }],
        });
        rc
    }

    #[test]
    fn test_generate_markdown_report() {
        let rc = create_test_collection();
        let markdown = generate_markdown_report(&rc, ReportOptions::default());

        assert!(markdown.contains("# Packscan Report"));
        assert!(markdown.contains("| 2 | 1 | 1 |"));
        assert!(markdown.contains("- Linux Baseline (0 queries)"));
        assert!(markdown.contains("### web-1"));
        assert!(markdown.contains("**Platform:** debian 12"));
        assert!(markdown.contains("`platform.name == debian`"));
        assert!(markdown.contains("| bool | true |"));
        assert!(markdown.contains("## Errors"));
        assert!(markdown.contains("- **db-1**: failed to connect"));
    }

    #[test]
    fn test_markdown_without_data() {
        let rc = create_test_collection();
        let markdown = generate_markdown_report(&rc, ReportOptions { include_data: false });
        assert!(markdown.contains("### web-1"));
        assert!(!markdown.contains("| Query | Checksum |"));
    }

    #[test]
    fn test_generate_json_report() {
        let rc = create_test_collection();
        let json = generate_json_report(&rc, ReportOptions::default()).unwrap();
        let parsed: ReportCollection = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.reports["//assets/web-1"].data.len(), 1);
        assert!(json.contains("\"errors\""));

        let json = generate_json_report(&rc, ReportOptions { include_data: false }).unwrap();
        let parsed: ReportCollection = serde_json::from_str(&json).unwrap();
        assert!(parsed.reports["//assets/web-1"].data.is_empty());
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report(&create_test_collection(), "json", ReportOptions::default(), &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with('{'));
    }

    #[test]
    fn test_escape_table_cells() {
        assert_eq!(escape("a|b\nc"), "a\\|b c");
        assert_eq!(short("abcdef"), "abcdef");
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
    }
}
