//! HTML rendering for the browser-facing pages and insight panels.
//!
//! Pages are small enough to build with `format!`. Every interpolated value
//! that originates from an upload or from the generator goes through
//! [`escape`].

use pulldown_cmark::{html, Event, Options, Parser};
use serde_json::Value;

use crate::cache::{InsightOutcome, InsightSource};
use crate::models::{DocumentRecord, InsightKind};

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  <style>
    body {{ font-family: system-ui, sans-serif; max-width: 60rem; margin: 2rem auto; padding: 0 1rem; background: #0f172a; color: #e2e8f0; }}
    a {{ color: #7dd3fc; }}
    .panel {{ border: 1px solid #1e293b; border-radius: 0.75rem; padding: 1rem; margin-top: 1rem; }}
    .panel-sub, .muted {{ color: #94a3b8; font-size: 0.85rem; }}
    .mono {{ white-space: pre-wrap; font-family: ui-monospace, monospace; }}
    .pill {{ display: inline-block; border-radius: 999px; background: #1e293b; padding: 0.2rem 0.7rem; margin: 0.1rem; font-size: 0.8rem; }}
    table {{ width: 100%; border-collapse: collapse; }}
    td, th {{ padding: 0.4rem 0.6rem; border-bottom: 1px solid #1e293b; text-align: left; }}
  </style>
</head>
<body>
<nav><a href="/">Syllabi</a> · <a href="/upload">Upload</a></nav>
{body}
</body>
</html>
"#,
        title = escape(title),
        body = body
    )
}

pub fn index_page(records: &[DocumentRecord]) -> String {
    let body = if records.is_empty() {
        r#"<h1>Syllabi</h1><p class="muted">Nothing uploaded yet. <a href="/upload">Upload a syllabus</a>.</p>"#
            .to_string()
    } else {
        let rows: String = records
            .iter()
            .map(|r| {
                format!(
                    r#"<tr><td><a href="/syllabus/{slug}">{name}</a></td><td>{instructor}</td><td>{term}</td><td class="muted">{uploaded}</td></tr>"#,
                    slug = r.slug,
                    name = escape(r.display_name()),
                    instructor = escape(&r.instructor),
                    term = escape(&term(r)),
                    uploaded = r.uploaded_at.format("%Y-%m-%d %H:%M UTC"),
                )
            })
            .collect();
        format!(
            r#"<h1>Syllabi</h1>
<table>
<thead><tr><th>Course</th><th>Instructor</th><th>Term</th><th>Uploaded</th></tr></thead>
<tbody>{rows}</tbody>
</table>"#
        )
    };
    layout("Syllabi", &body)
}

pub fn upload_page() -> String {
    layout(
        "Upload a syllabus",
        r#"<h1>Upload a syllabus</h1>
<form method="post" action="/upload" enctype="multipart/form-data">
  <p><label>File (.pdf, .docx, .pptx, .txt, .md) <input type="file" name="file" required></label></p>
  <p><label>Course code <input name="course_code"></label></p>
  <p><label>Title <input name="title"></label></p>
  <p><label>Instructor <input name="instructor"></label></p>
  <p><label>Quarter <input name="quarter"></label></p>
  <p><label>Year <input name="year" type="number"></label></p>
  <p><label>Slug (optional) <input name="slug" pattern="[a-z0-9]+(-[a-z0-9]+)*"></label></p>
  <p><button type="submit">Upload</button></p>
</form>"#,
    )
}

pub fn detail_page(record: &DocumentRecord, cached: &[InsightKind]) -> String {
    let tabs: String = InsightKind::ALL
        .iter()
        .map(|kind| {
            let marker = if cached.contains(kind) { " ✓" } else { "" };
            format!(
                r#"<a class="pill" href="/insight/{slug}/{key}">{label}{marker}</a>"#,
                slug = record.slug,
                key = kind.key(),
                label = kind.label(),
            )
        })
        .collect();

    let body = format!(
        r#"<h1>{name}</h1>
<p class="muted">{course} · {instructor} · {term} · uploaded {uploaded}</p>
<p><a href="/file/{slug}">{filename}</a></p>
<div>{tabs}</div>
<form method="post" action="/cache/clear/{slug}"><button type="submit">Clear cached insights</button></form>"#,
        name = escape(record.display_name()),
        course = escape(&record.course_code),
        instructor = escape(&record.instructor),
        term = escape(&term(record)),
        uploaded = record.uploaded_at.format("%Y-%m-%d %H:%M UTC"),
        slug = record.slug,
        filename = escape(&record.filename),
    );
    layout(record.display_name(), &body)
}

fn term(record: &DocumentRecord) -> String {
    match record.year {
        Some(year) => format!("{} {}", record.quarter, year).trim().to_string(),
        None => record.quarter.clone(),
    }
}

/// The insight fragment returned by `GET /insight/{slug}/{kind}`.
pub fn insight_panel(kind: InsightKind, outcome: &InsightOutcome) -> String {
    let body = match kind {
        InsightKind::Summary => markdown(&outcome.text),
        InsightKind::Workload => structured(&outcome.text, workload),
        InsightKind::Grading => structured(&outcome.text, grading),
        InsightKind::Prereqs => structured(&outcome.text, prereqs),
    };
    let source = match outcome.source {
        InsightSource::Cache => "cache",
        InsightSource::Generated => "generated",
    };
    format!(
        r#"<div class="panel">
  <div class="panel-title">{title}</div>
  <div class="panel-sub">Source: {source}</div>
  <div class="prose">{body}</div>
</div>"#,
        title = kind.key().to_uppercase(),
    )
}

fn pre(text: &str) -> String {
    format!(r#"<pre class="mono">{}</pre>"#, escape(text))
}

/// Parses `text` as a JSON object (tolerating a fenced code block) and lays
/// it out with `render`; anything else is shown verbatim.
fn structured(text: &str, render: fn(&Value) -> String) -> String {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    match serde_json::from_str::<Value>(unfenced.trim()) {
        Ok(value) if value.is_object() => render(&value),
        _ => pre(text),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn list_field(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn bullet_list(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        return format!(r#"<div class="muted">{}</div>"#, empty);
    }
    let lis: String = items
        .iter()
        .map(|i| format!("<li>{}</li>", escape(i)))
        .collect();
    format!("<ul>{}</ul>", lis)
}

fn quotes(value: &Value) -> String {
    let quotes = list_field(value, "evidence_quotes");
    if quotes.is_empty() {
        return r#"<div class="muted">No direct quotes found</div>"#.to_string();
    }
    let lis: String = quotes
        .iter()
        .map(|q| format!("<li>“{}”</li>", escape(q)))
        .collect();
    format!(r#"<ul class="muted">{}</ul>"#, lis)
}

fn section(heading: &str, content: &str) -> String {
    format!("<h3>{}</h3>{}", heading, content)
}

fn text_or(text: String, fallback: &str) -> String {
    if text.is_empty() {
        format!(r#"<div class="muted">{}</div>"#, fallback)
    } else {
        format!("<div>{}</div>", escape(&text))
    }
}

fn workload(value: &Value) -> String {
    let hours = match value.get("hours_per_week_estimate") {
        None | Some(Value::Null) => String::new(),
        Some(_) => format!("{} hours/week", str_field(value, "hours_per_week_estimate")),
    };
    let heavy_weeks = list_field(value, "heavy_weeks");
    let heavy = if heavy_weeks.is_empty() {
        r#"<div class="muted">No specific heavy weeks identified</div>"#.to_string()
    } else {
        heavy_weeks
            .iter()
            .map(|w| format!(r#"<span class="pill">{}</span>"#, escape(w)))
            .collect()
    };

    [
        section("Estimated workload", &text_or(hours, "Not explicitly specified")),
        section(
            "Workload pattern",
            &text_or(str_field(value, "workload_shape"), "Unknown / uneven"),
        ),
        section("Heavy weeks", &heavy),
        section(
            "Why those weeks are heavy",
            &text_or(str_field(value, "why_heavy"), "Not specified"),
        ),
        section("Evidence from syllabus", &quotes(value)),
    ]
    .concat()
}

fn grading(value: &Value) -> String {
    let components = value
        .get("grading_components")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let table = if components.is_empty() {
        r#"<div class="muted">No grading breakdown found</div>"#.to_string()
    } else {
        let rows: String = components
            .iter()
            .map(|c| {
                let name = str_field(c, "name");
                let weight = str_field(c, "weight_percent");
                let weight = match weight.as_str() {
                    "" => "?".to_string(),
                    w if w.ends_with('%') => w.to_string(),
                    w => format!("{}%", w),
                };
                format!(
                    "<tr><td>{}</td><td>{}</td></tr>",
                    escape(if name.is_empty() { "Unknown" } else { &name }),
                    escape(&weight)
                )
            })
            .collect();
        format!(
            "<table><thead><tr><th>Component</th><th>Weight</th></tr></thead><tbody>{}</tbody></table>",
            rows
        )
    };

    let deliverables: Vec<String> = value
        .get("deliverables")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|d| {
                    let kind = str_field(d, "type");
                    let mut line = if kind.is_empty() { "other".to_string() } else { kind };
                    let count = str_field(d, "count");
                    if !count.is_empty() {
                        line.push_str(&format!(" · {}", count));
                    }
                    let notes = str_field(d, "notes");
                    if !notes.is_empty() {
                        line.push_str(&format!(": {}", notes));
                    }
                    line
                })
                .collect()
        })
        .unwrap_or_default();

    [
        section("Grading breakdown", &table),
        section(
            "Deliverables",
            &bullet_list(&deliverables, "No deliverables found"),
        ),
        section(
            "Late policy",
            &text_or(str_field(value, "late_policy"), "Not specified"),
        ),
        section(
            "Collaboration policy",
            &text_or(str_field(value, "collaboration_policy"), "Not specified"),
        ),
        section("Evidence from syllabus", &quotes(value)),
    ]
    .concat()
}

fn prereqs(value: &Value) -> String {
    [
        ("Official prerequisites", "official_prereqs"),
        ("Implied background", "implied_background"),
        ("Tools &amp; languages", "tools_languages"),
        ("Math background", "math_background"),
    ]
    .iter()
    .map(|(heading, key)| section(heading, &bullet_list(&list_field(value, key), "Not specified")))
    .chain(std::iter::once(section("Evidence from syllabus", &quotes(value))))
    .collect()
}

/// CommonMark with tables and strikethrough. Raw HTML from the generator
/// is emitted as escaped text.
fn markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let events = Parser::new_ext(text, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated(text: &str) -> InsightOutcome {
        InsightOutcome {
            text: text.to_string(),
            source: InsightSource::Generated,
        }
    }

    #[test]
    fn escape_handles_markup() {
        assert_eq!(escape("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
    }

    #[test]
    fn markdown_lists_and_headings() {
        let html = markdown("## Overview\n\n- one\n- two\n\n1. first\n2. second\n\nClosing *line*");
        assert!(html.contains("<h2>Overview</h2>"), "{}", html);
        assert!(html.contains("<li>one</li>"));
        assert!(html.contains("<ol>"));
        assert!(html.contains("<p>Closing <em>line</em></p>"));
    }

    #[test]
    fn markdown_renders_tables_and_code() {
        let html = markdown("| Item | Weight |\n|---|---|\n| Final | 40% |\n\n```\nlet x = 1;\n```");
        assert!(html.contains("<table>"), "{}", html);
        assert!(html.contains("<td>Final</td>"));
        assert!(html.contains("<pre><code>let x = 1;"));
    }

    #[test]
    fn markdown_escapes_raw_html() {
        let html = markdown("Hello <script>alert(1)</script>\n\n<div onclick=\"x()\">block</div>");
        assert!(!html.contains("<script>"), "{}", html);
        assert!(!html.contains("<div"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn grading_json_becomes_table() {
        let panel = insight_panel(
            InsightKind::Grading,
            &generated(
                r#"```json
{"grading_components": [{"name": "Midterm", "weight_percent": 30}, {"name": "Final", "weight_percent": "40%"}],
 "deliverables": [{"type": "homework", "count": 8, "notes": "weekly"}],
 "late_policy": "10% per day"}
```"#,
            ),
        );
        assert!(panel.contains("<td>Midterm</td><td>30%</td>"));
        assert!(panel.contains("<td>Final</td><td>40%</td>"));
        assert!(panel.contains("<li>homework · 8: weekly</li>"));
        assert!(panel.contains("10% per day"));
        assert!(panel.contains("Source: generated"));
    }

    #[test]
    fn non_json_falls_back_to_preformatted() {
        let panel = insight_panel(InsightKind::Workload, &generated("about <5> hours"));
        assert!(panel.contains(r#"<pre class="mono">about &lt;5&gt; hours</pre>"#));
    }

    #[test]
    fn workload_null_hours() {
        let panel = insight_panel(
            InsightKind::Workload,
            &generated(r#"{"hours_per_week_estimate": null, "heavy_weeks": ["Week 5"]}"#),
        );
        assert!(panel.contains("Not explicitly specified"));
        assert!(panel.contains(r#"<span class="pill">Week 5</span>"#));
    }
}
