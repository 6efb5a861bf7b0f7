//! Handlebars merging for named document templates and designer markup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderErrorReason,
    handlebars_helper, no_escape,
};
use qrcode::{EcLevel, QrCode, render::svg};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

const SOURCE: &str = "application::templates";
const TEMPLATE_EXTENSION: &str = "hbs";
const PARTIALS_DIR: &str = "partials";
const BUDDHIST_ERA_OFFSET: i32 = 543;
const DEFAULT_DECIMALS: usize = 2;
/// Minimum edge, in pixels, of generated QR codes.
const QR_CODE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{name}` not found")]
    NotFound { name: String },
    #[error("template `{name}` failed to compile: {message}")]
    Compile { name: String, message: String },
    #[error("template rendering failed: {message}")]
    Render { message: String },
    #[error("cannot encode QR code: {message}")]
    QrCode { message: String },
    #[error("failed to read templates from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Compiled templates plus the helper set shared by every document.
///
/// Named templates escape HTML in `{{value}}`. Designer markup is merged
/// without escaping since its authors place HTML fragments in data on purpose.
pub struct TemplateRenderer {
    named: Handlebars<'static>,
    inline: Handlebars<'static>,
    templates: BTreeSet<String>,
    directory: PathBuf,
}

impl TemplateRenderer {
    /// Compile `*.hbs` in `directory` and register `partials/*.hbs` as partials.
    /// A missing directory yields an empty renderer.
    pub fn load(directory: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let directory = directory.into();
        let mut named = base_registry();
        let mut inline = base_registry();
        inline.register_escape_fn(no_escape);

        if !directory.is_dir() {
            warn!(
                target = SOURCE,
                op = "load",
                directory = %directory.display(),
                "Template directory missing; only inline templates are available"
            );
            return Ok(Self {
                named,
                inline,
                templates: BTreeSet::new(),
                directory,
            });
        }

        let partials_dir = directory.join(PARTIALS_DIR);
        let mut partials = 0usize;
        if partials_dir.is_dir() {
            for (name, source) in read_templates(&partials_dir)? {
                named
                    .register_partial(&name, source.as_str())
                    .map_err(|err| compile_error(&name, &err))?;
                inline
                    .register_partial(&name, source.as_str())
                    .map_err(|err| compile_error(&name, &err))?;
                partials += 1;
            }
        }

        let mut templates = BTreeSet::new();
        for (name, source) in read_templates(&directory)? {
            named
                .register_template_string(&name, source)
                .map_err(|err| compile_error(&name, &err))?;
            templates.insert(name);
        }

        info!(
            target = SOURCE,
            op = "load",
            directory = %directory.display(),
            templates = templates.len(),
            partials,
            "Loaded document templates"
        );

        Ok(Self {
            named,
            inline,
            templates,
            directory,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Template names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.templates.iter().cloned().collect()
    }

    /// Partials share the registry but are not renderable on their own.
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains(name)
    }

    pub fn render(&self, name: &str, data: &Value) -> Result<String, TemplateError> {
        if !self.contains(name) {
            return Err(TemplateError::NotFound {
                name: name.to_string(),
            });
        }
        self.named
            .render(name, data)
            .map_err(|err| TemplateError::Render {
                message: err.to_string(),
            })
    }

    /// Merge ad-hoc markup (raw HTML bodies, designer templates).
    pub fn render_inline(&self, source: &str, data: &Value) -> Result<String, TemplateError> {
        self.inline
            .render_template(source, data)
            .map_err(|err| TemplateError::Render {
                message: err.to_string(),
            })
    }
}

fn base_registry() -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(false);
    registry.register_helper("numberFormat", Box::new(number_format_helper));
    registry.register_helper("dateFormat", Box::new(date_format));
    registry.register_helper("dateTimeFormat", Box::new(date_time_format));
    registry.register_helper("timeFormat", Box::new(time_format));
    registry.register_helper("valueOrDash", Box::new(value_or_dash));
    registry.register_helper("checkMark", Box::new(check_mark));
    registry.register_helper("eq", Box::new(eq));
    registry.register_helper("gt", Box::new(gt));
    registry.register_helper("inc", Box::new(inc));
    registry.register_helper("or", Box::new(or));
    registry.register_helper("qrCode", Box::new(qr_code_helper));
    registry
}

/// Encode `content` as an SVG QR code (error correction level M) inside a
/// `data:` URI usable as an `<img src>`.
pub fn qr_code_data_uri(content: &str) -> Result<String, TemplateError> {
    let code = QrCode::with_error_correction_level(content.as_bytes(), EcLevel::M).map_err(
        |err| TemplateError::QrCode {
            message: err.to_string(),
        },
    )?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(QR_CODE_SIZE, QR_CODE_SIZE)
        .quiet_zone(true)
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}

fn read_templates(directory: &Path) -> Result<Vec<(String, String)>, TemplateError> {
    let io_error = |source| TemplateError::Io {
        path: directory.to_path_buf(),
        source,
    };

    let mut templates = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(TEMPLATE_EXTENSION)
        {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let source = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
            path: path.clone(),
            source,
        })?;
        templates.push((name.to_string(), source));
    }
    templates.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(templates)
}

fn compile_error(name: &str, err: &dyn std::fmt::Display) -> TemplateError {
    TemplateError::Compile {
        name: name.to_string(),
        message: err.to_string(),
    }
}

/// `{{numberFormat value [decimals]}}`: thousands separators, fixed decimals
/// (default 2). Missing values print `-`; non-numeric values pass through.
fn number_format_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h.param(0).map(|param| param.value()).unwrap_or(&Value::Null);
    let decimals = h
        .param(1)
        .and_then(|param| param.value().as_u64())
        .map(|dec| dec.min(20) as usize)
        .unwrap_or(DEFAULT_DECIMALS);

    let rendered = match value {
        Value::Null => "-".to_string(),
        Value::Number(number) => match number.as_f64() {
            Some(number) => format_number(number, decimals),
            None => number.to_string(),
        },
        other => display_value(other),
    };
    out.write(&rendered)?;
    Ok(())
}

/// `{{qrCode value}}`: a QR code data URI for `value`. Missing or empty
/// values print nothing.
fn qr_code_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let content = match h.param(0).map(|param| param.value()) {
        None | Some(Value::Null) => return Ok(()),
        Some(value) => display_value(value),
    };
    if content.is_empty() {
        return Ok(());
    }
    let uri = qr_code_data_uri(&content)
        .map_err(|err| RenderErrorReason::Other(err.to_string()))?;
    out.write(&uri)?;
    Ok(())
}

handlebars_helper!(date_format: |value: Json| {
    format_temporal(value, |at| {
        format!("{:02}/{:02}/{}", at.day(), at.month(), buddhist_year(at))
    })
});

handlebars_helper!(date_time_format: |value: Json| {
    format_temporal(value, |at| {
        format!(
            "{:02}/{:02}/{} {:02}:{:02}",
            at.day(),
            at.month(),
            buddhist_year(at),
            at.hour(),
            at.minute()
        )
    })
});

handlebars_helper!(time_format: |value: Json| {
    format_temporal(value, |at| format!("{:02}:{:02}", at.hour(), at.minute()))
});

handlebars_helper!(value_or_dash: |value: Json| {
    match value {
        Value::Null => "-".to_string(),
        Value::String(text) if text.is_empty() => "-".to_string(),
        other => display_value(other),
    }
});

handlebars_helper!(check_mark: |value: Json| if truthy(value) { "✓" } else { "" });

handlebars_helper!(eq: |left: Json, right: Json| left == right);

handlebars_helper!(gt: |left: Json, right: Json| {
    match (as_number(left), as_number(right)) {
        (Some(left), Some(right)) => left > right,
        _ => false,
    }
});

handlebars_helper!(inc: |value: Json| {
    match value {
        Value::Number(number) if number.is_i64() => {
            Value::from(number.as_i64().unwrap_or_default().saturating_add(1))
        }
        other => match as_number(other) {
            Some(number) if number.fract() == 0.0 && number.abs() < 9.0e15 => {
                Value::from(number as i64 + 1)
            }
            Some(number) => Value::from(number + 1.0),
            None => Value::Null,
        },
    }
});

handlebars_helper!(or: |left: Json, right: Json| {
    if truthy(left) { left.clone() } else { right.clone() }
});


fn buddhist_year(at: &NaiveDateTime) -> i32 {
    at.year() + BUDDHIST_ERA_OFFSET
}

/// Apply `format` to a parseable date/time value. Empty values print `-`;
/// strings that do not parse are printed unchanged.
fn format_temporal(value: &Value, format: impl Fn(&NaiveDateTime) -> String) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(text) if text.trim().is_empty() => "-".to_string(),
        Value::Bool(false) => "-".to_string(),
        Value::String(text) => match parse_temporal(text) {
            Some(at) => format(&at),
            None => text.clone(),
        },
        Value::Number(number) => match number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
        {
            Some(at) => format(&at.naive_utc()),
            None => number.to_string(),
        },
        other => display_value(other),
    }
}

/// Timestamps keep the wall-clock time of their own offset.
fn parse_temporal(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.naive_local());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(at);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn format_number(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let fixed = format!("{:.*}", decimals, value.abs());
    let (integer, fraction) = match fixed.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let is_zero = fixed.chars().all(|c| c == '0' || c == '.');
    let sign = if value.is_sign_negative() && !is_zero {
        "-"
    } else {
        ""
    };
    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn renderer() -> TemplateRenderer {
        let dir = TempDir::new().expect("tempdir");
        TemplateRenderer::load(dir.path().join("missing")).expect("empty renderer")
    }

    fn inline(source: &str, data: Value) -> String {
        renderer().render_inline(source, &data).expect("render")
    }

    #[test]
    fn number_format_groups_thousands() {
        assert_eq!(inline("{{numberFormat n}}", json!({"n": 1234567.891})), "1,234,567.89");
        assert_eq!(inline("{{numberFormat n 0}}", json!({"n": 999.6})), "1,000");
        assert_eq!(inline("{{numberFormat n}}", json!({"n": -1200})), "-1,200.00");
        assert_eq!(inline("{{numberFormat n}}", json!({})), "-");
        assert_eq!(inline("{{numberFormat n}}", json!({"n": "n/a"})), "n/a");
    }

    #[test]
    fn dates_use_buddhist_era() {
        let data = json!({"d": "2024-03-05T14:07:00+07:00", "day": "2024-12-31"});
        assert_eq!(inline("{{dateFormat d}}", data.clone()), "05/03/2567");
        assert_eq!(inline("{{dateTimeFormat d}}", data.clone()), "05/03/2567 14:07");
        assert_eq!(inline("{{timeFormat d}}", data.clone()), "14:07");
        assert_eq!(inline("{{dateFormat day}}", data), "31/12/2567");
    }

    #[test]
    fn unparseable_dates_pass_through() {
        let data = json!({"d": "31/12/2567", "empty": ""});
        assert_eq!(inline("{{dateFormat d}}", data.clone()), "31/12/2567");
        assert_eq!(inline("{{dateFormat empty}}", data.clone()), "-");
        assert_eq!(inline("{{timeFormat missing}}", data), "-");
    }

    #[test]
    fn value_helpers() {
        let data = json!({"zero": 0, "blank": "", "name": "Somchai", "yes": true, "no": false});
        assert_eq!(inline("{{valueOrDash zero}}", data.clone()), "0");
        assert_eq!(inline("{{valueOrDash blank}}", data.clone()), "-");
        assert_eq!(inline("{{valueOrDash missing}}", data.clone()), "-");
        assert_eq!(inline("{{valueOrDash name}}", data.clone()), "Somchai");
        assert_eq!(inline("{{checkMark yes}}|{{checkMark no}}", data), "✓|");
    }

    #[test]
    fn logic_helpers_work_in_subexpressions() {
        let data = json!({"status": "paid", "qty": 3, "alt": "fallback", "items": ["a", "b"]});
        assert_eq!(
            inline("{{#if (eq status \"paid\")}}PAID{{else}}DUE{{/if}}", data.clone()),
            "PAID"
        );
        assert_eq!(inline("{{#if (gt qty 2)}}many{{/if}}", data.clone()), "many");
        assert_eq!(inline("{{or missing alt}}", data.clone()), "fallback");
        assert_eq!(
            inline("{{#each items}}{{inc @index}}.{{this}} {{/each}}", data),
            "1.a 2.b "
        );
    }

    #[test]
    fn qr_code_helper_emits_svg_data_uri() {
        let data = json!({"order": {"qrCodeContent": "WO-2024-0117"}});
        let uri = inline("{{qrCode order.qrCodeContent}}", data);
        let encoded = uri
            .strip_prefix("data:image/svg+xml;base64,")
            .expect("svg data uri");
        let svg = String::from_utf8(STANDARD.decode(encoded).expect("base64")).expect("utf8");
        assert!(svg.contains("<svg"), "{svg}");

        assert_eq!(inline("{{qrCode missing}}", json!({})), "");
        assert_eq!(inline("[{{qrCode blank}}]", json!({"blank": ""})), "[]");
    }

    #[test]
    fn oversized_qr_content_is_a_render_error() {
        let data = json!({"text": "x".repeat(8_000)});
        let err = renderer()
            .render_inline("{{qrCode text}}", &data)
            .expect_err("too long for a QR code");
        assert!(matches!(err, TemplateError::Render { .. }));
        assert!(qr_code_data_uri(&"x".repeat(8_000)).is_err());
    }

    #[test]
    fn named_templates_escape_and_use_partials() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir(dir.path().join("partials")).expect("partials dir");
        std::fs::write(
            dir.path().join("partials/footer.hbs"),
            "<footer>{{company}}</footer>",
        )
        .expect("partial");
        std::fs::write(
            dir.path().join("invoice.hbs"),
            "<h1>{{title}}</h1>{{> footer}}",
        )
        .expect("template");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("noise");

        let renderer = TemplateRenderer::load(dir.path()).expect("load");
        assert_eq!(renderer.names(), vec!["invoice".to_string()]);
        assert!(!renderer.contains("footer"));

        let html = renderer
            .render("invoice", &json!({"title": "<b>Q1</b>", "company": "ACME"}))
            .expect("render");
        assert_eq!(html, "<h1>&lt;b&gt;Q1&lt;/b&gt;</h1><footer>ACME</footer>");
    }

    #[test]
    fn unknown_template_is_not_found() {
        let err = renderer().render("nope", &json!({})).expect_err("missing");
        assert!(matches!(err, TemplateError::NotFound { name } if name == "nope"));
    }

    #[test]
    fn inline_markup_is_not_escaped() {
        assert_eq!(
            inline("<div>{{body}}</div>", json!({"body": "<p>hi</p>"})),
            "<div><p>hi</p></div>"
        );
    }
}
