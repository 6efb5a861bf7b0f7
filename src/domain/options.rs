//! Print options accepted by the rendering pool.
//!
//! The wire shape is camelCase JSON. Every field is optional; omitted fields
//! fall back to the house defaults (A4, backgrounds on, page-number footer).

use serde::{Deserialize, Serialize};

use super::error::DomainError;

const PX_PER_INCH: f64 = 96.0;
const MM_PER_INCH: f64 = 25.4;
const CM_PER_INCH: f64 = 2.54;
const PT_PER_INCH: f64 = 72.0;

/// Chromium accepts print scales in this closed range.
pub(crate) const MIN_SCALE: f64 = 0.1;
pub(crate) const MAX_SCALE: f64 = 2.0;

pub const DEFAULT_HEADER_TEMPLATE: &str = "<span></span>";
pub const DEFAULT_FOOTER_TEMPLATE: &str = concat!(
    "<div style=\"font-size:9px;color:#aaa;width:100%;text-align:right;",
    "padding-right:8mm;font-family:sans-serif;box-sizing:border-box;\">",
    "<span class=\"pageNumber\"></span> / <span class=\"totalPages\"></span></div>"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaperFormat {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PaperFormat {
    /// Portrait `(width, height)` in inches.
    pub fn size_inches(self) -> (f64, f64) {
        match self {
            PaperFormat::A3 => (11.69, 16.54),
            PaperFormat::A4 => (8.27, 11.69),
            PaperFormat::A5 => (5.83, 8.27),
            PaperFormat::Letter => (8.5, 11.0),
            PaperFormat::Legal => (8.5, 14.0),
            PaperFormat::Tabloid => (11.0, 17.0),
        }
    }
}

/// Page margins as CSS lengths (`8mm`, `0.5in`, `12px`, `0`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageMargins {
    pub top: String,
    pub right: String,
    pub bottom: String,
    pub left: String,
}

impl PageMargins {
    pub fn zero() -> Self {
        Self {
            top: "0".to_string(),
            right: "0".to_string(),
            bottom: "0".to_string(),
            left: "0".to_string(),
        }
    }

    /// `(top, right, bottom, left)` in inches.
    pub fn to_inches(&self) -> Result<(f64, f64, f64, f64), DomainError> {
        Ok((
            parse_css_length(&self.top)?,
            parse_css_length(&self.right)?,
            parse_css_length(&self.bottom)?,
            parse_css_length(&self.left)?,
        ))
    }
}

impl Default for PageMargins {
    fn default() -> Self {
        Self {
            bottom: "8mm".to_string(),
            ..Self::zero()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfOptions {
    pub format: PaperFormat,
    pub landscape: bool,
    pub print_background: bool,
    pub margin: PageMargins,
    pub display_header_footer: bool,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    #[serde(rename = "preferCSSPageSize", alias = "preferCssPageSize")]
    pub prefer_css_page_size: bool,
    pub scale: Option<f64>,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            format: PaperFormat::A4,
            landscape: false,
            print_background: true,
            margin: PageMargins::default(),
            display_header_footer: true,
            header_template: None,
            footer_template: None,
            prefer_css_page_size: false,
            scale: None,
        }
    }
}

impl PdfOptions {
    /// Layout for documents that carry their own `@page` rules: the page CSS
    /// decides size and margins, no header or footer is stamped.
    pub fn css_driven() -> Self {
        Self {
            margin: PageMargins::zero(),
            display_header_footer: false,
            prefer_css_page_size: true,
            ..Self::default()
        }
    }

    pub fn header_template(&self) -> &str {
        self.header_template
            .as_deref()
            .unwrap_or(DEFAULT_HEADER_TEMPLATE)
    }

    pub fn footer_template(&self) -> &str {
        self.footer_template
            .as_deref()
            .unwrap_or(DEFAULT_FOOTER_TEMPLATE)
    }

    /// Page `(width, height)` in inches after applying orientation.
    pub fn paper_inches(&self) -> (f64, f64) {
        let (width, height) = self.format.size_inches();
        if self.landscape {
            (height, width)
        } else {
            (width, height)
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let (top, right, bottom, left) = self.margin.to_inches()?;
        let (width, height) = self.paper_inches();
        if left + right >= width || top + bottom >= height {
            return Err(DomainError::NoPrintableArea);
        }

        match self.scale {
            Some(scale) if !(MIN_SCALE..=MAX_SCALE).contains(&scale) => {
                return Err(DomainError::ScaleOutOfRange { scale });
            }
            _ => {}
        }

        Ok(())
    }
}

/// Convert a CSS length to inches. A bare number is read as pixels.
pub fn parse_css_length(input: &str) -> Result<f64, DomainError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }

    let lowered = trimmed.to_ascii_lowercase();
    let split = lowered
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(lowered.len());
    let (number, unit) = lowered.split_at(split);

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| DomainError::invalid_length(trimmed, "not a number"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(DomainError::invalid_length(
            trimmed,
            "must be a non-negative number",
        ));
    }

    let inches = match unit {
        "" | "px" => value / PX_PER_INCH,
        "in" => value,
        "mm" => value / MM_PER_INCH,
        "cm" => value / CM_PER_INCH,
        "pt" => value / PT_PER_INCH,
        _ => return Err(DomainError::invalid_length(trimmed, "unsupported unit")),
    };

    Ok(inches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn css_lengths_convert_to_inches() {
        assert!(close(parse_css_length("25.4mm").unwrap(), 1.0));
        assert!(close(parse_css_length("2.54cm").unwrap(), 1.0));
        assert!(close(parse_css_length("96px").unwrap(), 1.0));
        assert!(close(parse_css_length("48").unwrap(), 0.5));
        assert!(close(parse_css_length(" 0.75in ").unwrap(), 0.75));
        assert!(close(parse_css_length("72PT").unwrap(), 1.0));
        assert!(close(parse_css_length("0").unwrap(), 0.0));
        assert!(close(parse_css_length("").unwrap(), 0.0));
    }

    #[test]
    fn css_lengths_reject_garbage() {
        for input in ["abc", "10em", "-4mm", "1.2.3mm", "NaNmm"] {
            assert!(parse_css_length(input).is_err(), "{input} accepted");
        }
    }

    #[test]
    fn empty_json_yields_house_defaults() {
        let options: PdfOptions = serde_json::from_str("{}").expect("parse");
        assert_eq!(options, PdfOptions::default());
        assert_eq!(options.margin.bottom, "8mm");
        assert!(options.print_background);
        assert!(options.display_header_footer);
        assert!(options.footer_template().contains("pageNumber"));
    }

    #[test]
    fn camel_case_fields_override_defaults() {
        let options: PdfOptions = serde_json::from_str(
            r#"{
                "format": "Letter",
                "landscape": true,
                "printBackground": false,
                "margin": { "top": "1in" },
                "displayHeaderFooter": false,
                "preferCSSPageSize": true,
                "scale": 0.8
            }"#,
        )
        .expect("parse");

        assert_eq!(options.format, PaperFormat::Letter);
        assert!(options.landscape);
        assert!(!options.print_background);
        assert_eq!(options.margin.top, "1in");
        assert_eq!(options.margin.bottom, "8mm");
        assert!(options.prefer_css_page_size);
        assert_eq!(options.paper_inches(), (11.0, 8.5));
        options.validate().expect("valid");
    }

    #[test]
    fn validate_rejects_bad_margins_and_scale() {
        let mut options = PdfOptions::default();
        options.margin.left = "5in".into();
        options.margin.right = "4in".into();
        assert!(matches!(
            options.validate(),
            Err(DomainError::NoPrintableArea)
        ));

        let options = PdfOptions {
            scale: Some(3.0),
            ..PdfOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(DomainError::ScaleOutOfRange { .. })
        ));

        let mut options = PdfOptions::default();
        options.margin.top = "ten mm".into();
        assert!(matches!(
            options.validate(),
            Err(DomainError::InvalidLength { .. })
        ));
    }

    #[test]
    fn css_driven_layout_has_zero_margins() {
        let options = PdfOptions::css_driven();
        assert!(options.prefer_css_page_size);
        assert!(!options.display_header_footer);
        assert_eq!(options.margin, PageMargins::zero());
    }
}
