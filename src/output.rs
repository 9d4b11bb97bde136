//! Output formatting shared by the command-line tool

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Pretty table with borders (default)
    #[default]
    Table,
    /// Markdown table format
    Markdown,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON with indentation
    JsonPretty,
    /// One JSON object per line
    JsonLine,
}

impl OutputFormat {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json | Self::JsonPretty | Self::JsonLine)
    }

    /// Get a list of all format names for help text
    pub fn all_names() -> &'static [&'static str] {
        &["table", "markdown", "json", "json-pretty", "json-line"]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
            Self::JsonPretty => write!(f, "json-pretty"),
            Self::JsonLine => write!(f, "json-line"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" | "pretty" => Ok(Self::Table),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "json-pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "json-line" | "jsonline" | "jsonl" | "ndjson" => Ok(Self::JsonLine),
            _ => Err(format!(
                "Unknown output format '{}'. Valid formats: {}",
                s,
                Self::all_names().join(", ")
            )),
        }
    }
}

/// Render rows as a table or JSON according to `format`
#[cfg(feature = "display")]
pub fn render<T>(rows: &[T], format: OutputFormat) -> Result<String, serde_json::Error>
where
    T: tabled::Tabled + Serialize,
{
    use tabled::settings::Style;
    use tabled::Table;

    let rendered = match format {
        OutputFormat::Table => Table::new(rows).with(Style::rounded()).to_string(),
        OutputFormat::Markdown => Table::new(rows).with(Style::markdown()).to_string(),
        OutputFormat::Json => serde_json::to_string(rows)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(rows)?,
        OutputFormat::JsonLine => rows
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?
            .join("\n"),
    };
    Ok(rendered)
}
