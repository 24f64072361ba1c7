//! The account plan document and its section values.
//!
//! Sections are free-form JSON trees on the wire: the same section may come
//! back as a string, a list, or a nested object depending on the backend's
//! generator. `SectionValue` folds all three shapes into one tagged type so
//! patching and rendering are exhaustive instead of probing at runtime.

use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// SectionKey
// ---------------------------------------------------------------------------

/// The fixed set of plan sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKey {
    Overview,
    BusinessModel,
    RecentNews,
    Leadership,
    MarketPosition,
    FinancialHealth,
    PainPoints,
    EngagementStrategy,
}

impl SectionKey {
    pub const ALL: [SectionKey; 8] = [
        SectionKey::Overview,
        SectionKey::BusinessModel,
        SectionKey::RecentNews,
        SectionKey::Leadership,
        SectionKey::MarketPosition,
        SectionKey::FinancialHealth,
        SectionKey::PainPoints,
        SectionKey::EngagementStrategy,
    ];

    /// Wire key
    pub fn as_str(self) -> &'static str {
        match self {
            SectionKey::Overview => "overview",
            SectionKey::BusinessModel => "business_model",
            SectionKey::RecentNews => "recent_news",
            SectionKey::Leadership => "leadership",
            SectionKey::MarketPosition => "market_position",
            SectionKey::FinancialHealth => "financial_health",
            SectionKey::PainPoints => "pain_points",
            SectionKey::EngagementStrategy => "engagement_strategy",
        }
    }

    /// Human-readable heading
    pub fn title(self) -> &'static str {
        match self {
            SectionKey::Overview => "Company Overview",
            SectionKey::BusinessModel => "Business Model & Products",
            SectionKey::RecentNews => "Recent News & Developments",
            SectionKey::Leadership => "Leadership Team",
            SectionKey::MarketPosition => "Competitors & Market Position",
            SectionKey::FinancialHealth => "Financial Health",
            SectionKey::PainPoints => "Potential Pain Points",
            SectionKey::EngagementStrategy => "Engagement Strategy",
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown plan section: {0}")]
pub struct SectionParseError(pub String);

impl FromStr for SectionKey {
    type Err = SectionParseError;

    /// Accepts wire keys plus the backend's conversational aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let key = match normalized.as_str() {
            "overview" => SectionKey::Overview,
            "business_model" | "business model" => SectionKey::BusinessModel,
            "recent_news" | "news" => SectionKey::RecentNews,
            "leadership" => SectionKey::Leadership,
            "market_position" | "market position" | "competitors" => SectionKey::MarketPosition,
            "financial_health" | "financial" | "financials" => SectionKey::FinancialHealth,
            "pain_points" | "pain points" | "challenges" => SectionKey::PainPoints,
            "engagement_strategy" | "engagement" | "strategy" => SectionKey::EngagementStrategy,
            _ => return Err(SectionParseError(s.to_string())),
        };
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// SectionValue
// ---------------------------------------------------------------------------

/// Leaf of a section tree
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("-"),
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Number(n) => write!(f, "{n}"),
            ScalarValue::Text(s) => f.write_str(s),
        }
    }
}

/// A section's content: scalar, ordered list, or nested mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum SectionValue {
    Scalar(ScalarValue),
    List(Vec<SectionValue>),
    Mapping(IndexMap<String, SectionValue>),
}

impl Default for SectionValue {
    fn default() -> Self {
        SectionValue::Mapping(IndexMap::new())
    }
}

impl SectionValue {
    pub fn text(value: impl Into<String>) -> Self {
        SectionValue::Scalar(ScalarValue::Text(value.into()))
    }

    /// True for null, blank text, and empty containers
    pub fn is_empty(&self) -> bool {
        match self {
            SectionValue::Scalar(ScalarValue::Null) => true,
            SectionValue::Scalar(ScalarValue::Text(s)) => s.trim().is_empty(),
            SectionValue::Scalar(_) => false,
            SectionValue::List(items) => items.is_empty(),
            SectionValue::Mapping(map) => map.is_empty(),
        }
    }

    /// Field lookup on mappings; `None` for other shapes
    pub fn get(&self, key: &str) -> Option<&SectionValue> {
        match self {
            SectionValue::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    /// Render as indented plain-text lines, skipping empty fields
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.render_into(0, &mut lines);
        lines
    }

    fn render_into(&self, depth: usize, lines: &mut Vec<String>) {
        let pad = "  ".repeat(depth);
        match self {
            SectionValue::Scalar(scalar) => lines.push(format!("{pad}{scalar}")),
            SectionValue::List(items) => {
                for item in items.iter().filter(|item| !item.is_empty()) {
                    match item {
                        SectionValue::Scalar(scalar) => lines.push(format!("{pad}- {scalar}")),
                        nested => {
                            let start = lines.len();
                            nested.render_into(depth + 1, lines);
                            if let Some(first) = lines.get_mut(start) {
                                let trimmed = first.trim_start().to_string();
                                *first = format!("{pad}- {trimmed}");
                            }
                        }
                    }
                }
            }
            SectionValue::Mapping(map) => {
                for (key, value) in map.iter().filter(|(_, value)| !value.is_empty()) {
                    let label = humanize_key(key);
                    match value {
                        SectionValue::Scalar(scalar) => {
                            lines.push(format!("{pad}{label}: {scalar}"))
                        }
                        nested => {
                            lines.push(format!("{pad}{label}:"));
                            nested.render_into(depth + 1, lines);
                        }
                    }
                }
            }
        }
    }
}

fn humanize_key(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl From<Value> for SectionValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SectionValue::Scalar(ScalarValue::Null),
            Value::Bool(b) => SectionValue::Scalar(ScalarValue::Bool(b)),
            Value::Number(n) => SectionValue::Scalar(ScalarValue::Number(n)),
            Value::String(s) => SectionValue::Scalar(ScalarValue::Text(s)),
            Value::Array(items) => {
                SectionValue::List(items.into_iter().map(SectionValue::from).collect())
            }
            Value::Object(map) => SectionValue::Mapping(
                map.into_iter()
                    .map(|(key, value)| (key, SectionValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<SectionValue> for Value {
    fn from(value: SectionValue) -> Self {
        match value {
            SectionValue::Scalar(ScalarValue::Null) => Value::Null,
            SectionValue::Scalar(ScalarValue::Bool(b)) => Value::Bool(b),
            SectionValue::Scalar(ScalarValue::Number(n)) => Value::Number(n),
            SectionValue::Scalar(ScalarValue::Text(s)) => Value::String(s),
            SectionValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            SectionValue::Mapping(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Full account plan. Every section is always present once a plan exists;
/// sections missing on the wire deserialize as empty mappings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_focus: Option<String>,

    #[serde(default)]
    pub overview: SectionValue,
    #[serde(default)]
    pub business_model: SectionValue,
    #[serde(default)]
    pub recent_news: SectionValue,
    #[serde(default)]
    pub leadership: SectionValue,
    #[serde(default)]
    pub market_position: SectionValue,
    #[serde(default)]
    pub financial_health: SectionValue,
    #[serde(default)]
    pub pain_points: SectionValue,
    #[serde(default)]
    pub engagement_strategy: SectionValue,

    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub conflicts_found: Vec<String>,
}

impl Plan {
    pub fn new(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            ..Default::default()
        }
    }

    pub fn section(&self, key: SectionKey) -> &SectionValue {
        match key {
            SectionKey::Overview => &self.overview,
            SectionKey::BusinessModel => &self.business_model,
            SectionKey::RecentNews => &self.recent_news,
            SectionKey::Leadership => &self.leadership,
            SectionKey::MarketPosition => &self.market_position,
            SectionKey::FinancialHealth => &self.financial_health,
            SectionKey::PainPoints => &self.pain_points,
            SectionKey::EngagementStrategy => &self.engagement_strategy,
        }
    }

    pub fn section_mut(&mut self, key: SectionKey) -> &mut SectionValue {
        match key {
            SectionKey::Overview => &mut self.overview,
            SectionKey::BusinessModel => &mut self.business_model,
            SectionKey::RecentNews => &mut self.recent_news,
            SectionKey::Leadership => &mut self.leadership,
            SectionKey::MarketPosition => &mut self.market_position,
            SectionKey::FinancialHealth => &mut self.financial_health,
            SectionKey::PainPoints => &mut self.pain_points,
            SectionKey::EngagementStrategy => &mut self.engagement_strategy,
        }
    }

    /// Replace one section, returning the previous value
    pub fn replace_section(&mut self, key: SectionKey, value: SectionValue) -> SectionValue {
        std::mem::replace(self.section_mut(key), value)
    }

    /// Sections in display order
    pub fn sections(&self) -> impl Iterator<Item = (SectionKey, &SectionValue)> {
        SectionKey::ALL.into_iter().map(move |key| (key, self.section(key)))
    }
}
