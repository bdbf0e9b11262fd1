use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Rich text
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RichText {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    pub content: String,
}

impl RichText {
    pub fn from_str(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            plain_text: Some(content.clone()),
            text: Some(TextContent { content }),
        }
    }

    pub fn as_str(&self) -> &str {
        if let Some(ref plain) = self.plain_text {
            plain
        } else if let Some(ref text) = self.text {
            &text.content
        } else {
            ""
        }
    }
}

// =============================================================================
// Properties
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectValue {
    pub name: String,
}

/// A page property value. Only the property kinds the registry uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Property {
    Title { title: Vec<RichText> },
    RichText { rich_text: Vec<RichText> },
    Select { select: Option<SelectValue> },
    Number { number: Option<f64> },
    Checkbox { checkbox: bool },
    Url { url: Option<String> },
    /// Property kinds the registry never reads (dates, relations, ...).
    #[serde(other)]
    Unsupported,
}

impl Property {
    pub fn title(content: impl Into<String>) -> Self {
        Property::Title {
            title: vec![RichText::from_str(content)],
        }
    }

    pub fn rich_text(content: impl Into<String>) -> Self {
        Property::RichText {
            rich_text: vec![RichText::from_str(content)],
        }
    }

    pub fn select(name: impl Into<String>) -> Self {
        Property::Select {
            select: Some(SelectValue { name: name.into() }),
        }
    }

    pub fn number(value: f64) -> Self {
        Property::Number {
            number: Some(value),
        }
    }

    pub fn checkbox(value: bool) -> Self {
        Property::Checkbox { checkbox: value }
    }

    pub fn url(value: impl Into<String>) -> Self {
        Property::Url {
            url: Some(value.into()),
        }
    }

    /// Flatten the property to readable text, whatever its kind.
    pub fn plain_text(&self) -> String {
        match self {
            Property::Title { title } => title.iter().map(RichText::as_str).collect(),
            Property::RichText { rich_text } => rich_text.iter().map(RichText::as_str).collect(),
            Property::Select { select } => {
                select.as_ref().map(|s| s.name.clone()).unwrap_or_default()
            }
            Property::Number { number } => number
                .map(|n| {
                    if n.fract() == 0.0 {
                        format!("{}", n as i64)
                    } else {
                        n.to_string()
                    }
                })
                .unwrap_or_default(),
            Property::Checkbox { checkbox } => checkbox.to_string(),
            Property::Url { url } => url.clone().unwrap_or_default(),
            Property::Unsupported => String::new(),
        }
    }
}

// =============================================================================
// Pages and queries
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub id: String,
    pub properties: HashMap<String, Property>,
}

impl Page {
    /// Text of a property by name, empty if absent.
    pub fn text(&self, name: &str) -> String {
        self.properties
            .get(name)
            .map(Property::plain_text)
            .unwrap_or_default()
    }

    pub fn checkbox(&self, name: &str) -> bool {
        matches!(
            self.properties.get(name),
            Some(Property::Checkbox { checkbox: true })
        )
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.properties.get(name) {
            Some(Property::Number { number }) => *number,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<Page>,
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_property_text() {
        let json = r#"{
            "id": "page-1",
            "properties": {
                "Name": {"type": "title", "title": [{"plain_text": "Acme Corp"}]},
                "URL": {"type": "url", "url": "https://acme.com"},
                "Status": {"type": "select", "select": {"name": "Queued"}},
                "Employees": {"type": "number", "number": 120}
            }
        }"#;
        let page: Page = serde_json::from_str(json).unwrap();
        assert_eq!(page.text("Name"), "Acme Corp");
        assert_eq!(page.text("URL"), "https://acme.com");
        assert_eq!(page.text("Status"), "Queued");
        assert_eq!(page.text("Employees"), "120");
        assert_eq!(page.text("Missing"), "");
    }

    #[test]
    fn rich_text_write_shape() {
        let prop = Property::rich_text("widgets");
        let json = serde_json::to_value(&prop).unwrap();
        assert_eq!(json["type"], "rich_text");
        assert_eq!(json["rich_text"][0]["text"]["content"], "widgets");
    }
}
