//! A typed view of what our OCR backend extracts from a business card.
//!
//! The relay never looks inside a successful response. This is only used for
//! printing a short summary and for publishing a schema.

use schemars::JsonSchema;

use crate::prelude::*;

/// Contact details extracted from a business card.
///
/// Every field is optional on the wire. Missing strings become `""`.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct BusinessCard {
    pub company: String,
    pub name: String,
    pub title: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub website: String,

    /// Where the details were cross-checked, usually a URL.
    pub validation_source: String,

    /// Did the backend confirm the details against a web search?
    pub is_validated: bool,

    pub about_the_company: String,
    pub location: String,
}

impl BusinessCard {
    /// Read a card out of a success payload. Unknown fields are ignored, and
    /// fields of the wrong type are treated as missing.
    pub fn from_data(data: &Value) -> Option<BusinessCard> {
        let object = data.as_object()?;
        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_owned()
        };
        Some(BusinessCard {
            company: text("company"),
            name: text("name"),
            title: text("title"),
            phone: text("phone"),
            email: text("email"),
            address: text("address"),
            website: text("website"),
            validation_source: text("validation_source"),
            is_validated: object
                .get("is_validated")
                .and_then(Value::as_bool)
                .unwrap_or_default(),
            about_the_company: text("about_the_company"),
            location: text("location"),
        })
    }

    /// A one-line summary like `"Ada Lovelace, Analyst at Engines Ltd"`.
    pub fn summary(&self) -> String {
        let who = [self.name.as_str(), self.title.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        let mut summary = match (who.is_empty(), self.company.is_empty()) {
            (true, true) => "No contact details found".to_owned(),
            (true, false) => self.company.clone(),
            (false, true) => who,
            (false, false) => format!("{who} at {}", self.company),
        };
        if self.is_validated {
            summary.push_str(" (validated)");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_data() {
        let card = BusinessCard::from_data(&json!({
            "company": "Engines Ltd",
            "name": " Ada Lovelace ",
            "title": 42,
            "is_validated": true,
            "extra": "ignored",
        }))
        .unwrap();
        assert_eq!(card.company, "Engines Ltd");
        assert_eq!(card.name, "Ada Lovelace");
        assert_eq!(card.title, "");
        assert!(card.is_validated);

        assert!(BusinessCard::from_data(&json!(["not", "a", "card"])).is_none());
    }

    #[test]
    fn test_summary() {
        let mut card = BusinessCard::default();
        assert_eq!(card.summary(), "No contact details found");

        card.company = "Engines Ltd".to_owned();
        assert_eq!(card.summary(), "Engines Ltd");

        card.name = "Ada Lovelace".to_owned();
        card.title = "Analyst".to_owned();
        card.is_validated = true;
        assert_eq!(card.summary(), "Ada Lovelace, Analyst at Engines Ltd (validated)");
    }
}
