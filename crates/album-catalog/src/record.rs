//! The catalog entry.

use serde::{Deserialize, Serialize};

/// A single album in the catalog.
///
/// `title` is the primary key; the store never holds two records with the
/// same title once an upload has gone through the duplicate check. `artist`
/// is a non-unique secondary key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Album title.
    pub title: String,
    /// Performing artist.
    pub artist: String,
    /// Non-negative price.
    pub price: f32,
}

impl Record {
    /// Create a new record.
    pub fn new(title: impl Into<String>, artist: impl Into<String>, price: f32) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            price,
        }
    }

    /// Whether every field holds its default value.
    ///
    /// A lookup miss is reported as an empty record on the wire, so callers
    /// use this to tell a miss from a hit.
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.artist.is_empty() && self.price == 0.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_record_is_empty() {
        assert!(Record::default().is_empty());
        assert!(!Record::new("Blue Train", "John Coltrane", 56.99).is_empty());
    }

    #[test]
    fn test_zero_priced_record_with_title_is_not_empty() {
        assert!(!Record::new("Free Jazz", "", 0.0).is_empty());
    }

    #[test]
    fn test_json_field_names() {
        let record = Record::new("Jeru", "Gerry Mulligan", 17.99);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["title"], "Jeru");
        assert_eq!(value["artist"], "Gerry Mulligan");
        assert!(value["price"].is_number());
    }
}
