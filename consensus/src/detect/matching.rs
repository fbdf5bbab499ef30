//! Cross-provider item identity
//!
//! Providers rarely spell the same line item the same way ("Gyp. Board
//! 5/8in" vs "5/8 gypsum board"), so grouping uses a normalized
//! edit-distance gate rather than exact key equality.

use crate::config::MatchingConfig;
use crate::types::TakeoffItem;

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable identity key: normalized name, category, normalized location.
pub fn item_key(item: &TakeoffItem) -> String {
    format!(
        "{}|{}|{}",
        normalize(&item.name),
        item.category,
        normalize(&item.location)
    )
}

/// Normalized Levenshtein similarity in `[0, 1]` after normalization.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a == b {
        return 1.0;
    }
    strsim::normalized_levenshtein(&a, &b)
}

/// Decides whether two items from different providers describe the same
/// entity.
#[derive(Debug, Clone)]
pub struct SimilarityGate {
    config: MatchingConfig,
}

impl SimilarityGate {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    /// Location must pass when both sides state one; then either the same
    /// category plus a similar name or description, or an identical
    /// normalized name across categories.
    pub fn same_entity(&self, a: &TakeoffItem, b: &TakeoffItem) -> bool {
        if !self.locations_compatible(a, b) {
            return false;
        }

        if a.category != b.category {
            let name = normalize(&a.name);
            return !name.is_empty() && name == normalize(&b.name);
        }

        if similarity(&a.name, &b.name) >= self.config.name_similarity {
            return true;
        }

        let has_descriptions =
            !normalize(&a.description).is_empty() && !normalize(&b.description).is_empty();
        has_descriptions
            && similarity(&a.description, &b.description) >= self.config.description_similarity
    }

    fn locations_compatible(&self, a: &TakeoffItem, b: &TakeoffItem) -> bool {
        let (la, lb) = (normalize(&a.location), normalize(&b.location));
        if la.is_empty() || lb.is_empty() {
            return true;
        }
        similarity(&la, &lb) >= self.config.location_similarity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Unit};

    fn gate() -> SimilarityGate {
        SimilarityGate::new(MatchingConfig::default())
    }

    #[test]
    fn test_normalize_collapses_case_and_punctuation() {
        assert_eq!(normalize("  Gyp. Board -- 5/8\" "), "gyp board 5 8");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_item_key_is_stable() {
        let a = TakeoffItem::new("Drywall ", 500.0, Unit::Sf, Category::Finishes)
            .with_location("Level 1");
        let b = TakeoffItem::new("drywall", 520.0, Unit::Sf, Category::Finishes)
            .with_location("level-1");
        assert_eq!(item_key(&a), item_key(&b));
        assert_eq!(item_key(&a), "drywall|finishes|level 1");
    }

    #[test]
    fn test_similar_names_match_within_category() {
        let a = TakeoffItem::new("Concrete Footing", 10.0, Unit::Cy, Category::Structural);
        let b = TakeoffItem::new("Concrete Footings", 11.0, Unit::Cy, Category::Structural);
        assert!(gate().same_entity(&a, &b));
    }

    #[test]
    fn test_description_rescues_divergent_names() {
        let a = TakeoffItem::new("GWB", 500.0, Unit::Sf, Category::Finishes)
            .with_description("5/8 type X gypsum board");
        let b = TakeoffItem::new("Wallboard", 500.0, Unit::Sf, Category::Finishes)
            .with_description("5/8in type X gypsum board");
        assert!(gate().same_entity(&a, &b));
    }

    #[test]
    fn test_dissimilar_locations_block_match() {
        let a = TakeoffItem::new("Door", 4.0, Unit::Ea, Category::Interior)
            .with_location("Level 1 Corridor");
        let b = TakeoffItem::new("Door", 4.0, Unit::Ea, Category::Interior)
            .with_location("Roof");
        assert!(!gate().same_entity(&a, &b));
    }

    #[test]
    fn test_cross_category_requires_identical_name() {
        let a = TakeoffItem::new("Sheathing", 100.0, Unit::Sf, Category::Exterior);
        let same = TakeoffItem::new("sheathing", 100.0, Unit::Sf, Category::Structural);
        let close = TakeoffItem::new("Sheathings", 100.0, Unit::Sf, Category::Structural);
        assert!(gate().same_entity(&a, &same));
        assert!(!gate().same_entity(&a, &close));
    }
}
