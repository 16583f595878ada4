//! Rule-based activity parser used when no AI provider is usable.
//!
//! Deliberately simple keyword heuristics: pick a category from known
//! vocabulary, lift a location from "in/at <place>" phrasing, and keep the
//! original text as notes. The point is a sane structured draft instead of
//! a failed request, not clever NLP.

use crate::model::ActivityDraft;

/// Category vocabulary, first match wins.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "maintenance",
        &[
            "leak", "broken", "repair", "pipe", "light", "door", "window", "boiler", "heating",
            "maintenance",
        ],
    ),
    (
        "security",
        &["intruder", "theft", "stolen", "fight", "gate", "alarm", "security", "suspicious"],
    ),
    (
        "cleaning",
        &["spill", "dirty", "trash", "garbage", "mess", "cleaning", "clean"],
    ),
    (
        "it",
        &["computer", "laptop", "projector", "wifi", "network", "printer", "screen"],
    ),
    (
        "medical",
        &["injury", "injured", "hurt", "sick", "nurse", "bleeding", "fell"],
    ),
];

const DEFAULT_CATEGORY: &str = "general";

/// Words following a location preposition that end the location phrase.
const LOCATION_STOP_WORDS: &[&str] = &["is", "was", "has", "and", "but", "the"];

fn guess_category(lower: &str) -> (String, Option<String>) {
    for (category, keywords) in CATEGORY_KEYWORDS {
        if let Some(keyword) = keywords.iter().find(|k| lower.contains(**k)) {
            // The matched keyword doubles as a subcategory hint unless it is
            // just the category name itself.
            let subcategory = if keyword == category {
                None
            } else {
                Some(keyword.to_string())
            };
            return (category.to_string(), subcategory);
        }
    }
    (DEFAULT_CATEGORY.to_string(), None)
}

/// Take up to three words following "in"/"at" as the location.
fn guess_location(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        let lower = word.to_ascii_lowercase();
        if lower != "in" && lower != "at" {
            continue;
        }
        let mut phrase: Vec<&str> = Vec::new();
        for next in words[i + 1..].iter().take(3) {
            let trimmed = next.trim_end_matches(['.', ',', '!', '?']);
            if LOCATION_STOP_WORDS.contains(&trimmed.to_ascii_lowercase().as_str()) {
                break;
            }
            phrase.push(trimmed);
            // Trailing punctuation ends the phrase.
            if trimmed.len() != next.len() {
                break;
            }
        }
        if !phrase.is_empty() {
            return Some(phrase.join(" "));
        }
    }
    None
}

/// Turn free text into a structured draft without any AI involvement.
pub fn parse_activity_text(text: &str) -> ActivityDraft {
    let lower = text.to_ascii_lowercase();
    let (category, subcategory) = guess_category(&lower);

    ActivityDraft {
        category,
        subcategory,
        location: guess_location(text),
        notes: Some(text.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maintenance_with_location() {
        let draft = parse_activity_text("Water leak in Room 4, floor is wet");
        assert_eq!(draft.category, "maintenance");
        assert_eq!(draft.subcategory.as_deref(), Some("leak"));
        assert_eq!(draft.location.as_deref(), Some("Room 4"));
        assert!(draft.notes.unwrap().contains("Water leak"));
    }

    #[test]
    fn test_security_category() {
        let draft = parse_activity_text("Suspicious person at the west gate");
        assert_eq!(draft.category, "security");
    }

    #[test]
    fn test_unknown_text_gets_default_category() {
        let draft = parse_activity_text("Something odd happened today");
        assert_eq!(draft.category, "general");
        assert!(draft.subcategory.is_none());
    }

    #[test]
    fn test_location_stops_at_verb() {
        let draft = parse_activity_text("Projector in lab two is not working");
        assert_eq!(draft.category, "it");
        assert_eq!(draft.location.as_deref(), Some("lab two"));
    }

    #[test]
    fn test_no_location() {
        let draft = parse_activity_text("Broken window reported");
        assert_eq!(draft.category, "maintenance");
        assert!(draft.location.is_none());
    }

    #[test]
    fn test_notes_preserve_original_text() {
        let text = "Spill near the cafeteria entrance";
        let draft = parse_activity_text(text);
        assert_eq!(draft.notes.as_deref(), Some(text));
    }
}
