//! Placeholder synthesis for required fields the extraction did not find
//!
//! Every required field of an item gets a drawable location, so the overlay
//! can highlight "field missing" even when there is no text to highlight.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::classify::{Anchor, ItemObservation};
use crate::template::{PlaceholderRule, Template};
use crate::token::{BBox, Token};

/// Box of a placeholder, a pure function of the item origin and the field
pub fn placeholder_bbox(template: &Template, origin: Anchor, rule: &PlaceholderRule) -> BBox {
    let x1 = origin.x + rule.dx;
    let y1 = origin.y - template.line_drop(rule.line);
    BBox::new(x1, y1, x1 + rule.width, y1 + template.row_height)
}

/// Placeholders for every required field not yet represented in its item
///
/// A field counts as represented when the classifier observed it or when any
/// token of the item (real or an earlier placeholder) already carries the
/// tag, so calling this on its own output adds nothing. Items in which the
/// classifier recognised no field at all are not records and are skipped.
pub fn synthesize_missing(
    tokens: &[Token],
    items: &[ItemObservation],
    template: &Template,
) -> Vec<Token> {
    let mut represented: HashMap<(u32, u32), BTreeSet<&str>> = HashMap::new();
    for token in tokens {
        if let Some(tag) = token.tag.as_deref() {
            represented
                .entry((token.sheet, token.item))
                .or_default()
                .insert(tag);
        }
    }

    let mut placeholders = Vec::new();
    for obs in items.iter().filter(|obs| !obs.tags.is_empty()) {
        let present = represented.get(&(obs.sheet, obs.item));
        for rule in &template.placeholders {
            let tag = rule.tag.as_str();
            let seen = obs.tags.contains(tag) || present.is_some_and(|set| set.contains(tag));
            if seen {
                continue;
            }
            placeholders.push(Token::placeholder(
                tag,
                placeholder_bbox(template, obs.origin, rule),
                obs.sheet,
                obs.item,
            ));
        }
    }

    debug!(
        "{}: {} placeholders for {} items",
        template.name,
        placeholders.len(),
        items.len()
    );
    placeholders
}

/// Append the missing placeholders to `tokens`, returning how many were added
pub fn fill_missing(tokens: &mut Vec<Token>, items: &[ItemObservation], template: &Template) -> usize {
    let placeholders = synthesize_missing(tokens, items, template);
    let added = placeholders.len();
    tokens.extend(placeholders);
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_tokens;

    fn observation(tags: &[&str]) -> ItemObservation {
        ItemObservation {
            sheet: 1,
            item: 3,
            origin: Anchor { x: 30.0, y: 400.0 },
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_missing_fields_get_placeholders() {
        let template = Template::schedule();
        let items = vec![observation(&["cable_tag", "from_ref"])];
        let placeholders = synthesize_missing(&[], &items, &template);

        assert_eq!(placeholders.len(), 9);
        assert!(placeholders.iter().all(|p| p.text.is_empty()));
        assert!(placeholders.iter().all(|p| p.sheet == 1 && p.item == 3));
        assert!(!placeholders.iter().any(|p| p.has_tag("cable_tag")));

        let to_ref = placeholders.iter().find(|p| p.has_tag("to_ref")).unwrap();
        assert_eq!(to_ref.bbox, BBox::new(277.0, 388.0, 317.0, 388.0 + 5.77));
        let size = placeholders.iter().find(|p| p.has_tag("size")).unwrap();
        assert_eq!(size.bbox.x1, 546.0);
        assert_eq!(size.bbox.width(), 10.0);
    }

    #[test]
    fn test_coordinates_repeat_across_runs() {
        let template = Template::schedule();
        let items = vec![observation(&["cable_tag", "to_desc"])];
        let first = synthesize_missing(&[], &items, &template);
        let second = synthesize_missing(&[], &items, &template);
        assert_eq!(first, second);
    }

    #[test]
    fn test_second_pass_adds_nothing() {
        let template = Template::schedule();
        let items = vec![observation(&["cable_tag"])];
        let mut tokens = Vec::new();
        assert_eq!(fill_missing(&mut tokens, &items, &template), 10);
        assert_eq!(fill_missing(&mut tokens, &items, &template), 0);
        assert_eq!(tokens.len(), 10);
    }

    #[test]
    fn test_item_without_fields_is_skipped() {
        let template = Template::schedule();
        let items = vec![observation(&[])];
        assert!(synthesize_missing(&[], &items, &template).is_empty());
    }

    #[test]
    fn test_reclassify_then_resynthesize_is_stable() {
        let template = Template::schedule();
        let mut tokens = vec![
            Token::new("HDR", BBox::new(30.0, 600.0, 60.0, 606.0), 1),
            Token::new("C-9", BBox::new(30.0, 500.0, 60.0, 506.0), 1),
            Token::new("(A1)", BBox::new(150.0, 488.0, 170.0, 494.0), 1),
        ];
        let outcome = classify_tokens(&mut tokens, &template);
        assert_eq!(fill_missing(&mut tokens, &outcome.items, &template), 9);
        let snapshot = tokens.clone();

        let outcome = classify_tokens(&mut tokens, &template);
        assert_eq!(fill_missing(&mut tokens, &outcome.items, &template), 0);
        assert_eq!(tokens, snapshot);
    }
}
