//! Schedule-to-drawing cross-reference reconciliation
//!
//! Each schedule record is counted against the drawing records that share
//! its cable tag, and the counts are mapped to a flag triple through two
//! first-match-wins tables: one for the cable tag itself, one per reference
//! side. Both tables end in catch-all rows, so every count combination is
//! flagged.

use std::collections::{BTreeMap, HashMap};

use log::{error, info};

use crate::drawing::{DrawingRecord, CABLE_TAG};
use crate::token::{field_text, ColorFlag, Token};

pub const FROM_REF: &str = "from_ref";
pub const TO_REF: &str = "to_ref";

/// One cable entry of the schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub sheet: u32,
    pub item: u32,
    pub cable_tag: String,
    pub from_ref: String,
    pub to_ref: String,
}

/// Strip the parentheses schedules wrap references in
pub fn normalize_ref(raw: &str) -> String {
    raw.replace(['(', ')'], "").trim().to_string()
}

/// Assemble one record per classified schedule item
///
/// Items are keyed by (sheet, item); the cable tag may be empty when only a
/// placeholder stands for it, which reconciles as not found.
pub fn schedule_records(schedule: &[Token]) -> Vec<ScheduleRecord> {
    let mut keys: Vec<(u32, u32)> = schedule
        .iter()
        .filter(|t| t.item > 0 && t.tag.is_some())
        .map(|t| (t.sheet, t.item))
        .collect();
    keys.sort_unstable();
    keys.dedup();

    keys.into_iter()
        .map(|(sheet, item)| ScheduleRecord {
            sheet,
            item,
            cable_tag: field_text(schedule, sheet, item, CABLE_TAG),
            from_ref: normalize_ref(&field_text(schedule, sheet, item, FROM_REF)),
            to_ref: normalize_ref(&field_text(schedule, sheet, item, TO_REF)),
        })
        .collect()
}

/// Raw counts for one schedule record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchCounts {
    /// Drawing records sharing the cable tag
    pub matches: usize,
    /// Of those, records on the sheet named by the from reference
    pub from: usize,
    /// Of those, records on the sheet named by the to reference
    pub to: usize,
}

impl MatchCounts {
    pub fn count(record: &ScheduleRecord, drawings: &[DrawingRecord]) -> Self {
        let mut counts = MatchCounts::default();
        if record.cable_tag.is_empty() {
            return counts;
        }
        for d in drawings.iter().filter(|d| d.cable_tag == record.cable_tag) {
            counts.matches += 1;
            if !record.from_ref.is_empty() && d.drawing_ref == record.from_ref {
                counts.from += 1;
            }
            if !record.to_ref.is_empty() && d.drawing_ref == record.to_ref {
                counts.to += 1;
            }
        }
        counts
    }
}

/// Flags for the cable tag and both reference sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagTriple {
    pub cable: ColorFlag,
    pub from: ColorFlag,
    pub to: ColorFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchBand {
    None,
    /// One or two drawing records
    Few,
    /// More than two
    Several,
}

impl MatchBand {
    fn of(matches: usize) -> Self {
        match matches {
            0 => MatchBand::None,
            1 | 2 => MatchBand::Few,
            _ => MatchBand::Several,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefCount {
    Zero,
    One,
    Many,
}

impl RefCount {
    fn of(count: usize) -> Self {
        match count {
            0 => RefCount::Zero,
            1 => RefCount::One,
            _ => RefCount::Many,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pattern<T> {
    Any,
    Is(T),
}

impl<T: PartialEq> Pattern<T> {
    fn accepts(&self, value: &T) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Is(expected) => expected == value,
        }
    }
}

struct CableRule {
    matches: Pattern<MatchBand>,
    from: Pattern<RefCount>,
    to: Pattern<RefCount>,
    flag: ColorFlag,
}

struct SideRule {
    matches: Pattern<MatchBand>,
    count: Pattern<RefCount>,
    flag: ColorFlag,
}

use MatchBand::{Few, Several};
use Pattern::{Any, Is};
use RefCount::{Many, One, Zero};

const fn cable(
    matches: Pattern<MatchBand>,
    from: Pattern<RefCount>,
    to: Pattern<RefCount>,
    flag: ColorFlag,
) -> CableRule {
    CableRule {
        matches,
        from,
        to,
        flag,
    }
}

/// Cable-tag flag, first matching row wins
const CABLE_RULES: &[CableRule] = &[
    cable(Is(MatchBand::None), Any, Any, ColorFlag::NotFound),
    // One or two hits: only a lopsided duplicate is ambiguous
    cable(Is(Few), Is(Many), Is(Zero), ColorFlag::Ambiguous),
    cable(Is(Few), Is(Zero), Is(Many), ColorFlag::Ambiguous),
    cable(Is(Few), Any, Any, ColorFlag::Matched),
    // More than two hits: any duplicate, or no side located, is ambiguous
    cable(Is(Several), Is(Zero), Is(Zero), ColorFlag::Ambiguous),
    cable(Is(Several), Is(Many), Any, ColorFlag::Ambiguous),
    cable(Is(Several), Any, Is(Many), ColorFlag::Ambiguous),
    cable(Is(Several), Any, Any, ColorFlag::Matched),
];

/// Per-side reference flag, first matching row wins
const SIDE_RULES: &[SideRule] = &[
    SideRule {
        matches: Is(MatchBand::None),
        count: Any,
        flag: ColorFlag::NotFound,
    },
    SideRule {
        matches: Any,
        count: Is(Zero),
        flag: ColorFlag::Missing,
    },
    SideRule {
        matches: Any,
        count: Is(One),
        flag: ColorFlag::Matched,
    },
    SideRule {
        matches: Any,
        count: Is(Many),
        flag: ColorFlag::Ambiguous,
    },
];

fn side_flag(band: MatchBand, count: RefCount) -> Option<ColorFlag> {
    SIDE_RULES
        .iter()
        .find(|r| r.matches.accepts(&band) && r.count.accepts(&count))
        .map(|r| r.flag)
}

/// Table lookup; `None` only if the tables stopped being total
pub fn lookup(counts: MatchCounts) -> Option<FlagTriple> {
    let band = MatchBand::of(counts.matches);
    let from = RefCount::of(counts.from);
    let to = RefCount::of(counts.to);

    let cable = CABLE_RULES
        .iter()
        .find(|r| r.matches.accepts(&band) && r.from.accepts(&from) && r.to.accepts(&to))
        .map(|r| r.flag)?;

    Some(FlagTriple {
        cable,
        from: side_flag(band, from)?,
        to: side_flag(band, to)?,
    })
}

/// Flag triple for a set of counts
pub fn decide(counts: MatchCounts) -> FlagTriple {
    lookup(counts).unwrap_or_else(|| {
        error!("no reconciliation rule for {:?}", counts);
        FlagTriple {
            cable: ColorFlag::Ambiguous,
            from: ColorFlag::Ambiguous,
            to: ColorFlag::Ambiguous,
        }
    })
}

/// Outcome for one schedule record
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub record: ScheduleRecord,
    pub counts: MatchCounts,
    pub flags: FlagTriple,
}

/// Result of a reconciliation run
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub results: Vec<Reconciliation>,
    /// Drawing cable tags that appear on more than one schedule record
    pub duplicate_schedule_tags: usize,
}

impl ReconcileOutcome {
    /// Number of records whose cable flag equals `flag`
    pub fn count_cable(&self, flag: ColorFlag) -> usize {
        self.results.iter().filter(|r| r.flags.cable == flag).count()
    }
}

/// Reconcile schedule records against drawing records and write the flags back
///
/// All previous flags on both token sets are cleared first. On the schedule,
/// `cable_tag`, `from_ref` and `to_ref` tokens of each item receive the
/// corresponding flag. On the drawings, each cable tag is `Matched` when one
/// schedule record carries it and `Ambiguous` when the schedule repeats it.
pub fn reconcile(
    schedule: &mut [Token],
    drawing: &mut [Token],
    drawings: &[DrawingRecord],
) -> ReconcileOutcome {
    let records = schedule_records(schedule);

    let results: Vec<Reconciliation> = records
        .into_iter()
        .map(|record| {
            let counts = MatchCounts::count(&record, drawings);
            Reconciliation {
                flags: decide(counts),
                counts,
                record,
            }
        })
        .collect();

    let by_item: HashMap<(u32, u32), FlagTriple> = results
        .iter()
        .map(|r| ((r.record.sheet, r.record.item), r.flags))
        .collect();

    for token in schedule.iter_mut() {
        token.color = ColorFlag::Unset;
        let Some(flags) = by_item.get(&(token.sheet, token.item)) else {
            continue;
        };
        token.color = match token.tag.as_deref() {
            Some(CABLE_TAG) => flags.cable,
            Some(FROM_REF) => flags.from,
            Some(TO_REF) => flags.to,
            _ => ColorFlag::Unset,
        };
    }

    let mut schedule_uses: BTreeMap<&str, usize> = BTreeMap::new();
    for r in results.iter().filter(|r| !r.record.cable_tag.is_empty()) {
        *schedule_uses.entry(r.record.cable_tag.as_str()).or_insert(0) += 1;
    }
    let duplicate_schedule_tags = schedule_uses.values().filter(|&&n| n > 1).count();

    for token in drawing.iter_mut() {
        token.color = ColorFlag::Unset;
        if !token.has_tag(CABLE_TAG) {
            continue;
        }
        token.color = match schedule_uses.get(token.text.trim()) {
            Some(1) => ColorFlag::Matched,
            Some(_) => ColorFlag::Ambiguous,
            None => ColorFlag::Unset,
        };
    }

    let outcome = ReconcileOutcome {
        results,
        duplicate_schedule_tags,
    };
    info!(
        "reconciled {} schedule records: {} matched, {} not found, {} ambiguous",
        outcome.results.len(),
        outcome.count_cable(ColorFlag::Matched),
        outcome.count_cable(ColorFlag::NotFound),
        outcome.count_cable(ColorFlag::Ambiguous)
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::BBox;

    fn record(tag: &str, from: &str, to: &str) -> ScheduleRecord {
        ScheduleRecord {
            sheet: 1,
            item: 1,
            cable_tag: tag.to_string(),
            from_ref: from.to_string(),
            to_ref: to.to_string(),
        }
    }

    fn dwg(tag: &str, drawing_ref: &str) -> DrawingRecord {
        DrawingRecord {
            sheet: 1,
            cable_tag: tag.to_string(),
            drawing_ref: drawing_ref.to_string(),
        }
    }

    fn triple(cable: ColorFlag, from: ColorFlag, to: ColorFlag) -> FlagTriple {
        FlagTriple { cable, from, to }
    }

    fn counts(matches: usize, from: usize, to: usize) -> MatchCounts {
        MatchCounts { matches, from, to }
    }

    use ColorFlag::{Ambiguous, Matched, Missing, NotFound};

    #[test]
    fn test_single_match_on_from_side() {
        let r = record("C-101", "A1", "B2");
        let c = MatchCounts::count(&r, &[dwg("C-101", "A1")]);
        assert_eq!(c, counts(1, 1, 0));
        assert_eq!(decide(c), triple(Matched, Matched, Missing));
    }

    #[test]
    fn test_unknown_tag_is_not_found() {
        let r = record("C-999", "A1", "B2");
        let c = MatchCounts::count(&r, &[dwg("C-101", "A1")]);
        assert_eq!(decide(c), triple(NotFound, NotFound, NotFound));
    }

    #[test]
    fn test_both_sides_located() {
        let r = record("C-5", "A1", "B1");
        let c = MatchCounts::count(&r, &[dwg("C-5", "A1"), dwg("C-5", "B1")]);
        assert_eq!(decide(c), triple(Matched, Matched, Matched));
    }

    #[test]
    fn test_few_match_rows() {
        assert_eq!(decide(counts(1, 0, 1)), triple(Matched, Missing, Matched));
        assert_eq!(decide(counts(2, 0, 0)), triple(Matched, Missing, Missing));
        assert_eq!(decide(counts(2, 2, 0)), triple(Ambiguous, Ambiguous, Missing));
        assert_eq!(decide(counts(2, 0, 2)), triple(Ambiguous, Missing, Ambiguous));
        // Both sides doubled only happens when from and to name the same sheet
        assert_eq!(decide(counts(2, 2, 2)), triple(Matched, Ambiguous, Ambiguous));
    }

    #[test]
    fn test_several_match_rows() {
        assert_eq!(decide(counts(3, 0, 0)), triple(Ambiguous, Missing, Missing));
        assert_eq!(decide(counts(3, 1, 1)), triple(Matched, Matched, Matched));
        assert_eq!(decide(counts(3, 1, 0)), triple(Matched, Matched, Missing));
        assert_eq!(decide(counts(4, 2, 1)), triple(Ambiguous, Ambiguous, Matched));
        assert_eq!(decide(counts(5, 1, 3)), triple(Ambiguous, Matched, Ambiguous));
    }

    #[test]
    fn test_table_is_total() {
        for matches in [0, 1, 2, 3, 7] {
            for from in [0, 1, 2, 5] {
                for to in [0, 1, 2, 5] {
                    let c = counts(matches, from, to);
                    assert!(lookup(c).is_some(), "no rule for {:?}", c);
                    if matches == 0 {
                        assert_eq!(decide(c), triple(NotFound, NotFound, NotFound));
                    }
                }
            }
        }
    }

    #[test]
    fn test_normalize_ref() {
        assert_eq!(normalize_ref(" (E-100-1) "), "E-100-1");
        assert_eq!(normalize_ref(""), "");
    }

    #[test]
    fn test_empty_refs_never_count() {
        let r = record("C-1", "", "");
        let c = MatchCounts::count(&r, &[dwg("C-1", "")]);
        assert_eq!(c, counts(1, 0, 0));
    }

    fn tok(text: &str, tag: &str, item: u32) -> Token {
        let mut t = Token::new(text, BBox::new(0.0, 0.0, 10.0, 6.0), 1);
        t.tag = Some(tag.to_string());
        t.item = item;
        t
    }

    #[test]
    fn test_flags_written_back() {
        let mut schedule = vec![
            tok("C-1", CABLE_TAG, 1),
            tok("(A1)", FROM_REF, 1),
            tok("(B2)", TO_REF, 1),
            tok("MCC", "from_desc", 1),
            tok("C-1", CABLE_TAG, 2),
        ];
        let mut drawing = vec![tok("C-1", CABLE_TAG, 0), tok("E", "dwg_size", 1)];
        let records = vec![dwg("C-1", "A1")];

        let outcome = reconcile(&mut schedule, &mut drawing, &records);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.duplicate_schedule_tags, 1);
        assert_eq!(schedule[0].color, Matched);
        assert_eq!(schedule[1].color, Matched);
        assert_eq!(schedule[2].color, Missing);
        assert_eq!(schedule[3].color, ColorFlag::Unset);
        assert_eq!(drawing[0].color, Ambiguous);
        assert_eq!(drawing[1].color, ColorFlag::Unset);
    }
}
