//! Markdown itinerary export of a recommendation.

use std::fmt::Write as _;

use chrono::DateTime;

use crate::interests::InterestSet;
use crate::model::RecommendationResult;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Renders `result` as a markdown itinerary: one section per item with its
/// time, location and tags, in ranked order.
pub fn render_markdown(interests: &InterestSet, result: &RecommendationResult) -> String {
    let mut out = String::from("# Event Itinerary\n");
    let _ = writeln!(
        out,
        "\n**Recommended for:** {}\n",
        interests.iter().collect::<Vec<_>>().join(", ")
    );
    if result.conflict_count > 0 {
        let _ = writeln!(out, "**Time-slot conflicts:** {}\n", result.conflict_count);
    }

    for scored in &result.items {
        let item = &scored.item;
        let _ = writeln!(out, "## {}", item.title);
        let _ = writeln!(
            out,
            "\nTime: {} - {} | Location: {}",
            format_slot(item.start),
            format_slot(item.end),
            item.location.as_deref().unwrap_or("?")
        );
        if item.tags.is_empty() {
            out.push('\n');
        } else {
            let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
            let _ = writeln!(out, "Tags: {}\n", tags.join(", "));
        }
    }
    out
}

/// Catalog slots under a day are minutes since midnight; anything larger is
/// unix seconds.
pub fn format_slot(v: i64) -> String {
    if (0..MINUTES_PER_DAY).contains(&v) {
        return format!("{:02}:{:02}", v / 60, v % 60);
    }
    match DateTime::from_timestamp(v, 0) {
        Some(dt) if v > 0 => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        _ => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Item, ScoreBreakdown, ScoredItem};

    fn scored(item: Item) -> ScoredItem {
        ScoredItem {
            item,
            breakdown: ScoreBreakdown::new(0.0, 0.0, 0.0),
        }
    }

    #[test]
    fn renders_sections_in_ranked_order() {
        let interests = InterestSet::parse("AI; safety", 5).unwrap();
        let result = RecommendationResult {
            items: vec![
                scored(
                    Item::new("s2", "AI Safety", 540, 600)
                        .with_tags(["safety", "ai"])
                        .with_location("Room A"),
                ),
                scored(Item::new("s1", "Intro", 540, 600)),
            ],
            conflict_count: 1,
        };

        let md = render_markdown(&interests, &result);
        assert!(md.starts_with("# Event Itinerary\n\n**Recommended for:** ai, safety\n"));
        assert!(md.contains("**Time-slot conflicts:** 1"));
        assert!(md.contains("## AI Safety\n\nTime: 09:00 - 10:00 | Location: Room A\nTags: ai, safety\n"));
        assert!(md.contains("## Intro\n\nTime: 09:00 - 10:00 | Location: ?\n"));
        assert!(md.find("## AI Safety").unwrap() < md.find("## Intro").unwrap());
    }

    #[test]
    fn empty_result_is_just_the_header() {
        let interests = InterestSet::parse("rust", 5).unwrap();
        let md = render_markdown(
            &interests,
            &RecommendationResult {
                items: Vec::new(),
                conflict_count: 0,
            },
        );
        assert_eq!(md, "# Event Itinerary\n\n**Recommended for:** rust\n\n");
    }

    #[test]
    fn slots_format_as_clock_time_or_utc_datetime() {
        assert_eq!(format_slot(0), "00:00");
        assert_eq!(format_slot(615), "10:15");
        assert_eq!(format_slot(1_714_554_000), "2024-05-01 09:00 UTC");
        assert_eq!(format_slot(-5), "-5");
    }
}
