//! Cap selection over the ranked representative list.

use std::collections::HashMap;

use crate::models::ScoredTrend;

/// Sort representatives by score descending, breaking ties toward the later
/// publication timestamp. This is the ranking the cap selector consumes.
pub fn rank_trends(mut trends: Vec<ScoredTrend>) -> Vec<ScoredTrend> {
    trends.sort_by(|a, b| {
        b.score
            .total
            .partial_cmp(&a.score.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.item.published_at.cmp(&a.item.published_at))
    });
    trends
}

#[derive(Debug)]
pub struct SelectionOutcome {
    pub selected: Vec<ScoredTrend>,
    pub dropped_total_cap: usize,
    pub dropped_source_cap: usize,
}

/// Truncate the ranked list under a global cap and a per-source cap without
/// reordering. The per-source counter only increments for items actually
/// selected, so a source's items queued behind its own cap never consume
/// total-cap budget.
pub fn select_top(
    ranked: Vec<ScoredTrend>,
    max_total: usize,
    max_per_source: usize,
) -> SelectionOutcome {
    let mut selected = Vec::new();
    let mut per_source: HashMap<String, usize> = HashMap::new();
    let mut dropped_total_cap = 0;
    let mut dropped_source_cap = 0;

    for trend in ranked {
        if selected.len() >= max_total {
            dropped_total_cap += 1;
            continue;
        }
        let count = per_source.entry(trend.item.source_key.clone()).or_insert(0);
        if *count >= max_per_source {
            dropped_source_cap += 1;
            continue;
        }
        *count += 1;
        selected.push(trend);
    }

    SelectionOutcome {
        selected,
        dropped_total_cap,
        dropped_source_cap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateItem, PublishedAtSource, ScoreBreakdown};
    use chrono::{Duration, TimeZone, Utc};

    fn trend(source_key: &str, total: f64, hours_ago: i64) -> ScoredTrend {
        let published_at =
            Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap() - Duration::hours(hours_ago);
        ScoredTrend {
            item: CandidateItem {
                source_id: 1,
                source_key: source_key.to_string(),
                source_weight: 1.0,
                source_category: "general".to_string(),
                title: format!("{} {}", source_key, total),
                url: "https://example.com/s".to_string(),
                summary: None,
                published_at,
                published_at_source: PublishedAtSource::Rss,
                published_at_fallback: None,
                canonical_url: "https://example.com/s".to_string(),
                url_hash: "u".to_string(),
                normalized_hash: "n".to_string(),
                title_tokens: Default::default(),
                clickbait: false,
            },
            cluster_key: "k".to_string(),
            cluster_size: 1,
            score: ScoreBreakdown {
                total,
                freshness: total,
                source: 0.0,
                bonus: 0.0,
                penalty: 0.0,
            },
        }
    }

    #[test]
    fn ranking_sorts_by_score_then_recency() {
        let ranked = rank_trends(vec![
            trend("a", 1.0, 10),
            trend("b", 3.0, 5),
            trend("c", 3.0, 1),
        ]);
        let order: Vec<&str> = ranked.iter().map(|t| t.item.source_key.as_str()).collect();
        // equal scores break toward the later timestamp
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn caps_are_both_enforced() {
        let ranked = vec![
            trend("a", 5.0, 1),
            trend("a", 4.0, 2),
            trend("a", 3.0, 3),
            trend("b", 2.0, 4),
            trend("b", 1.0, 5),
        ];
        let outcome = select_top(ranked, 3, 2);

        assert_eq!(outcome.selected.len(), 3);
        let from_a = outcome
            .selected
            .iter()
            .filter(|t| t.item.source_key == "a")
            .count();
        assert_eq!(from_a, 2);
        assert_eq!(outcome.dropped_source_cap, 1);
        assert_eq!(outcome.dropped_total_cap, 1);
    }

    #[test]
    fn output_is_an_order_preserving_subsequence() {
        let ranked = vec![
            trend("a", 5.0, 1),
            trend("b", 4.0, 2),
            trend("a", 3.0, 3),
            trend("c", 2.0, 4),
        ];
        let outcome = select_top(ranked, 10, 1);
        let totals: Vec<f64> = outcome.selected.iter().map(|t| t.score.total).collect();
        let mut sorted = totals.clone();
        sorted.sort_by(|x, y| y.partial_cmp(x).unwrap());
        assert_eq!(totals, sorted);
    }

    #[test]
    fn queued_items_behind_a_source_cap_do_not_eat_total_budget() {
        let ranked = vec![
            trend("a", 5.0, 1),
            trend("a", 4.0, 2),
            trend("b", 3.0, 3),
        ];
        let outcome = select_top(ranked, 2, 1);

        let keys: Vec<&str> = outcome
            .selected
            .iter()
            .map(|t| t.item.source_key.as_str())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(outcome.dropped_source_cap, 1);
        assert_eq!(outcome.dropped_total_cap, 0);
    }

    #[test]
    fn never_exceeds_either_cap() {
        let mut ranked = Vec::new();
        for i in 0..20 {
            ranked.push(trend(if i % 2 == 0 { "a" } else { "b" }, 20.0 - i as f64, i));
        }
        let outcome = select_top(ranked, 5, 2);
        assert!(outcome.selected.len() <= 5);
        for key in ["a", "b"] {
            assert!(
                outcome
                    .selected
                    .iter()
                    .filter(|t| t.item.source_key == key)
                    .count()
                    <= 2
            );
        }
    }
}
