//! Ranking score for cluster representatives.
//!
//! The score is a pure function of (representative, cluster size, distinct
//! category count, the declared `now`, settings): no clocks, no hidden
//! state, so a persisted breakdown is always reproducible from its inputs.
//! Every sub-term is rounded to six decimals before the total is formed and
//! `total = freshness + source + bonus - penalty` holds.

use chrono::{DateTime, Utc};
use common::EngineSettings;

use crate::models::{CandidateItem, ScoreBreakdown};
use crate::normalize::matches_keyword;

/// Freshness decay half-life.
pub const FRESHNESS_HALF_LIFE_HOURS: f64 = 20.0;
/// Beyond this age the freshness term bottoms out at zero.
pub const FRESHNESS_WINDOW_HOURS: f64 = 72.0;
/// A brand-new item contributes this much freshness.
pub const FRESHNESS_MAX: f64 = 2.0;

pub const CLICKBAIT_PENALTY: f64 = 1.1;
pub const HARD_NEWS_PENALTY: f64 = 0.5;
pub const SENSITIVE_PENALTY: f64 = 2.0;
pub const OVERHEATED_PENALTY: f64 = 0.7;
/// Flat bonus for sources trusted enough to carry weight >= the threshold.
pub const RELIABILITY_BONUS: f64 = 0.25;
pub const RELIABILITY_WEIGHT_THRESHOLD: f64 = 2.0;

/// Categories that count as lighter content and receive the entertainment
/// bonus.
pub const LIGHTER_CATEGORIES: &[&str] = &["entertainment", "lifestyle", "culture", "music", "gaming"];
/// Hard-news categories penalized when their category weight is not boosted
/// above 1.
pub const HARD_NEWS_CATEGORIES: &[&str] = &["politics", "world", "crime", "war", "disaster"];

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// Exponential decay from the resolved publication timestamp. Ages inside
/// the window halve the contribution every `FRESHNESS_HALF_LIFE_HOURS`;
/// anything older than the window scores zero. Future-dated items are
/// treated as brand new.
pub fn freshness_score(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = ((now - published_at).num_seconds() as f64 / 3600.0).max(0.0);
    if age_hours > FRESHNESS_WINDOW_HOURS {
        return 0.0;
    }
    FRESHNESS_MAX * 0.5f64.powf(age_hours / FRESHNESS_HALF_LIFE_HOURS)
}

/// Compute the additive score breakdown for one cluster representative.
/// `distinct_categories` is the number of distinct source categories among
/// this run's cluster representatives (the diversity denominator).
pub fn score_representative(
    rep: &CandidateItem,
    cluster_size: usize,
    distinct_categories: usize,
    now: DateTime<Utc>,
    settings: &EngineSettings,
) -> ScoreBreakdown {
    let category = rep.source_category.trim().to_lowercase();
    let category_weight = settings.category_weight(&category);

    let freshness = round6(freshness_score(rep.published_at, now));
    let source = round6(rep.source_weight.max(0.0) * category_weight);

    let mut bonus = (cluster_size.max(1) as f64).log2();
    bonus += 1.0 / distinct_categories.max(1) as f64;
    if LIGHTER_CATEGORIES.contains(&category.as_str()) {
        bonus += settings.entertainment_bonus;
    }
    if rep.source_weight >= RELIABILITY_WEIGHT_THRESHOLD {
        bonus += RELIABILITY_BONUS;
    }
    bonus += (category_weight - 1.0).max(0.0);
    let bonus = round6(bonus);

    let mut penalty = 0.0;
    if rep.clickbait {
        penalty += CLICKBAIT_PENALTY;
    }
    penalty += (1.0 - category_weight).max(0.0) * 0.6;
    if HARD_NEWS_CATEGORIES.contains(&category.as_str()) && category_weight <= 1.0 {
        penalty += HARD_NEWS_PENALTY;
    }
    if matches_keyword(&rep.title, &settings.sensitive_keywords) {
        penalty += SENSITIVE_PENALTY;
    }
    if matches_keyword(&rep.title, &settings.overheated_keywords) {
        penalty += OVERHEATED_PENALTY;
    }
    penalty += settings.duplicate_penalty;
    let penalty = round6(penalty);

    let total = round6(freshness + source + bonus - penalty);
    ScoreBreakdown {
        total,
        freshness,
        source,
        bonus,
        penalty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PublishedAtSource;
    use crate::normalize::{normalized_title_hash, title_token_set};
    use chrono::{Duration, TimeZone};

    fn rep(title: &str, category: &str, weight: f64, hours_ago: i64, clickbait: bool) -> CandidateItem {
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap();
        CandidateItem {
            source_id: 1,
            source_key: "feed_a".to_string(),
            source_weight: weight,
            source_category: category.to_string(),
            title: title.to_string(),
            url: "https://example.com/s".to_string(),
            summary: None,
            published_at: now - Duration::hours(hours_ago),
            published_at_source: PublishedAtSource::Rss,
            published_at_fallback: None,
            canonical_url: "https://example.com/s".to_string(),
            url_hash: "u".to_string(),
            normalized_hash: normalized_title_hash(title),
            title_tokens: title_token_set(title),
            clickbait,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap()
    }

    #[test]
    fn scoring_is_deterministic() {
        let settings = EngineSettings::default();
        let item = rep("Quiet market day in review", "business", 1.5, 6, false);
        let first = score_representative(&item, 3, 2, now(), &settings);
        let second = score_representative(&item, 3, 2, now(), &settings);
        assert_eq!(first, second);
    }

    #[test]
    fn freshness_decreases_with_age_and_zeroes_past_window() {
        let base = now();
        let fresh = freshness_score(base, base);
        let hour_old = freshness_score(base - Duration::hours(1), base);
        let day_old = freshness_score(base - Duration::hours(24), base);
        let half_life = freshness_score(base - Duration::hours(20), base);

        assert!((fresh - FRESHNESS_MAX).abs() < 1e-9);
        assert!(fresh > hour_old && hour_old > day_old);
        assert!((half_life - FRESHNESS_MAX / 2.0).abs() < 1e-9);
        assert_eq!(freshness_score(base - Duration::hours(73), base), 0.0);
        // Future-dated items count as brand new, not negative-aged.
        assert!((freshness_score(base + Duration::hours(5), base) - FRESHNESS_MAX).abs() < 1e-9);
    }

    #[test]
    fn breakdown_is_additive() {
        let settings = EngineSettings::default();
        let item = rep("A mildly interesting headline", "politics", 0.8, 30, true);
        let score = score_representative(&item, 2, 3, now(), &settings);
        let recomputed = score.freshness + score.source + score.bonus - score.penalty;
        assert!((score.total - recomputed).abs() < 1e-6);
    }

    #[test]
    fn clickbait_costs_exactly_the_flat_penalty() {
        let settings = EngineSettings::default();
        let plain = rep("Company X launches product", "technology", 1.0, 2, false);
        let baited = rep("Company X launches product", "technology", 1.0, 2, true);

        let plain_score = score_representative(&plain, 1, 1, now(), &settings);
        let baited_score = score_representative(&baited, 1, 1, now(), &settings);

        assert!((baited_score.penalty - plain_score.penalty - CLICKBAIT_PENALTY).abs() < 1e-6);
        assert!(baited_score.total < plain_score.total);
    }

    #[test]
    fn corroborated_clusters_score_higher() {
        let settings = EngineSettings::default();
        let item = rep("Company X launches product", "technology", 1.0, 2, false);
        let solo = score_representative(&item, 1, 1, now(), &settings);
        let pair = score_representative(&item, 2, 1, now(), &settings);
        let quad = score_representative(&item, 4, 1, now(), &settings);

        // log2 growth: +1 per doubling
        assert!((pair.bonus - solo.bonus - 1.0).abs() < 1e-6);
        assert!((quad.bonus - pair.bonus - 1.0).abs() < 1e-6);
    }

    #[test]
    fn diversity_bonus_shrinks_with_category_spread() {
        let settings = EngineSettings::default();
        let item = rep("Company X launches product", "technology", 1.0, 2, false);
        let narrow = score_representative(&item, 1, 1, now(), &settings);
        let wide = score_representative(&item, 1, 4, now(), &settings);
        assert!((narrow.bonus - wide.bonus - 0.75).abs() < 1e-6);
    }

    #[test]
    fn category_biases_apply() {
        let settings = EngineSettings::default();
        let lighter = rep("New album drops this weekend", "entertainment", 1.0, 2, false);
        let hard = rep("Parliament passes budget bill", "politics", 1.0, 2, false);

        let lighter_score = score_representative(&lighter, 1, 1, now(), &settings);
        let hard_score = score_representative(&hard, 1, 1, now(), &settings);

        // entertainment: bonus carries the flat entertainment bonus plus the
        // above-1 category weight surplus; no penalties
        assert!(lighter_score.bonus > hard_score.bonus);
        assert_eq!(lighter_score.penalty, 0.0);
        // politics (weight 0.8 <= 1): soft low-weight penalty + hard-news flat
        let expected = (1.0 - 0.8) * 0.6 + HARD_NEWS_PENALTY;
        assert!((hard_score.penalty - expected).abs() < 1e-6);
        assert!(lighter_score.total > hard_score.total);
    }

    #[test]
    fn keyword_penalties_stack() {
        let settings = EngineSettings::default();
        let calm = rep("Company X launches product", "technology", 1.0, 2, false);
        let heated = rep("Outrage as fans react", "technology", 1.0, 2, false);
        let grim = rep("Three killed in fatal crash", "technology", 1.0, 2, false);

        let calm_score = score_representative(&calm, 1, 1, now(), &settings);
        let heated_score = score_representative(&heated, 1, 1, now(), &settings);
        let grim_score = score_representative(&grim, 1, 1, now(), &settings);

        assert!((heated_score.penalty - calm_score.penalty - OVERHEATED_PENALTY).abs() < 1e-6);
        assert!((grim_score.penalty - calm_score.penalty - SENSITIVE_PENALTY).abs() < 1e-6);
    }

    #[test]
    fn reliability_bonus_requires_trusted_weight() {
        let settings = EngineSettings::default();
        let ordinary = rep("Company X launches product", "technology", 1.0, 2, false);
        let trusted = rep("Company X launches product", "technology", 2.0, 2, false);

        let ordinary_score = score_representative(&ordinary, 1, 1, now(), &settings);
        let trusted_score = score_representative(&trusted, 1, 1, now(), &settings);
        assert!((trusted_score.bonus - ordinary_score.bonus - RELIABILITY_BONUS).abs() < 1e-6);
    }

    #[test]
    fn negative_source_weight_contributes_nothing() {
        let settings = EngineSettings::default();
        let item = rep("Company X launches product", "technology", -3.0, 2, false);
        let score = score_representative(&item, 1, 1, now(), &settings);
        assert_eq!(score.source, 0.0);
    }
}
