//! Diversity-aware candidate selection
//!
//! Greedy round-robin picks across four dimensions (venue, publication
//! era, topic bucket, first-author initial) with per-pick preference for
//! higher relevance, then a relevance fill for the remainder. The split
//! between diversity picks and relevance fill follows the configured
//! diversity level. Selection is deterministic, stable for stable inputs,
//! and idempotent on its own output.

use paperscout_common::models::{ranking_order, DiscoveredPaper, DiversityLevel};
use std::collections::HashSet;

/// Selection runs only above this input size
pub const DIVERSITY_MIN_INPUT: usize = 20;

#[derive(Clone, Copy)]
enum Dimension {
    Venue,
    Era,
    Topic,
    AuthorInitial,
}

const DIMENSIONS: [Dimension; 4] = [
    Dimension::Venue,
    Dimension::Era,
    Dimension::Topic,
    Dimension::AuthorInitial,
];

fn era_bucket(paper: &DiscoveredPaper) -> &'static str {
    match paper.published_date.map(|d| chrono::Datelike::year(&d)) {
        Some(year) if year >= 2020 => "2020s",
        Some(year) if year >= 2015 => "2015-19",
        Some(year) if year >= 2010 => "2010-14",
        Some(_) => "pre-2010",
        None => "unknown",
    }
}

fn dimension_value(paper: &DiscoveredPaper, dimension: Dimension) -> String {
    match dimension {
        Dimension::Venue => paper
            .venue
            .as_deref()
            .map(|v| v.to_lowercase())
            .unwrap_or_else(|| "unknown".to_string()),
        Dimension::Era => era_bucket(paper).to_string(),
        Dimension::Topic => paper
            .research_topics
            .first()
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| "unknown".to_string()),
        Dimension::AuthorInitial => paper
            .authors
            .first()
            .and_then(|name| name.trim().chars().next())
            .map(|c| c.to_lowercase().to_string())
            .unwrap_or_else(|| "?".to_string()),
    }
}

/// Pick up to `max_total` papers from a relevance-ranked list.
///
/// Inputs of `DIVERSITY_MIN_INPUT` or fewer, or that already fit
/// `max_total`, pass through untouched (this is what makes the step
/// idempotent on its own output). The result is re-ranked by relevance.
pub fn diversify(
    papers: Vec<DiscoveredPaper>,
    level: DiversityLevel,
    max_total: usize,
) -> Vec<DiscoveredPaper> {
    if papers.len() <= DIVERSITY_MIN_INPUT || papers.len() <= max_total {
        return papers;
    }

    let pool_len = ((papers.len() as f64 * level.pool_fraction()).ceil() as usize)
        .clamp(1, papers.len());
    let diversity_target =
        ((max_total as f64 * level.diversity_share()).round() as usize).min(max_total);

    let mut picked = vec![false; papers.len()];
    let mut picked_count = 0usize;
    let mut seen: [HashSet<String>; 4] = Default::default();

    // Round-robin over the dimensions inside the eligible pool
    'outer: while picked_count < diversity_target {
        let mut progressed = false;
        for (dim_index, dimension) in DIMENSIONS.iter().enumerate() {
            if picked_count >= diversity_target {
                break 'outer;
            }
            // Highest-relevance unpicked candidate with a novel value on
            // this dimension; the pool is already relevance-ranked
            let next = papers[..pool_len].iter().enumerate().find(|(i, paper)| {
                !picked[*i] && !seen[dim_index].contains(&dimension_value(paper, *dimension))
            });
            if let Some((index, paper)) = next {
                picked[index] = true;
                picked_count += 1;
                for (d, dimension) in DIMENSIONS.iter().enumerate() {
                    seen[d].insert(dimension_value(paper, *dimension));
                }
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    // Fill the remainder strictly by relevance, across the whole list
    for index in 0..papers.len() {
        if picked_count >= max_total {
            break;
        }
        if !picked[index] {
            picked[index] = true;
            picked_count += 1;
        }
    }

    let mut selected: Vec<DiscoveredPaper> = papers
        .into_iter()
        .enumerate()
        .filter_map(|(index, paper)| picked[index].then_some(paper))
        .collect();
    selected.sort_by(ranking_order);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use paperscout_common::models::{DiscoverySource, RelationshipType};

    fn candidate(title: &str, score: f64, venue: &str, year: i32) -> DiscoveredPaper {
        let mut paper = DiscoveredPaper::new(
            DiscoverySource::Crossref,
            RelationshipType::Topic,
            title.to_string(),
        );
        paper.relevance_score = score;
        paper.venue = Some(venue.to_string());
        paper.published_date = NaiveDate::from_ymd_opt(year, 1, 1);
        paper.authors = vec![format!("{} Author", title)];
        paper.research_topics = vec![venue.to_string()];
        paper
    }

    fn ranked_set(count: usize) -> Vec<DiscoveredPaper> {
        // Many candidates share venue "Common"; a few sit in distinct venues
        (0..count)
            .map(|i| {
                let venue = if i % 7 == 0 {
                    format!("Venue-{}", i)
                } else {
                    "Common".to_string()
                };
                candidate(
                    &format!("p{:03}", i),
                    1.0 - i as f64 * 0.01,
                    &venue,
                    2005 + (i as i32 % 20),
                )
            })
            .collect()
    }

    #[test]
    fn test_small_input_passes_through() {
        let papers = ranked_set(15);
        let titles: Vec<String> = papers.iter().map(|p| p.title.clone()).collect();
        let out = diversify(papers, DiversityLevel::High, 10);
        let out_titles: Vec<String> = out.iter().map(|p| p.title.clone()).collect();
        assert_eq!(titles, out_titles);
    }

    #[test]
    fn test_selects_max_total() {
        let out = diversify(ranked_set(50), DiversityLevel::Medium, 25);
        assert_eq!(out.len(), 25);
        // Output stays relevance-ranked
        for pair in out.windows(2) {
            assert!(pair[0].relevance_score >= pair[1].relevance_score);
        }
    }

    #[test]
    fn test_high_diversity_spreads_venues() {
        let high = diversify(ranked_set(50), DiversityLevel::High, 20);
        let venues: HashSet<String> = high.iter().filter_map(|p| p.venue.clone()).collect();
        // Top-20 by pure relevance would hold at most 4 distinct venues;
        // diversity picks must widen that
        assert!(venues.len() > 4, "venues: {:?}", venues);
    }

    #[test]
    fn test_deterministic_and_stable() {
        let a = diversify(ranked_set(60), DiversityLevel::Medium, 30);
        let b = diversify(ranked_set(60), DiversityLevel::Medium, 30);
        let titles_a: Vec<&str> = a.iter().map(|p| p.title.as_str()).collect();
        let titles_b: Vec<&str> = b.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles_a, titles_b);
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let once = diversify(ranked_set(60), DiversityLevel::High, 30);
        let twice = diversify(once.clone(), DiversityLevel::High, 30);
        let titles_once: Vec<&str> = once.iter().map(|p| p.title.as_str()).collect();
        let titles_twice: Vec<&str> = twice.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles_once, titles_twice);
    }

    #[test]
    fn test_zero_max_total() {
        assert!(diversify(ranked_set(50), DiversityLevel::Low, 0).is_empty());
    }
}
