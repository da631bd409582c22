//! Cross-source candidate deduplication
//!
//! Two candidates are the same paper when any of:
//! - identical normalized DOI
//! - identical Semantic Scholar id
//! - normalized title similarity >= 0.92 with at least one author-surname
//!   match
//!
//! Merging keeps the survivor chosen by source-of-record precedence
//! (Semantic Scholar > Crossref > Perplexity), unions discovery sources,
//! fills missing fields from the other candidates, sums hit metadata, and
//! keeps the maximum seed score.

use paperscout_common::models::DiscoveredPaper;

/// Minimum normalized-title similarity for the fuzzy match
pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.92;

/// Lowercase, strip punctuation, collapse whitespace
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_space = true;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Similarity in [0,1] from edit distance over normalized titles
pub fn title_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Last whitespace-separated token of an author name, lowercased
pub fn author_surname(name: &str) -> Option<String> {
    name.split_whitespace()
        .last()
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty())
}

fn surnames_overlap(a: &[String], b: &[String]) -> bool {
    let a: Vec<String> = a.iter().filter_map(|n| author_surname(n)).collect();
    b.iter()
        .filter_map(|n| author_surname(n))
        .any(|surname| a.contains(&surname))
}

/// Whether any dedup predicate holds between two candidates
pub fn is_duplicate(a: &DiscoveredPaper, b: &DiscoveredPaper) -> bool {
    if let (Some(doi_a), Some(doi_b)) = (&a.external_ids.doi, &b.external_ids.doi) {
        if doi_a == doi_b {
            return true;
        }
    }
    if let (Some(s2_a), Some(s2_b)) = (
        &a.external_ids.semantic_scholar,
        &b.external_ids.semantic_scholar,
    ) {
        if s2_a == s2_b {
            return true;
        }
    }
    let similarity = title_similarity(&normalize_title(&a.title), &normalize_title(&b.title));
    similarity >= TITLE_SIMILARITY_THRESHOLD && surnames_overlap(&a.authors, &b.authors)
}

/// Collapse duplicates, preserving first-occurrence order of the merged
/// groups.
pub fn dedup(papers: Vec<DiscoveredPaper>) -> Vec<DiscoveredPaper> {
    let mut groups: Vec<Vec<DiscoveredPaper>> = Vec::new();
    for paper in papers {
        match groups
            .iter_mut()
            .find(|group| group.iter().any(|member| is_duplicate(member, &paper)))
        {
            Some(group) => group.push(paper),
            None => groups.push(vec![paper]),
        }
    }
    groups.into_iter().map(merge_group).collect()
}

fn hit_metadata(paper: &DiscoveredPaper) -> u64 {
    paper
        .additional_metadata
        .get("hits")
        .and_then(|v| v.as_u64())
        .unwrap_or(1)
}

/// Merge one duplicate group into its survivor
fn merge_group(mut group: Vec<DiscoveredPaper>) -> DiscoveredPaper {
    if group.len() == 1 {
        return group.pop().expect("group is non-empty");
    }

    // Survivor by source-of-record precedence; first occurrence wins ties
    let survivor_index = group
        .iter()
        .enumerate()
        .max_by_key(|(index, paper)| {
            (
                paper.source_of_record.record_precedence(),
                std::cmp::Reverse(*index),
            )
        })
        .map(|(index, _)| index)
        .expect("group is non-empty");
    let mut survivor = group.swap_remove(survivor_index);

    let mut total_hits = hit_metadata(&survivor);
    for other in &group {
        total_hits += hit_metadata(other);
        survivor.discovery_sources.extend(other.discovery_sources.iter().copied());

        if survivor.relevance_score < other.relevance_score {
            survivor.relevance_score = other.relevance_score;
        }
        if survivor.external_ids.doi.is_none() {
            survivor.external_ids.doi = other.external_ids.doi.clone();
        }
        if survivor.external_ids.semantic_scholar.is_none() {
            survivor.external_ids.semantic_scholar = other.external_ids.semantic_scholar.clone();
        }
        if survivor.external_ids.arxiv.is_none() {
            survivor.external_ids.arxiv = other.external_ids.arxiv.clone();
        }
        if survivor.external_ids.url.is_none() {
            survivor.external_ids.url = other.external_ids.url.clone();
        }
        if survivor.abstract_text.is_none() {
            survivor.abstract_text = other.abstract_text.clone();
        }
        if survivor.authors.is_empty() {
            survivor.authors = other.authors.clone();
        }
        if survivor.venue.is_none() {
            survivor.venue = other.venue.clone();
        }
        if survivor.published_date.is_none() {
            survivor.published_date = other.published_date;
        }
        if survivor.citation_count.is_none() {
            survivor.citation_count = other.citation_count;
        }
        if survivor.influential_citation_count.is_none() {
            survivor.influential_citation_count = other.influential_citation_count;
        }
        if survivor.research_topics.is_empty() {
            survivor.research_topics = other.research_topics.clone();
        }
    }

    if let Some(map) = survivor.additional_metadata.as_object_mut() {
        map.insert("hits".to_string(), serde_json::json!(total_hits));
    }
    survivor
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_common::models::{DiscoverySource, RelationshipType};

    fn candidate(source: DiscoverySource, title: &str) -> DiscoveredPaper {
        DiscoveredPaper::new(source, RelationshipType::Topic, title.to_string())
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("  Deep   Learning: A Survey!  "),
            "deep learning a survey"
        );
        assert_eq!(normalize_title("BERT's Secrets"), "bert s secrets");
    }

    #[test]
    fn test_title_similarity() {
        assert_eq!(title_similarity("abc", "abc"), 1.0);
        assert!(title_similarity("deep learning survey", "deep learning surveys") > 0.92);
        assert!(title_similarity("deep learning", "graph databases") < 0.5);
    }

    #[test]
    fn test_duplicate_by_doi() {
        let mut a = candidate(DiscoverySource::Crossref, "Totally Different Title");
        a.external_ids.doi = Some("10.1/x".into());
        let mut b = candidate(DiscoverySource::SemanticScholar, "Another Name Entirely");
        b.external_ids.doi = Some("10.1/x".into());
        assert!(is_duplicate(&a, &b));
    }

    #[test]
    fn test_duplicate_by_s2_id() {
        let mut a = candidate(DiscoverySource::SemanticScholar, "Title One");
        a.external_ids.semantic_scholar = Some("s2-1".into());
        let mut b = candidate(DiscoverySource::Perplexity, "Title Two");
        b.external_ids.semantic_scholar = Some("s2-1".into());
        assert!(is_duplicate(&a, &b));
    }

    #[test]
    fn test_duplicate_by_title_requires_author_match() {
        let mut a = candidate(DiscoverySource::Crossref, "Graph Neural Networks");
        a.authors = vec!["Ada Lovelace".into()];
        let mut b = candidate(DiscoverySource::Perplexity, "Graph Neural Networks!");
        b.authors = vec!["J. Lovelace".into()];
        assert!(is_duplicate(&a, &b));

        b.authors = vec!["Someone Else".into()];
        assert!(!is_duplicate(&a, &b));
    }

    #[test]
    fn test_merge_prefers_semantic_scholar_record() {
        let mut crossref = candidate(DiscoverySource::Crossref, "Shared Paper");
        crossref.external_ids.doi = Some("10.1/x".into());
        crossref.relevance_score = 0.9;
        crossref.citation_count = Some(10);

        let mut s2 = candidate(DiscoverySource::SemanticScholar, "Shared Paper");
        s2.external_ids.doi = Some("10.1/x".into());
        s2.external_ids.semantic_scholar = Some("s2-9".into());
        s2.relevance_score = 0.5;
        s2.relationship_type = RelationshipType::SemanticSimilarity;

        let merged = dedup(vec![crossref, s2]);
        assert_eq!(merged.len(), 1);
        let paper = &merged[0];

        assert_eq!(paper.source_of_record, DiscoverySource::SemanticScholar);
        assert_eq!(
            paper.relationship_type,
            RelationshipType::SemanticSimilarity
        );
        assert_eq!(paper.discovery_sources.len(), 2);
        // Max seed survives the merge
        assert_eq!(paper.relevance_score, 0.9);
        // Missing fields are filled from the other candidate
        assert_eq!(paper.citation_count, Some(10));
        assert_eq!(
            paper.additional_metadata.get("hits").and_then(|v| v.as_u64()),
            Some(2)
        );
        assert!(paper.invariants_hold());
    }

    #[test]
    fn test_distinct_papers_survive() {
        let mut a = candidate(DiscoverySource::Crossref, "First Paper");
        a.external_ids.doi = Some("10.1/a".into());
        let mut b = candidate(DiscoverySource::Crossref, "Second Paper");
        b.external_ids.doi = Some("10.1/b".into());

        let papers = dedup(vec![a, b]);
        assert_eq!(papers.len(), 2);
        assert!(!is_duplicate(&papers[0], &papers[1]));
    }

    #[test]
    fn test_transitive_group_collapses() {
        // a ~ b by DOI, b ~ c by title+author: all one group
        let mut a = candidate(DiscoverySource::Crossref, "An Unrelated Heading");
        a.external_ids.doi = Some("10.1/t".into());
        a.authors = vec!["Marie Curie".into()];

        let mut b = candidate(DiscoverySource::SemanticScholar, "Radioactive Decay Rates");
        b.external_ids.doi = Some("10.1/t".into());
        b.authors = vec!["Marie Curie".into()];

        let mut c = candidate(DiscoverySource::Perplexity, "Radioactive decay rates");
        c.authors = vec!["M. Curie".into()];

        assert_eq!(dedup(vec![a, b, c]).len(), 1);
    }
}
