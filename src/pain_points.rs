use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::PainPointCategory;

/// Outcome of scanning a lead's text against the configured pain points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PainPointMatch {
    pub matched_keywords: BTreeSet<String>,
    pub category_hit_count: usize,
    /// `100 * matched / total_keywords`, capped at 100.
    pub relevance_score: f64,
}

/// Joins a lead's snippets into the corpus scanned by [`match_pain_points`].
pub fn corpus_from_snippets(snippets: &[String]) -> String {
    snippets.join("\n")
}

/// Case-insensitive substring scan of `corpus` for every configured keyword.
pub fn match_pain_points(corpus: &str, categories: &[PainPointCategory]) -> PainPointMatch {
    let haystack = corpus.to_lowercase();
    let mut all_keywords = BTreeSet::new();
    let mut matched_keywords = BTreeSet::new();
    let mut category_hit_count = 0usize;

    for category in categories {
        let mut hit = false;
        for keyword in &category.keywords {
            let needle = keyword.trim().to_lowercase();
            if needle.is_empty() {
                continue;
            }
            if !haystack.is_empty() && haystack.contains(&needle) {
                hit = true;
                matched_keywords.insert(needle.clone());
            }
            all_keywords.insert(needle);
        }
        if hit {
            category_hit_count += 1;
        }
    }

    let total = all_keywords.len().max(1) as f64;
    let relevance_score = (100.0 * matched_keywords.len() as f64 / total).min(100.0);

    PainPointMatch {
        matched_keywords,
        category_hit_count,
        relevance_score,
    }
}
