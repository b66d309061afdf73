//! Keyword-driven domain classification.
//!
//! Each registered domain owns a set of distinguishing terms (aliases,
//! product names). A query matches a domain when it contains any of its
//! terms; matches are ranked by match count and length-weighted specificity,
//! so `naver news` beats a domain matched only on a two-letter alias.
//! Unknown queries return empty and callers fall back to searching all
//! collections.

use workloom_types::knowledge::Domain;

/// The catch-all domain every document is also indexed under.
pub const COMMON_DOMAIN: &str = "common";

/// Classifies free-text queries against the registered domains.
pub struct DomainClassifier {
    domains: Vec<Domain>,
}

#[derive(Debug)]
struct DomainMatch {
    name: String,
    match_count: u32,
    specificity: f64,
}

impl DomainClassifier {
    /// Build a classifier over the registered domains. Inactive domains and
    /// the `common` catch-all are never candidates.
    pub fn new(domains: Vec<Domain>) -> Self {
        let domains = domains
            .into_iter()
            .filter(|d| d.is_active && d.name != COMMON_DOMAIN)
            .collect();
        Self { domains }
    }

    /// Detect matching domains for a query, best match first. Empty when
    /// nothing matches.
    pub fn classify(&self, query: &str) -> Vec<String> {
        let haystack = query.to_lowercase();
        let mut matches: Vec<DomainMatch> = Vec::new();

        for domain in &self.domains {
            let mut match_count = 0u32;
            let mut specificity = 0.0f64;

            // The domain name itself counts as a distinguishing term.
            let terms = std::iter::once(domain.name.as_str())
                .chain(domain.keywords.iter().map(String::as_str));

            for term in terms {
                let needle = term.to_lowercase();
                if !needle.is_empty() && haystack.contains(&needle) {
                    match_count += 1;
                    specificity += needle.chars().count() as f64;
                }
            }

            if match_count > 0 {
                matches.push(DomainMatch {
                    name: domain.name.clone(),
                    match_count,
                    specificity,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.match_count
                .cmp(&a.match_count)
                .then(
                    b.specificity
                        .partial_cmp(&a.specificity)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.name.cmp(&b.name))
        });

        matches.into_iter().map(|m| m.name).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
