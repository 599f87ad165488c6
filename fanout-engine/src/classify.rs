//! Lightweight query classification.
//!
//! Feeds three routing decisions: the overall deadline (longer or
//! structured queries get more time), the default strategy (multi-faceted
//! queries fan out, single-answer queries cascade), and the content type
//! used for provider affinity when the caller gave no hint.

use crate::types::{ContentType, Query, StrategyKind};

const FACET_SEPARATORS: &[&str] = &["and", "vs", "vs.", "versus"];
const QUESTION_PREFIXES: &[&str] = &[
    "what is ",
    "what are ",
    "who ",
    "when ",
    "where ",
    "define ",
    "how many ",
    "how much ",
];
const RECENCY_WORDS: &[&str] = &[
    "latest", "today", "news", "breaking", "recent", "yesterday", "current", "now",
];
const FIELD_OPERATORS: &[&str] = &["site:", "filetype:", "intitle:", "inurl:", "author:"];

const CONTENT_KEYWORDS: &[(ContentType, &[&str])] = &[
    (
        ContentType::Academic,
        &["paper", "papers", "arxiv", "study", "studies", "research", "journal", "doi", "thesis"],
    ),
    (
        ContentType::Code,
        &["code", "github", "api", "compiler", "crate", "library", "npm", "function", "stacktrace"],
    ),
    (ContentType::News, &["news", "headlines", "breaking", "announcement"]),
    (ContentType::Social, &["reddit", "twitter", "tweet", "forum", "discussion", "thread"]),
    (ContentType::Media, &["video", "videos", "image", "images", "photo", "youtube", "podcast"]),
];

/// What the router learned about a query before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryProfile {
    pub terms: usize,
    /// Quoted phrases, field operators, or exclusion terms.
    pub structured: bool,
    /// Number of independent sub-topics, at least 1.
    pub facets: usize,
    pub single_answer: bool,
    /// Keyword-based guess, `None` when nothing matched.
    pub inferred_content_type: Option<ContentType>,
    pub time_sensitive: bool,
}

impl QueryProfile {
    pub fn is_multi_faceted(&self) -> bool {
        self.facets > 1
    }
}

pub fn classify(query: &Query) -> QueryProfile {
    let text = query.normalized_text();
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let structured = text.contains('"')
        || tokens.iter().any(|t| {
            FIELD_OPERATORS.iter().any(|op| t.starts_with(op))
                || (t.len() > 1 && (t.starts_with('-') || t.starts_with('+')))
        });

    let separators = tokens
        .iter()
        .filter(|t| FACET_SEPARATORS.contains(&t.trim_end_matches(',')))
        .count()
        + text.matches(',').count();
    let mut facets = 1 + separators;
    if facets == 1 && tokens.first() == Some(&"compare") {
        facets = 2;
    }

    let single_answer = QUESTION_PREFIXES.iter().any(|p| text.starts_with(p))
        || (tokens.len() <= 3 && facets == 1 && !structured);

    let time_sensitive = query.time_sensitive_flag().unwrap_or_else(|| {
        tokens.iter().any(|t| {
            let word = t.trim_matches(|c: char| !c.is_alphanumeric());
            RECENCY_WORDS.contains(&word) || is_recent_year(word)
        })
    });

    QueryProfile {
        terms: tokens.len(),
        structured,
        facets,
        single_answer,
        inferred_content_type: infer_content_type(&tokens),
        time_sensitive,
    }
}

fn is_recent_year(word: &str) -> bool {
    word.len() == 4 && word.parse::<u32>().is_ok_and(|y| (2000..=2100).contains(&y))
}

fn infer_content_type(tokens: &[&str]) -> Option<ContentType> {
    CONTENT_KEYWORDS.iter().find_map(|(content_type, keywords)| {
        tokens
            .iter()
            .any(|t| keywords.contains(&t.trim_matches(|c: char| !c.is_alphanumeric())))
            .then_some(*content_type)
    })
}

/// Content type used for affinity: explicit hint, else inferred, else web.
pub fn effective_content_type(query: &Query, profile: &QueryProfile) -> ContentType {
    query
        .content_type()
        .or(profile.inferred_content_type)
        .unwrap_or(ContentType::Web)
}

/// Pick the dispatch strategy.
///
/// An explicit hint wins. Multi-faceted queries fan out. Single-answer
/// queries, and queries whose candidates together cost more than
/// `cost_threshold` per call, cascade. Everything else uses `default`.
pub fn select_strategy(
    query: &Query,
    profile: &QueryProfile,
    candidate_cost: f64,
    cost_threshold: f64,
    default: StrategyKind,
) -> StrategyKind {
    if let Some(strategy) = query.hints().strategy {
        return strategy;
    }
    if profile.is_multi_faceted() {
        return StrategyKind::Parallel;
    }
    if profile.single_answer || (candidate_cost > cost_threshold && !query.hints().prioritize_quality) {
        return StrategyKind::Cascade;
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_query_profile() {
        let profile = classify(&Query::new("rust async runtime comparison benchmarks"));
        assert_eq!(profile.terms, 5);
        assert!(!profile.structured);
        assert_eq!(profile.facets, 1);
        assert!(!profile.single_answer);
        assert!(!profile.time_sensitive);
    }

    #[test]
    fn structured_queries_detected() {
        assert!(classify(&Query::new("\"exact phrase\" search")).structured);
        assert!(classify(&Query::new("tokio site:docs.rs")).structured);
        assert!(classify(&Query::new("jaguar -car speed")).structured);
    }

    #[test]
    fn facets_counted_from_conjunctions_and_commas() {
        assert_eq!(classify(&Query::new("tokio vs async-std performance")).facets, 2);
        assert_eq!(classify(&Query::new("rust, go, and zig memory safety")).facets, 4);
        assert_eq!(classify(&Query::new("compare postgres mysql")).facets, 2);
    }

    #[test]
    fn question_forms_are_single_answer() {
        assert!(classify(&Query::new("What is the capital of Australia")).single_answer);
        assert!(classify(&Query::new("borrow checker")).single_answer);
        assert!(!classify(&Query::new("rust vs go")).single_answer);
    }

    #[test]
    fn time_sensitivity_from_words_years_and_flag() {
        assert!(classify(&Query::new("latest rust release")).time_sensitive);
        assert!(classify(&Query::new("quantum computing breakthroughs 2024")).time_sensitive);
        assert!(!classify(&Query::new("the year 1999 in music")).time_sensitive);
        assert!(!classify(&Query::new("latest rust release").time_sensitive(false)).time_sensitive);
    }

    #[test]
    fn content_type_inference_and_hint_precedence() {
        let query = Query::new("transformer attention paper arxiv");
        let profile = classify(&query);
        assert_eq!(profile.inferred_content_type, Some(ContentType::Academic));
        assert_eq!(effective_content_type(&query, &profile), ContentType::Academic);

        let hinted = query.clone().with_content_type(ContentType::Code);
        assert_eq!(effective_content_type(&hinted, &classify(&hinted)), ContentType::Code);

        let plain = Query::new("best hiking trails norway");
        assert_eq!(effective_content_type(&plain, &classify(&plain)), ContentType::Web);
    }

    #[test]
    fn strategy_selection_rules() {
        let pick = |q: &Query, cost: f64| select_strategy(q, &classify(q), cost, 0.02, StrategyKind::Parallel);

        let hinted = Query::new("rust vs go").with_strategy(StrategyKind::Cascade);
        assert_eq!(pick(&hinted, 0.0), StrategyKind::Cascade);

        assert_eq!(pick(&Query::new("rust vs go performance"), 1.0), StrategyKind::Parallel);
        assert_eq!(pick(&Query::new("who wrote dune"), 0.0), StrategyKind::Cascade);

        let long = Query::new("memory model of modern garbage collectors");
        assert_eq!(pick(&long, 0.0), StrategyKind::Parallel);
        assert_eq!(pick(&long, 0.05), StrategyKind::Cascade);
        assert_eq!(pick(&long.clone().prioritize_quality(), 0.05), StrategyKind::Parallel);
    }
}
