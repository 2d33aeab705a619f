use std::{collections::BTreeSet, sync::Arc};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use common::error::AppError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, warn};

use crate::{
    filter::{Filter, FilterField},
    query::{GraphConstraint, Query, QueryIntent, RankingHints, DEFAULT_MAX_RESULTS},
};

pub const KEYWORD_PARSER_CONFIDENCE: f32 = 0.6;

const LOCATION_SYNONYMS: &[(&str, &[&str])] = &[
    ("nyc", &["new york", "manhattan", "brooklyn", "queens", "bronx", "new york city"]),
    ("new york", &["ny", "nyc", "manhattan", "new york city"]),
    ("san francisco", &["sf", "bay area", "palo alto", "silicon valley"]),
    ("boston", &["cambridge", "somerville", "greater boston"]),
    ("washington dc", &["dc", "d.c.", "dmv", "virginia", "maryland"]),
    ("los angeles", &["la", "hollywood", "santa monica", "california"]),
    ("connecticut", &["ct", "new haven", "hartford", "stamford"]),
];

const TITLE_SYNONYMS: &[(&str, &[&str])] = &[
    ("product manager", &["pm", "product lead", "product owner"]),
    ("venture capital", &["vc", "venture partner", "general partner", "managing partner"]),
    ("investor", &["angel investor", "investment partner", "principal"]),
    ("founder", &["co-founder", "ceo", "chief executive", "entrepreneur"]),
    ("software engineer", &["swe", "engineer", "developer", "programmer"]),
    ("consultant", &["consulting", "advisor", "strategy consultant"]),
    ("professor", &["faculty", "academic", "lecturer", "researcher"]),
    ("lawyer", &["attorney", "counsel", "legal advisor"]),
    ("doctor", &["physician", "md", "medical doctor"]),
];

const INDUSTRY_SYNONYMS: &[(&str, &[&str])] = &[
    ("fintech", &["financial technology", "payments", "banking technology"]),
    ("edtech", &["education technology", "learning platforms", "online education"]),
    ("healthcare", &["healthtech", "medical", "pharma", "biotech"]),
    ("artificial intelligence", &["ai", "machine learning", "ml", "deep learning"]),
    ("sustainability", &["clean energy", "climate tech", "renewable energy"]),
    ("real estate", &["proptech", "property technology", "real estate tech"]),
];

const SCHOOL_SYNONYMS: &[(&str, &[&str])] = &[
    ("yale college", &["yc", "yale undergraduate"]),
    ("yale som", &["school of management", "business school"]),
    ("yale law school", &["yls", "law school"]),
    ("yale medical school", &["yale medicine", "medical school"]),
    ("yale school of public health", &["ysph", "public health"]),
    ("yale divinity school", &["yds", "divinity"]),
    ("yale school of art", &["art school"]),
    ("yale school of music", &["music school"]),
];

const INVESTOR_TERMS: &[&str] = &["investor", "vc", "venture", "fund"];
const ALUMNI_TERMS: &[&str] = &["alumni", "alum", "graduated"];
const NETWORK_TERMS: &[&str] = &["hops", "connections", "network"];
const CURRENT_TERMS: &[&str] = &["current", "currently"];

const CLASS_YEAR_PATTERNS: &[&str] = &[
    r"(?i)class of (\d{4})",
    r"'(\d{2})\b",
    r"(?i)(\d{4}) graduate",
    r"(?i)graduated (\d{4})",
];
const HOPS_PATTERN: &str = r"(?i)(\d+)\s*hops?";

const QUERY_PARSER_SYSTEM_MESSAGE: &str = "You parse natural-language people-search queries for a professional networking platform.
Extract the intent and every entity the query mentions. Normalize locations and job titles to their common English form.
Use find_investors for investor or venture capital searches, find_alumni for alumni searches, find_connections when the user asks about their own network, and find_people otherwise.
Report confidence between 0 and 1. Leave lists empty and max_hops null when the query does not mention them.";

/// Caller-side settings that travel with the query text.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub source_entity_id: Option<String>,
    pub max_results: usize,
    pub include_explanation: bool,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self {
            source_entity_id: None,
            max_results: DEFAULT_MAX_RESULTS,
            include_explanation: true,
        }
    }
}

/// Entities a parser pulled out of the query text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedEntities {
    pub locations: Vec<String>,
    pub titles: Vec<String>,
    pub companies: Vec<String>,
    pub schools: Vec<String>,
    pub industries: Vec<String>,
    pub affiliation_schools: Vec<String>,
    pub affiliation_types: Vec<String>,
    pub class_years: Vec<i64>,
    pub max_hops: Option<u32>,
    pub connection_types: Vec<String>,
    pub current_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub intent: QueryIntent,
    pub confidence: f32,
    #[serde(default)]
    pub entities: ParsedEntities,
    #[serde(default)]
    pub hints: RankingHints,
}

#[async_trait]
pub trait QueryParser: Send + Sync {
    async fn parse(&self, text: &str, ctx: &QueryContext) -> Result<ParsedQuery, AppError>;
}

/// Lowercases, replaces punctuation with spaces and pads with a space on each side
/// so terms can be matched on word boundaries.
fn normalize_for_matching(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Whole-word match of `term` (or its plural) inside a normalized haystack.
fn mentions(haystack: &str, term: &str) -> bool {
    let needle = normalize_for_matching(term);
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    haystack.contains(&format!(" {needle} ")) || haystack.contains(&format!(" {needle}s "))
}

fn mentions_any(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| mentions(haystack, term))
}

fn detect_canonical(haystack: &str, table: &[(&str, &[&str])]) -> Vec<String> {
    table
        .iter()
        .filter(|(canonical, variants)| mentions(haystack, canonical) || mentions_any(haystack, variants))
        .map(|(canonical, _)| (*canonical).to_owned())
        .collect()
}

/// Whether the raw text asks for network-restricted results.
pub fn mentions_network(text: &str) -> bool {
    mentions_any(&normalize_for_matching(text), NETWORK_TERMS)
}

/// Deterministic parser built from synonym tables and a handful of patterns.
pub struct KeywordQueryParser {
    class_year_patterns: Vec<Regex>,
    hops_pattern: Option<Regex>,
}

impl Default for KeywordQueryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordQueryParser {
    pub fn new() -> Self {
        Self {
            class_year_patterns: CLASS_YEAR_PATTERNS
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
            hops_pattern: Regex::new(HOPS_PATTERN).ok(),
        }
    }

    fn class_years(&self, text: &str) -> Vec<i64> {
        let years: BTreeSet<i64> = self
            .class_year_patterns
            .iter()
            .flat_map(|pattern| pattern.captures_iter(text))
            .filter_map(|captures| captures.get(1))
            .filter_map(|digits| {
                let raw = digits.as_str();
                let value = raw.parse::<i64>().ok()?;
                Some(if raw.len() == 4 { value } else { 2000 + value })
            })
            .collect();
        years.into_iter().collect()
    }

    fn max_hops(&self, text: &str) -> Option<u32> {
        self.hops_pattern
            .as_ref()
            .and_then(|pattern| pattern.captures(text))
            .and_then(|captures| captures.get(1))
            .and_then(|digits| digits.as_str().parse().ok())
    }

    pub fn parse_text(&self, text: &str) -> ParsedQuery {
        let haystack = normalize_for_matching(text);

        let intent = if mentions_any(&haystack, INVESTOR_TERMS) {
            QueryIntent::FindInvestors
        } else if mentions_any(&haystack, ALUMNI_TERMS) {
            QueryIntent::FindAlumni
        } else {
            QueryIntent::FindPeople
        };

        let entities = ParsedEntities {
            locations: detect_canonical(&haystack, LOCATION_SYNONYMS),
            titles: detect_canonical(&haystack, TITLE_SYNONYMS),
            industries: detect_canonical(&haystack, INDUSTRY_SYNONYMS),
            affiliation_schools: detect_canonical(&haystack, SCHOOL_SYNONYMS),
            class_years: self.class_years(text),
            max_hops: self.max_hops(text),
            current_only: mentions_any(&haystack, CURRENT_TERMS),
            ..ParsedEntities::default()
        };

        ParsedQuery {
            intent,
            confidence: KEYWORD_PARSER_CONFIDENCE,
            entities,
            hints: RankingHints::default(),
        }
    }
}

#[async_trait]
impl QueryParser for KeywordQueryParser {
    async fn parse(&self, text: &str, _ctx: &QueryContext) -> Result<ParsedQuery, AppError> {
        Ok(self.parse_text(text))
    }
}

pub fn query_parser_schema() -> serde_json::Value {
    let string_list = json!({ "type": "array", "items": { "type": "string" } });
    json!({
        "type": "object",
        "properties": {
            "intent": {
                "type": "string",
                "enum": ["find_people", "find_investors", "find_alumni", "find_connections"]
            },
            "confidence": { "type": "number" },
            "entities": {
                "type": "object",
                "properties": {
                    "locations": string_list,
                    "titles": string_list,
                    "companies": string_list,
                    "schools": string_list,
                    "industries": string_list,
                    "affiliation_schools": string_list,
                    "affiliation_types": string_list,
                    "class_years": { "type": "array", "items": { "type": "integer" } },
                    "max_hops": { "type": ["integer", "null"] },
                    "connection_types": string_list,
                    "current_only": { "type": "boolean" }
                },
                "required": [
                    "locations", "titles", "companies", "schools", "industries",
                    "affiliation_schools", "affiliation_types", "class_years",
                    "max_hops", "connection_types", "current_only"
                ],
                "additionalProperties": false
            },
            "hints": {
                "type": "object",
                "properties": {
                    "prioritize_embedding": { "type": "boolean" },
                    "prioritize_filters": { "type": "boolean" },
                    "prioritize_affinity": { "type": "boolean" },
                    "prioritize_graph": { "type": "boolean" }
                },
                "required": [
                    "prioritize_embedding", "prioritize_filters",
                    "prioritize_affinity", "prioritize_graph"
                ],
                "additionalProperties": false
            }
        },
        "required": ["intent", "confidence", "entities", "hints"],
        "additionalProperties": false
    })
}

/// Chat-completion parser constrained to a JSON schema response.
pub struct OpenAiQueryParser {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiQueryParser {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl QueryParser for OpenAiQueryParser {
    async fn parse(&self, text: &str, _ctx: &QueryContext) -> Result<ParsedQuery, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Structured interpretation of a people-search query".into()),
                name: "people_search_query".into(),
                schema: Some(query_parser_schema()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.0)
            .messages([
                ChatCompletionRequestSystemMessage::from(QUERY_PARSER_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(format!("Parse this query: {text}")).into(),
            ])
            .response_format(response_format)
            .build()?;

        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let response = Retry::start(retry_strategy, || {
            let request = request.clone();
            async move { self.client.chat().create(request).await }
        })
        .await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        let parsed = serde_json::from_str::<ParsedQuery>(content).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse LLM response into query: {e}"))
        })?;

        debug!(intent = %parsed.intent, confidence = parsed.confidence, "LLM parsed query");
        Ok(parsed)
    }
}

/// Tries `primary` and falls back to the keyword parser on recoverable errors.
pub struct FallbackQueryParser {
    primary: Box<dyn QueryParser>,
    fallback: KeywordQueryParser,
}

impl FallbackQueryParser {
    pub fn new(primary: Box<dyn QueryParser>) -> Self {
        Self {
            primary,
            fallback: KeywordQueryParser::new(),
        }
    }
}

#[async_trait]
impl QueryParser for FallbackQueryParser {
    async fn parse(&self, text: &str, ctx: &QueryContext) -> Result<ParsedQuery, AppError> {
        match self.primary.parse(text, ctx).await {
            Ok(parsed) => Ok(parsed),
            Err(err) if !err.is_recoverable() => Err(err),
            Err(err) => {
                warn!(error = %err, "Query parser failed; using keyword parser");
                self.fallback.parse(text, ctx).await
            }
        }
    }
}

/// Values plus their synonym expansions, lowercased and deduplicated in first-seen order.
fn expand_with_synonyms(values: &[String], table: &[(&str, &[&str])]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut expanded = Vec::new();
    let mut push = |value: &str| {
        let value = value.trim().to_lowercase();
        if !value.is_empty() && seen.insert(value.clone()) {
            expanded.push(value);
        }
    };

    for value in values {
        push(value);
        let key = value.trim().to_lowercase();
        if let Some((_, variants)) = table.iter().find(|(canonical, _)| *canonical == key) {
            for variant in *variants {
                push(variant);
            }
        }
    }
    expanded
}

fn push_in_filter(filters: &mut Vec<Filter>, field: FilterField, values: Vec<String>) -> Result<(), AppError> {
    let values: Vec<String> = values
        .into_iter()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect();
    if !values.is_empty() {
        filters.push(Filter::any_of(field, values)?);
    }
    Ok(())
}

/// Turns parser output into a validated [`Query`].
pub fn build_query(raw_text: &str, parsed: ParsedQuery, ctx: &QueryContext) -> Result<Query, AppError> {
    let entities = &parsed.entities;
    let mut filters = Vec::new();

    push_in_filter(
        &mut filters,
        FilterField::Location,
        expand_with_synonyms(&entities.locations, LOCATION_SYNONYMS),
    )?;
    push_in_filter(
        &mut filters,
        FilterField::Title,
        expand_with_synonyms(&entities.titles, TITLE_SYNONYMS),
    )?;
    push_in_filter(&mut filters, FilterField::Company, entities.companies.clone())?;
    push_in_filter(&mut filters, FilterField::Institution, entities.schools.clone())?;
    push_in_filter(
        &mut filters,
        FilterField::AffiliationSchool,
        entities.affiliation_schools.clone(),
    )?;
    push_in_filter(
        &mut filters,
        FilterField::AffiliationType,
        entities.affiliation_types.clone(),
    )?;

    let years: BTreeSet<i64> = entities.class_years.iter().copied().collect();
    match (years.first(), years.last()) {
        (Some(&min), Some(&max)) if min == max => {
            filters.push(Filter::any_of(FilterField::ClassYear, [min])?);
        }
        (Some(&min), Some(&max)) => filters.push(Filter::range(FilterField::ClassYear, min, max)?),
        _ => {}
    }

    push_in_filter(&mut filters, FilterField::Industry, entities.industries.clone())?;

    if entities.current_only {
        filters.push(Filter::any_of(FilterField::CurrentRole, [true])?);
    }

    let mut builder = Query::builder(raw_text)
        .filters(filters)
        .intent(parsed.intent)
        .confidence(parsed.confidence.clamp(0.0, 1.0))
        .max_results(ctx.max_results)
        .include_explanation(ctx.include_explanation)
        .hints(parsed.hints)
        .parsed_entities(parsed.entities.clone());

    let wants_graph = entities.max_hops.is_some()
        || !entities.connection_types.is_empty()
        || mentions_network(raw_text);
    if wants_graph {
        let hops = entities
            .max_hops
            .unwrap_or(GraphConstraint::DEFAULT_MAX_HOPS)
            .max(1);
        let constraint = GraphConstraint::new(hops)?
            .with_connection_types(entities.connection_types.iter().cloned())
            .with_boost_affinity(true);
        builder = builder.graph_constraint(constraint);
    }

    if let Some(source) = &ctx.source_entity_id {
        builder = builder.source_entity_id(source.clone());
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOperator, FilterValue};

    struct FailingParser;

    #[async_trait]
    impl QueryParser for FailingParser {
        async fn parse(&self, _text: &str, _ctx: &QueryContext) -> Result<ParsedQuery, AppError> {
            Err(AppError::LLMParsing("model returned prose".into()))
        }
    }

    #[test]
    fn keyword_parser_extracts_entities() {
        let parser = KeywordQueryParser::new();
        let parsed = parser.parse_text("Fintech PMs in NYC, class of 2015, within 2 hops of me");

        assert_eq!(parsed.intent, QueryIntent::FindPeople);
        assert!((parsed.confidence - KEYWORD_PARSER_CONFIDENCE).abs() < f32::EPSILON);
        assert!(parsed.entities.locations.contains(&"nyc".to_owned()));
        assert_eq!(parsed.entities.titles, vec!["product manager"]);
        assert_eq!(parsed.entities.industries, vec!["fintech"]);
        assert_eq!(parsed.entities.class_years, vec![2015]);
        assert_eq!(parsed.entities.max_hops, Some(2));
    }

    #[test]
    fn keyword_parser_detects_intents_and_short_years() {
        let parser = KeywordQueryParser::new();
        assert_eq!(
            parser.parse_text("seed investors in boston").intent,
            QueryIntent::FindInvestors
        );

        let alumni = parser.parse_text("Yale SOM alumni '12 and '18");
        assert_eq!(alumni.intent, QueryIntent::FindAlumni);
        assert_eq!(alumni.entities.class_years, vec![2012, 2018]);
        assert_eq!(alumni.entities.affiliation_schools, vec!["yale som"]);
    }

    #[test]
    fn keyword_matching_respects_word_boundaries() {
        let parser = KeywordQueryParser::new();
        let parsed = parser.parse_text("flat design people");
        assert!(parsed.entities.locations.is_empty());
        assert!(!mentions_network("networking events"));
        assert!(mentions_network("people in my network"));
    }

    #[test]
    fn build_query_expands_synonyms_and_ranges() {
        let parsed = ParsedQuery {
            intent: QueryIntent::FindAlumni,
            confidence: 0.9,
            entities: ParsedEntities {
                locations: vec!["NYC".into()],
                titles: vec!["Product Manager".into()],
                class_years: vec![2018, 2012, 2015],
                current_only: true,
                ..ParsedEntities::default()
            },
            hints: RankingHints::default(),
        };

        let query = build_query("alumni pms in nyc", parsed, &QueryContext::default()).unwrap();
        let filters = query.filters();
        assert_eq!(filters.len(), 4);

        let location = &filters[0];
        assert_eq!(location.field(), FilterField::Location);
        assert_eq!(location.values()[0], FilterValue::from("nyc"));
        assert!(location.values().contains(&FilterValue::from("manhattan")));

        let title = &filters[1];
        assert!(title.values().contains(&FilterValue::from("pm")));

        let years = &filters[2];
        assert_eq!(years.operator(), FilterOperator::Range);
        assert_eq!(years.values(), &[FilterValue::Integer(2012), FilterValue::Integer(2018)]);

        assert_eq!(filters[3].field(), FilterField::CurrentRole);
        assert!(query.graph_constraint().is_none());
    }

    #[test]
    fn build_query_adds_graph_constraint_for_network_terms() {
        let parsed = KeywordQueryParser::new().parse_text("designers in my network");
        let ctx = QueryContext {
            source_entity_id: Some("me".into()),
            ..QueryContext::default()
        };

        let query = build_query("designers in my network", parsed, &ctx).unwrap();
        let constraint = query.graph_constraint().expect("graph constraint");
        assert_eq!(constraint.max_hops(), GraphConstraint::DEFAULT_MAX_HOPS);
        assert!(constraint.boost_affinity());
        assert_eq!(query.source_entity_id(), Some("me"));
    }

    #[test]
    fn single_class_year_becomes_in_filter() {
        let parsed = ParsedQuery {
            intent: QueryIntent::FindPeople,
            confidence: 1.0,
            entities: ParsedEntities {
                class_years: vec![2020, 2020],
                ..ParsedEntities::default()
            },
            hints: RankingHints::default(),
        };
        let query = build_query("class of 2020", parsed, &QueryContext::default()).unwrap();
        assert_eq!(query.filters()[0].operator(), FilterOperator::In);
    }

    #[test]
    fn llm_payload_deserializes() {
        let payload = r#"{
            "intent": "find_investors",
            "confidence": 0.85,
            "entities": {"locations": ["Boston"], "max_hops": null, "current_only": false},
            "hints": {"prioritize_filters": true}
        }"#;
        let parsed: ParsedQuery = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.intent, QueryIntent::FindInvestors);
        assert_eq!(parsed.entities.locations, vec!["Boston"]);
        assert!(parsed.hints.prioritize_filters);
    }

    #[tokio::test]
    async fn fallback_parser_recovers_from_primary_failure() {
        let parser = FallbackQueryParser::new(Box::new(FailingParser));
        let parsed = parser
            .parse("vc partners in sf", &QueryContext::default())
            .await
            .unwrap();
        assert_eq!(parsed.intent, QueryIntent::FindInvestors);
        assert_eq!(parsed.entities.locations, vec!["san francisco"]);
    }
}
