//! PII redaction.
//!
//! Defines the [`Redactor`] capability and two implementations:
//! - **[`PatternRedactor`]**: offline recognizers. Regexes for e-mail
//!   addresses, phone numbers and Luhn-valid card numbers, plus configured
//!   gazetteers for person and location names.
//! - **[`PresidioRedactor`]**: delegates to Presidio analyzer and
//!   anonymizer services over HTTP.
//!
//! Both detect the fixed entity set [`PII_ENTITIES`] and replace each
//! detected span with `<ENTITY_TYPE>`. Empty input is returned unchanged
//! without consulting the capability.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RedactionConfig;
use crate::error::RedactionError;

/// Entity types scrubbed from every unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    PhoneNumber,
    EmailAddress,
    CreditCard,
    Location,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::PhoneNumber => "PHONE_NUMBER",
            EntityType::EmailAddress => "EMAIL_ADDRESS",
            EntityType::CreditCard => "CREDIT_CARD",
            EntityType::Location => "LOCATION",
        }
    }
}

pub const PII_ENTITIES: [EntityType; 5] = [
    EntityType::Person,
    EntityType::PhoneNumber,
    EntityType::EmailAddress,
    EntityType::CreditCard,
    EntityType::Location,
];

/// A detected entity, as byte offsets into the analyzed text.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub entity: EntityType,
    pub start: usize,
    pub end: usize,
}

/// Maps raw text to its PII-scrubbed form.
///
/// Implementations must not mutate anything observable: the same input
/// always yields an equivalent redaction.
#[async_trait]
pub trait Redactor: Send + Sync {
    async fn redact(&self, text: &str) -> Result<String, RedactionError>;
}

/// Replace each span with `<ENTITY_TYPE>`.
///
/// Overlapping spans resolve to the one that starts first, and among those
/// the longest.
pub fn anonymize(text: &str, spans: &[Span]) -> String {
    let mut ordered: Vec<&Span> = spans
        .iter()
        .filter(|s| s.start < s.end && s.end <= text.len())
        .collect();
    ordered.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in ordered {
        if span.start < cursor {
            continue;
        }
        out.push_str(&text[cursor..span.start]);
        out.push('<');
        out.push_str(span.entity.as_str());
        out.push('>');
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

// ============ Pattern Redactor ============

/// Offline redactor built from regular expressions and name lists.
pub struct PatternRedactor {
    email: Regex,
    phone: Regex,
    card: Regex,
    persons: Option<Regex>,
    locations: Option<Regex>,
}

impl PatternRedactor {
    /// Build a redactor with the given PERSON and LOCATION gazetteers.
    pub fn new(persons: &[String], locations: &[String]) -> Result<Self> {
        Ok(Self {
            email: Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9-]+(?:\.[a-z0-9-]+)*\.[a-z]{2,}\b")?,
            phone: Regex::new(
                r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{3}\)\s?|\b\d{3}[\s.-]?)\d{3}[\s.-]?\d{4}\b",
            )?,
            card: Regex::new(r"\b\d(?:[ -]?\d){12,18}\b")?,
            persons: gazetteer(persons)?,
            locations: gazetteer(locations)?,
        })
    }

    /// Detect entities in `text`.
    pub fn analyze(&self, text: &str) -> Vec<Span> {
        let mut spans = Vec::new();

        let mut push_all = |re: &Regex, entity: EntityType, check: fn(&str) -> bool| {
            for m in re.find_iter(text) {
                if check(m.as_str()) {
                    spans.push(Span {
                        entity,
                        start: m.start(),
                        end: m.end(),
                    });
                }
            }
        };

        push_all(&self.card, EntityType::CreditCard, luhn_valid);
        push_all(&self.email, EntityType::EmailAddress, |_| true);
        push_all(&self.phone, EntityType::PhoneNumber, |_| true);
        if let Some(re) = &self.persons {
            push_all(re, EntityType::Person, |_| true);
        }
        if let Some(re) = &self.locations {
            push_all(re, EntityType::Location, |_| true);
        }

        spans
    }
}

#[async_trait]
impl Redactor for PatternRedactor {
    async fn redact(&self, text: &str) -> Result<String, RedactionError> {
        if text.is_empty() {
            return Ok(String::new());
        }
        Ok(anonymize(text, &self.analyze(text)))
    }
}

/// Case-insensitive whole-word alternation, longest names first.
fn gazetteer(names: &[String]) -> Result<Option<Regex>> {
    let mut names: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        return Ok(None);
    }
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    let alternation = names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Some(Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))?))
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

// ============ Presidio Redactor ============

/// Redactor backed by Presidio analyzer and anonymizer services.
///
/// Calls `POST {analyzer_url}/analyze` with the text, language and entity
/// set, then `POST {anonymizer_url}/anonymize` with the analyzer results.
/// Presidio reports character offsets, so spans are passed through to the
/// anonymizer untouched.
pub struct PresidioRedactor {
    client: reqwest::Client,
    analyzer_url: String,
    anonymizer_url: String,
    language: String,
}

impl PresidioRedactor {
    pub fn new(config: &RedactionConfig) -> Result<Self> {
        let analyzer_url = config
            .analyzer_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("redaction.analyzer_url required for presidio"))?;
        let anonymizer_url = config
            .anonymizer_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("redaction.anonymizer_url required for presidio"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            analyzer_url: analyzer_url.trim_end_matches('/').to_string(),
            anonymizer_url: anonymizer_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
        })
    }

    async fn post_json(
        &self,
        url: String,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, RedactionError> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RedactionError::Service {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Redactor for PresidioRedactor {
    async fn redact(&self, text: &str) -> Result<String, RedactionError> {
        if text.is_empty() {
            return Ok(String::new());
        }

        let entities: Vec<&str> = PII_ENTITIES.iter().map(EntityType::as_str).collect();
        let analyzer_results = self
            .post_json(
                format!("{}/analyze", self.analyzer_url),
                &serde_json::json!({
                    "text": text,
                    "language": self.language,
                    "entities": entities,
                }),
            )
            .await?;

        if !analyzer_results.is_array() {
            return Err(RedactionError::InvalidResponse(
                "analyzer did not return an array".to_string(),
            ));
        }
        if analyzer_results.as_array().is_some_and(|r| r.is_empty()) {
            return Ok(text.to_string());
        }

        let anonymized = self
            .post_json(
                format!("{}/anonymize", self.anonymizer_url),
                &serde_json::json!({
                    "text": text,
                    "analyzer_results": analyzer_results,
                }),
            )
            .await?;

        anonymized
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RedactionError::InvalidResponse("anonymizer response missing 'text'".to_string())
            })
    }
}

/// Create the [`Redactor`] selected by configuration.
///
/// | Config Value | Redactor |
/// |-------------|----------|
/// | `"pattern"` | [`PatternRedactor`] |
/// | `"presidio"` | [`PresidioRedactor`] |
/// Fail when the `pattern` provider would leave PERSON or LOCATION
/// undetected because its name list is empty, unless the entity is listed
/// in `allow_undetected`.
pub fn check_pattern_coverage(config: &RedactionConfig) -> Result<()> {
    let allowed = |entity: &str| config.allow_undetected.iter().any(|e| e == entity);
    if config.persons.is_empty() && !allowed("PERSON") {
        bail!(
            "redaction.persons is empty: the pattern redactor would leave PERSON undetected. \
             List names in redaction.persons, use provider = \"presidio\", \
             or add \"PERSON\" to redaction.allow_undetected"
        );
    }
    if config.locations.is_empty() && !allowed("LOCATION") {
        bail!(
            "redaction.locations is empty: the pattern redactor would leave LOCATION undetected. \
             List places in redaction.locations, use provider = \"presidio\", \
             or add \"LOCATION\" to redaction.allow_undetected"
        );
    }
    Ok(())
}

pub fn create_redactor(config: &RedactionConfig) -> Result<Box<dyn Redactor>> {
    match config.provider.as_str() {
        "pattern" => {
            check_pattern_coverage(config)?;
            Ok(Box::new(PatternRedactor::new(
                &config.persons,
                &config.locations,
            )?))
        }
        "presidio" => Ok(Box::new(PresidioRedactor::new(config)?)),
        other => bail!("Unknown redaction provider: {}", other),
    }
}

/// `sieve redact`: preview what the configured redactor does to `text`.
pub async fn run_redact(config: &RedactionConfig, text: &str) -> Result<()> {
    let redactor = create_redactor(config)?;
    let redacted = redactor.redact(text).await?;
    println!("original: {}", text);
    println!("redacted: {}", redacted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redactor() -> PatternRedactor {
        PatternRedactor::new(
            &["Alice Johnson".to_string(), "Bob".to_string()],
            &["Paris".to_string(), "New York".to_string()],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_entities_is_noop() {
        let text = "[User] How do I bake chocolate chip cookies at 180 degrees?";
        assert_eq!(redactor().redact(text).await.unwrap(), text);
    }

    #[tokio::test]
    async fn test_empty_input() {
        assert_eq!(redactor().redact("").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_email_and_phone() {
        let out = redactor()
            .redact("Reach me at jane.doe@example.co.uk or (555) 123-4567.")
            .await
            .unwrap();
        assert_eq!(out, "Reach me at <EMAIL_ADDRESS> or <PHONE_NUMBER>.");
    }

    #[tokio::test]
    async fn test_international_phone() {
        let out = redactor().redact("call +1 555 123 4567 now").await.unwrap();
        assert_eq!(out, "call <PHONE_NUMBER> now");
    }

    #[tokio::test]
    async fn test_credit_card_requires_luhn() {
        let out = redactor()
            .redact("card 4111 1111 1111 1111 ok")
            .await
            .unwrap();
        assert_eq!(out, "card <CREDIT_CARD> ok");

        let out = redactor()
            .redact("order 1234567890123 shipped")
            .await
            .unwrap();
        assert_eq!(out, "order 1234567890123 shipped");
    }

    #[tokio::test]
    async fn test_gazetteers_whole_word_case_insensitive() {
        let out = redactor()
            .redact("alice johnson flew from PARIS to New York with Bobby")
            .await
            .unwrap();
        assert_eq!(out, "<PERSON> flew from <LOCATION> to <LOCATION> with Bobby");
    }

    #[test]
    fn test_anonymize_overlaps_keep_earliest_longest() {
        let text = "abcdefgh";
        let spans = vec![
            Span {
                entity: EntityType::PhoneNumber,
                start: 2,
                end: 5,
            },
            Span {
                entity: EntityType::CreditCard,
                start: 1,
                end: 6,
            },
            Span {
                entity: EntityType::Person,
                start: 1,
                end: 3,
            },
        ];
        assert_eq!(anonymize(text, &spans), "a<CREDIT_CARD>gh");
    }

    #[test]
    fn test_luhn() {
        assert!(luhn_valid("4111111111111111"));
        assert!(luhn_valid("5500-0000-0000-0004"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(!luhn_valid("4111"));
    }

    #[test]
    fn test_default_pattern_config_is_rejected() {
        let err = create_redactor(&RedactionConfig::default()).err().unwrap();
        assert!(err.to_string().contains("PERSON"));

        let config = RedactionConfig {
            persons: vec!["John Smith".to_string()],
            ..RedactionConfig::default()
        };
        let err = create_redactor(&config).err().unwrap();
        assert!(err.to_string().contains("LOCATION"));
    }

    #[tokio::test]
    async fn test_configured_pattern_redactor_covers_names_and_places() {
        let config = RedactionConfig {
            persons: vec!["John Smith".to_string()],
            locations: vec!["Seattle".to_string()],
            ..RedactionConfig::default()
        };
        let redactor = create_redactor(&config).unwrap();
        let out = redactor
            .redact("My name is John Smith and I live in Seattle")
            .await
            .unwrap();
        assert_eq!(out, "My name is <PERSON> and I live in <LOCATION>");
    }

    #[tokio::test]
    async fn test_allow_undetected_opts_out() {
        let config = RedactionConfig {
            allow_undetected: vec!["PERSON".to_string(), "LOCATION".to_string()],
            ..RedactionConfig::default()
        };
        let redactor = create_redactor(&config).unwrap();
        let out = redactor.redact("call (555) 123-4567").await.unwrap();
        assert!(out.contains("<PHONE_NUMBER>"));
    }

    #[test]
    fn test_create_redactor_unknown_provider() {
        let config = RedactionConfig {
            provider: "magic".to_string(),
            ..RedactionConfig::default()
        };
        assert!(create_redactor(&config).is_err());
    }

    #[test]
    fn test_presidio_requires_urls() {
        let config = RedactionConfig {
            provider: "presidio".to_string(),
            ..RedactionConfig::default()
        };
        assert!(create_redactor(&config).is_err());
    }

    #[test]
    fn test_entity_names() {
        let names: Vec<&str> = PII_ENTITIES.iter().map(EntityType::as_str).collect();
        assert_eq!(
            names,
            vec![
                "PERSON",
                "PHONE_NUMBER",
                "EMAIL_ADDRESS",
                "CREDIT_CARD",
                "LOCATION"
            ]
        );
    }
}
