//! Field extraction from call transcripts and free text
//!
//! The AI collaborator is asked first. When it is not configured, fails, or
//! times out, a deterministic regex extractor takes over. Neither path returns
//! an error: the worst case is an empty [`ExtractionResult`].

use super::ai_client::AiService;
use crate::db::deals::DealPatch;
use crate::pipeline::synthesizer::PLACEHOLDER_NAMES;
use callflow_common::config::AiConfig;
use callflow_common::db::Deal;
use callflow_common::phone::{digits_only, normalize_phone};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Structured fields found in a conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(
        default,
        alias = "customer_name",
        alias = "customerName",
        alias = "clientName",
        alias = "name",
        deserialize_with = "lenient_text"
    )]
    pub client_name: Option<String>,
    #[serde(
        default,
        alias = "clientPhone",
        alias = "phone",
        deserialize_with = "lenient_text"
    )]
    pub client_phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub address: Option<String>,
    #[serde(default, alias = "scheduledAt", deserialize_with = "lenient_text")]
    pub scheduled_at: Option<String>,
    #[serde(
        default,
        alias = "priceAmount",
        alias = "price",
        deserialize_with = "lenient_amount"
    )]
    pub price_amount: Option<f64>,
    #[serde(default, alias = "serviceType", deserialize_with = "lenient_text")]
    pub service_type: Option<String>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self == &ExtractionResult::default()
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_amount(&s),
        _ => None,
    })
}

/// `"3 500,50 руб"` → `3500.5`
fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

/// Which path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionSource {
    Ai,
    Fallback,
    /// Nothing to extract from
    None,
}

impl ExtractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionSource::Ai => "ai",
            ExtractionSource::Fallback => "fallback",
            ExtractionSource::None => "none",
        }
    }
}

/// Extraction output together with its provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub result: ExtractionResult,
    pub source: ExtractionSource,
    /// Raw AI completion, stored as the call's summary
    pub summary: Option<String>,
}

/// Parse the AI completion into an [`ExtractionResult`]
///
/// Tolerates Markdown code fences and prose around the JSON object.
/// Anything unparseable yields an empty result.
pub fn parse_ai_content(content: &str) -> ExtractionResult {
    let object = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => return ExtractionResult::default(),
    };

    match serde_json::from_str::<ExtractionResult>(object) {
        Ok(result) => result,
        Err(e) => {
            debug!(error = %e, "AI completion is not an extraction object");
            ExtractionResult::default()
        }
    }
}

fn re_phone() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\+7|\b[78])?[\s\-(]*\d{3}[\s\-)]*\d{3}[\s\-]?\d{2}[\s\-]?\d{2}\b")
            .expect("phone regex should compile")
    })
}

fn re_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?i:меня\s+зовут|зовут|звонила?|имя|клиентка|клиент)[:,]?\s+([А-ЯЁ][а-яё]+(?:\s+[А-ЯЁ][а-яё]+)?)",
        )
        .expect("name regex should compile")
    })
}

fn re_address() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?i:по\s+адресу|адрес)[:\s]+([^\n;]+)").expect("address regex should compile")
    })
}

fn re_price() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,3}(?:[ \x{00A0}]\d{3})+|\d+)(?:[.,](\d{1,2}))?\s*(?:руб|₽|р\.)")
            .expect("price regex should compile")
    })
}

/// Cut free text at the first sentence end that is not an abbreviation
///
/// `ул. Ленина, д. 5. Завтра` → `ул. Ленина, д. 5`
fn cut_at_sentence_end(text: &str) -> &str {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    for (i, &(pos, c)) in chars.iter().enumerate() {
        if c != '.' {
            continue;
        }
        let followed_by_sentence = chars.get(i + 1).is_some_and(|(_, n)| n.is_whitespace())
            && chars.get(i + 2).is_some_and(|(_, n)| n.is_uppercase());
        if !followed_by_sentence {
            continue;
        }

        let token = text[..pos].rsplit(char::is_whitespace).next().unwrap_or("");
        if token.chars().all(|c| c.is_ascii_digit()) || token.chars().count() > 4 {
            return &text[..pos];
        }
    }
    text
}

/// Deterministic extractor for phone, labeled name, labeled address and price
pub fn fallback_extract(text: &str) -> ExtractionResult {
    let client_phone = re_phone()
        .find_iter(text)
        .filter_map(|m| normalize_phone(m.as_str()))
        .find(|phone| digits_only(phone).len() == 11);

    let client_name = re_name()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let address = re_address()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| {
            cut_at_sentence_end(m.as_str())
                .trim()
                .trim_end_matches(&['.', ','][..])
                .to_string()
        })
        .filter(|a| !a.is_empty());

    let price_amount = re_price().captures(text).and_then(|c| {
        let whole = c.get(1)?.as_str();
        let fraction = c.get(2).map(|m| m.as_str()).unwrap_or("0");
        parse_amount(&format!("{}.{}", whole, fraction))
    });

    ExtractionResult {
        client_name,
        client_phone,
        address,
        scheduled_at: None,
        price_amount,
        service_type: None,
    }
}

/// Runs the AI extraction with a regex fallback
#[derive(Clone)]
pub struct Extractor {
    ai: Arc<dyn AiService>,
    config: Arc<AiConfig>,
}

impl Extractor {
    pub fn new(ai: Arc<dyn AiService>, config: Arc<AiConfig>) -> Self {
        Self { ai, config }
    }

    /// Never fails; degraded paths are logged
    pub async fn extract(&self, text: &str) -> Extraction {
        if text.trim().is_empty() {
            return Extraction {
                result: ExtractionResult::default(),
                source: ExtractionSource::None,
                summary: None,
            };
        }

        if !self.config.has_credentials() {
            debug!("AI credentials not configured, using fallback extractor");
            return Self::fallback(text);
        }

        match tokio::time::timeout(self.config.timeout(), self.ai.extract_fields(text)).await {
            Ok(Ok(content)) => Extraction {
                result: parse_ai_content(&content),
                source: ExtractionSource::Ai,
                summary: Some(content),
            },
            Ok(Err(e)) => {
                warn!(error = %e, "AI extraction failed, using fallback extractor");
                Self::fallback(text)
            }
            Err(_) => {
                warn!(timeout_secs = self.config.timeout_secs, "AI extraction timed out, using fallback extractor");
                Self::fallback(text)
            }
        }
    }

    fn fallback(text: &str) -> Extraction {
        Extraction {
            result: fallback_extract(text),
            source: ExtractionSource::Fallback,
            summary: None,
        }
    }
}

/// Deal fields an extraction may fill, with the names of the fields it fills
///
/// Only empty fields are filled. The name also replaces a placeholder. The
/// phone number is never taken over: it is the deal's correlation key.
pub fn merge_plan(deal: &Deal, result: &ExtractionResult) -> (DealPatch, Vec<String>) {
    let mut patch = DealPatch::default();
    let mut applied = Vec::new();

    let blank = |value: &Option<String>| value.as_deref().map(str::trim).unwrap_or("").is_empty();

    if let Some(name) = &result.client_name {
        let current = deal.customer_name.trim();
        if current.is_empty() || PLACEHOLDER_NAMES.contains(&current) {
            patch.customer_name = Some(name.clone());
            applied.push("customer_name".to_string());
        }
    }
    if result.address.is_some() && blank(&deal.address) {
        patch.address = result.address.clone();
        applied.push("address".to_string());
    }
    if result.scheduled_at.is_some() && blank(&deal.scheduled_at) {
        patch.scheduled_at = result.scheduled_at.clone();
        applied.push("scheduled_at".to_string());
    }
    if result.price_amount.is_some() && deal.price_amount.is_none() {
        patch.price_amount = result.price_amount;
        applied.push("price_amount".to_string());
    }
    if result.service_type.is_some() && blank(&deal.service_type) {
        patch.service_type = result.service_type.clone();
        applied.push("service_type".to_string());
    }

    (patch, applied)
}
