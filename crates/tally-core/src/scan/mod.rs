//! AI receipt scanning client.
//!
//! Sends a receipt photo to the configured vision provider and parses the
//! structured reply. The provider's reported total is never trusted: the
//! receipt total is always recomputed locally as Σ price × quantity over
//! the line items.

use base64::Engine;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{items_total, AiProvider, AiSettings, Category, Receipt, ReceiptItem};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const GOOGLE_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_RESPONSE_TOKENS: u32 = 1000;

const RECEIPT_PROMPT: &str = r#"Analyze this receipt image and extract its data as JSON.

Reply with exactly this structure and nothing else, no markdown fences:
{
  "storeName": "store name",
  "category": "category code",
  "items": [
    { "name": "item name", "quantity": 1, "price": 0 }
  ],
  "paymentMethod": "payment method",
  "total": 0
}

The category code must be one of:
- food
- shopping
- transport
- entertainment
- daily
- medical
- other

The payment method is usually "cash" or "credit card".
If a field cannot be read, make a reasonable guess or use a default.
Amounts must be plain numbers without currency symbols."#;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("AI scanning is not configured; set an API key first")]
    NotConfigured,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("AI API error: {0}")]
    Api(String),
    #[error("Could not parse the AI response: {0}")]
    UnparsableResponse(String),
}

/// Structured result of one receipt scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub store_name: String,
    pub category: Category,
    pub items: Vec<ReceiptItem>,
    pub payment_method: String,
    /// Locally recomputed from the items; not the provider's figure
    pub total: f64,
}

impl ScanResult {
    /// Build a receipt from this scan, dated now
    #[must_use]
    pub fn into_receipt(self) -> Receipt {
        Receipt::new(
            self.store_name,
            self.category,
            self.items,
            self.payment_method,
        )
    }
}

/// Client for the AI vision providers
#[derive(Clone)]
pub struct ScanClient {
    client: reqwest::Client,
}

impl ScanClient {
    pub fn new() -> Result<Self, ScanError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }

    /// Analyze a receipt image. `mime_type` is e.g. `image/jpeg`.
    pub async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        settings: &AiSettings,
    ) -> Result<ScanResult, ScanError> {
        if !settings.is_configured() {
            return Err(ScanError::NotConfigured);
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let raw = match settings.provider {
            AiProvider::OpenAi => self.call_openai(&encoded, mime_type, settings).await?,
            AiProvider::Anthropic => self.call_anthropic(&encoded, mime_type, settings).await?,
            AiProvider::Google => self.call_google(&encoded, mime_type, settings).await?,
        };
        parse_scan_response(&raw)
    }

    async fn call_openai(
        &self,
        image_b64: &str,
        mime_type: &str,
        settings: &AiSettings,
    ) -> Result<String, ScanError> {
        let payload = serde_json::json!({
            "model": settings.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": RECEIPT_PROMPT },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:{mime_type};base64,{image_b64}") }
                    }
                ]
            }],
            "max_tokens": MAX_RESPONSE_TOKENS,
        });

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&settings.api_key)
            .json(&payload)
            .send()
            .await?;
        let body = Self::expect_success(response).await?;

        #[derive(Deserialize)]
        struct Completion {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            content: String,
        }

        let completion: Completion = serde_json::from_str(&body)
            .map_err(|error| ScanError::UnparsableResponse(error.to_string()))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ScanError::UnparsableResponse("response had no choices".to_string()))
    }

    async fn call_anthropic(
        &self,
        image_b64: &str,
        mime_type: &str,
        settings: &AiSettings,
    ) -> Result<String, ScanError> {
        let payload = serde_json::json!({
            "model": settings.model,
            "max_tokens": MAX_RESPONSE_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": mime_type,
                            "data": image_b64
                        }
                    },
                    { "type": "text", "text": RECEIPT_PROMPT }
                ]
            }],
        });

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &settings.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await?;
        let body = Self::expect_success(response).await?;

        #[derive(Deserialize)]
        struct Reply {
            content: Vec<ContentBlock>,
        }
        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }

        let reply: Reply = serde_json::from_str(&body)
            .map_err(|error| ScanError::UnparsableResponse(error.to_string()))?;
        reply
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| ScanError::UnparsableResponse("response had no text block".to_string()))
    }

    async fn call_google(
        &self,
        image_b64: &str,
        mime_type: &str,
        settings: &AiSettings,
    ) -> Result<String, ScanError> {
        let payload = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": RECEIPT_PROMPT },
                    { "inline_data": { "mime_type": mime_type, "data": image_b64 } }
                ]
            }],
        });

        let url = format!(
            "{GOOGLE_API_BASE}/{}:generateContent?key={}",
            settings.model, settings.api_key
        );
        let response = self.client.post(url).json(&payload).send().await?;
        let body = Self::expect_success(response).await?;

        #[derive(Deserialize)]
        struct Reply {
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            content: CandidateContent,
        }
        #[derive(Deserialize)]
        struct CandidateContent {
            parts: Vec<Part>,
        }
        #[derive(Deserialize)]
        struct Part {
            text: Option<String>,
        }

        let reply: Reply = serde_json::from_str(&body)
            .map_err(|error| ScanError::UnparsableResponse(error.to_string()))?;
        reply
            .candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.parts)
            .find_map(|part| part.text)
            .ok_or_else(|| ScanError::UnparsableResponse("response had no candidates".to_string()))
    }

    async fn expect_success(response: reqwest::Response) -> Result<String, ScanError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body);
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            error: Option<ErrorDetail>,
        }
        #[derive(Deserialize)]
        struct ErrorDetail {
            message: Option<String>,
        }

        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|payload| payload.error)
            .and_then(|detail| detail.message)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        Err(ScanError::Api(message))
    }
}

/// Parse a provider reply into a [`ScanResult`].
///
/// Tolerates markdown fences and prose around the JSON object and coerces
/// loosely typed fields; fails only when no parseable object is present.
/// The total is recomputed from the items regardless of what the provider
/// reported.
pub fn parse_scan_response(raw: &str) -> Result<ScanResult, ScanError> {
    let json_str = extract_json_object(raw)
        .ok_or_else(|| ScanError::UnparsableResponse("no JSON object in response".to_string()))?;
    let value: Value = serde_json::from_str(&json_str)
        .map_err(|error| ScanError::UnparsableResponse(error.to_string()))?;

    let store_name = value
        .get("storeName")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("Unknown store")
        .to_string();

    let category = value
        .get("category")
        .and_then(Value::as_str)
        .and_then(|raw_category| raw_category.parse::<Category>().ok())
        .unwrap_or(Category::Other);

    let items: Vec<ReceiptItem> = value
        .get("items")
        .and_then(Value::as_array)
        .map(|raw_items| {
            raw_items
                .iter()
                .map(|item| ReceiptItem {
                    name: item
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .unwrap_or("Unknown item")
                        .to_string(),
                    quantity: coerce_u32(item.get("quantity")).unwrap_or(1),
                    price: coerce_f64(item.get("price")).unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default();

    let payment_method = value
        .get("paymentMethod")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|method| !method.is_empty())
        .unwrap_or("cash")
        .to_string();

    // The local sum is authoritative; the provider's total is only checked
    // for logging.
    let total = items_total(&items);
    if let Some(reported) = coerce_f64(value.get("total")) {
        if (reported - total).abs() > 0.01 {
            tracing::warn!(reported, computed = total, "Provider total disagrees with item sum");
        }
    }

    Ok(ScanResult {
        store_name,
        category,
        items,
        payment_method,
        total,
    })
}

/// Pull the JSON object out of a reply that may wrap it in markdown fences
/// or prose.
fn extract_json_object(raw: &str) -> Option<String> {
    let fenced = Regex::new(r"(?s)```(?:json)?\s*(.*?)```")
        .ok()
        .and_then(|fence| {
            fence
                .captures(raw)
                .and_then(|captures| captures.get(1))
                .map(|capture| capture.as_str().to_string())
        });
    let candidate = fenced.unwrap_or_else(|| raw.to_string());

    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end < start {
        return None;
    }
    Some(candidate[start..=end].to_string())
}

fn coerce_u32(value: Option<&Value>) -> Option<u32> {
    let value = value?;
    if let Some(number) = value.as_u64() {
        return u32::try_from(number).ok();
    }
    if let Some(number) = value.as_f64() {
        if number >= 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            return Some(number.round() as u32);
        }
    }
    value.as_str()?.trim().parse().ok()
}

fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    if let Some(number) = value.as_f64() {
        return Some(number);
    }
    value.as_str()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_plain_json() {
        let result = parse_scan_response(
            r#"{
                "storeName": "7-ELEVEN",
                "category": "food",
                "items": [
                    { "name": "Onigiri", "quantity": 2, "price": 35 },
                    { "name": "Milk", "quantity": 1, "price": 45 }
                ],
                "paymentMethod": "cash",
                "total": 115
            }"#,
        )
        .unwrap();
        assert_eq!(result.store_name, "7-ELEVEN");
        assert_eq!(result.category, Category::Food);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.total, 115.0);
    }

    #[test]
    fn test_parse_strips_markdown_fences_and_prose() {
        let raw = "Here is the receipt data:\n```json\n{\"storeName\": \"Cafe\", \"category\": \"food\", \"items\": [], \"paymentMethod\": \"cash\", \"total\": 0}\n```\nLet me know if you need anything else.";
        let result = parse_scan_response(raw).unwrap();
        assert_eq!(result.store_name, "Cafe");
    }

    #[test]
    fn test_parse_recomputes_total_ignoring_upstream() {
        let result = parse_scan_response(
            r#"{
                "storeName": "Shop",
                "category": "shopping",
                "items": [{ "name": "Widget", "quantity": 3, "price": 10 }],
                "paymentMethod": "credit card",
                "total": 9999
            }"#,
        )
        .unwrap();
        // 3 x 10, never the reported 9999
        assert_eq!(result.total, 30.0);
    }

    #[test]
    fn test_parse_coerces_string_numbers_and_defaults() {
        let result = parse_scan_response(
            r#"{
                "storeName": "",
                "category": "snacks",
                "items": [{ "name": "", "quantity": "2", "price": "12.5" }],
                "paymentMethod": ""
            }"#,
        )
        .unwrap();
        assert_eq!(result.store_name, "Unknown store");
        assert_eq!(result.category, Category::Other);
        assert_eq!(result.items[0].name, "Unknown item");
        assert_eq!(result.items[0].quantity, 2);
        assert_eq!(result.items[0].price, 12.5);
        assert_eq!(result.payment_method, "cash");
        assert_eq!(result.total, 25.0);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_scan_response("I could not read this image, sorry."),
            Err(ScanError::UnparsableResponse(_))
        ));
    }

    #[test]
    fn test_into_receipt_keeps_recomputed_total() {
        let result = parse_scan_response(
            r#"{
                "storeName": "Shop",
                "category": "daily",
                "items": [
                    { "name": "Soap", "quantity": 2, "price": 30 },
                    { "name": "Sponge", "quantity": 1, "price": 25 }
                ],
                "paymentMethod": "cash",
                "total": 123
            }"#,
        )
        .unwrap();
        let receipt = result.into_receipt();
        assert_eq!(receipt.total, 85.0);
        assert_eq!(receipt.category, Category::Daily);
    }
}
