//! Live catalog API client.
//!
//! Single-endpoint affiliate API: every call is a GET against the sync
//! gateway with a `method` parameter selecting the operation. Responses
//! arrive wrapped in per-method envelopes that have shifted across API
//! revisions, so parsing walks the known nesting variants instead of
//! trusting one shape. Request signing is handled upstream of this binary
//! and is deliberately absent here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ListingItem, ProductInfo, RawVariantRecord, SkuDetail, VariantSource};
use crate::database_ops::products::num_from;
use crate::util::env::{env_opt, env_parse};
use crate::util::retry::{FetchError, RetryPolicy};

const METHOD_PRODUCT_QUERY: &str = "aliexpress.affiliate.product.query";
const METHOD_PRODUCT_DETAIL: &str = "aliexpress.affiliate.productdetail.get";
const METHOD_SKU_DETAIL: &str = "aliexpress.ds.sku.detail.get";

const LISTING_FIELDS: &str = "product_id,product_title,product_detail_url,\
target_app_sale_price,target_app_sale_price_currency,promotion_link,\
lastest_volume,review_count,first_level_category_id,second_level_category_id";

#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    app_key: Option<String>,
    tracking_id: Option<String>,
    page_size: u32,
    max_pages: u32,
    target_language: String,
    target_currency: String,
    ship_to_country: String,
    policy: RetryPolicy,
    detail_policy: RetryPolicy,
}

impl CatalogClient {
    pub fn from_env() -> Result<Self> {
        let timeout_secs: u64 = env_parse("CATALOG_TIMEOUT_SECS", 18u64);
        let http = reqwest::Client::builder()
            .user_agent("dealtrack/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("building catalog http client")?;
        Ok(Self {
            http,
            base_url: env_opt("CATALOG_BASE_URL")
                .unwrap_or_else(|| "https://api-sg.aliexpress.com/sync".to_string()),
            app_key: env_opt("CATALOG_APP_KEY"),
            tracking_id: env_opt("CATALOG_TRACKING_ID"),
            page_size: env_parse("CATALOG_PAGE_SIZE", 50u32),
            max_pages: env_parse("CATALOG_MAX_PAGES", 200u32),
            target_language: env_opt("CATALOG_LANGUAGE").unwrap_or_else(|| "KO".to_string()),
            target_currency: env_opt("CATALOG_CURRENCY").unwrap_or_else(|| "KRW".to_string()),
            ship_to_country: env_opt("CATALOG_SHIP_TO").unwrap_or_else(|| "KR".to_string()),
            policy: RetryPolicy::default(),
            detail_policy: RetryPolicy::detail_fallback(),
        })
    }

    /// One attempt: GET, classify the status, parse JSON. An OK response
    /// with an unparseable body counts as an empty payload, not an error.
    async fn get_json(&self, method: &str, extra: &[(&str, String)]) -> Result<Value, FetchError> {
        let mut params: Vec<(&str, String)> = vec![("method", method.to_string())];
        if let Some(key) = &self.app_key {
            params.push(("app_key", key.clone()));
        }
        if let Some(tid) = &self.tracking_id {
            params.push(("tracking_id", tid.clone()));
        }
        params.extend(extra.iter().cloned());

        let resp = self
            .http
            .get(&self.base_url)
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await
            .map_err(FetchError::from)?;

        let status = resp.status();
        if status.is_success() {
            let text = resp.text().await.map_err(FetchError::from)?;
            return Ok(serde_json::from_str(&text).unwrap_or(Value::Null));
        }

        let retry_after = resp
            .headers()
            .get("Retry-After")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(300).collect();
        Err(FetchError::from_status(status, &snippet).with_retry_after(retry_after))
    }

    async fn get_json_with_retry(
        &self,
        method: &str,
        extra: &[(&str, String)],
        policy: &RetryPolicy,
    ) -> Result<Value, FetchError> {
        policy.run(|| self.get_json(method, extra)).await
    }
}

// ---------------------------------------------------------------------------
// Response envelope walking

/// Product array under any of the known listing envelopes.
fn parse_products(raw: &Value) -> Vec<Value> {
    let candidates = [
        raw.pointer("/aliexpress_affiliate_product_query_response/resp_result/result/products/product"),
        raw.pointer("/aliexpress_affiliate_productdetail_get_response/resp_result/result/products/product"),
        raw.pointer("/resp_result/result/products/product"),
        raw.pointer("/result/products/product"),
    ];
    for c in candidates.into_iter().flatten() {
        if let Some(arr) = c.as_array() {
            return arr.clone();
        }
    }
    Vec::new()
}

/// Depth-first search for the first object owning `key`. Envelope names
/// shift between API revisions; the payload keys do not.
fn locate<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    match v {
        Value::Object(obj) => {
            if let Some(found) = obj.get(key) {
                return Some(found);
            }
            obj.values().find_map(|child| locate(child, key))
        }
        Value::Array(arr) => arr.iter().find_map(|child| locate(child, key)),
        _ => None,
    }
}

fn id_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn listing_item_from(product: &Value) -> Option<ListingItem> {
    let id = id_string(product.get("product_id"))?;
    Some(ListingItem {
        id,
        promotion_link: product
            .get("promotion_link")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        volume: product
            .get("lastest_volume")
            .and_then(num_from)
            .map(|n| n as i64),
    })
}

fn matches_category(product: &Value, category_ext_id: &str) -> bool {
    let wanted = category_ext_id.trim();
    for key in ["first_level_category_id", "second_level_category_id"] {
        if let Some(found) = id_string(product.get(key)) {
            if found == wanted {
                return true;
            }
        }
    }
    false
}

#[async_trait]
impl VariantSource for CatalogClient {
    async fn category_listing(&self, category_ext_id: &str) -> Result<Vec<ListingItem>> {
        let mut items: Vec<ListingItem> = Vec::new();
        let mut page_no: u32 = 1;
        let mut server_count = 0usize;
        let mut filtered_count = 0usize;

        while page_no <= self.max_pages {
            let extra = [
                ("page_no", page_no.to_string()),
                ("page_size", self.page_size.to_string()),
                ("target_language", self.target_language.clone()),
                ("target_currency", self.target_currency.clone()),
                ("ship_to_country", self.ship_to_country.clone()),
                ("sort", "LAST_VOLUME_DESC".to_string()),
                ("fields", LISTING_FIELDS.to_string()),
                ("category_ids", category_ext_id.to_string()),
            ];
            let raw = self
                .get_json_with_retry(METHOD_PRODUCT_QUERY, &extra, &self.policy)
                .await?;

            if raw.get("error_response").is_some() {
                warn!(category = category_ext_id, page_no, "listing returned error_response; stopping pagination");
                break;
            }

            let products = parse_products(&raw);
            if products.is_empty() {
                break;
            }
            server_count += products.len();

            // The server sometimes over-returns outside the requested
            // category; keep the matching subset when there is one.
            let matching: Vec<&Value> = products
                .iter()
                .filter(|p| matches_category(p, category_ext_id))
                .collect();
            filtered_count += matching.len();
            let page_items: Vec<&Value> = if matching.is_empty() {
                products.iter().collect()
            } else {
                matching
            };
            items.extend(page_items.into_iter().filter_map(listing_item_from));

            page_no += 1;
        }

        debug!(
            category = category_ext_id,
            pages = page_no - 1,
            server_count,
            filtered_count,
            items = items.len(),
            "category listing fetched"
        );
        Ok(items)
    }

    async fn sku_detail(&self, product_id: &str) -> Result<SkuDetail> {
        let extra = [
            ("product_id", product_id.to_string()),
            ("target_language", self.target_language.clone()),
            ("target_currency", self.target_currency.clone()),
            ("ship_to_country", self.ship_to_country.clone()),
        ];
        let raw = self
            .get_json_with_retry(METHOD_SKU_DETAIL, &extra, &self.policy)
            .await
            .with_context(|| format!("sku detail fetch for {product_id}"))?;

        let info_node = locate(&raw, "ae_item_info").cloned().unwrap_or(Value::Null);
        let info = ProductInfo {
            title: info_node
                .get("title")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            product_score: info_node.get("product_score").and_then(num_from),
            review_number: info_node
                .get("review_number")
                .and_then(num_from)
                .map(|n| n as i64),
            category_l1: id_string(info_node.get("display_category_id_l1")),
            category_l2: id_string(info_node.get("display_category_id_l2")),
        };

        let mut variants: Vec<RawVariantRecord> = Vec::new();
        if let Some(list) = locate(&raw, "traffic_sku_info_list").and_then(|v| v.as_array()) {
            for entry in list {
                match serde_json::from_value::<RawVariantRecord>(entry.clone()) {
                    Ok(rec) => variants.push(rec),
                    Err(err) => {
                        debug!(product_id, error = %err, "skipping malformed sku record");
                    }
                }
            }
        }

        Ok(SkuDetail { info, variants })
    }

    async fn product_brief(&self, product_id: &str) -> Result<Option<ListingItem>> {
        let extra = [
            ("product_ids", product_id.to_string()),
            ("target_language", self.target_language.clone()),
            ("target_currency", self.target_currency.clone()),
            ("fields", LISTING_FIELDS.to_string()),
        ];
        let raw = self
            .get_json_with_retry(METHOD_PRODUCT_DETAIL, &extra, &self.detail_policy)
            .await
            .with_context(|| format!("product brief fetch for {product_id}"))?;
        Ok(parse_products(&raw).first().and_then(listing_item_from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_products_across_envelope_variants() {
        let wrapped = json!({
            "aliexpress_affiliate_product_query_response": {
                "resp_result": {"result": {"products": {"product": [{"product_id": 1}]}}}
            }
        });
        assert_eq!(parse_products(&wrapped).len(), 1);

        let bare = json!({"result": {"products": {"product": [{"product_id": 1}, {"product_id": 2}]}}});
        assert_eq!(parse_products(&bare).len(), 2);

        assert!(parse_products(&Value::Null).is_empty());
    }

    #[test]
    fn listing_item_tolerates_numeric_and_string_ids() {
        let num = json!({"product_id": 1005001, "lastest_volume": "170", "promotion_link": "x"});
        let item = listing_item_from(&num).unwrap();
        assert_eq!(item.id, "1005001");
        assert_eq!(item.volume, Some(170));

        let s = json!({"product_id": "1005002"});
        assert_eq!(listing_item_from(&s).unwrap().id, "1005002");

        assert!(listing_item_from(&json!({"promotion_link": "x"})).is_none());
    }

    #[test]
    fn category_matching_checks_both_slots() {
        let p = json!({"first_level_category_id": 6, "second_level_category_id": "200001086"});
        assert!(matches_category(&p, "6"));
        assert!(matches_category(&p, "200001086"));
        assert!(!matches_category(&p, "21"));
    }

    #[test]
    fn locate_finds_nested_payload_keys() {
        let raw = json!({
            "some_response": {"result": {"ae_item_info": {"title": "Gadget"}}}
        });
        let info = locate(&raw, "ae_item_info").unwrap();
        assert_eq!(info["title"], "Gadget");
        assert!(locate(&raw, "missing").is_none());
    }
}
