//! Upstream catalog collaborator: raw record shapes, the `VariantSource`
//! seam the orchestrator drives, and share-link compaction.

pub mod client;

pub use client::CatalogClient;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::database_ops::products::{num_from, VariantObservation, DEFAULT_CURRENCY};
use crate::normalization::{canonical_props, color_key, props_compare_key};

/// Affiliate share links all start with one of these hosts; the prefix is
/// stripped before persisting to keep documents small and re-added by the
/// consumer.
pub const SHARE_LINK_PREFIXES: &[&str] = &[
    "https://s.click.aliexpress.com/s/",
    "http://s.click.aliexpress.com/s/",
];

/// Compact a shareable link for storage. Empty or whitespace-only input is
/// treated as absent.
pub fn compact_share_link(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for prefix in SHARE_LINK_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Some(rest.to_string());
        }
    }
    Some(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Raw upstream shapes

/// Variant record as the detail endpoint returns it. Ids arrive as numbers
/// or strings; the properties payload is either structured or a serialized
/// blob needing parse.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVariantRecord {
    #[serde(default)]
    pub sku_id: Option<Value>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub sku_properties: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub sale_price_with_tax: Option<Value>,
    #[serde(default)]
    pub link: Option<String>,
}

impl RawVariantRecord {
    pub fn sku_id_string(&self) -> String {
        match &self.sku_id {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    /// Normalize into the storage-ready observation: comparison keys built,
    /// price parsed (rejected when not a positive number), link compacted.
    pub fn to_observation(&self) -> VariantObservation {
        let props = self.sku_properties.clone().unwrap_or(Value::Null);
        let sp_raw = match &props {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        VariantObservation {
            sid: self.sku_id_string(),
            color_key: color_key(self.color.as_deref().unwrap_or("")),
            sp_canonical: canonical_props(&props),
            sp_compare_key: props_compare_key(&props),
            sp_raw,
            link: self
                .link
                .as_deref()
                .and_then(compact_share_link),
            currency: self
                .currency
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            sale: self
                .sale_price_with_tax
                .as_ref()
                .and_then(num_from)
                .filter(|n| *n > 0.0),
        }
    }
}

/// One product as the category listing endpoint returns it.
#[derive(Debug, Clone)]
pub struct ListingItem {
    pub id: String,
    pub promotion_link: Option<String>,
    pub volume: Option<i64>,
}

/// Product-level fields from the detail endpoint.
#[derive(Debug, Clone, Default)]
pub struct ProductInfo {
    pub title: Option<String>,
    pub product_score: Option<f64>,
    pub review_number: Option<i64>,
    pub category_l1: Option<String>,
    pub category_l2: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SkuDetail {
    pub info: ProductInfo,
    pub variants: Vec<RawVariantRecord>,
}

/// The upstream variant source the orchestrator consumes. Implemented by
/// [`CatalogClient`] for the live API and by fixtures in tests.
#[async_trait]
pub trait VariantSource: Send + Sync {
    /// All listing items for one category, already paged to completion.
    async fn category_listing(&self, category_ext_id: &str) -> anyhow::Result<Vec<ListingItem>>;

    /// Full variant detail for one product.
    async fn sku_detail(&self, product_id: &str) -> anyhow::Result<SkuDetail>;

    /// Secondary by-id lookup used to backfill volume/link gaps.
    async fn product_brief(&self, product_id: &str) -> anyhow::Result<Option<ListingItem>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compacts_known_share_link_prefixes() {
        assert_eq!(
            compact_share_link("https://s.click.aliexpress.com/s/abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            compact_share_link("http://s.click.aliexpress.com/s/xyz").as_deref(),
            Some("xyz")
        );
        assert_eq!(
            compact_share_link("https://other.example/deal").as_deref(),
            Some("https://other.example/deal")
        );
        assert_eq!(compact_share_link("   "), None);
    }

    #[test]
    fn observation_normalizes_and_rejects_bad_prices() {
        let rec: RawVariantRecord = serde_json::from_value(json!({
            "sku_id": 12345,
            "color": "Space Gray",
            "sku_properties": "[{\"색상\": \"그레이\"}]",
            "sale_price_with_tax": "12,900",
            "link": "https://s.click.aliexpress.com/s/deal1"
        }))
        .unwrap();
        let obs = rec.to_observation();
        assert_eq!(obs.sid, "12345");
        assert_eq!(obs.color_key, "spacegray");
        assert_eq!(obs.sale, Some(12900.0));
        assert_eq!(obs.link.as_deref(), Some("deal1"));
        assert_eq!(obs.currency, DEFAULT_CURRENCY);

        let free: RawVariantRecord = serde_json::from_value(json!({
            "sku_id": "9",
            "sale_price_with_tax": 0
        }))
        .unwrap();
        assert_eq!(free.to_observation().sale, None);
    }

    #[test]
    fn malformed_properties_mean_no_properties() {
        let rec: RawVariantRecord = serde_json::from_value(json!({
            "sku_id": "1",
            "sku_properties": "half{parsed"
        }))
        .unwrap();
        let obs = rec.to_observation();
        assert_eq!(obs.sp_canonical, "");
        assert_eq!(obs.sp_raw, "half{parsed");
    }
}
