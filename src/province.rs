//! ZIP/address -> Italian province resolution (spec.md §4.1 `extract_province`).
//!
//! Three strategies in order: a direct 2-letter code, a ZIP->province sheet
//! lookup (cached 24h), then an LLM fallback. Placeholder addresses
//! short-circuit to `None` ("unknown").

use crate::llm::LlmClient;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tokio::sync::RwLock;

/// The 110-element Italian province code set (107 current provinces plus
/// three historical Sardinian codes still seen in older CRM records).
pub const PROVINCE_CODES: &[&str] = &[
    "AG", "AL", "AN", "AO", "AP", "AQ", "AR", "AT", "AV", "BA", "BG", "BI", "BL", "BN", "BO", "BR",
    "BS", "BT", "BZ", "CA", "CB", "CE", "CH", "CL", "CN", "CO", "CR", "CS", "CT", "CZ", "EN", "FC",
    "FE", "FG", "FI", "FM", "FR", "GE", "GO", "GR", "IM", "IS", "KR", "LC", "LE", "LI", "LO", "LT",
    "LU", "MB", "MC", "ME", "MI", "MN", "MO", "MS", "MT", "NA", "NO", "NU", "OR", "PA", "PC", "PD",
    "PE", "PG", "PI", "PN", "PO", "PR", "PT", "PU", "PV", "PZ", "RA", "RC", "RE", "RG", "RI", "RM",
    "RN", "RO", "SA", "SI", "SO", "SP", "SR", "SS", "SV", "TA", "TE", "TN", "TO", "TP", "TR", "TS",
    "TV", "UD", "VA", "VB", "VC", "VE", "VI", "VR", "VS", "VT", "VV", "OG", "OT", "CI",
];

fn province_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| PROVINCE_CODES.iter().copied().collect())
}

pub fn is_valid_province(code: &str) -> bool {
    province_set().contains(code)
}

const PLACEHOLDER_PATTERNS: &[&str] = &["follow-up call", "address tbd", "tbd", "n/a", "unknown"];

fn is_placeholder_address(address: &str) -> bool {
    let lower = address.to_ascii_lowercase();
    PLACEHOLDER_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Fetches the ZIP->province mapping from the external sheet. Implemented
/// against whatever spreadsheet-style API backs the lookup; the core only
/// needs the resulting map.
#[async_trait::async_trait]
pub trait ZipProvinceSource: Send + Sync {
    async fn fetch(&self) -> Result<HashMap<String, String>, String>;
}

/// Reads the ZIP->province table from a `spreadsheets.values.get`-shaped
/// sheet API (spec.md §6): each row is `[zip, province]`, header row
/// tolerated and skipped.
pub struct GoogleSheetZipProvinceSource {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    range: String,
    api_key: String,
}

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

impl GoogleSheetZipProvinceSource {
    pub fn new(spreadsheet_id: impl Into<String>, range: impl Into<String>, api_key: impl Into<String>) -> Self {
        GoogleSheetZipProvinceSource {
            http: reqwest::Client::new(),
            base_url: SHEETS_API_BASE.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            api_key: api_key.into(),
        }
    }

    /// Points the client at a different sheet-API base — used by
    /// integration tests to target a mock server instead of the real
    /// Sheets API.
    pub fn with_base_url(
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        GoogleSheetZipProvinceSource {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl ZipProvinceSource for GoogleSheetZipProvinceSource {
    async fn fetch(&self) -> Result<HashMap<String, String>, String> {
        let url = format!(
            "{}/{}/values/{}",
            self.base_url, self.spreadsheet_id, self.range
        );
        let resp = self
            .http
            .get(&url)
            .query(&[("key", &self.api_key)])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            return Err(format!("sheet fetch failed with status {}", resp.status()));
        }

        let body: SheetValuesResponse = resp.json().await.map_err(|e| e.to_string())?;
        let mut map = HashMap::new();
        for row in body.values {
            let [zip, province] = row.as_slice() else { continue };
            if zip.chars().all(|c| c.is_ascii_digit()) {
                map.insert(zip.to_string(), province.to_ascii_uppercase());
            }
        }
        Ok(map)
    }
}

#[derive(serde::Deserialize)]
struct SheetValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

const CACHE_TTL: Duration = Duration::hours(24);

/// Process-wide, read-mostly cache for the ZIP->province mapping. Concurrent
/// fetchers may race and double-fetch on expiry; they never corrupt the map
/// since the whole map is swapped atomically under the write lock.
pub struct ProvinceCache {
    state: RwLock<Option<(HashMap<String, String>, DateTime<Utc>)>>,
}

impl ProvinceCache {
    pub fn new() -> Self {
        ProvinceCache {
            state: RwLock::new(None),
        }
    }

    async fn get(&self, source: &dyn ZipProvinceSource) -> HashMap<String, String> {
        {
            let guard = self.state.read().await;
            if let Some((map, fetched_at)) = guard.as_ref() {
                if Utc::now() - *fetched_at < CACHE_TTL {
                    return map.clone();
                }
            }
        }

        let fresh = source.fetch().await.unwrap_or_default();
        let mut guard = self.state.write().await;
        *guard = Some((fresh.clone(), Utc::now()));
        fresh
    }
}

impl Default for ProvinceCache {
    fn default() -> Self {
        Self::new()
    }
}

fn direct_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b([A-Za-z]{2})\b").unwrap())
}

fn zip_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{5})\b").unwrap())
}

/// Resolves a province from a free-text address.
///
/// Strategy order: (a) a direct 2-letter code on a word boundary,
/// (b) every 5-digit sequence looked up against the cached ZIP->province
/// sheet, (c) an LLM asked for the 2-letter code. Each candidate is
/// validated against `PROVINCE_CODES`; an invalid candidate from any
/// strategy is discarded rather than returned.
pub async fn extract_province(
    address: &str,
    cache: &ProvinceCache,
    sheet: &dyn ZipProvinceSource,
    llm: Option<&dyn LlmClient>,
) -> Option<String> {
    if is_placeholder_address(address) {
        return None;
    }

    for cap in direct_code_regex().captures_iter(address) {
        let candidate = cap[1].to_ascii_uppercase();
        if is_valid_province(&candidate) {
            return Some(candidate);
        }
    }

    let zip_map = cache.get(sheet).await;
    for cap in zip_regex().captures_iter(address) {
        let zip = &cap[1];
        if let Some(province) = zip_map.get(zip) {
            let candidate = province.to_ascii_uppercase();
            if is_valid_province(&candidate) {
                return Some(candidate);
            }
        }
    }

    if let Some(llm) = llm {
        if let Some(candidate) = llm.suggest_province_code(address).await {
            let candidate = candidate.trim().to_ascii_uppercase();
            if is_valid_province(&candidate) {
                return Some(candidate);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptySheet;

    #[async_trait::async_trait]
    impl ZipProvinceSource for EmptySheet {
        async fn fetch(&self) -> Result<HashMap<String, String>, String> {
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn placeholder_address_short_circuits() {
        let cache = ProvinceCache::new();
        let sheet = EmptySheet;
        let result = extract_province("Follow-up call", &cache, &sheet, None).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn direct_code_strategy_wins() {
        let cache = ProvinceCache::new();
        let sheet = EmptySheet;
        let result = extract_province("Via Roma 1, 00100 Roma (RM)", &cache, &sheet, None).await;
        assert_eq!(result, Some("RM".to_string()));
    }

    #[tokio::test]
    async fn zip_fallback_used_when_no_direct_code() {
        struct MilanSheet;
        #[async_trait::async_trait]
        impl ZipProvinceSource for MilanSheet {
            async fn fetch(&self) -> Result<HashMap<String, String>, String> {
                Ok(HashMap::from([("20100".to_string(), "MI".to_string())]))
            }
        }
        let cache = ProvinceCache::new();
        let result = extract_province("Via Dante 5, 20100 Milano", &cache, &MilanSheet, None).await;
        assert_eq!(result, Some("MI".to_string()));
    }

    #[test]
    fn result_is_always_a_member_of_the_code_set_or_none() {
        for code in PROVINCE_CODES {
            assert!(is_valid_province(code));
        }
        assert!(!is_valid_province("ZZ"));
    }
}
