//! Evidence deduplication, quality filtering and capping.

use crate::models::Evidence;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Query parameters that never change which page a URL points at.
pub const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "ref", "ref_src", "mc_cid", "mc_eid", "_hsenc",
    "_hsmi",
];

/// Minimum quality used when none is configured.
pub const DEFAULT_MIN_QUALITY: f64 = 0.3;

/// Tunables for the normalizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizerConfig {
    /// Items scoring below this are dropped.
    pub min_quality: f64,
    /// Drop the whole query string when canonicalizing URLs.
    pub strip_query: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            min_quality: DEFAULT_MIN_QUALITY,
            strip_query: false,
        }
    }
}

/// Canonical form of a URL for duplicate detection.
///
/// Scheme and fragment are ignored, the host is lowercased without a leading
/// `www.`, a trailing slash is trimmed, tracking parameters are removed and
/// the remaining parameters are sorted.
pub fn canonical_url(raw: &str, strip_query: bool) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = url::Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_lowercase();
    };

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
    let path = parsed.path().trim_end_matches('/');

    let mut canonical = format!("{}{}{}", host, port, path);

    if !strip_query {
        let mut pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| {
                !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_ref())
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();

        if !pairs.is_empty() {
            let query = pairs
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            canonical.push('?');
            canonical.push_str(&query);
        }
    }

    canonical
}

/// Content fingerprint of a snippet: SHA-256 of the lowercased text with
/// whitespace collapsed.
pub fn snippet_fingerprint(snippet: &str) -> String {
    let normalized = snippet
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Ranking used everywhere evidence is selected: higher quality first, then
/// earlier retrieval.
fn rank(a: &Evidence, b: &Evidence) -> Ordering {
    b.quality
        .partial_cmp(&a.quality)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.retrieved_at.cmp(&b.retrieved_at))
}

/// Turns raw gathered evidence into the curated set analyzers see.
#[derive(Debug, Clone, Default)]
pub struct EvidenceNormalizer {
    config: NormalizerConfig,
}

impl EvidenceNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    fn dedup_key(&self, evidence: &Evidence) -> Option<String> {
        if let Some(url) = evidence.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Some(format!("url:{}", canonical_url(url, self.config.strip_query)));
        }
        if evidence.snippet.trim().is_empty() {
            return None;
        }
        Some(format!("snippet:{}", snippet_fingerprint(&evidence.snippet)))
    }

    /// Deduplicate, drop low-quality items and keep at most `per_query_cap`
    /// items per originating query.
    pub fn normalize(&self, raw: Vec<Evidence>, per_query_cap: usize) -> Vec<Evidence> {
        let raw_count = raw.len();

        let mut unique: HashMap<String, Evidence> = HashMap::new();
        for mut evidence in raw {
            if !evidence.quality.is_finite() {
                evidence.quality = 0.0;
            }
            evidence.quality = evidence.quality.clamp(0.0, 1.0);

            let Some(key) = self.dedup_key(&evidence) else {
                continue;
            };

            match unique.get(&key) {
                Some(kept) if rank(kept, &evidence) != Ordering::Greater => {}
                _ => {
                    unique.insert(key, evidence);
                }
            }
        }
        let deduped = unique.len();

        let mut by_query: HashMap<String, Vec<Evidence>> = HashMap::new();
        for evidence in unique.into_values() {
            if evidence.quality < self.config.min_quality {
                continue;
            }
            by_query
                .entry(evidence.query.clone())
                .or_default()
                .push(evidence);
        }

        let mut curated: Vec<Evidence> = by_query
            .into_values()
            .flat_map(|mut group| {
                group.sort_by(rank);
                group.truncate(per_query_cap);
                group
            })
            .collect();

        curated.sort_by(|a, b| {
            rank(a, b)
                .then_with(|| a.reference().cmp(&b.reference()))
                .then_with(|| a.query.cmp(&b.query))
        });

        debug!(
            raw = raw_count,
            deduped,
            kept = curated.len(),
            "normalized evidence"
        );

        curated
    }

    /// `normalize`, then cap the whole set at `max_total` best items.
    pub fn curate(
        &self,
        raw: Vec<Evidence>,
        per_query_cap: usize,
        max_total: usize,
    ) -> Vec<Evidence> {
        let mut curated = self.normalize(raw, per_query_cap);
        curated.truncate(max_total);
        curated
    }
}
