use std::collections::HashSet;

use url::Url;

use crate::models::{CanonicalRecord, IMAGE_URL, LINK, RawRecord, SERIAL_NO, SourceKey, compute_hash};
use crate::page::{collapse_whitespace, resolve_url};

/// Canonicalization rules shared by admission and page signatures.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    volatile: HashSet<String>,
}

impl Normalizer {
    /// `volatile` names are compared case-insensitively.
    pub fn new<I, S>(volatile: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            volatile: volatile
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Display fields of `raw`: whitespace collapsed, references made
    /// absolute, `link`/`image_url` appended after the content fields.
    pub fn normalize(&self, raw: RawRecord, base: Option<&Url>) -> NormalizedRecord {
        let mut fields: Vec<(String, String)> = raw
            .fields
            .into_iter()
            .map(|(name, value)| (collapse_whitespace(&name), collapse_whitespace(&value)))
            .collect();

        // Unresolvable references (javascript:, bare fragments) are dropped.
        if let Some(link) = raw.link.and_then(|l| resolve_url(base, &l)) {
            fields.push((LINK.to_string(), link));
        }
        if let Some(image) = raw.image_url.and_then(|i| resolve_url(base, &i)) {
            fields.push((IMAGE_URL.to_string(), image));
        }

        let fingerprint = self.fingerprint(&fields);
        NormalizedRecord {
            source: raw.source,
            fields,
            fingerprint,
        }
    }

    /// SHA-256 over sorted, lower-cased `name=value` pairs.
    ///
    /// Empty values are skipped, so a missing field and an empty one hash
    /// alike; `serial_no` and volatile fields never contribute.
    pub fn fingerprint(&self, fields: &[(String, String)]) -> String {
        let mut pairs: Vec<(String, String)> = fields
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.to_lowercase(), value.to_lowercase()))
            .filter(|(name, _)| name != SERIAL_NO && !self.volatile.contains(name))
            .collect();
        pairs.sort();

        let mut canonical = String::new();
        for (name, value) in pairs {
            canonical.push_str(&name);
            canonical.push('=');
            canonical.push_str(&value);
            canonical.push('\u{1f}');
        }
        compute_hash(&canonical)
    }
}

/// A record after normalization, before admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub source: SourceKey,
    pub fields: Vec<(String, String)>,
    pub fingerprint: String,
}

impl NormalizedRecord {
    fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_empty())
    }
}

/// Outcome of [`Deduplicator::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(CanonicalRecord),
    /// Fingerprint already seen this session.
    Rejected { fingerprint: String },
    /// Nothing but empty cells (spacer rows).
    Blank { fingerprint: String },
}

impl Admission {
    pub fn fingerprint(&self) -> &str {
        match self {
            Admission::Admitted(record) => &record.fingerprint,
            Admission::Rejected { fingerprint } | Admission::Blank { fingerprint } => fingerprint,
        }
    }
}

/// Session-scoped seen-set and serial counter.
///
/// Created by the session, dropped with it; never shared across sessions.
#[derive(Debug)]
pub struct Deduplicator {
    normalizer: Normalizer,
    seen: HashSet<String>,
    last_serial: u64,
    rejected: u64,
}

impl Deduplicator {
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            normalizer,
            seen: HashSet::new(),
            last_serial: 0,
            rejected: 0,
        }
    }

    /// Normalize `raw` and admit it unless its fingerprint was seen before.
    ///
    /// Admitted records get the next `serial_no`, so serials have no gaps.
    pub fn admit(&mut self, raw: RawRecord, base: Option<&Url>) -> Admission {
        let normalized = self.normalizer.normalize(raw, base);
        if normalized.is_blank() {
            return Admission::Blank {
                fingerprint: normalized.fingerprint,
            };
        }
        if !self.seen.insert(normalized.fingerprint.clone()) {
            self.rejected += 1;
            tracing::debug!(
                source = %normalized.source,
                fingerprint = %normalized.fingerprint,
                "Duplicate record rejected"
            );
            return Admission::Rejected {
                fingerprint: normalized.fingerprint,
            };
        }

        self.last_serial += 1;
        Admission::Admitted(CanonicalRecord {
            serial_no: self.last_serial,
            source: normalized.source,
            fields: normalized.fields,
            fingerprint: normalized.fingerprint,
            image: None,
        })
    }

    pub fn admitted(&self) -> u64 {
        self.last_serial
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }
}
