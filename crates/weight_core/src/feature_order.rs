//! Canonical feature ordering shared by the trainer and the scoring runtime
//!
//! The order is discovered from the runtime's own Go source (the
//! `getDefaultFeatureOrder` map literal) or from a versioned JSON schema, and
//! falls back to a fixed, versioned default when the declaration is absent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::errors::{OrderDefect, Result, WeightError};

/// Default order used when the source declaration cannot be extracted.
pub const FALLBACK_FEATURE_ORDER: [&str; 21] = [
    "success",
    "failure",
    "connect_time",
    "latency",
    "upload_mb",
    "download_mb",
    "duration_minutes",
    "last_used_seconds",
    "is_udp",
    "is_tcp",
    "asn_feature",
    "country_feature",
    "address_feature",
    "port_feature",
    "traffic_ratio",
    "traffic_density",
    "connection_type_feature",
    "asn_hash",
    "host_hash",
    "ip_hash",
    "geoip_hash",
];

/// Version written into and accepted from feature schema files
pub const SCHEMA_VERSION: u32 = 1;

static DECLARATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)func\s+getDefaultFeatureOrder\(\)\s*map\[int\]string\s*\{\s*return\s+map\[int\]string\s*\{(.*?)\}\s*\}",
    )
    .expect("declaration pattern is valid")
});

static ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\d+):\s*"([^"]+)""#).expect("entry pattern is valid"));

/// Names must survive `feature_names=` (space separated) and the
/// `index:name,` / `index=name` metadata lines unchanged.
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("name pattern is valid"));

/// Immutable index-to-name feature ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureOrder {
    names: Vec<String>,
}

impl FeatureOrder {
    /// Build an order from names already in index order.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(WeightError::MalformedFeatureOrder(OrderDefect::NoEntries));
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !NAME_RE.is_match(name) {
                return Err(WeightError::MalformedFeatureOrder(OrderDefect::InvalidName(
                    name.clone(),
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(WeightError::MalformedFeatureOrder(OrderDefect::DuplicateName(
                    name.clone(),
                )));
            }
        }

        Ok(Self { names })
    }

    /// Build an order from `(index, name)` pairs in any order.
    ///
    /// Indices must form exactly `0..N`; gaps and duplicates are rejected.
    pub fn from_indexed_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, String)>,
    {
        let mut by_index = BTreeMap::new();
        for (idx, name) in pairs {
            if by_index.insert(idx, name).is_some() {
                return Err(WeightError::MalformedFeatureOrder(OrderDefect::DuplicateIndex(idx)));
            }
        }

        for (expected, &found) in by_index.keys().enumerate() {
            if expected != found {
                return Err(WeightError::MalformedFeatureOrder(OrderDefect::IndexGap {
                    expected,
                    found,
                }));
            }
        }

        Self::from_names(by_index.into_values())
    }

    /// The fixed 21-feature default order.
    pub fn fallback() -> Self {
        Self {
            names: FALLBACK_FEATURE_ORDER.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Iterate `(index, name)` in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(String::as_str).enumerate()
    }

    /// Render the order as a versioned schema document.
    pub fn to_schema_json(&self) -> Result<String> {
        let schema = FeatureSchema {
            version: SCHEMA_VERSION,
            features: self.names.clone(),
        };
        serde_json::to_string_pretty(&schema)
            .map_err(|e| WeightError::ArtifactWriteFailure(format!("schema serialization: {}", e)))
    }
}

/// Versioned schema file body.
#[derive(Debug, Serialize, Deserialize)]
struct FeatureSchema {
    version: u32,
    features: Vec<String>,
}

/// Where a resolved order came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSource {
    /// Extracted from the Go `getDefaultFeatureOrder` declaration
    Declaration,
    /// Read from a versioned JSON schema file
    Schema,
    /// Declaration absent or empty, default order used
    Fallback,
}

/// A resolved order plus its provenance.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub order: FeatureOrder,
    pub source: OrderSource,
}

/// Resolves the canonical feature order from its source of truth.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureOrderResolver;

impl FeatureOrderResolver {
    pub fn new() -> Self {
        Self
    }

    /// Read and resolve the order from `path`.
    ///
    /// An unreadable file is fatal. Paths ending in `.json` are treated as
    /// schema files; anything else is scanned for the Go declaration.
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> Result<Resolution> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| {
            WeightError::SourceUnreadable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!("Read feature order source: {}", path.display());

        let is_schema = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_schema {
            let order = parse_schema(&content)?;
            info!("Resolved {} features from schema", order.len());
            return Ok(Resolution {
                order,
                source: OrderSource::Schema,
            });
        }

        self.resolve_declaration(&content)
    }

    /// Resolve from Go source text, applying the fallback for absent or
    /// empty declarations.
    pub fn resolve_declaration(&self, content: &str) -> Result<Resolution> {
        match parse_declaration(content) {
            Ok(order) => {
                info!("Resolved {} features from declaration", order.len());
                Ok(Resolution {
                    order,
                    source: OrderSource::Declaration,
                })
            }
            Err(WeightError::MalformedFeatureOrder(defect)) if defect.is_recoverable() => {
                warn!("{}, using fallback feature order", defect);
                Ok(Resolution {
                    order: FeatureOrder::fallback(),
                    source: OrderSource::Fallback,
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// Extract the order from the `getDefaultFeatureOrder` map literal.
pub fn parse_declaration(content: &str) -> Result<FeatureOrder> {
    let body = DECLARATION_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .ok_or(WeightError::MalformedFeatureOrder(OrderDefect::DeclarationMissing))?;

    let mut pairs = Vec::new();
    for caps in ENTRY_RE.captures_iter(body.as_str()) {
        let idx = caps[1].parse::<usize>().map_err(|_| {
            WeightError::MalformedFeatureOrder(OrderDefect::InvalidIndex(caps[1].to_string()))
        })?;
        pairs.push((idx, caps[2].to_string()));
    }

    if pairs.is_empty() {
        return Err(WeightError::MalformedFeatureOrder(OrderDefect::NoEntries));
    }

    FeatureOrder::from_indexed_pairs(pairs)
}

/// Parse a versioned JSON schema file.
pub fn parse_schema(content: &str) -> Result<FeatureOrder> {
    let schema: FeatureSchema = serde_json::from_str(content).map_err(|e| {
        WeightError::MalformedFeatureOrder(OrderDefect::InvalidSchema(e.to_string()))
    })?;

    if schema.version != SCHEMA_VERSION {
        return Err(WeightError::MalformedFeatureOrder(OrderDefect::InvalidSchema(format!(
            "unsupported version {}",
            schema.version
        ))));
    }

    match FeatureOrder::from_names(schema.features) {
        Err(WeightError::MalformedFeatureOrder(OrderDefect::NoEntries)) => Err(
            WeightError::MalformedFeatureOrder(OrderDefect::InvalidSchema("empty feature list".into())),
        ),
        other => other,
    }
}
