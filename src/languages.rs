//! Language table for the execution sandbox
//!
//! Callers declare languages loosely ("py", "node_js", "python:3.10");
//! the sandbox only understands canonical keys. This module normalizes
//! whatever the caller sent and resolves it to the entry-point filename
//! and runtime version the sandbox expects.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

/// Canonical language used when the caller declares nothing usable.
const DEFAULT_LANGUAGE: &str = "python";
/// Entry-point filename for languages the table does not know.
const FALLBACK_SOURCE_FILE: &str = "main.txt";
/// Runtime version requested when no pin is configured.
const DEFAULT_VERSION: &str = "latest";

/// Resolved sandbox parameters for one execution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    /// Canonical language key understood by the sandbox
    pub language: String,
    /// Entry-point filename for the sandbox's multi-file convention
    pub source_file: String,
    /// Runtime version to request ("latest" unless pinned)
    pub version: String,
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageSpec {
    source_file: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

struct LanguageTable {
    /// Canonical key -> (source file, version)
    specs: HashMap<String, (String, String)>,
    /// Alias -> canonical key
    aliases: HashMap<String, String>,
}

/// Global language table
static LANGUAGES: OnceLock<LanguageTable> = OnceLock::new();

fn table() -> &'static LanguageTable {
    LANGUAGES.get_or_init(|| {
        if let Ok(path) = std::env::var("LANGUAGES_CONFIG") {
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|content| parse_table(&content))
            {
                Ok(loaded) => return loaded,
                Err(e) => {
                    warn!(
                        "Failed to load language table from {}: {:#}. Using built-in table.",
                        path, e
                    );
                }
            }
        }

        let embedded = include_str!("../files/languages.toml");
        parse_table(embedded).expect("embedded language table is well-formed")
    })
}

fn parse_table(content: &str) -> anyhow::Result<LanguageTable> {
    let raw: HashMap<String, RawLanguageSpec> =
        toml::from_str(content).context("Invalid language table")?;

    let mut specs = HashMap::new();
    let mut aliases = HashMap::new();

    for (name, spec) in raw {
        let name = name.to_lowercase();
        for alias in &spec.aliases {
            aliases.insert(alias.to_lowercase(), name.clone());
        }
        let version = spec.version.unwrap_or_else(|| DEFAULT_VERSION.to_string());
        specs.insert(name, (spec.source_file, version));
    }

    Ok(LanguageTable { specs, aliases })
}

/// Normalize a caller-declared language to a canonical key.
///
/// Lower-cases, collapses `_` and spaces to `-`, strips anything after
/// the first `-`/`:`/`@` delimiter (version or dialect suffixes like
/// "python:3.10" or "node_js"), then resolves aliases. Empty or absent
/// input falls back to the default language; unknown keys pass through
/// unchanged so the sandbox gets to reject them itself.
pub fn normalize_language(language: &str) -> String {
    let mut cleaned = language.trim().to_lowercase();
    if cleaned.is_empty() {
        return DEFAULT_LANGUAGE.to_string();
    }

    cleaned = cleaned.replace(['_', ' '], "-");
    if let Some(idx) = cleaned.find(['-', ':', '@']) {
        if idx > 0 {
            cleaned.truncate(idx);
        }
    }

    let cleaned = cleaned.trim_matches('-').to_string();
    if cleaned.is_empty() {
        return DEFAULT_LANGUAGE.to_string();
    }

    match table().aliases.get(&cleaned) {
        Some(canonical) => canonical.clone(),
        None => cleaned,
    }
}

/// Resolve a caller-declared language to full sandbox parameters.
pub fn resolve(language: &str) -> LanguageSpec {
    let canonical = normalize_language(language);
    let (source_file, version) = match table().specs.get(&canonical) {
        Some((file, version)) => (file.clone(), version.clone()),
        None => (
            FALLBACK_SOURCE_FILE.to_string(),
            DEFAULT_VERSION.to_string(),
        ),
    };

    LanguageSpec {
        language: canonical,
        source_file,
        version,
    }
}

/// Canonical keys of every configured language.
pub fn supported_languages() -> Vec<String> {
    table().specs.keys().cloned().collect()
}
