// Pattern registry - named regexes grouped into families, built once per run
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use thiserror::Error;

use crate::settings::Settings;

lazy_static::lazy_static! {
    /// `gtag('config', 'G-XXXX'` up to (not including) the next argument or `)`
    pub static ref RX_GTAG_CONFIG_HEAD: Regex = Regex::new(
        r#"(?i)gtag\s*\(\s*['"]config['"]\s*,\s*['"](G-[A-Z0-9]+)['"]\s*"#
    ).expect("valid gtag config regex");

    pub static ref RX_GTAG_CONFIG_ANY: Regex = Regex::new(
        r#"(?i)gtag\s*\(\s*['"]config['"]\s*,"#
    ).expect("valid gtag config regex");

    pub static ref RX_PAGE_VIEW_EVENT: Regex = Regex::new(
        r#"(?i)gtag\s*\(\s*['"]event['"]\s*,\s*['"]page_view['"]"#
    ).expect("valid page_view event regex");

    pub static ref RX_PAGE_VIEW_WORD: Regex = Regex::new(r"(?i)\bpage_view\b")
        .expect("valid page_view word regex");

    pub static ref RX_STORAGE_SET: Regex = Regex::new(r"(?i)localStorage\.setItem\s*\(")
        .expect("valid localStorage regex");

    pub static ref RX_STORAGE_KEY: Regex = Regex::new(
        r#"(?i)localStorage\.setItem\s*\(\s*['"]([^'"]+)['"]"#
    ).expect("valid localStorage key regex");

    pub static ref RX_CONSENT_UPDATE: Regex = Regex::new(
        r#"(?i)gtag\s*\(\s*['"]consent['"]\s*,\s*['"]update['"]"#
    ).expect("valid consent update regex");

    pub static ref RX_CONSENT_DEFAULT: Regex = Regex::new(
        r#"(?i)gtag\s*\(\s*['"]consent['"]\s*,\s*['"]default['"]"#
    ).expect("valid consent default regex");

    /// Trailing `)` and optional `;` of a call
    pub static ref RX_CALL_TAIL: Regex = Regex::new(r"^\s*\)(?:\s*;)?")
        .expect("valid call tail regex");
}

/// Tag of the canonical include family (captures the referenced path)
pub const TAG_INCLUDE: &str = "cookie_consent_js_include";
/// Tag of the storage-key family (captures the key)
pub const TAG_STORAGE_KEYS: &str = "ls_keys";

#[derive(Error, Debug)]
#[error("Could not build pattern `{name}`: {source}")]
pub struct PatternError {
    pub name: String,
    #[source]
    pub source: regex::Error,
}

/// Pattern families recognized by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Attribute marking a legacy banner container
    Structural,
    /// Signature of a competing consent library
    LegacyLibrary,
    /// Consent handler defined inline
    InlineDefinition,
    /// Call to a consent handler, wherever it is defined
    Invocation,
    /// Reference to the canonical script (captures the path)
    CanonicalInclude,
    /// Consent-mode configuration call
    Configuration,
    /// Fully-formed call that fires tracking by default
    StrictSignal,
    /// Persistent storage write (captures the key)
    StorageKey,
}

impl Family {
    pub fn captures(self) -> bool {
        matches!(self, Family::CanonicalInclude | Family::StorageKey)
    }

    /// Strict signals are matched against comment-masked text
    pub fn is_strict(self) -> bool {
        matches!(self, Family::StrictSignal)
    }
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pub name: String,
    pub family: Family,
    pub regex: Regex,
}

impl Pattern {
    fn new(name: impl Into<String>, family: Family, source: &str) -> Result<Self, PatternError> {
        let name = name.into();
        let regex = build(&name, source)?;
        Ok(Self {
            name,
            family,
            regex,
        })
    }

    fn from_static(name: &str, family: Family, regex: &Regex) -> Self {
        Self {
            name: name.to_string(),
            family,
            regex: regex.clone(),
        }
    }
}

/// Informational observation, never a red flag on its own
#[derive(Debug, Clone)]
pub struct InfoPattern {
    pub name: &'static str,
    pub message: &'static str,
    pub regex: Regex,
}

/// Case-insensitive regex with a named error
pub fn build(name: &str, source: &str) -> Result<Regex, PatternError> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .map_err(|source| PatternError {
            name: name.to_string(),
            source,
        })
}

/// `id="value"` with either quote style
pub fn id_marker(id: &str) -> Result<Regex, PatternError> {
    build(
        &format!("id:{}", id),
        &format!(r#"\bid\s*=\s*["']{}["']"#, regex::escape(id)),
    )
}

/// `function name(`
pub fn function_header(name: &str) -> Result<Regex, PatternError> {
    build(
        &format!("function:{}", name),
        &format!(r"\bfunction\s+{}\s*\(", regex::escape(name)),
    )
}

/// Whole `<script src="...marker..."></script>` element
pub fn include_element(marker: &str) -> Result<Regex, PatternError> {
    build(
        "include_element",
        &format!(
            r#"<script\b[^>]*\bsrc\s*=\s*["']([^"']*{}[^"']*)["'][^>]*>\s*</script\s*>"#,
            regex::escape(marker)
        ),
    )
}

/// Whole external `<script>` element loading one of the legacy libraries
pub fn legacy_library_element(libraries: &[String]) -> Result<Regex, PatternError> {
    build(
        "legacy_library_element",
        &format!(
            r#"<script\b[^>]*\bsrc\s*=\s*["'][^"']*(?:{})[^"']*["'][^>]*>\s*</script\s*>"#,
            alternation(libraries)
        ),
    )
}

/// Keywords that mark an inline script as legacy consent wiring
pub fn legacy_inline_keywords(settings: &Settings) -> Result<Regex, PatternError> {
    let calls = settings
        .consent_functions
        .iter()
        .map(|f| format!(r"\b{}\s*\(", regex::escape(f)))
        .collect::<Vec<_>>()
        .join("|");
    let keys = alternation(&settings.legacy_storage_keys);

    let mut parts = Vec::new();
    if !settings.legacy_libraries.is_empty() {
        parts.push(alternation(&settings.legacy_libraries));
    }
    if !calls.is_empty() {
        parts.push(calls);
    }
    if !keys.is_empty() {
        parts.push(format!(
            r#"localStorage\.setItem\s*\(\s*['"](?:{})['"]"#,
            keys
        ));
    }

    if parts.is_empty() {
        // Nothing configured: a class that can never match
        return build("legacy_inline_keywords", r"[^\s\S]");
    }
    build("legacy_inline_keywords", &format!("(?:{})", parts.join("|")))
}

/// `'prop': value` pair with optional key quotes
pub fn property_pair(property: &str) -> Result<Regex, PatternError> {
    build(
        &format!("property:{}", property),
        &format!(
            r#"['"]?\b{}['"]?\s*:\s*([A-Za-z0-9_'"]+)"#,
            regex::escape(property)
        ),
    )
}

fn alternation(items: &[String]) -> String {
    items
        .iter()
        .map(|s| regex::escape(s))
        .collect::<Vec<_>>()
        .join("|")
}

/// Registry of every classification pattern for one run
pub struct PatternRegistry {
    patterns: Vec<Pattern>,
    info: Vec<InfoPattern>,
}

impl PatternRegistry {
    pub fn new(settings: &Settings) -> Result<Self, PatternError> {
        let mut patterns = Vec::new();

        for id in &settings.legacy_ids {
            patterns.push(Pattern {
                name: settings.structural_tag(id),
                family: Family::Structural,
                regex: id_marker(id)?,
            });
        }

        if !settings.legacy_libraries.is_empty() {
            patterns.push(Pattern::new(
                "legacy_cookieconsent_lib",
                Family::LegacyLibrary,
                &alternation(&settings.legacy_libraries),
            )?);
        }

        for function in &settings.consent_functions {
            patterns.push(Pattern {
                name: format!("inline_{}_def", function),
                family: Family::InlineDefinition,
                regex: function_header(function)?,
            });
        }

        for function in &settings.consent_functions {
            patterns.push(Pattern::new(
                format!("{}_call", function),
                Family::Invocation,
                &format!(r"\b{}\s*\(", regex::escape(function)),
            )?);
        }

        patterns.push(Pattern::new(
            TAG_INCLUDE,
            Family::CanonicalInclude,
            &format!(
                r#"<script[^>]+src\s*=\s*["']([^"']*{}[^"']*)["']"#,
                regex::escape(&settings.include_marker)
            ),
        )?);

        patterns.push(Pattern::from_static(
            "consent_update_call",
            Family::Configuration,
            &RX_CONSENT_UPDATE,
        ));
        patterns.push(Pattern::from_static(
            "consent_default_call",
            Family::Configuration,
            &RX_CONSENT_DEFAULT,
        ));

        patterns.push(Pattern::from_static(
            "gtag_page_view_event_call",
            Family::StrictSignal,
            &RX_PAGE_VIEW_EVENT,
        ));
        patterns.push(Pattern::new(
            format!("{}_true", settings.config_property),
            Family::StrictSignal,
            &format!(
                r#"['"]?\b{}['"]?\s*:\s*true\b"#,
                regex::escape(&settings.config_property)
            ),
        )?);

        patterns.push(Pattern::from_static(TAG_STORAGE_KEYS, Family::StorageKey, &RX_STORAGE_KEY));

        let info = vec![
            InfoPattern {
                name: "page_view_word",
                message: "page_view_word_present_but_no_real_page_view_signal (likely comment)",
                regex: RX_PAGE_VIEW_WORD.clone(),
            },
            InfoPattern {
                name: "gtag_config",
                message: "gtag_config_present (OK if send_page_view:false)",
                regex: RX_GTAG_CONFIG_ANY.clone(),
            },
        ];

        Ok(Self { patterns, info })
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn info_patterns(&self) -> &[InfoPattern] {
        &self.info
    }

    pub fn family_of(&self, tag: &str) -> Option<Family> {
        self.patterns
            .iter()
            .find(|p| p.name == tag)
            .map(|p| p.family)
    }

    pub fn get(&self, tag: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.name == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PatternRegistry {
        PatternRegistry::new(&Settings::default()).unwrap()
    }

    #[test]
    fn test_registry_has_every_family() {
        let registry = registry();
        for family in [
            Family::Structural,
            Family::LegacyLibrary,
            Family::InlineDefinition,
            Family::Invocation,
            Family::CanonicalInclude,
            Family::Configuration,
            Family::StrictSignal,
            Family::StorageKey,
        ] {
            assert!(
                registry.patterns().iter().any(|p| p.family == family),
                "missing family {:?}",
                family
            );
        }
    }

    #[test]
    fn test_derived_tag_names() {
        let registry = registry();
        assert_eq!(
            registry.family_of("legacy_div_cookie_banner"),
            Some(Family::Structural)
        );
        assert_eq!(
            registry.family_of("legacy_div_cookie_layer"),
            Some(Family::Structural)
        );
        assert_eq!(registry.family_of("legacy_div_cookie_consent_layer"), None);
        assert_eq!(
            registry.family_of("inline_acceptConsent_def"),
            Some(Family::InlineDefinition)
        );
        assert_eq!(
            registry.family_of("send_page_view_true"),
            Some(Family::StrictSignal)
        );
    }

    #[test]
    fn test_id_marker_quotes() {
        let rx = id_marker("cookie-banner").unwrap();
        assert!(rx.is_match(r#"<div id="cookie-banner">"#));
        assert!(rx.is_match("<div ID = 'cookie-banner'>"));
        assert!(!rx.is_match(r#"<div data-id="cookie-banner-x">"#));
        assert!(!rx.is_match(r#"getElementById('cookie-banner')"#));
    }

    #[test]
    fn test_include_element_captures_path() {
        let rx = include_element("cookie-consent.js").unwrap();
        let caps = rx
            .captures(r#"<script defer src="../assets/js/cookie-consent.js?v=2"></script>"#)
            .unwrap();
        assert_eq!(&caps[1], "../assets/js/cookie-consent.js?v=2");
    }

    #[test]
    fn test_send_page_view_true_accepts_quoted_key() {
        let registry = registry();
        let pattern = registry.get("send_page_view_true").unwrap();
        assert!(pattern.regex.is_match("{ 'send_page_view': true }"));
        assert!(pattern.regex.is_match("{send_page_view:true}"));
        assert!(!pattern.regex.is_match("{ send_page_view: trueish }"));
    }

    #[test]
    fn test_legacy_inline_keywords() {
        let rx = legacy_inline_keywords(&Settings::default()).unwrap();
        assert!(rx.is_match("window.cookieconsent.initialise({})"));
        assert!(rx.is_match("onclick=acceptConsent()"));
        assert!(rx.is_match("localStorage.setItem('cookie_consent', 'yes')"));
        assert!(!rx.is_match("localStorage.setItem('theme', 'dark')"));
    }
}
