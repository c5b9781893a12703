//! Idempotent mutation rules.
//!
//! A rule is a pure `text -> (text, count)` transformation. Rules never touch
//! the filesystem and ask [`crate::locator`] for every structural span.

mod blocks;
mod config_call;
mod functions;
mod include;

pub use blocks::{RemoveBlockByMarker, StripLegacyInlineScripts, StripLegacyLibraries};
pub use config_call::{DedupeProperty, PatchConfigProperty};
pub use functions::{DropScriptLines, RemoveFunctionByName};
pub use include::NormalizeInclude;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::locator::script_regions;
use crate::patterns::PatternError;
use crate::settings::Settings;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Unknown rule: {0}. Run `consentfix rules` to list them")]
    UnknownRule(String),
    #[error("Rule `{0}` needs an argument, e.g. `{0}:name`")]
    MissingArgument(&'static str),
    #[error("Unknown profile: {0}. Supported: full, inline-cleanup, page-view, dedupe, mass")]
    UnknownProfile(String),
    #[error("No rules selected")]
    Empty,
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Output of one rule over one text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResult {
    pub text: String,
    pub count: usize,
    pub changed: bool,
}

impl MutationResult {
    pub fn new(original: &str, text: String, count: usize) -> Self {
        let changed = text != original;
        Self {
            text,
            count,
            changed,
        }
    }

    pub fn unchanged(original: &str) -> Self {
        Self {
            text: original.to_string(),
            count: 0,
            changed: false,
        }
    }
}

pub trait MutationRule: Send + Sync {
    /// Stable identifier used in statistics and reports
    fn name(&self) -> &str;

    fn apply(&self, text: &str) -> MutationResult;
}

/// Parsed rule identifier, as written on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleId {
    RemoveBlock(String),
    RemoveFunction(String),
    NormalizeInclude,
    PatchConfig,
    DedupeProperty,
    StripLegacyLibraries,
    StripLegacyInlineScripts,
    DropPageViewEvents,
    DropInlineStorageWrites,
}

impl RuleId {
    /// One line per rule family for `consentfix rules`
    pub const CATALOG: &'static [(&'static str, &'static str)] = &[
        (
            "remove-block:<id>",
            "remove each element carrying id=\"<id>\" through its balanced close tag",
        ),
        (
            "remove-function:<name>",
            "remove `function <name>(...) {...}` from inline scripts",
        ),
        (
            "normalize-include",
            "leave exactly one canonical consent script include before </head>",
        ),
        (
            "patch-config",
            "force the configured property to its safe value in gtag('config', ...) calls",
        ),
        (
            "dedupe-property",
            "keep only the first occurrence of the configured property in gtag config objects",
        ),
        (
            "strip-legacy-libraries",
            "remove external scripts loading legacy consent libraries",
        ),
        (
            "strip-legacy-inline-scripts",
            "remove inline scripts carrying legacy consent wiring",
        ),
        (
            "drop-page-view-events",
            "remove inline script lines firing gtag('event', 'page_view')",
        ),
        (
            "drop-inline-storage-writes",
            "remove inline script lines calling localStorage.setItem(",
        ),
    ];

    /// Instantiate the rule this id names
    pub fn build(&self, settings: &Settings) -> Result<Box<dyn MutationRule>, RuleError> {
        let rule: Box<dyn MutationRule> = match self {
            RuleId::RemoveBlock(id) => Box::new(RemoveBlockByMarker::new(id)?),
            RuleId::RemoveFunction(name) => Box::new(RemoveFunctionByName::new(name)?),
            RuleId::NormalizeInclude => Box::new(NormalizeInclude::new(settings)?),
            RuleId::PatchConfig => Box::new(PatchConfigProperty::new(settings)?),
            RuleId::DedupeProperty => Box::new(DedupeProperty::new(settings)?),
            RuleId::StripLegacyLibraries => Box::new(StripLegacyLibraries::new(settings)?),
            RuleId::StripLegacyInlineScripts => {
                Box::new(StripLegacyInlineScripts::new(settings)?)
            }
            RuleId::DropPageViewEvents => Box::new(DropScriptLines::page_view_events()),
            RuleId::DropInlineStorageWrites => Box::new(DropScriptLines::storage_writes()),
        };
        Ok(rule)
    }
}

impl FromStr for RuleId {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (head, arg) = match s.split_once(':') {
            Some((head, arg)) => (head, Some(arg.trim())),
            None => (s, None),
        };
        let arg = arg.filter(|a| !a.is_empty()).map(str::to_string);

        match (head.to_lowercase().as_str(), arg) {
            ("remove-block", Some(id)) => Ok(RuleId::RemoveBlock(id)),
            ("remove-block", None) => Err(RuleError::MissingArgument("remove-block")),
            ("remove-function", Some(name)) => Ok(RuleId::RemoveFunction(name)),
            ("remove-function", None) => Err(RuleError::MissingArgument("remove-function")),
            ("normalize-include", None) => Ok(RuleId::NormalizeInclude),
            ("patch-config", None) => Ok(RuleId::PatchConfig),
            ("dedupe-property", None) => Ok(RuleId::DedupeProperty),
            ("strip-legacy-libraries", None) => Ok(RuleId::StripLegacyLibraries),
            ("strip-legacy-inline-scripts", None) => Ok(RuleId::StripLegacyInlineScripts),
            ("drop-page-view-events", None) => Ok(RuleId::DropPageViewEvents),
            ("drop-inline-storage-writes", None) => Ok(RuleId::DropInlineStorageWrites),
            _ => Err(RuleError::UnknownRule(s.to_string())),
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleId::RemoveBlock(id) => write!(f, "remove-block:{}", id),
            RuleId::RemoveFunction(name) => write!(f, "remove-function:{}", name),
            RuleId::NormalizeInclude => f.write_str("normalize-include"),
            RuleId::PatchConfig => f.write_str("patch-config"),
            RuleId::DedupeProperty => f.write_str("dedupe-property"),
            RuleId::StripLegacyLibraries => f.write_str("strip-legacy-libraries"),
            RuleId::StripLegacyInlineScripts => f.write_str("strip-legacy-inline-scripts"),
            RuleId::DropPageViewEvents => f.write_str("drop-page-view-events"),
            RuleId::DropInlineStorageWrites => f.write_str("drop-inline-storage-writes"),
        }
    }
}

/// Named rule sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Legacy banners and handlers out, one include in, config patched
    Full,
    /// Legacy libraries and inline consent scripts out
    InlineCleanup,
    /// No page_view fired before consent
    PageView,
    /// Duplicate config properties collapsed
    Dedupe,
    /// Everything structural, in the order bulk cleanups ran
    Mass,
}

impl Profile {
    pub const ALL: [Profile; 5] = [
        Profile::Full,
        Profile::InlineCleanup,
        Profile::PageView,
        Profile::Dedupe,
        Profile::Mass,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Profile::Full => "full",
            Profile::InlineCleanup => "inline-cleanup",
            Profile::PageView => "page-view",
            Profile::Dedupe => "dedupe",
            Profile::Mass => "mass",
        }
    }

    pub fn rule_ids(&self, settings: &Settings) -> Vec<RuleId> {
        let blocks = settings.legacy_ids.iter().cloned().map(RuleId::RemoveBlock);
        let functions = settings
            .consent_functions
            .iter()
            .cloned()
            .map(RuleId::RemoveFunction);

        match self {
            Profile::Full => blocks
                .chain(functions)
                .chain([RuleId::NormalizeInclude, RuleId::PatchConfig])
                .collect(),
            Profile::InlineCleanup => vec![
                RuleId::StripLegacyLibraries,
                RuleId::StripLegacyInlineScripts,
            ],
            Profile::PageView => vec![
                RuleId::DropPageViewEvents,
                RuleId::PatchConfig,
                RuleId::DropInlineStorageWrites,
            ],
            Profile::Dedupe => vec![RuleId::DedupeProperty],
            Profile::Mass => blocks
                .rev()
                .chain([RuleId::StripLegacyInlineScripts])
                .chain(functions)
                .chain([RuleId::NormalizeInclude, RuleId::StripLegacyLibraries])
                .collect(),
        }
    }
}

impl FromStr for Profile {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Profile::Full),
            "inline-cleanup" | "inline" => Ok(Profile::InlineCleanup),
            "page-view" | "pageview" => Ok(Profile::PageView),
            "dedupe" => Ok(Profile::Dedupe),
            "mass" => Ok(Profile::Mass),
            _ => Err(RuleError::UnknownProfile(s.to_string())),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered, instantiated rules for one run
pub struct RuleSet {
    rules: Vec<Box<dyn MutationRule>>,
}

impl RuleSet {
    pub fn from_ids(ids: &[RuleId], settings: &Settings) -> Result<Self, RuleError> {
        if ids.is_empty() {
            return Err(RuleError::Empty);
        }
        let rules = ids
            .iter()
            .map(|id| id.build(settings))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn from_profile(profile: Profile, settings: &Settings) -> Result<Self, RuleError> {
        Self::from_ids(&profile.rule_ids(settings), settings)
    }

    /// Parse a comma-separated `--rules` list
    pub fn parse_list(list: &str) -> Result<Vec<RuleId>, RuleError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(RuleId::from_str)
            .collect()
    }

    pub fn rules(&self) -> &[Box<dyn MutationRule>] {
        &self.rules
    }

    pub fn names(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Widen `[start, end)` to whole lines when the block owns its lines:
/// only blanks before it on its first line and only blanks after it on its
/// last line. The trailing line break goes with the block.
pub(crate) fn widen_to_lines(text: &str, start: usize, end: usize) -> (usize, usize) {
    let bytes = text.as_bytes();
    let line_start = text[..start].rfind('\n').map_or(0, |nl| nl + 1);
    if !bytes[line_start..start].iter().all(|b| *b == b' ' || *b == b'\t') {
        return (start, end);
    }

    let mut after = end;
    while after < bytes.len() && (bytes[after] == b' ' || bytes[after] == b'\t') {
        after += 1;
    }
    match bytes.get(after) {
        None => (line_start, after),
        Some(b'\n') => (line_start, after + 1),
        Some(b'\r') if bytes.get(after + 1) == Some(&b'\n') => (line_start, after + 2),
        Some(b'\r') => (line_start, after + 1),
        _ => (start, end),
    }
}

/// Offset past any whitespace starting at `at`
pub(crate) fn skip_whitespace(text: &str, at: usize) -> usize {
    at + text[at..].len() - text[at..].trim_start().len()
}

/// Delete every range (sorted, non-overlapping) from `text`
pub(crate) fn splice_out(text: &str, ranges: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for &(start, end) in ranges {
        let start = start.max(cursor);
        if start >= end {
            continue;
        }
        out.push_str(&text[cursor..start]);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Run `rewrite` over the body of every inline script. The closure returns
/// the new body and the number of changes it made, or `None` to keep it.
pub(crate) fn rewrite_inline_scripts(
    text: &str,
    mut rewrite: impl FnMut(&str) -> Option<(String, usize)>,
) -> MutationResult {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut count = 0;

    for region in script_regions(text).iter().filter(|r| r.is_inline()) {
        let Some((body, changes)) = rewrite(region.body(text)) else {
            continue;
        };
        if changes == 0 {
            continue;
        }
        out.push_str(&text[cursor..region.body_start]);
        out.push_str(&body);
        cursor = region.body_end;
        count += changes;
    }

    if count == 0 {
        return MutationResult::unchanged(text);
    }
    out.push_str(&text[cursor..]);
    MutationResult::new(text, out, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_id_parsing() {
        assert_eq!(
            "remove-block:cookie-banner".parse::<RuleId>().unwrap(),
            RuleId::RemoveBlock("cookie-banner".to_string())
        );
        assert_eq!(
            " Patch-Config ".parse::<RuleId>().unwrap(),
            RuleId::PatchConfig
        );
        assert!(matches!(
            "remove-function".parse::<RuleId>(),
            Err(RuleError::MissingArgument("remove-function"))
        ));
        assert!(matches!(
            "normalize-include:x".parse::<RuleId>(),
            Err(RuleError::UnknownRule(_))
        ));
        assert!(matches!(
            "explode".parse::<RuleId>(),
            Err(RuleError::UnknownRule(_))
        ));
    }

    #[test]
    fn test_rule_id_display_round_trips_through_parse() {
        for id in Profile::Mass.rule_ids(&Settings::default()) {
            assert_eq!(id.to_string().parse::<RuleId>().unwrap(), id);
        }
    }

    #[test]
    fn test_profile_order() {
        let settings = Settings::default();
        let full: Vec<String> = Profile::Full
            .rule_ids(&settings)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            full,
            vec![
                "remove-block:cookie-banner",
                "remove-block:cookie-consent-layer",
                "remove-function:acceptConsent",
                "remove-function:rejectConsent",
                "normalize-include",
                "patch-config",
            ]
        );

        let mass = Profile::Mass.rule_ids(&settings);
        assert_eq!(
            mass[0],
            RuleId::RemoveBlock("cookie-consent-layer".to_string())
        );
        assert_eq!(mass.last(), Some(&RuleId::StripLegacyLibraries));
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("PAGE-VIEW".parse::<Profile>().unwrap(), Profile::PageView);
        assert!("everything".parse::<Profile>().is_err());
        for profile in Profile::ALL {
            assert_eq!(profile.name().parse::<Profile>().unwrap(), profile);
        }
    }

    #[test]
    fn test_rule_set_from_list() {
        let ids = RuleSet::parse_list("normalize-include, patch-config,,").unwrap();
        let set = RuleSet::from_ids(&ids, &Settings::default()).unwrap();
        assert_eq!(set.names(), vec!["normalize-include", "patch-config"]);
        assert!(matches!(
            RuleSet::from_ids(&[], &Settings::default()),
            Err(RuleError::Empty)
        ));
    }

    #[test]
    fn test_widen_to_lines() {
        let text = "a\n  <div></div>  \nb";
        let start = text.find('<').unwrap();
        let end = text.rfind('>').unwrap() + 1;
        assert_eq!(widen_to_lines(text, start, end), (2, text.len() - 1));

        let inline = "x <b></b> y";
        assert_eq!(widen_to_lines(inline, 2, 9), (2, 9));
    }

    #[test]
    fn test_splice_out() {
        assert_eq!(splice_out("0123456789", &[(1, 3), (5, 6)]), "0346789");
        assert_eq!(splice_out("abc", &[]), "abc");
    }

    #[test]
    fn test_rewrite_skips_external_scripts() {
        let text = r#"<script src="x.js">a</script><script>a</script>"#;
        let result = rewrite_inline_scripts(text, |body| Some((body.replace('a', "b"), 1)));
        assert_eq!(result.text, r#"<script src="x.js">a</script><script>b</script>"#);
        assert_eq!(result.count, 1);
        assert!(result.changed);
    }
}
