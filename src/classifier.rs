// Classifier - turns one document into tags, captured values and composite notes
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::locator::mask_comments;
use crate::patterns::{Family, PatternRegistry};

/// Diagnostic derived from co-occurring tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Note {
    LikelyDuplicateBanner,
    HardNo,
    LegacyOnly,
    BrokenWiring,
    InlineStorageWithoutCanonJs,
}

impl Note {
    pub const ALL: [Note; 5] = [
        Note::LikelyDuplicateBanner,
        Note::HardNo,
        Note::LegacyOnly,
        Note::BrokenWiring,
        Note::InlineStorageWithoutCanonJs,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Note::LikelyDuplicateBanner => "LIKELY_DUPLICATE_BANNER",
            Note::HardNo => "HARD_NO",
            Note::LegacyOnly => "LEGACY_ONLY",
            Note::BrokenWiring => "BROKEN_WIRING",
            Note::InlineStorageWithoutCanonJs => "INLINE_STORAGE_WITHOUT_CANON_JS",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Note::LikelyDuplicateBanner => "legacy banner container present + canonical script included",
            Note::HardNo => "inline consent handler definitions + canonical script included",
            Note::LegacyOnly => "legacy banner container present, canonical script NOT included",
            Note::BrokenWiring => "consent handlers called but no include and no inline definitions",
            Note::InlineStorageWithoutCanonJs => {
                "localStorage.setItem present but canonical script not included"
            }
        }
    }
}

impl std::fmt::Display for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// Which families matched, as seen by the co-occurrence rules
#[derive(Debug, Clone, Copy, Default)]
struct Presence {
    structural: bool,
    include: bool,
    inline_definition: bool,
    invocation: bool,
    storage: bool,
}

impl Presence {
    fn from_families(families: &BTreeSet<Family>) -> Self {
        Self {
            structural: families.contains(&Family::Structural),
            include: families.contains(&Family::CanonicalInclude),
            inline_definition: families.contains(&Family::InlineDefinition),
            invocation: families.contains(&Family::Invocation),
            storage: families.contains(&Family::StorageKey),
        }
    }
}

type NoteRule = (Note, fn(&Presence) -> bool);

const NOTE_RULES: &[NoteRule] = &[
    (Note::LikelyDuplicateBanner, |p| p.structural && p.include),
    (Note::HardNo, |p| p.inline_definition && p.include),
    (Note::LegacyOnly, |p| p.structural && !p.include),
    (Note::BrokenWiring, |p| {
        p.invocation && !p.include && !p.inline_definition
    }),
    (Note::InlineStorageWithoutCanonJs, |p| p.storage && !p.include),
];

/// Classification result for one document
#[derive(Debug, Clone, Default, Serialize)]
pub struct Finding {
    /// Matched tags in first-seen order
    pub tags: Vec<String>,
    /// Captured values per capturing tag, in match order
    pub captures: BTreeMap<String, Vec<String>>,
    pub notes: Vec<Note>,
    pub info: Vec<String>,
    #[serde(skip)]
    families: BTreeSet<Family>,
}

impl Finding {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn has_family(&self, family: Family) -> bool {
        self.families.contains(&family)
    }

    pub fn captured(&self, tag: &str) -> &[String] {
        self.captures.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.notes.is_empty() && self.info.is_empty()
    }
}

pub struct Classifier<'a> {
    registry: &'a PatternRegistry,
}

impl<'a> Classifier<'a> {
    pub fn new(registry: &'a PatternRegistry) -> Self {
        Self { registry }
    }

    /// Evaluate every pattern family against `text`. Never mutates input and
    /// never fails: no match is a valid, empty finding.
    pub fn classify(&self, text: &str) -> Finding {
        let mut finding = Finding::default();
        let mut masked: Option<String> = None;
        let mut hits: Vec<(usize, usize, &str)> = Vec::new();

        for (index, pattern) in self.registry.patterns().iter().enumerate() {
            let haystack: &str = if pattern.family.is_strict() {
                masked.get_or_insert_with(|| mask_comments(text)).as_str()
            } else {
                text
            };

            if pattern.family.captures() {
                let mut first = None;
                let values: Vec<String> = pattern
                    .regex
                    .captures_iter(haystack)
                    .filter_map(|caps| {
                        let whole = caps.get(0)?;
                        first.get_or_insert(whole.start());
                        caps.get(1).map(|m| m.as_str().to_string())
                    })
                    .collect();
                if let Some(offset) = first {
                    hits.push((offset, index, pattern.name.as_str()));
                    finding.families.insert(pattern.family);
                    finding.captures.insert(pattern.name.clone(), values);
                }
            } else if let Some(m) = pattern.regex.find(haystack) {
                hits.push((m.start(), index, pattern.name.as_str()));
                finding.families.insert(pattern.family);
            }
        }

        hits.sort_unstable();
        finding.tags = hits.into_iter().map(|(_, _, name)| name.to_string()).collect();

        let strict_signal = finding.has_family(Family::StrictSignal);
        for info in self.registry.info_patterns() {
            if info.name == "page_view_word" && strict_signal {
                continue;
            }
            if info.regex.is_match(text) {
                finding.info.push(info.message.to_string());
            }
        }

        let presence = Presence::from_families(&finding.families);
        finding.notes = NOTE_RULES
            .iter()
            .filter(|(_, applies)| applies(&presence))
            .map(|(note, _)| *note)
            .collect();

        finding
    }
}
