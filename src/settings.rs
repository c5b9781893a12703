// Run settings - every site-specific constant the engine is parameterized by
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File name looked up at the corpus root when no `--config` is given
pub const LOCAL_SETTINGS_FILE: &str = ".consentfix.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Could not read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Settings for one corpus run.
///
/// Defaults reproduce the site the tool was first written for; a JSON file
/// only needs to name the fields it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory names that exclude a whole subtree when they appear anywhere in a path
    pub skip_dirs: Vec<String>,
    /// Lowercase file extensions (without dot) that are treated as documents
    pub extensions: Vec<String>,

    /// Site-absolute path of the canonical consent script
    pub canonical_src: String,
    /// File name fragment identifying any reference to the consent script
    pub include_marker: String,

    /// `id` values of legacy banner containers
    pub legacy_ids: Vec<String>,
    /// Audit tag per legacy id; ids not listed get `legacy_div_<id>`
    pub legacy_tag_names: BTreeMap<String, String>,
    /// Signatures of competing third-party consent libraries
    pub legacy_libraries: Vec<String>,
    /// Consent handlers that must only live in the canonical script
    pub consent_functions: Vec<String>,
    /// `localStorage` keys written by legacy inline consent code
    pub legacy_storage_keys: Vec<String>,

    /// Property forced to a safe value in `gtag('config', ...)` calls
    pub config_property: String,
    /// Safe literal written for `config_property`
    pub config_safe_value: String,

    /// Per-key sample cap for fix logs
    pub fix_sample_cap: usize,
    /// Per-tag sample cap for audit reports
    pub audit_sample_cap: usize,

    /// Backup root, relative to the corpus root unless absolute
    pub backup_dir: PathBuf,
    /// Report directory, relative to the corpus root unless absolute
    pub report_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            skip_dirs: [
                ".git",
                "node_modules",
                "dist",
                "build",
                ".cache",
                ".next",
                ".nuxt",
                "vendor",
                "tmp",
                "reports",
                "backups",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extensions: vec!["html".to_string(), "htm".to_string()],
            canonical_src: "/assets/js/cookie-consent.js".to_string(),
            include_marker: "cookie-consent.js".to_string(),
            legacy_ids: vec!["cookie-banner".to_string(), "cookie-consent-layer".to_string()],
            legacy_tag_names: [
                ("cookie-banner", "legacy_div_cookie_banner"),
                ("cookie-consent-layer", "legacy_div_cookie_layer"),
            ]
            .iter()
            .map(|(id, tag)| (id.to_string(), tag.to_string()))
            .collect(),
            legacy_libraries: vec![
                "cookieconsent".to_string(),
                "cc-window".to_string(),
                "cc_banner".to_string(),
                "osano".to_string(),
            ],
            consent_functions: vec!["acceptConsent".to_string(), "rejectConsent".to_string()],
            legacy_storage_keys: vec![
                "vpnworld_consent".to_string(),
                "cookie_consent".to_string(),
                "cookieConsent".to_string(),
                "consent".to_string(),
            ],
            config_property: "send_page_view".to_string(),
            config_safe_value: "false".to_string(),
            fix_sample_cap: 30,
            audit_sample_cap: 20,
            backup_dir: PathBuf::from("backups"),
            report_dir: PathBuf::from("reports"),
        }
    }
}

impl Settings {
    /// Load settings from an explicit file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Resolve settings for a corpus: explicit file, then `<root>/.consentfix.json`,
    /// then the user config directory, then built-in defaults.
    pub fn resolve(explicit: Option<&Path>, root: &Path) -> Result<Self, SettingsError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidates = [Some(root.join(LOCAL_SETTINGS_FILE)), Self::user_file_path()];
        for candidate in candidates.into_iter().flatten() {
            if candidate.is_file() {
                debug!("Using settings from {}", candidate.display());
                return Self::load(&candidate);
            }
        }

        debug!("No settings file found, using defaults");
        Ok(Self::default())
    }

    /// Per-user settings location
    pub fn user_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("consentfix").join("settings.json"))
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.canonical_src.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "canonical_src",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.canonical_src.contains(&self.include_marker) {
            return Err(SettingsError::Invalid {
                field: "include_marker",
                reason: format!(
                    "`{}` is not part of canonical_src `{}`",
                    self.include_marker, self.canonical_src
                ),
            });
        }
        if self.config_property.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "config_property",
                reason: "must not be empty".to_string(),
            });
        }
        if self.extensions.is_empty() {
            return Err(SettingsError::Invalid {
                field: "extensions",
                reason: "at least one extension is required".to_string(),
            });
        }
        Ok(())
    }

    /// The one include tag every document should end up with
    pub fn canonical_tag(&self) -> String {
        format!(r#"<script src="{}" defer></script>"#, self.canonical_src)
    }

    /// Audit tag reported for the legacy container `id`
    pub fn structural_tag(&self, id: &str) -> String {
        self.legacy_tag_names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("legacy_div_{}", id.replace('-', "_")))
    }

    pub fn backup_root(&self, root: &Path) -> PathBuf {
        resolve_under(root, &self.backup_dir)
    }

    pub fn report_root(&self, root: &Path) -> PathBuf {
        resolve_under(root, &self.report_dir)
    }
}

fn resolve_under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(
            settings.canonical_tag(),
            r#"<script src="/assets/js/cookie-consent.js" defer></script>"#
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "fix_sample_cap": 5, "extensions": ["html"] }"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.fix_sample_cap, 5);
        assert_eq!(settings.extensions, vec!["html"]);
        assert_eq!(settings.canonical_src, "/assets/js/cookie-consent.js");
    }

    #[test]
    fn test_marker_must_match_canonical_src() {
        let settings = Settings {
            include_marker: "consent.min.js".to_string(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { field: "include_marker", .. })
        ));
    }

    #[test]
    fn test_resolve_prefers_local_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(LOCAL_SETTINGS_FILE),
            r#"{ "audit_sample_cap": 3 }"#,
        )
        .unwrap();

        let settings = Settings::resolve(None, dir.path()).unwrap();
        assert_eq!(settings.audit_sample_cap, 3);
    }

    #[test]
    fn test_structural_tag_names() {
        let mut settings = Settings::default();
        assert_eq!(settings.structural_tag("cookie-banner"), "legacy_div_cookie_banner");
        assert_eq!(
            settings.structural_tag("cookie-consent-layer"),
            "legacy_div_cookie_layer"
        );
        assert_eq!(settings.structural_tag("gdpr-popup"), "legacy_div_gdpr_popup");

        settings
            .legacy_tag_names
            .insert("gdpr-popup".to_string(), "legacy_gdpr".to_string());
        assert_eq!(settings.structural_tag("gdpr-popup"), "legacy_gdpr");
    }

    #[test]
    fn test_relative_dirs_resolve_under_root() {
        let settings = Settings::default();
        let root = Path::new("/srv/site");
        assert_eq!(settings.backup_root(root), PathBuf::from("/srv/site/backups"));
        assert_eq!(settings.report_root(root), PathBuf::from("/srv/site/reports"));
    }
}
