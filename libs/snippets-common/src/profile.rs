//! Language profile resolution.
//!
//! Maps a declared language key to the parameters one sandboxed run needs.
//! Limits fall back to the service defaults; `image` and `command` never do.

use crate::config::LanguageEntry;
use crate::error::{ConfigError, NotSupported};
use std::collections::BTreeMap;

/// Placeholder substituted with the entry file name
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Docker refuses memory limits below 6MB
const MIN_MEMORY_LIMIT_MB: u64 = 6;

/// Service-wide limits used when a language does not override them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Defaults {
    pub timeout_seconds: u64,
    pub memory_limit_mb: u64,
    pub crop_length: usize,
}

/// Whitespace-separated argv used to invoke the interpreter or compiler.
///
/// Tokens containing `{file}` get the entry file name substituted. Without
/// any placeholder the file name is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    tokens: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(template: &str) -> Option<Self> {
        let tokens: Vec<String> = template.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return None;
        }
        Some(Self { tokens })
    }

    pub fn render(&self, entry_file: &str) -> Vec<String> {
        let has_placeholder = self.tokens.iter().any(|t| t.contains(FILE_PLACEHOLDER));
        let mut argv: Vec<String> = self
            .tokens
            .iter()
            .map(|t| t.replace(FILE_PLACEHOLDER, entry_file))
            .collect();
        if !has_placeholder {
            argv.push(entry_file.to_string());
        }
        argv
    }

    pub fn as_str(&self) -> String {
        self.tokens.join(" ")
    }
}

/// Resolved execution parameters for one language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    pub name: String,
    pub timeout_seconds: u64,
    pub memory_limit_mb: u64,
    pub crop_length: usize,
    pub image: String,
    pub command: CommandTemplate,
}

#[derive(Debug, Clone)]
struct ValidatedEntry {
    timeout: Option<u64>,
    memory: Option<u64>,
    crop: Option<usize>,
    image: String,
    command: CommandTemplate,
}

impl ValidatedEntry {
    fn from_entry(language: &str, entry: &LanguageEntry) -> Result<Self, ConfigError> {
        let missing = |field| ConfigError::MissingField {
            language: language.to_string(),
            field,
        };
        let invalid = |field, reason: &str| ConfigError::InvalidField {
            language: language.to_string(),
            field,
            reason: reason.to_string(),
        };

        let image = entry
            .image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
            .ok_or_else(|| missing("image"))?
            .to_string();

        let command = entry
            .command
            .as_deref()
            .and_then(CommandTemplate::parse)
            .ok_or_else(|| missing("command"))?;

        if let Err((field, reason)) = check_limits(entry.timeout, entry.memory, entry.crop) {
            return Err(invalid(field, reason));
        }

        Ok(Self {
            timeout: entry.timeout,
            memory: entry.memory,
            crop: entry.crop,
            image,
            command,
        })
    }
}

/// Lower bounds shared by the service defaults and per-language overrides.
/// A zero timeout disables `timeout`, and a zero memory cap means unlimited to Docker.
fn check_limits(
    timeout: Option<u64>,
    memory: Option<u64>,
    crop: Option<usize>,
) -> Result<(), (&'static str, &'static str)> {
    if timeout == Some(0) {
        return Err(("timeout", "must be at least 1 second"));
    }
    if matches!(memory, Some(mb) if mb < MIN_MEMORY_LIMIT_MB) {
        return Err(("memory", "must be at least 6MB"));
    }
    if crop == Some(0) {
        return Err(("crop", "must be at least 1 character"));
    }
    Ok(())
}

/// Validated language table with the service defaults it falls back to
#[derive(Debug, Clone)]
pub struct LanguageTable {
    defaults: Defaults,
    entries: BTreeMap<String, ValidatedEntry>,
}

impl LanguageTable {
    pub fn new(
        defaults: Defaults,
        languages: &BTreeMap<String, LanguageEntry>,
    ) -> Result<Self, ConfigError> {
        check_limits(
            Some(defaults.timeout_seconds),
            Some(defaults.memory_limit_mb),
            Some(defaults.crop_length),
        )
        .map_err(|(field, reason)| ConfigError::InvalidDefault {
            field,
            reason: reason.to_string(),
        })?;

        let mut entries = BTreeMap::new();
        for (name, entry) in languages {
            entries.insert(name.clone(), ValidatedEntry::from_entry(name, entry)?);
        }
        Ok(Self { defaults, entries })
    }

    /// Resolve the profile for a declared language.
    /// Unknown keys are rejected rather than mapped to a default language.
    pub fn resolve(&self, language: &str) -> Result<LanguageProfile, NotSupported> {
        let entry = self.entries.get(language).ok_or_else(|| NotSupported {
            language: language.to_string(),
        })?;

        Ok(LanguageProfile {
            name: language.to_string(),
            timeout_seconds: entry.timeout.unwrap_or(self.defaults.timeout_seconds),
            memory_limit_mb: entry.memory.unwrap_or(self.defaults.memory_limit_mb),
            crop_length: entry.crop.unwrap_or(self.defaults.crop_length),
            image: entry.image.clone(),
            command: entry.command.clone(),
        })
    }

    /// Configured language keys, sorted
    pub fn languages(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Reply to "what can you run?"
    pub fn support_text(&self) -> String {
        format!("I can run: {}", self.languages().join(", "))
    }

    /// Dry-run query: the limits a job in `language` would get, for display.
    /// Never fetches or executes anything.
    pub fn describe(&self, language: &str) -> String {
        match self.resolve(language) {
            Ok(profile) => format!(
                "```{}:\n    Timeout  : {} seconds\n    Memory   : {}MB\n    Crops at : {} characters```",
                profile.name, profile.timeout_seconds, profile.memory_limit_mb, profile.crop_length
            ),
            Err(err) => format!("```{}```", err),
        }
    }
}
