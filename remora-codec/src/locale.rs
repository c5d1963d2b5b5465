//! Locale tags and their single-token string encoding.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::DecodeError;

/// A locale tag: language plus optional script and region.
///
/// Stored in documents as one `-`-delimited token: `lang[-Script][-REGION]`.
/// A four-letter titlecase segment is a script, a two-letter uppercase or
/// three-digit segment is a region. `fr`, `fr-CA`, `de-DE`, and `zh-Hant`
/// all round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locale {
    /// Lowercase language subtag.
    pub language: SmolStr,
    /// Titlecase script subtag, e.g. `Hant`.
    pub script: Option<SmolStr>,
    /// Uppercase region subtag, e.g. `CA`, or a three-digit area code.
    pub region: Option<SmolStr>,
}

impl Locale {
    /// Create a language-only locale.
    pub fn new(language: impl AsRef<str>) -> Self {
        Self {
            language: SmolStr::new(language.as_ref()),
            script: None,
            region: None,
        }
    }

    /// Attach a script subtag.
    pub fn with_script(mut self, script: impl AsRef<str>) -> Self {
        self.script = Some(SmolStr::new(script.as_ref()));
        self
    }

    /// Attach a region subtag.
    pub fn with_region(mut self, region: impl AsRef<str>) -> Self {
        self.region = Some(SmolStr::new(region.as_ref()));
        self
    }

    /// Parse a locale token.
    pub fn parse(token: &str) -> Result<Self, DecodeError> {
        let mut parts = token.split('-');
        let language = parts
            .next()
            .filter(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_alphabetic()))
            .ok_or_else(|| DecodeError::InvalidLocale { token: token.to_string() })?;

        let mut locale = Locale::new(language);
        for part in parts {
            if is_script(part) && locale.script.is_none() && locale.region.is_none() {
                locale.script = Some(SmolStr::new(part));
            } else if is_region(part) && locale.region.is_none() {
                locale.region = Some(SmolStr::new(part));
            } else {
                return Err(DecodeError::InvalidLocale { token: token.to_string() });
            }
        }
        Ok(locale)
    }

    /// The single-token encoding of this locale.
    pub fn to_token(&self) -> String {
        let mut token = self.language.to_string();
        if let Some(script) = &self.script {
            token.push('-');
            token.push_str(script);
        }
        if let Some(region) = &self.region {
            token.push('-');
            token.push_str(region);
        }
        token
    }
}

fn is_script(part: &str) -> bool {
    part.len() == 4
        && part.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && part.chars().skip(1).all(|c| c.is_ascii_lowercase())
}

fn is_region(part: &str) -> bool {
    (part.len() == 2 && part.chars().all(|c| c.is_ascii_uppercase()))
        || (part.len() == 3 && part.chars().all(|c| c.is_ascii_digit()))
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_token())
    }
}

impl std::str::FromStr for Locale {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
