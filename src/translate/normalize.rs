//! Text normalization around the provider boundary.
//! Cache keys use whitespace-normalized text; real providers get URLs,
//! emails and figures swapped for placeholder tags they won't translate.

use regex::Regex;

/// Trim and collapse runs of whitespace to one space.
pub fn normalize_for_key(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True for empty or whitespace-only text, which is never translated.
#[inline]
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// Detects the dominant language of `text` using whatlang.
/// Returns an ISO 639-1 code or None if detection is unreliable.
pub fn detect_language(text: &str) -> Option<String> {
    let info = whatlang::detect(text)?;
    if !info.is_reliable() {
        return None;
    }
    lang_to_code(info.lang()).map(str::to_string)
}

fn lang_to_code(lang: whatlang::Lang) -> Option<&'static str> {
    use whatlang::Lang::*;
    let code = match lang {
        Fra => "fr",
        Eng => "en",
        Spa => "es",
        Deu => "de",
        Ita => "it",
        Por => "pt",
        Nld => "nl",
        Pol => "pl",
        Rus => "ru",
        Ukr => "uk",
        Tur => "tr",
        Ara => "ar",
        Jpn => "ja",
        Kor => "ko",
        Cmn => "zh",
        _ => return None,
    };
    Some(code)
}

/// A substitution that must be restored after translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderEntry {
    pub tag: String,
    pub original: String,
}

const PROTECTED_PATTERNS: &[&str] = &[
    // URLs
    r"https?://[^\s,)\]]+",
    // Emails
    r"[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}",
    // Social handles (@artist)
    r"@[A-Za-z0-9_]{2,}",
    // Amounts, percentages, tempos
    r"(?:[$€£]|\b)\d+(?:[.,]\d+)?(?:%|bpm|k|h|min)?\b",
];

/// Replaces untranslatable tokens with `<<PH0>>`, `<<PH1>>`, ... and restores them.
pub struct PlaceholderProtector {
    pattern: Option<Regex>,
}

impl Default for PlaceholderProtector {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaceholderProtector {
    pub fn new() -> Self {
        // one alternation so earlier tags are never re-matched by later patterns
        let combined = PROTECTED_PATTERNS
            .iter()
            .map(|p| format!("(?:{p})"))
            .collect::<Vec<_>>()
            .join("|");
        Self {
            pattern: Regex::new(&combined).ok(),
        }
    }

    pub fn protect(&self, text: &str) -> (String, Vec<PlaceholderEntry>) {
        let Some(pattern) = &self.pattern else {
            return (text.to_string(), Vec::new());
        };
        let mut entries: Vec<PlaceholderEntry> = Vec::new();
        let protected = pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let tag = format!("<<PH{}>>", entries.len());
                entries.push(PlaceholderEntry {
                    tag: tag.clone(),
                    original: caps[0].to_string(),
                });
                tag
            })
            .into_owned();
        (protected, entries)
    }

    pub fn restore(&self, text: &str, entries: &[PlaceholderEntry]) -> String {
        let mut result = text.to_string();
        for entry in entries {
            result = result.replace(&entry.tag, &entry.original);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalization_collapses_whitespace() {
        assert_eq!(normalize_for_key("  Bonjour \n\t le   monde "), "Bonjour le monde");
        assert_eq!(normalize_for_key("   "), "");
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank(""));
        assert!(is_blank(" \n\t"));
        assert!(!is_blank(" a "));
    }

    #[test]
    fn detects_long_english_text() {
        let text = "The band is looking for a drummer who can play live shows every weekend \
                    and record a new album with us in the studio next summer.";
        assert_eq!(detect_language(text).as_deref(), Some("en"));
    }

    #[test]
    fn protects_and_restores_tokens() {
        let protector = PlaceholderProtector::new();
        let text = "Écoutez https://open.spotify.com/artist/xyz puis écrivez à booking@label.fr";
        let (protected, entries) = protector.protect(text);
        assert!(!protected.contains("https://"));
        assert!(!protected.contains("booking@label.fr"));
        assert_eq!(entries.len(), 2);
        assert_eq!(protector.restore(&protected, &entries), text);
    }

    #[test]
    fn text_without_tokens_is_untouched() {
        let protector = PlaceholderProtector::new();
        let (protected, entries) = protector.protect("Concert ce soir");
        assert_eq!(protected, "Concert ce soir");
        assert!(entries.is_empty());
    }

    #[test]
    fn figures_are_protected_in_order() {
        let protector = PlaceholderProtector::new();
        let (protected, entries) = protector.protect("Cachet 450€ pour 2h, contact @dj_nova");
        assert_eq!(protected, "Cachet <<PH0>>€ pour <<PH1>>, contact <<PH2>>");
        assert_eq!(entries[0].original, "450");
        assert_eq!(entries[1].original, "2h");
        assert_eq!(entries[2].original, "@dj_nova");
    }
}
