//! Dominant-language detection for recognised text.
//!
//! Scanned documents here are Chinese, Japanese or English. Counting
//! characters per script settles most texts; only the ratios between the
//! three scripts matter, so punctuation, digits and other alphabets are
//! ignored. Long mixed-script texts go to a statistical detector
//! ([`whatlang`]) before falling back to the dominant script.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use whatlang::Lang;

/// Below this many counted characters, mixed text is decided by script share.
pub const MIN_DETECTOR_CHARS: usize = 100;

/// Share of kana among CJK characters above which Han-heavy text is Japanese.
const KANA_SHARE_JA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    En,
    ZhCn,
    Ja,
}

impl Language {
    /// The code written to `lang.txt`.
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::ZhCn => "zh-cn",
            Language::Ja => "ja",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ScriptCounts {
    chinese: usize,
    japanese: usize,
    english: usize,
}

fn count_scripts(text: &str) -> ScriptCounts {
    let mut c = ScriptCounts::default();
    for ch in text.chars() {
        match ch {
            '\u{4e00}'..='\u{9fff}' => c.chinese += 1,
            '\u{3040}'..='\u{30ff}' => c.japanese += 1,
            'a'..='z' | 'A'..='Z' => c.english += 1,
            _ => {}
        }
    }
    c
}

/// Detect the dominant language of `text`.
///
/// Clear majorities win outright (English > 80 %, Chinese > 50 %,
/// Japanese > 50 %). Short mixed texts go to the script with the largest
/// share, ties going to Chinese, then Japanese. Mixed texts of at least
/// [`MIN_DETECTOR_CHARS`] counted characters are handed to the statistical
/// detector first.
pub fn detect_language(text: &str) -> Language {
    let c = count_scripts(text);
    let total = c.chinese + c.japanese + c.english;
    if total == 0 {
        return Language::En;
    }

    let chi = c.chinese as f64 / total as f64;
    let jpn = c.japanese as f64 / total as f64;
    let eng = c.english as f64 / total as f64;

    if eng > 0.8 {
        return Language::En;
    }
    if chi > 0.5 {
        return Language::ZhCn;
    }
    if jpn > 0.5 {
        return Language::Ja;
    }

    if total >= MIN_DETECTOR_CHARS {
        if let Some(lang) = detect_statistical(text, c) {
            return lang;
        }
    }

    if chi >= eng.max(jpn) {
        Language::ZhCn
    } else if jpn >= eng.max(chi) {
        Language::Ja
    } else {
        Language::En
    }
}

/// Ask `whatlang`, keeping only the three languages handled here.
///
/// Kanji count as Mandarin script, so a Mandarin verdict on text with a
/// real share of kana is corrected to Japanese.
fn detect_statistical(text: &str, c: ScriptCounts) -> Option<Language> {
    let info = whatlang::detect(text)?;
    debug!(
        "whatlang: {:?} (confidence {:.2})",
        info.lang(),
        info.confidence()
    );
    let kana_share = c.japanese as f64 / (c.chinese + c.japanese).max(1) as f64;
    match info.lang() {
        Lang::Jpn => Some(Language::Ja),
        Lang::Cmn if kana_share >= KANA_SHARE_JA => Some(Language::Ja),
        Lang::Cmn => Some(Language::ZhCn),
        Lang::Eng => Some(Language::En),
        _ => None,
    }
}

/// First page index included in the language sample.
///
/// Front matter (covers, tables of contents, English abstracts in Chinese
/// papers) skews detection, so longer documents skip their first pages.
pub fn sample_start_index(page_count: usize) -> usize {
    match page_count {
        n if n >= 5 => 4,
        n if n >= 3 => 2,
        2 => 1,
        _ => 0,
    }
}

/// Detect the language of a document from its per-page texts.
///
/// Falls back to the full text when the sampled pages are blank.
pub fn detect_document_language<S: AsRef<str>>(pages: &[S]) -> Language {
    let start = sample_start_index(pages.len());
    let sample: String = pages[start.min(pages.len())..]
        .iter()
        .map(|p| format!("{}\n", p.as_ref()))
        .collect();
    if !sample.trim().is_empty() {
        return detect_language(&sample);
    }
    let full: String = pages.iter().map(|p| format!("{}\n", p.as_ref())).collect();
    detect_language(&full)
}
