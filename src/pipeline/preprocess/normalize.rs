use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static SPACE_AROUND_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" ?\n ?").unwrap());

/// Canonicalize raw input text. Never fails.
///
/// Order: NFC composition, invisible removal, control removal (keeping
/// `\n`, `\r`, `\t`), line endings to `\n`, space/tab runs to one space,
/// 3+ newlines to 2, trim.
pub fn normalize(raw: &str) -> String {
    let composed: String = raw.nfc().collect();
    let text = remove_invisible_unicode(&composed);
    let text = remove_control_characters(&text);
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = HORIZONTAL_WS.replace_all(&text, " ");
    let text = SPACE_AROUND_NEWLINE.replace_all(&text, "\n");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    // Removing a joiner can bring a composable pair together.
    let recomposed: String = text.trim().nfc().collect();
    recomposed
}

/// Remove zero-width and invisible Unicode characters.
fn remove_invisible_unicode(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(
                *c,
                '\u{200B}'..='\u{200F}'  // Zero-width chars
                | '\u{202A}'..='\u{202E}' // Directional formatting
                | '\u{2060}'..='\u{2064}' // Invisible operators
                | '\u{2066}'..='\u{2069}' // Directional isolates
                | '\u{FEFF}'              // BOM
                | '\u{00AD}'              // Soft hyphen
                | '\u{034F}'              // Combining grapheme joiner
                | '\u{061C}'              // Arabic letter mark
                | '\u{180E}'              // Mongolian vowel separator
                | '\u{3164}'              // Hangul filler
                | '\u{FFA0}'              // Halfwidth Hangul filler
                | '\u{115F}'..='\u{1160}' // Hangul choseong/jungseong fillers
            )
        })
        .collect()
}

/// Remove control characters except newline, carriage return and tab.
fn remove_control_characters(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(*c, '\n' | '\r' | '\t'))
        .collect()
}
