//! Cleans extracted text before it is segmented for speech.
//!
//! OCR output carries grounding tags, coordinate lists, model diagnostics,
//! separator banners and page markers. Left in, they create spurious sentence
//! boundaries and make the synthesis service fail. The raw text is kept
//! untouched for indexing; only the speech path goes through here.

use once_cell::sync::Lazy;
use regex::Regex;

/// Normalizes extracted text into plain, speakable prose.
pub fn clean_for_speech(text: &str) -> String {
    let mut cleaned = remove_grounding_tags(text);
    cleaned = remove_debug_lines(&cleaned);
    cleaned = remove_page_markers(&cleaned);
    cleaned = remove_unspeakable_chars(&cleaned);
    collapse_whitespace(&cleaned)
}

fn remove_grounding_tags(input: &str) -> String {
    // <|ref|>label<|/ref|> and <|det|>[[x1, y1, x2, y2]]<|/det|> pairs, then any stray token.
    static PAIRED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)<\|(ref|det)\|>.*?<\|/(ref|det)\|>").unwrap());
    static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\|/?[a-z_]+\|>").unwrap());
    static COORDS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\[\[\s*\d+(?:\s*,\s*\d+)*\s*\](?:\s*,\s*\[\s*\d+(?:\s*,\s*\d+)*\s*\])*\]").unwrap());

    let out = PAIRED.replace_all(input, " ");
    let out = TOKEN.replace_all(&out, " ");
    COORDS.replace_all(&out, " ").into_owned()
}

fn remove_debug_lines(input: &str) -> String {
    static BANNER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[=\-*_#~]{3,}\s*$").unwrap());
    static DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?mi)^\s*(?:BASE:|PATCHES:|NO PATCHES|image size:|valid image tokens|output texts tokens|compression ratio|directly resize|torch\.Size).*$",
        )
        .unwrap()
    });

    let out = DIAGNOSTIC.replace_all(input, "");
    BANNER.replace_all(&out, "").into_owned()
}

fn remove_page_markers(input: &str) -> String {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?mi)^\s*-{2,}\s*page\s+\d+\s*-{2,}\s*$").unwrap());
    RE.replace_all(input, "\n").into_owned()
}

fn remove_unspeakable_chars(input: &str) -> String {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"[^\w\s.,;:!?¿¡'"()\-]"#).unwrap());
    RE.replace_all(input, " ").into_owned()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_preserved() {
        let input = "El informe concluye que el proyecto es viable. ¿Preguntas?";
        assert_eq!(clean_for_speech(input), input);
    }

    #[test]
    fn test_strips_grounding_tags() {
        let input = "<|ref|>title<|/ref|><|det|>[[12, 30, 400, 88]]<|/det|>\n# Annual Report\n<|ref|>text<|/ref|><|det|>[[1,2,3,4]]<|/det|>\nRevenue grew.";
        assert_eq!(clean_for_speech(input), "Annual Report Revenue grew.");
    }

    #[test]
    fn test_strips_page_markers_and_banners() {
        let input = "--- Page 1 ---\nFirst page text.\n\n=====================\n--- Page 2 ---\nSecond page.";
        assert_eq!(clean_for_speech(input), "First page text. Second page.");
    }

    #[test]
    fn test_strips_model_diagnostics() {
        let input = "BASE:  torch.Size([1, 256, 1280])\nPATCHES:  torch.Size([6, 100, 1280])\nReal content here.\nimage size: (1024, 1024)";
        assert_eq!(clean_for_speech(input), "Real content here.");
    }

    #[test]
    fn test_replaces_markup_symbols() {
        let input = "| Item | Cost |\n**Bold** and _snake_ name ~ 50% off";
        let cleaned = clean_for_speech(input);
        assert!(!cleaned.contains('|'));
        assert!(!cleaned.contains('*'));
        assert!(!cleaned.contains('%'));
        assert!(cleaned.contains("Bold"));
    }

    #[test]
    fn test_whitespace_only_becomes_empty() {
        assert_eq!(clean_for_speech("  \n--- Page 3 ---\n  "), "");
    }
}
