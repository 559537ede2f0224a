//! Assistant output post-processing: strip leaked reasoning tags and
//! recognise the silent sentinel.

use std::sync::OnceLock;

/// The sentinel an agent emits when it decides a scheduled prompt does not
/// warrant interrupting the user. Nothing is sent.
pub const SILENT_TOKEN: &str = "NOOP";

fn reasoning_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    // Some models leak their chain of thought in pseudo-XML tags.
    RE.get_or_init(|| {
        regex::Regex::new(r"(?s)<(think|thinking|reasoning)>.*?</(think|thinking|reasoning)>")
            .unwrap()
    })
}

/// Remove `<think>…</think>`-style blocks and trim the remainder.
pub fn strip_reasoning_tags(text: &str) -> String {
    reasoning_re().replace_all(text, "").trim().to_string()
}

/// True when the (stripped) output is exactly the silent token.
pub fn is_silent(text: &str) -> bool {
    text.trim() == SILENT_TOKEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_blocks() {
        let text = "<think>they asked about X\nso I should...</think>Here is X.";
        assert_eq!(strip_reasoning_tags(text), "Here is X.");
    }

    #[test]
    fn strips_multiple_blocks_and_variants() {
        let text = "<reasoning>a</reasoning>One.<thinking>b</thinking> Two.";
        assert_eq!(strip_reasoning_tags(text), "One. Two.");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(strip_reasoning_tags("hello"), "hello");
    }

    #[test]
    fn silent_token_detection() {
        assert!(is_silent("NOOP"));
        assert!(is_silent("  NOOP\n"));
        assert!(!is_silent("NOOP, just checking in"));
        assert!(!is_silent("noop"));
    }

    #[test]
    fn stripped_think_plus_noop_is_silent() {
        let text = "<think>nothing worth saying</think>NOOP";
        assert!(is_silent(&strip_reasoning_tags(text)));
    }
}
