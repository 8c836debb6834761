//! Renderers for the argument-only handler kinds.

use super::invocation::TemplateInvocation;

pub fn literal(
    inv: &TemplateInvocation,
    start: usize,
    prepend: Option<&str>,
    append: Option<&str>,
) -> String {
    let content = inv
        .positional
        .iter()
        .skip(start)
        .filter(|a| !a.is_empty())
        .cloned()
        .chain(inv.keywords().map(|(k, v)| format!("{}={}", k, v)))
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = String::new();
    if let Some(p) = prepend {
        out.push_str(p);
        out.push(' ');
    }
    out.push_str(&content);
    if let Some(a) = append {
        out.push_str(a);
    }
    out
}

/// `<source language> <borrowed word> ("<gloss>")`. The word is skipped
/// when absent or `-`; the gloss comes from `gloss=` or the fifth argument.
pub fn borrowed(inv: &TemplateInvocation, prefix: &str) -> Result<String, String> {
    let source = inv
        .arg(1)
        .ok_or_else(|| "missing source language argument".to_string())?;

    let mut out = format!("{}{}", prefix, source);
    if let Some(word) = inv.arg(2).filter(|w| *w != "-") {
        out.push(' ');
        out.push_str(word);
    }
    let gloss = inv
        .keyword("gloss")
        .filter(|g| !g.is_empty())
        .or_else(|| inv.arg(4));
    if let Some(gloss) = gloss {
        out.push_str(&format!(" (\"{}\")", gloss));
    }
    Ok(out)
}

pub fn calque(inv: &TemplateInvocation) -> Result<String, String> {
    borrowed(inv, "calque of ")
}

pub fn hyphenation(inv: &TemplateInvocation) -> String {
    let parts: Vec<&str> = inv.positional.iter().skip(1).map(String::as_str).collect();
    format!("hyphenation: {}", parts.join("-"))
}

pub fn parenthetical(inv: &TemplateInvocation) -> String {
    let parts: Vec<&str> = inv.positional.iter().skip(1).map(String::as_str).collect();
    format!("({})", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> TemplateInvocation {
        TemplateInvocation::parse(body, &[])
    }

    // ─────────────────────────────────────────────────────────────
    // literal
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn literal_from_start_index() {
        assert_eq!(literal(&parse("lit|run|walk|jog"), 1, None, None), "walk, jog");
    }

    #[test]
    fn literal_skips_empty_and_appends_keywords() {
        let out = literal(&parse("lit|a||b|pos=noun"), 0, None, None);
        assert_eq!(out, "a, b, pos=noun");
    }

    #[test]
    fn literal_prepend_and_append() {
        let out = literal(&parse("syn|fi|koira|rakki"), 1, Some("synonyms:"), Some("."));
        assert_eq!(out, "synonyms: koira, rakki.");
    }

    #[test]
    fn literal_start_past_end_is_empty() {
        assert_eq!(literal(&parse("lit|a"), 5, None, None), "");
    }

    // ─────────────────────────────────────────────────────────────
    // borrowed / calque
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn borrowed_with_positional_gloss() {
        let out = borrowed(&parse("borrowed|en|la|canis||dog"), "").unwrap();
        assert_eq!(out, "la canis (\"dog\")");
    }

    #[test]
    fn borrowed_gloss_keyword_wins() {
        let out = borrowed(&parse("bor|fi|sv|hund||x|gloss=dog"), "").unwrap();
        assert_eq!(out, "sv hund (\"dog\")");
    }

    #[test]
    fn borrowed_placeholder_word_skipped() {
        assert_eq!(borrowed(&parse("bor|fi|sv|-"), "").unwrap(), "sv");
        assert_eq!(borrowed(&parse("bor|fi|sv"), "").unwrap(), "sv");
    }

    #[test]
    fn borrowed_without_source_fails() {
        assert!(borrowed(&parse("bor|fi"), "").is_err());
    }

    #[test]
    fn calque_prefix() {
        let out = calque(&parse("cal|fi|de|Wolkenkratzer||skyscraper")).unwrap();
        assert_eq!(out, "calque of de Wolkenkratzer (\"skyscraper\")");
    }

    // ─────────────────────────────────────────────────────────────
    // hyphenation / parenthetical
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn hyphenation_joins_after_language() {
        assert_eq!(hyphenation(&parse("hyph|fi|koi|ra")), "hyphenation: koi-ra");
    }

    #[test]
    fn parenthetical_joins_with_spaces() {
        assert_eq!(parenthetical(&parse("q|fi|colloquial|rare")), "(colloquial rare)");
        assert_eq!(parenthetical(&parse("q")), "()");
    }
}
