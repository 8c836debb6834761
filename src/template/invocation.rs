//! Parsing of a template body (`name|arg|key=value|...`) into its fields.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    pub(crate) static ref FIELD_SEPARATOR: Regex = Regex::new(r"\s*\|\s*").unwrap();
}

/// A parsed `{{...}}` invocation. Positional arguments do not include the
/// name, so `positional[0]` is the first field after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateInvocation {
    pub name: String,
    pub positional: Vec<String>,
    keyword: Vec<(String, String)>,
}

/// Byte position of the first `=` not preceded by a backslash.
fn unescaped_equals(field: &str) -> Option<usize> {
    let bytes = field.as_bytes();
    (0..bytes.len()).find(|&i| bytes[i] == b'=' && (i == 0 || bytes[i - 1] != b'\\'))
}

fn unescape(field: &str) -> String {
    field.replace("\\=", "=")
}

impl TemplateInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        TemplateInvocation {
            name: name.into(),
            positional: Vec::new(),
            keyword: Vec::new(),
        }
    }

    /// Split `body` on the field separator. Fields after the name that match
    /// one of `ignore` are dropped; the rest are keyword fields when they
    /// hold an unescaped `=` and positional otherwise. Empty fields stay
    /// positional so later arguments keep their position.
    pub fn parse(body: &str, ignore: &[Regex]) -> Self {
        let mut fields = FIELD_SEPARATOR.split(body.trim());
        let name = fields.next().unwrap_or("").to_string();
        let mut invocation = TemplateInvocation::new(name);

        for field in fields {
            if ignore.iter().any(|re| re.is_match(field)) {
                continue;
            }
            match unescaped_equals(field) {
                Some(eq) => {
                    let key = field[..eq].trim();
                    let value = field[eq + 1..].trim();
                    invocation.set_keyword(unescape(key), unescape(value));
                }
                None => invocation.positional.push(unescape(field)),
            }
        }
        invocation
    }

    pub fn with_positional<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.positional.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set a keyword argument; a repeated key replaces the earlier value.
    pub fn set_keyword(&mut self, key: String, value: String) {
        match self.keyword.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.keyword.push((key, value)),
        }
    }

    pub fn keyword(&self, key: &str) -> Option<&str> {
        self.keyword
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keywords(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keyword.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Positional argument `i`, if present and not empty.
    pub fn arg(&self, i: usize) -> Option<&str> {
        self.positional
            .get(i)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The same arguments under a different template name.
    pub fn renamed(&self, name: &str) -> Self {
        TemplateInvocation {
            name: name.to_string(),
            positional: self.positional.clone(),
            keyword: self.keyword.clone(),
        }
    }

    /// Fields joined by the separator without the surrounding braces, so an
    /// unresolved template keeps its content but is not matched again.
    pub fn passthrough(&self) -> String {
        let mut fields = Vec::with_capacity(1 + self.positional.len() + self.keyword.len());
        fields.push(self.name.clone());
        fields.extend(self.positional.iter().map(|p| p.replace('=', "\\=")));
        fields.extend(self.keyword.iter().map(|(k, v)| format!("{}={}", k, v)));
        fields.join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_and_keyword() {
        let inv = TemplateInvocation::parse("borrowed|en|la|canis|gloss=dog", &[]);
        assert_eq!(inv.name, "borrowed");
        assert_eq!(inv.positional, vec!["en", "la", "canis"]);
        assert_eq!(inv.keyword("gloss"), Some("dog"));
    }

    #[test]
    fn whitespace_around_separators_is_trimmed() {
        let inv = TemplateInvocation::parse(" lit | run |  walk ", &[]);
        assert_eq!(inv.name, "lit");
        assert_eq!(inv.positional, vec!["run", "walk"]);
    }

    #[test]
    fn empty_fields_keep_position() {
        let inv = TemplateInvocation::parse("borrowed|en|la|canis||dog", &[]);
        assert_eq!(inv.positional, vec!["en", "la", "canis", "", "dog"]);
        assert_eq!(inv.arg(3), None);
        assert_eq!(inv.arg(4), Some("dog"));
    }

    #[test]
    fn keyword_splits_on_first_equals_only() {
        let inv = TemplateInvocation::parse("x|url=a=b", &[]);
        assert_eq!(inv.keyword("url"), Some("a=b"));
    }

    #[test]
    fn escaped_equals_is_positional() {
        let inv = TemplateInvocation::parse(r"x|1 \= 1", &[]);
        assert_eq!(inv.positional, vec!["1 = 1"]);
        assert_eq!(inv.keywords().count(), 0);
    }

    #[test]
    fn last_keyword_wins() {
        let inv = TemplateInvocation::parse("x|t=one|t=two", &[]);
        assert_eq!(inv.keyword("t"), Some("two"));
        assert_eq!(inv.keywords().count(), 1);
    }

    #[test]
    fn ignored_fields_are_dropped_but_name_is_kept() {
        let ignore = vec![Regex::new(r"^\*$").unwrap()];
        let inv = TemplateInvocation::parse("*|*|a|*|b", &ignore);
        assert_eq!(inv.name, "*");
        assert_eq!(inv.positional, vec!["a", "b"]);
    }

    #[test]
    fn passthrough_keeps_all_fields() {
        let inv = TemplateInvocation::parse("unknown|a|k=v|b", &[]);
        assert_eq!(inv.passthrough(), "unknown|a|b|k=v");
        let reparsed = TemplateInvocation::parse(&inv.passthrough(), &[]);
        assert_eq!(reparsed, inv);
    }

    #[test]
    fn passthrough_reescapes_equals() {
        let inv = TemplateInvocation::parse(r"x|a \= b", &[]);
        assert_eq!(inv.passthrough(), r"x|a \= b");
    }

    #[test]
    fn renamed_keeps_arguments() {
        let inv = TemplateInvocation::parse("bor|en|la|g=x", &[]);
        let renamed = inv.renamed("borrowed");
        assert_eq!(renamed.name, "borrowed");
        assert_eq!(renamed.positional, inv.positional);
        assert_eq!(renamed.keyword("g"), Some("x"));
    }
}
