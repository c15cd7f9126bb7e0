use crate::REDACTED;
use regex::{Regex, RegexBuilder};
use switchyard_core::{SwitchyardError, SwitchyardResult};

/// Case-insensitive, whole-word dictionary matcher.
///
/// Terms are compiled into one alternation, longest first, so that at any
/// position the longest dictionary entry wins. A hit only counts when the
/// characters around it are not ASCII word characters.
pub struct Matcher {
    pattern: Regex,
    term_count: usize,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("term_count", &self.term_count)
            .finish()
    }
}

impl Matcher {
    /// Build a matcher from dictionary terms. Blank terms are ignored and
    /// duplicates collapse case-insensitively.
    pub fn build<I, S>(dictionary: I) -> SwitchyardResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut terms: Vec<String> = dictionary
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        terms.dedup();

        if terms.is_empty() {
            return Err(SwitchyardError::Redaction(
                "Empty dictionary for matcher".into(),
            ));
        }

        let alternation = terms
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .size_limit(256 * (1 << 20))
            .build()
            .map_err(|e| SwitchyardError::Redaction(format!("Failed to compile dictionary: {e}")))?;

        Ok(Self {
            pattern,
            term_count: terms.len(),
        })
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.term_count
    }

    /// Replace every whole-word dictionary hit with `[REDACTED]`, merging
    /// adjacent or overlapping hits into one marker.
    pub fn redact(&self, text: &str) -> String {
        let bytes = text.as_bytes();
        let mut spans: Vec<(usize, usize)> = Vec::new();

        for m in self.pattern.find_iter(text) {
            let (start, end) = (m.start(), m.end());
            let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
            let after_ok = end == bytes.len() || !is_word_byte(bytes[end]);
            if !(before_ok && after_ok) {
                continue;
            }
            match spans.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => spans.push((start, end)),
            }
        }

        if spans.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (start, end) in spans {
            out.push_str(&text[cursor..start]);
            out.push_str(REDACTED);
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        out
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
