//! Word-level keyword matching shared by risk classification and step dispatch.

/// Inflections accepted after a keyword ("deletes", "posted", "deploying").
const SUFFIXES: &[&str] = &["s", "es", "d", "ed", "ing", "ment", "ments"];

/// Inflections that replace a trailing `e` ("deleting", "deletion").
const E_DROP_SUFFIXES: &[&str] = &["ing", "ion", "ions"];

/// Lowercased alphanumeric words of `text`.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// True if some word equals `keyword` or is `keyword` plus a known inflection.
pub fn contains_keyword(words: &[String], keyword: &str) -> bool {
    let e_stem = keyword.strip_suffix('e');
    words.iter().any(|word| {
        let inflected = word
            .strip_prefix(keyword)
            .is_some_and(|rest| rest.is_empty() || SUFFIXES.contains(&rest));
        let e_dropped = e_stem
            .and_then(|stem| word.strip_prefix(stem))
            .is_some_and(|rest| E_DROP_SUFFIXES.contains(&rest));
        inflected || e_dropped
    })
}

/// True if some word starts with `keyword`, or with `keyword` minus a
/// trailing `e` ("dropped", "cancelled", "removal", "termination").
pub fn contains_stem(words: &[String], keyword: &str) -> bool {
    let stem = keyword
        .strip_suffix('e')
        .filter(|s| s.len() >= 3)
        .unwrap_or(keyword);
    words.iter().any(|word| word.starts_with(stem))
}

/// Keywords from `table` that occur in `words`, in table order.
pub fn matches<'a>(words: &[String], table: &[&'a str]) -> Vec<&'a str> {
    table
        .iter()
        .copied()
        .filter(|kw| contains_keyword(words, kw))
        .collect()
}

/// Like [`matches`], but any word beginning with the keyword stem counts.
pub fn matches_stems<'a>(words: &[String], table: &[&'a str]) -> Vec<&'a str> {
    table
        .iter()
        .copied()
        .filter(|kw| contains_stem(words, kw))
        .collect()
}
