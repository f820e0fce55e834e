//! "Did you mean" suggestions for unknown names.

use strsim::levenshtein;

const MAX_SUGGESTIONS: usize = 3;

/// Up to three candidates close to `input`: prefix matches first, then
/// candidates within an edit distance of half the input's length.
pub(crate) fn similar<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let threshold = (input.chars().count() / 2).max(1);
    let mut scored: Vec<(usize, &str)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            if !input.is_empty() && candidate.starts_with(input) {
                return Some((0, candidate));
            }
            let distance = levenshtein(input, candidate);
            (distance <= threshold).then_some((distance, candidate))
        })
        .collect();
    scored.sort_unstable();
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, candidate)| candidate.to_owned())
        .collect()
}

/// Suffix for an error message listing `suggestions`, or an empty string.
pub(crate) fn hint(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        return String::new();
    }
    let quoted: Vec<String> = suggestions.iter().map(|s| format!("`{s}`")).collect();
    format!("; did you mean {}?", quoted.join(", "))
}
