//! Relevance scoring shared by the sources.

/// Splits a tool name into lower-case search words.
#[must_use]
pub fn name_tokens(tool_name: &str) -> Vec<String> {
    tool_name
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Scores a hit in `[0, 1]`.
///
/// Half of the score is the share of `tokens` found in `haystack`, half is
/// the hit's position in the source's own ranking (`position` of `total`).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn relevance(tokens: &[String], haystack: &str, position: usize, total: usize) -> f64 {
    let haystack = haystack.to_ascii_lowercase();
    let overlap = if tokens.is_empty() {
        0.0
    } else {
        let hits = tokens
            .iter()
            .filter(|token| haystack.contains(token.as_str()))
            .count();
        hits as f64 / tokens.len() as f64
    };
    let rank = if total == 0 {
        0.0
    } else {
        1.0 - (position.min(total) as f64 / total as f64)
    };

    (0.5 * overlap + 0.5 * rank).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_split_on_separators() {
        assert_eq!(name_tokens("convert_Currency-v2"), ["convert", "currency", "v2"]);
        assert!(name_tokens("__").is_empty());
    }

    #[test]
    fn full_overlap_at_top_scores_one() {
        let tokens = name_tokens("uuid_gen");
        assert!((relevance(&tokens, "src/uuid_gen.lua", 0, 3) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn scores_decay_with_position_and_missing_words() {
        let tokens = name_tokens("uuid_gen");
        let top = relevance(&tokens, "uuid", 0, 4);
        let later = relevance(&tokens, "uuid", 3, 4);
        let unrelated = relevance(&tokens, "readme", 3, 4);
        assert!(top > later);
        assert!(later > unrelated);
        assert!(unrelated >= 0.0);
    }
}
