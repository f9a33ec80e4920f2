//! Token-set similarity for approximate cache matches.

use std::collections::HashSet;

/// Lower-cased whitespace tokens of `text`.
pub fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Jaccard similarity of the token sets of `a` and `b`, in [0, 1].
///
/// Two empty inputs score 0.
pub fn jaccard(a: &str, b: &str) -> f64 {
    jaccard_sets(&token_set(a), &token_set(b))
}

pub fn jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identical_prompts_score_one() {
        assert_eq!(jaccard("What is two plus two?", "what is TWO plus two?"), 1.0);
    }

    #[test]
    fn test_partial_overlap() {
        // {what, is, two, plus, two?} vs {what, is, two, plus, three?}
        let score = jaccard("What is two plus two?", "What is two plus three?");
        assert!((score - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(jaccard("", ""), 0.0);
        assert_eq!(jaccard("hello", ""), 0.0);
    }

    proptest! {
        #[test]
        fn jaccard_is_symmetric_and_bounded(a in "[a-c ]{0,24}", b in "[a-c ]{0,24}") {
            let ab = jaccard(&a, &b);
            let ba = jaccard(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-12);
            prop_assert!((0.0..=1.0).contains(&ab));
        }
    }
}
