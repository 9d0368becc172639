//! # Routing Key Patterns
//!
//! Hierarchical topic matching used by `topic` exchanges. Keys and patterns
//! are dot-separated words; in a pattern `*` matches exactly one word and `#`
//! matches zero or more words. An empty key has zero words.

use crate::message::ExchangeKind;

fn words(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split('.').collect()
    }
}

/// Does `routing_key` match the topic `pattern`?
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    match_words(&words(pattern), &words(routing_key))
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // Collapse runs of '#', they are equivalent to one.
            if rest.first() == Some(&"#") {
                return match_words(rest, key);
            }
            (0..=key.len()).any(|skip| match_words(rest, &key[skip..]))
        }
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

/// Does a message with `routing_key` reach a queue bound with `binding_key`
/// on an exchange of `kind`?
pub fn binding_matches(kind: ExchangeKind, binding_key: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => binding_key == routing_key,
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => topic_matches(binding_key, routing_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_star_matches_exactly_one_word() {
        assert!(topic_matches("a.*", "a.b"));
        assert!(!topic_matches("a.*", "a.b.c"));
        assert!(!topic_matches("a.*", "a"));
    }

    #[test]
    fn test_hash_matches_zero_or_more_words() {
        assert!(topic_matches("a.#", "a"));
        assert!(topic_matches("a.#", "a.b"));
        assert!(topic_matches("a.#", "a.b.c"));
        assert!(!topic_matches("a.#", "b.a"));
    }

    #[test]
    fn test_hash_in_the_middle() {
        assert!(topic_matches("infrastructure.#.status", "infrastructure.vm.status"));
        assert!(topic_matches("infrastructure.#.status", "infrastructure.status"));
        assert!(topic_matches("infrastructure.#.status", "infrastructure.rg.vm.status"));
        assert!(!topic_matches("infrastructure.#.status", "infrastructure.vm.state"));
    }

    #[test]
    fn test_lone_hash_matches_everything() {
        assert!(topic_matches("#", ""));
        assert!(topic_matches("#", "auth.login"));
        assert!(topic_matches("#.#", "x.y.z"));
    }

    #[test]
    fn test_literal_patterns() {
        assert!(topic_matches("auth.login", "auth.login"));
        assert!(!topic_matches("auth.login", "auth.logout"));
        assert!(!topic_matches("auth", "auth.login"));
    }

    #[test]
    fn test_exchange_kinds() {
        assert!(binding_matches(ExchangeKind::Direct, "q", "q"));
        assert!(!binding_matches(ExchangeKind::Direct, "a.*", "a.b"));
        assert!(binding_matches(ExchangeKind::Fanout, "", "anything.at.all"));
        assert!(binding_matches(ExchangeKind::Topic, "a.*", "a.b"));
    }

    fn word() -> impl Strategy<Value = String> {
        "[a-z]{1,6}"
    }

    proptest! {
        #[test]
        fn prop_literal_key_matches_itself(key in prop::collection::vec(word(), 1..6)) {
            let key = key.join(".");
            prop_assert!(topic_matches(&key, &key));
        }

        #[test]
        fn prop_prefix_hash_matches_any_suffix(
            prefix in word(),
            suffix in prop::collection::vec(word(), 0..5),
        ) {
            let mut key = vec![prefix.clone()];
            key.extend(suffix);
            let pattern = format!("{prefix}.#");
            prop_assert!(topic_matches(&pattern, &key.join(".")));
        }

        #[test]
        fn prop_star_requires_exact_word_count(
            prefix in word(),
            suffix in prop::collection::vec(word(), 0..5),
        ) {
            let mut key = vec![prefix.clone()];
            let len = suffix.len();
            key.extend(suffix);
            let pattern = format!("{prefix}.*");
            prop_assert_eq!(topic_matches(&pattern, &key.join(".")), len == 1);
        }
    }
}
