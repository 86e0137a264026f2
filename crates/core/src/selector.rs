// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Set-matching label selector shared by `ListMachines` and `ListEvents`.

use std::collections::HashMap;

/// A required-equality label selector: every `(key, value)` pair must be
/// present with an equal value on the candidate's label map. An empty
/// selector matches everything.
pub type Selector = HashMap<String, String>;

pub fn selector_matches(labels: &HashMap<String, String>, selector: &Selector) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|candidate| candidate == v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_matches_everything() {
        let labels = HashMap::from([("a".to_string(), "1".to_string())]);
        assert!(selector_matches(&labels, &Selector::new()));
    }

    #[test]
    fn selector_requires_all_pairs_present_and_equal() {
        let labels = HashMap::from([
            ("env".to_string(), "prod".to_string()),
            ("team".to_string(), "infra".to_string()),
        ]);
        let selector = Selector::from([("env".to_string(), "prod".to_string())]);
        assert!(selector_matches(&labels, &selector));

        let mismatched = Selector::from([("env".to_string(), "staging".to_string())]);
        assert!(!selector_matches(&labels, &mismatched));

        let missing_key = Selector::from([("region".to_string(), "us".to_string())]);
        assert!(!selector_matches(&labels, &missing_key));
    }
}
