use std::collections::BTreeMap;

/// Shared tie-breaking helpers used by every planner (FixUp, Replicate,
/// Rebalance, Purge): spec.md §4.4's closing "Tie-breaking rules (apply to
/// all planners)" — worker load is compared first by chunk count, then by
/// alphabetical worker name for stability.
///
/// Picks the least-loaded worker among `candidates`, alphabetically first
/// on a tie.
pub fn least_loaded<'a, I: IntoIterator<Item = &'a String>>(candidates: I, loads: &BTreeMap<String, u32>) -> Option<String> {
    candidates.into_iter().min_by_key(|w| (loads.get(*w).copied().unwrap_or(0), (*w).clone())).cloned()
}

/// Picks the most-loaded worker among `candidates`, alphabetically first
/// on a tie (spec.md §9's resolution to Open Question (a)).
pub fn most_loaded<'a, I: IntoIterator<Item = &'a String>>(candidates: I, loads: &BTreeMap<String, u32>) -> Option<String> {
    candidates
        .into_iter()
        .map(|w| (loads.get(w).copied().unwrap_or(0), w))
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
        .map(|(_, w)| w.clone())
}

/// A worker is eligible as a source or destination only if its FindAll
/// succeeded (spec.md §4.4's tie-breaking rule 2: "a worker with a failed
/// FindAll is considered unknown and never selected").
pub fn known_workers<'a>(workers: &'a BTreeMap<String, bool>) -> impl Iterator<Item = &'a String> {
    workers.iter().filter(|(_, ok)| **ok).map(|(w, _)| w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_loaded_breaks_ties_alphabetically() {
        let loads = BTreeMap::from([("zeta".to_string(), 3), ("alpha".to_string(), 3), ("beta".to_string(), 5)]);
        let candidates = vec!["zeta".to_string(), "alpha".to_string(), "beta".to_string()];
        assert_eq!(least_loaded(&candidates, &loads), Some("alpha".to_string()));
    }

    #[test]
    fn most_loaded_breaks_ties_alphabetically() {
        let loads = BTreeMap::from([("zeta".to_string(), 5), ("alpha".to_string(), 5), ("beta".to_string(), 1)]);
        let candidates = vec!["zeta".to_string(), "alpha".to_string(), "beta".to_string()];
        assert_eq!(most_loaded(&candidates, &loads), Some("alpha".to_string()));
    }
}
