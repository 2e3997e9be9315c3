//! The intentionally narrow condition grammar: `A == B` and `A >= B` only.
//!
//! This is a deliberate non-goal for generality (no general expression
//! engine); a hand-written parser is enough.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ge,
}

/// Evaluate a condition string after template substitution has already
/// happened. Any string that doesn't match `A == B` / `A >= B`, or whose
/// numeric parse fails for `>=`, evaluates to `false` (causing the step to
/// be skipped) rather than erroring.
pub fn evaluate(condition: &str) -> bool {
    let (operator, left, right) = match split(condition) {
        Some(parts) => parts,
        None => return false,
    };

    match operator {
        Operator::Eq => left.trim() == right.trim(),
        Operator::Ge => match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
            (Ok(l), Ok(r)) => l >= r,
            _ => false,
        },
    }
}

fn split(condition: &str) -> Option<(Operator, &str, &str)> {
    if let Some(idx) = condition.find("==") {
        return Some((Operator::Eq, &condition[..idx], &condition[idx + 2..]));
    }
    if let Some(idx) = condition.find(">=") {
        return Some((Operator::Ge, &condition[..idx], &condition[idx + 2..]));
    }
    None
}

/// An empty condition list always passes; otherwise every condition in the
/// list must evaluate to `true`.
pub fn all_pass(conditions: &[String]) -> bool {
    conditions.iter().all(|c| evaluate(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_condition_list_always_passes() {
        assert!(all_pass(&[]));
    }

    #[test]
    fn string_equality_is_whitespace_trimmed() {
        assert!(evaluate(" hello == hello "));
        assert!(evaluate("hello==hello"));
        assert!(!evaluate("hello == world"));
    }

    #[test]
    fn numeric_gte_compares_as_numbers() {
        assert!(evaluate("10 >= 5"));
        assert!(evaluate("5 >= 5"));
        assert!(!evaluate("3 >= 5"));
    }

    #[test]
    fn malformed_numeric_comparison_is_false_not_error() {
        assert!(!evaluate("abc >= 5"));
        assert!(!evaluate("5 >= xyz"));
    }

    #[test]
    fn unrecognized_grammar_skips_the_step() {
        assert!(!evaluate("hello != world"));
        assert!(!evaluate("not a condition"));
    }

    #[test]
    fn all_conditions_must_pass() {
        assert!(all_pass(&["1 >= 1".to_string(), "a == a".to_string()]));
        assert!(!all_pass(&["1 >= 1".to_string(), "a == b".to_string()]));
    }
}
