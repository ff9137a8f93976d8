//! Per-attempt retry bookkeeping shared by the request executor.

/// Per-attempt state for provider-specific retry heuristics: a stable
/// fingerprint of the last error, how many consecutive attempts produced the
/// same fingerprint, and whether the current error calls for poisoning an
/// entire provider family rather than just the one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySignal {
    pub signature: Option<String>,
    pub consecutive: u32,
    pub avoid_all_on_retry: bool,
}

impl RetrySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a new attempt's fingerprint in. Returns the updated
    /// `consecutive` count: a repeat of the same signature increments it, a
    /// different signature resets it to 1.
    pub fn observe(&mut self, signature: String, avoid_all_on_retry: bool) -> u32 {
        if self.signature.as_deref() == Some(signature.as_str()) {
            self.consecutive += 1;
        } else {
            self.signature = Some(signature);
            self.consecutive = 1;
        }
        self.avoid_all_on_retry = avoid_all_on_retry;
        self.consecutive
    }

    /// True once `consecutive` crosses `threshold` — the executor's signal to
    /// switch from "retry same family" to "poison family".
    pub fn should_poison_family(&self, threshold: u32) -> bool {
        self.avoid_all_on_retry || self.consecutive > threshold
    }
}

/// Produces a stable fingerprint from (status code, provider error code,
/// upstream error code, first 120 chars of the normalized message). Two
/// errors with the same fingerprint are considered "the same failure" for
/// the purposes of `RetrySignal::consecutive`.
pub fn extract_retry_error_signature(
    status: Option<u16>,
    code: Option<&str>,
    upstream_code: Option<&str>,
    message: &str,
) -> String {
    let normalized: String = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = normalized.chars().take(120).collect();
    format!(
        "{}|{}|{}|{}",
        status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
        code.unwrap_or("-"),
        upstream_code.unwrap_or("-"),
        truncated
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_signatures_increment_consecutive() {
        let mut signal = RetrySignal::new();
        let sig = extract_retry_error_signature(Some(429), Some("rate_limited"), None, "Too many requests");
        assert_eq!(signal.observe(sig.clone(), false), 1);
        assert_eq!(signal.observe(sig, false), 2);
    }

    #[test]
    fn different_signature_resets_consecutive() {
        let mut signal = RetrySignal::new();
        signal.observe("a".to_string(), false);
        signal.observe("a".to_string(), false);
        assert_eq!(signal.observe("b".to_string(), false), 1);
    }

    #[test]
    fn signature_truncates_message_to_120_chars() {
        let long = "x".repeat(500);
        let sig = extract_retry_error_signature(Some(500), None, None, &long);
        let message_part = sig.rsplit('|').next().unwrap();
        assert_eq!(message_part.len(), 120);
    }

    #[test]
    fn poisons_family_past_threshold_or_on_explicit_flag() {
        let mut signal = RetrySignal::new();
        for _ in 0..4 {
            signal.observe("same".to_string(), false);
        }
        assert!(!signal.should_poison_family(5));
        assert!(signal.should_poison_family(3));

        let mut flagged = RetrySignal::new();
        flagged.observe("x".to_string(), true);
        assert!(flagged.should_poison_family(100));
    }
}
