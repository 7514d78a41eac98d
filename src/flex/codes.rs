//! Flex error code taxonomy — single source of truth (`spec.md` §4.2).
//!
//! Grounded in the IBKR Flex reference clients in the retrieval pack
//! (`Czichy-ibkr-rust`'s `flex_statement` module, `henk789-ib-flex`'s
//! activity types) for which codes exist and what they mean; the
//! retryable/token/fatal partitioning is this crate's own classification
//! per `spec.md` §4.2's "Error code taxonomy" requirement.

/// A Flex Web Service error code. Unknown codes are fatal statement errors
/// by default (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Code(pub u32);

/// Statement generation in progress; keep polling.
pub const STATEMENT_IN_PROGRESS: Code = Code(1019);
/// Too many requests / rate limited; back off longer than the base delay.
pub const RATE_LIMITED: Code = Code(1018);
/// Query temporarily unavailable.
pub const QUERY_TEMPORARILY_UNAVAILABLE: Code = Code(1009);
/// Flex Web Service session token has expired.
pub const TOKEN_EXPIRED: Code = Code(1012);
/// Flex Web Service session token is invalid.
pub const TOKEN_INVALID: Code = Code(1015);

/// Codes that should be retried from within the poll loop rather than
/// raised as a statement-phase error.
pub fn is_retryable_in_poll(code: Code) -> bool {
    matches!(code, STATEMENT_IN_PROGRESS | RATE_LIMITED | QUERY_TEMPORARILY_UNAVAILABLE)
}

/// Codes that indicate the session token itself is the problem.
pub fn is_token_error(code: Code) -> bool {
    matches!(code, TOKEN_EXPIRED | TOKEN_INVALID)
}

/// Codes with a retry-floor larger than the ordinary exponential backoff
/// schedule would otherwise produce (`spec.md` §4.2: "Code-specific floors
/// override when larger, notably 1009/1018/1019").
pub fn retry_floor(code: Code) -> std::time::Duration {
    use std::time::Duration;
    match code {
        STATEMENT_IN_PROGRESS => Duration::from_secs(10),
        RATE_LIMITED => Duration::from_secs(30),
        QUERY_TEMPORARILY_UNAVAILABLE => Duration::from_secs(15),
        _ => Duration::ZERO,
    }
}

/// Every other code is fatal: a statement-phase error that aborts the run.
pub fn is_fatal(code: Code) -> bool {
    !is_retryable_in_poll(code) && !is_token_error(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_are_fatal() {
        let unknown = Code(9999);
        assert!(is_fatal(unknown));
        assert!(!is_retryable_in_poll(unknown));
        assert!(!is_token_error(unknown));
    }

    #[test]
    fn token_codes_classify_correctly() {
        assert!(is_token_error(TOKEN_EXPIRED));
        assert!(is_token_error(TOKEN_INVALID));
        assert!(!is_fatal(TOKEN_EXPIRED));
    }

    #[test]
    fn retryable_codes_have_floors() {
        assert!(is_retryable_in_poll(STATEMENT_IN_PROGRESS));
        assert!(retry_floor(RATE_LIMITED) > retry_floor(STATEMENT_IN_PROGRESS));
    }
}
