//! Section preflight (C4, `spec.md` §4.3).
//!
//! Compares the sections actually present in a parsed statement against two
//! frozen sets before anything downstream touches the data. Purely a gate —
//! it never inspects row content, only which section containers exist.

use crate::error::PreflightError;
use crate::flex::FlexStatementRaw;

pub const HARD_REQUIRED_SECTIONS: &[&str] = &[
    "Trades",
    "OpenPositions",
    "CashTransactions",
    "CorporateActions",
    "ConversionRates",
    "SecuritiesInfo",
    "AccountInformation",
];

pub const RECONCILIATION_REQUIRED_SECTIONS: &[&str] =
    &["MTMPerformanceSummaryInBase", "FIFOPerformanceSummaryInBase"];

/// Sections this crate knows are legitimate future extensions: persisted
/// raw, never block preflight, never yet mapped to canonical events.
pub const FUTURE_PROOF_SECTIONS: &[&str] = &[
    "InterestAccruals",
    "ChangeInDividendAccruals",
    "OpenDividendAccruals",
    "ChangeInNAV",
    "StmtFunds",
    "UnbundledCommissionDetails",
];

/// Check a statement's present section names against the hard-required set,
/// and — when reconciliation publish is enabled — the reconciliation set.
pub fn check(statement: &FlexStatementRaw, reconciliation_enabled: bool) -> Result<(), PreflightError> {
    let present: std::collections::HashSet<&str> =
        statement.sections.iter().map(|s| s.name.as_str()).collect();

    let mut missing: Vec<&'static str> = HARD_REQUIRED_SECTIONS
        .iter()
        .filter(|name| !present.contains(*name))
        .copied()
        .collect();

    if reconciliation_enabled {
        missing.extend(
            RECONCILIATION_REQUIRED_SECTIONS
                .iter()
                .filter(|name| !present.contains(*name))
                .copied(),
        );
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PreflightError::MissingRequiredSection(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flex::SectionRaw;

    fn statement_with(sections: &[&str]) -> FlexStatementRaw {
        FlexStatementRaw {
            attributes: Default::default(),
            sections: sections
                .iter()
                .map(|name| SectionRaw {
                    name: name.to_string(),
                    rows: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn all_hard_required_sections_present_passes() {
        let statement = statement_with(HARD_REQUIRED_SECTIONS);
        assert!(check(&statement, false).is_ok());
    }

    #[test]
    fn missing_hard_required_section_fails_with_exact_names() {
        let mut present: Vec<&str> = HARD_REQUIRED_SECTIONS.to_vec();
        present.retain(|s| *s != "Trades");
        let statement = statement_with(&present);

        let err = check(&statement, false).unwrap_err();
        match err {
            PreflightError::MissingRequiredSection(missing) => {
                assert_eq!(missing, vec!["Trades"]);
            }
        }
    }

    #[test]
    fn reconciliation_sections_only_checked_when_enabled() {
        let statement = statement_with(HARD_REQUIRED_SECTIONS);
        assert!(check(&statement, false).is_ok());
        let err = check(&statement, true).unwrap_err();
        match err {
            PreflightError::MissingRequiredSection(missing) => {
                assert_eq!(
                    missing,
                    vec!["MTMPerformanceSummaryInBase", "FIFOPerformanceSummaryInBase"]
                );
            }
        }
    }

    #[test]
    fn future_proof_sections_never_block() {
        let mut present: Vec<&str> = HARD_REQUIRED_SECTIONS.to_vec();
        present.extend(FUTURE_PROOF_SECTIONS);
        let statement = statement_with(&present);
        assert!(check(&statement, false).is_ok());
    }
}
