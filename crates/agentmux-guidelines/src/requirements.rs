//! Requirement-gate checking (spec §4.H `processSignal`, §6 environment
//! variables).
//!
//! Only `"GitHub API access"` has a concrete gate today — `GITHUB_TOKEN`
//! being set and non-empty (spec §6: "`GITHUB_TOKEN` (optional, tested by
//! guidelines that require GitHub access)"). Any other declared
//! requirement name has no known check yet and is treated as satisfied;
//! this mirrors `toka-llm-gateway::config::EnvLoader`'s pattern of gating
//! only on names it actually recognizes rather than failing closed on
//! free-form strings it can't interpret.

const GITHUB_REQUIREMENT: &str = "github api access";

fn github_token_present() -> bool {
    std::env::var("GITHUB_TOKEN").map(|v| !v.is_empty()).unwrap_or(false)
}

/// Check `requirements` against known gates, returning the subset that are
/// unmet (empty if all satisfied).
pub fn unmet_requirements(requirements: &[String]) -> Vec<String> {
    requirements
        .iter()
        .filter(|req| req.eq_ignore_ascii_case(GITHUB_REQUIREMENT) && !github_token_present())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_requirement_names_are_treated_as_satisfied() {
        let unmet = unmet_requirements(&["some made-up capability".to_string()]);
        assert!(unmet.is_empty());
    }

    #[test]
    fn github_requirement_unmet_without_token() {
        // SAFETY: test-only env mutation, single-threaded within this test.
        unsafe {
            std::env::remove_var("GITHUB_TOKEN");
        }
        let unmet = unmet_requirements(&["GitHub API access".to_string()]);
        assert_eq!(unmet, vec!["GitHub API access".to_string()]);
    }

    #[test]
    fn github_requirement_met_with_token() {
        // SAFETY: test-only env mutation, single-threaded within this test.
        unsafe {
            std::env::set_var("GITHUB_TOKEN", "ghp_test");
        }
        let unmet = unmet_requirements(&["GitHub API access".to_string()]);
        assert!(unmet.is_empty());
        unsafe {
            std::env::remove_var("GITHUB_TOKEN");
        }
    }
}
