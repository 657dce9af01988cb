use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::shared::error::EngineError;

/// The fixed, ordered pipeline. The common path walks this list front to
/// back; explicit overrides may move backwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NewEnquiry,
    Call1Scheduled,
    Qualified,
    Call2Scheduled,
    ProposalAgreed,
    AwaitingDeposit,
    DepositPaid,
    OnboardingScheduled,
    OnboardingComplete,
    Production,
    Installation,
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::NewEnquiry,
        Stage::Call1Scheduled,
        Stage::Qualified,
        Stage::Call2Scheduled,
        Stage::ProposalAgreed,
        Stage::AwaitingDeposit,
        Stage::DepositPaid,
        Stage::OnboardingScheduled,
        Stage::OnboardingComplete,
        Stage::Production,
        Stage::Installation,
        Stage::Completed,
    ];

    /// Index within the ordered pipeline.
    pub fn position(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    /// How long an opportunity is expected to sit in this stage before the
    /// owner should act. Drives follow-up task due times and the
    /// time-in-stage context handed to the classifier.
    pub fn response_target(&self) -> Duration {
        match self {
            Stage::NewEnquiry => Duration::hours(4),
            Stage::Call1Scheduled => Duration::days(3),
            Stage::Qualified => Duration::days(2),
            Stage::Call2Scheduled => Duration::days(5),
            Stage::ProposalAgreed => Duration::days(3),
            Stage::AwaitingDeposit => Duration::days(7),
            Stage::DepositPaid => Duration::days(2),
            Stage::OnboardingScheduled => Duration::days(7),
            Stage::OnboardingComplete => Duration::days(14),
            Stage::Production => Duration::days(30),
            Stage::Installation => Duration::days(14),
            Stage::Completed => Duration::days(365),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::NewEnquiry => "new_enquiry",
            Stage::Call1Scheduled => "call1_scheduled",
            Stage::Qualified => "qualified",
            Stage::Call2Scheduled => "call2_scheduled",
            Stage::ProposalAgreed => "proposal_agreed",
            Stage::AwaitingDeposit => "awaiting_deposit",
            Stage::DepositPaid => "deposit_paid",
            Stage::OnboardingScheduled => "onboarding_scheduled",
            Stage::OnboardingComplete => "onboarding_complete",
            Stage::Production => "production",
            Stage::Installation => "installation",
            Stage::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Stage {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_enquiry" => Ok(Stage::NewEnquiry),
            "call1_scheduled" => Ok(Stage::Call1Scheduled),
            "qualified" => Ok(Stage::Qualified),
            "call2_scheduled" => Ok(Stage::Call2Scheduled),
            "proposal_agreed" => Ok(Stage::ProposalAgreed),
            "awaiting_deposit" => Ok(Stage::AwaitingDeposit),
            "deposit_paid" => Ok(Stage::DepositPaid),
            "onboarding_scheduled" => Ok(Stage::OnboardingScheduled),
            "onboarding_complete" => Ok(Stage::OnboardingComplete),
            "production" => Ok(Stage::Production),
            "installation" => Ok(Stage::Installation),
            "completed" => Ok(Stage::Completed),
            other => Err(EngineError::InvalidStage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn registry_is_ordered() {
        assert_eq!(Stage::ALL.len(), 12);
        assert_eq!(Stage::ALL[0], Stage::NewEnquiry);
        assert_eq!(Stage::ALL[11], Stage::Completed);
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.position(), i);
        }
        assert!(Stage::AwaitingDeposit.position() < Stage::DepositPaid.position());
    }

    #[test]
    fn display_and_parse_roundtrip() {
        for stage in Stage::ALL {
            let parsed = Stage::from_str(&stage.to_string()).unwrap();
            assert_eq!(parsed, stage);
        }
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let err = Stage::from_str("closed_won").unwrap_err();
        assert_eq!(err.kind(), "invalid_stage");
    }

    #[test]
    fn every_stage_has_a_response_target() {
        for stage in Stage::ALL {
            assert!(stage.response_target() > Duration::zero());
        }
    }
}
