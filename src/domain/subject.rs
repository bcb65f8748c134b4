//! Subject identity facts that bind a share link to one person.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::Date;

use crate::domain::error::DomainError;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Verifiable identity fact supplied when a share link is issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubjectBinding {
    BirthDate {
        #[serde(with = "iso_date")]
        date: Date,
    },
    IdentityClaim { issuer: String, subject: String },
}

/// Fact presented by a viewer when opening a share link.
pub type SubjectProof = SubjectBinding;

impl SubjectBinding {
    /// Reject bindings that cannot identify anyone.
    pub fn validate(&self, today: Date) -> Result<(), DomainError> {
        match self {
            SubjectBinding::BirthDate { date } => {
                if *date > today {
                    return Err(DomainError::validation("birth date lies in the future"));
                }
                Ok(())
            }
            SubjectBinding::IdentityClaim { issuer, subject } => {
                if issuer.trim().is_empty() || subject.trim().is_empty() {
                    return Err(DomainError::validation(
                        "identity claim requires issuer and subject",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Compare a presented proof against this binding in constant time.
    pub fn matches(&self, proof: &SubjectProof) -> bool {
        let expected = self.canonical();
        let presented = proof.canonical();
        expected.as_bytes().ct_eq(presented.as_bytes()).unwrap_u8() == 1
    }

    fn canonical(&self) -> String {
        match self {
            SubjectBinding::BirthDate { date } => format!(
                "birth_date:{:04}-{:02}-{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            ),
            SubjectBinding::IdentityClaim { issuer, subject } => {
                format!("identity_claim:{}:{}", issuer.trim(), subject.trim())
            }
        }
    }
}
