//! Quote and contact status machines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    InReview,
    Sent,
    Won,
    Lost,
    Archived,
}

impl QuoteStatus {
    pub const ALL: [QuoteStatus; 6] = [
        QuoteStatus::Pending,
        QuoteStatus::InReview,
        QuoteStatus::Sent,
        QuoteStatus::Won,
        QuoteStatus::Lost,
        QuoteStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Pending => "pending",
            QuoteStatus::InReview => "in_review",
            QuoteStatus::Sent => "sent",
            QuoteStatus::Won => "won",
            QuoteStatus::Lost => "lost",
            QuoteStatus::Archived => "archived",
        }
    }

    /// Still being worked, not yet decided
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            QuoteStatus::Pending | QuoteStatus::InReview | QuoteStatus::Sent
        )
    }

    /// Open quotes move freely, decided quotes may only be archived,
    /// archived is final. Re-asserting the current status is always allowed.
    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            QuoteStatus::Pending | QuoteStatus::InReview | QuoteStatus::Sent => true,
            QuoteStatus::Won | QuoteStatus::Lost => next == QuoteStatus::Archived,
            QuoteStatus::Archived => false,
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuoteStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Invalid status. Must be one of: {}",
                    QuoteStatus::ALL.map(|s| s.as_str()).join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContactStatus {
    New,
    Contacted,
    Closed,
    Converted,
}

impl ContactStatus {
    pub const ALL: [ContactStatus; 4] = [
        ContactStatus::New,
        ContactStatus::Contacted,
        ContactStatus::Closed,
        ContactStatus::Converted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::New => "new",
            ContactStatus::Contacted => "contacted",
            ContactStatus::Closed => "closed",
            ContactStatus::Converted => "converted",
        }
    }

    /// `converted` is only entered through conversion and never left.
    pub fn can_transition_to(&self, next: ContactStatus) -> bool {
        if *self == next {
            return true;
        }
        !matches!(self, ContactStatus::Converted) && next != ContactStatus::Converted
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContactStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Invalid status. Must be one of: {}",
                    ContactStatus::ALL.map(|s| s.as_str()).join(", ")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_status_roundtrips_through_str() {
        for status in QuoteStatus::ALL {
            assert_eq!(status.as_str().parse::<QuoteStatus>().unwrap(), status);
        }
        assert!("approved".parse::<QuoteStatus>().is_err());
    }

    #[test]
    fn test_open_quotes_move_freely() {
        use QuoteStatus::*;
        for from in [Pending, InReview, Sent] {
            for to in QuoteStatus::ALL {
                assert!(from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_decided_quotes_only_archive() {
        use QuoteStatus::*;
        assert!(Won.can_transition_to(Archived));
        assert!(Lost.can_transition_to(Archived));
        assert!(!Won.can_transition_to(Lost));
        assert!(!Lost.can_transition_to(Pending));
        assert!(Won.can_transition_to(Won));
    }

    #[test]
    fn test_archived_is_final() {
        for to in QuoteStatus::ALL {
            assert_eq!(
                QuoteStatus::Archived.can_transition_to(to),
                to == QuoteStatus::Archived
            );
        }
    }

    #[test]
    fn test_contact_transitions() {
        use ContactStatus::*;
        assert!(New.can_transition_to(Contacted));
        assert!(Contacted.can_transition_to(Closed));
        assert!(Closed.can_transition_to(New));
        assert!(!New.can_transition_to(Converted));
        assert!(!Converted.can_transition_to(New));
        assert!(Converted.can_transition_to(Converted));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&QuoteStatus::InReview).unwrap(),
            "\"in_review\""
        );
        assert_eq!(
            serde_json::from_str::<ContactStatus>("\"contacted\"").unwrap(),
            ContactStatus::Contacted
        );
    }
}
