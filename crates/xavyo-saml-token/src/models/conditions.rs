//! Assertion validity window

use crate::error::{SamlError, SamlResult};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Temporal validity conditions of an assertion.
///
/// Either explicit bounds or a token period (in minutes) that the issuer
/// turns into bounds at issuance time. Explicit bounds win over the period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conditions {
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token_period_minutes: i64,
}

/// Outcome of evaluating conditions against an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    NotYetValid,
    Expired,
}

impl Conditions {
    /// Conditions with explicit bounds.
    ///
    /// When both bounds are given `not_after` must be strictly later than
    /// `not_before`.
    pub fn new(
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> SamlResult<Self> {
        check_order(not_before, not_after)?;
        Ok(Self {
            not_before,
            not_after,
            token_period_minutes: 0,
        })
    }

    /// Conditions derived from a token lifetime at issuance.
    pub fn from_token_period(minutes: i64) -> SamlResult<Self> {
        if minutes < 0 {
            return Err(SamlError::Construction(format!(
                "Token period must not be negative, got {minutes} minutes"
            )));
        }
        Ok(Self {
            not_before: None,
            not_after: None,
            token_period_minutes: minutes,
        })
    }

    /// Compute the effective bounds for an assertion issued at `issued_at`.
    ///
    /// The result carries explicit bounds only (period folded in) truncated
    /// to whole seconds, which is the precision written to the wire.
    pub fn resolve(&self, issued_at: DateTime<Utc>) -> SamlResult<Self> {
        if self.token_period_minutes < 0 {
            return Err(SamlError::Construction(format!(
                "Token period must not be negative, got {} minutes",
                self.token_period_minutes
            )));
        }

        let issued_at = issued_at.trunc_subsecs(0);
        let explicit = self.not_before.is_some() || self.not_after.is_some();

        let (not_before, not_after) = if !explicit && self.token_period_minutes == 0 {
            (None, None)
        } else {
            let not_before = self.not_before.unwrap_or(issued_at).trunc_subsecs(0);
            let not_after = match self.not_after {
                Some(na) => Some(na.trunc_subsecs(0)),
                None if self.token_period_minutes > 0 => {
                    Some(period_end(not_before, self.token_period_minutes)?)
                }
                None => None,
            };
            (Some(not_before), not_after)
        };

        Self::new(not_before, not_after)
    }

    /// True iff `not_before <= at <= not_after`; an unset bound is open.
    #[must_use]
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.validity_with_skew(at, TimeDelta::zero()) == Validity::Valid
    }

    /// Evaluate the window widened by `skew` on both sides. A bound pushed
    /// past the representable range by the skew is treated as open.
    #[must_use]
    pub fn validity_with_skew(&self, at: DateTime<Utc>, skew: TimeDelta) -> Validity {
        let skew = skew.abs();
        if let Some(nb) = self.not_before.and_then(|nb| nb.checked_sub_signed(skew)) {
            if at < nb {
                return Validity::NotYetValid;
            }
        }
        if let Some(na) = self.not_after.and_then(|na| na.checked_add_signed(skew)) {
            if at > na {
                return Validity::Expired;
            }
        }
        Validity::Valid
    }

    /// Whether the conditions constrain time at all.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.not_before.is_some() || self.not_after.is_some()
    }
}

fn period_end(not_before: DateTime<Utc>, minutes: i64) -> SamlResult<DateTime<Utc>> {
    TimeDelta::try_minutes(minutes)
        .and_then(|period| not_before.checked_add_signed(period))
        .ok_or_else(|| {
            SamlError::Construction(format!("Token period of {minutes} minutes is out of range"))
        })
}

fn check_order(
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
) -> SamlResult<()> {
    if let (Some(nb), Some(na)) = (not_before, not_after) {
        if na <= nb {
            return Err(SamlError::Construction(format!(
                "NotOnOrAfter ({na}) must be later than NotBefore ({nb})"
            )));
        }
    }
    Ok(())
}
