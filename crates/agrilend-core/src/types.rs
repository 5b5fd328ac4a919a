use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::LendingError;

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%) unless a field says otherwise.
pub type Rate = Decimal;

/// Number of decimal places carried on persisted monetary amounts.
pub const CENT_PRECISION: u32 = 2;

/// Round a monetary value to cent precision, half away from zero.
pub fn to_cents(value: Money) -> Money {
    value.round_dp_with_strategy(CENT_PRECISION, RoundingStrategy::MidpointAwayFromZero)
}

/// Currency code carried on transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    EUR,
    RWF,
    USD,
    Other(String),
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EUR => write!(f, "EUR"),
            Self::RWF => write!(f, "RWF"),
            Self::USD => write!(f, "USD"),
            Self::Other(code) => write!(f, "{}", code),
        }
    }
}

/// Mobile subscriber number used as a mobile-money account identifier.
///
/// Stored normalised: digits only, no leading '+', as the gateway expects
/// for its `partyId` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Msisdn(String);

impl Msisdn {
    pub fn new(raw: &str) -> Result<Self, LendingError> {
        let normalised: String = raw.trim().trim_start_matches('+').to_string();
        if normalised.is_empty() || !normalised.chars().all(|c| c.is_ascii_digit()) {
            return Err(LendingError::Validation {
                reason: format!("'{raw}' is not a valid MSISDN"),
            });
        }
        if normalised.len() < 8 || normalised.len() > 15 {
            return Err(LendingError::Validation {
                reason: format!("MSISDN '{raw}' must be 8-15 digits"),
            });
        }
        Ok(Self(normalised))
    }

    /// The gateway-facing party identifier (E.164 digits without '+').
    pub fn as_party_id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn nil() -> Self {
                Self(Uuid::nil())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identity of a loan aggregate.
    LoanId
);
entity_id!(
    /// Identity of a borrower. Farmer records themselves live outside the engine.
    FarmerId
);
entity_id!(
    /// Identity of a loan product.
    ProductId
);
entity_id!(
    /// Identity of a gateway transaction attempt.
    TransactionId
);
