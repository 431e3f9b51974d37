//! Value Objects for the storefront

use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    #[error("quantity must not exceed {max}")]
    QuantityTooLarge { max: u32 },
    #[error("session token must not be empty")]
    EmptySessionToken,
    #[error("malformed order number: {0}")]
    MalformedOrderNumber(String),
}

/// Anonymous session token, allocated lazily on first cart access.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Result<Self, ValueError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(ValueError::EmptySessionToken); }
        Ok(Self(value))
    }
    pub fn generate() -> Self { Self(Uuid::new_v4().simple().to_string()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for SessionToken {
    type Error = ValueError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self { token.0 }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Who owns a cart: an authenticated user or an anonymous session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identity {
    User { id: Uuid },
    Anonymous { session_token: SessionToken },
}

impl Identity {
    pub fn user(id: Uuid) -> Self { Self::User { id } }
    pub fn anonymous(session_token: SessionToken) -> Self { Self::Anonymous { session_token } }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User { id } => Some(*id),
            Self::Anonymous { .. } => None,
        }
    }

    pub fn session_token(&self) -> Option<&SessionToken> {
        match self {
            Self::User { .. } => None,
            Self::Anonymous { session_token } => Some(session_token),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { id } => write!(f, "user:{id}"),
            Self::Anonymous { session_token } => write!(f, "session:{session_token}"),
        }
    }
}

/// Quantity value object, between one and [`Quantity::MAX`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);
    /// Largest quantity a line can hold; matches the `INTEGER` column.
    pub const MAX: u32 = i32::MAX as u32;

    pub fn new(value: u32) -> Result<Self, ValueError> {
        if value == 0 { return Err(ValueError::ZeroQuantity); }
        if value > Self::MAX { return Err(ValueError::QuantityTooLarge { max: Self::MAX }); }
        Ok(Self(value))
    }
    pub fn value(&self) -> u32 { self.0 }

    /// Sum of two quantities, rejected rather than clamped past `MAX`.
    pub fn checked_add(&self, other: Quantity) -> Result<Self, ValueError> {
        // Both operands are at most i32::MAX, so the u32 sum cannot wrap.
        Self::new(self.0 + other.0)
    }

    /// Applies a stepper delta. `Ok(None)` means the line should disappear.
    pub fn step(&self, delta: i32) -> Result<Option<Self>, ValueError> {
        let next = i64::from(self.0) + i64::from(delta);
        if next <= 0 { return Ok(None); }
        let next = u32::try_from(next).map_err(|_| ValueError::QuantityTooLarge { max: Self::MAX })?;
        Self::new(next).map(Some)
    }

    pub fn as_i32(&self) -> i32 {
        i32::try_from(self.0).unwrap_or(i32::MAX)
    }
}

impl TryFrom<u32> for Quantity {
    type Error = ValueError;
    fn try_from(value: u32) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> Self { q.0 }
}

/// Size label of a line. `Some("")` and `None` are different sizes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(Option<String>);

impl Size {
    pub fn none() -> Self { Self(None) }
    pub fn labelled(label: impl Into<String>) -> Self { Self(Some(label.into())) }
    pub fn as_deref(&self) -> Option<&str> { self.0.as_deref() }
}

impl From<Option<String>> for Size {
    fn from(value: Option<String>) -> Self { Self(value) }
}

/// Human-readable order number: `ORD` + `YYYYMMDD` + six random digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    pub const PREFIX: &'static str = "ORD";
    const SUFFIX_SPACE: u32 = 1_000_000;

    pub fn from_parts(date: NaiveDate, suffix: u32) -> Self {
        Self(format!("{}{}{:06}", Self::PREFIX, date.format("%Y%m%d"), suffix % Self::SUFFIX_SPACE))
    }

    pub fn random(date: NaiveDate, rng: &mut impl Rng) -> Self {
        Self::from_parts(date, rng.gen_range(0..Self::SUFFIX_SPACE))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl FromStr for OrderNumber {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValueError::MalformedOrderNumber(s.to_string());
        let digits = s.strip_prefix(Self::PREFIX).ok_or_else(malformed)?;
        if digits.len() != 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        NaiveDate::parse_from_str(&digits[..8], "%Y%m%d").map_err(|_| malformed())?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = ValueError;
    fn try_from(value: String) -> Result<Self, Self::Error> { value.parse() }
}

impl From<OrderNumber> for String {
    fn from(n: OrderNumber) -> Self { n.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
