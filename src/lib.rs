//! OpenSASE Storefront
//!
//! Cart and checkout transaction engine for a small storefront.
//!
//! ## Features
//! - Per-identity shopping carts (authenticated user or anonymous session)
//! - Cart line merging by (product, size) with live catalog pricing
//! - Atomic checkout into immutable, price-snapshotted orders
//! - Order status labels and progress steps
//! - Order detail and history reads

pub mod api;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod services;
pub mod storage;

use thiserror::Error;

pub use domain::aggregates::{Cart, CartLine, LineChange, Order, OrderItem, OrderStatus, Product, ShippingRecord};
pub use domain::value_objects::{Identity, OrderNumber, Quantity, SessionToken, Size};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Could not allocate a unique order number after {attempts} attempts")]
    OrderNumberExhausted { attempts: u32 },

    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl CommerceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Stable machine-readable code for the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::PermissionDenied => "permission_denied",
            Self::EmptyCart => "empty_cart",
            Self::OrderNumberExhausted { .. } => "order_number_exhausted",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OrderNumberExhausted { .. } | Self::Unavailable(_))
    }
}

impl From<domain::value_objects::ValueError> for CommerceError {
    fn from(e: domain::value_objects::ValueError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

impl From<storage::StoreError> for CommerceError {
    fn from(e: storage::StoreError) -> Self {
        use storage::StoreError;
        match e {
            StoreError::CartEmpty => Self::EmptyCart,
            StoreError::LineNotFound => Self::not_found("Cart line"),
            StoreError::OrderNotFound => Self::not_found("Order"),
            StoreError::Invalid(e) => e.into(),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
