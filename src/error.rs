//! Error types for pricing and the catalog store

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{ProductRef, Unit};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PricingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Ingredient references unknown product {0}")]
    UnresolvedReference(ProductRef),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("A recipe named '{0}' already exists")]
    Duplicate(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Insufficient stock of {product}: available {available} {unit}, needed {needed} {unit}")]
    InsufficientStock {
        product: String,
        available: Decimal,
        needed: Decimal,
        unit: Unit,
    },
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}
