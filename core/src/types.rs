//! Shared primitive types used across the whole engine.

/// Merchant identifier, as issued by the onboarding layer.
pub type MerchantId = String;

/// Stable customer identity key used for velocity and geo lookups.
/// Customer email when present, IP address as a fallback.
pub type CustomerKey = String;

/// Unique transaction reference (`txn-<uuid>`).
pub type TransactionRef = String;

/// Monetary amount in integer minor units (cents). Never a float.
pub type Amount = i64;

/// Unix milliseconds. All persisted timestamps use this representation.
pub type UnixMillis = i64;
