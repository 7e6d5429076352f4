//! Typed operation payloads
//!
//! One variant per operation kind, so dispatch to the right domain
//! collaborator and kind-aware conflict rules are checked at compile time
//! instead of through a stringly-typed JSON blob.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::queue_item::OperationKind;

/// The full business content of one offline-originated operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    /// A completed sale captured while offline
    Sale(SalePayload),
    /// A payment against a sale
    Payment(PaymentPayload),
    /// A receipt (re)print request
    Receipt(ReceiptPayload),
    /// A stock adjustment
    InventoryUpdate(InventoryUpdatePayload),
    /// An operation with no dedicated collaborator
    Other(OtherPayload),
}

/// One line of a sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: String,
    pub description: String,
    pub quantity: i64,
    /// Unit price in minor currency units
    pub unit_price_cents: i64,
    /// VAT rate in basis points (e.g. 2000 = 20%)
    pub vat_rate_bp: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalePayload {
    /// Offline-generated invoice number; the natural key for duplicate detection
    pub client_reference: String,
    pub register: String,
    pub cashier: String,
    pub lines: Vec<SaleLine>,
    pub subtotal_cents: i64,
    pub vat_cents: i64,
    pub total_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    /// Offline-generated payment reference; the natural key for duplicate detection
    pub client_reference: String,
    /// Natural key of the sale this payment belongs to
    pub sale_reference: String,
    /// Payment method, e.g. "cash" or "card"
    pub method: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptPayload {
    pub client_reference: String,
    /// Natural key of the sale the receipt renders
    pub sale_reference: String,
    pub template: String,
    pub copies: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryUpdatePayload {
    pub client_reference: String,
    pub product_id: String,
    /// Signed stock delta; negative for deductions
    pub quantity_delta: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherPayload {
    pub client_reference: String,
    pub description: String,
    pub data: serde_json::Value,
}

impl OperationPayload {
    /// The operation kind this payload belongs to
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Sale(_) => OperationKind::Sale,
            Self::Payment(_) => OperationKind::Payment,
            Self::Receipt(_) => OperationKind::Receipt,
            Self::InventoryUpdate(_) => OperationKind::InventoryUpdate,
            Self::Other(_) => OperationKind::Other,
        }
    }

    /// The business-meaningful identifier used for duplicate detection,
    /// independent of any storage-assigned id
    #[must_use]
    pub fn natural_key(&self) -> &str {
        match self {
            Self::Sale(payload) => &payload.client_reference,
            Self::Payment(payload) => &payload.client_reference,
            Self::Receipt(payload) => &payload.client_reference,
            Self::InventoryUpdate(payload) => &payload.client_reference,
            Self::Other(payload) => &payload.client_reference,
        }
    }

    /// The natural key of a dependent entity this operation references,
    /// if the kind has one (e.g. the sale a payment belongs to)
    #[must_use]
    pub fn dependency_key(&self) -> Option<&str> {
        match self {
            Self::Payment(payload) => Some(&payload.sale_reference),
            Self::Receipt(payload) => Some(&payload.sale_reference),
            Self::Sale(_) | Self::InventoryUpdate(_) | Self::Other(_) => None,
        }
    }

    /// Checks the invariants that can be validated at enqueue time.
    /// Failures here reject the enqueue outright; nothing is queued.
    pub fn validate(&self) -> Result<()> {
        if self.natural_key().trim().is_empty() {
            return Err(Error::Validation(
                "payload client_reference must not be empty".to_string(),
            ));
        }

        match self {
            Self::Sale(payload) => {
                if payload.lines.is_empty() {
                    return Err(Error::Validation("sale has no lines".to_string()));
                }
                if payload.total_cents < 0 {
                    return Err(Error::Validation("sale total is negative".to_string()));
                }
            }
            Self::Payment(payload) => {
                if payload.sale_reference.trim().is_empty() {
                    return Err(Error::Validation(
                        "payment sale_reference must not be empty".to_string(),
                    ));
                }
                if payload.amount_cents == 0 {
                    return Err(Error::Validation("payment amount is zero".to_string()));
                }
            }
            Self::Receipt(payload) => {
                if payload.copies == 0 {
                    return Err(Error::Validation(
                        "receipt must request at least one copy".to_string(),
                    ));
                }
            }
            Self::InventoryUpdate(payload) => {
                if payload.quantity_delta == 0 {
                    return Err(Error::Validation(
                        "inventory update delta is zero".to_string(),
                    ));
                }
            }
            Self::Other(payload) => {
                if payload.data.is_null() {
                    return Err(Error::Validation("payload data is empty".to_string()));
                }
            }
        }

        Ok(())
    }
}
