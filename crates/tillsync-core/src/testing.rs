//! Shared payload fixtures for the crate's tests

use crate::models::{OperationPayload, PaymentPayload, SaleLine, SalePayload};

pub fn sample_sale(reference: &str) -> OperationPayload {
    OperationPayload::Sale(SalePayload {
        client_reference: reference.to_string(),
        register: "reg-1".to_string(),
        cashier: "ada".to_string(),
        lines: vec![SaleLine {
            product_id: "espresso".to_string(),
            description: "Double espresso".to_string(),
            quantity: 2,
            unit_price_cents: 250,
            vat_rate_bp: 2000,
        }],
        subtotal_cents: 500,
        vat_cents: 100,
        total_cents: 600,
        currency: "EUR".to_string(),
    })
}

pub fn sample_payment(reference: &str, sale_reference: &str) -> OperationPayload {
    OperationPayload::Payment(PaymentPayload {
        client_reference: reference.to_string(),
        sale_reference: sale_reference.to_string(),
        method: "card".to_string(),
        amount_cents: 600,
        currency: "EUR".to_string(),
    })
}
