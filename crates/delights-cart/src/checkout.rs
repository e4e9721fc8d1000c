//! Checkout form validation and order placement.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cart::{Cart, CartItem, OrderSummary};
use crate::storage::LocalStorage;
use crate::{CartError, CartResult};

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_EMAIL: &str = "Please enter a valid email address.";
pub const CARD_REQUIRED: &str = "Card payment requires this field.";
pub const CARD_NUMBER_LENGTH: &str = "Card number must be 16 digits.";
pub const CVV_LENGTH: &str = "CVV must be 3 or 4 digits.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    #[default]
    Card,
    CashOnDelivery,
}

/// Checkout form fields as entered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckoutForm {
    pub name: String,
    pub email: String,
    pub address: String,
    pub city: String,
    pub zip: String,
    pub payment_method: PaymentMethod,
    pub card_number: String,
    pub expiry: String,
    pub cvv: String,
}

/// A message attached to one form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl FieldError {
    fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

impl CheckoutForm {
    /// All field errors, in form order. Empty means the form may be submitted.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("name", &self.name),
            ("email", &self.email),
            ("address", &self.address),
            ("city", &self.city),
            ("zip", &self.zip),
        ] {
            if value.trim().is_empty() {
                errors.push(FieldError::new(field, REQUIRED));
            } else if field == "email" && !value.contains('@') {
                errors.push(FieldError::new(field, INVALID_EMAIL));
            }
        }

        if self.payment_method == PaymentMethod::Card {
            let card_number = self.card_number.replace(' ', "");
            if card_number.is_empty() {
                errors.push(FieldError::new("cardNumber", CARD_REQUIRED));
            } else if card_number.len() != 16 || !card_number.bytes().all(|b| b.is_ascii_digit()) {
                errors.push(FieldError::new("cardNumber", CARD_NUMBER_LENGTH));
            }

            if self.expiry.trim().is_empty() {
                errors.push(FieldError::new("expiry", CARD_REQUIRED));
            }

            let cvv = self.cvv.trim();
            if cvv.is_empty() {
                errors.push(FieldError::new("cvv", CARD_REQUIRED));
            } else if !(3..=4).contains(&cvv.chars().count()) {
                errors.push(FieldError::new("cvv", CVV_LENGTH));
            }
        }

        errors
    }
}

/// What was ordered. No payment is taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderConfirmation {
    pub items: Vec<CartItem>,
    pub summary: OrderSummary,
}

/// Validate `form` against a non-empty cart, then empty the cart.
pub fn place_order<S: LocalStorage>(
    cart: &mut Cart<S>,
    form: &CheckoutForm,
) -> CartResult<OrderConfirmation> {
    let items = cart.items();
    if items.is_empty() {
        return Err(CartError::EmptyCart);
    }

    let errors = form.validate();
    if !errors.is_empty() {
        return Err(CartError::Invalid(errors));
    }

    let summary = OrderSummary::for_items(&items);
    cart.clear()?;
    info!(lines = items.len(), total = %summary.total, "Order placed");

    Ok(OrderConfirmation { items, summary })
}
