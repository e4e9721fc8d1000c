//! # Divine Delights Cart
//!
//! The shopping cart kept in local storage, the order summary, and checkout.

use delights_common::DelightsError;
use thiserror::Error;

pub mod cart;
pub mod checkout;
pub mod storage;

pub use cart::{Cart, CartItem, Money, OrderSummary, MAX_QUANTITY, SHIPPING_CENTS};
pub use checkout::{place_order, CheckoutForm, FieldError, OrderConfirmation, PaymentMethod};
pub use storage::{FileStorage, LocalStorage, MemoryStorage};

/// Local storage key holding the cart as a JSON array.
pub const CART_KEY: &str = "divineDelightsCart";

/// Errors that can occur in cart operations.
#[derive(Error, Debug)]
pub enum CartError {
    #[error("Your cart is empty")]
    EmptyCart,

    #[error("Checkout form has {} invalid field(s)", .0.len())]
    Invalid(Vec<FieldError>),

    #[error("Storage error: {0}")]
    Storage(#[from] DelightsError),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type CartResult<T> = Result<T, CartError>;
