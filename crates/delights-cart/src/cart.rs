//! The shopping cart and its order summary.

use std::fmt;

use delights_core::Product;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::LocalStorage;
use crate::{CartResult, CART_KEY};

/// Flat shipping charge in cents.
pub const SHIPPING_CENTS: i64 = 500;

/// Largest quantity a single cart line may hold.
pub const MAX_QUANTITY: i64 = 999;

/// One line in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub image: String,
    pub quantity: i64,
}

impl CartItem {
    fn from_product(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            price: product.price,
            image: product.primary_image().to_string(),
            quantity: 1,
        }
    }

    pub fn unit_price(&self) -> Money {
        Money::from_dollars(self.price)
    }

    pub fn line_total(&self) -> Money {
        Money(self.unit_price().0.saturating_mul(self.quantity))
    }
}

/// An amount in integer cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(pub i64);

impl Money {
    pub fn from_dollars(dollars: f64) -> Self {
        Money((dollars * 100.0).round() as i64)
    }

    pub fn cents(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// Totals shown next to the checkout form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub subtotal: Money,
    pub shipping: Money,
    pub total: Money,
}

impl OrderSummary {
    pub fn for_items(items: &[CartItem]) -> Self {
        let subtotal = Money(
            items
                .iter()
                .fold(0i64, |sum, i| sum.saturating_add(i.line_total().0)),
        );
        let shipping = if items.is_empty() {
            Money(0)
        } else {
            Money(SHIPPING_CENTS)
        };
        Self {
            subtotal,
            shipping,
            total: Money(subtotal.0.saturating_add(shipping.0)),
        }
    }
}

/// Cart persisted under [`CART_KEY`] in local storage.
///
/// Every operation reads the stored list afresh, so two carts over the same
/// storage observe each other's writes.
pub struct Cart<S> {
    storage: S,
}

impl<S: LocalStorage> Cart<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Current items. Unreadable stored data counts as an empty cart.
    pub fn items(&self) -> Vec<CartItem> {
        let Some(raw) = self.storage.get_item(CART_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cart data");
                Vec::new()
            }
        }
    }

    /// Add one of `product`, bumping the quantity if it is already present.
    pub fn add(&mut self, product: &Product) -> CartResult<()> {
        let mut items = self.items();
        match items.iter_mut().find(|i| i.id == product.id) {
            Some(item) => item.quantity = item.quantity.saturating_add(1).min(MAX_QUANTITY),
            None => items.push(CartItem::from_product(product)),
        }
        debug!(id = %product.id, "Added to cart");
        self.save(&items)
    }

    pub fn remove(&mut self, id: &str) -> CartResult<()> {
        let mut items = self.items();
        items.retain(|i| i.id != id);
        self.save(&items)
    }

    /// Set the quantity of `id`. Zero or less removes the line; anything
    /// above [`MAX_QUANTITY`] is clamped to it.
    pub fn change_quantity(&mut self, id: &str, quantity: i64) -> CartResult<()> {
        if quantity <= 0 {
            return self.remove(id);
        }
        let mut items = self.items();
        if let Some(item) = items.iter_mut().find(|i| i.id == id) {
            item.quantity = quantity.min(MAX_QUANTITY);
        }
        self.save(&items)
    }

    pub fn clear(&mut self) -> CartResult<()> {
        self.storage.remove_item(CART_KEY)?;
        Ok(())
    }

    /// Sum of quantities, as shown on the header badge.
    pub fn item_count(&self) -> i64 {
        self.items()
            .iter()
            .fold(0i64, |sum, i| sum.saturating_add(i.quantity))
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn summary(&self) -> OrderSummary {
        OrderSummary::for_items(&self.items())
    }

    fn save(&mut self, items: &[CartItem]) -> CartResult<()> {
        let raw = serde_json::to_string(items)?;
        self.storage.set_item(CART_KEY, &raw)?;
        Ok(())
    }
}
