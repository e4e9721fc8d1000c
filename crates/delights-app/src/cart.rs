//! Cart commands over file-backed local storage.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Subcommand;
use delights_cart::{place_order, Cart, CartError, CheckoutForm, FileStorage, LocalStorage};
use delights_core::{catalog, StorefrontConfig};

#[derive(Subcommand, Debug)]
pub enum CartCommand {
    /// List the cart with its order summary
    List,
    /// Add one of a product by id
    Add { id: String },
    /// Remove a product line
    Remove { id: String },
    /// Set the quantity of a product line; zero removes it
    SetQuantity {
        id: String,
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Empty the cart
    Clear,
    /// Validate a checkout form and place the order
    Checkout {
        /// JSON file with the checkout form fields
        #[arg(long)]
        form: PathBuf,
    },
}

pub fn run(config: &StorefrontConfig, command: CartCommand) -> anyhow::Result<()> {
    let storage = FileStorage::open(config.local_storage_path())?;
    let mut cart = Cart::new(storage);

    match command {
        CartCommand::List => print_cart(&cart),
        CartCommand::Add { id } => {
            let Some(product) = catalog().into_iter().find(|p| p.id == id) else {
                bail!("no product with id {id}");
            };
            cart.add(&product)?;
            println!("added {} ({} in cart)", product.name, cart.item_count());
        }
        CartCommand::Remove { id } => {
            cart.remove(&id)?;
            print_cart(&cart);
        }
        CartCommand::SetQuantity { id, quantity } => {
            cart.change_quantity(&id, quantity)?;
            print_cart(&cart);
        }
        CartCommand::Clear => {
            cart.clear()?;
            println!("cart cleared");
        }
        CartCommand::Checkout { form } => {
            let raw = std::fs::read_to_string(&form)
                .with_context(|| format!("failed to read {}", form.display()))?;
            let form: CheckoutForm = serde_json::from_str(&raw)?;

            match place_order(&mut cart, &form) {
                Ok(confirmation) => {
                    println!("Order placed! Thank you for your purchase.");
                    println!("total: {}", confirmation.summary.total);
                }
                Err(CartError::Invalid(errors)) => {
                    for e in &errors {
                        println!("{}: {}", e.field, e.message);
                    }
                    bail!("checkout form is invalid");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

fn print_cart<S: LocalStorage>(cart: &Cart<S>) {
    let items = cart.items();
    if items.is_empty() {
        println!("Your cart is empty.");
    }
    for item in &items {
        println!(
            "{:<10} {:<28} {:>3} x {} = {}",
            item.id,
            item.name,
            item.quantity,
            item.unit_price(),
            item.line_total()
        );
    }

    let summary = cart.summary();
    println!("subtotal: {}", summary.subtotal);
    println!("shipping: {}", summary.shipping);
    println!("total:    {}", summary.total);
}
