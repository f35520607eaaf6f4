//! Cart commands.

#![allow(clippy::print_stdout)]

use std::str::FromStr;

use atelier_client::AtelierClient;
use atelier_core::{CurrencyCode, Price, ProductId, ProductSnapshot, Size};
use rust_decimal::Decimal;

use super::CliError;

/// Add a product to whichever cart is active.
pub async fn add(
    client: &AtelierClient,
    product_id: &str,
    size: Option<String>,
    quantity: u32,
    name: Option<String>,
    price: &str,
) -> Result<(), CliError> {
    let amount =
        Decimal::from_str(price.trim()).map_err(|_| CliError::InvalidPrice(price.to_string()))?;
    let product = ProductSnapshot {
        id: ProductId::new(product_id),
        name: name.unwrap_or_else(|| product_id.to_string()),
        price: Price::new(amount, CurrencyCode::default()),
        image: None,
    };

    let target = if client.session().session().is_authenticated() {
        "cart"
    } else {
        "guest cart"
    };
    let total = client
        .cart()
        .add_item(product, size.map(Size::new), quantity)
        .await?;
    println!("Added {quantity} x {product_id} to your {target} ({total} item(s))");
    Ok(())
}

/// Print the guest cart and the server cart once the post-login sync settled.
pub async fn show(client: &AtelierClient) {
    client.cart().wait_settled(super::SETTLE_TIMEOUT).await;

    let guest = client.persistor().guest_cart();
    if !guest.is_empty() {
        println!("Guest cart:");
        for item in &guest.items {
            println!(
                "  {:>3} x {} {} @ {}",
                item.quantity,
                item.product.name,
                item.size.as_ref().map_or("", Size::as_str),
                item.product.price.display()
            );
        }
    }

    match client.cart().server_cart() {
        Some(cart) if !cart.items.is_empty() => {
            println!("Cart:");
            for line in &cart.items {
                println!(
                    "  {:>3} x {} {} @ {}",
                    line.quantity,
                    line.product.name,
                    line.size.as_ref().map_or("", Size::as_str),
                    line.product.price.times(line.quantity).display()
                );
            }
            println!("  {} item(s)", cart.total_items());
        }
        Some(_) => println!("Cart is empty"),
        None if guest.is_empty() => println!("Cart is empty"),
        None => {}
    }
}
