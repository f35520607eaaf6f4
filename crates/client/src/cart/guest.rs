//! Guest cart held locally before authentication.

use atelier_core::{ProductId, ProductSnapshot, Size};
use serde::{Deserialize, Serialize};

use crate::api::CartItemInput;

/// A line of the guest cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestCartItem {
    /// Catalog id.
    pub product_id: ProductId,
    /// Size label, for sized garments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    /// Number of units.
    pub quantity: u32,
    /// Product data captured when the line was added.
    pub product: ProductSnapshot,
}

impl GuestCartItem {
    fn same_line(&self, product_id: &ProductId, size: Option<&Size>) -> bool {
        &self.product_id == product_id && self.size.as_ref() == size
    }
}

/// Cart contents accumulated before login.
///
/// Lines are keyed by `(product_id, size)`; adding an existing pair sums the
/// quantities instead of creating a second line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCart {
    /// Lines in insertion order.
    #[serde(default)]
    pub items: Vec<GuestCartItem>,
}

impl GuestCart {
    /// Add units of a product. Zero quantities are ignored.
    pub fn add(&mut self, product: ProductSnapshot, size: Option<Size>, quantity: u32) {
        if quantity == 0 {
            return;
        }
        if let Some(line) = self
            .items
            .iter_mut()
            .find(|line| line.same_line(&product.id, size.as_ref()))
        {
            line.quantity = line.quantity.saturating_add(quantity);
            return;
        }
        self.items.push(GuestCartItem {
            product_id: product.id.clone(),
            size,
            quantity,
            product,
        });
    }

    /// Remove a line entirely. Returns whether a line was removed.
    pub fn remove(&mut self, product_id: &ProductId, size: Option<&Size>) -> bool {
        let before = self.items.len();
        self.items.retain(|line| !line.same_line(product_id, size));
        self.items.len() != before
    }

    /// Take back quantities that were transferred to the server.
    ///
    /// Lines added while a merge was running keep their remaining units.
    pub fn subtract(&mut self, merged: &[CartItemInput]) {
        for input in merged {
            if let Some(line) = self
                .items
                .iter_mut()
                .find(|line| line.same_line(&input.product_id, input.size.as_ref()))
            {
                line.quantity = line.quantity.saturating_sub(input.quantity);
            }
        }
        self.items.retain(|line| line.quantity > 0);
    }

    /// Drop every line.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.items.iter().map(|line| line.quantity).sum()
    }

    /// Lines in the shape the merge endpoint expects.
    #[must_use]
    pub fn to_merge_items(&self) -> Vec<CartItemInput> {
        self.items
            .iter()
            .map(|line| CartItemInput {
                product_id: line.product_id.clone(),
                size: line.size.clone(),
                quantity: line.quantity,
            })
            .collect()
    }
}
