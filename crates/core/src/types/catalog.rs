//! Product data carried alongside cart lines.

use serde::{Deserialize, Serialize};

use crate::{Price, ProductId};

/// Garment size label (`S`, `M`, `32W`...).
///
/// Sizes are free-form labels owned by the catalog; the client only compares
/// them for equality when merging cart lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(String);

impl Size {
    /// Create a size label, trimming whitespace.
    #[must_use]
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(label.as_ref().trim().to_string())
    }

    /// The label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a product taken when it was added to a guest cart.
///
/// Only used for display while offline; the server cart always re-reads
/// authoritative pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    /// Catalog id.
    #[serde(alias = "_id")]
    pub id: ProductId,
    /// Product name.
    pub name: String,
    /// Unit price at the time of the snapshot.
    pub price: Price,
    /// Primary image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}
