//! Client-local cart session.
//!
//! Accumulates prospective order lines before anything touches the network.
//! Lines with the same `(product, variant)` identity are merged by adding
//! quantities, so the same item can never occupy two rows. Totals are
//! recomputed from the current lines on every call and never cached.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::round_cents;

// ---------------------------------------------------------------------------
// Catalog inputs
// ---------------------------------------------------------------------------

/// A product as delivered by the menu service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub has_variants: bool,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// A product variant; its `extra_price` is added on top of the base price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub extra_price: f64,
}

// ---------------------------------------------------------------------------
// Cart lines
// ---------------------------------------------------------------------------

/// One prospective order line. Identity for merge purposes is
/// `(product_id, variant_id)`.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub tax_rate: f64,
    pub note: Option<String>,
}

impl CartLine {
    /// Line subtotal before tax, unrounded.
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }

    /// Line tax, computed independently before summation. No tax-on-tax.
    pub fn line_tax(&self) -> f64 {
        self.line_total() * self.tax_rate / 100.0
    }
}

/// Cart totals. `total == subtotal + tax_total` by construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Totals {
    pub subtotal: f64,
    pub tax_total: f64,
    pub total: f64,
}

impl Totals {
    /// Totals rounded to cents for display.
    pub fn display(&self) -> Totals {
        Totals {
            subtotal: round_cents(self.subtotal),
            tax_total: round_cents(self.tax_total),
            total: round_cents(self.total),
        }
    }
}

// ---------------------------------------------------------------------------
// Cart session
// ---------------------------------------------------------------------------

/// An owned cart session. Destroyed on submission or explicit clear; there
/// is no ambient global cart.
#[derive(Debug, Default)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add a product to the cart, merging into an existing line of the
    /// same `(product, variant)` identity.
    ///
    /// Fails with `VariantRequired` when the product declares variants and
    /// none was supplied - the base product is never silently priced.
    pub fn add_item(
        &mut self,
        product: &Product,
        variant: Option<&Variant>,
        quantity: u32,
    ) -> Result<usize> {
        self.add_item_with_note(product, variant, quantity, None)
    }

    /// `add_item` with an optional kitchen note attached to the line.
    pub fn add_item_with_note(
        &mut self,
        product: &Product,
        variant: Option<&Variant>,
        quantity: u32,
        note: Option<String>,
    ) -> Result<usize> {
        if quantity == 0 {
            return Err(Error::InvalidQuantity);
        }
        if product.has_variants && variant.is_none() {
            return Err(Error::VariantRequired {
                product: product.name.clone(),
            });
        }

        let variant_id = variant.map(|v| v.id);
        if let Some(index) = self
            .lines
            .iter()
            .position(|l| l.product_id == product.id && l.variant_id == variant_id)
        {
            self.lines[index].quantity += quantity;
            debug!(product_id = product.id, index, "merged into existing cart line");
            return Ok(index);
        }

        let unit_price = product.price + variant.map(|v| v.extra_price).unwrap_or(0.0);
        let name = match variant {
            Some(v) => format!("{} ({})", product.name, v.name),
            None => product.name.clone(),
        };
        self.lines.push(CartLine {
            product_id: product.id,
            variant_id,
            name,
            unit_price,
            quantity,
            tax_rate: product.tax_rate,
            note,
        });
        Ok(self.lines.len() - 1)
    }

    /// Set the quantity of an existing line. Rejected below 1; removal is
    /// `remove_line`, never an implied quantity-zero.
    pub fn set_quantity(&mut self, index: usize, quantity: u32) -> Result<()> {
        if quantity < 1 {
            return Err(Error::InvalidQuantity);
        }
        let line = self
            .lines
            .get_mut(index)
            .ok_or(Error::LineNotFound { index })?;
        line.quantity = quantity;
        Ok(())
    }

    /// Remove a line outright.
    pub fn remove_line(&mut self, index: usize) -> Result<CartLine> {
        if index >= self.lines.len() {
            return Err(Error::LineNotFound { index });
        }
        Ok(self.lines.remove(index))
    }

    /// Clear the whole cart. Destructive, so the caller must pass an
    /// explicit confirmation; navigation must never trigger this silently.
    pub fn clear(&mut self, confirmed: bool) -> Result<()> {
        if !confirmed {
            return Err(Error::ConfirmationRequired);
        }
        self.lines.clear();
        Ok(())
    }

    /// Used by the submission pipeline after a successful dispatch; the
    /// operator already confirmed by dispatching.
    pub(crate) fn clear_after_submission(&mut self) {
        self.lines.clear();
    }

    /// Recompute totals from the current lines. Pure; each line's tax is
    /// computed independently and summed, unrounded.
    pub fn totals(&self) -> Totals {
        let subtotal: f64 = self.lines.iter().map(CartLine::line_total).sum();
        let tax_total: f64 = self.lines.iter().map(CartLine::line_tax).sum();
        Totals {
            subtotal,
            tax_total,
            total: subtotal + tax_total,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn coffee() -> Product {
        Product {
            id: 1,
            name: "Coffee".into(),
            price: 2.5,
            tax_rate: 5.0,
            has_variants: true,
            variants: vec![Variant {
                id: 10,
                name: "Large".into(),
                extra_price: 1.0,
            }],
        }
    }

    fn burger() -> Product {
        Product {
            id: 2,
            name: "Burger".into(),
            price: 8.0,
            tax_rate: 10.0,
            has_variants: false,
            variants: vec![],
        }
    }

    #[test]
    fn test_variant_required() {
        let mut cart = Cart::new();
        let err = cart.add_item(&coffee(), None, 1).unwrap_err();
        assert!(matches!(err, Error::VariantRequired { .. }));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_variant_pricing_and_totals() {
        // Coffee base 2.50, Large +1.00, x2 => subtotal 7.00, tax 0.35
        let mut cart = Cart::new();
        let product = coffee();
        let large = product.variants[0].clone();
        cart.add_item(&product, Some(&large), 2).unwrap();

        assert_eq!(cart.lines().len(), 1);
        let line = &cart.lines()[0];
        assert_eq!(line.unit_price, 3.5);
        assert_eq!(line.name, "Coffee (Large)");

        let totals = cart.totals().display();
        assert_eq!(totals.subtotal, 7.0);
        assert_eq!(totals.tax_total, 0.35);
        assert_eq!(totals.total, 7.35);
    }

    #[test]
    fn test_merge_same_identity() {
        let mut cart = Cart::new();
        cart.add_item(&burger(), None, 1).unwrap();
        cart.add_item(&burger(), None, 1).unwrap();
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 2);
    }

    #[test]
    fn test_distinct_variants_do_not_merge() {
        let mut cart = Cart::new();
        let product = coffee();
        let large = product.variants[0].clone();
        let small = Variant {
            id: 11,
            name: "Small".into(),
            extra_price: -0.5,
        };
        cart.add_item(&product, Some(&large), 1).unwrap();
        cart.add_item(&product, Some(&small), 1).unwrap();
        assert_eq!(cart.lines().len(), 2);
    }

    #[test]
    fn test_set_quantity_rejects_zero() {
        let mut cart = Cart::new();
        cart.add_item(&burger(), None, 2).unwrap();
        assert!(matches!(
            cart.set_quantity(0, 0),
            Err(Error::InvalidQuantity)
        ));
        assert_eq!(cart.lines()[0].quantity, 2);
        assert!(matches!(
            cart.set_quantity(5, 1),
            Err(Error::LineNotFound { index: 5 })
        ));
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let mut cart = Cart::new();
        cart.add_item(&burger(), None, 1).unwrap();
        assert!(matches!(
            cart.clear(false),
            Err(Error::ConfirmationRequired)
        ));
        assert_eq!(cart.lines().len(), 1);
        cart.clear(true).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_totals_invariant_random_lines() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let mut cart = Cart::new();
            let n = rng.gen_range(1..12);
            for i in 0..n {
                let product = Product {
                    id: i,
                    name: format!("P{i}"),
                    price: rng.gen_range(1..5000) as f64 / 100.0,
                    tax_rate: [0.0, 5.0, 10.0, 19.0][rng.gen_range(0..4)],
                    has_variants: false,
                    variants: vec![],
                };
                cart.add_item(&product, None, rng.gen_range(1..9)).unwrap();
            }
            let t = cart.totals();
            assert!((t.total - (t.subtotal + t.tax_total)).abs() < 1e-9);
            let d = t.display();
            assert!((d.total - round_cents(t.subtotal + t.tax_total)).abs() < 1e-9);
        }
    }
}
