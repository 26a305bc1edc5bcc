//! Order money arithmetic: subtotal, discount, tax, shipping and total.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use partledger_core::{DomainError, DomainResult};

/// How a discount or tax value is interpreted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountKind {
    Percentage,
    #[default]
    Fixed,
}

impl AmountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmountKind::Percentage => "percentage",
            AmountKind::Fixed => "fixed",
        }
    }
}

impl FromStr for AmountKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(AmountKind::Percentage),
            "fixed" => Ok(AmountKind::Fixed),
            other => Err(DomainError::validation(format!(
                "unknown amount type '{other}' (expected 'percentage' or 'fixed')"
            ))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Charge {
    pub kind: AmountKind,
    pub value: Decimal,
}

impl Charge {
    pub fn fixed(value: Decimal) -> Self {
        Self {
            kind: AmountKind::Fixed,
            value,
        }
    }

    pub fn percentage(value: Decimal) -> Self {
        Self {
            kind: AmountKind::Percentage,
            value,
        }
    }

    fn amount_of(&self, base: Decimal) -> Option<Decimal> {
        match self.kind {
            AmountKind::Percentage => base
                .checked_mul(self.value)?
                .checked_div(Decimal::ONE_HUNDRED),
            AmountKind::Fixed => Some(self.value),
        }
    }
}

/// Header-level adjustments entered on an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderCharges {
    pub discount: Charge,
    pub tax: Charge,
    pub shipping: Decimal,
}

impl OrderCharges {
    pub fn validate(&self) -> DomainResult<()> {
        if self.discount.value.is_sign_negative() {
            return Err(DomainError::validation("discount cannot be negative"));
        }
        if self.shipping.is_sign_negative() {
            return Err(DomainError::validation("shipping cannot be negative"));
        }
        Ok(())
    }
}

/// Computed amounts stored on the order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

fn overflow() -> DomainError {
    DomainError::validation("order amount overflows")
}

/// `quantity * unit_cost`, or a validation error past the decimal range.
pub fn line_amount(quantity: i64, unit_cost: Decimal) -> DomainResult<Decimal> {
    Decimal::from(quantity)
        .checked_mul(unit_cost)
        .ok_or_else(overflow)
}

/// `lines` yields `(quantity_ordered, unit_cost)` pairs.
///
/// The discount is capped at the subtotal and the tax floored at zero. Amounts
/// are not rounded.
pub fn compute_totals<I>(lines: I, charges: &OrderCharges) -> DomainResult<Totals>
where
    I: IntoIterator<Item = (i64, Decimal)>,
{
    let mut subtotal = Decimal::ZERO;
    for (qty, cost) in lines {
        subtotal = subtotal
            .checked_add(line_amount(qty, cost)?)
            .ok_or_else(overflow)?;
    }

    let discount_amount = charges
        .discount
        .amount_of(subtotal)
        .ok_or_else(overflow)?
        .min(subtotal);
    let after_discount = subtotal.checked_sub(discount_amount).ok_or_else(overflow)?;
    let tax_amount = charges
        .tax
        .amount_of(after_discount)
        .ok_or_else(overflow)?
        .max(Decimal::ZERO);
    let total = after_discount
        .checked_add(tax_amount)
        .and_then(|t| t.checked_add(charges.shipping))
        .ok_or_else(overflow)?;

    Ok(Totals {
        subtotal,
        discount_amount,
        tax_amount,
        shipping: charges.shipping,
        total,
    })
}
