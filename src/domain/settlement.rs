//! Settlement engine: turns a bill-count tender and an amount owed into a verdict and
//! a change breakdown. Pure, no I/O, never blocks.
//!
//! Change is decomposed greedily, largest bill first. That is only minimal because the
//! denomination ladder {1, 5, 10, 20, 50, 100} is canonical: every greedy choice can be
//! shown optimal by exchange against the next bill down. Adding a denomination such as
//! 25 or 40 breaks that property and would require a dynamic-programming minimal-coin
//! search instead.

use crate::domain::money::Money;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Denomination {
    One,
    Five,
    Ten,
    Twenty,
    Fifty,
    Hundred,
}

impl Denomination {
    /// Largest first, the order the greedy breakdown walks.
    pub const DESCENDING: [Denomination; 6] = [
        Denomination::Hundred,
        Denomination::Fifty,
        Denomination::Twenty,
        Denomination::Ten,
        Denomination::Five,
        Denomination::One,
    ];

    pub fn value(self) -> u64 {
        match self {
            Denomination::One => 1,
            Denomination::Five => 5,
            Denomination::Ten => 10,
            Denomination::Twenty => 20,
            Denomination::Fifty => 50,
            Denomination::Hundred => 100,
        }
    }
}

/// Count of bills per denomination. Used both for a tender and for a change breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BillCounts {
    pub one: u32,
    pub five: u32,
    pub ten: u32,
    pub twenty: u32,
    pub fifty: u32,
    pub hundred: u32,
}

impl BillCounts {
    pub fn get(&self, denomination: Denomination) -> u32 {
        match denomination {
            Denomination::One => self.one,
            Denomination::Five => self.five,
            Denomination::Ten => self.ten,
            Denomination::Twenty => self.twenty,
            Denomination::Fifty => self.fifty,
            Denomination::Hundred => self.hundred,
        }
    }

    pub fn set(&mut self, denomination: Denomination, count: u32) {
        let slot = match denomination {
            Denomination::One => &mut self.one,
            Denomination::Five => &mut self.five,
            Denomination::Ten => &mut self.ten,
            Denomination::Twenty => &mut self.twenty,
            Denomination::Fifty => &mut self.fifty,
            Denomination::Hundred => &mut self.hundred,
        };
        *slot = count;
    }

    pub fn with(mut self, denomination: Denomination, count: u32) -> Self {
        self.set(denomination, count);
        self
    }

    pub fn total(&self) -> Money {
        let units: u64 = Denomination::DESCENDING
            .iter()
            .map(|d| u64::from(self.get(*d)) * d.value())
            .sum();
        Money::from_units(units)
    }

    pub fn bill_count(&self) -> u64 {
        Denomination::DESCENDING
            .iter()
            .map(|d| u64::from(self.get(*d)))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bill_count() == 0
    }
}

/// Outcome of settling a tender against an amount owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub owed: Money,
    pub total: Money,
    pub sufficient: bool,
    pub change_due: Money,
    pub change: BillCounts,
    /// Sub-unit part of `change_due` that bills cannot express (cents owed back in coin).
    pub coin_remainder: Money,
}

impl Settlement {
    /// How much more cash is needed; zero when the tender is sufficient.
    pub fn shortfall(&self) -> Money {
        self.owed.saturating_sub(self.total)
    }
}

/// Settles `tender` against `owed`.
///
/// Never fails: an insufficient tender is reported through `sufficient` so the caller
/// can ask for more cash without losing what was entered.
pub fn settle(owed: Money, tender: &BillCounts) -> Settlement {
    let total = tender.total();
    let sufficient = total >= owed;
    let change_due = if sufficient {
        total.saturating_sub(owed)
    } else {
        Money::ZERO
    };
    let (change, coin_remainder) = break_into_bills(change_due);

    Settlement {
        owed,
        total,
        sufficient,
        change_due,
        change,
        coin_remainder,
    }
}

/// Greedy largest-first decomposition of `amount` into bills.
pub fn break_into_bills(amount: Money) -> (BillCounts, Money) {
    let value = amount.value();
    let whole = value.trunc();
    let mut remaining = whole.to_u64().unwrap_or(0);
    let mut change = BillCounts::default();

    for denomination in Denomination::DESCENDING {
        let count = remaining / denomination.value();
        if count > 0 {
            change.set(denomination, u32::try_from(count).unwrap_or(u32::MAX));
            remaining -= count * denomination.value();
        }
    }

    let coins = Money::new(value - whole).unwrap_or(Money::ZERO);
    (change, coins)
}
