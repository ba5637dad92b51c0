//! Installment schedule generation. Pure: takes the payment parameters,
//! returns the rows to persist, touches no storage.

use chrono::{Months, NaiveDate};

use crate::money;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentType {
    /// Single lump sum, collected up front ("pesin").
    FullUpfront,
    /// Split into monthly dues ("taksitli").
    Installment,
}

impl PaymentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full_upfront" => Some(PaymentType::FullUpfront),
            "installment" => Some(PaymentType::Installment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::FullUpfront => "full_upfront",
            PaymentType::Installment => "installment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledInstallment {
    pub due_date: NaiveDate,
    pub amount_cents: i64,
    pub is_paid: bool,
    pub paid_at: Option<NaiveDate>,
}

/// Build the ordered installment rows for a payment.
///
/// Full-upfront payments yield one installment dated `start_date` for the
/// whole amount, already marked paid as of `today` (business rule carried
/// over from the dashboard: lump sums are recorded when collected).
///
/// Installment payments yield `count` rows due one calendar month apart.
/// When the start day does not exist in a later month the due date clamps
/// to that month's last day (Jan 31 -> Feb 28 -> Mar 31). Every row except
/// the last carries the half-up rounded base amount; the last absorbs the
/// rounding remainder so the rows always sum to `total_cents` exactly.
///
/// Returns `None` only if calendar arithmetic overflows, which cannot
/// happen for any date SQLite can store.
pub fn generate_schedule(
    total_cents: i64,
    payment_type: PaymentType,
    start_date: NaiveDate,
    count: u32,
    today: NaiveDate,
) -> Option<Vec<ScheduledInstallment>> {
    match payment_type {
        PaymentType::FullUpfront => Some(vec![ScheduledInstallment {
            due_date: start_date,
            amount_cents: total_cents,
            is_paid: true,
            paid_at: Some(today),
        }]),
        PaymentType::Installment => {
            let n = i64::from(count);
            let base = money::split_base(total_cents, n);
            let mut rows = Vec::with_capacity(count as usize);
            for i in 0..count {
                let due_date = start_date.checked_add_months(Months::new(i))?;
                let amount_cents = if i == count - 1 {
                    total_cents - base * (n - 1)
                } else {
                    base
                };
                rows.push(ScheduledInstallment {
                    due_date,
                    amount_cents,
                    is_paid: false,
                    paid_at: None,
                });
            }
            Some(rows)
        }
    }
}
