use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Result, Workspace};
use crate::error::{RecordError, ValidationError};
use crate::id::new_id;
use crate::store::keys;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBill {
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    /// Defaults to today.
    pub date: Option<NaiveDate>,
}

impl Workspace {
    pub async fn bills(&self) -> Result<Vec<Bill>> {
        self.load_seeded(keys::FINANCE_BILLS, seed).await
    }

    pub async fn add_bill(&self, new: NewBill) -> Result<Bill> {
        if new.kind.trim().is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }
        if !new.amount.is_finite() || new.amount <= 0.0 {
            return Err(RecordError::Invalid(format!(
                "Bill amount must be positive, got {}",
                new.amount
            )));
        }

        let bill = Bill {
            id: new_id(),
            kind: new.kind.trim().to_string(),
            amount: new.amount,
            date: new.date.unwrap_or_else(|| Local::now().date_naive()),
        };

        let stored = bill.clone();
        self.update_seeded(keys::FINANCE_BILLS, seed, move |bills| {
            bills.push(stored);
            Ok(())
        })
        .await?;

        info!("Recorded bill {} ({} {})", bill.id, bill.kind, bill.amount);
        Ok(bill)
    }
}

fn seed() -> Vec<Bill> {
    [
        ("1", "Office supplies", 1200.0, (2025, 7, 1)),
        ("2", "Event funding", 3500.0, (2025, 7, 5)),
    ]
    .into_iter()
    .filter_map(|(id, kind, amount, (y, m, d))| {
        Some(Bill {
            id: id.to_string(),
            kind: kind.to_string(),
            amount,
            date: NaiveDate::from_ymd_opt(y, m, d)?,
        })
    })
    .collect()
}
