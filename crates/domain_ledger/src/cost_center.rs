//! Cost centers and expense classification

use serde::{Deserialize, Serialize};

use core_kernel::CostCenterId;

/// Expense/revenue category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    /// Labor (mão de obra)
    Labor,
    /// Construction materials
    Material,
    /// Equipment rental and purchase
    Equipment,
    /// Field application services
    Application,
    /// Office and administrative expenses
    Office,
    /// Taxes and government fees
    Taxes,
    Other,
}

/// Business sector a cost is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Administrative,
    Works,
    TechnicalAdvisory,
}

/// An accounting bucket to which expenses and revenues are attributed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostCenter {
    pub id: CostCenterId,
    pub name: String,
    pub sector: Sector,
    pub is_active: bool,
}

impl CostCenter {
    /// Creates an active cost center
    pub fn new(name: impl Into<String>, sector: Sector) -> Self {
        Self {
            id: CostCenterId::new_v7(),
            name: name.into(),
            sector,
            is_active: true,
        }
    }
}
