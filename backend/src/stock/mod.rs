pub mod repository_sqlx;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockType {
    Bar1D,
    Sheet2D,
}

impl StockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockType::Bar1D => "BAR_1D",
            StockType::Sheet2D => "SHEET_2D",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BAR_1D" => Some(StockType::Bar1D),
            "SHEET_2D" => Some(StockType::Sheet2D),
            _ => None,
        }
    }
}

/// One physical slab or bar class in inventory.
///
/// Invariants: `reserved_qty <= quantity`; bars carry `length`, sheets
/// carry `width` and `height`.
#[derive(Debug, Clone)]
pub struct StockItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub name: String,
    pub material_type_id: Uuid,
    pub thickness: u32,
    pub stock_type: StockType,
    pub length: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quantity: i64,
    pub reserved_qty: i64,
    pub unit_price: Option<i64>,
    pub is_from_waste: bool,
    pub location_id: Option<Uuid>,
}

impl StockItem {
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved_qty
    }
}

/// Current `(quantity, reserved)` for a stock item.
#[derive(Debug, Clone, Copy)]
pub struct StockLevel {
    pub stock_item_id: Uuid,
    pub quantity: i64,
    pub reserved_qty: i64,
}

#[async_trait]
pub trait StockRepository: Send + Sync {
    /// Stock of the given material and thickness with free units,
    /// candidates for a packing run. Tenant-scoped.
    async fn candidates(
        &self,
        material_type_id: &Uuid,
        thickness: u32,
        stock_type: StockType,
    ) -> Result<Vec<StockItem>, AppError>;

    /// Levels for specific items, used for low-stock checks after a
    /// plan reserves units.
    async fn levels(&self, stock_item_ids: &[Uuid]) -> Result<Vec<StockLevel>, AppError>;
}
