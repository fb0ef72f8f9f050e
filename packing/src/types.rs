use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Millimetres. All placement math is integral; no floating point.
pub type Mm = u32;

/// Square millimetres for sheets, millimetres for bars.
pub type Area = u64;

const BPS_SCALE: u64 = 10_000;

/// The supported strategy family, dispatched on as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Ffd1D,
    Bfd1D,
    BottomLeft2D,
    Guillotine2D,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Ffd1D => "1D_FFD",
            Algorithm::Bfd1D => "1D_BFD",
            Algorithm::BottomLeft2D => "2D_BOTTOM_LEFT",
            Algorithm::Guillotine2D => "2D_GUILLOTINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1D_FFD" => Some(Algorithm::Ffd1D),
            "1D_BFD" => Some(Algorithm::Bfd1D),
            "2D_BOTTOM_LEFT" => Some(Algorithm::BottomLeft2D),
            "2D_GUILLOTINE" => Some(Algorithm::Guillotine2D),
            _ => None,
        }
    }

    pub fn is_one_dimensional(&self) -> bool {
        matches!(self, Algorithm::Ffd1D | Algorithm::Bfd1D)
    }
}

/// One piece to cut from bar stock. Quantities are already flattened by
/// the caller: one value per physical piece.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarPiece {
    pub id: String,
    pub length: Mm,
}

/// One piece to cut from sheet stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetPiece {
    pub id: String,
    pub width: Mm,
    pub height: Mm,
    pub can_rotate: bool,
}

/// A class of identical bars in inventory. `available` bounds how many
/// units the strategy may open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarStock {
    pub stock_item_id: String,
    pub length: Mm,
    pub available: u32,
    /// Minor currency units per bar; classes without a price sort last.
    pub unit_price: Option<i64>,
}

/// A class of identical sheets in inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetStock {
    pub stock_item_id: String,
    pub width: Mm,
    pub height: Mm,
    pub available: u32,
    pub unit_price: Option<i64>,
}

/// The serialized, shared-nothing task payload handed to pool workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PackRequest {
    Bars {
        pieces: Vec<BarPiece>,
        stock: Vec<BarStock>,
    },
    Sheets {
        pieces: Vec<SheetPiece>,
        stock: Vec<SheetStock>,
    },
}

impl PackRequest {
    pub fn piece_count(&self) -> usize {
        match self {
            PackRequest::Bars { pieces, .. } => pieces.len(),
            PackRequest::Sheets { pieces, .. } => pieces.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PackOptions {
    /// Saw width in millimetres, lost between adjacent cuts.
    pub kerf: Mm,
    /// Permits the 90° swap of sheet-piece dimensions; ignored for bars.
    pub allow_rotation: bool,
}

/// A cut position on a bar: `[offset, offset + length)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarPlacement {
    pub piece_id: String,
    pub offset: Mm,
    pub length: Mm,
}

/// A cut position on a sheet. `width`/`height` are the dimensions as
/// placed, i.e. already swapped when `rotated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetPlacement {
    pub piece_id: String,
    pub x: Mm,
    pub y: Mm,
    pub width: Mm,
    pub height: Mm,
    pub rotated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StockPlacements {
    Bar(Vec<BarPlacement>),
    Sheet(Vec<SheetPlacement>),
}

impl StockPlacements {
    pub fn len(&self) -> usize {
        match self {
            StockPlacements::Bar(v) => v.len(),
            StockPlacements::Sheet(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One opened stock unit and everything cut from it.
///
/// Accounting invariant: `capacity = placed + kerf_loss + waste`.
/// Waste is the recoverable remainder; kerf loss is material consumed
/// by the saw and reported separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsedStock {
    pub stock_item_id: String,
    /// Which unit of the class, 0-based in opening order.
    pub instance: u32,
    pub capacity: Area,
    pub placed: Area,
    pub kerf_loss: Area,
    pub waste: Area,
    pub placements: StockPlacements,
}

impl UsedStock {
    pub fn waste_bps(&self) -> u32 {
        ratio_bps(self.waste, self.capacity)
    }
}

/// The outcome of one strategy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackResult {
    pub algorithm: Algorithm,
    pub used_stock: Vec<UsedStock>,
    /// Ids of pieces no stock class admits (or stock ran out for).
    pub unplaced: Vec<String>,
    pub total_waste: Area,
    /// `total_waste / total_capacity` in basis points.
    pub waste_bps: u32,
    /// `total_placed / total_capacity` in basis points.
    pub efficiency_bps: u32,
}

impl PackResult {
    /// Assembles totals from per-stock accounting.
    pub fn finish(algorithm: Algorithm, used_stock: Vec<UsedStock>, unplaced: Vec<String>) -> Self {
        let capacity: Area = used_stock.iter().map(|u| u.capacity).sum();
        let placed: Area = used_stock.iter().map(|u| u.placed).sum();
        let total_waste: Area = used_stock.iter().map(|u| u.waste).sum();

        Self {
            algorithm,
            used_stock,
            unplaced,
            total_waste,
            waste_bps: ratio_bps(total_waste, capacity),
            efficiency_bps: ratio_bps(placed, capacity),
        }
    }

    pub fn stock_used_count(&self) -> u32 {
        self.used_stock.len() as u32
    }

    pub fn total_placed(&self) -> Area {
        self.used_stock.iter().map(|u| u.placed).sum()
    }
}

pub(crate) fn ratio_bps(part: Area, whole: Area) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part.saturating_mul(BPS_SCALE)) / whole) as u32
}

/// Cooperative cancellation flag shared between the pool and a running
/// strategy. Strategies observe it between pieces.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fraction of pieces processed so far, in `[0, 1]`.
pub type ProgressFn = dyn Fn(f64) + Send + Sync;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
    #[error("packing cancelled")]
    Cancelled,

    #[error("algorithm dimensionality does not match the request")]
    DimensionMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_round_trips_through_wire_name() {
        for a in [
            Algorithm::Ffd1D,
            Algorithm::Bfd1D,
            Algorithm::BottomLeft2D,
            Algorithm::Guillotine2D,
        ] {
            assert_eq!(Algorithm::parse(a.as_str()), Some(a));
        }
        assert_eq!(Algorithm::parse("3D_TETRIS"), None);
    }

    #[test]
    fn ratio_bps_handles_zero_whole() {
        assert_eq!(ratio_bps(10, 0), 0);
        assert_eq!(ratio_bps(994, 6000), 1656);
        assert_eq!(ratio_bps(1, 1), 10_000);
    }

    #[test]
    fn cancel_token_is_shared() {
        let t = CancelToken::new();
        let t2 = t.clone();
        assert!(!t2.is_cancelled());
        t.cancel();
        assert!(t2.is_cancelled());
    }
}
