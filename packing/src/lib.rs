//! Pure cutting-layout algorithms.
//!
//! Responsibilities:
//! - 1D bar nesting: first-fit-decreasing and best-fit-decreasing.
//! - 2D sheet nesting: skyline bottom-left and guillotine best-area-fit.
//! - Deterministic integer arithmetic (millimetres, square millimetres).
//!
//! Non-responsibilities:
//! - Loading jobs or stock (the engine normalizes those into value types).
//! - Persistence, events, scheduling (pool and engine own those).
//!
//! Every strategy is a pure function of `(pieces, stock, options)` plus a
//! cooperative cancellation token checked between pieces and an optional
//! progress callback. Nothing here suspends or allocates shared state.

mod bottom_left;
mod guillotine;
mod one_d;
pub mod types;

pub use types::{
    Algorithm, Area, BarPiece, BarPlacement, BarStock, CancelToken, Mm, PackError, PackOptions,
    PackRequest, PackResult, ProgressFn, SheetPiece, SheetPlacement, SheetStock, StockPlacements,
    UsedStock,
};

/// Runs `algorithm` over `request`. Fails with `DimensionMismatch` when a
/// 1D algorithm receives sheet input or vice versa, and `Cancelled` when
/// the token fires between pieces.
pub fn pack(
    algorithm: Algorithm,
    request: &PackRequest,
    options: &PackOptions,
    cancel: &CancelToken,
    progress: Option<&ProgressFn>,
) -> Result<PackResult, PackError> {
    match (algorithm, request) {
        (Algorithm::Ffd1D, PackRequest::Bars { pieces, stock }) => {
            one_d::pack_bars(one_d::FitRule::First, pieces, stock, options, cancel, progress)
        }
        (Algorithm::Bfd1D, PackRequest::Bars { pieces, stock }) => {
            one_d::pack_bars(one_d::FitRule::Best, pieces, stock, options, cancel, progress)
        }
        (Algorithm::BottomLeft2D, PackRequest::Sheets { pieces, stock }) => {
            bottom_left::pack_sheets(pieces, stock, options, cancel, progress)
        }
        (Algorithm::Guillotine2D, PackRequest::Sheets { pieces, stock }) => {
            guillotine::pack_sheets(pieces, stock, options, cancel, progress)
        }
        _ => Err(PackError::DimensionMismatch),
    }
}
