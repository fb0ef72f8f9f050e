//! 2D skyline bottom-left nesting.
//!
//! Pieces are processed by decreasing area and dropped at the lowest,
//! then leftmost, feasible anchor of the first open sheet that admits
//! them. When rotation is permitted both orientations compete: lowest
//! resulting y wins, then lowest x, then the orientation that leaves
//! the larger open width to the right of the placement.
//!
//! Kerf pads the occupied footprint on the +x and +y sides; padding may
//! overhang the sheet edge (an edge cut is free).

use crate::types::{
    Algorithm, Area, CancelToken, Mm, PackError, PackOptions, PackResult, ProgressFn, SheetPiece,
    SheetPlacement, SheetStock, StockPlacements, UsedStock,
};

#[derive(Clone, Copy)]
struct Seg {
    x: Mm,
    width: Mm,
    y: Mm,
}

/// Height profile of everything placed so far, as maximal segments of
/// equal height sorted by x.
struct Skyline {
    width: Mm,
    height: Mm,
    segs: Vec<Seg>,
}

impl Skyline {
    fn new(width: Mm, height: Mm) -> Self {
        Self {
            width,
            height,
            segs: vec![Seg { x: 0, width, y: 0 }],
        }
    }

    fn support(&self, x: Mm, w: Mm) -> Mm {
        let end = x + w;
        self.segs
            .iter()
            .filter(|s| s.x < end && s.x + s.width > x)
            .map(|s| s.y)
            .max()
            .unwrap_or(0)
    }

    /// Lowest-then-leftmost anchor admitting a `pw`×`ph` piece.
    fn find(&self, pw: Mm, ph: Mm) -> Option<(Mm, Mm)> {
        let mut best: Option<(Mm, Mm)> = None; // (y, x)
        for s in &self.segs {
            let x = s.x;
            if x + pw > self.width {
                continue;
            }
            let y = self.support(x, pw);
            if y + ph > self.height {
                continue;
            }
            let better = match best {
                None => true,
                Some((by, bx)) => y < by || (y == by && x < bx),
            };
            if better {
                best = Some((y, x));
            }
        }
        best.map(|(y, x)| (x, y))
    }

    /// Raises the profile over `[x, x + w)` to `top`, merging equal
    /// neighbours afterwards.
    fn occupy(&mut self, x: Mm, w: Mm, top: Mm) {
        let end = (x + w).min(self.width);
        let mut out: Vec<Seg> = Vec::with_capacity(self.segs.len() + 2);
        for s in &self.segs {
            let s_end = s.x + s.width;
            if s_end <= x || s.x >= end {
                out.push(*s);
                continue;
            }
            if s.x < x {
                out.push(Seg {
                    x: s.x,
                    width: x - s.x,
                    y: s.y,
                });
            }
            if s_end > end {
                out.push(Seg {
                    x: end,
                    width: s_end - end,
                    y: s.y,
                });
            }
        }
        out.push(Seg {
            x,
            width: end - x,
            y: top,
        });
        out.sort_by_key(|s| s.x);

        let mut merged: Vec<Seg> = Vec::with_capacity(out.len());
        for s in out {
            if let Some(last) = merged.last_mut() {
                if last.y == s.y && last.x + last.width == s.x {
                    last.width += s.width;
                    continue;
                }
            }
            merged.push(s);
        }
        self.segs = merged;
    }
}

struct OpenSheet {
    class_idx: usize,
    instance: u32,
    width: Mm,
    height: Mm,
    sky: Skyline,
    placements: Vec<SheetPlacement>,
    placed: Area,
    kerf_loss: Area,
}

impl OpenSheet {
    fn place(&mut self, piece: &SheetPiece, x: Mm, y: Mm, pw: Mm, ph: Mm, kerf: Mm) {
        let fw = (pw + kerf).min(self.width - x);
        let fh = (ph + kerf).min(self.height - y);
        self.sky.occupy(x, fw, y + fh);

        let piece_area = pw as Area * ph as Area;
        self.placed += piece_area;
        self.kerf_loss += fw as Area * fh as Area - piece_area;
        self.placements.push(SheetPlacement {
            piece_id: piece.id.clone(),
            x,
            y,
            width: pw,
            height: ph,
            rotated: pw != piece.width,
        });
    }
}

fn orientations(piece: &SheetPiece, allow_rotation: bool) -> Vec<(Mm, Mm)> {
    let mut out = vec![(piece.width, piece.height)];
    if allow_rotation && piece.can_rotate && piece.width != piece.height {
        out.push((piece.height, piece.width));
    }
    out
}

fn class_admits(stock: &SheetStock, piece: &SheetPiece, allow_rotation: bool) -> bool {
    orientations(piece, allow_rotation)
        .iter()
        .any(|&(w, h)| w <= stock.width && h <= stock.height)
}

pub(crate) fn pack_sheets(
    pieces: &[SheetPiece],
    stock: &[SheetStock],
    options: &PackOptions,
    cancel: &CancelToken,
    progress: Option<&ProgressFn>,
) -> Result<PackResult, PackError> {
    // Decreasing area, stable on ties.
    let mut order: Vec<usize> = (0..pieces.len()).collect();
    order.sort_by(|&a, &b| {
        let area = |p: &SheetPiece| p.width as Area * p.height as Area;
        area(&pieces[b]).cmp(&area(&pieces[a]))
    });

    let mut class_order: Vec<usize> = (0..stock.len()).collect();
    class_order.sort_by_key(|&i| (stock[i].unit_price.unwrap_or(i64::MAX), i));

    let mut available: Vec<u32> = stock.iter().map(|s| s.available).collect();
    let mut opened_per_class: Vec<u32> = vec![0; stock.len()];
    let mut sheets: Vec<OpenSheet> = Vec::new();
    let mut unplaced: Vec<String> = Vec::new();

    let total = pieces.len();
    for (done, &pi) in order.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        let piece = &pieces[pi];
        let orients = orientations(piece, options.allow_rotation);

        // First open sheet that admits the piece, best orientation within it.
        let mut chosen: Option<(usize, Mm, Mm, Mm, Mm)> = None;
        'sheets: for (si, sheet) in sheets.iter().enumerate() {
            // (y, x, width) ordering picks the lowest drop, then leftmost,
            // then the orientation leaving the larger open width rightward.
            let best = orients
                .iter()
                .filter_map(|&(w, h)| sheet.sky.find(w, h).map(|(x, y)| (y, x, w, h)))
                .min_by_key(|&(y, x, w, _)| (y, x, w));
            if let Some((y, x, w, h)) = best {
                chosen = Some((si, x, y, w, h));
                break 'sheets;
            }
        }

        match chosen {
            Some((si, x, y, w, h)) => sheets[si].place(piece, x, y, w, h, options.kerf),
            None => {
                let admitting = class_order.iter().copied().find(|&ci| {
                    available[ci] > 0 && class_admits(&stock[ci], piece, options.allow_rotation)
                });
                match admitting {
                    Some(ci) => {
                        available[ci] -= 1;
                        let mut sheet = OpenSheet {
                            class_idx: ci,
                            instance: opened_per_class[ci],
                            width: stock[ci].width,
                            height: stock[ci].height,
                            sky: Skyline::new(stock[ci].width, stock[ci].height),
                            placements: Vec::new(),
                            placed: 0,
                            kerf_loss: 0,
                        };
                        opened_per_class[ci] += 1;
                        let (w, h) = orients
                            .iter()
                            .copied()
                            .filter(|&(w, h)| w <= sheet.width && h <= sheet.height)
                            .min_by_key(|&(w, _)| w)
                            .expect("class admitted the piece");
                        sheet.place(piece, 0, 0, w, h, options.kerf);
                        sheets.push(sheet);
                    }
                    None => unplaced.push(piece.id.clone()),
                }
            }
        }

        if let Some(cb) = progress {
            cb((done + 1) as f64 / total.max(1) as f64);
        }
    }

    let used_stock = sheets
        .into_iter()
        .map(|sheet| {
            let capacity = sheet.width as Area * sheet.height as Area;
            UsedStock {
                stock_item_id: stock[sheet.class_idx].stock_item_id.clone(),
                instance: sheet.instance,
                capacity,
                placed: sheet.placed,
                kerf_loss: sheet.kerf_loss,
                waste: capacity - sheet.placed - sheet.kerf_loss,
                placements: StockPlacements::Sheet(sheet.placements),
            }
        })
        .collect();

    Ok(PackResult::finish(
        Algorithm::BottomLeft2D,
        used_stock,
        unplaced,
    ))
}
