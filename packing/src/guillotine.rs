//! 2D guillotine nesting with a free-rectangle list.
//!
//! Every open sheet keeps axis-aligned free rectangles, initialized to
//! the sheet's usable area (each dimension trimmed by one kerf margin).
//! Pieces are processed by decreasing maximum dimension; each lands in
//! the smallest-area free rectangle that admits it in an admissible
//! orientation (best-area-fit, tie-broken by smaller shorter-side
//! waste), and the host rectangle is split along its shorter leftover
//! axis into two sub-rectangles with the kerf charged between them.
//! Rectangles that can no longer admit the smallest remaining piece
//! are discarded.

use crate::types::{
    Algorithm, Area, CancelToken, Mm, PackError, PackOptions, PackResult, ProgressFn, SheetPiece,
    SheetPlacement, SheetStock, StockPlacements, UsedStock,
};

#[derive(Debug, Clone, Copy)]
struct FreeRect {
    x: Mm,
    y: Mm,
    w: Mm,
    h: Mm,
}

impl FreeRect {
    fn area(&self) -> Area {
        self.w as Area * self.h as Area
    }

    fn admits(&self, w: Mm, h: Mm) -> bool {
        w <= self.w && h <= self.h
    }
}

/// Best-area-fit score: `(leftover area, shorter-side waste)`, lower is
/// better.
fn score(rect: &FreeRect, w: Mm, h: Mm) -> (Area, Mm) {
    let area_diff = rect.area() - (w as Area * h as Area);
    let short_side = (rect.w - w).min(rect.h - h);
    (area_diff, short_side)
}

struct OpenSheet {
    class_idx: usize,
    instance: u32,
    width: Mm,
    height: Mm,
    free: Vec<FreeRect>,
    placements: Vec<SheetPlacement>,
    placed: Area,
    kerf_loss: Area,
}

impl OpenSheet {
    fn new(class_idx: usize, instance: u32, stock: &SheetStock, kerf: Mm) -> Self {
        let usable_w = stock.width.saturating_sub(kerf);
        let usable_h = stock.height.saturating_sub(kerf);
        let capacity = stock.width as Area * stock.height as Area;
        Self {
            class_idx,
            instance,
            width: stock.width,
            height: stock.height,
            free: vec![FreeRect {
                x: 0,
                y: 0,
                w: usable_w,
                h: usable_h,
            }],
            placements: Vec::new(),
            placed: 0,
            // edge trim margins
            kerf_loss: capacity - usable_w as Area * usable_h as Area,
        }
    }

    fn find_best(&self, orients: &[(Mm, Mm)]) -> Option<(usize, Mm, Mm, (Area, Mm))> {
        let mut best: Option<(usize, Mm, Mm, (Area, Mm))> = None;
        for (idx, rect) in self.free.iter().enumerate() {
            for &(w, h) in orients {
                if !rect.admits(w, h) {
                    continue;
                }
                let s = score(rect, w, h);
                if best.is_none_or(|(_, _, _, bs)| s < bs) {
                    best = Some((idx, w, h, s));
                }
            }
        }
        best
    }

    fn place(&mut self, piece: &SheetPiece, free_idx: usize, w: Mm, h: Mm, kerf: Mm) {
        let rect = self.free.swap_remove(free_idx);

        self.placements.push(SheetPlacement {
            piece_id: piece.id.clone(),
            x: rect.x,
            y: rect.y,
            width: w,
            height: h,
            rotated: w != piece.width,
        });

        let piece_area = w as Area * h as Area;
        self.placed += piece_area;

        let split_area = self.split(rect, w, h, kerf);
        // whatever the split did not return as free area went to the saw
        self.kerf_loss += rect.area() - piece_area - split_area;
    }

    /// Splits `rect` around a `w`×`h` placement at its corner along the
    /// shorter leftover axis; returns the total area kept as free.
    fn split(&mut self, rect: FreeRect, w: Mm, h: Mm, kerf: Mm) -> Area {
        let leftover_w = rect.w - w;
        let leftover_h = rect.h - h;
        let mut kept: Area = 0;

        let mut push = |r: FreeRect| {
            if r.w > 0 && r.h > 0 {
                kept += r.area();
                self.free.push(r);
            }
        };

        if leftover_w > 0 && leftover_h > 0 {
            if leftover_w < leftover_h {
                // split horizontally: bottom strip spans the full width
                push(FreeRect {
                    x: rect.x + w + kerf.min(leftover_w),
                    y: rect.y,
                    w: leftover_w.saturating_sub(kerf),
                    h,
                });
                push(FreeRect {
                    x: rect.x,
                    y: rect.y + h + kerf.min(leftover_h),
                    w: rect.w,
                    h: leftover_h.saturating_sub(kerf),
                });
            } else {
                // split vertically: right strip spans the full height
                push(FreeRect {
                    x: rect.x + w + kerf.min(leftover_w),
                    y: rect.y,
                    w: leftover_w.saturating_sub(kerf),
                    h: rect.h,
                });
                push(FreeRect {
                    x: rect.x,
                    y: rect.y + h + kerf.min(leftover_h),
                    w,
                    h: leftover_h.saturating_sub(kerf),
                });
            }
        } else if leftover_w > 0 {
            push(FreeRect {
                x: rect.x + w + kerf.min(leftover_w),
                y: rect.y,
                w: leftover_w.saturating_sub(kerf),
                h: rect.h,
            });
        } else if leftover_h > 0 {
            push(FreeRect {
                x: rect.x,
                y: rect.y + h + kerf.min(leftover_h),
                w: rect.w,
                h: leftover_h.saturating_sub(kerf),
            });
        }

        kept
    }

    /// Drops free rectangles that cannot admit `smallest` in any of its
    /// admissible orientations. Their area becomes waste.
    fn prune(&mut self, smallest: Option<&[(Mm, Mm)]>) {
        let Some(orients) = smallest else {
            return;
        };
        self.free
            .retain(|r| orients.iter().any(|&(w, h)| r.admits(w, h)));
    }
}

fn orientations(piece: &SheetPiece, allow_rotation: bool) -> Vec<(Mm, Mm)> {
    let mut out = vec![(piece.width, piece.height)];
    if allow_rotation && piece.can_rotate && piece.width != piece.height {
        out.push((piece.height, piece.width));
    }
    out
}

pub(crate) fn pack_sheets(
    pieces: &[SheetPiece],
    stock: &[SheetStock],
    options: &PackOptions,
    cancel: &CancelToken,
    progress: Option<&ProgressFn>,
) -> Result<PackResult, PackError> {
    // Decreasing maximum dimension, stable on ties.
    let mut order: Vec<usize> = (0..pieces.len()).collect();
    order.sort_by(|&a, &b| {
        let max_dim = |p: &SheetPiece| p.width.max(p.height);
        max_dim(&pieces[b]).cmp(&max_dim(&pieces[a]))
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

        // Globally smallest-area admitting free rectangle across sheets.
        let best = sheets
            .iter()
            .enumerate()
            .filter_map(|(si, sheet)| {
                sheet
                    .find_best(&orients)
                    .map(|(idx, w, h, s)| (s, si, idx, w, h))
            })
            .min_by_key(|&(s, si, ..)| (s, si));

        let mut placed = true;
        match best {
            Some((_, si, idx, w, h)) => sheets[si].place(piece, idx, w, h, options.kerf),
            None => {
                let admitting = class_order.iter().copied().find(|&ci| {
                    let sheet = OpenSheet::new(ci, 0, &stock[ci], options.kerf);
                    available[ci] > 0 && sheet.find_best(&orients).is_some()
                });
                match admitting {
                    Some(ci) => {
                        available[ci] -= 1;
                        let mut sheet =
                            OpenSheet::new(ci, opened_per_class[ci], &stock[ci], options.kerf);
                        opened_per_class[ci] += 1;
                        let (idx, w, h, _) =
                            sheet.find_best(&orients).expect("class admitted the piece");
                        sheet.place(piece, idx, w, h, options.kerf);
                        sheets.push(sheet);
                    }
                    None => {
                        unplaced.push(piece.id.clone());
                        placed = false;
                    }
                }
            }
        }

        if placed {
            // Smallest remaining piece bounds which rectangles stay useful.
            let smallest = order[done + 1..]
                .iter()
                .map(|&i| &pieces[i])
                .min_by_key(|p| p.width as Area * p.height as Area)
                .map(|p| orientations(p, options.allow_rotation));
            for sheet in &mut sheets {
                sheet.prune(smallest.as_deref());
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
        Algorithm::Guillotine2D,
        used_stock,
        unplaced,
    ))
}
