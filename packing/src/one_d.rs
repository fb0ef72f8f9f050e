//! 1D bar nesting: first-fit-decreasing and best-fit-decreasing.
//!
//! Kerf model: a cut separating two adjacent pieces consumes `kerf`
//! millimetres, so a piece entering a non-empty bar needs
//! `length + kerf` of remaining material. A piece that exactly equals
//! the remainder is a flush fill: its far edge meets the bar end and no
//! trailing cut is charged.

use crate::types::{
    Area, BarPiece, BarPlacement, BarStock, CancelToken, Mm, PackError, PackOptions, PackResult,
    ProgressFn, StockPlacements, UsedStock,
};

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum FitRule {
    /// First open bar that admits the piece.
    First,
    /// Open bar leaving the smallest slack after placement.
    Best,
}

struct OpenBar {
    class_idx: usize,
    instance: u32,
    length: Mm,
    /// Next free offset; everything before it is pieces and kerf.
    cursor: Mm,
    cuts: u32,
    placements: Vec<BarPlacement>,
}

impl OpenBar {
    fn remaining(&self) -> Mm {
        self.length - self.cursor
    }

    /// Offset at which `piece` would start, or None when it does not fit.
    fn admit(&self, piece: Mm, kerf: Mm) -> Option<Mm> {
        let rem = self.remaining();
        if self.placements.is_empty() {
            return (piece <= rem).then_some(self.cursor);
        }
        if piece.checked_add(kerf).is_some_and(|need| need <= rem) {
            return Some(self.cursor + kerf);
        }
        if piece == rem {
            // flush fill, no trailing cut
            return Some(self.cursor);
        }
        None
    }

    fn place(&mut self, piece: &BarPiece, offset: Mm) {
        if offset > self.cursor {
            self.cuts += 1;
        }
        self.placements.push(BarPlacement {
            piece_id: piece.id.clone(),
            offset,
            length: piece.length,
        });
        self.cursor = offset + piece.length;
    }
}

pub(crate) fn pack_bars(
    rule: FitRule,
    pieces: &[BarPiece],
    stock: &[BarStock],
    options: &PackOptions,
    cancel: &CancelToken,
    progress: Option<&ProgressFn>,
) -> Result<PackResult, PackError> {
    let kerf = options.kerf;

    // Decreasing length, stable on ties.
    let mut order: Vec<usize> = (0..pieces.len()).collect();
    order.sort_by(|&a, &b| pieces[b].length.cmp(&pieces[a].length));

    // Cheapest class first when opening new bars; unpriced classes last.
    let mut class_order: Vec<usize> = (0..stock.len()).collect();
    class_order.sort_by_key(|&i| (stock[i].unit_price.unwrap_or(i64::MAX), i));

    let mut available: Vec<u32> = stock.iter().map(|s| s.available).collect();
    let mut opened_per_class: Vec<u32> = vec![0; stock.len()];
    let mut bars: Vec<OpenBar> = Vec::new();
    let mut unplaced: Vec<String> = Vec::new();

    let total = pieces.len();
    for (done, &pi) in order.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        let piece = &pieces[pi];

        let chosen = match rule {
            FitRule::First => bars
                .iter()
                .enumerate()
                .find_map(|(bi, bar)| bar.admit(piece.length, kerf).map(|off| (bi, off))),
            FitRule::Best => bars
                .iter()
                .enumerate()
                .filter_map(|(bi, bar)| {
                    let off = bar.admit(piece.length, kerf)?;
                    let slack = bar.length - (off + piece.length);
                    Some((slack, bi, off))
                })
                .min_by_key(|&(slack, bi, _)| (slack, bi))
                .map(|(_, bi, off)| (bi, off)),
        };

        match chosen {
            Some((bi, off)) => bars[bi].place(piece, off),
            None => {
                let admitting = class_order
                    .iter()
                    .copied()
                    .find(|&ci| available[ci] > 0 && stock[ci].length >= piece.length);
                match admitting {
                    Some(ci) => {
                        available[ci] -= 1;
                        let mut bar = OpenBar {
                            class_idx: ci,
                            instance: opened_per_class[ci],
                            length: stock[ci].length,
                            cursor: 0,
                            cuts: 0,
                            placements: Vec::new(),
                        };
                        opened_per_class[ci] += 1;
                        bar.place(piece, 0);
                        bars.push(bar);
                    }
                    None => unplaced.push(piece.id.clone()),
                }
            }
        }

        if let Some(cb) = progress {
            cb((done + 1) as f64 / total.max(1) as f64);
        }
    }

    let used_stock = bars
        .into_iter()
        .map(|bar| {
            let placed: Area = bar.placements.iter().map(|p| p.length as Area).sum();
            let kerf_loss = bar.cuts as Area * kerf as Area;
            let capacity = bar.length as Area;
            UsedStock {
                stock_item_id: stock[bar.class_idx].stock_item_id.clone(),
                instance: bar.instance,
                capacity,
                placed,
                kerf_loss,
                waste: capacity - placed - kerf_loss,
                placements: StockPlacements::Bar(bar.placements),
            }
        })
        .collect();

    Ok(PackResult::finish(
        match rule {
            FitRule::First => crate::types::Algorithm::Ffd1D,
            FitRule::Best => crate::types::Algorithm::Bfd1D,
        },
        used_stock,
        unplaced,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Algorithm;
    use crate::{PackRequest, pack};

    fn mk_pieces(lengths: &[Mm]) -> Vec<BarPiece> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, &length)| BarPiece {
                id: format!("p{i}"),
                length,
            })
            .collect()
    }

    fn mk_stock(length: Mm, available: u32) -> Vec<BarStock> {
        vec![BarStock {
            stock_item_id: "bar".into(),
            length,
            available,
            unit_price: None,
        }]
    }

    fn run(alg: Algorithm, pieces: Vec<BarPiece>, stock: Vec<BarStock>, kerf: Mm) -> PackResult {
        pack(
            alg,
            &PackRequest::Bars { pieces, stock },
            &PackOptions {
                kerf,
                allow_rotation: false,
            },
            &CancelToken::new(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn bfd_single_bar_waste_accounts_two_kerfs() {
        let result = run(
            Algorithm::Bfd1D,
            mk_pieces(&[2500, 1500, 1000]),
            mk_stock(6000, 10),
            3,
        );

        assert_eq!(result.stock_used_count(), 1);
        assert!(result.unplaced.is_empty());
        // 6000 - (2500 + 1500 + 1000) - 2 * 3
        assert_eq!(result.total_waste, 994);
        assert_eq!(result.used_stock[0].kerf_loss, 6);
    }

    #[test]
    fn ffd_overflows_to_second_bar() {
        let result = run(
            Algorithm::Ffd1D,
            mk_pieces(&[3000, 3000, 3000]),
            mk_stock(6000, 2),
            3,
        );

        assert_eq!(result.stock_used_count(), 2);
        assert!(result.unplaced.is_empty());
        assert_eq!(result.used_stock[0].placements.len(), 2);
        assert_eq!(result.used_stock[1].placements.len(), 1);
        // second piece is a flush fill, so bar 1 carries no kerf loss
        assert_eq!(result.used_stock[0].kerf_loss, 0);
        assert_eq!(result.used_stock[0].waste, 0);
    }

    #[test]
    fn single_piece_single_bar() {
        let result = run(Algorithm::Bfd1D, mk_pieces(&[1200]), mk_stock(6000, 1), 3);
        assert!(result.unplaced.is_empty());
        assert_eq!(result.stock_used_count(), 1);
        assert_eq!(result.used_stock[0].placed, 1200);
    }

    #[test]
    fn oversized_piece_goes_unplaced() {
        let result = run(
            Algorithm::Ffd1D,
            mk_pieces(&[7000, 1000]),
            mk_stock(6000, 2),
            3,
        );
        assert_eq!(result.unplaced, vec!["p0".to_string()]);
        assert_eq!(result.stock_used_count(), 1);
    }

    #[test]
    fn exhausted_stock_goes_unplaced() {
        let result = run(
            Algorithm::Ffd1D,
            mk_pieces(&[4000, 4000, 4000]),
            mk_stock(6000, 2),
            0,
        );
        assert_eq!(result.stock_used_count(), 2);
        assert_eq!(result.unplaced.len(), 1);
    }

    #[test]
    fn bfd_prefers_tightest_bar() {
        // After 5000 and 4000 open two bars and 1400 lands in the second,
        // the 500 admits both: bar 1 slack 500, bar 2 slack 100. FFD takes
        // bar 1; BFD must take the tighter bar 2.
        let pieces = mk_pieces(&[5000, 4000, 1400, 500]);

        let ffd = run(Algorithm::Ffd1D, pieces.clone(), mk_stock(6000, 3), 0);
        assert_eq!(ffd.used_stock[0].placed, 5000 + 500);

        let bfd = run(Algorithm::Bfd1D, pieces, mk_stock(6000, 3), 0);
        assert_eq!(bfd.stock_used_count(), 2);
        assert_eq!(bfd.used_stock[0].placed, 5000);
        assert_eq!(bfd.used_stock[1].placed, 4000 + 1400 + 500);
    }

    #[test]
    fn new_bars_open_from_cheapest_class() {
        let stock = vec![
            BarStock {
                stock_item_id: "expensive".into(),
                length: 6000,
                available: 5,
                unit_price: Some(900),
            },
            BarStock {
                stock_item_id: "cheap".into(),
                length: 6000,
                available: 5,
                unit_price: Some(400),
            },
        ];
        let result = run(Algorithm::Ffd1D, mk_pieces(&[1000]), stock, 3);
        assert_eq!(result.used_stock[0].stock_item_id, "cheap");
    }

    #[test]
    fn cancellation_before_first_piece_runs_no_placement() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = pack(
            Algorithm::Ffd1D,
            &PackRequest::Bars {
                pieces: mk_pieces(&[1000]),
                stock: mk_stock(6000, 1),
            },
            &PackOptions {
                kerf: 0,
                allow_rotation: false,
            },
            &cancel,
            None,
        )
        .unwrap_err();
        assert_eq!(err, PackError::Cancelled);
    }

    #[test]
    fn progress_reaches_one() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let cb = move |p: f64| seen_cb.lock().unwrap().push(p);
        let _ = pack(
            Algorithm::Bfd1D,
            &PackRequest::Bars {
                pieces: mk_pieces(&[100, 200, 300]),
                stock: mk_stock(6000, 1),
            },
            &PackOptions {
                kerf: 0,
                allow_rotation: false,
            },
            &CancelToken::new(),
            Some(&cb),
        )
        .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// capacity = placed + kerf + waste for every opened bar, and
            /// every piece lands exactly once in placements or unplaced.
            #[test]
            fn accounting_balances(
                lengths in proptest::collection::vec(1u32..4000, 1..40),
                kerf in 0u32..20,
                bar_len in 1000u32..8000,
                avail in 1u32..10,
            ) {
                let pieces = mk_pieces(&lengths);
                let result = run(Algorithm::Ffd1D, pieces, mk_stock(bar_len, avail), kerf);

                let mut seen = 0usize;
                for used in &result.used_stock {
                    prop_assert_eq!(
                        used.capacity,
                        used.placed + used.kerf_loss + used.waste
                    );
                    seen += used.placements.len();
                }
                prop_assert_eq!(seen + result.unplaced.len(), lengths.len());
            }

            /// No two placements on the same bar overlap.
            #[test]
            fn placements_disjoint(
                lengths in proptest::collection::vec(1u32..3000, 1..30),
                kerf in 0u32..10,
            ) {
                let result = run(Algorithm::Bfd1D, mk_pieces(&lengths), mk_stock(6000, 20), kerf);
                for used in &result.used_stock {
                    let StockPlacements::Bar(ps) = &used.placements else { unreachable!() };
                    let mut spans: Vec<(Mm, Mm)> =
                        ps.iter().map(|p| (p.offset, p.offset + p.length)).collect();
                    spans.sort_unstable();
                    for w in spans.windows(2) {
                        prop_assert!(w[0].1 <= w[1].0, "overlap: {:?}", w);
                    }
                    if let Some(&(_, end)) = spans.last() {
                        prop_assert!(end as Area <= used.capacity);
                    }
                }
            }
        }
    }
}
