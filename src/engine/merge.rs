use crate::model::*;

/// Union of `a` and `b` if one ends at most `tolerance` seconds before the
/// other starts. Overlapping spans never join.
fn join(a: &Span, b: &Span, tolerance: Ts) -> Option<Span> {
    let (first, second) = if a.from <= b.from { (a, b) } else { (b, a) };
    let gap = first.gap_to(second);
    if gap >= 1 && gap <= tolerance {
        Some(Span::new(first.from, second.to))
    } else {
        None
    }
}

/// The open stretch strictly between two joinable spans, if it is not empty.
fn between(a: &Span, b: &Span) -> Option<Span> {
    let (first, second) = if a.from <= b.from { (a, b) } else { (b, a) };
    (second.from - first.to > 1).then(|| Span::new(first.to + 1, second.from - 1))
}

/// True if no pending result other than the two being joined lies in the gap.
fn gap_is_clear(
    batch: &Batch,
    a: &Span,
    b: &Span,
    skip_update: &[usize],
    skip_create: Option<usize>,
) -> bool {
    let Some(gap) = between(a, b) else {
        return true;
    };
    let updates_clear = batch
        .updates
        .iter()
        .enumerate()
        .filter(|(i, _)| !skip_update.contains(i))
        .all(|(_, u)| !u.new_span.overlaps(&gap));
    let creates_clear = batch
        .creates
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != skip_create)
        .all(|(_, c)| !c.span.overlaps(&gap));
    updates_clear && creates_clear
}

/// Perform the first available merge, or `None` if nothing merges.
fn merge_once(batch: &Batch, tolerance: Ts) -> Option<Batch> {
    let updates = &batch.updates;

    for i in 0..updates.len() {
        for j in (i + 1)..updates.len() {
            let (a, b) = (&updates[i], &updates[j]);
            if a.price != b.price {
                continue;
            }
            let Some(joined) = join(&a.new_span, &b.new_span, tolerance) else {
                continue;
            };
            if !gap_is_clear(batch, &a.new_span, &b.new_span, &[i, j], None) {
                continue;
            }
            let mut next = batch.clone();
            next.updates[i].new_span = joined;
            let folded = next.updates.remove(j);
            next.deletes.push(DeleteRequest::new(folded.key));
            return Some(next);
        }
    }

    for (i, update) in updates.iter().enumerate() {
        for (k, create) in batch.creates.iter().enumerate() {
            if update.price != create.price {
                continue;
            }
            let Some(joined) = join(&update.new_span, &create.span, tolerance) else {
                continue;
            };
            if !gap_is_clear(batch, &update.new_span, &create.span, &[i], Some(k)) {
                continue;
            }
            let mut next = batch.clone();
            next.updates[i].new_span = joined;
            next.creates.remove(k);
            return Some(next);
        }
    }

    None
}

/// Fold same-priced pending results that are continuous within `tolerance`
/// until nothing more folds.
///
/// Two updates fold into the earlier one and the later one's stored interval
/// is deleted. A create folds into an update and disappears.
pub(crate) fn merge_continuous(batch: Batch, tolerance: Ts) -> Batch {
    let mut current = batch;
    while let Some(next) = merge_once(&current, tolerance) {
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: Ts = 60;

    fn price(s: &str) -> Price {
        s.parse().unwrap()
    }

    fn upd(key: (Ts, Ts), new: (Ts, Ts), p: &str) -> UpdateRequest {
        UpdateRequest::new(Span::new(key.0, key.1), Span::new(new.0, new.1), price(p))
    }

    fn unchanged(from: Ts, to: Ts, p: &str) -> UpdateRequest {
        upd((from, to), (from, to), p)
    }

    fn create(from: Ts, to: Ts, p: &str) -> CreateRequest {
        CreateRequest::new(Span::new(from, to), price(p))
    }

    #[test]
    fn join_requires_a_positive_gap_within_tolerance() {
        assert_eq!(join(&Span::new(0, 99), &Span::new(100, 199), TOL), Some(Span::new(0, 199)));
        assert_eq!(join(&Span::new(100, 199), &Span::new(0, 99), TOL), Some(Span::new(0, 199)));
        assert_eq!(join(&Span::new(0, 99), &Span::new(159, 199), TOL), Some(Span::new(0, 199)));
        assert_eq!(join(&Span::new(0, 99), &Span::new(160, 199), TOL), None);
        assert_eq!(join(&Span::new(0, 99), &Span::new(99, 199), TOL), None);
        assert_eq!(join(&Span::new(0, 99), &Span::new(100, 199), 0), None);
    }

    #[test]
    fn continuous_same_price_triple_folds_into_one_update() {
        let batch = Batch {
            updates: vec![
                unchanged(0, 99, "5"),
                unchanged(100, 199, "5"),
                unchanged(200, 299, "5"),
            ],
            ..Batch::default()
        };
        let merged = merge_continuous(batch, TOL);
        assert_eq!(merged.updates, vec![upd((0, 99), (0, 299), "5")]);
        assert_eq!(
            merged.deletes,
            vec![
                DeleteRequest::new(Span::new(100, 199)),
                DeleteRequest::new(Span::new(200, 299)),
            ]
        );
        assert!(merged.creates.is_empty());
    }

    #[test]
    fn differing_prices_fold_nothing() {
        let batch = Batch {
            updates: vec![unchanged(0, 99, "1"), unchanged(200, 299, "3")],
            creates: vec![create(100, 199, "2")],
            deletes: vec![],
        };
        assert_eq!(merge_continuous(batch.clone(), TOL), batch);
    }

    #[test]
    fn partial_price_match_folds_only_matching_side() {
        let batch = Batch {
            updates: vec![unchanged(0, 99, "1"), unchanged(200, 299, "3")],
            creates: vec![create(100, 199, "1")],
            deletes: vec![],
        };
        let merged = merge_continuous(batch, TOL);
        assert_eq!(
            merged.updates,
            vec![upd((0, 99), (0, 199), "1"), unchanged(200, 299, "3")]
        );
        assert!(merged.creates.is_empty());
        assert!(merged.deletes.is_empty());
    }

    #[test]
    fn create_preceding_an_update_extends_it_backwards() {
        let batch = Batch {
            updates: vec![unchanged(200, 299, "4")],
            creates: vec![create(100, 180, "4")],
            deletes: vec![],
        };
        let merged = merge_continuous(batch, TOL);
        assert_eq!(merged.updates, vec![upd((200, 299), (100, 299), "4")]);
        assert!(merged.creates.is_empty());
    }

    #[test]
    fn update_pair_in_reverse_order_still_folds() {
        let batch = Batch {
            updates: vec![unchanged(100, 199, "5"), unchanged(0, 99, "5")],
            ..Batch::default()
        };
        let merged = merge_continuous(batch, TOL);
        assert_eq!(merged.updates, vec![upd((100, 199), (0, 199), "5")]);
        assert_eq!(merged.deletes, vec![DeleteRequest::new(Span::new(0, 99))]);
    }

    #[test]
    fn merge_refused_across_a_different_price_in_the_gap() {
        let batch = Batch {
            updates: vec![unchanged(0, 99, "5"), unchanged(130, 200, "5")],
            creates: vec![create(110, 120, "9")],
            deletes: vec![],
        };
        assert_eq!(merge_continuous(batch.clone(), TOL), batch);
    }

    #[test]
    fn chain_through_create_reaches_fixed_point() {
        // update - create - update, all the same price, folds into one.
        let batch = Batch {
            updates: vec![unchanged(0, 99, "2"), unchanged(200, 299, "2")],
            creates: vec![create(100, 199, "2")],
            deletes: vec![],
        };
        let merged = merge_continuous(batch, TOL);
        assert_eq!(merged.updates, vec![upd((0, 99), (0, 299), "2")]);
        assert_eq!(merged.deletes, vec![DeleteRequest::new(Span::new(200, 299))]);
        assert!(merged.creates.is_empty());
    }
}
