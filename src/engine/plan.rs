use tracing::debug;

use crate::model::*;

/// What happens to one stored interval when a new interval is written over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// The request is already covered at the same price. Nothing to do.
    Absorbed,
    /// Identical bounds, new price.
    Repriced(UpdateRequest),
    /// First stored interval lying inside the request; stretched to become it.
    Carrier(UpdateRequest),
    /// Any further stored interval lying inside the request.
    Superseded(DeleteRequest),
    /// Stored interval reaches into the request from the left.
    TrimmedEnd(UpdateRequest),
    /// Stored interval reaches into the request from the right.
    TrimmedStart(UpdateRequest),
    /// Request strictly inside a differently priced interval.
    Split {
        head: UpdateRequest,
        tail: CreateRequest,
    },
    /// Only reached through the merge tolerance. Carried unchanged so the
    /// merge pass can extend it.
    Neighbor(UpdateRequest),
}

pub(crate) fn classify(
    request: &CreateRequest,
    existing: &Interval,
    carrier_taken: bool,
) -> Decision {
    let r = request.span;
    let e = existing.span;

    if e == r {
        if existing.price == request.price {
            return Decision::Absorbed;
        }
        return Decision::Repriced(UpdateRequest::new(e, e, request.price));
    }

    if r.contains_span(&e) {
        if carrier_taken {
            return Decision::Superseded(DeleteRequest::new(e));
        }
        return Decision::Carrier(UpdateRequest::new(e, r, request.price));
    }

    if e.contains_span(&r) {
        if existing.price == request.price {
            return Decision::Absorbed;
        }
        if e.from < r.from && r.to < e.to {
            return Decision::Split {
                head: UpdateRequest::new(e, Span::new(e.from, r.from - 1), existing.price),
                tail: CreateRequest::new(Span::new(r.to + 1, e.to), existing.price),
            };
        }
        if e.from == r.from {
            return Decision::TrimmedStart(trim_start(existing, &r));
        }
        return Decision::TrimmedEnd(trim_end(existing, &r));
    }

    if e.from < r.from && r.from <= e.to {
        return Decision::TrimmedEnd(trim_end(existing, &r));
    }
    if e.from <= r.to && r.to < e.to {
        return Decision::TrimmedStart(trim_start(existing, &r));
    }

    Decision::Neighbor(UpdateRequest::unchanged(existing))
}

fn trim_end(existing: &Interval, r: &Span) -> UpdateRequest {
    UpdateRequest::new(existing.span, Span::new(existing.span.from, r.from - 1), existing.price)
}

fn trim_start(existing: &Interval, r: &Span) -> UpdateRequest {
    UpdateRequest::new(existing.span, Span::new(r.to + 1, existing.span.to), existing.price)
}

/// Operations that write `request` over `candidates` (ascending by `from`).
///
/// Returns `None` if the calendar already holds the request. The result has
/// not been through the merge pass yet.
pub(crate) fn plan_create(request: &CreateRequest, candidates: &[Interval]) -> Option<Batch> {
    let mut batch = Batch::default();
    let mut carrier_taken = false;
    let mut create_needed = true;

    for existing in candidates {
        let decision = classify(request, existing, carrier_taken);
        debug!("plan {}@{}: {existing} -> {decision:?}", request.span, request.price);
        match decision {
            Decision::Absorbed => return None,
            Decision::Repriced(update) => {
                create_needed = false;
                batch.updates.push(update);
            }
            Decision::Carrier(update) => {
                carrier_taken = true;
                create_needed = false;
                batch.updates.push(update);
            }
            Decision::Superseded(delete) => batch.deletes.push(delete),
            Decision::TrimmedEnd(update)
            | Decision::TrimmedStart(update)
            | Decision::Neighbor(update) => batch.updates.push(update),
            Decision::Split { head, tail } => {
                batch.updates.push(head);
                batch.creates.push(tail);
            }
        }
    }

    if create_needed {
        batch.creates.push(*request);
    }
    Some(batch)
}

/// Every candidate as an unchanged update, so the merge pass still sees them
/// when the request itself needs no write.
pub(crate) fn carry_unchanged(candidates: &[Interval]) -> Batch {
    Batch {
        updates: candidates.iter().map(UpdateRequest::unchanged).collect(),
        ..Batch::default()
    }
}
