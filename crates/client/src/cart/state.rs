//! Pure cart mirror state.
//!
//! The mirror is the last server cart folded in (`settled`) plus one
//! optimistic overlay per item with a mutation in flight. Every request is
//! tagged with a sequence number from one counter:
//!
//! - an item's overlay belongs to the newest mutation issued for it; older
//!   responses for that item neither clear nor replace it
//! - a server cart is folded in only if it answers a request issued after
//!   the one that produced the current `settled` cart, so a late response
//!   can never regress the mirror
//! - the server may apply requests in another order than they were issued,
//!   so a settled cart from a later request can predate an earlier item's
//!   change. That item's success is [`Settlement::Unconfirmed`]: its overlay
//!   stays until a fetch issued after the response settles it
//!
//! Money is never recomputed here. While an overlay is showing, totals stay
//! the server's last numbers.

use std::collections::{HashMap, HashSet};

use agrihcm_core::{Cart, ProductId};

/// The optimistic change an in-flight mutation shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    /// Item added or incremented; shown as pending without a local change.
    Add,
    /// Item shown at the new quantity.
    SetQuantity(u32),
    /// Item hidden.
    Remove,
}

/// Lifecycle of one cart item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    /// Mirrors the last server cart.
    Settled,
    /// An optimistic mutation is in flight.
    Pending,
    /// The last mutation failed and was reverted.
    RolledBack,
}

/// What [`CartState::settle`] did with a server cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The server cart replaced the mirror.
    Applied,
    /// A superseded response; the mirror keeps the newer cart.
    Discarded { changed: bool },
    /// The item's newest request succeeded, but the settled cart came from a
    /// request issued later and may not include it. Fetch the cart with
    /// [`CartState::begin_reconcile`] to settle the item.
    Unconfirmed,
}

impl Settlement {
    /// Whether the visible cart changed.
    #[must_use]
    pub const fn changed(self) -> bool {
        match self {
            Self::Applied => true,
            Self::Discarded { changed } => changed,
            Self::Unconfirmed => false,
        }
    }
}

/// Handle for one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    seq: u64,
    product_id: Option<ProductId>,
    reconcile: bool,
}

impl Ticket {
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub const fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }
}

#[derive(Debug, Clone, Copy)]
struct Overlay {
    seq: u64,
    op: PendingOp,
}

/// Settled server cart plus per-item optimistic overlays.
#[derive(Debug, Default)]
pub struct CartState {
    settled: Cart,
    settled_seq: u64,
    overlays: HashMap<ProductId, Overlay>,
    rolled_back: HashSet<ProductId>,
    next_seq: u64,
}

impl CartState {
    #[must_use]
    pub fn new(settled: Cart) -> Self {
        Self {
            settled,
            ..Self::default()
        }
    }

    /// The last server cart folded in, without overlays.
    #[must_use]
    pub const fn settled(&self) -> &Cart {
        &self.settled
    }

    /// What the UI should show.
    #[must_use]
    pub fn view(&self) -> Cart {
        let mut cart = self.settled.clone();
        cart.items.retain(|item| {
            !matches!(
                self.overlays.get(&item.product_id()),
                Some(Overlay {
                    op: PendingOp::Remove,
                    ..
                })
            )
        });

        for item in &mut cart.items {
            if let Some(overlay) = self.overlays.get(&item.product_id()) {
                item.pending = true;
                if let PendingOp::SetQuantity(quantity) = overlay.op {
                    item.quantity = quantity;
                }
            }
        }
        cart
    }

    /// Start a mutation on one item and apply its optimistic overlay.
    pub fn begin(&mut self, product_id: ProductId, op: PendingOp) -> Ticket {
        let seq = self.issue();
        self.overlays.insert(product_id, Overlay { seq, op });
        self.rolled_back.remove(&product_id);
        Ticket {
            seq,
            product_id: Some(product_id),
            reconcile: false,
        }
    }

    /// Start a whole-cart request (fetch or clear). No overlay.
    pub fn begin_fetch(&mut self) -> Ticket {
        Ticket {
            seq: self.issue(),
            product_id: None,
            reconcile: false,
        }
    }

    /// Start the fetch that settles an [`Settlement::Unconfirmed`] item.
    ///
    /// The item's overlay moves to the new ticket. Returns `None` when a
    /// newer mutation for the item has taken over.
    pub fn begin_reconcile(&mut self, ticket: &Ticket) -> Option<Ticket> {
        let product_id = ticket.product_id?;
        if !self.is_current(ticket) {
            return None;
        }
        let seq = self.issue();
        if let Some(overlay) = self.overlays.get_mut(&product_id) {
            overlay.seq = seq;
        }
        Some(Ticket {
            seq,
            product_id: Some(product_id),
            reconcile: true,
        })
    }

    /// Whether `ticket` is still the newest request for its item.
    #[must_use]
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.product_id.map_or_else(
            || ticket.seq > self.settled_seq,
            |id| {
                self.overlays
                    .get(&id)
                    .is_some_and(|overlay| overlay.seq == ticket.seq)
            },
        )
    }

    /// Fold in the server cart returned for `ticket`.
    pub fn settle(&mut self, ticket: &Ticket, server: Cart) -> Settlement {
        if ticket.seq > self.settled_seq {
            self.clear_overlay(ticket);
            self.settled = server;
            self.settled_seq = ticket.seq;
            if ticket.product_id.is_none() {
                self.rolled_back.clear();
            }
            return Settlement::Applied;
        }

        // A reconcile fetch was issued after the server applied the item's
        // change, so any cart settled after it includes that change.
        if !ticket.reconcile && ticket.product_id.is_some() && self.is_current(ticket) {
            tracing::debug!(
                seq = ticket.seq,
                settled_seq = self.settled_seq,
                "Item change may be missing from the settled cart"
            );
            return Settlement::Unconfirmed;
        }

        tracing::debug!(
            seq = ticket.seq,
            settled_seq = self.settled_seq,
            "Discarding cart from a superseded response"
        );
        Settlement::Discarded {
            changed: self.clear_overlay(ticket),
        }
    }

    /// Drop the item's overlay without marking it rolled back, leaving the
    /// settled cart showing. Returns whether the view changed.
    pub fn release(&mut self, ticket: &Ticket) -> bool {
        self.clear_overlay(ticket)
    }

    /// Revert the item touched by `ticket` to the settled cart.
    ///
    /// Returns false when a newer mutation for the item has taken over, in
    /// which case the newer one decides what is shown.
    pub fn rollback(&mut self, ticket: &Ticket) -> bool {
        if !self.clear_overlay(ticket) {
            return false;
        }
        if let Some(id) = ticket.product_id {
            self.rolled_back.insert(id);
        }
        true
    }

    /// Phase of one item.
    #[must_use]
    pub fn phase(&self, product_id: ProductId) -> ItemPhase {
        if self.overlays.contains_key(&product_id) {
            ItemPhase::Pending
        } else if self.rolled_back.contains(&product_id) {
            ItemPhase::RolledBack
        } else {
            ItemPhase::Settled
        }
    }

    fn clear_overlay(&mut self, ticket: &Ticket) -> bool {
        let Some(id) = ticket.product_id else {
            return false;
        };
        if self.is_current(ticket) {
            self.overlays.remove(&id);
            true
        } else {
            false
        }
    }

    fn issue(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrihcm_core::{CartItem, CartItemId, CartProduct};
    use rust_decimal::Decimal;

    use super::*;

    fn item(product: i64, quantity: u32) -> CartItem {
        let price = Decimal::new(10_000, 0);
        CartItem {
            id: CartItemId::new(product * 10),
            product: CartProduct {
                id: ProductId::new(product),
                slug: format!("product-{product}"),
                name: format!("Product {product}"),
                price,
                image: None,
                is_in_stock: true,
                stock_quantity: 50,
            },
            quantity,
            subtotal: price * Decimal::from(quantity),
            pending: false,
            created_at: None,
        }
    }

    fn cart(items: Vec<CartItem>) -> Cart {
        let total_items = items.iter().map(|i| i.quantity).sum();
        let total_price = items.iter().map(|i| i.subtotal).sum();
        Cart {
            id: None,
            items,
            total_items,
            total_price,
            updated_at: None,
        }
    }

    const P1: ProductId = ProductId::new(1);
    const P2: ProductId = ProductId::new(2);

    #[test]
    fn test_optimistic_quantity_then_rollback() {
        let mut state = CartState::new(cart(vec![item(1, 2)]));

        let ticket = state.begin(P1, PendingOp::SetQuantity(3));
        let view = state.view();
        assert_eq!(view.item(P1).unwrap().quantity, 3);
        assert!(view.item(P1).unwrap().pending);
        assert_eq!(view.total_items, 2, "totals stay the server's");
        assert_eq!(state.phase(P1), ItemPhase::Pending);

        assert!(state.rollback(&ticket));
        let view = state.view();
        assert_eq!(view.item(P1).unwrap().quantity, 2);
        assert!(!view.has_pending());
        assert_eq!(state.phase(P1), ItemPhase::RolledBack);
        assert_eq!(view, cart(vec![item(1, 2)]));
    }

    #[test]
    fn test_settle_replaces_whole_cart() {
        let mut state = CartState::new(cart(vec![item(1, 2)]));
        let ticket = state.begin(P1, PendingOp::SetQuantity(3));

        let server = cart(vec![item(1, 3), item(2, 1)]);
        assert_eq!(state.settle(&ticket, server.clone()), Settlement::Applied);
        assert_eq!(state.view(), server);
        assert_eq!(state.phase(P1), ItemPhase::Settled);
    }

    #[test]
    fn test_optimistic_remove_hides_item() {
        let mut state = CartState::new(cart(vec![item(1, 2), item(2, 1)]));
        let ticket = state.begin(P2, PendingOp::Remove);
        assert!(state.view().item(P2).is_none());

        state.rollback(&ticket);
        assert_eq!(state.view().item(P2).unwrap().quantity, 1);
    }

    #[test]
    fn test_superseded_response_does_not_clear_newer_overlay() {
        let mut state = CartState::new(cart(vec![item(1, 2)]));
        let first = state.begin(P1, PendingOp::SetQuantity(3));
        let second = state.begin(P1, PendingOp::SetQuantity(4));
        assert!(!state.is_current(&first));

        // First response lands: its cart is newer than settled, but the
        // item keeps showing the second mutation's quantity
        state.settle(&first, cart(vec![item(1, 3)]));
        assert_eq!(state.view().item(P1).unwrap().quantity, 4);
        assert_eq!(state.phase(P1), ItemPhase::Pending);

        state.settle(&second, cart(vec![item(1, 4)]));
        assert_eq!(state.view(), cart(vec![item(1, 4)]));
    }

    #[test]
    fn test_late_response_never_regresses() {
        let mut state = CartState::new(cart(vec![item(1, 2)]));
        let first = state.begin(P1, PendingOp::SetQuantity(3));
        let second = state.begin(P1, PendingOp::SetQuantity(4));

        state.settle(&second, cart(vec![item(1, 4)]));
        assert!(!state.settle(&first, cart(vec![item(1, 3)])).changed());
        assert_eq!(state.view(), cart(vec![item(1, 4)]));
    }

    #[test]
    fn test_failed_superseded_mutation_does_not_roll_back() {
        let mut state = CartState::new(cart(vec![item(1, 2)]));
        let first = state.begin(P1, PendingOp::SetQuantity(3));
        let _second = state.begin(P1, PendingOp::SetQuantity(4));

        assert!(!state.rollback(&first));
        assert_eq!(state.view().item(P1).unwrap().quantity, 4);
    }

    #[test]
    fn test_items_reconcile_independently() {
        let mut state = CartState::new(cart(vec![item(1, 2), item(2, 1)]));
        let t1 = state.begin(P1, PendingOp::SetQuantity(5));
        let t2 = state.begin(P2, PendingOp::SetQuantity(2));

        state.rollback(&t2);
        let view = state.view();
        assert_eq!(view.item(P1).unwrap().quantity, 5);
        assert!(view.item(P1).unwrap().pending);
        assert_eq!(view.item(P2).unwrap().quantity, 1);
        assert!(!view.item(P2).unwrap().pending);

        state.settle(&t1, cart(vec![item(1, 5), item(2, 1)]));
        assert_eq!(state.view(), cart(vec![item(1, 5), item(2, 1)]));
    }

    #[test]
    fn test_fetch_ticket_ordering() {
        let mut state = CartState::new(cart(vec![item(1, 2)]));
        let fetch = state.begin_fetch();
        let update = state.begin(P1, PendingOp::SetQuantity(3));

        state.settle(&update, cart(vec![item(1, 3)]));
        // The fetch was issued before the update, so its cart is older
        assert!(!state.settle(&fetch, cart(vec![item(1, 2)])).changed());
        assert_eq!(state.view().item(P1).unwrap().quantity, 3);
    }

    #[test]
    fn test_out_of_order_item_success_waits_for_reconcile() {
        let mut state = CartState::new(cart(vec![item(1, 2), item(2, 1)]));
        let t1 = state.begin(P1, PendingOp::SetQuantity(3));
        let t2 = state.begin(P2, PendingOp::SetQuantity(5));

        // The server applied P2 first
        assert_eq!(
            state.settle(&t2, cart(vec![item(1, 2), item(2, 5)])),
            Settlement::Applied
        );
        assert_eq!(state.view().item(P1).unwrap().quantity, 3);

        let outcome = state.settle(&t1, cart(vec![item(1, 3), item(2, 5)]));
        assert_eq!(outcome, Settlement::Unconfirmed);
        assert_eq!(state.phase(P1), ItemPhase::Pending);
        assert_eq!(state.view().item(P1).unwrap().quantity, 3);

        let fetch = state.begin_reconcile(&t1).unwrap();
        let server = cart(vec![item(1, 3), item(2, 5)]);
        assert_eq!(state.settle(&fetch, server.clone()), Settlement::Applied);
        assert_eq!(state.view(), server);
        assert_eq!(state.phase(P1), ItemPhase::Settled);
    }

    #[test]
    fn test_reconcile_yields_to_newer_mutation() {
        let mut state = CartState::new(cart(vec![item(1, 2), item(2, 1)]));
        let t1 = state.begin(P1, PendingOp::SetQuantity(3));
        let t2 = state.begin(P2, PendingOp::SetQuantity(5));
        state.settle(&t2, cart(vec![item(1, 2), item(2, 5)]));
        assert_eq!(
            state.settle(&t1, cart(vec![item(1, 3), item(2, 5)])),
            Settlement::Unconfirmed
        );

        let _t3 = state.begin(P1, PendingOp::SetQuantity(4));
        assert!(state.begin_reconcile(&t1).is_none());
        assert_eq!(state.view().item(P1).unwrap().quantity, 4);
    }

    #[test]
    fn test_reconcile_overtaken_by_later_cart_still_settles() {
        let mut state = CartState::new(cart(vec![item(1, 2), item(2, 1)]));
        let t1 = state.begin(P1, PendingOp::SetQuantity(3));
        let t2 = state.begin(P2, PendingOp::SetQuantity(5));
        state.settle(&t2, cart(vec![item(1, 2), item(2, 5)]));
        state.settle(&t1, cart(vec![item(1, 3), item(2, 5)]));
        let fetch = state.begin_reconcile(&t1).unwrap();

        let refetch = state.begin_fetch();
        let newest = cart(vec![item(1, 3), item(2, 5)]);
        state.settle(&refetch, newest.clone());

        assert_eq!(
            state.settle(&fetch, cart(vec![item(1, 3), item(2, 5)])),
            Settlement::Discarded { changed: true }
        );
        assert_eq!(state.view(), newest);
        assert_eq!(state.phase(P1), ItemPhase::Settled);
    }
}
