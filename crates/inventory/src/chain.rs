//! Successor planning for move chains.
//!
//! After a move reaches a terminal state the governing route decides whether
//! another hop follows. `done` continues from the waypoint the quantity just
//! arrived at; `cancel` continues from the waypoint it never left. Both walk
//! the route backward once the procurement is cancelled. Cancelling a return
//! move ends the chain where the quantity sits.

use chrono::{DateTime, Utc};

use stockflow_core::{DomainError, DomainResult};

use crate::location::{LocationId, LocationTree, Placement};
use crate::movement::{Direction, Move, MoveId, NewMove};
use crate::procurement::{ProcurementDetail, ProcurementStatus};
use crate::route::{Route, RouteSetting, RouteSettingId};
use crate::zone::ZoneKind;

/// Where the quantity sits when the successor is planned.
struct Anchor<'a> {
    setting: &'a RouteSetting,
    location: LocationId,
    zone: ZoneKind,
}

/// Plan the hop following a completed move, if the route has one.
#[allow(clippy::too_many_arguments)]
pub fn plan_after_done(
    mv: &Move,
    destination: &Placement,
    route: &Route,
    tree: &LocationTree,
    detail: &ProcurementDetail,
    procurement_status: ProcurementStatus,
    successor_id: MoveId,
    at: DateTime<Utc>,
) -> DomainResult<Option<NewMove>> {
    ensure_chain_member(mv, route, detail)?;
    let anchor = Anchor {
        setting: route.setting(mv.to_setting())?,
        location: destination.location,
        zone: destination.zone,
    };
    let reverse = procurement_status == ProcurementStatus::Cancel;
    plan_hop(mv, anchor, reverse, route, tree, detail, successor_id, at)
}

/// Plan the return hop following a cancelled move.
///
/// The quantity is still at the move's source, so the chain resumes from the
/// source waypoint towards the start of the route. A cancelled return move has
/// no successor: re-planning from its source would repeat the same hop.
pub fn plan_after_cancel(
    mv: &Move,
    route: &Route,
    tree: &LocationTree,
    detail: &ProcurementDetail,
    successor_id: MoveId,
    at: DateTime<Utc>,
) -> DomainResult<Option<NewMove>> {
    ensure_chain_member(mv, route, detail)?;
    if mv.direction() == Direction::Reverse {
        return Ok(None);
    }
    let anchor = Anchor {
        setting: route.setting(mv.from_setting())?,
        location: mv.from_location(),
        zone: mv.from_zone(),
    };
    plan_hop(mv, anchor, true, route, tree, detail, successor_id, at)
}

fn ensure_chain_member(mv: &Move, route: &Route, detail: &ProcurementDetail) -> DomainResult<()> {
    if mv.route_id() != route.id_typed() || detail.route_id() != route.id_typed() {
        return Err(DomainError::invariant("move, detail and route disagree"));
    }
    if mv.detail_id() != detail.id_typed() {
        return Err(DomainError::invariant("move belongs to another detail"));
    }
    Ok(())
}

/// Next waypoint from `anchor`. A direct-return line jumps straight back to
/// the first waypoint when reversing.
pub fn next_waypoint<'r>(
    route: &'r Route,
    anchor: RouteSettingId,
    reverse: bool,
    direct_return: bool,
) -> DomainResult<Option<&'r RouteSetting>> {
    if reverse && direct_return {
        route.setting(anchor)?;
        return Ok(route.first().filter(|s| s.id != anchor));
    }
    route.next(Some(anchor), reverse)
}

#[allow(clippy::too_many_arguments)]
fn plan_hop(
    mv: &Move,
    anchor: Anchor<'_>,
    reverse: bool,
    route: &Route,
    tree: &LocationTree,
    detail: &ProcurementDetail,
    successor_id: MoveId,
    at: DateTime<Utc>,
) -> DomainResult<Option<NewMove>> {
    let Some(target) = next_waypoint(route, anchor.setting.id, reverse, detail.direct_return())?
    else {
        return Ok(None);
    };

    let lands_on_first = route.first().is_some_and(|s| s.id == target.id);
    let lands_on_last = route.last().is_some_and(|s| s.id == target.id);
    let to_location = match (reverse, detail.initial_location(), detail.end_location()) {
        (true, Some(initial), _) if lands_on_first => initial,
        (false, _, Some(end)) if lands_on_last => end,
        _ => target.location,
    };

    Ok(Some(NewMove {
        id: successor_id,
        warehouse_id: mv.warehouse_id(),
        procurement_id: mv.procurement_id(),
        detail_id: mv.detail_id(),
        item: mv.item(),
        route_id: mv.route_id(),
        from_location: anchor.location,
        from_zone: anchor.zone,
        to_location,
        to_zone: tree.require(to_location)?.zone(),
        from_setting: anchor.setting.clone(),
        to_setting: target.clone(),
        quantity: mv.quantity(),
        direction: if reverse {
            Direction::Reverse
        } else {
            Direction::Forward
        },
        previous: Some(mv.id_typed()),
        occurred_at: at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemRef;
    use crate::location::{Coordinate, NewLocation};
    use crate::movement::{CompleteMove, ConfirmMove, MoveCommand};
    use crate::procurement::{NewProcurementDetail, ProcurementDetailId, ProcurementId};
    use crate::route::RouteId;
    use proptest::prelude::*;
    use stockflow_core::{Aggregate, WarehouseId};
    use uuid::Uuid;

    const PRODUCE_TO_STOCK: [ZoneKind; 4] =
        [ZoneKind::Produce, ZoneKind::Pack, ZoneKind::Check, ZoneKind::Stock];

    struct Fixture {
        tree: LocationTree,
        route: Route,
        wh: WarehouseId,
        /// One concrete bin per waypoint, in route order.
        bins: Vec<LocationId>,
    }

    fn fixture(zones: &[ZoneKind]) -> Fixture {
        let now = Utc::now();
        let wh = WarehouseId::new();
        let mut tree = LocationTree::new();
        let root = tree
            .insert(
                NewLocation {
                    id: LocationId::generate(),
                    warehouse_id: wh,
                    name: "root".into(),
                    zone: ZoneKind::Root,
                    is_virtual: true,
                    parent: None,
                    coordinate: Coordinate::default(),
                },
                now,
            )
            .unwrap();
        let mut route = Route::new(RouteId::generate(), wh, "chain", 0, now).unwrap();
        let mut bins = Vec::new();
        for (seq, zone) in zones.iter().enumerate() {
            let node = tree
                .insert(NewLocation::group(wh, root, *zone, zone.as_str()), now)
                .unwrap();
            route
                .add_setting(tree.require(node).unwrap(), seq as u32, now)
                .unwrap();
            let bin = tree
                .insert(
                    NewLocation::bin(wh, node, *zone, format!("{zone}-1"), Coordinate::default()),
                    now,
                )
                .unwrap();
            bins.push(bin);
        }
        Fixture {
            tree,
            route,
            wh,
            bins,
        }
    }

    fn detail(f: &Fixture, quantity: i64, direct_return: bool) -> ProcurementDetail {
        detail_between(f, quantity, direct_return, None, None)
    }

    fn detail_between(
        f: &Fixture,
        quantity: i64,
        direct_return: bool,
        initial_location: Option<LocationId>,
        end_location: Option<LocationId>,
    ) -> ProcurementDetail {
        ProcurementDetail::new(
            NewProcurementDetail {
                id: ProcurementDetailId::generate(),
                procurement_id: ProcurementId::generate(),
                warehouse_id: f.wh,
                item: ItemRef::Product(Uuid::now_v7()),
                quantity,
                route_id: f.route.id_typed(),
                initial_location,
                end_location,
                direct_return,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn confirmed(f: &Fixture, new: NewMove) -> Move {
        let (mut mv, _) = Move::create(new).unwrap();
        let cmd = MoveCommand::Confirm(ConfirmMove {
            move_id: mv.id_typed(),
            source: f.tree.placement(mv.from_location()).unwrap(),
            occurred_at: Utc::now(),
        });
        for e in mv.handle(&cmd).unwrap() {
            mv.apply(&e);
        }
        mv
    }

    fn complete(f: &Fixture, mv: &mut Move, at: LocationId) -> Placement {
        let destination = f.tree.placement(at).unwrap();
        let cmd = MoveCommand::Complete(CompleteMove {
            move_id: mv.id_typed(),
            destination: destination.clone(),
            successor: None,
            occurred_at: Utc::now(),
        });
        for e in mv.handle(&cmd).unwrap() {
            mv.apply(&e);
        }
        destination
    }

    /// Walk the whole route forward, completing each hop at the waypoint's bin.
    fn run_forward(f: &Fixture, d: &ProcurementDetail) -> Vec<Move> {
        let first = d
            .plan_first_move(ProcurementStatus::Confirmed, &f.route, &f.tree, MoveId::generate(), Utc::now())
            .unwrap();
        let mut current = confirmed(f, first);
        let mut done = Vec::new();
        for hop in 1.. {
            let destination = complete(f, &mut current, f.bins[hop]);
            let next = plan_after_done(
                &current,
                &destination,
                &f.route,
                &f.tree,
                d,
                ProcurementStatus::Confirmed,
                MoveId::generate(),
                Utc::now(),
            )
            .unwrap();
            done.push(current.clone());
            match next {
                Some(new) => current = confirmed(f, new),
                None => break,
            }
        }
        done
    }

    #[test]
    fn forward_chain_visits_every_waypoint_once() {
        let f = fixture(&PRODUCE_TO_STOCK);
        let d = detail(&f, 5, false);
        let moves = run_forward(&f, &d);
        assert_eq!(moves.len(), 3);
        let zones: Vec<_> = moves.iter().map(|m| (m.from_zone(), m.to_zone())).collect();
        assert_eq!(
            zones,
            vec![
                (ZoneKind::Produce, ZoneKind::Pack),
                (ZoneKind::Pack, ZoneKind::Check),
                (ZoneKind::Check, ZoneKind::Stock),
            ]
        );
        for pair in moves.windows(2) {
            assert_eq!(pair[1].previous(), Some(pair[0].id_typed()));
            assert_eq!(pair[1].from_location(), pair[0].to_location());
        }
    }

    #[test]
    fn done_under_cancelled_procurement_walks_backward() {
        let f = fixture(&PRODUCE_TO_STOCK);
        let d = detail(&f, 2, false);
        let first = d
            .plan_first_move(ProcurementStatus::Confirmed, &f.route, &f.tree, MoveId::generate(), Utc::now())
            .unwrap();
        let mut mv = confirmed(&f, first);
        let destination = complete(&f, &mut mv, f.bins[1]);
        let back = plan_after_done(
            &mv,
            &destination,
            &f.route,
            &f.tree,
            &d,
            ProcurementStatus::Cancel,
            MoveId::generate(),
            Utc::now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(back.direction, Direction::Reverse);
        assert_eq!(back.from_location, f.bins[1]);
        assert_eq!(back.to_zone, ZoneKind::Produce);
    }

    #[test]
    fn cancel_resumes_from_the_source_waypoint() {
        let f = fixture(&PRODUCE_TO_STOCK);
        let d = detail(&f, 2, false);
        let moves = run_forward(&f, &d);
        // Re-plan the third hop (check -> stock) as if it was cancelled in flight.
        let check_to_stock = &moves[2];
        let back = plan_after_cancel(check_to_stock, &f.route, &f.tree, &d, MoveId::generate(), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(back.from_location, check_to_stock.from_location());
        assert_eq!(back.from_zone, ZoneKind::Check);
        assert_eq!(back.to_zone, ZoneKind::Pack);
    }

    #[test]
    fn cancel_at_first_waypoint_has_no_successor() {
        let f = fixture(&PRODUCE_TO_STOCK);
        let d = detail(&f, 2, false);
        let first = d
            .plan_first_move(ProcurementStatus::Confirmed, &f.route, &f.tree, MoveId::generate(), Utc::now())
            .unwrap();
        let mv = confirmed(&f, first);
        let next = plan_after_cancel(&mv, &f.route, &f.tree, &d, MoveId::generate(), Utc::now()).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn direct_return_jumps_to_the_first_waypoint() {
        let f = fixture(&PRODUCE_TO_STOCK);
        let d = detail(&f, 2, true);
        let moves = run_forward(&f, &d);
        let back = plan_after_cancel(&moves[2], &f.route, &f.tree, &d, MoveId::generate(), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(back.to_zone, ZoneKind::Produce);
        assert_eq!(back.from_zone, ZoneKind::Check);
    }

    #[test]
    fn cancelling_a_return_move_ends_the_chain() {
        let f = fixture(&PRODUCE_TO_STOCK);
        let d = detail(&f, 2, false);
        let moves = run_forward(&f, &d);
        let destination = f.tree.placement(moves[1].to_location()).unwrap();
        assert_eq!(destination.zone, ZoneKind::Check);

        // Done at check under a cancelled procurement: the return hop goes to pack.
        let back = plan_after_done(
            &moves[1],
            &destination,
            &f.route,
            &f.tree,
            &d,
            ProcurementStatus::Cancel,
            MoveId::generate(),
            Utc::now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(back.from_zone, ZoneKind::Check);
        assert_eq!(back.to_zone, ZoneKind::Pack);

        let returning = confirmed(&f, back);
        assert_eq!(returning.direction(), Direction::Reverse);
        let next =
            plan_after_cancel(&returning, &f.route, &f.tree, &d, MoveId::generate(), Utc::now())
                .unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn last_forward_hop_targets_the_end_location() {
        let mut f = fixture(&PRODUCE_TO_STOCK);
        let stock_node = f.tree.require(f.bins[3]).unwrap().parent().unwrap();
        let dock = f
            .tree
            .insert(
                NewLocation::bin(f.wh, stock_node, ZoneKind::Stock, "dock", Coordinate::default()),
                Utc::now(),
            )
            .unwrap();
        let d = detail_between(&f, 3, false, None, Some(dock));

        let first = d
            .plan_first_move(ProcurementStatus::Confirmed, &f.route, &f.tree, MoveId::generate(), Utc::now())
            .unwrap();
        assert_ne!(first.to_location, dock);
        let mut mv = confirmed(&f, first);

        let mut planned = Vec::new();
        for hop in 1..3 {
            let destination = complete(&f, &mut mv, f.bins[hop]);
            let next = plan_after_done(
                &mv,
                &destination,
                &f.route,
                &f.tree,
                &d,
                ProcurementStatus::Confirmed,
                MoveId::generate(),
                Utc::now(),
            )
            .unwrap()
            .unwrap();
            planned.push((next.to_location, next.to_zone));
            mv = confirmed(&f, next);
        }
        assert_ne!(planned[0].0, dock);
        assert_eq!(planned[0].1, ZoneKind::Check);
        assert_eq!(planned[1], (dock, ZoneKind::Stock));
    }

    #[test]
    fn return_to_the_first_waypoint_targets_the_initial_location() {
        let f = fixture(&PRODUCE_TO_STOCK);
        let d = detail_between(&f, 4, false, Some(f.bins[0]), None);
        let moves = run_forward(&f, &d);
        assert_eq!(moves[0].from_location(), f.bins[0]);

        // Pack -> check cancelled in flight: the return lands on produce.
        let back = plan_after_cancel(&moves[1], &f.route, &f.tree, &d, MoveId::generate(), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(back.direction, Direction::Reverse);
        assert_eq!(back.from_zone, ZoneKind::Pack);
        assert_eq!(back.to_location, f.bins[0]);
        assert_eq!(back.to_zone, ZoneKind::Produce);

        // Without an initial location the return aims at the produce waypoint itself.
        let plain = detail(&f, 4, false);
        let plain_moves = run_forward(&f, &plain);
        let back = plan_after_cancel(&plain_moves[1], &f.route, &f.tree, &plain, MoveId::generate(), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(back.to_location, f.route.first().unwrap().location);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

        #[test]
        fn chaining_conserves_quantity(quantity in 1i64..10_000, extra in 0usize..4) {
            let mut zones = vec![ZoneKind::Produce];
            zones.extend([ZoneKind::Pack, ZoneKind::Check, ZoneKind::Wait].into_iter().take(extra));
            zones.push(ZoneKind::Stock);
            let f = fixture(&zones);
            let d = detail(&f, quantity, false);
            let moves = run_forward(&f, &d);
            prop_assert_eq!(moves.len(), zones.len() - 1);
            prop_assert!(moves.iter().all(|m| m.quantity() == quantity));
        }
    }
}
