//! Which orders need a machine.

use crate::model::Order;

/// Keeps the orders that are waiting for a wash, dry or full cycle.
///
/// Input order is preserved so the matcher sees orders in the sequence the
/// store returned them.
pub fn filter_eligible(orders: Vec<Order>) -> Vec<Order> {
    orders.into_iter().filter(Order::is_eligible).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceKind;
    use chrono::Utc;
    use lavanderia_id::{ClientId, MachineId, OrderId};
    use rstest::rstest;

    fn order(services: &[ServiceKind]) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new(),
            client_id: ClientId::new(),
            services: services.to_vec(),
            fulfilled: false,
            ongoing: false,
            machine_id: None,
            cycle_completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[rstest]
    #[case::wash(&[ServiceKind::Wash], true)]
    #[case::dry(&[ServiceKind::Dry], true)]
    #[case::full_cycle(&[ServiceKind::FullCycle], true)]
    #[case::mixed(&[ServiceKind::Ironing, ServiceKind::Wash], true)]
    #[case::ironing_only(&[ServiceKind::Ironing], false)]
    #[case::dry_cleaning_and_folding(&[ServiceKind::DryCleaning, ServiceKind::Folding], false)]
    #[case::no_services(&[], false)]
    fn test_service_kinds(#[case] services: &[ServiceKind], #[case] eligible: bool) {
        let kept = filter_eligible(vec![order(services)]);
        assert_eq!(kept.len(), usize::from(eligible));
    }

    #[test]
    fn test_excludes_fulfilled_and_assigned() {
        let mut fulfilled = order(&[ServiceKind::Wash]);
        fulfilled.fulfilled = true;
        let mut assigned = order(&[ServiceKind::Wash]);
        assigned.machine_id = Some(MachineId::new());
        let pending = order(&[ServiceKind::Wash]);
        let pending_id = pending.id;

        let kept = filter_eligible(vec![fulfilled, assigned, pending]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, pending_id);
    }

    #[test]
    fn test_preserves_input_order() {
        let orders: Vec<Order> = (0..4).map(|_| order(&[ServiceKind::Dry])).collect();
        let ids: Vec<OrderId> = orders.iter().map(|o| o.id).collect();

        let kept: Vec<OrderId> = filter_eligible(orders).iter().map(|o| o.id).collect();
        assert_eq!(kept, ids);
    }
}
