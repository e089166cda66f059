//! Order and machine records as the scheduler sees them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lavanderia_id::{ClientId, MachineId, OrderId};
use serde::{Deserialize, Serialize};

/// A service an order can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Wash,
    Dry,
    FullCycle,
    Ironing,
    DryCleaning,
    Folding,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wash => "wash",
            Self::Dry => "dry",
            Self::FullCycle => "full_cycle",
            Self::Ironing => "ironing",
            Self::DryCleaning => "dry_cleaning",
            Self::Folding => "folding",
        }
    }

    /// Whether this service occupies a washing machine.
    pub fn requires_machine(&self) -> bool {
        matches!(self, Self::Wash | Self::Dry | Self::FullCycle)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service kind: {0}")]
pub struct UnknownServiceKind(pub String);

impl FromStr for ServiceKind {
    type Err = UnknownServiceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wash" => Ok(Self::Wash),
            "dry" => Ok(Self::Dry),
            "full_cycle" => Ok(Self::FullCycle),
            "ironing" => Ok(Self::Ironing),
            "dry_cleaning" => Ok(Self::DryCleaning),
            "folding" => Ok(Self::Folding),
            other => Err(UnknownServiceKind(other.to_string())),
        }
    }
}

/// A laundry customer.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub email: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A customer service order.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub client_id: ClientId,
    pub services: Vec<ServiceKind>,
    pub fulfilled: bool,
    /// True while a machine cycle is running for this order.
    pub ongoing: bool,
    pub machine_id: Option<MachineId>,
    pub cycle_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether any requested service needs a washing machine.
    pub fn requires_machine(&self) -> bool {
        self.services.iter().any(ServiceKind::requires_machine)
    }

    /// Eligible for machine assignment: needs a machine, is not fulfilled,
    /// has no machine and has not already been through its cycle.
    pub fn is_eligible(&self) -> bool {
        self.requires_machine()
            && !self.fulfilled
            && self.machine_id.is_none()
            && self.cycle_completed_at.is_none()
    }

    /// Whether a machine cycle holds the order. Edits and deletes are
    /// refused while this is true.
    pub fn in_cycle(&self) -> bool {
        self.ongoing || self.machine_id.is_some()
    }
}

/// A physical washing machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    pub id: MachineId,
    pub name: String,
    pub capacity_kg: i32,
    pub occupied: bool,
    pub current_order_id: Option<OrderId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub release_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Machine {
    pub fn is_idle(&self) -> bool {
        !self.occupied && self.current_order_id.is_none()
    }

    /// `occupied` must agree with the presence of an order reference.
    pub fn occupancy_consistent(&self) -> bool {
        self.occupied == self.current_order_id.is_some()
    }
}

/// A committed pairing of one order to one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub order_id: OrderId,
    pub machine_id: MachineId,
    pub started_at: DateTime<Utc>,
    pub completes_at: DateTime<Utc>,
}

impl Assignment {
    /// Time left in the cycle as seen from `now`, zero once it is due.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.completes_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Fields accepted when registering a machine.
#[derive(Debug, Clone)]
pub struct NewMachine {
    pub name: String,
    pub capacity_kg: i32,
}

/// Partial update of a machine. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct MachineUpdate {
    pub name: Option<String>,
    pub capacity_kg: Option<i32>,
}

/// Fields accepted when registering a client.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub name: String,
    pub email: String,
    pub address: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// Fields accepted when placing an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub client_id: ClientId,
    pub services: Vec<ServiceKind>,
}

/// Partial update of an order that is not in a machine cycle.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub client_id: Option<ClientId>,
    pub services: Option<Vec<ServiceKind>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(services: Vec<ServiceKind>) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new(),
            client_id: ClientId::new(),
            services,
            fulfilled: false,
            ongoing: false,
            machine_id: None,
            cycle_completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_service_kind_parse_roundtrip() {
        for kind in [
            ServiceKind::Wash,
            ServiceKind::Dry,
            ServiceKind::FullCycle,
            ServiceKind::Ironing,
            ServiceKind::DryCleaning,
            ServiceKind::Folding,
        ] {
            assert_eq!(kind.as_str().parse::<ServiceKind>().unwrap(), kind);
        }
        assert!("washing".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn test_service_kind_serde_matches_as_str() {
        let json = serde_json::to_string(&ServiceKind::FullCycle).unwrap();
        assert_eq!(json, "\"full_cycle\"");
    }

    #[test]
    fn test_order_eligibility() {
        let mut o = order(vec![ServiceKind::Ironing, ServiceKind::Dry]);
        assert!(o.is_eligible());

        o.machine_id = Some(MachineId::new());
        assert!(!o.is_eligible());

        let mut done = order(vec![ServiceKind::Wash]);
        done.cycle_completed_at = Some(Utc::now());
        assert!(!done.is_eligible());

        assert!(!order(vec![ServiceKind::Folding]).is_eligible());
    }

    #[test]
    fn test_in_cycle() {
        let mut o = order(vec![ServiceKind::Wash]);
        assert!(!o.in_cycle());
        o.machine_id = Some(MachineId::new());
        assert!(o.in_cycle());
        o.machine_id = None;
        o.ongoing = true;
        assert!(o.in_cycle());
    }

    #[test]
    fn test_assignment_remaining_clamps_at_zero() {
        let start = Utc::now();
        let a = Assignment {
            order_id: OrderId::new(),
            machine_id: MachineId::new(),
            started_at: start,
            completes_at: start + chrono::Duration::minutes(5),
        };
        assert_eq!(a.remaining(start), Duration::from_secs(300));
        assert_eq!(
            a.remaining(start + chrono::Duration::minutes(2)),
            Duration::from_secs(180)
        );
        assert_eq!(
            a.remaining(start + chrono::Duration::minutes(9)),
            Duration::ZERO
        );
    }
}
