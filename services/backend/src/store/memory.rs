//! In-process store.
//!
//! Every operation runs under one lock, which gives the same atomicity the
//! conditional updates in [`super::PgStore`] give.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lavanderia_id::{ClientId, MachineId, OrderId};
use tokio::sync::Mutex;
use tracing::debug;

use super::{RecordStore, ResourceStore, StoreError, StoreResult};
use crate::model::{
    Assignment, Client, ClientUpdate, Machine, MachineUpdate, NewClient, NewMachine, NewOrder,
    Order, OrderUpdate,
};

#[derive(Default)]
struct Inner {
    clients: BTreeMap<ClientId, Client>,
    orders: BTreeMap<OrderId, Order>,
    machines: BTreeMap<MachineId, Machine>,
}

impl Inner {
    fn email_taken(&self, email: &str, except: Option<ClientId>) -> bool {
        self.clients
            .values()
            .any(|c| c.email == email && Some(c.id) != except)
    }

    fn require_client(&self, id: ClientId) -> StoreResult<()> {
        if self.clients.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::not_found("client", id))
        }
    }

    fn clear_machine(&mut self, machine_id: MachineId, now: DateTime<Utc>) {
        if let Some(machine) = self.machines.get_mut(&machine_id) {
            machine.occupied = false;
            machine.current_order_id = None;
            machine.assigned_at = None;
            machine.release_at = None;
            machine.updated_at = now;
        }
    }
}

/// Store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    injected_failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` scheduler-facing calls fail as unavailable.
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> StoreResult<()> {
        let taken = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    /// Checks the occupancy invariants across all records.
    ///
    /// Every machine is occupied iff it references an order, no order is
    /// referenced by two machines, and every order that points at a machine
    /// is pointed back at.
    pub async fn check_invariants(&self) -> Result<(), String> {
        let inner = self.inner.lock().await;
        let mut holders: BTreeMap<OrderId, MachineId> = BTreeMap::new();

        for machine in inner.machines.values() {
            if !machine.occupancy_consistent() {
                return Err(format!(
                    "machine {} occupied={} order={:?}",
                    machine.id, machine.occupied, machine.current_order_id
                ));
            }
            if let Some(order_id) = machine.current_order_id {
                if let Some(other) = holders.insert(order_id, machine.id) {
                    return Err(format!(
                        "order {order_id} held by both {other} and {}",
                        machine.id
                    ));
                }
            }
        }

        for order in inner.orders.values() {
            if let Some(machine_id) = order.machine_id {
                if holders.get(&order.id) != Some(&machine_id) {
                    return Err(format!(
                        "order {} points at {machine_id} which does not hold it",
                        order.id
                    ));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list_unfulfilled_orders(&self) -> StoreResult<Vec<Order>> {
        self.take_injected_failure()?;
        let inner = self.inner.lock().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| !o.fulfilled)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    async fn claim_idle_machine(&self, order_id: OrderId) -> StoreResult<Option<Machine>> {
        self.take_injected_failure()?;
        let mut inner = self.inner.lock().await;

        if inner
            .machines
            .values()
            .any(|m| m.current_order_id == Some(order_id))
        {
            return Err(StoreError::Conflict(format!(
                "order {order_id} already holds a machine"
            )));
        }

        let Some(machine) = inner.machines.values_mut().find(|m| m.is_idle()) else {
            return Ok(None);
        };

        machine.occupied = true;
        machine.current_order_id = Some(order_id);
        machine.assigned_at = None;
        machine.release_at = None;
        machine.updated_at = Utc::now();
        debug!(machine_id = %machine.id, order_id = %order_id, "Claimed idle machine");
        Ok(Some(machine.clone()))
    }

    async fn commit_assignment(
        &self,
        order_id: OrderId,
        machine_id: MachineId,
        started_at: DateTime<Utc>,
        completes_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.take_injected_failure()?;
        let mut inner = self.inner.lock().await;

        let order_open = inner.orders.get(&order_id).is_some_and(|o| {
            !o.fulfilled && o.machine_id.is_none() && o.cycle_completed_at.is_none()
        });
        let claim_held = inner
            .machines
            .get(&machine_id)
            .is_some_and(|m| m.current_order_id == Some(order_id));
        if !order_open || !claim_held {
            return Ok(false);
        }

        let now = Utc::now();
        if let Some(order) = inner.orders.get_mut(&order_id) {
            order.machine_id = Some(machine_id);
            order.ongoing = true;
            order.updated_at = now;
        }
        if let Some(machine) = inner.machines.get_mut(&machine_id) {
            machine.assigned_at = Some(started_at);
            machine.release_at = Some(completes_at);
            machine.updated_at = now;
        }
        Ok(true)
    }

    async fn release_machine(
        &self,
        machine_id: MachineId,
        order_id: OrderId,
    ) -> StoreResult<bool> {
        self.take_injected_failure()?;
        let mut inner = self.inner.lock().await;

        let holds = inner
            .machines
            .get(&machine_id)
            .is_some_and(|m| m.current_order_id == Some(order_id));
        if !holds {
            return Ok(false);
        }

        let now = Utc::now();
        inner.clear_machine(machine_id, now);
        if let Some(order) = inner.orders.get_mut(&order_id) {
            if order.machine_id == Some(machine_id) {
                order.machine_id = None;
                order.ongoing = false;
                order.cycle_completed_at = Some(now);
                order.updated_at = now;
            }
        }
        Ok(true)
    }

    async fn list_active_assignments(&self) -> StoreResult<Vec<Assignment>> {
        self.take_injected_failure()?;
        let inner = self.inner.lock().await;
        let mut assignments: Vec<Assignment> = inner
            .machines
            .values()
            .filter_map(|m| {
                let order_id = m.current_order_id?;
                let order = inner.orders.get(&order_id)?;
                if order.machine_id != Some(m.id) {
                    return None;
                }
                Some(Assignment {
                    order_id,
                    machine_id: m.id,
                    started_at: m.assigned_at?,
                    completes_at: m.release_at?,
                })
            })
            .collect();
        assignments.sort_by_key(|a| a.completes_at);
        Ok(assignments)
    }

    async fn release_uncommitted_claims(&self) -> StoreResult<u64> {
        self.take_injected_failure()?;
        let mut inner = self.inner.lock().await;

        let dangling: Vec<MachineId> = inner
            .machines
            .values()
            .filter(|m| match m.current_order_id {
                Some(order_id) => inner
                    .orders
                    .get(&order_id)
                    .is_none_or(|o| o.machine_id != Some(m.id)),
                None => m.occupied,
            })
            .map(|m| m.id)
            .collect();

        let now = Utc::now();
        for machine_id in &dangling {
            inner.clear_machine(*machine_id, now);
        }
        Ok(dangling.len() as u64)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create_machine(&self, new: NewMachine) -> StoreResult<Machine> {
        let now = Utc::now();
        let machine = Machine {
            id: MachineId::new(),
            name: new.name,
            capacity_kg: new.capacity_kg,
            occupied: false,
            current_order_id: None,
            assigned_at: None,
            release_at: None,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .lock()
            .await
            .machines
            .insert(machine.id, machine.clone());
        Ok(machine)
    }

    async fn list_machines(&self) -> StoreResult<Vec<Machine>> {
        Ok(self.inner.lock().await.machines.values().cloned().collect())
    }

    async fn get_machine(&self, id: MachineId) -> StoreResult<Machine> {
        self.inner
            .lock()
            .await
            .machines
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("machine", id))
    }

    async fn update_machine(&self, id: MachineId, update: MachineUpdate) -> StoreResult<Machine> {
        let mut inner = self.inner.lock().await;
        let Some(machine) = inner.machines.get_mut(&id) else {
            return Err(StoreError::not_found("machine", id));
        };
        if let Some(name) = update.name {
            machine.name = name;
        }
        if let Some(capacity_kg) = update.capacity_kg {
            machine.capacity_kg = capacity_kg;
        }
        machine.updated_at = Utc::now();
        Ok(machine.clone())
    }

    async fn delete_machine(&self, id: MachineId) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.machines.get(&id).map(|m| m.occupied) {
            None => Err(StoreError::not_found("machine", id)),
            Some(true) => Err(StoreError::Conflict(format!("machine {id} is occupied"))),
            Some(false) => {
                inner.machines.remove(&id);
                Ok(())
            }
        }
    }

    async fn admin_release_machine(&self, id: MachineId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(machine) = inner.machines.get(&id) else {
            return Err(StoreError::not_found("machine", id));
        };
        let Some(order_id) = machine.current_order_id else {
            return Ok(false);
        };

        let now = Utc::now();
        inner.clear_machine(id, now);
        if let Some(order) = inner.orders.get_mut(&order_id) {
            if order.machine_id == Some(id) {
                order.machine_id = None;
                order.ongoing = false;
                order.updated_at = now;
            }
        }
        Ok(true)
    }

    async fn create_client(&self, new: NewClient) -> StoreResult<Client> {
        let mut inner = self.inner.lock().await;
        if inner.email_taken(&new.email, None) {
            return Err(StoreError::Conflict(format!(
                "client email {} already registered",
                new.email
            )));
        }

        let now = Utc::now();
        let client = Client {
            id: ClientId::new(),
            name: new.name,
            email: new.email,
            address: new.address,
            created_at: now,
            updated_at: now,
        };
        inner.clients.insert(client.id, client.clone());
        Ok(client)
    }

    async fn list_clients(&self) -> StoreResult<Vec<Client>> {
        Ok(self.inner.lock().await.clients.values().cloned().collect())
    }

    async fn get_client(&self, id: ClientId) -> StoreResult<Client> {
        self.inner
            .lock()
            .await
            .clients
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("client", id))
    }

    async fn update_client(&self, id: ClientId, update: ClientUpdate) -> StoreResult<Client> {
        let mut inner = self.inner.lock().await;
        inner.require_client(id)?;
        if let Some(email) = &update.email {
            if inner.email_taken(email, Some(id)) {
                return Err(StoreError::Conflict(format!(
                    "client email {email} already registered"
                )));
            }
        }

        let Some(client) = inner.clients.get_mut(&id) else {
            return Err(StoreError::not_found("client", id));
        };
        if let Some(name) = update.name {
            client.name = name;
        }
        if let Some(email) = update.email {
            client.email = email;
        }
        if let Some(address) = update.address {
            client.address = address;
        }
        client.updated_at = Utc::now();
        Ok(client.clone())
    }

    async fn delete_client(&self, id: ClientId) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.require_client(id)?;
        if inner.orders.values().any(|o| o.client_id == id) {
            return Err(StoreError::Conflict(format!("client {id} has orders")));
        }
        inner.clients.remove(&id);
        Ok(())
    }

    async fn create_order(&self, new: NewOrder) -> StoreResult<Order> {
        let mut inner = self.inner.lock().await;
        inner.require_client(new.client_id)?;

        let now = Utc::now();
        let order = Order {
            id: OrderId::new(),
            client_id: new.client_id,
            services: new.services,
            fulfilled: false,
            ongoing: false,
            machine_id: None,
            cycle_completed_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn list_orders(&self) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.inner.lock().await.orders.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    async fn get_order(&self, id: OrderId) -> StoreResult<Order> {
        self.inner
            .lock()
            .await
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", id))
    }

    async fn update_order(&self, id: OrderId, update: OrderUpdate) -> StoreResult<Order> {
        let mut inner = self.inner.lock().await;
        if let Some(client_id) = update.client_id {
            inner.require_client(client_id)?;
        }
        let Some(order) = inner.orders.get_mut(&id) else {
            return Err(StoreError::not_found("order", id));
        };
        if order.in_cycle() {
            return Err(StoreError::Conflict(format!(
                "order {id} is in a machine cycle"
            )));
        }

        if let Some(client_id) = update.client_id {
            order.client_id = client_id;
        }
        if let Some(services) = update.services {
            order.services = services;
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn delete_order(&self, id: OrderId) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.orders.get(&id).map(Order::in_cycle) {
            None => Err(StoreError::not_found("order", id)),
            Some(true) => Err(StoreError::Conflict(format!(
                "order {id} is in a machine cycle"
            ))),
            Some(false) => {
                inner.orders.remove(&id);
                Ok(())
            }
        }
    }

    async fn mark_order_fulfilled(&self, id: OrderId) -> StoreResult<Order> {
        let mut inner = self.inner.lock().await;
        let Some(order) = inner.orders.get_mut(&id) else {
            return Err(StoreError::not_found("order", id));
        };
        if order.in_cycle() {
            return Err(StoreError::Conflict(format!(
                "order {id} is in a machine cycle"
            )));
        }
        order.fulfilled = true;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}
