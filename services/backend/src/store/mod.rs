//! Record store for orders and machines.
//!
//! Two seams are exposed:
//! - [`ResourceStore`]: the operations the assignment scheduler consumes.
//!   Claiming a machine is a single conditional update, so concurrent passes
//!   (or an admin release racing a pass) can never double-book a machine.
//! - [`RecordStore`]: plain CRUD used by the HTTP layer.
//!
//! [`PgStore`] backs both with Postgres; [`MemoryStore`] is an in-process
//! implementation for tests and `LAUNDRY_STORE=memory` dev runs.

mod error;
mod memory;
mod postgres;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lavanderia_id::{ClientId, MachineId, OrderId};

use crate::model::{
    Assignment, Client, ClientUpdate, Machine, MachineUpdate, NewClient, NewMachine, NewOrder,
    Order, OrderUpdate,
};

/// Store operations used by the scheduler.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Orders that are not fulfilled, oldest first (ties broken by id).
    async fn list_unfulfilled_orders(&self) -> StoreResult<Vec<Order>>;

    /// Atomically marks one idle machine as occupied by `order_id`.
    ///
    /// Returns `None` when no machine is idle. Returns
    /// [`StoreError::Conflict`] when another claim for the same order won.
    async fn claim_idle_machine(&self, order_id: OrderId) -> StoreResult<Option<Machine>>;

    /// Points the order at its claimed machine and stamps the cycle window.
    ///
    /// Returns `false` without changing anything if the order is no longer
    /// eligible or the machine no longer holds the claim.
    async fn commit_assignment(
        &self,
        order_id: OrderId,
        machine_id: MachineId,
        started_at: DateTime<Utc>,
        completes_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Frees `machine_id` if it still belongs to `order_id` and closes the
    /// order's cycle. Returns `false` (a no-op) if the machine is already
    /// idle or was handed to someone else.
    async fn release_machine(&self, machine_id: MachineId, order_id: OrderId)
        -> StoreResult<bool>;

    /// Committed assignments currently persisted, earliest release first.
    async fn list_active_assignments(&self) -> StoreResult<Vec<Assignment>>;

    /// Frees machines whose claim was never committed to an order.
    async fn release_uncommitted_claims(&self) -> StoreResult<u64>;
}

/// Record CRUD used by the HTTP layer.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    async fn create_machine(&self, new: NewMachine) -> StoreResult<Machine>;
    async fn list_machines(&self) -> StoreResult<Vec<Machine>>;
    async fn get_machine(&self, id: MachineId) -> StoreResult<Machine>;
    /// Renames or resizes a machine. Occupancy is left alone.
    async fn update_machine(&self, id: MachineId, update: MachineUpdate) -> StoreResult<Machine>;
    /// Refuses with [`StoreError::Conflict`] while the machine is occupied.
    async fn delete_machine(&self, id: MachineId) -> StoreResult<()>;
    /// Frees a machine out of band. The order loses its machine without its
    /// cycle being marked complete, so it becomes eligible again.
    async fn admin_release_machine(&self, id: MachineId) -> StoreResult<bool>;

    /// Emails are unique; a duplicate is a [`StoreError::Conflict`].
    async fn create_client(&self, new: NewClient) -> StoreResult<Client>;
    async fn list_clients(&self) -> StoreResult<Vec<Client>>;
    async fn get_client(&self, id: ClientId) -> StoreResult<Client>;
    async fn update_client(&self, id: ClientId, update: ClientUpdate) -> StoreResult<Client>;
    /// Refuses with [`StoreError::Conflict`] while any order references the
    /// client.
    async fn delete_client(&self, id: ClientId) -> StoreResult<()>;

    /// Fails with [`StoreError::NotFound`] if the client does not exist.
    async fn create_order(&self, new: NewOrder) -> StoreResult<Order>;
    async fn list_orders(&self) -> StoreResult<Vec<Order>>;
    async fn get_order(&self, id: OrderId) -> StoreResult<Order>;
    /// Refuses with [`StoreError::Conflict`] while a cycle is running.
    async fn update_order(&self, id: OrderId, update: OrderUpdate) -> StoreResult<Order>;
    /// Refuses with [`StoreError::Conflict`] while a cycle is running.
    async fn delete_order(&self, id: OrderId) -> StoreResult<()>;
    /// Refuses with [`StoreError::Conflict`] while a cycle is running.
    async fn mark_order_fulfilled(&self, id: OrderId) -> StoreResult<Order>;
}
