//! Postgres-backed store.
//!
//! The machine claim is a single `UPDATE … WHERE occupied = false` over a row
//! picked with `FOR UPDATE SKIP LOCKED`, so two scheduling passes cannot both
//! win the same machine. The `machines_occupied_iff_order` check constraint
//! and the partial unique indexes in `0001_init.sql` back up the invariants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lavanderia_id::{ClientId, MachineId, OrderId};
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::{RecordStore, ResourceStore, StoreError, StoreResult};
use crate::model::{
    Assignment, Client, ClientUpdate, Machine, MachineUpdate, NewClient, NewMachine, NewOrder,
    Order, OrderUpdate, ServiceKind,
};

/// Store backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    has_code(e, "23505")
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    has_code(e, "23503")
}

fn has_code(e: &sqlx::Error, code: &str) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(code),
        _ => false,
    }
}

const ORDER_COLUMNS: &str = "order_id, client_id, services, fulfilled, ongoing, machine_id, \
                             cycle_completed_at, created_at, updated_at";

const CLIENT_COLUMNS: &str = "client_id, name, email, address, created_at, updated_at";

#[async_trait]
impl ResourceStore for PgStore {
    async fn list_unfulfilled_orders(&self) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT order_id, client_id, services, fulfilled, ongoing, machine_id,
                   cycle_completed_at, created_at, updated_at
            FROM orders
            WHERE fulfilled = FALSE
            ORDER BY created_at ASC, order_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn claim_idle_machine(&self, order_id: OrderId) -> StoreResult<Option<Machine>> {
        let result = sqlx::query_as::<_, MachineRow>(
            r#"
            UPDATE machines
            SET occupied = TRUE,
                current_order_id = $1,
                assigned_at = NULL,
                release_at = NULL,
                updated_at = now()
            WHERE machine_id = (
                SELECT machine_id
                FROM machines
                WHERE occupied = FALSE
                ORDER BY machine_id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND occupied = FALSE
            RETURNING machine_id, name, capacity_kg, occupied, current_order_id,
                      assigned_at, release_at, created_at, updated_at
            "#,
        )
        .bind(order_id.to_string())
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(row) => row.map(Machine::try_from).transpose(),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "order {order_id} already holds a machine"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id, machine_id = %machine_id))]
    async fn commit_assignment(
        &self,
        order_id: OrderId,
        machine_id: MachineId,
        started_at: DateTime<Utc>,
        completes_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let order_updated = sqlx::query(
            r#"
            UPDATE orders
            SET machine_id = $2, ongoing = TRUE, updated_at = now()
            WHERE order_id = $1
              AND fulfilled = FALSE
              AND machine_id IS NULL
              AND cycle_completed_at IS NULL
            "#,
        )
        .bind(order_id.to_string())
        .bind(machine_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if order_updated == 0 {
            debug!("Order no longer eligible; commit skipped");
            return Ok(false);
        }

        let machine_updated = sqlx::query(
            r#"
            UPDATE machines
            SET assigned_at = $3, release_at = $4, updated_at = now()
            WHERE machine_id = $1 AND current_order_id = $2
            "#,
        )
        .bind(machine_id.to_string())
        .bind(order_id.to_string())
        .bind(started_at)
        .bind(completes_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if machine_updated == 0 {
            debug!("Machine claim was lost before commit");
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self), fields(machine_id = %machine_id, order_id = %order_id))]
    async fn release_machine(
        &self,
        machine_id: MachineId,
        order_id: OrderId,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let released = sqlx::query(
            r#"
            UPDATE machines
            SET occupied = FALSE,
                current_order_id = NULL,
                assigned_at = NULL,
                release_at = NULL,
                updated_at = now()
            WHERE machine_id = $1 AND current_order_id = $2
            "#,
        )
        .bind(machine_id.to_string())
        .bind(order_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if released == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE orders
            SET machine_id = NULL,
                ongoing = FALSE,
                cycle_completed_at = now(),
                updated_at = now()
            WHERE order_id = $1 AND machine_id = $2
            "#,
        )
        .bind(order_id.to_string())
        .bind(machine_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_active_assignments(&self) -> StoreResult<Vec<Assignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT o.order_id, m.machine_id, m.assigned_at, m.release_at
            FROM machines m
            JOIN orders o
              ON o.order_id = m.current_order_id
             AND o.machine_id = m.machine_id
            WHERE m.occupied = TRUE
              AND m.assigned_at IS NOT NULL
              AND m.release_at IS NOT NULL
            ORDER BY m.release_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Assignment::try_from).collect()
    }

    async fn release_uncommitted_claims(&self) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE machines m
            SET occupied = FALSE,
                current_order_id = NULL,
                assigned_at = NULL,
                release_at = NULL,
                updated_at = now()
            WHERE m.occupied = TRUE
              AND NOT EXISTS (
                  SELECT 1 FROM orders o
                  WHERE o.order_id = m.current_order_id
                    AND o.machine_id = m.machine_id
              )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_machine(&self, new: NewMachine) -> StoreResult<Machine> {
        let row = sqlx::query_as::<_, MachineRow>(
            r#"
            INSERT INTO machines (machine_id, name, capacity_kg)
            VALUES ($1, $2, $3)
            RETURNING machine_id, name, capacity_kg, occupied, current_order_id,
                      assigned_at, release_at, created_at, updated_at
            "#,
        )
        .bind(MachineId::new().to_string())
        .bind(&new.name)
        .bind(new.capacity_kg)
        .fetch_one(&self.pool)
        .await?;

        Machine::try_from(row)
    }

    async fn list_machines(&self) -> StoreResult<Vec<Machine>> {
        let rows = sqlx::query_as::<_, MachineRow>(
            r#"
            SELECT machine_id, name, capacity_kg, occupied, current_order_id,
                   assigned_at, release_at, created_at, updated_at
            FROM machines
            ORDER BY machine_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Machine::try_from).collect()
    }

    async fn get_machine(&self, id: MachineId) -> StoreResult<Machine> {
        let row = sqlx::query_as::<_, MachineRow>(
            r#"
            SELECT machine_id, name, capacity_kg, occupied, current_order_id,
                   assigned_at, release_at, created_at, updated_at
            FROM machines
            WHERE machine_id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Machine::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("machine", id))
    }

    #[instrument(skip(self, update), fields(machine_id = %id))]
    async fn update_machine(&self, id: MachineId, update: MachineUpdate) -> StoreResult<Machine> {
        let row = sqlx::query_as::<_, MachineRow>(
            r#"
            UPDATE machines
            SET name = COALESCE($2, name),
                capacity_kg = COALESCE($3, capacity_kg),
                updated_at = now()
            WHERE machine_id = $1
            RETURNING machine_id, name, capacity_kg, occupied, current_order_id,
                      assigned_at, release_at, created_at, updated_at
            "#,
        )
        .bind(id.to_string())
        .bind(update.name)
        .bind(update.capacity_kg)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Machine::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("machine", id))
    }

    async fn delete_machine(&self, id: MachineId) -> StoreResult<()> {
        let deleted = sqlx::query("DELETE FROM machines WHERE machine_id = $1 AND occupied = FALSE")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            // Distinguish a missing machine from a busy one.
            self.get_machine(id).await?;
            return Err(StoreError::Conflict(format!("machine {id} is occupied")));
        }
        Ok(())
    }

    async fn admin_release_machine(&self, id: MachineId) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let current: Option<Option<String>> = sqlx::query_scalar(
            "SELECT current_order_id FROM machines WHERE machine_id = $1 FOR UPDATE",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Err(StoreError::not_found("machine", id));
        };
        let Some(order_id) = current else {
            return Ok(false);
        };

        sqlx::query(
            r#"
            UPDATE machines
            SET occupied = FALSE,
                current_order_id = NULL,
                assigned_at = NULL,
                release_at = NULL,
                updated_at = now()
            WHERE machine_id = $1
            "#,
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET machine_id = NULL, ongoing = FALSE, updated_at = now()
            WHERE order_id = $1 AND machine_id = $2
            "#,
        )
        .bind(&order_id)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self, new))]
    async fn create_client(&self, new: NewClient) -> StoreResult<Client> {
        let result = sqlx::query_as::<_, ClientRow>(&format!(
            "INSERT INTO clients (client_id, name, email, address) \
             VALUES ($1, $2, $3, $4) RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(ClientId::new().to_string())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.address)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Client::try_from(row),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "client email {} already registered",
                new.email
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_clients(&self) -> StoreResult<Vec<Client>> {
        let rows = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients ORDER BY created_at ASC, client_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Client::try_from).collect()
    }

    async fn get_client(&self, id: ClientId) -> StoreResult<Client> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Client::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("client", id))
    }

    #[instrument(skip(self, update), fields(client_id = %id))]
    async fn update_client(&self, id: ClientId, update: ClientUpdate) -> StoreResult<Client> {
        let email = update.email.clone();
        let result = sqlx::query_as::<_, ClientRow>(&format!(
            "UPDATE clients \
             SET name = COALESCE($2, name), \
                 email = COALESCE($3, email), \
                 address = COALESCE($4, address), \
                 updated_at = now() \
             WHERE client_id = $1 \
             RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(update.name)
        .bind(update.email)
        .bind(update.address)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(row)) => Client::try_from(row),
            Ok(None) => Err(StoreError::not_found("client", id)),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "client email {} already registered",
                email.unwrap_or_default()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(client_id = %id))]
    async fn delete_client(&self, id: ClientId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM clients WHERE client_id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::not_found("client", id)),
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(StoreError::Conflict(format!("client {id} has orders")))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, new), fields(client_id = %new.client_id))]
    async fn create_order(&self, new: NewOrder) -> StoreResult<Order> {
        let services = service_names(&new.services);
        let result = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (order_id, client_id, services) \
             VALUES ($1, $2, $3) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(OrderId::new().to_string())
        .bind(new.client_id.to_string())
        .bind(&services)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Order::try_from(row),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(StoreError::not_found("client", new.client_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_orders(&self) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT order_id, client_id, services, fulfilled, ongoing, machine_id,
                   cycle_completed_at, created_at, updated_at
            FROM orders
            ORDER BY created_at ASC, order_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    async fn get_order(&self, id: OrderId) -> StoreResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT order_id, client_id, services, fulfilled, ongoing, machine_id,
                   cycle_completed_at, created_at, updated_at
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("order", id))
    }

    #[instrument(skip(self, update), fields(order_id = %id))]
    async fn update_order(&self, id: OrderId, update: OrderUpdate) -> StoreResult<Order> {
        let services = update.services.as_deref().map(service_names);
        let result = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders \
             SET client_id = COALESCE($2, client_id), \
                 services = COALESCE($3, services), \
                 updated_at = now() \
             WHERE order_id = $1 AND ongoing = FALSE AND machine_id IS NULL \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(update.client_id.map(|c| c.to_string()))
        .bind(services)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(row)) => Order::try_from(row),
            Ok(None) => {
                self.get_order(id).await?;
                Err(StoreError::Conflict(format!(
                    "order {id} is in a machine cycle"
                )))
            }
            Err(e) if is_foreign_key_violation(&e) => {
                let client_id = update.client_id.map(|c| c.to_string()).unwrap_or_default();
                Err(StoreError::not_found("client", client_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn delete_order(&self, id: OrderId) -> StoreResult<()> {
        let deleted = sqlx::query(
            "DELETE FROM orders WHERE order_id = $1 AND ongoing = FALSE AND machine_id IS NULL",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted == 0 {
            self.get_order(id).await?;
            return Err(StoreError::Conflict(format!(
                "order {id} is in a machine cycle"
            )));
        }
        Ok(())
    }

    async fn mark_order_fulfilled(&self, id: OrderId) -> StoreResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET fulfilled = TRUE, updated_at = now()
            WHERE order_id = $1 AND ongoing = FALSE AND machine_id IS NULL
            RETURNING order_id, client_id, services, fulfilled, ongoing, machine_id,
                      cycle_completed_at, created_at, updated_at
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Order::try_from(row),
            None => {
                self.get_order(id).await?;
                Err(StoreError::Conflict(format!(
                    "order {id} is in a machine cycle"
                )))
            }
        }
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

fn service_names(services: &[ServiceKind]) -> Vec<String> {
    services.iter().map(|s| s.as_str().to_string()).collect()
}

fn decode_id<T: std::str::FromStr>(record: &'static str, raw: &str) -> StoreResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| StoreError::Decode {
        record,
        message: format!("{raw}: {e}"),
    })
}

#[derive(Debug)]
struct MachineRow {
    machine_id: String,
    name: String,
    capacity_kg: i32,
    occupied: bool,
    current_order_id: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    release_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MachineRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            machine_id: row.try_get("machine_id")?,
            name: row.try_get("name")?,
            capacity_kg: row.try_get("capacity_kg")?,
            occupied: row.try_get("occupied")?,
            current_order_id: row.try_get("current_order_id")?,
            assigned_at: row.try_get("assigned_at")?,
            release_at: row.try_get("release_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<MachineRow> for Machine {
    type Error = StoreError;

    fn try_from(row: MachineRow) -> StoreResult<Self> {
        Ok(Self {
            id: decode_id("machine", &row.machine_id)?,
            name: row.name,
            capacity_kg: row.capacity_kg,
            occupied: row.occupied,
            current_order_id: row
                .current_order_id
                .as_deref()
                .map(|id| decode_id("order", id))
                .transpose()?,
            assigned_at: row.assigned_at,
            release_at: row.release_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct OrderRow {
    order_id: String,
    client_id: String,
    services: Vec<String>,
    fulfilled: bool,
    ongoing: bool,
    machine_id: Option<String>,
    cycle_completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OrderRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            order_id: row.try_get("order_id")?,
            client_id: row.try_get("client_id")?,
            services: row.try_get("services")?,
            fulfilled: row.try_get("fulfilled")?,
            ongoing: row.try_get("ongoing")?,
            machine_id: row.try_get("machine_id")?,
            cycle_completed_at: row.try_get("cycle_completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> StoreResult<Self> {
        let services = row
            .services
            .iter()
            .map(|s| s.parse::<ServiceKind>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Decode {
                record: "order",
                message: e.to_string(),
            })?;

        Ok(Self {
            id: decode_id("order", &row.order_id)?,
            client_id: decode_id("client", &row.client_id)?,
            services,
            fulfilled: row.fulfilled,
            ongoing: row.ongoing,
            machine_id: row
                .machine_id
                .as_deref()
                .map(|id| decode_id("machine", id))
                .transpose()?,
            cycle_completed_at: row.cycle_completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct ClientRow {
    client_id: String,
    name: String,
    email: String,
    address: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ClientRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            client_id: row.try_get("client_id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            address: row.try_get("address")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ClientRow> for Client {
    type Error = StoreError;

    fn try_from(row: ClientRow) -> StoreResult<Self> {
        Ok(Self {
            id: decode_id("client", &row.client_id)?,
            name: row.name,
            email: row.email,
            address: row.address,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct AssignmentRow {
    order_id: String,
    machine_id: String,
    assigned_at: DateTime<Utc>,
    release_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AssignmentRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            order_id: row.try_get("order_id")?,
            machine_id: row.try_get("machine_id")?,
            assigned_at: row.try_get("assigned_at")?,
            release_at: row.try_get("release_at")?,
        })
    }
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = StoreError;

    fn try_from(row: AssignmentRow) -> StoreResult<Self> {
        Ok(Self {
            order_id: decode_id("assignment", &row.order_id)?,
            machine_id: decode_id("assignment", &row.machine_id)?,
            started_at: row.assigned_at,
            completes_at: row.release_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_row(services: &[&str]) -> OrderRow {
        let now = Utc::now();
        OrderRow {
            order_id: OrderId::new().to_string(),
            client_id: ClientId::new().to_string(),
            services: services.iter().map(|s| s.to_string()).collect(),
            fulfilled: false,
            ongoing: false,
            machine_id: None,
            cycle_completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_order_row_decodes_services() {
        let order = Order::try_from(order_row(&["wash", "ironing"])).unwrap();
        assert_eq!(order.services, vec![ServiceKind::Wash, ServiceKind::Ironing]);
    }

    #[test]
    fn test_order_row_rejects_unknown_service() {
        let err = Order::try_from(order_row(&["starching"])).unwrap_err();
        assert!(matches!(err, StoreError::Decode { record: "order", .. }));
    }

    #[test]
    fn test_order_row_labels_bad_machine_reference() {
        let mut row = order_row(&["wash"]);
        row.machine_id = Some(OrderId::new().to_string());
        let err = Order::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Decode { record: "machine", .. }));
    }

    #[test]
    fn test_machine_row_labels_bad_order_reference() {
        let now = Utc::now();
        let row = MachineRow {
            machine_id: MachineId::new().to_string(),
            name: "m1".to_string(),
            capacity_kg: 8,
            occupied: true,
            current_order_id: Some(MachineId::new().to_string()),
            assigned_at: None,
            release_at: None,
            created_at: now,
            updated_at: now,
        };
        let err = Machine::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Decode { record: "order", .. }));
    }

    #[test]
    fn test_machine_row_rejects_order_id_in_machine_column() {
        let now = Utc::now();
        let row = MachineRow {
            machine_id: OrderId::new().to_string(),
            name: "m1".to_string(),
            capacity_kg: 8,
            occupied: false,
            current_order_id: None,
            assigned_at: None,
            release_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(Machine::try_from(row).is_err());
    }
}
