use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{BatchRef, Sku, Version};
use domain::{Batch, OrderLine, Product};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};

use crate::repository::{ProductBackend, Session, SessionFactory};
use crate::{PersistenceError, Result};

/// PostgreSQL-backed product store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL product store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for PostgresStore {
    type Session = PostgresSession;

    async fn open(&self) -> Result<PostgresSession> {
        let tx = self.pool.begin().await?;
        Ok(PostgresSession {
            tx: Some(tx),
            loaded: HashMap::new(),
        })
    }
}

/// One database transaction.
///
/// Dropping the session without committing rolls the transaction back.
pub struct PostgresSession {
    tx: Option<Transaction<'static, Postgres>>,
    loaded: HashMap<Sku, Snapshot>,
}

/// Version and batch references of a product as the session first saw it.
struct Snapshot {
    version: Version,
    batches: HashSet<BatchRef>,
}

fn connection<'a>(
    tx: &'a mut Option<Transaction<'static, Postgres>>,
) -> Result<&'a mut PgConnection> {
    tx.as_deref_mut().ok_or(PersistenceError::SessionClosed)
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| PersistenceError::InvalidRow(format!("{column} out of range: {value}")))
}

async fn current_version(conn: &mut PgConnection, sku: &Sku) -> Result<Version> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version_number FROM products WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_optional(conn)
            .await?;
    Ok(version.map(Version::new).unwrap_or_default())
}

async fn load_batches(conn: &mut PgConnection, sku: &Sku) -> Result<Vec<Batch>> {
    let allocation_rows = sqlx::query(
        r#"
        SELECT a.batch_reference, a.orderid, a.sku, a.qty
        FROM allocations a
        JOIN batches b ON b.reference = a.batch_reference
        WHERE b.sku = $1
        ORDER BY a.id ASC
        "#,
    )
    .bind(sku.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let mut allocations: HashMap<String, Vec<OrderLine>> = HashMap::new();
    for row in allocation_rows {
        let batch_reference: String = row.try_get("batch_reference")?;
        let orderid: String = row.try_get("orderid")?;
        let line_sku: String = row.try_get("sku")?;
        let qty = to_u32(row.try_get("qty")?, "qty")?;
        allocations
            .entry(batch_reference)
            .or_default()
            .push(OrderLine::new(orderid, line_sku, qty));
    }

    let batch_rows = sqlx::query(
        r#"
        SELECT reference, sku, purchased_quantity, eta
        FROM batches
        WHERE sku = $1
        ORDER BY id ASC
        "#,
    )
    .bind(sku.as_str())
    .fetch_all(&mut *conn)
    .await?;

    batch_rows
        .into_iter()
        .map(|row| -> Result<Batch> {
            let reference: String = row.try_get("reference")?;
            let batch_sku: String = row.try_get("sku")?;
            let purchased = to_u32(row.try_get("purchased_quantity")?, "purchased_quantity")?;
            let eta: Option<NaiveDate> = row.try_get("eta")?;
            let lines = allocations.remove(&reference).unwrap_or_default();
            Ok(Batch::from_parts(reference, batch_sku, purchased, eta, lines))
        })
        .collect()
}

/// Inserts a batch the session never loaded.
///
/// An existing row with the same reference is never overwritten.
async fn insert_batch(conn: &mut PgConnection, batch: &Batch) -> Result<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO batches (reference, sku, purchased_quantity, eta)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (reference) DO NOTHING
        "#,
    )
    .bind(batch.reference().as_str())
    .bind(batch.sku().as_str())
    .bind(i64::from(batch.purchased_quantity()))
    .bind(batch.eta())
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 0 {
        let owner: String = sqlx::query_scalar("SELECT sku FROM batches WHERE reference = $1")
            .bind(batch.reference().as_str())
            .fetch_one(&mut *conn)
            .await?;
        return Err(PersistenceError::BatchReferenceTaken {
            reference: batch.reference().clone(),
            owner: Sku::new(owner),
        });
    }
    Ok(())
}

async fn save_batches(
    conn: &mut PgConnection,
    product: &Product,
    loaded: &HashSet<BatchRef>,
) -> Result<()> {
    for batch in product.batches() {
        if loaded.contains(batch.reference()) {
            sqlx::query(
                r#"
                UPDATE batches SET purchased_quantity = $1, eta = $2
                WHERE reference = $3 AND sku = $4
                "#,
            )
            .bind(i64::from(batch.purchased_quantity()))
            .bind(batch.eta())
            .bind(batch.reference().as_str())
            .bind(batch.sku().as_str())
            .execute(&mut *conn)
            .await?;
        } else {
            insert_batch(conn, batch).await?;
        }

        sqlx::query("DELETE FROM allocations WHERE batch_reference = $1 AND sku = $2")
            .bind(batch.reference().as_str())
            .bind(batch.sku().as_str())
            .execute(&mut *conn)
            .await?;

        for line in batch.allocations() {
            sqlx::query(
                r#"
                INSERT INTO allocations (batch_reference, orderid, sku, qty)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(batch.reference().as_str())
            .bind(line.orderid().as_str())
            .bind(line.sku().as_str())
            .bind(i64::from(line.qty()))
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl ProductBackend for PostgresSession {
    async fn add_product(&mut self, product: &Product) -> Result<()> {
        let conn = connection(&mut self.tx)?;
        let sku = product.sku();
        let version = product.version_number();

        let inserted = sqlx::query(
            "INSERT INTO products (sku, version_number) VALUES ($1, $2) ON CONFLICT (sku) DO NOTHING",
        )
        .bind(sku.as_str())
        .bind(version.as_i64())
        .execute(&mut *conn)
        .await?;

        if inserted.rows_affected() == 0 {
            let actual = current_version(conn, sku).await?;
            return Err(PersistenceError::ConcurrencyConflict {
                sku: sku.clone(),
                expected: version,
                actual,
            });
        }

        self.loaded.insert(
            sku.clone(),
            Snapshot {
                version,
                batches: HashSet::new(),
            },
        );
        Ok(())
    }

    async fn get_product(&mut self, sku: &Sku) -> Result<Option<Product>> {
        let conn = connection(&mut self.tx)?;

        let version: Option<i64> =
            sqlx::query_scalar("SELECT version_number FROM products WHERE sku = $1")
                .bind(sku.as_str())
                .fetch_optional(&mut *conn)
                .await?;
        let Some(version) = version.map(Version::new) else {
            return Ok(None);
        };

        let batches = load_batches(conn, sku).await?;
        let snapshot = Snapshot {
            version,
            batches: batches.iter().map(|b| b.reference().clone()).collect(),
        };
        self.loaded.insert(sku.clone(), snapshot);
        Ok(Some(Product::with_version(sku.clone(), batches, version)))
    }
}

#[async_trait]
impl Session for PostgresSession {
    async fn commit(&mut self, products: &[&Product]) -> Result<()> {
        let conn = connection(&mut self.tx)?;

        for product in products {
            let sku = product.sku();
            let snapshot = self
                .loaded
                .get(sku)
                .ok_or_else(|| PersistenceError::UntrackedProduct(sku.clone()))?;
            let expected = snapshot.version;

            let updated = sqlx::query(
                "UPDATE products SET version_number = $1 WHERE sku = $2 AND version_number = $3",
            )
            .bind(product.version_number().as_i64())
            .bind(sku.as_str())
            .bind(expected.as_i64())
            .execute(&mut *conn)
            .await?;

            if updated.rows_affected() == 0 {
                let actual = current_version(conn, sku).await?;
                tracing::debug!(%sku, %expected, %actual, "stale product version at commit");
                return Err(PersistenceError::ConcurrencyConflict {
                    sku: sku.clone(),
                    expected,
                    actual,
                });
            }

            save_batches(conn, product, &snapshot.batches).await?;
        }

        let tx = self.tx.take().ok_or(PersistenceError::SessionClosed)?;
        tx.commit().await?;
        self.loaded.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.loaded.clear();
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
