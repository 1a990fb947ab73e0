use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use hpp::{
    AttributeMap, CartItem, Order, OrderLineItem, OrderStatus, PaymentError, ShippingAddress,
};

use crate::error::StoreError;

/// Attempts at drawing an unused order number before giving up.
pub const MAX_ORDER_NUMBER_ATTEMPTS: usize = 8;

/// SQLITE_CONSTRAINT_UNIQUE
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// Catalog product (only what checkout and settlement need)
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
}

/// Purchasable configuration of a product with its own stock counter
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Variant {
    pub id: i64,
    pub product_id: i64,
    pub attributes: AttributeMap,
    pub stock: i64,
}

/// Everything needed to persist a new order
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub email: String,
    pub user_id: Option<i64>,
    pub total: Decimal,
    pub provider: String,
    pub items: Vec<CartItem>,
    pub shipping: ShippingAddress,
}

/// SQLite database wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Internal("database lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        // WAL for concurrent readers; foreign keys drive the item/address cascade
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                price TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS variants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                attributes TEXT NOT NULL DEFAULT '{}',
                stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0)
            );

            CREATE INDEX IF NOT EXISTS idx_variants_product ON variants(product_id);

            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_number TEXT UNIQUE NOT NULL,
                email TEXT NOT NULL,
                user_id INTEGER,
                total TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('PENDING', 'COMPLETED', 'FAILED')),
                provider TEXT NOT NULL,
                payment_reference TEXT,
                payment_payload TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS order_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                product_id INTEGER,
                name TEXT NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity >= 1),
                unit_price TEXT NOT NULL,
                line_total TEXT NOT NULL,
                image TEXT,
                attributes TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

            CREATE TABLE IF NOT EXISTS shipping_addresses (
                order_id INTEGER PRIMARY KEY REFERENCES orders(id) ON DELETE CASCADE,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                address TEXT NOT NULL,
                city TEXT NOT NULL,
                postal_code TEXT NOT NULL,
                country TEXT NOT NULL,
                phone TEXT NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    /// Cheap liveness probe for `/health`.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Insert a catalog product
    pub fn create_product(&self, name: &str, price: Decimal) -> Result<Product, StoreError> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO products (name, price, created_at) VALUES (?1, ?2, ?3)",
            params![name, price.to_string(), now],
        )?;

        Ok(Product {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            price,
        })
    }

    /// Insert a variant for an existing product
    pub fn create_variant(
        &self,
        product_id: i64,
        attributes: &AttributeMap,
        stock: i64,
    ) -> Result<Variant, StoreError> {
        if stock < 0 {
            return Err(StoreError::InvalidCheckout(
                "variant stock cannot be negative".to_string(),
            ));
        }
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO variants (product_id, attributes, stock) VALUES (?1, ?2, ?3)",
            params![product_id, serde_json::to_string(attributes)?, stock],
        )?;

        Ok(Variant {
            id: conn.last_insert_rowid(),
            product_id,
            attributes: attributes.clone(),
            stock,
        })
    }

    /// Get variant by id
    pub fn get_variant(&self, id: i64) -> Result<Option<Variant>, StoreError> {
        let conn = self.lock()?;
        let variant = conn
            .query_row(
                "SELECT id, product_id, attributes, stock FROM variants WHERE id = ?1",
                params![id],
                variant_from_row,
            )
            .optional()?;
        Ok(variant)
    }

    /// List variants of a product in id order
    pub fn list_variants(&self, product_id: i64) -> Result<Vec<Variant>, StoreError> {
        let conn = self.lock()?;
        Ok(variants_for_product(&conn, product_id)?)
    }

    /// Persist an order with its line items and shipping address in one
    /// transaction. `next_number` is called until an unused order number is
    /// found (at most [`MAX_ORDER_NUMBER_ATTEMPTS`] times).
    ///
    /// Items that name a catalog product must carry that product's current
    /// price; ad-hoc items (no `product_id`) are stored as given.
    pub fn insert_order<F>(&self, new: &NewOrder, mut next_number: F) -> Result<Order, StoreError>
    where
        F: FnMut() -> String,
    {
        let mut conn = self.lock()?;
        let now = chrono::Utc::now().timestamp();

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for item in &new.items {
            check_catalog_price(&tx, item)?;
        }

        let mut attempt = 0;
        let (order_id, order_number) = loop {
            attempt += 1;
            let number = next_number();
            let inserted = tx.execute(
                r#"
                INSERT INTO orders (order_number, email, user_id, total, status, provider, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, 'PENDING', ?5, ?6, ?7)
                "#,
                params![
                    number,
                    new.email,
                    new.user_id,
                    new.total.to_string(),
                    new.provider,
                    now,
                    now
                ],
            );

            match inserted {
                Ok(_) => break (tx.last_insert_rowid(), number),
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(order = %number, attempt, "order number collision, regenerating");
                    if attempt >= MAX_ORDER_NUMBER_ATTEMPTS {
                        return Err(StoreError::Internal(
                            "could not allocate a unique order number".to_string(),
                        ));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        let mut items = Vec::with_capacity(new.items.len());
        for item in &new.items {
            let line_total = item.line_total().ok_or_else(|| {
                PaymentError::InvalidAmount(format!("line total for '{}' is too large", item.name))
            })?;
            tx.execute(
                r#"
                INSERT INTO order_items (order_id, product_id, name, quantity, unit_price, line_total, image, attributes)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    order_id,
                    item.product_id,
                    item.name,
                    item.quantity,
                    item.unit_price.to_string(),
                    line_total.to_string(),
                    item.image,
                    serde_json::to_string(&item.attributes)?
                ],
            )?;

            items.push(OrderLineItem {
                id: tx.last_insert_rowid(),
                product_id: item.product_id,
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total,
                image: item.image.clone(),
                attributes: item.attributes.clone(),
            });
        }

        let s = &new.shipping;
        tx.execute(
            r#"
            INSERT INTO shipping_addresses (order_id, first_name, last_name, address, city, postal_code, country, phone)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                order_id,
                s.first_name,
                s.last_name,
                s.address,
                s.city,
                s.postal_code,
                s.country,
                s.phone
            ],
        )?;

        tx.commit()?;

        Ok(Order {
            id: order_id,
            order_number,
            email: new.email.clone(),
            user_id: new.user_id,
            total: new.total,
            status: OrderStatus::Pending,
            provider: new.provider.clone(),
            payment_reference: None,
            payment_payload: None,
            created_at: now,
            updated_at: now,
            items,
        })
    }

    /// Get order (with line items) by its human-readable number
    pub fn get_order(&self, order_number: &str) -> Result<Option<Order>, StoreError> {
        let conn = self.lock()?;

        let order = conn
            .query_row(
                r#"
                SELECT id, order_number, email, user_id, total, status, provider,
                       payment_reference, payment_payload, created_at, updated_at
                FROM orders
                WHERE order_number = ?1
                "#,
                params![order_number],
                |row| {
                    Ok(Order {
                        id: row.get(0)?,
                        order_number: row.get(1)?,
                        email: row.get(2)?,
                        user_id: row.get(3)?,
                        total: decimal_at(row, 4)?,
                        status: status_at(row, 5)?,
                        provider: row.get(6)?,
                        payment_reference: row.get(7)?,
                        payment_payload: optional_json_at(row, 8)?,
                        created_at: row.get(9)?,
                        updated_at: row.get(10)?,
                        items: Vec::new(),
                    })
                },
            )
            .optional()?;

        match order {
            Some(mut order) => {
                order.items = line_items(&conn, order.id)?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    /// Shipping address of an order
    pub fn get_shipping_address(&self, order_id: i64) -> Result<Option<ShippingAddress>, StoreError> {
        let conn = self.lock()?;

        let address = conn
            .query_row(
                r#"
                SELECT first_name, last_name, address, city, postal_code, country, phone
                FROM shipping_addresses
                WHERE order_id = ?1
                "#,
                params![order_id],
                |row| {
                    Ok(ShippingAddress {
                        first_name: row.get(0)?,
                        last_name: row.get(1)?,
                        address: row.get(2)?,
                        city: row.get(3)?,
                        postal_code: row.get(4)?,
                        country: row.get(5)?,
                        phone: row.get(6)?,
                    })
                },
            )
            .optional()?;

        Ok(address)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction. The write lock is taken
    /// up front so a read-then-write inside `f` cannot interleave with another
    /// connection's writer. Any error rolls the whole transaction back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Catalog price of a product, `None` when no such product exists.
pub fn product_price(conn: &Connection, product_id: i64) -> rusqlite::Result<Option<Decimal>> {
    conn.query_row(
        "SELECT price FROM products WHERE id = ?1",
        params![product_id],
        |row| decimal_at(row, 0),
    )
    .optional()
}

fn check_catalog_price(conn: &Connection, item: &CartItem) -> Result<(), StoreError> {
    let Some(product_id) = item.product_id else {
        return Ok(());
    };
    match product_price(conn, product_id)? {
        None => Err(StoreError::InvalidCheckout(format!(
            "unknown product {product_id} for '{}'",
            item.name
        ))),
        Some(price) if price != item.unit_price => Err(StoreError::InvalidCheckout(format!(
            "price for '{}' is {price}, not {}",
            item.name, item.unit_price
        ))),
        Some(_) => Ok(()),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.extended_code == SQLITE_CONSTRAINT_UNIQUE
    )
}

fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<OrderStatus> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_json_at<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn variant_from_row(row: &Row<'_>) -> rusqlite::Result<Variant> {
    Ok(Variant {
        id: row.get(0)?,
        product_id: row.get(1)?,
        attributes: json_at(row, 2)?,
        stock: row.get(3)?,
    })
}

// Statement helpers that run on a caller-provided connection, so settlement
// can compose them inside one transaction.

/// Compare-and-set: move a PENDING order to `status`, recording the gateway
/// reference and the raw callback. Returns false when the order does not exist
/// or is no longer PENDING.
pub fn transition_pending(
    conn: &Connection,
    order_number: &str,
    status: OrderStatus,
    payment_reference: Option<&str>,
    payload: &BTreeMap<String, String>,
) -> Result<bool, StoreError> {
    let now = chrono::Utc::now().timestamp();
    let rows = conn.execute(
        r#"
        UPDATE orders
        SET status = ?1, payment_reference = ?2, payment_payload = ?3, updated_at = ?4
        WHERE order_number = ?5 AND status = 'PENDING'
        "#,
        params![
            status.as_str(),
            payment_reference,
            serde_json::to_string(payload)?,
            now,
            order_number
        ],
    )?;
    Ok(rows == 1)
}

/// Id and current status of an order
pub fn order_state(
    conn: &Connection,
    order_number: &str,
) -> Result<Option<(i64, OrderStatus)>, StoreError> {
    let state = conn
        .query_row(
            "SELECT id, status FROM orders WHERE order_number = ?1",
            params![order_number],
            |row| Ok((row.get(0)?, status_at(row, 1)?)),
        )
        .optional()?;
    Ok(state)
}

/// Line items of an order in insertion order
pub fn line_items(conn: &Connection, order_id: i64) -> Result<Vec<OrderLineItem>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, product_id, name, quantity, unit_price, line_total, image, attributes
        FROM order_items
        WHERE order_id = ?1
        ORDER BY id
        "#,
    )?;

    let items = stmt
        .query_map(params![order_id], |row| {
            Ok(OrderLineItem {
                id: row.get(0)?,
                product_id: row.get(1)?,
                name: row.get(2)?,
                quantity: row.get(3)?,
                unit_price: decimal_at(row, 4)?,
                line_total: decimal_at(row, 5)?,
                image: row.get(6)?,
                attributes: json_at(row, 7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Variants of a product in id order
pub fn variants_for_product(conn: &Connection, product_id: i64) -> rusqlite::Result<Vec<Variant>> {
    let mut stmt = conn.prepare(
        "SELECT id, product_id, attributes, stock FROM variants WHERE product_id = ?1 ORDER BY id",
    )?;
    let variants = stmt
        .query_map(params![product_id], variant_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(variants)
}

/// Atomically take `quantity` units from a variant. Returns false, leaving the
/// row untouched, when the stock would go negative.
pub fn decrement_stock(conn: &Connection, variant_id: i64, quantity: u32) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE variants SET stock = stock - ?1 WHERE id = ?2 AND stock >= ?1",
        params![quantity, variant_id],
    )?;
    Ok(rows == 1)
}
