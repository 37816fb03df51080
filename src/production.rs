//! Production runs: consume ingredient stock, enter finished goods

use std::collections::HashMap;

use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use tracing::info;

use crate::db::{self, decimal_at, opt_decimal_at, unit_at, StoreResult};
use crate::error::{PricingError, StoreError};
use crate::models::{Production, ProductionOutput, ProductRef};
use crate::pricing::{self, overflow, CostLine, UnresolvedPolicy};

/// A production run as requested by the operator
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionRequest {
    pub recipe_id: i64,
    pub batches: i64,
    /// Plain count of units produced, used when no outputs are itemised
    pub produced_quantity: Option<Decimal>,
    pub outputs: Vec<ProductionOutput>,
    pub note: Option<String>,
}

fn validate(request: &ProductionRequest) -> StoreResult<()> {
    if request.batches <= 0 {
        return Err(StoreError::Validation(
            "number of batches must be greater than zero".to_string(),
        ));
    }
    if request.outputs.is_empty() {
        match request.produced_quantity {
            Some(q) if q > Decimal::ZERO => {}
            _ => {
                return Err(StoreError::Validation(
                    "produced quantity must be greater than zero, or list the outputs".to_string(),
                ))
            }
        }
    }
    for output in &request.outputs {
        if output.quantity < Decimal::ZERO {
            return Err(StoreError::Validation(
                "output quantity must not be negative".to_string(),
            ));
        }
    }
    Ok(())
}

/// Record a production run.
///
/// All ingredient stock is checked before any is deducted, so a run that
/// cannot be completed leaves the catalog untouched.
pub fn register_production(conn: &Connection, request: &ProductionRequest) -> StoreResult<Production> {
    validate(request)?;

    let recipe = db::get_recipe(conn, request.recipe_id)?;
    if recipe.ingredients.is_empty() {
        return Err(StoreError::Validation(format!(
            "recipe '{}' has no ingredients",
            recipe.name
        )));
    }

    let batches = Decimal::from(request.batches);
    let catalog = db::load_catalog(conn)?;

    // Stock needed per product, in each product's own unit
    let mut needed: HashMap<i64, Decimal> = HashMap::new();
    let mut lines = Vec::with_capacity(recipe.ingredients.len());
    for ingredient in &recipe.ingredients {
        let ProductRef::Id(product_id) = ingredient.product else {
            return Err(StoreError::not_found("Product", &ingredient.product));
        };
        let product = catalog
            .get(&product_id)
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;

        let per_batch = ingredient.unit.convert(ingredient.quantity, product.unit)?;
        lines.push(CostLine {
            product_id,
            quantity: per_batch,
            unit: product.unit,
        });
        let run_quantity = per_batch
            .checked_mul(batches)
            .ok_or_else(|| overflow("ingredient quantity"))?;
        let entry = needed.entry(product_id).or_default();
        *entry = entry
            .checked_add(run_quantity)
            .ok_or_else(|| overflow("ingredient quantity"))?;
    }

    let mut shortages: Vec<_> = needed.iter().collect();
    shortages.sort_by_key(|(id, _)| **id);
    for (id, quantity) in shortages {
        let product = &catalog[id];
        if product.current_quantity < *quantity {
            return Err(StoreError::InsufficientStock {
                product: product.name.clone(),
                available: product.current_quantity,
                needed: *quantity,
                unit: product.unit,
            });
        }
    }

    let cost_per_batch = pricing::compute_cost(&lines, &catalog, UnresolvedPolicy::Fail)?.total;
    let total_cost = cost_per_batch
        .checked_mul(batches)
        .ok_or_else(|| overflow("total cost"))?;
    let estimated_profit = match recipe.sale_price {
        Some(price) => {
            let units = recipe
                .standard_yield
                .checked_mul(batches)
                .ok_or_else(|| overflow("produced units"))?;
            pricing::compute_estimated_profit(price, units, total_cost)?
        }
        None => Decimal::ZERO,
    };

    let produced_quantity = match request.produced_quantity {
        Some(q) => q,
        None => request
            .outputs
            .iter()
            .try_fold(Decimal::ZERO, |sum, o| sum.checked_add(o.quantity))
            .ok_or_else(|| overflow("produced quantity"))?,
    };

    let tx = conn.unchecked_transaction()?;
    for (product_id, quantity) in &needed {
        db::deduct_stock(&tx, *product_id, *quantity)?;
    }
    for output in &request.outputs {
        let product = db::get_product(&tx, output.product_id)?;
        let quantity = output.unit.convert(output.quantity, product.unit)?;
        db::add_stock(&tx, output.product_id, quantity)?;
    }

    tx.execute(
        "INSERT INTO productions (recipe_id, batches, produced_quantity, total_cost, estimated_profit, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            recipe.id,
            request.batches,
            produced_quantity.to_string(),
            total_cost.to_string(),
            estimated_profit.to_string(),
            request.note,
        ],
    )?;
    let production_id = tx.last_insert_rowid();
    for output in &request.outputs {
        tx.execute(
            "INSERT INTO production_outputs (production_id, product_id, quantity, unit)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                production_id,
                output.product_id,
                output.quantity.to_string(),
                output.unit.code(),
            ],
        )?;
    }
    tx.commit()?;

    info!(
        production_id,
        recipe = %recipe.name,
        batches = request.batches,
        total_cost = %total_cost,
        "Production registered"
    );

    get_production(conn, production_id)
}

const PRODUCTION_SELECT: &str = "SELECT p.id, p.recipe_id, COALESCE(r.name, '(deleted recipe)'), p.batches,
            p.produced_quantity, p.total_cost, p.estimated_profit, p.produced_at, p.note
     FROM productions p
     LEFT JOIN recipes r ON r.id = p.recipe_id";

fn production_from_row(row: &Row<'_>) -> rusqlite::Result<Production> {
    Ok(Production {
        id: row.get(0)?,
        recipe_id: row.get(1)?,
        recipe_name: row.get(2)?,
        batches: row.get(3)?,
        produced_quantity: decimal_at(row, 4)?,
        total_cost: decimal_at(row, 5)?,
        estimated_profit: decimal_at(row, 6)?,
        produced_at: row.get(7)?,
        note: row.get(8)?,
        outputs: Vec::new(),
    })
}

fn load_outputs(conn: &Connection, production_id: i64) -> StoreResult<Vec<ProductionOutput>> {
    let mut stmt = conn.prepare(
        "SELECT product_id, quantity, unit FROM production_outputs
         WHERE production_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map([production_id], |row| {
        Ok(ProductionOutput {
            product_id: row.get(0)?,
            quantity: decimal_at(row, 1)?,
            unit: unit_at(row, 2)?,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

fn query_productions(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Production>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, production_from_row)?;

    let mut results = Vec::new();
    for row in rows {
        let mut production = row?;
        production.outputs = load_outputs(conn, production.id)?;
        results.push(production);
    }
    Ok(results)
}

pub fn get_production(conn: &Connection, id: i64) -> StoreResult<Production> {
    query_productions(conn, &format!("{} WHERE p.id = ?1", PRODUCTION_SELECT), [id])?
        .pop()
        .ok_or_else(|| StoreError::not_found("Production", id))
}

/// All production runs, newest first
pub fn list_productions(conn: &Connection) -> StoreResult<Vec<Production>> {
    query_productions(
        conn,
        &format!("{} ORDER BY p.produced_at DESC, p.id DESC", PRODUCTION_SELECT),
        [],
    )
}

pub fn productions_for_recipe(conn: &Connection, recipe_id: i64) -> StoreResult<Vec<Production>> {
    query_productions(
        conn,
        &format!(
            "{} WHERE p.recipe_id = ?1 ORDER BY p.produced_at DESC, p.id DESC",
            PRODUCTION_SELECT
        ),
        [recipe_id],
    )
}

/// Totals across every recorded production run
#[derive(Debug, Clone, PartialEq)]
pub struct FinancialSummary {
    pub production_count: i64,
    pub total_cost: Decimal,
    pub total_profit: Decimal,
    pub average_profit: Decimal,
}

pub fn financial_summary(conn: &Connection) -> StoreResult<FinancialSummary> {
    let mut stmt = conn.prepare("SELECT total_cost, estimated_profit FROM productions")?;
    let rows = stmt.query_map([], |row| Ok((decimal_at(row, 0)?, opt_decimal_at(row, 1)?)))?;

    let mut summary = FinancialSummary {
        production_count: 0,
        total_cost: Decimal::ZERO,
        total_profit: Decimal::ZERO,
        average_profit: Decimal::ZERO,
    };
    for row in rows {
        let (cost, profit) = row?;
        summary.production_count += 1;
        summary.total_cost = sum(summary.total_cost, cost, "total cost")?;
        summary.total_profit = sum(summary.total_profit, profit.unwrap_or_default(), "total profit")?;
    }
    if summary.production_count > 0 {
        summary.average_profit = summary
            .total_profit
            .checked_div(Decimal::from(summary.production_count))
            .ok_or_else(|| overflow("average profit"))?;
    }
    Ok(summary)
}

fn sum(total: Decimal, value: Decimal, what: &str) -> Result<Decimal, PricingError> {
    total.checked_add(value).ok_or_else(|| overflow(what))
}

impl std::fmt::Display for FinancialSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::pricing::format_currency;

        writeln!(f, "=== Financial Summary ===")?;
        writeln!(f, "Productions:        {}", self.production_count)?;
        writeln!(f, "Total cost:         R$ {}", format_currency(self.total_cost))?;
        writeln!(f, "Estimated profit:   R$ {}", format_currency(self.total_profit))?;
        writeln!(f, "Average per run:    R$ {}", format_currency(self.average_profit))?;
        Ok(())
    }
}

/// Catalog-wide counts and the purchase value of the stock on hand
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardStats {
    pub product_count: i64,
    pub recipe_count: i64,
    pub production_count: i64,
    pub stock_value: Decimal,
}

pub fn dashboard_stats(conn: &Connection) -> StoreResult<DashboardStats> {
    let count = |table: &str| -> StoreResult<i64> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
    };

    let mut stock_value = Decimal::ZERO;
    for product in db::list_products(conn)? {
        let value = product
            .current_quantity
            .checked_mul(product.purchase_price)
            .ok_or_else(|| overflow("stock value"))?;
        stock_value = sum(stock_value, value, "stock value")?;
    }

    Ok(DashboardStats {
        product_count: count("products")?,
        recipe_count: count("recipes")?,
        production_count: count("productions")?,
        stock_value,
    })
}

impl std::fmt::Display for DashboardStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::pricing::format_currency;

        writeln!(f, "=== Catalog ===")?;
        writeln!(f, "Products:           {}", self.product_count)?;
        writeln!(f, "Stock value:        R$ {}", format_currency(self.stock_value))?;
        writeln!(f, "Recipes:            {}", self.recipe_count)?;
        writeln!(f, "Productions:        {}", self.production_count)?;
        Ok(())
    }
}
