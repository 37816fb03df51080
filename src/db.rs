//! Database schema and operations

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::{PricingError, StoreError};
use crate::models::{Product, ProductRef, Recipe, RecipeIngredient, Unit};
use crate::pricing::{self, Catalog, PricingOptions};

pub type StoreResult<T> = Result<T, StoreError>;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        -- Stocked items; money and quantities are decimal strings
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            unit TEXT NOT NULL,
            purchase_price TEXT NOT NULL,
            sale_price TEXT NOT NULL,
            current_quantity TEXT NOT NULL,
            initial_quantity TEXT NOT NULL,
            weight_per_package TEXT,
            package_count TEXT
        );

        CREATE TABLE IF NOT EXISTS recipes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            standard_yield TEXT NOT NULL,
            profit_margin_percent TEXT NOT NULL,
            is_partitioned INTEGER NOT NULL DEFAULT 0,
            partition_count INTEGER NOT NULL DEFAULT 1,
            sale_price TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Bill of materials, in recipe order
        CREATE TABLE IF NOT EXISTS recipe_ingredients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipe_id INTEGER NOT NULL,
            product_id INTEGER NOT NULL,
            quantity TEXT NOT NULL,
            unit TEXT NOT NULL,
            note TEXT
        );

        CREATE TABLE IF NOT EXISTS productions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipe_id INTEGER NOT NULL,
            batches INTEGER NOT NULL,
            produced_quantity TEXT NOT NULL,
            total_cost TEXT NOT NULL,
            estimated_profit TEXT NOT NULL,
            produced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            note TEXT
        );

        CREATE TABLE IF NOT EXISTS production_outputs (
            production_id INTEGER NOT NULL,
            product_id INTEGER NOT NULL,
            quantity TEXT NOT NULL,
            unit TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
        CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_product ON recipe_ingredients(product_id);
        CREATE INDEX IF NOT EXISTS idx_productions_recipe ON productions(recipe_id);
        CREATE INDEX IF NOT EXISTS idx_production_outputs_production ON production_outputs(production_id);
        "#,
    )?;
    Ok(())
}

/// Remove every product, recipe and production
pub fn clear_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        DELETE FROM production_outputs;
        DELETE FROM productions;
        DELETE FROM recipe_ingredients;
        DELETE FROM recipes;
        DELETE FROM products;
        "#,
    )?;
    Ok(())
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Decimal::from_str(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn unit_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Unit> {
    let text: String = row.get(idx)?;
    Unit::from_str(&text).map_err(|e| conversion_error(idx, e))
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

const PRODUCT_COLUMNS: &str = "id, name, unit, purchase_price, sale_price, current_quantity, \
     initial_quantity, weight_per_package, package_count";

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        unit: unit_at(row, 2)?,
        purchase_price: decimal_at(row, 3)?,
        sale_price: decimal_at(row, 4)?,
        current_quantity: decimal_at(row, 5)?,
        initial_quantity: decimal_at(row, 6)?,
        weight_per_package: opt_decimal_at(row, 7)?,
        package_count: opt_decimal_at(row, 8)?,
    })
}

fn validate_product(product: &Product) -> StoreResult<()> {
    if product.name.trim().is_empty() {
        return Err(StoreError::Validation("product name is required".to_string()));
    }
    if product.purchase_price < Decimal::ZERO || product.sale_price < Decimal::ZERO {
        return Err(StoreError::Validation(format!(
            "prices of '{}' must not be negative",
            product.name
        )));
    }
    Ok(())
}

/// Stock of a product as it will be stored: quantity derived from package
/// decomposition, initial quantity defaulting to the derived quantity
fn with_derived_stock(product: &Product) -> StoreResult<Product> {
    let mut stored = product.clone();
    stored.name = product.name.trim().to_string();
    stored.current_quantity = pricing::compute_stock_quantity(product)?;
    if stored.initial_quantity.is_zero() {
        stored.initial_quantity = stored.current_quantity;
    }
    Ok(stored)
}

/// Insert a product, returning it with its assigned id
pub fn insert_product(conn: &Connection, product: &Product) -> StoreResult<Product> {
    validate_product(product)?;
    let mut stored = with_derived_stock(product)?;

    conn.execute(
        "INSERT INTO products (name, unit, purchase_price, sale_price, current_quantity,
                               initial_quantity, weight_per_package, package_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            stored.name,
            stored.unit.code(),
            stored.purchase_price.to_string(),
            stored.sale_price.to_string(),
            stored.current_quantity.to_string(),
            stored.initial_quantity.to_string(),
            stored.weight_per_package.map(|d| d.to_string()),
            stored.package_count.map(|d| d.to_string()),
        ],
    )?;
    stored.id = conn.last_insert_rowid();

    debug!(id = stored.id, name = %stored.name, quantity = %stored.current_quantity, "Product inserted");
    Ok(stored)
}

/// Overwrite an existing product, re-deriving its stock quantity
pub fn update_product(conn: &Connection, product: &Product) -> StoreResult<Product> {
    validate_product(product)?;
    let stored = with_derived_stock(product)?;

    let changed = conn.execute(
        "UPDATE products SET name = ?2, unit = ?3, purchase_price = ?4, sale_price = ?5,
                current_quantity = ?6, initial_quantity = ?7, weight_per_package = ?8,
                package_count = ?9
         WHERE id = ?1",
        params![
            stored.id,
            stored.name,
            stored.unit.code(),
            stored.purchase_price.to_string(),
            stored.sale_price.to_string(),
            stored.current_quantity.to_string(),
            stored.initial_quantity.to_string(),
            stored.weight_per_package.map(|d| d.to_string()),
            stored.package_count.map(|d| d.to_string()),
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("Product", stored.id));
    }
    Ok(stored)
}

pub fn get_product(conn: &Connection, id: i64) -> StoreResult<Product> {
    conn.query_row(
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
        [id],
        product_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Product", id))
}

/// Case-insensitive exact name lookup
pub fn find_product_by_name(conn: &Connection, name: &str) -> StoreResult<Option<Product>> {
    let product = conn
        .query_row(
            &format!(
                "SELECT {} FROM products WHERE lower(name) = lower(?1) ORDER BY id LIMIT 1",
                PRODUCT_COLUMNS
            ),
            [name.trim()],
            product_from_row,
        )
        .optional()?;
    Ok(product)
}

/// List all products in the database
pub fn list_products(conn: &Connection) -> StoreResult<Vec<Product>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM products ORDER BY name COLLATE NOCASE",
        PRODUCT_COLUMNS
    ))?;

    let rows = stmt.query_map([], product_from_row)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// All products keyed by id, ready for the pricing engine
pub fn load_catalog(conn: &Connection) -> StoreResult<Catalog> {
    Ok(list_products(conn)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect())
}

/// Delete a product that no recipe uses
pub fn delete_product(conn: &Connection, id: i64) -> StoreResult<()> {
    let used_by: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT r.name FROM recipes r
             JOIN recipe_ingredients ri ON ri.recipe_id = r.id
             WHERE ri.product_id = ?1
             ORDER BY r.name",
        )?;
        let rows = stmt.query_map([id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    if !used_by.is_empty() {
        return Err(StoreError::Validation(format!(
            "product #{} is used by recipes: {}",
            id,
            used_by.join(", ")
        )));
    }

    let deleted = conn.execute("DELETE FROM products WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(StoreError::not_found("Product", id));
    }
    info!(id, "Product deleted");
    Ok(())
}

fn set_quantity(conn: &Connection, id: i64, quantity: Decimal) -> StoreResult<()> {
    conn.execute(
        "UPDATE products SET current_quantity = ?2 WHERE id = ?1",
        params![id, quantity.to_string()],
    )?;
    Ok(())
}

/// Add `quantity` (in the product's own unit) to stock
pub fn add_stock(conn: &Connection, id: i64, quantity: Decimal) -> StoreResult<Product> {
    if quantity < Decimal::ZERO {
        return Err(StoreError::Validation(format!(
            "cannot add a negative quantity ({}) to stock",
            quantity
        )));
    }
    let mut product = get_product(conn, id)?;
    product.current_quantity = product
        .current_quantity
        .checked_add(quantity)
        .ok_or_else(|| pricing::overflow("stock quantity"))?;
    set_quantity(conn, id, product.current_quantity)?;
    Ok(product)
}

/// Remove `quantity` (in the product's own unit) from stock
pub fn deduct_stock(conn: &Connection, id: i64, quantity: Decimal) -> StoreResult<Product> {
    if quantity < Decimal::ZERO {
        return Err(StoreError::Validation(format!(
            "cannot deduct a negative quantity ({}) from stock",
            quantity
        )));
    }
    let mut product = get_product(conn, id)?;
    if product.current_quantity < quantity {
        return Err(StoreError::InsufficientStock {
            product: product.name,
            available: product.current_quantity,
            needed: quantity,
            unit: product.unit,
        });
    }
    product.current_quantity -= quantity;
    set_quantity(conn, id, product.current_quantity)?;
    Ok(product)
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

const RECIPE_COLUMNS: &str = "id, name, description, standard_yield, profit_margin_percent, \
     is_partitioned, partition_count, sale_price";

fn recipe_from_row(row: &Row<'_>) -> rusqlite::Result<Recipe> {
    Ok(Recipe {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        standard_yield: decimal_at(row, 3)?,
        profit_margin_percent: decimal_at(row, 4)?,
        is_partitioned: row.get(5)?,
        partition_count: row.get(6)?,
        sale_price: opt_decimal_at(row, 7)?,
        ingredients: Vec::new(),
    })
}

fn load_ingredients(conn: &Connection, recipe_id: i64) -> StoreResult<Vec<RecipeIngredient>> {
    let mut stmt = conn.prepare(
        "SELECT product_id, quantity, unit, note
         FROM recipe_ingredients
         WHERE recipe_id = ?1
         ORDER BY id",
    )?;

    let rows = stmt.query_map([recipe_id], |row| {
        Ok(RecipeIngredient {
            product: ProductRef::Id(row.get(0)?),
            quantity: decimal_at(row, 1)?,
            unit: unit_at(row, 2)?,
            note: row.get(3)?,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

fn validate_recipe(recipe: &Recipe) -> StoreResult<()> {
    if recipe.name.trim().is_empty() {
        return Err(StoreError::Validation("recipe name is required".to_string()));
    }
    if recipe.standard_yield <= Decimal::ZERO {
        return Err(StoreError::Validation(
            "standard yield must be greater than zero".to_string(),
        ));
    }
    if recipe.profit_margin_percent < Decimal::ZERO {
        return Err(StoreError::Validation(
            "profit margin must not be negative".to_string(),
        ));
    }
    if recipe.is_partitioned && recipe.partition_count < 1 {
        return Err(StoreError::Validation(
            "partition count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Point every ingredient at an existing product id, by id or by name
fn resolve_ingredients(conn: &Connection, recipe: &Recipe) -> StoreResult<Vec<RecipeIngredient>> {
    let mut resolved = Vec::with_capacity(recipe.ingredients.len());

    for ingredient in &recipe.ingredients {
        let product = match &ingredient.product {
            ProductRef::Id(id) => match get_product(conn, *id) {
                Ok(product) => Some(product),
                Err(StoreError::NotFound { .. }) => None,
                Err(e) => return Err(e),
            },
            ProductRef::Name(name) => find_product_by_name(conn, name)?,
        };
        let Some(product) = product else {
            return Err(StoreError::not_found("Product", &ingredient.product));
        };

        if ingredient.quantity <= Decimal::ZERO {
            return Err(StoreError::Validation(format!(
                "quantity of {} must be greater than zero",
                product.name
            )));
        }

        resolved.push(RecipeIngredient {
            product: ProductRef::Id(product.id),
            ..ingredient.clone()
        });
    }

    Ok(resolved)
}

fn name_taken(conn: &Connection, name: &str, except_id: i64) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM recipes WHERE lower(name) = lower(?1) AND id != ?2",
        params![name.trim(), except_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Validate, resolve and price a recipe into the form it is stored in
fn prepare_recipe(
    conn: &Connection,
    recipe: &Recipe,
    except_id: i64,
    options: &PricingOptions,
) -> StoreResult<Recipe> {
    validate_recipe(recipe)?;
    if name_taken(conn, &recipe.name, except_id)? {
        return Err(StoreError::Duplicate(recipe.name.trim().to_string()));
    }

    let mut prepared = recipe.clone();
    prepared.name = recipe.name.trim().to_string();
    prepared.ingredients = resolve_ingredients(conn, recipe)?;
    if !prepared.is_partitioned {
        prepared.partition_count = 1;
    }

    let catalog = load_catalog(conn)?;
    let breakdown = pricing::price_recipe(&prepared, &catalog, options)?;
    prepared.sale_price = Some(breakdown.sale_price);
    Ok(prepared)
}

fn insert_ingredients(conn: &Connection, recipe_id: i64, ingredients: &[RecipeIngredient]) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO recipe_ingredients (recipe_id, product_id, quantity, unit, note)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for ingredient in ingredients {
        let ProductRef::Id(product_id) = ingredient.product else {
            return Err(PricingError::UnresolvedReference(ingredient.product.clone()).into());
        };
        stmt.execute(params![
            recipe_id,
            product_id,
            ingredient.quantity.to_string(),
            ingredient.unit.code(),
            ingredient.note,
        ])?;
    }
    Ok(())
}

/// Create a recipe; its unit sale price is derived from the ingredient costs
pub fn save_recipe(conn: &Connection, recipe: &Recipe, options: &PricingOptions) -> StoreResult<Recipe> {
    let mut prepared = prepare_recipe(conn, recipe, 0, options)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO recipes (name, description, standard_yield, profit_margin_percent,
                              is_partitioned, partition_count, sale_price)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            prepared.name,
            prepared.description,
            prepared.standard_yield.to_string(),
            prepared.profit_margin_percent.to_string(),
            prepared.is_partitioned,
            prepared.partition_count,
            prepared.sale_price.map(|d| d.to_string()),
        ],
    )?;
    prepared.id = tx.last_insert_rowid();
    insert_ingredients(&tx, prepared.id, &prepared.ingredients)?;
    tx.commit()?;

    info!(id = prepared.id, name = %prepared.name, "Recipe saved");
    Ok(prepared)
}

/// Replace a recipe's fields and its whole ingredient list
pub fn update_recipe(
    conn: &Connection,
    id: i64,
    recipe: &Recipe,
    options: &PricingOptions,
) -> StoreResult<Recipe> {
    get_recipe(conn, id)?;
    let mut prepared = prepare_recipe(conn, recipe, id, options)?;
    prepared.id = id;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE recipes SET name = ?2, description = ?3, standard_yield = ?4,
                profit_margin_percent = ?5, is_partitioned = ?6, partition_count = ?7,
                sale_price = ?8, updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id,
            prepared.name,
            prepared.description,
            prepared.standard_yield.to_string(),
            prepared.profit_margin_percent.to_string(),
            prepared.is_partitioned,
            prepared.partition_count,
            prepared.sale_price.map(|d| d.to_string()),
        ],
    )?;
    tx.execute("DELETE FROM recipe_ingredients WHERE recipe_id = ?1", [id])?;
    insert_ingredients(&tx, id, &prepared.ingredients)?;
    tx.commit()?;

    info!(id, name = %prepared.name, "Recipe updated");
    Ok(prepared)
}

/// Get a recipe with its ingredients
pub fn get_recipe(conn: &Connection, id: i64) -> StoreResult<Recipe> {
    let mut recipe = conn
        .query_row(
            &format!("SELECT {} FROM recipes WHERE id = ?1", RECIPE_COLUMNS),
            [id],
            recipe_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("Recipe", id))?;
    recipe.ingredients = load_ingredients(conn, id)?;
    Ok(recipe)
}

fn query_recipes(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Recipe>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, recipe_from_row)?;

    let mut results = Vec::new();
    for row in rows {
        let mut recipe = row?;
        recipe.ingredients = load_ingredients(conn, recipe.id)?;
        results.push(recipe);
    }
    Ok(results)
}

/// List all recipes with their ingredients
pub fn list_recipes(conn: &Connection) -> StoreResult<Vec<Recipe>> {
    query_recipes(
        conn,
        &format!("SELECT {} FROM recipes ORDER BY name COLLATE NOCASE", RECIPE_COLUMNS),
        [],
    )
}

/// Recipes whose name contains `fragment`, ignoring case
pub fn search_recipes(conn: &Connection, fragment: &str) -> StoreResult<Vec<Recipe>> {
    let pattern = format!("%{}%", fragment.trim().to_lowercase());
    query_recipes(
        conn,
        &format!(
            "SELECT {} FROM recipes WHERE lower(name) LIKE ?1 ORDER BY name COLLATE NOCASE",
            RECIPE_COLUMNS
        ),
        [pattern],
    )
}

/// Delete a recipe and its ingredient lines
pub fn delete_recipe(conn: &Connection, id: i64) -> StoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM recipe_ingredients WHERE recipe_id = ?1", [id])?;
    let deleted = tx.execute("DELETE FROM recipes WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(StoreError::not_found("Recipe", id));
    }
    tx.commit()?;
    info!(id, "Recipe deleted");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    pub(crate) fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    pub(crate) fn new_product(name: &str, unit: Unit, purchase_price: &str, quantity: &str) -> Product {
        Product {
            id: 0,
            name: name.to_string(),
            unit,
            purchase_price: dec(purchase_price),
            sale_price: Decimal::ZERO,
            current_quantity: dec(quantity),
            initial_quantity: Decimal::ZERO,
            weight_per_package: None,
            package_count: None,
        }
    }

    pub(crate) fn ingredient(product: ProductRef, quantity: &str, unit: Unit) -> RecipeIngredient {
        RecipeIngredient {
            product,
            quantity: dec(quantity),
            unit,
            note: None,
        }
    }

    #[test]
    fn product_quantity_derived_from_packages() {
        let conn = memory_db();
        let mut p = new_product("Farinha", Unit::Kg, "5", "0");
        p.package_count = Some(dec("2"));
        p.weight_per_package = Some(dec("1.5"));

        let stored = insert_product(&conn, &p).unwrap();
        assert!(stored.id > 0);

        let loaded = get_product(&conn, stored.id).unwrap();
        assert_eq!(loaded.current_quantity, dec("3"));
        assert_eq!(loaded.initial_quantity, dec("3"));
        assert_eq!(loaded.package_count, Some(dec("2")));
    }

    #[test]
    fn product_requires_name() {
        let conn = memory_db();
        let p = new_product("  ", Unit::Un, "1", "1");
        assert!(matches!(insert_product(&conn, &p), Err(StoreError::Validation(_))));
    }

    #[test]
    fn finds_product_by_name_ignoring_case() {
        let conn = memory_db();
        insert_product(&conn, &new_product("Leite Condensado", Unit::G, "0.02", "395")).unwrap();
        let found = find_product_by_name(&conn, "leite condensado").unwrap().unwrap();
        assert_eq!(found.unit, Unit::G);
        assert!(find_product_by_name(&conn, "creme").unwrap().is_none());
    }

    #[test]
    fn stock_moves() {
        let conn = memory_db();
        let p = insert_product(&conn, &new_product("Ovo", Unit::Un, "0.8", "12")).unwrap();

        add_stock(&conn, p.id, dec("6")).unwrap();
        let after = deduct_stock(&conn, p.id, dec("10")).unwrap();
        assert_eq!(after.current_quantity, dec("8"));

        let err = deduct_stock(&conn, p.id, dec("9")).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { .. }));
        assert_eq!(get_product(&conn, p.id).unwrap().current_quantity, dec("8"));

        assert!(matches!(
            add_stock(&conn, p.id, Decimal::MAX),
            Err(StoreError::Pricing(PricingError::InvalidInput(_)))
        ));
        assert_eq!(get_product(&conn, p.id).unwrap().current_quantity, dec("8"));
    }

    #[test]
    fn saves_and_prices_recipe() {
        let conn = memory_db();
        let farinha = insert_product(&conn, &new_product("Farinha", Unit::Kg, "5", "10")).unwrap();
        insert_product(&conn, &new_product("Frango", Unit::Kg, "10", "10")).unwrap();

        let mut recipe = Recipe::new("Coxinha", dec("10"));
        recipe.ingredients = vec![
            ingredient(ProductRef::Id(farinha.id), "2", Unit::Kg),
            ingredient(ProductRef::Name("frango".to_string()), "3000", Unit::G),
        ];

        let saved = save_recipe(&conn, &recipe, &PricingOptions::default()).unwrap();
        assert_eq!(saved.sale_price, Some(dec("6")));

        let loaded = get_recipe(&conn, saved.id).unwrap();
        assert_eq!(loaded.ingredients.len(), 2);
        assert!(matches!(loaded.ingredients[1].product, ProductRef::Id(_)));
        assert_eq!(loaded.ingredients[1].unit, Unit::G);
        assert_eq!(loaded.sale_price, Some(dec("6")));
    }

    #[test]
    fn recipe_names_are_unique() {
        let conn = memory_db();
        save_recipe(&conn, &Recipe::new("Brigadeiro", dec("30")), &PricingOptions::default()).unwrap();
        let err = save_recipe(&conn, &Recipe::new("brigadeiro", dec("20")), &PricingOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn recipe_rejects_bad_input() {
        let conn = memory_db();
        let err = save_recipe(&conn, &Recipe::new("Pudim", Decimal::ZERO), &PricingOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let mut recipe = Recipe::new("Pudim", dec("8"));
        recipe.ingredients = vec![ingredient(ProductRef::Name("Ovo".to_string()), "4", Unit::Un)];
        let err = save_recipe(&conn, &recipe, &PricingOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "Product", .. }));
    }

    #[test]
    fn updates_replace_ingredients() {
        let conn = memory_db();
        let ovo = insert_product(&conn, &new_product("Ovo", Unit::Un, "1", "30")).unwrap();
        let leite = insert_product(&conn, &new_product("Leite", Unit::L, "4", "10")).unwrap();

        let mut recipe = Recipe::new("Pudim", dec("8"));
        recipe.ingredients = vec![ingredient(ProductRef::Id(ovo.id), "4", Unit::Un)];
        let saved = save_recipe(&conn, &recipe, &PricingOptions::default()).unwrap();

        recipe.ingredients = vec![
            ingredient(ProductRef::Id(ovo.id), "6", Unit::Un),
            ingredient(ProductRef::Id(leite.id), "500", Unit::Ml),
        ];
        let updated = update_recipe(&conn, saved.id, &recipe, &PricingOptions::default()).unwrap();
        // (6 x 1 + 0.5 x 4) x 1.5 / 8
        assert_eq!(updated.sale_price, Some(dec("1.5")));
        assert_eq!(get_recipe(&conn, saved.id).unwrap().ingredients.len(), 2);

        assert!(update_recipe(&conn, 999, &recipe, &PricingOptions::default()).is_err());
    }

    #[test]
    fn search_and_delete_recipes() {
        let conn = memory_db();
        let options = PricingOptions::default();
        save_recipe(&conn, &Recipe::new("Bolo de Cenoura", dec("12")), &options).unwrap();
        let chocolate = save_recipe(&conn, &Recipe::new("Bolo de Chocolate", dec("12")), &options).unwrap();
        save_recipe(&conn, &Recipe::new("Pão de Queijo", dec("40")), &options).unwrap();

        assert_eq!(search_recipes(&conn, "BOLO").unwrap().len(), 2);
        assert_eq!(list_recipes(&conn).unwrap().len(), 3);

        delete_recipe(&conn, chocolate.id).unwrap();
        assert_eq!(search_recipes(&conn, "bolo").unwrap().len(), 1);
        assert!(matches!(
            delete_recipe(&conn, chocolate.id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn product_in_use_cannot_be_deleted() {
        let conn = memory_db();
        let ovo = insert_product(&conn, &new_product("Ovo", Unit::Un, "1", "30")).unwrap();
        let mut recipe = Recipe::new("Omelete", dec("1"));
        recipe.ingredients = vec![ingredient(ProductRef::Id(ovo.id), "3", Unit::Un)];
        let saved = save_recipe(&conn, &recipe, &PricingOptions::default()).unwrap();

        assert!(matches!(delete_product(&conn, ovo.id), Err(StoreError::Validation(_))));
        delete_recipe(&conn, saved.id).unwrap();
        delete_product(&conn, ovo.id).unwrap();
        assert!(list_products(&conn).unwrap().is_empty());
    }
}
