//! Recipe Costing
//!
//! Product catalog, recipe costing and production tracking for small kitchens.

mod db;
mod error;
mod import;
mod models;
mod pricing;
mod production;

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::models::{Product, ProductRef, Production, ProductionOutput, Recipe, RecipeIngredient, Unit};
use crate::pricing::{format_currency, parse_cents_input, PricingOptions, SalePricePolicy, UnresolvedPolicy};
use crate::production::ProductionRequest;

#[derive(Parser)]
#[command(name = "recipe-costing")]
#[command(about = "Product catalog, recipe costing and production tracking")]
struct Cli {
    /// Path to the SQLite database
    #[arg(short, long, env = "RECIPE_COSTING_DB", default_value = "recipe_costing.db")]
    database: PathBuf,

    /// Leave ingredients with unknown products out of costs instead of failing
    #[arg(long, env = "RECIPE_COSTING_SKIP_UNRESOLVED")]
    skip_unresolved: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize empty database with schema
    Init,

    /// Import product sheets (*.csv) from a directory
    Import {
        /// Directory to scan
        dir: PathBuf,

        /// Clear existing data before importing
        #[arg(long)]
        clear: bool,
    },

    /// Add a product to the catalog
    AddProduct {
        name: String,

        /// Stock unit (UN, KG, G, MG, L, ML)
        #[arg(short, long, default_value = "UN")]
        unit: Unit,

        /// Purchase price per unit, typed as cents ("1050" or "10,50")
        #[arg(long, default_value = "0")]
        purchase: String,

        /// Sale price per unit, typed as cents
        #[arg(long, default_value = "0")]
        sale: String,

        /// Quantity on hand, when not given as packages
        #[arg(short, long)]
        quantity: Option<Decimal>,

        /// Number of packages bought
        #[arg(long)]
        packages: Option<Decimal>,

        /// Weight or volume of one package, in the stock unit
        #[arg(long)]
        weight: Option<Decimal>,
    },

    /// List all products
    Products,

    /// Delete a product no recipe uses
    DeleteProduct { id: i64 },

    /// Create a recipe
    AddRecipe(RecipeArgs),

    /// Replace a recipe's fields and ingredient list
    UpdateRecipe {
        id: i64,

        #[command(flatten)]
        recipe: RecipeArgs,
    },

    /// List recipes
    Recipes {
        /// Only recipes whose name contains this text
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show a recipe with its current pricing
    Recipe { id: i64 },

    /// Delete a recipe
    DeleteRecipe { id: i64 },

    /// Price a recipe against the current catalog, optionally with other parameters
    Cost {
        id: i64,

        /// Profit margin in percent (defaults to the recipe's)
        #[arg(short, long)]
        margin: Option<Decimal>,

        /// Number of portions per batch
        #[arg(short, long)]
        partitions: Option<i64>,

        /// Unit sale price typed as cents, instead of the suggested one
        #[arg(long)]
        sale_price: Option<String>,
    },

    /// Register a production run and update stock
    Produce {
        recipe_id: i64,

        #[arg(short, long, default_value = "1")]
        batches: i64,

        /// Units produced, when outputs are not listed
        #[arg(short, long)]
        quantity: Option<Decimal>,

        /// Finished product entered into stock, as PRODUCT_ID:QUANTITY[:UNIT] (repeatable)
        #[arg(short, long = "output")]
        outputs: Vec<String>,

        #[arg(short, long)]
        note: Option<String>,
    },

    /// List production runs, newest first
    Productions {
        #[arg(short, long)]
        recipe: Option<i64>,
    },

    /// Show one production run with its outputs
    Production { id: i64 },

    /// Cost and profit totals across production runs
    Summary,

    /// Product, recipe and production counts with the value of stock on hand
    Stats,

    /// List supported units
    Units,

    /// Load sample data for testing
    LoadSample,
}

/// Recipe fields shared by `add-recipe` and `update-recipe`
#[derive(Args)]
struct RecipeArgs {
    name: String,

    /// Units produced by one batch
    #[arg(short = 'y', long = "yield")]
    standard_yield: Decimal,

    /// Ingredient as PRODUCT:QUANTITY:UNIT, product by id or name (repeatable)
    #[arg(short, long = "ingredient")]
    ingredients: Vec<String>,

    /// Desired profit margin in percent
    #[arg(short, long, env = "RECIPE_COSTING_MARGIN", default_value = "50")]
    margin: Decimal,

    /// Split each batch into this many sellable portions
    #[arg(short, long)]
    partitions: Option<i64>,

    /// Unit sale price typed as cents; defaults to the suggested price
    #[arg(long)]
    sale_price: Option<String>,

    #[arg(short, long)]
    description: Option<String>,
}

impl RecipeArgs {
    fn into_recipe(self) -> Result<(Recipe, SalePricePolicy)> {
        let mut recipe = Recipe::new(self.name, self.standard_yield);
        recipe.description = self.description;
        recipe.profit_margin_percent = self.margin;
        if let Some(count) = self.partitions {
            recipe.is_partitioned = true;
            recipe.partition_count = count.max(1);
        }
        recipe.ingredients = self
            .ingredients
            .iter()
            .map(|s| parse_ingredient(s))
            .collect::<Result<_>>()?;

        Ok((recipe, sale_price_policy(self.sale_price.as_deref())?))
    }
}

/// Log to stderr; RUST_LOG selects the level (default info)
fn setup_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn parse_quantity(text: &str) -> Result<Decimal> {
    Decimal::from_str(&text.trim().replace(',', "."))
        .with_context(|| format!("'{}' is not a quantity", text))
}

/// Parse `PRODUCT:QUANTITY:UNIT`; the product part may itself contain ':'
fn parse_ingredient(spec: &str) -> Result<RecipeIngredient> {
    let mut parts = spec.rsplitn(3, ':');
    let (Some(unit), Some(quantity), Some(product)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(anyhow!("ingredient '{}' must look like PRODUCT:QUANTITY:UNIT", spec));
    };
    let product = ProductRef::from_str(product)?;
    if matches!(&product, ProductRef::Name(name) if name.is_empty()) {
        return Err(anyhow!("ingredient '{}' has no product", spec));
    }

    Ok(RecipeIngredient {
        product,
        quantity: parse_quantity(quantity)?,
        unit: Unit::from_str(unit)?,
        note: None,
    })
}

/// Parse `PRODUCT_ID:QUANTITY[:UNIT]`, unit defaulting to the product's own
fn parse_output(conn: &Connection, spec: &str) -> Result<ProductionOutput> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (id, quantity, unit) = match parts.as_slice() {
        [id, quantity] => (*id, *quantity, None),
        [id, quantity, unit] => (*id, *quantity, Some(Unit::from_str(unit)?)),
        _ => return Err(anyhow!("output '{}' must look like PRODUCT_ID:QUANTITY[:UNIT]", spec)),
    };
    let product_id: i64 = id
        .trim()
        .trim_start_matches('#')
        .parse()
        .with_context(|| format!("'{}' is not a product id", id))?;
    let unit = match unit {
        Some(unit) => unit,
        None => db::get_product(conn, product_id)?.unit,
    };

    Ok(ProductionOutput {
        product_id,
        quantity: parse_quantity(quantity)?,
        unit,
    })
}

fn sale_price_policy(sale_price: Option<&str>) -> Result<SalePricePolicy> {
    Ok(match sale_price {
        Some(raw) => SalePricePolicy::Override(parse_cents_input(raw)?),
        None => SalePricePolicy::Suggested,
    })
}

fn print_products(products: &[Product]) {
    println!(
        "{:>4}  {:<28} {:<4} {:>12} {:>12} {:>12}",
        "ID", "Product", "Unit", "Purchase", "Sale", "In stock"
    );
    println!("{}", "-".repeat(78));
    for p in products {
        println!(
            "{:>4}  {:<28} {:<4} {:>12} {:>12} {:>12}",
            p.id,
            p.name,
            p.unit,
            format_currency(p.purchase_price),
            format_currency(p.sale_price),
            p.current_quantity.normalize()
        );
    }
}

fn print_recipe(recipe: &Recipe, catalog: &pricing::Catalog) {
    println!("Recipe: {}", recipe.name);
    println!("  ID: {}", recipe.id);
    if let Some(description) = &recipe.description {
        println!("  Description: {}", description);
    }
    println!("  Yield: {}", recipe.standard_yield.normalize());
    println!("  Margin: {}%", recipe.profit_margin_percent.normalize());
    if recipe.is_partitioned {
        println!("  Portions per batch: {}", recipe.partition_count);
    }
    if let Some(price) = recipe.sale_price {
        println!("  Unit sale price: R$ {}", format_currency(price));
    }

    if !recipe.ingredients.is_empty() {
        println!("  Ingredients:");
        for ingredient in &recipe.ingredients {
            let name = match &ingredient.product {
                ProductRef::Id(id) => catalog
                    .get(id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| format!("#{} (missing)", id)),
                ProductRef::Name(name) => name.clone(),
            };
            print!("    {} {} {}", ingredient.quantity.normalize(), ingredient.unit, name);
            match &ingredient.note {
                Some(note) => println!(" ({})", note),
                None => println!(),
            }
        }
    }
}

fn print_production(run: &Production, catalog: &pricing::Catalog) {
    println!("Production #{}", run.id);
    println!("  Recipe: {} (#{})", run.recipe_name, run.recipe_id);
    println!("  Date: {}", run.produced_at);
    println!("  Batches: {}", run.batches);
    println!("  Produced: {}", run.produced_quantity.normalize());
    println!("  Cost: R$ {}", format_currency(run.total_cost));
    println!("  Estimated profit: R$ {}", format_currency(run.estimated_profit));
    if let Some(note) = &run.note {
        println!("  Note: {}", note);
    }

    if !run.outputs.is_empty() {
        println!("  Outputs:");
        for output in &run.outputs {
            let name = catalog
                .get(&output.product_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("#{} (missing)", output.product_id));
            println!("    {} {} {}", output.quantity.normalize(), output.unit, name);
        }
    }
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let conn = Connection::open(&cli.database)
        .with_context(|| format!("Failed to open {}", cli.database.display()))?;
    db::init_schema(&conn)?;

    let options = PricingOptions {
        unresolved: if cli.skip_unresolved {
            UnresolvedPolicy::Skip
        } else {
            UnresolvedPolicy::Fail
        },
        sale_price: SalePricePolicy::Suggested,
    };

    match cli.command {
        Commands::Init => {
            println!("Database initialized at: {}", cli.database.display());
        }

        Commands::Import { dir, clear } => {
            if clear {
                println!("Clearing existing data...");
                db::clear_all(&conn)?;
            }

            let stats = import::import_directory(&conn, &dir)?;
            println!("{}", stats);
        }

        Commands::AddProduct {
            name,
            unit,
            purchase,
            sale,
            quantity,
            packages,
            weight,
        } => {
            let product = Product {
                id: 0,
                name,
                unit,
                purchase_price: parse_cents_input(&purchase)?,
                sale_price: parse_cents_input(&sale)?,
                current_quantity: quantity.unwrap_or_default(),
                initial_quantity: Decimal::ZERO,
                weight_per_package: weight,
                package_count: packages,
            };
            let stored = db::insert_product(&conn, &product)?;
            println!(
                "Added product #{} {} ({} {} in stock)",
                stored.id,
                stored.name,
                stored.current_quantity.normalize(),
                stored.unit
            );
        }

        Commands::Products => {
            let products = db::list_products(&conn)?;
            if products.is_empty() {
                println!("No products in database. Run 'import' or 'load-sample' first.");
            } else {
                print_products(&products);
            }
        }

        Commands::DeleteProduct { id } => {
            db::delete_product(&conn, id)?;
            println!("Product #{} deleted", id);
        }

        Commands::AddRecipe(args) => {
            let (recipe, sale_price) = args.into_recipe()?;
            let options = PricingOptions { sale_price, ..options };
            let saved = db::save_recipe(&conn, &recipe, &options)?;
            println!(
                "Saved recipe #{} {} (unit sale price R$ {})",
                saved.id,
                saved.name,
                format_currency(saved.sale_price.unwrap_or_default())
            );
        }

        Commands::UpdateRecipe { id, recipe } => {
            let (recipe, sale_price) = recipe.into_recipe()?;
            let options = PricingOptions { sale_price, ..options };
            let updated = db::update_recipe(&conn, id, &recipe, &options)?;
            println!(
                "Updated recipe #{} {} (unit sale price R$ {})",
                updated.id,
                updated.name,
                format_currency(updated.sale_price.unwrap_or_default())
            );
        }

        Commands::Recipes { search } => {
            let recipes = match search {
                Some(fragment) => db::search_recipes(&conn, &fragment)?,
                None => db::list_recipes(&conn)?,
            };
            if recipes.is_empty() {
                println!("No recipes found.");
            } else {
                println!("{:>4}  {:<30} {:>8} {:>12} {:>12}", "ID", "Recipe", "Yield", "Unit price", "Ingredients");
                println!("{}", "-".repeat(72));
                for r in recipes {
                    println!(
                        "{:>4}  {:<30} {:>8} {:>12} {:>12}",
                        r.id,
                        r.name,
                        r.standard_yield.normalize(),
                        r.sale_price.map(format_currency).unwrap_or_else(|| "-".to_string()),
                        r.ingredients.len()
                    );
                }
            }
        }

        Commands::Recipe { id } => {
            let recipe = db::get_recipe(&conn, id)?;
            let catalog = db::load_catalog(&conn)?;
            print_recipe(&recipe, &catalog);

            let committed = PricingOptions {
                sale_price: recipe
                    .sale_price
                    .map_or(SalePricePolicy::Suggested, SalePricePolicy::Override),
                ..options
            };
            println!();
            println!("{}", pricing::price_recipe(&recipe, &catalog, &committed)?);
        }

        Commands::DeleteRecipe { id } => {
            db::delete_recipe(&conn, id)?;
            println!("Recipe #{} deleted", id);
        }

        Commands::Cost {
            id,
            margin,
            partitions,
            sale_price,
        } => {
            let mut recipe = db::get_recipe(&conn, id)?;
            if let Some(margin) = margin {
                recipe.profit_margin_percent = margin;
            }
            if let Some(count) = partitions {
                recipe.is_partitioned = true;
                recipe.partition_count = count.max(1);
            }

            let catalog = db::load_catalog(&conn)?;
            let options = PricingOptions {
                sale_price: sale_price_policy(sale_price.as_deref())?,
                ..options
            };
            println!("{}", pricing::price_recipe(&recipe, &catalog, &options)?);
        }

        Commands::Produce {
            recipe_id,
            batches,
            quantity,
            outputs,
            note,
        } => {
            let outputs = outputs
                .iter()
                .map(|s| parse_output(&conn, s))
                .collect::<Result<Vec<_>>>()?;
            let request = ProductionRequest {
                recipe_id,
                batches,
                produced_quantity: quantity,
                outputs,
                note,
            };

            let run = production::register_production(&conn, &request)?;
            println!(
                "Registered production #{} of {}: {} batch(es), cost R$ {}, estimated profit R$ {}",
                run.id,
                run.recipe_name,
                run.batches,
                format_currency(run.total_cost),
                format_currency(run.estimated_profit)
            );
        }

        Commands::Productions { recipe } => {
            let runs = match recipe {
                Some(recipe_id) => production::productions_for_recipe(&conn, recipe_id)?,
                None => production::list_productions(&conn)?,
            };
            if runs.is_empty() {
                println!("No production runs recorded.");
            } else {
                println!(
                    "{:>4}  {:<23} {:<24} {:>7} {:>12} {:>12}",
                    "ID", "Date", "Recipe", "Batches", "Cost", "Profit"
                );
                println!("{}", "-".repeat(88));
                for run in runs {
                    println!(
                        "{:>4}  {:<23} {:<24} {:>7} {:>12} {:>12}",
                        run.id,
                        run.produced_at,
                        run.recipe_name,
                        run.batches,
                        format_currency(run.total_cost),
                        format_currency(run.estimated_profit)
                    );
                }
            }
        }

        Commands::Production { id } => {
            let run = production::get_production(&conn, id)?;
            print_production(&run, &db::load_catalog(&conn)?);
        }

        Commands::Summary => {
            println!("{}", production::financial_summary(&conn)?);
        }

        Commands::Stats => {
            println!("{}", production::dashboard_stats(&conn)?);
        }

        Commands::Units => {
            for unit in Unit::ALL {
                println!("  {:<3} {}", unit, unit.description());
            }
        }

        Commands::LoadSample => {
            load_sample_data(&conn)?;
            println!("Sample data loaded successfully!");
        }
    }

    Ok(())
}

fn sample_product(name: &str, unit: Unit, purchase: &str, packages: &str, weight: Option<&str>) -> Result<Product> {
    Ok(Product {
        id: 0,
        name: name.to_string(),
        unit,
        purchase_price: parse_cents_input(purchase)?,
        sale_price: Decimal::ZERO,
        current_quantity: Decimal::ZERO,
        initial_quantity: Decimal::ZERO,
        weight_per_package: weight.map(parse_quantity).transpose()?,
        package_count: Some(parse_quantity(packages)?),
    })
}

/// Load a small bakery catalog with two recipes
fn load_sample_data(conn: &Connection) -> Result<()> {
    db::clear_all(conn)?;

    let products = [
        sample_product("Farinha de Trigo", Unit::Kg, "5,49", "5", Some("1"))?,
        sample_product("Peito de Frango", Unit::Kg, "18,90", "2", Some("1,5"))?,
        sample_product("Leite", Unit::L, "4,79", "12", Some("1"))?,
        sample_product("Manteiga", Unit::Kg, "45,00", "4", Some("0,2"))?,
        sample_product("Ovo", Unit::Un, "0,80", "30", None)?,
        sample_product("Leite Condensado", Unit::G, "0,02", "6", Some("395"))?,
        sample_product("Chocolate em Pó", Unit::G, "0,05", "2", Some("200"))?,
        sample_product("Coxinha", Unit::Un, "0,00", "0", None)?,
        sample_product("Brigadeiro", Unit::Un, "0,00", "0", None)?,
    ];
    for product in &products {
        db::insert_product(conn, product)?;
    }

    let options = PricingOptions::default();

    let mut coxinha = Recipe::new("Coxinha", Decimal::from(40));
    coxinha.description = Some("Massa de batata com recheio de frango".to_string());
    coxinha.ingredients = vec![
        parse_ingredient("Farinha de Trigo:500:G")?,
        parse_ingredient("Peito de Frango:1:KG")?,
        parse_ingredient("Leite:0,5:L")?,
        parse_ingredient("Manteiga:50:G")?,
    ];
    db::save_recipe(conn, &coxinha, &options)?;

    let mut brigadeiro = Recipe::new("Brigadeiro", Decimal::from(30));
    brigadeiro.profit_margin_percent = Decimal::from(80);
    brigadeiro.is_partitioned = true;
    brigadeiro.partition_count = 3;
    brigadeiro.ingredients = vec![
        parse_ingredient("Leite Condensado:395:G")?,
        parse_ingredient("Chocolate em Pó:30:G")?,
        parse_ingredient("Manteiga:20:G")?,
    ];
    db::save_recipe(conn, &brigadeiro, &options)?;

    println!("Loaded {} sample products and 2 recipes", products.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ingredient_specs() {
        let ingredient = parse_ingredient("Farinha de Trigo:0,5:kg").unwrap();
        assert_eq!(ingredient.product, ProductRef::Name("Farinha de Trigo".to_string()));
        assert_eq!(ingredient.quantity, Decimal::new(5, 1));
        assert_eq!(ingredient.unit, Unit::Kg);

        let ingredient = parse_ingredient("12:3:UN").unwrap();
        assert_eq!(ingredient.product, ProductRef::Id(12));

        assert!(parse_ingredient("Farinha:2").is_err());
        assert!(parse_ingredient(":2:KG").is_err());
        assert!(parse_ingredient("Farinha:dois:KG").is_err());
    }

    #[test]
    fn sample_data_prices_both_recipes() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        load_sample_data(&conn).unwrap();

        let recipes = db::list_recipes(&conn).unwrap();
        assert_eq!(recipes.len(), 2);
        assert!(recipes.iter().all(|r| r.sale_price.unwrap() > Decimal::ZERO));

        let frango = db::find_product_by_name(&conn, "peito de frango").unwrap().unwrap();
        assert_eq!(frango.current_quantity, Decimal::from(3));
    }

    #[test]
    fn recipe_args_build_a_partitioned_recipe() {
        let cli = Cli::try_parse_from([
            "recipe-costing",
            "update-recipe",
            "3",
            "Brigadeiro",
            "-y",
            "30",
            "-i",
            "Leite Condensado:395:G",
            "--partitions",
            "0",
            "--sale-price",
            "1,20",
        ])
        .unwrap();
        let Commands::UpdateRecipe { id, recipe } = cli.command else {
            panic!("expected update-recipe");
        };
        assert_eq!(id, 3);

        let (recipe, sale_price) = recipe.into_recipe().unwrap();
        assert_eq!(recipe.name, "Brigadeiro");
        assert!(recipe.is_partitioned);
        assert_eq!(recipe.partition_count, 1);
        assert_eq!(recipe.ingredients.len(), 1);
        assert_eq!(sale_price, SalePricePolicy::Override(Decimal::new(120, 2)));
    }

    #[test]
    fn sale_price_override_reads_cents() {
        assert_eq!(
            sale_price_policy(Some("5,50")).unwrap(),
            SalePricePolicy::Override(Decimal::new(550, 2))
        );
        assert_eq!(sale_price_policy(None).unwrap(), SalePricePolicy::Suggested);
    }
}
