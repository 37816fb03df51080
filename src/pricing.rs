//! Recipe costing and pricing engine
//!
//! Every function here is pure: it reads the values it is given and returns
//! a derived number or a `PricingError`. Nothing touches the database.

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, warn};

use crate::error::PricingError;
use crate::models::{Product, ProductRef, Recipe, Unit};

/// Products keyed by id
pub type Catalog = HashMap<i64, Product>;

/// What to do when an ingredient points at a product missing from the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedPolicy {
    /// Refuse to price the recipe
    #[default]
    Fail,
    /// Leave the ingredient out of the total and report it
    Skip,
}

/// Which unit sale price profit and margin are measured against
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SalePricePolicy {
    /// Commit the suggested unit price (cost plus margin, divided by yield)
    #[default]
    Suggested,
    /// Use a price entered by the operator
    Override(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PricingOptions {
    pub unresolved: UnresolvedPolicy,
    pub sale_price: SalePricePolicy,
}

/// An ingredient already normalised to its product's stock unit
#[derive(Debug, Clone, PartialEq)]
pub struct CostLine {
    pub product_id: i64,
    pub quantity: Decimal,
    pub unit: Unit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineCost {
    pub product_name: String,
    pub quantity: Decimal,
    pub unit: Unit,
    pub cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CostResult {
    pub total: Decimal,
    pub lines: Vec<LineCost>,
    pub skipped: Vec<ProductRef>,
}

fn invalid(msg: impl Into<String>) -> PricingError {
    PricingError::InvalidInput(msg.into())
}

/// Arithmetic that left the representable range
pub(crate) fn overflow(what: &str) -> PricingError {
    invalid(format!("{} is out of range", what))
}

fn require_non_negative(value: Decimal, what: &str) -> Result<(), PricingError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(invalid(format!("{} must not be negative (got {})", what, value)));
    }
    Ok(())
}

/// Derive the on-hand quantity of a product.
///
/// Discrete products count packages directly. Continuous products multiply
/// package count by package weight when a positive weight is known, and fall
/// back to the explicitly entered quantity otherwise.
pub fn compute_stock_quantity(product: &Product) -> Result<Decimal, PricingError> {
    for (value, what) in [
        (Some(product.current_quantity), "current quantity"),
        (Some(product.initial_quantity), "initial quantity"),
        (product.package_count, "package count"),
        (product.weight_per_package, "weight per package"),
    ] {
        if let Some(v) = value {
            require_non_negative(v, what)?;
        }
    }

    let explicit = if product.current_quantity.is_zero() {
        product.initial_quantity
    } else {
        product.current_quantity
    };

    if product.unit.is_discrete() {
        return match product.package_count {
            Some(count) if !count.fract().is_zero() => Err(invalid(format!(
                "{} is tracked in UN, item count must be whole (got {})",
                product.name, count
            ))),
            Some(count) => Ok(count),
            None => Ok(explicit),
        };
    }

    match (product.package_count, product.weight_per_package) {
        (Some(count), Some(weight)) if weight > Decimal::ZERO => count
            .checked_mul(weight)
            .ok_or_else(|| invalid("stock quantity overflow")),
        _ => Ok(explicit),
    }
}

/// Sum purchase price x quantity over the ingredient lines.
///
/// No unit conversion happens here; lines must already be expressed in the
/// unit the product is priced in.
pub fn compute_cost(
    lines: &[CostLine],
    catalog: &Catalog,
    policy: UnresolvedPolicy,
) -> Result<CostResult, PricingError> {
    let mut result = CostResult::default();

    for line in lines {
        require_non_negative(line.quantity, "ingredient quantity")?;

        let Some(product) = catalog.get(&line.product_id) else {
            match policy {
                UnresolvedPolicy::Fail => {
                    return Err(PricingError::UnresolvedReference(ProductRef::Id(
                        line.product_id,
                    )))
                }
                UnresolvedPolicy::Skip => {
                    warn!(product_id = line.product_id, "Ingredient skipped, product not in catalog");
                    result.skipped.push(ProductRef::Id(line.product_id));
                    continue;
                }
            }
        };

        let cost = product
            .purchase_price
            .checked_mul(line.quantity)
            .ok_or_else(|| invalid("ingredient cost overflow"))?;
        result.total = result
            .total
            .checked_add(cost)
            .ok_or_else(|| invalid("total cost overflow"))?;
        result.lines.push(LineCost {
            product_name: product.name.clone(),
            quantity: line.quantity,
            unit: line.unit,
            cost,
        });
    }

    Ok(result)
}

/// Cost plus margin. The result prices the whole batch, not one unit.
pub fn compute_suggested_price(
    total_cost: Decimal,
    margin_percent: Decimal,
) -> Result<Decimal, PricingError> {
    require_non_negative(total_cost, "total cost")?;
    require_non_negative(margin_percent, "profit margin")?;
    let markup = margin_percent
        .checked_div(Decimal::ONE_HUNDRED)
        .and_then(|fraction| fraction.checked_add(Decimal::ONE))
        .ok_or_else(|| overflow("profit margin"))?;
    total_cost
        .checked_mul(markup)
        .ok_or_else(|| overflow("suggested price"))
}

pub fn compute_unit_price(
    suggested_price: Decimal,
    standard_yield: Decimal,
) -> Result<Decimal, PricingError> {
    if standard_yield <= Decimal::ZERO {
        return Err(invalid(format!(
            "standard yield must be positive (got {})",
            standard_yield
        )));
    }
    suggested_price
        .checked_div(standard_yield)
        .ok_or_else(|| overflow("unit price"))
}

pub fn compute_partition_price(
    suggested_price: Decimal,
    partition_count: i64,
) -> Result<Decimal, PricingError> {
    if partition_count < 1 {
        return Err(invalid(format!(
            "partition count must be at least 1 (got {})",
            partition_count
        )));
    }
    suggested_price
        .checked_div(Decimal::from(partition_count))
        .ok_or_else(|| overflow("partition price"))
}

/// Revenue of one batch at `unit_price` minus what the batch cost
pub fn compute_estimated_profit(
    unit_price: Decimal,
    standard_yield: Decimal,
    total_cost: Decimal,
) -> Result<Decimal, PricingError> {
    unit_price
        .checked_mul(standard_yield)
        .and_then(|revenue| revenue.checked_sub(total_cost))
        .ok_or_else(|| overflow("estimated profit"))
}

/// Profit as a percentage of cost; zero when there is no cost to measure against
pub fn compute_profit_margin_percent(
    profit: Decimal,
    total_cost: Decimal,
) -> Result<Decimal, PricingError> {
    if total_cost <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    profit
        .checked_div(total_cost)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or_else(|| overflow("profit margin"))
}

/// Read a masked currency field: every digit typed counts as one cent.
///
/// "1050", "10,50" and "R$ 10,50" all read as 10.50; no digits reads as 0.
pub fn parse_cents_input(raw: &str) -> Result<Decimal, PricingError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let cents: i128 = digits
        .parse()
        .map_err(|_| invalid(format!("currency value too large: {}", raw.trim())))?;
    Decimal::try_from_i128_with_scale(cents, 2)
        .map_err(|_| invalid(format!("currency value too large: {}", raw.trim())))
}

/// Round to cents, half away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Format as "1.234,56" (two decimals, dot thousands separator)
pub fn format_currency(value: Decimal) -> String {
    let mut rounded = round_money(value);
    rounded.rescale(2);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = rounded.abs().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{}{},{}", if negative { "-" } else { "" }, grouped, frac_part)
}

/// Full pricing of a recipe against a catalog
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBreakdown {
    pub recipe_name: String,
    pub standard_yield: Decimal,
    pub margin_percent: Decimal,
    pub cost: CostResult,
    pub suggested_price: Decimal,
    pub suggested_unit_price: Decimal,
    pub sale_price: Decimal,
    pub partition_count: Option<i64>,
    pub partition_price: Option<Decimal>,
    pub estimated_profit: Decimal,
    pub realised_margin_percent: Decimal,
}

fn resolve<'a>(product: &ProductRef, catalog: &'a Catalog) -> Option<&'a Product> {
    match product {
        ProductRef::Id(id) => catalog.get(id),
        ProductRef::Name(name) => {
            let wanted = name.trim().to_lowercase();
            catalog.values().find(|p| p.name.to_lowercase() == wanted)
        }
    }
}

/// Normalise a recipe's ingredients to stock units and run the whole chain:
/// cost, suggested price, unit price, partition price, profit and margin.
pub fn price_recipe(
    recipe: &Recipe,
    catalog: &Catalog,
    options: &PricingOptions,
) -> Result<PriceBreakdown, PricingError> {
    let mut lines = Vec::with_capacity(recipe.ingredients.len());
    let mut skipped = Vec::new();

    for ingredient in &recipe.ingredients {
        match resolve(&ingredient.product, catalog) {
            Some(product) => {
                if !ingredient.unit.converts_to(product.unit) {
                    return Err(invalid(format!(
                        "{} is stocked in {}, recipe '{}' asks for {}",
                        product.name, product.unit, recipe.name, ingredient.unit
                    )));
                }
                let quantity = ingredient.unit.convert(ingredient.quantity, product.unit)?;
                lines.push(CostLine {
                    product_id: product.id,
                    quantity,
                    unit: product.unit,
                });
            }
            None => match options.unresolved {
                UnresolvedPolicy::Fail => {
                    return Err(PricingError::UnresolvedReference(ingredient.product.clone()))
                }
                UnresolvedPolicy::Skip => {
                    warn!(recipe = %recipe.name, product = %ingredient.product, "Ingredient skipped, product not in catalog");
                    skipped.push(ingredient.product.clone());
                }
            },
        }
    }

    let mut cost = compute_cost(&lines, catalog, options.unresolved)?;
    cost.skipped.extend(skipped);

    let suggested_price = compute_suggested_price(cost.total, recipe.profit_margin_percent)?;
    let suggested_unit_price = compute_unit_price(suggested_price, recipe.standard_yield)?;

    let sale_price = match options.sale_price {
        SalePricePolicy::Suggested => suggested_unit_price,
        SalePricePolicy::Override(price) => {
            require_non_negative(price, "sale price")?;
            price
        }
    };

    let (partition_count, partition_price) = if recipe.is_partitioned {
        (
            Some(recipe.partition_count),
            Some(compute_partition_price(suggested_price, recipe.partition_count)?),
        )
    } else {
        (None, None)
    };

    let estimated_profit = compute_estimated_profit(sale_price, recipe.standard_yield, cost.total)?;
    let realised_margin_percent = compute_profit_margin_percent(estimated_profit, cost.total)?;

    debug!(
        recipe = %recipe.name,
        total_cost = %cost.total,
        suggested = %suggested_price,
        "Recipe priced"
    );

    Ok(PriceBreakdown {
        recipe_name: recipe.name.clone(),
        standard_yield: recipe.standard_yield,
        margin_percent: recipe.profit_margin_percent,
        cost,
        suggested_price,
        suggested_unit_price,
        sale_price,
        partition_count,
        partition_price,
        estimated_profit,
        realised_margin_percent,
    })
}

impl std::fmt::Display for PriceBreakdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Pricing Summary ===")?;
        writeln!(f, "Recipe: {} (yield {})", self.recipe_name, self.standard_yield.normalize())?;
        writeln!(f)?;

        writeln!(f, "Ingredients:")?;
        for line in &self.cost.lines {
            writeln!(
                f,
                "  {:<24} {:>10} {:<3} R$ {:>10}",
                line.product_name,
                line.quantity.normalize(),
                line.unit,
                format_currency(line.cost)
            )?;
        }
        for missing in &self.cost.skipped {
            writeln!(f, "  {} (not in catalog, excluded)", missing)?;
        }
        writeln!(f)?;

        writeln!(f, "Batch:")?;
        writeln!(f, "  Cost:             R$ {}", format_currency(self.cost.total))?;
        writeln!(
            f,
            "  Suggested price:  R$ {} ({}% margin)",
            format_currency(self.suggested_price),
            self.margin_percent.normalize()
        )?;
        if let (Some(count), Some(price)) = (self.partition_count, self.partition_price) {
            writeln!(f, "  Per portion:      R$ {} ({} portions)", format_currency(price), count)?;
        }
        writeln!(f)?;

        writeln!(f, "Per unit:")?;
        writeln!(f, "  Suggested:        R$ {}", format_currency(self.suggested_unit_price))?;
        writeln!(f, "  Sale price:       R$ {}", format_currency(self.sale_price))?;
        writeln!(f)?;

        writeln!(f, "Estimated profit:   R$ {}", format_currency(self.estimated_profit))?;
        writeln!(f, "Realised margin:    {:.1}%", round_money(self.realised_margin_percent))?;

        Ok(())
    }
}
