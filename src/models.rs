//! Data models for products, recipes and production runs

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::PricingError;

/// Unit in which a product is stocked or an ingredient is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Un,
    Kg,
    G,
    Mg,
    L,
    Ml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Count,
    Mass,
    Volume,
}

impl Unit {
    pub const ALL: [Unit; 6] = [Unit::Un, Unit::Kg, Unit::G, Unit::Mg, Unit::L, Unit::Ml];

    pub fn code(self) -> &'static str {
        match self {
            Unit::Un => "UN",
            Unit::Kg => "KG",
            Unit::G => "G",
            Unit::Mg => "MG",
            Unit::L => "L",
            Unit::Ml => "ML",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Unit::Un => "discrete items",
            Unit::Kg => "kilograms",
            Unit::G => "grams",
            Unit::Mg => "milligrams",
            Unit::L => "litres",
            Unit::Ml => "millilitres",
        }
    }

    /// Countable items; every other unit is a continuous measure
    pub fn is_discrete(self) -> bool {
        self == Unit::Un
    }

    fn dimension(self) -> Dimension {
        match self {
            Unit::Un => Dimension::Count,
            Unit::Kg | Unit::G | Unit::Mg => Dimension::Mass,
            Unit::L | Unit::Ml => Dimension::Volume,
        }
    }

    /// Factor to the base unit of the dimension (grams or millilitres)
    fn base_factor(self) -> Decimal {
        match self {
            Unit::Un | Unit::G | Unit::Ml => Decimal::ONE,
            Unit::Kg | Unit::L => Decimal::ONE_THOUSAND,
            Unit::Mg => Decimal::new(1, 3),
        }
    }

    /// Whether quantities in `self` can be expressed in `to`
    pub fn converts_to(self, to: Unit) -> bool {
        self.dimension() == to.dimension()
    }

    /// Convert `value` expressed in `self` into `to`.
    ///
    /// Only units of the same dimension convert; `UN` never converts to a
    /// measure and mass never converts to volume.
    pub fn convert(self, value: Decimal, to: Unit) -> Result<Decimal, PricingError> {
        if self == to {
            return Ok(value);
        }
        if !self.converts_to(to) {
            return Err(PricingError::InvalidInput(format!(
                "cannot convert {} to {}",
                self, to
            )));
        }
        value
            .checked_mul(self.base_factor())
            .and_then(|base| base.checked_div(to.base_factor()))
            .ok_or_else(|| {
                PricingError::InvalidInput(format!("{} {} does not fit in {}", value, self, to))
            })
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.code())
    }
}

impl FromStr for Unit {
    type Err = PricingError;

    /// Accepts the canonical codes in any case, plus the long-hand spellings
    /// found in older catalogs ("Unidade", "Litros", "Quilo", ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let unit = match upper.as_str() {
            "UN" | "UND" | "U" => Unit::Un,
            "KG" => Unit::Kg,
            "G" | "GR" => Unit::G,
            "MG" => Unit::Mg,
            "L" | "LT" => Unit::L,
            "ML" => Unit::Ml,
            u if u.starts_with("UNI") => Unit::Un,
            u if u.starts_with("KILO") || u.starts_with("QUILO") || u.starts_with("QILO") => {
                Unit::Kg
            }
            u if u.starts_with("MILIGRAMA") || u.starts_with("MILLIGRAM") => Unit::Mg,
            u if u.starts_with("MILILITRO") || u.starts_with("MILLILITRE") || u.starts_with("MILLILITER") => {
                Unit::Ml
            }
            u if u.starts_with("GRAMA") || u.starts_with("GRAM") => Unit::G,
            u if u.starts_with("LIT") => Unit::L,
            _ => {
                return Err(PricingError::InvalidInput(format!(
                    "unknown unit '{}'",
                    s.trim()
                )))
            }
        };
        Ok(unit)
    }
}

/// A stocked item
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub unit: Unit,
    pub purchase_price: Decimal, // per `unit` of stock
    pub sale_price: Decimal,
    pub current_quantity: Decimal,
    pub initial_quantity: Decimal,
    pub weight_per_package: Option<Decimal>,
    pub package_count: Option<Decimal>,
}

/// How an ingredient points at its product
#[derive(Debug, Clone, PartialEq)]
pub enum ProductRef {
    Id(i64),
    Name(String),
}

impl fmt::Display for ProductRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductRef::Id(id) => write!(f, "#{}", id),
            ProductRef::Name(name) => write!(f, "'{}'", name),
        }
    }
}

impl FromStr for ProductRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.trim_start_matches('#').parse::<i64>() {
            Ok(id) => ProductRef::Id(id),
            Err(_) => ProductRef::Name(s.to_string()),
        })
    }
}

/// A line of a recipe's bill of materials
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeIngredient {
    pub product: ProductRef,
    pub quantity: Decimal,
    pub unit: Unit,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub standard_yield: Decimal,
    pub ingredients: Vec<RecipeIngredient>,
    pub profit_margin_percent: Decimal,
    pub is_partitioned: bool,
    pub partition_count: i64,
    /// Committed unit sale price; derived when the recipe is saved
    pub sale_price: Option<Decimal>,
}

impl Recipe {
    pub const DEFAULT_MARGIN_PERCENT: Decimal = Decimal::from_parts(50, 0, 0, false, 0);

    pub fn new(name: impl Into<String>, standard_yield: Decimal) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: None,
            standard_yield,
            ingredients: Vec::new(),
            profit_margin_percent: Self::DEFAULT_MARGIN_PERCENT,
            is_partitioned: false,
            partition_count: 1,
            sale_price: None,
        }
    }
}

/// Finished goods entered into stock by a production run
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionOutput {
    pub product_id: i64,
    pub quantity: Decimal,
    pub unit: Unit,
}

/// A recorded production run
#[derive(Debug, Clone, PartialEq)]
pub struct Production {
    pub id: i64,
    pub recipe_id: i64,
    pub recipe_name: String,
    pub batches: i64,
    pub produced_quantity: Decimal,
    pub outputs: Vec<ProductionOutput>,
    pub total_cost: Decimal,
    pub estimated_profit: Decimal,
    pub produced_at: String,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn parses_codes_and_legacy_spellings() {
        assert_eq!("kg".parse::<Unit>().unwrap(), Unit::Kg);
        assert_eq!("UN".parse::<Unit>().unwrap(), Unit::Un);
        assert_eq!("Unidade".parse::<Unit>().unwrap(), Unit::Un);
        assert_eq!("Litros".parse::<Unit>().unwrap(), Unit::L);
        assert_eq!("Quilograma".parse::<Unit>().unwrap(), Unit::Kg);
        assert_eq!("mililitro".parse::<Unit>().unwrap(), Unit::Ml);
        assert_eq!("gramas".parse::<Unit>().unwrap(), Unit::G);
        assert!("caixa".parse::<Unit>().is_err());
    }

    #[test]
    fn display_round_trips_every_unit() {
        for unit in Unit::ALL {
            assert_eq!(unit.to_string().parse::<Unit>().unwrap(), unit);
        }
    }

    #[test]
    fn converts_within_dimension() {
        assert_eq!(Unit::G.convert(dec("500"), Unit::Kg).unwrap(), dec("0.5"));
        assert_eq!(Unit::Kg.convert(dec("1.5"), Unit::G).unwrap(), dec("1500"));
        assert_eq!(Unit::Mg.convert(dec("250"), Unit::G).unwrap(), dec("0.25"));
        assert_eq!(Unit::Ml.convert(dec("250"), Unit::L).unwrap(), dec("0.25"));
        assert_eq!(Unit::Un.convert(dec("3"), Unit::Un).unwrap(), dec("3"));
    }

    #[test]
    fn refuses_cross_dimension_conversion() {
        assert!(Unit::Kg.convert(dec("1"), Unit::L).is_err());
        assert!(Unit::Un.convert(dec("1"), Unit::G).is_err());
        assert!(!Unit::Ml.converts_to(Unit::Kg));
    }

    #[test]
    fn conversion_out_of_range_is_an_error() {
        assert!(matches!(
            Unit::Kg.convert(Decimal::MAX, Unit::Mg),
            Err(PricingError::InvalidInput(_))
        ));
    }

    #[test]
    fn product_ref_parses_ids_and_names() {
        assert_eq!("12".parse::<ProductRef>().unwrap(), ProductRef::Id(12));
        assert_eq!("#7".parse::<ProductRef>().unwrap(), ProductRef::Id(7));
        assert_eq!(
            " Farinha ".parse::<ProductRef>().unwrap(),
            ProductRef::Name("Farinha".to_string())
        );
    }

    #[test]
    fn new_recipe_defaults_to_fifty_percent_margin() {
        let recipe = Recipe::new("Coxinha", dec("20"));
        assert_eq!(recipe.profit_margin_percent, dec("50"));
        assert_eq!(recipe.partition_count, 1);
    }
}
