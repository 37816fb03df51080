//! Product sheet import
//!
//! Reads `;`-separated product sheets (`*.csv`) from a directory tree and
//! loads them into the catalog. Columns:
//!
//! ```text
//! name;unit;purchase price;sale price;quantity or packages;weight per package
//! ```
//!
//! Prices are currency text with two decimals ("12,50", "R$ 1.234,56").
//! When a weight per package is given, the fifth column counts packages and
//! stock is derived from them; otherwise it is the stock quantity itself.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db;
use crate::models::{Product, Unit};
use crate::pricing::parse_cents_input;

/// One parsed sheet row before it reaches the database
#[derive(Debug, Clone, PartialEq)]
struct SheetRow {
    name: String,
    unit: Unit,
    purchase_price: Decimal,
    sale_price: Decimal,
    quantity: Decimal,
    weight_per_package: Option<Decimal>,
}

struct SheetPatterns {
    row: Regex,
    price: Regex,
    quantity: Regex,
}

impl SheetPatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            row: Regex::new(
                r"^\s*([^;]+?)\s*;\s*([^;]+?)\s*;\s*([^;]*?)\s*;\s*([^;]*?)\s*(?:;\s*([^;]*?)\s*)?(?:;\s*([^;]*?)\s*)?;?\s*$",
            )?,
            price: Regex::new(r"^(?:R\$\s*)?(?:\d{1,3}(?:\.\d{3})+|\d+)[.,]\d{2}$")?,
            quantity: Regex::new(r"^\d+(?:[.,]\d+)?$")?,
        })
    }
}

/// Find all product sheets under `dir`
pub fn find_sheet_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }

    let mut sheets = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if entry.file_type().is_file()
            && path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"))
        {
            sheets.push(path.to_path_buf());
        }
    }
    Ok(sheets)
}

fn is_header(first_cell: &str) -> bool {
    matches!(
        first_cell.trim().to_lowercase().as_str(),
        "name" | "nome" | "produto" | "product"
    )
}

fn parse_price(patterns: &SheetPatterns, cell: &str, what: &str) -> Result<Decimal> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(Decimal::ZERO);
    }
    if !patterns.price.is_match(cell) {
        return Err(anyhow!("{} '{}' must be written with two decimals", what, cell));
    }
    Ok(parse_cents_input(cell)?)
}

fn parse_quantity(patterns: &SheetPatterns, cell: Option<&str>, what: &str) -> Result<Option<Decimal>> {
    let Some(cell) = cell.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    if !patterns.quantity.is_match(cell) {
        return Err(anyhow!("{} '{}' is not a number", what, cell));
    }
    Ok(Some(Decimal::from_str(&cell.replace(',', "."))?))
}

/// Parse one sheet line. `Ok(None)` for blank, comment and header lines.
fn parse_sheet_line(patterns: &SheetPatterns, line: &str) -> Result<Option<SheetRow>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let cap = patterns
        .row
        .captures(trimmed)
        .ok_or_else(|| anyhow!("expected at least 4 ';'-separated columns"))?;

    let name = cap[1].to_string();
    if is_header(&name) {
        return Ok(None);
    }

    let unit = Unit::from_str(&cap[2])?;
    let purchase_price = parse_price(patterns, &cap[3], "purchase price")?;
    let sale_price = parse_price(patterns, &cap[4], "sale price")?;
    let quantity = parse_quantity(patterns, cap.get(5).map(|m| m.as_str()), "quantity")?
        .unwrap_or_default();
    let weight_per_package =
        parse_quantity(patterns, cap.get(6).map(|m| m.as_str()), "weight per package")?;

    Ok(Some(SheetRow {
        name,
        unit,
        purchase_price,
        sale_price,
        quantity,
        weight_per_package,
    }))
}

impl SheetRow {
    fn into_product(self, id: i64) -> Product {
        let packaged = self.unit.is_discrete() || self.weight_per_package.is_some();
        Product {
            id,
            name: self.name,
            unit: self.unit,
            purchase_price: self.purchase_price,
            sale_price: self.sale_price,
            current_quantity: if packaged { Decimal::ZERO } else { self.quantity },
            initial_quantity: Decimal::ZERO,
            weight_per_package: self.weight_per_package,
            package_count: packaged.then_some(self.quantity),
        }
    }
}

/// Insert new products, overwrite products whose name already exists
fn store_row(conn: &Connection, row: SheetRow, stats: &mut ImportStats) -> Result<()> {
    match db::find_product_by_name(conn, &row.name)? {
        Some(existing) => {
            let product = row.into_product(existing.id);
            db::update_product(conn, &product)?;
            debug!(id = existing.id, name = %product.name, "Product updated from sheet");
            stats.updated += 1;
        }
        None => {
            let product = db::insert_product(conn, &row.into_product(0))?;
            debug!(id = product.id, name = %product.name, "Product imported");
            stats.inserted += 1;
        }
    }
    Ok(())
}

fn import_sheet(
    conn: &Connection,
    patterns: &SheetPatterns,
    path: &Path,
    stats: &mut ImportStats,
) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    for (number, line) in content.lines().enumerate() {
        let outcome = parse_sheet_line(patterns, line)
            .and_then(|row| row.map(|r| store_row(conn, r, stats)).transpose());
        match outcome {
            Ok(Some(())) => {}
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                warn!("{}:{}: {:#}", path.display(), number + 1, e);
                stats.errors += 1;
            }
        }
    }
    Ok(())
}

/// Import every product sheet found under `dir`
pub fn import_directory(conn: &Connection, dir: &Path) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    let patterns = SheetPatterns::new()?;

    info!("Scanning {} for product sheets...", dir.display());
    let sheets = find_sheet_files(dir)?;
    info!("Found {} product sheets", sheets.len());

    for path in &sheets {
        match import_sheet(conn, &patterns, path, &mut stats) {
            Ok(()) => stats.files += 1,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                stats.errors += 1;
            }
        }
    }

    Ok(stats)
}

#[derive(Debug, Default, PartialEq)]
pub struct ImportStats {
    pub files: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl std::fmt::Display for ImportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Imported {} sheets ({} new products, {} updated). Skipped lines: {}, Errors: {}",
            self.files, self.inserted, self.updated, self.skipped, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{dec, memory_db};

    fn parse(line: &str) -> Result<Option<SheetRow>> {
        parse_sheet_line(&SheetPatterns::new().unwrap(), line)
    }

    #[test]
    fn parses_weighted_row() {
        let row = parse("Farinha de Trigo; kg; R$ 5,49; 0,00; 4; 1,5").unwrap().unwrap();
        assert_eq!(row.name, "Farinha de Trigo");
        assert_eq!(row.unit, Unit::Kg);
        assert_eq!(row.purchase_price, dec("5.49"));
        assert_eq!(row.quantity, dec("4"));
        assert_eq!(row.weight_per_package, Some(dec("1.5")));
    }

    #[test]
    fn parses_minimal_row_with_legacy_unit() {
        let row = parse("Ovo;Unidade;1.234,00;").unwrap().unwrap();
        assert_eq!(row.unit, Unit::Un);
        assert_eq!(row.purchase_price, dec("1234"));
        assert_eq!(row.sale_price, Decimal::ZERO);
        assert_eq!(row.quantity, Decimal::ZERO);
    }

    #[test]
    fn skips_blank_comment_and_header_lines() {
        assert!(parse("").unwrap().is_none());
        assert!(parse("# fornecedor A").unwrap().is_none());
        assert!(parse("nome;unidade;compra;venda;quantidade;peso").unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(parse("Açúcar;KG").is_err());
        assert!(parse("Açúcar;caixa;4,00;5,00").is_err());
        assert!(parse("Açúcar;KG;4;5,00").is_err());
        assert!(parse("Açúcar;KG;4,00;5,00;muito").is_err());
    }

    #[test]
    fn discrete_rows_count_packages() {
        let product = parse("Ovo;UN;0,80;1,20;30").unwrap().unwrap().into_product(0);
        assert_eq!(product.package_count, Some(dec("30")));

        let product = parse("Leite;L;4,50;6,00;12").unwrap().unwrap().into_product(0);
        assert_eq!(product.current_quantity, dec("12"));
        assert_eq!(product.package_count, None);
    }

    #[test]
    fn imports_directory_tree() {
        let dir = std::env::temp_dir().join(format!("recipe-costing-import-{}", std::process::id()));
        let nested = dir.join("fornecedor");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            dir.join("basicos.csv"),
            "nome;unidade;compra;venda;quantidade;peso\nFarinha;KG;5,00;0,00;2;1,5\nOvo;UN;0,80;0,00;30\nlinha quebrada\n",
        )
        .unwrap();
        fs::write(nested.join("laticinios.CSV"), "Leite;L;4,50;6,00;12\nfarinha;KG;5,50;0,00;4;1\n").unwrap();
        fs::write(nested.join("notas.txt"), "Chocolate;KG;30,00;0,00;1").unwrap();

        let conn = memory_db();
        let stats = import_directory(&conn, &dir).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(
            stats,
            ImportStats {
                files: 2,
                inserted: 3,
                updated: 1,
                skipped: 1,
                errors: 1,
            }
        );

        let farinha = db::find_product_by_name(&conn, "Farinha").unwrap().unwrap();
        assert_eq!(farinha.purchase_price, dec("5.50"));
        assert_eq!(farinha.current_quantity, dec("4"));
        assert_eq!(db::list_products(&conn).unwrap().len(), 3);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let conn = memory_db();
        assert!(import_directory(&conn, Path::new("/definitely/not/here")).is_err());
    }
}
