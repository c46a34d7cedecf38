//! Cleaning stage: raw transaction export to canonical transaction table using Polars

use crate::config::PipelineConfig;
use crate::error::Error;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// Timestamp layout used in the canonical table
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column order of the canonical table
pub const CANONICAL_COLUMNS: [&str; 10] = [
    "invoice",
    "stock_code",
    "description",
    "quantity",
    "invoice_date",
    "price",
    "customer_id",
    "country",
    "total_amount",
    "is_cancellation",
];

const DATE_TIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// One line item of the canonical transaction table
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub invoice: String,
    pub stock_code: Option<String>,
    pub description: Option<String>,
    pub quantity: i64,
    pub invoice_date: NaiveDateTime,
    pub price: f64,
    pub customer_id: String,
    pub country: Option<String>,
    /// Always `quantity * price`
    pub total_amount: f64,
    pub is_cancellation: bool,
}

impl Transaction {
    pub fn year(&self) -> i32 {
        self.invoice_date.year()
    }
}

/// Lower-case a header, collapse whitespace runs into `_` and fold the
/// known aliases of the public retail exports onto canonical names.
pub fn normalize_column_name(name: &str) -> String {
    let normalized = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase();

    match normalized.as_str() {
        "invoiceno" | "invoice_no" => "invoice".to_string(),
        "invoicedate" => "invoice_date".to_string(),
        "unitprice" | "unit_price" => "price".to_string(),
        "customerid" => "customer_id".to_string(),
        "stockcode" => "stock_code".to_string(),
        _ => normalized,
    }
}

/// Parse an invoice timestamp in any of the layouts the exports use
pub fn parse_invoice_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Customer ids exported through a float column come back as `13085.0`
fn normalize_customer_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return None;
    }
    if let Some((int_part, frac)) = trimmed.split_once('.') {
        if !int_part.is_empty()
            && int_part.chars().all(|c| c.is_ascii_digit())
            && frac.chars().all(|c| c == '0')
        {
            return Some(int_part.to_string());
        }
    }
    Some(trimmed.to_string())
}

/// Whole quantities, also when exported as `12.0`
fn parse_quantity(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|q| q.is_finite() && q.fract() == 0.0)
            // i64::MAX rounds up to 2^63 as f64, which is already out of range
            .filter(|q| *q >= i64::MIN as f64 && *q < i64::MAX as f64)
            .map(|q| q as i64)
    })
}

/// Unit prices must be finite; `NaN` and `inf` parse as f64 but are not prices
fn parse_price(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|p| p.is_finite())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Read a CSV file with every column as text so that ids keep their exact form
fn read_text_frame(path: &Path) -> crate::Result<DataFrame> {
    if !path.exists() {
        return Err(Error::MissingSource {
            path: path.to_path_buf(),
        });
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// A sheet with its headers resolved to canonical names
struct Sheet<'a> {
    path: &'a Path,
    df: DataFrame,
    /// canonical name -> header as it appears in the file
    columns: HashMap<String, String>,
}

impl<'a> Sheet<'a> {
    fn open(path: &'a Path) -> crate::Result<Self> {
        let df = read_text_frame(path)?;
        let columns = df
            .get_column_names()
            .into_iter()
            .map(|name| (normalize_column_name(name), name.to_string()))
            .collect();
        Ok(Self { path, df, columns })
    }

    fn required(&self, name: &str) -> crate::Result<&StringChunked> {
        self.optional(name)?.ok_or_else(|| Error::MissingColumn {
            column: name.to_string(),
            path: self.path.to_path_buf(),
        })
    }

    fn optional(&self, name: &str) -> crate::Result<Option<&StringChunked>> {
        match self.columns.get(name) {
            Some(original) => Ok(Some(self.df.column(original)?.str()?)),
            None => Ok(None),
        }
    }

    fn invalid(&self, column: &'static str, value: Option<&str>, row: usize) -> Error {
        Error::InvalidValue {
            column,
            value: value.unwrap_or_default().to_string(),
            // header is line 1
            row: row + 2,
            path: self.path.to_path_buf(),
        }
    }

    /// Parse every identified row into typed columns.
    ///
    /// Rows without a customer id keep nulls and are left for the cleaning
    /// pipeline to drop, so their other fields are not validated.
    fn typed_frame(&self) -> crate::Result<DataFrame> {
        let invoice = self.required("invoice")?;
        let quantity = self.required("quantity")?;
        let invoice_date = self.required("invoice_date")?;
        let price = self.required("price")?;
        let customer_id = self.required("customer_id")?;

        let height = self.df.height();
        let mut invoices: Vec<Option<String>> = Vec::with_capacity(height);
        let mut quantities: Vec<Option<i64>> = Vec::with_capacity(height);
        let mut timestamps: Vec<Option<i64>> = Vec::with_capacity(height);
        let mut prices: Vec<Option<f64>> = Vec::with_capacity(height);
        let mut customers: Vec<Option<String>> = Vec::with_capacity(height);
        let mut unidentified = 0usize;

        for row in 0..height {
            let Some(customer) = customer_id.get(row).and_then(normalize_customer_id) else {
                unidentified += 1;
                invoices.push(None);
                quantities.push(None);
                timestamps.push(None);
                prices.push(None);
                customers.push(None);
                continue;
            };

            let invoice_id = non_blank(invoice.get(row))
                .ok_or_else(|| self.invalid("invoice", invoice.get(row), row))?;
            let qty = quantity
                .get(row)
                .and_then(parse_quantity)
                .ok_or_else(|| self.invalid("quantity", quantity.get(row), row))?;
            let unit_price = price
                .get(row)
                .and_then(parse_price)
                .ok_or_else(|| self.invalid("price", price.get(row), row))?;
            let date = invoice_date
                .get(row)
                .and_then(parse_invoice_date)
                .ok_or_else(|| self.invalid("invoice_date", invoice_date.get(row), row))?;

            invoices.push(Some(invoice_id));
            quantities.push(Some(qty));
            timestamps.push(Some(date.and_utc().timestamp_millis()));
            prices.push(Some(unit_price));
            customers.push(Some(customer));
        }

        let text_column = |name: &str| -> crate::Result<Vec<Option<String>>> {
            let column = self.optional(name)?;
            Ok((0..height)
                .map(|row| column.and_then(|c| non_blank(c.get(row))))
                .collect())
        };

        let df = df!(
            "invoice" => invoices,
            "stock_code" => text_column("stock_code")?,
            "description" => text_column("description")?,
            "quantity" => quantities,
            "invoice_ts" => timestamps,
            "price" => prices,
            "customer_id" => customers,
            "country" => text_column("country")?,
        )?;

        debug!(
            sheet = %self.path.display(),
            rows = height,
            unidentified,
            "parsed sheet"
        );
        Ok(df)
    }
}

fn total_amount() -> Expr {
    (col("quantity").cast(DataType::Float64) * col("price")).alias("total_amount")
}

/// Drop unidentified rows, derive `total_amount` and the cancellation flag,
/// then keep only positive, non-cancelled line items.
fn clean_frame(typed: DataFrame, cancellation_marker: char) -> PolarsResult<DataFrame> {
    typed
        .lazy()
        .filter(col("customer_id").is_not_null())
        .with_columns([
            total_amount(),
            col("invoice")
                .str()
                .starts_with(lit(cancellation_marker.to_string()))
                .alias("is_cancellation"),
        ])
        .filter(
            col("is_cancellation")
                .not()
                .and(col("quantity").gt(lit(0i64))),
        )
        .collect()
}

fn text_at(column: &StringChunked, row: usize) -> Option<String> {
    column.get(row).map(str::to_string)
}

/// Read typed, cleaned rows back into transactions
fn frame_to_transactions(df: &DataFrame) -> crate::Result<Vec<Transaction>> {
    let invoice = df.column("invoice")?.str()?;
    let stock_code = df.column("stock_code")?.str()?;
    let description = df.column("description")?.str()?;
    let quantity = df.column("quantity")?.i64()?;
    let invoice_ts = df.column("invoice_ts")?.i64()?;
    let price = df.column("price")?.f64()?;
    let customer_id = df.column("customer_id")?.str()?;
    let country = df.column("country")?.str()?;
    let total = df.column("total_amount")?.f64()?;
    let is_cancellation = df.column("is_cancellation")?.bool()?;

    // every column is non-null for identified rows
    Ok((0..df.height())
        .map(|row| Transaction {
            invoice: text_at(invoice, row).unwrap_or_default(),
            stock_code: text_at(stock_code, row),
            description: text_at(description, row),
            quantity: quantity.get(row).unwrap_or_default(),
            invoice_date: invoice_ts
                .get(row)
                .and_then(DateTime::from_timestamp_millis)
                .map(|dt| dt.naive_utc())
                .unwrap_or_default(),
            price: price.get(row).unwrap_or_default(),
            customer_id: text_at(customer_id, row).unwrap_or_default(),
            country: text_at(country, row),
            total_amount: total.get(row).unwrap_or_default(),
            is_cancellation: is_cancellation.get(row).unwrap_or_default(),
        })
        .collect())
}

/// Clean one or more raw sheets into the canonical transaction table
///
/// Rows without a customer id are dropped, cancellations and non-positive
/// quantities are excluded. Row order follows the sheets as given.
pub fn clean_sheets(sheets: &[PathBuf], cancellation_marker: char) -> crate::Result<Vec<Transaction>> {
    let mut identified: Option<DataFrame> = None;
    for path in sheets {
        let typed = Sheet::open(path)?.typed_frame()?;
        match identified.as_mut() {
            Some(all) => {
                all.vstack_mut(&typed)?;
            }
            None => identified = Some(typed),
        }
    }
    let Some(identified) = identified else {
        return Ok(Vec::new());
    };

    let rows = identified.height();
    let cleaned = clean_frame(identified, cancellation_marker)?;

    info!(
        sheets = sheets.len(),
        rows,
        kept = cleaned.height(),
        "cleaned raw transactions"
    );
    frame_to_transactions(&cleaned)
}

/// Identity of one raw sheet at the time the canonical table was built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SheetFingerprint {
    path: PathBuf,
    len: u64,
    modified_secs: u64,
    modified_nanos: u32,
}

/// Which raw sheets, in which order, produced a canonical table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SourceManifest {
    sheets: Vec<SheetFingerprint>,
}

impl SourceManifest {
    fn capture(raw_sheets: &[PathBuf]) -> crate::Result<Self> {
        let sheets = raw_sheets
            .iter()
            .map(|path| {
                let meta = fs::metadata(path)?;
                let modified = meta
                    .modified()?
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                Ok(SheetFingerprint {
                    path: path.clone(),
                    len: meta.len(),
                    modified_secs: modified.as_secs(),
                    modified_nanos: modified.subsec_nanos(),
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self { sheets })
    }
}

/// Manifest stored next to a canonical table
pub fn manifest_path(processed_path: &Path) -> PathBuf {
    processed_path.with_extension("manifest.json")
}

fn write_manifest(processed_path: &Path, raw_sheets: &[PathBuf]) -> crate::Result<()> {
    let manifest = SourceManifest::capture(raw_sheets)?;
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(manifest_path(processed_path), json)?;
    Ok(())
}

/// Whether the canonical table was built from exactly these raw sheets, unchanged
pub fn is_cache_fresh(processed_path: &Path, raw_sheets: &[PathBuf]) -> crate::Result<bool> {
    if !processed_path.exists() {
        return Ok(false);
    }

    let contents = match fs::read_to_string(manifest_path(processed_path)) {
        Ok(contents) => contents,
        Err(_) => {
            debug!(path = %processed_path.display(), "canonical table has no manifest");
            return Ok(false);
        }
    };
    let stored: SourceManifest = match serde_json::from_str(&contents) {
        Ok(stored) => stored,
        Err(e) => {
            warn!(error = %e, "unreadable cache manifest");
            return Ok(false);
        }
    };

    let fresh = stored == SourceManifest::capture(raw_sheets)?;
    if !fresh {
        debug!("raw sheets differ from the ones that built the canonical table");
    }
    Ok(fresh)
}

/// Run the cleaning stage, reusing the canonical table when it is still fresh
pub fn load_and_clean(config: &PipelineConfig) -> crate::Result<Vec<Transaction>> {
    if let Some(missing) = config.raw_sheets.iter().find(|p| !p.exists()) {
        return Err(Error::MissingSource {
            path: missing.clone(),
        });
    }

    if !config.force && is_cache_fresh(&config.processed_path, &config.raw_sheets)? {
        info!(path = %config.processed_path.display(), "loading cached canonical table");
        return load_canonical(&config.processed_path);
    }

    if config.force {
        warn!("ignoring cached canonical table");
    }

    let transactions = clean_sheets(&config.raw_sheets, config.cancellation_marker)?;
    write_canonical(&transactions, &config.processed_path)?;
    write_manifest(&config.processed_path, &config.raw_sheets)?;
    Ok(transactions)
}

/// Build the canonical table as a DataFrame for the presentation layer
pub fn transactions_to_dataframe(transactions: &[Transaction]) -> crate::Result<DataFrame> {
    let df = df!(
        "invoice" => transactions.iter().map(|t| t.invoice.as_str()).collect::<Vec<_>>(),
        "stock_code" => transactions.iter().map(|t| t.stock_code.as_deref()).collect::<Vec<_>>(),
        "description" => transactions.iter().map(|t| t.description.as_deref()).collect::<Vec<_>>(),
        "quantity" => transactions.iter().map(|t| t.quantity).collect::<Vec<_>>(),
        "invoice_date" => transactions
            .iter()
            .map(|t| t.invoice_date.format(CANONICAL_DATE_FORMAT).to_string())
            .collect::<Vec<_>>(),
        "price" => transactions.iter().map(|t| t.price).collect::<Vec<_>>(),
        "customer_id" => transactions.iter().map(|t| t.customer_id.as_str()).collect::<Vec<_>>(),
        "country" => transactions.iter().map(|t| t.country.as_deref()).collect::<Vec<_>>(),
        "total_amount" => transactions.iter().map(|t| t.total_amount).collect::<Vec<_>>(),
        "is_cancellation" => transactions.iter().map(|t| t.is_cancellation).collect::<Vec<_>>(),
    )?;
    Ok(df)
}

fn write_frame(df: &mut DataFrame, path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// Persist the canonical table as CSV
pub fn write_canonical(transactions: &[Transaction], path: &Path) -> crate::Result<()> {
    let mut df = transactions_to_dataframe(transactions)?;
    write_frame(&mut df, path)?;
    info!(path = %path.display(), rows = transactions.len(), "saved canonical table");
    Ok(())
}

/// Load a canonical table written by [`write_canonical`]
pub fn load_canonical(path: &Path) -> crate::Result<Vec<Transaction>> {
    let sheet = Sheet::open(path)?;
    let flags = sheet.required("is_cancellation")?;

    let is_cancellation = (0..sheet.df.height())
        .map(|row| match flags.get(row).map(str::trim) {
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            other => Err(sheet.invalid("is_cancellation", other, row)),
        })
        .collect::<crate::Result<Vec<bool>>>()?;

    let mut typed = sheet.typed_frame()?;
    typed.with_column(Series::new("is_cancellation", is_cancellation))?;

    // total_amount is derived, so it is recomputed rather than trusted
    let df = typed.lazy().with_columns([total_amount()]).collect()?;
    frame_to_transactions(&df)
}

/// Copy the first `rows` lines of a raw sheet into a small sample CSV
pub fn create_sample(raw_path: &Path, sample_path: &Path, rows: usize) -> crate::Result<usize> {
    let df = read_text_frame(raw_path)?;
    let mut sample = df.head(Some(rows));
    write_frame(&mut sample, sample_path)?;
    info!(path = %sample_path.display(), rows = sample.height(), "saved sample");
    Ok(sample.height())
}
