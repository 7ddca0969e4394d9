//! Market tracker loading, cleaning and per-region splitting using Polars

use crate::region;
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Columns every market tracker table must carry
pub const REGION_COLUMN: &str = "region";
pub const PROPERTY_TYPE_COLUMN: &str = "property_type";
pub const PERIOD_BEGIN_COLUMN: &str = "period_begin";
pub const PERIOD_END_COLUMN: &str = "period_end";

/// Outcome of splitting a table into per-value files
#[derive(Debug, Default)]
pub struct SplitReport {
    /// Files written
    pub written: Vec<PathBuf>,
    /// Values whose file already existed and was left alone
    pub skipped: Vec<String>,
    /// Values whose file could not be written
    pub failures: Vec<String>,
}

/// One region's feature series ordered by period
#[derive(Debug, Clone)]
pub struct RegionSeries {
    /// Raw region name as found in the table
    pub region: String,
    /// Period start dates, ascending
    pub dates: Vec<NaiveDate>,
    /// Feature values aligned with `dates`
    pub values: Vec<f64>,
}

/// Load a market tracker table, tab-separated when the extension is `.tsv`
pub fn load_market_table(path: &Path) -> crate::Result<DataFrame> {
    let separator = match path.extension().and_then(|e| e.to_str()) {
        Some("tsv") => b'\t',
        _ => b',',
    };

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;

    tracing::debug!(
        path = %path.display(),
        rows = df.height(),
        columns = df.width(),
        "Loaded market table"
    );
    Ok(df)
}

/// Clean a market tracker table
///
/// Sorts by `period_begin`, drops columns holding a single distinct value,
/// then forward/back fills each `(region, property_type)` group and drops
/// the rows that still contain nulls.
pub fn clean_market_data(df: &DataFrame) -> crate::Result<DataFrame> {
    for required in [REGION_COLUMN, PROPERTY_TYPE_COLUMN, PERIOD_BEGIN_COLUMN] {
        if df.column(required).is_err() {
            anyhow::bail!("Required column '{}' not found", required);
        }
    }

    let sorted = df.sort(
        [PERIOD_BEGIN_COLUMN],
        SortMultipleOptions::default().with_maintain_order(true),
    )?;

    let reduced = drop_constant_columns(&sorted)?;

    // A constant key column was dropped above and no longer splits groups
    let keys: Vec<&str> = [REGION_COLUMN, PROPERTY_TYPE_COLUMN]
        .into_iter()
        .filter(|key| reduced.column(key).is_ok())
        .collect();
    let groups = if keys.is_empty() {
        vec![reduced.clone()]
    } else {
        reduced.partition_by_stable(keys, true)?
    };

    let mut cleaned = reduced.clear();
    for group in groups {
        let filled = group
            .fill_null(FillNullStrategy::Forward(None))?
            .fill_null(FillNullStrategy::Backward(None))?
            .drop_nulls::<String>(None)?;
        cleaned.vstack_mut(&filled)?;
    }

    tracing::info!(
        rows_in = df.height(),
        rows_out = cleaned.height(),
        columns_dropped = df.width() - cleaned.width(),
        "Cleaned market data"
    );
    Ok(cleaned)
}

/// Names of columns with at most one distinct value (nulls count as a value)
pub fn constant_columns(df: &DataFrame) -> crate::Result<Vec<String>> {
    let mut constant = Vec::new();
    for column in df.get_columns() {
        if column.as_materialized_series().n_unique()? <= 1 {
            constant.push(column.name().to_string());
        }
    }
    Ok(constant)
}

fn drop_constant_columns(df: &DataFrame) -> crate::Result<DataFrame> {
    let constant = constant_columns(df)?;
    if !constant.is_empty() {
        tracing::debug!(columns = ?constant, "Dropping constant columns");
    }

    let keep: Vec<String> = df
        .get_columns()
        .iter()
        .map(|c| c.name().to_string())
        .filter(|name| !constant.contains(name))
        .collect();
    Ok(df.select(keep)?)
}

/// Default name for a cleaned table, stamped with the current time
pub fn timestamped_name() -> String {
    format!("data_{}", chrono::Local::now().format("%Y_%m_%d_%H_%M_%S"))
}

/// Write a table as `<dir>/<name>.csv`, creating the directory
pub fn save_table(df: &mut DataFrame, dir: &Path, name: &str) -> crate::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.csv", name));
    write_csv(df, &path)?;
    Ok(path)
}

fn write_csv(df: &mut DataFrame, path: &Path) -> crate::Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// Split a table into one CSV per distinct value of `column`
///
/// Files are named by the region file-stem rule. Existing files are left in
/// place unless `overwrite` is set. A failed write is recorded and does not
/// stop the remaining values.
pub fn split_by_column(
    df: &DataFrame,
    column: &str,
    dir: &Path,
    overwrite: bool,
) -> crate::Result<SplitReport> {
    if df.column(column).is_err() {
        anyhow::bail!("Column '{}' not found", column);
    }
    if !dir.is_dir() {
        tracing::info!(dir = %dir.display(), "Creating output directory");
        std::fs::create_dir_all(dir)?;
    }

    let mut report = SplitReport::default();
    for mut part in df.partition_by_stable([column], true)? {
        let value = match first_string(&part, column)? {
            Some(value) => value,
            None => continue,
        };

        let path = dir.join(format!("{}.csv", region::file_stem(&value)));
        if path.exists() && !overwrite {
            tracing::debug!(value = %value, "Split file exists, skipping");
            report.skipped.push(value);
            continue;
        }

        match write_csv(&mut part, &path) {
            Ok(()) => report.written.push(path),
            Err(e) => {
                tracing::warn!(value = %value, error = %e, "Failed to save split data");
                report.failures.push(value);
            }
        }
    }

    tracing::info!(
        written = report.written.len(),
        skipped = report.skipped.len(),
        failed = report.failures.len(),
        "Split data by '{}'",
        column
    );
    Ok(report)
}

/// Write one failed value per line, creating the parent directory
pub fn write_failure_log(failures: &[String], path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut contents = failures.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// Keep only the rows of one property type
pub fn filter_property_type(df: &DataFrame, property_type: &str) -> crate::Result<DataFrame> {
    if df.column(PROPERTY_TYPE_COLUMN).is_err() {
        return Ok(df.clone());
    }
    let filtered = df
        .clone()
        .lazy()
        .filter(col(PROPERTY_TYPE_COLUMN).eq(lit(property_type)))
        .collect()?;
    Ok(filtered)
}

/// Column values as optional floats, casting numeric types
pub fn float_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<f64>>> {
    let series = df
        .column(name)
        .map_err(|_| anyhow::anyhow!("Column '{}' not found", name))?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

/// Column values as optional strings
pub fn string_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<String>>> {
    let series = df
        .column(name)
        .map_err(|_| anyhow::anyhow!("Column '{}' not found", name))?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn first_string(df: &DataFrame, name: &str) -> crate::Result<Option<String>> {
    Ok(string_column(df, name)?.into_iter().flatten().next())
}

/// Parse the date prefix (`YYYY-MM-DD`) of a period value
pub fn parse_period(value: &str) -> Option<NaiveDate> {
    let prefix = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Load one regional file as a dated feature series for a property type
///
/// Rows are ordered by `period_begin`; rows with a missing date or value are
/// dropped, and only the first row per period is kept.
pub fn load_region_series(
    path: &Path,
    property_type: &str,
    feature: &str,
) -> crate::Result<RegionSeries> {
    let df = filter_property_type(&load_market_table(path)?, property_type)?;
    if df.height() == 0 {
        anyhow::bail!("No '{}' rows in {}", property_type, path.display());
    }

    let region = first_string(&df, REGION_COLUMN)?.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(region::label_from_stem)
            .unwrap_or_default()
    });

    let periods = string_column(&df, PERIOD_BEGIN_COLUMN)?;
    let values = float_column(&df, feature)?;

    let mut rows: Vec<(NaiveDate, f64)> = periods
        .iter()
        .zip(values.iter())
        .filter_map(|(period, value)| {
            let date = period.as_deref().and_then(parse_period)?;
            let value = (*value).filter(|v| v.is_finite())?;
            Some((date, value))
        })
        .collect();
    rows.sort_by_key(|(date, _)| *date);
    rows.dedup_by_key(|(date, _)| *date);

    Ok(RegionSeries {
        region,
        dates: rows.iter().map(|(d, _)| *d).collect(),
        values: rows.iter().map(|(_, v)| *v).collect(),
    })
}

/// CSV files directly inside a directory, sorted by name
pub fn csv_files(dir: &Path) -> crate::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", dir.display(), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("csv"))
        .collect();
    files.sort();
    Ok(files)
}
