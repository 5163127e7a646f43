use crate::error::{AnalysisError, Result};
use crate::models::{AgeBand, Config, Gender, RegionRecord, RegionScope, RegionTable, RegionValue, SimilarRegion};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Share of `count` in `total` as a percentage, kept inside [0, 100].
///
/// Subgroup counts and totals come from separately tabulated sources, so the
/// raw ratio can overshoot 100; it is clamped rather than reported.
pub fn ratio(count: f64, total: Option<f64>) -> f64 {
    match total {
        Some(total) if total != 0.0 => ((count / total) * 100.0).min(100.0).max(0.0),
        _ => 0.0,
    }
}

/// Append a percentage column computed row by row from two existing columns.
pub fn add_ratio_column(table: &RegionTable, count_column: &str, total_column: &str, name: &str) -> Result<RegionTable> {
    let count_idx = table.column_index(count_column)?;
    let total_idx = table.column_index(total_column)?;
    let values = table
        .records()
        .iter()
        .map(|r| ratio(r.values[count_idx], Some(r.values[total_idx])))
        .collect();
    table.with_column(name, values)
}

/// Inner join on region name. Row order follows `left`; regions missing from
/// either side are dropped. Column names present on both sides get `_x` / `_y`.
pub fn join_tables(left: &RegionTable, right: &RegionTable) -> Result<RegionTable> {
    let right_by_region: HashMap<&str, &RegionRecord> =
        right.records().iter().map(|r| (r.region.as_str(), r)).collect();

    let mut columns: Vec<String> = Vec::with_capacity(left.columns().len() + right.columns().len());
    for name in left.columns() {
        if right.has_column(name) {
            columns.push(format!("{}_x", name));
        } else {
            columns.push(name.clone());
        }
    }
    for name in right.columns() {
        if left.has_column(name) {
            columns.push(format!("{}_y", name));
        } else {
            columns.push(name.clone());
        }
    }

    let mut records = Vec::new();
    for record in left.records() {
        if let Some(other) = right_by_region.get(record.region.as_str()) {
            let mut values = record.values.clone();
            values.extend_from_slice(&other.values);
            records.push(RegionRecord {
                region: record.region.clone(),
                values,
            });
        }
    }

    let dropped = left.len() - records.len();
    if dropped > 0 {
        debug!("join dropped {} regions without a match", dropped);
    }

    RegionTable::new("joined", columns, records)
}

/// Keep the regions inside a scope.
pub fn filter_scope(table: &RegionTable, scope: &RegionScope) -> RegionTable {
    match scope {
        RegionScope::Nationwide => table.clone(),
        RegionScope::Contains(text) => table.filtered(|r| r.region.contains(text.as_str())),
    }
}

/// The `n` largest values of `column`; equal values keep row order.
pub fn top_n(table: &RegionTable, column: &str, n: usize) -> Result<Vec<RegionValue>> {
    Ok(rank_values(table.column_values(column)?, true, n))
}

/// The `n` smallest values of `column`; equal values keep row order.
pub fn bottom_n(table: &RegionTable, column: &str, n: usize) -> Result<Vec<RegionValue>> {
    Ok(rank_values(table.column_values(column)?, false, n))
}

fn rank_values(mut values: Vec<RegionValue>, descending: bool, n: usize) -> Vec<RegionValue> {
    if descending {
        values.sort_by(|a, b| b.value.total_cmp(&a.value));
    } else {
        values.sort_by(|a, b| a.value.total_cmp(&b.value));
    }
    values.truncate(n);
    values
}

/// The `n` candidates whose value is closest to the reference region's value.
///
/// The reference itself is excluded by name, so other regions that tie with
/// it on value stay in the window. Returns an empty window when the reference
/// is not among the candidates.
pub fn similar_regions(candidates: &[RegionValue], reference: &str, n: usize) -> Vec<SimilarRegion> {
    let reference_value = match candidates.iter().find(|c| c.region == reference) {
        Some(c) => c.value,
        None => return Vec::new(),
    };

    let mut ranked: Vec<SimilarRegion> = candidates
        .iter()
        .filter(|c| c.region != reference)
        .map(|c| SimilarRegion {
            region: c.region.clone(),
            value: c.value,
            distance: (c.value - reference_value).abs(),
        })
        .collect();

    // sort_by is stable: equal distances stay in input order
    ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    ranked.truncate(n);
    ranked
}

/// Mean of each named column across all rows, in the order given.
pub fn column_means(table: &RegionTable, columns: &[String]) -> Result<Vec<(String, f64)>> {
    let mut means = Vec::with_capacity(columns.len());
    for name in columns {
        let idx = table.column_index(name)?;
        let mean = if table.is_empty() {
            0.0
        } else {
            table.records().iter().map(|r| r.values[idx]).sum::<f64>() / table.len() as f64
        };
        means.push((name.clone(), mean));
    }
    Ok(means)
}

/// One region's values for the named columns, or `None` when the region is unknown.
pub fn region_profile(table: &RegionTable, region: &str, columns: &[String]) -> Result<Option<Vec<(String, f64)>>> {
    let record = match table.find(region) {
        Some(record) => record,
        None => return Ok(None),
    };
    let mut profile = Vec::with_capacity(columns.len());
    for name in columns {
        let idx = table.column_index(name)?;
        profile.push((name.clone(), record.values[idx]));
    }
    Ok(Some(profile))
}

/// Selections that narrow the combined table for one view
#[derive(Debug, Clone)]
pub struct ViewFilter {
    pub scope: RegionScope,
    pub gender: Gender,
    pub age: AgeBand,
}

#[derive(Debug, Clone)]
pub struct RatioExtremes {
    pub column: String,
    pub candidates: usize,
    pub top: Vec<RegionValue>,
    pub bottom: Vec<RegionValue>,
}

#[derive(Debug, Clone)]
pub struct SimilarityView {
    pub column: String,
    pub reference: String,
    /// `None` when the reference region is not part of the filtered table
    pub reference_value: Option<f64>,
    pub regions: Vec<SimilarRegion>,
}

#[derive(Debug, Clone)]
pub struct PopulationSummary {
    pub trend: Vec<(String, f64)>,
    pub top: Vec<RegionValue>,
    pub profile: Option<(String, Vec<(String, f64)>)>,
    pub preview: Vec<RegionRecord>,
}

pub struct HouseholdAnalyzer<'a> {
    config: &'a Config,
}

impl<'a> HouseholdAnalyzer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Join both household tables and derive one ratio column per demographic group.
    pub fn combine(&self, single: &RegionTable, totals: &RegionTable) -> Result<RegionTable> {
        let mut combined = join_tables(single, totals)?;
        if combined.is_empty() {
            return Err(AnalysisError::EmptyData(
                "no region appears in both household tables".to_string(),
            ));
        }

        let total_column = self.config.total_households_column();
        for gender in Gender::ALL {
            combined = add_ratio_column(
                &combined,
                &self.config.household_count_column(gender),
                &total_column,
                &gender.ratio_column(),
            )?;
        }
        Ok(combined)
    }

    /// Apply the scope and age-band selections. An age band without a column
    /// in the table is skipped rather than treated as an error.
    pub fn select(&self, combined: &RegionTable, filter: &ViewFilter) -> RegionTable {
        let scoped = filter_scope(combined, &filter.scope);
        match filter.age {
            AgeBand::All => scoped,
            AgeBand::Years(age) => {
                let column = self.config.age_band_column(age);
                match scoped.column_index(&column) {
                    Ok(idx) => scoped.filtered(|r| r.values[idx] > 0.0),
                    Err(_) => {
                        warn!("⚠️  Age band column '{}' not found, age filter skipped", column);
                        scoped
                    }
                }
            }
        }
    }

    pub fn ratio_extremes(&self, combined: &RegionTable, filter: &ViewFilter, n: usize) -> Result<RatioExtremes> {
        let selected = self.select(combined, filter);
        let column = filter.gender.ratio_column();
        Ok(RatioExtremes {
            top: top_n(&selected, &column, n)?,
            bottom: bottom_n(&selected, &column, n)?,
            candidates: selected.len(),
            column,
        })
    }

    pub fn similar(&self, combined: &RegionTable, filter: &ViewFilter, reference: &str, n: usize) -> Result<SimilarityView> {
        let selected = self.select(combined, filter);
        let column = filter.gender.ratio_column();
        let candidates = selected.column_values(&column)?;
        let reference = selected
            .resolve_region(reference)?
            .unwrap_or_else(|| reference.to_string());
        let reference_value = candidates
            .iter()
            .find(|c| c.region == reference)
            .map(|c| c.value);
        let regions = similar_regions(&candidates, &reference, n);
        Ok(SimilarityView {
            column,
            reference,
            reference_value,
            regions,
        })
    }

    /// Region names left after the scope and age selections, in row order
    pub fn region_names(&self, combined: &RegionTable, filter: &ViewFilter) -> Vec<String> {
        self.select(combined, filter)
            .records()
            .iter()
            .map(|r| r.region.clone())
            .collect()
    }

    /// Age bands (in years) that have a household column in the table
    pub fn age_bands(&self, table: &RegionTable) -> Vec<u32> {
        let pattern = format!(r"^{}_(\d+)세_세대수$", regex::escape(&self.config.period));
        let age_regex = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("invalid age band pattern {}: {}", pattern, e);
                return Vec::new();
            }
        };

        let mut ages: Vec<u32> = table
            .columns()
            .iter()
            .filter_map(|name| age_regex.captures(name))
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        ages.sort_unstable();
        ages.dedup();
        ages
    }

    /// Trend, top totals, optional region profile and preview rows of the
    /// age-band population table.
    pub fn population(&self, table: &RegionTable, region: Option<&str>, n: usize) -> Result<PopulationSummary> {
        let total_column = self.config.population_total_name();
        let age_columns: Vec<String> = table
            .columns()
            .iter()
            .filter(|c| **c != total_column)
            .cloned()
            .collect();
        table.column_index(&total_column)?;

        let profile = match region {
            Some(region) => match table.resolve_region(region)? {
                Some(region) => region_profile(table, &region, &age_columns)?.map(|p| (region, p)),
                None => None,
            },
            None => None,
        };

        Ok(PopulationSummary {
            trend: column_means(table, &age_columns)?,
            top: top_n(table, &total_column, n)?,
            profile,
            preview: table.records().iter().take(PREVIEW_ROWS).cloned().collect(),
        })
    }
}

pub const PREVIEW_ROWS: usize = 10;
