use crate::error::{AnalysisError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Column prefix shared by every count column, e.g. "2025년01월"
    pub period: String,
    pub region_column: String,
    pub single_household: DataFile,
    pub total_households: DataFile,
    pub population: Option<DataFile>,
    pub population_layout: PopulationLayout,
    pub population_total_column: Option<String>,
    pub output_directory: Option<String>,
    pub top_n: usize,
    pub charts: ChartConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFile {
    pub path: String,
    pub encoding: EncodingChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodingChoice {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "euc-kr")]
    EucKr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PopulationLayout {
    /// Trust column order: region, age bands..., total
    #[serde(rename = "positional")]
    Positional,
    /// Require the region column and the configured total column by name
    #[serde(rename = "header")]
    Header,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period: "2025년01월".to_string(),
            region_column: "행정구역".to_string(),
            single_household: DataFile {
                path: "data11.csv".to_string(),
                encoding: EncodingChoice::Auto,
            },
            total_households: DataFile {
                path: "data22.csv".to_string(),
                encoding: EncodingChoice::Auto,
            },
            population: Some(DataFile {
                path: "202504_202504_연령별인구현황_남녀합계.csv".to_string(),
                encoding: EncodingChoice::EucKr,
            }),
            population_layout: PopulationLayout::Positional,
            population_total_column: None,
            output_directory: Some("output".to_string()),
            top_n: 10,
            charts: ChartConfig {
                enabled: true,
                width: 1000,
                height: 500,
            },
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }

    /// Single-person household count column for a demographic group
    pub fn household_count_column(&self, gender: Gender) -> String {
        format!("{}_{}_총세대수", self.period, gender.code())
    }

    pub fn total_households_column(&self) -> String {
        format!("{}_세대수", self.period)
    }

    pub fn age_band_column(&self, age: u32) -> String {
        format!("{}_{}세_세대수", self.period, age)
    }

    pub fn single_household_schema(&self) -> SchemaDescriptor {
        SchemaDescriptor {
            name: "single_household".to_string(),
            version: 1,
            key: self.region_column.clone(),
            layout: SchemaLayout::Header {
                required: Gender::ALL
                    .iter()
                    .map(|g| self.household_count_column(*g))
                    .collect(),
            },
        }
    }

    pub fn total_households_schema(&self) -> SchemaDescriptor {
        SchemaDescriptor {
            name: "total_households".to_string(),
            version: 1,
            key: self.region_column.clone(),
            layout: SchemaLayout::Header {
                required: vec![self.total_households_column()],
            },
        }
    }

    pub fn population_schema(&self) -> SchemaDescriptor {
        match self.population_layout {
            PopulationLayout::Positional => SchemaDescriptor {
                name: "population".to_string(),
                version: 1,
                key: "지역명".to_string(),
                layout: SchemaLayout::Positional {
                    value_prefix: "인구".to_string(),
                    total_name: POPULATION_TOTAL.to_string(),
                },
            },
            PopulationLayout::Header => SchemaDescriptor {
                name: "population".to_string(),
                version: 2,
                key: self.region_column.clone(),
                layout: SchemaLayout::Header {
                    required: vec![self.population_total_name()],
                },
            },
        }
    }

    pub fn population_total_name(&self) -> String {
        match self.population_layout {
            PopulationLayout::Positional => POPULATION_TOTAL.to_string(),
            PopulationLayout::Header => self
                .population_total_column
                .clone()
                .unwrap_or_else(|| format!("{}_계_총인구수", self.period)),
        }
    }
}

pub const POPULATION_TOTAL: &str = "총인구";

/// Expected shape of one input file, checked against its header at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    pub name: String,
    pub version: u32,
    /// Name the region column has after loading
    pub key: String,
    pub layout: SchemaLayout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaLayout {
    /// The key and every required column must be present by name; any other
    /// column is loaded as a numeric attribute.
    Header { required: Vec<String> },
    /// First column is the key, last column the total, everything in between
    /// is renamed `{value_prefix}_1..N`. Header names are ignored.
    Positional { value_prefix: String, total_name: String },
}

/// Column positions resolved from a concrete header.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSchema {
    pub key_index: usize,
    pub value_columns: Vec<(usize, String)>,
}

impl SchemaDescriptor {
    pub fn resolve(&self, header: &[String], source_name: &str) -> Result<ResolvedSchema> {
        let mismatch = |reason: String| AnalysisError::SchemaMismatch {
            source_name: source_name.to_string(),
            schema: self.name.clone(),
            version: self.version,
            reason,
        };

        match &self.layout {
            SchemaLayout::Header { required } => {
                let key_index = header
                    .iter()
                    .position(|h| h == &self.key)
                    .ok_or_else(|| mismatch(format!("region column '{}' not found", self.key)))?;

                let missing: Vec<&str> = required
                    .iter()
                    .filter(|name| !header.contains(name))
                    .map(|name| name.as_str())
                    .collect();
                if !missing.is_empty() {
                    return Err(mismatch(format!("missing columns: {}", missing.join(", "))));
                }

                let mut seen = HashSet::new();
                let mut value_columns = Vec::new();
                for (i, name) in header.iter().enumerate() {
                    if !seen.insert(name.as_str()) {
                        return Err(mismatch(format!("column '{}' appears twice", name)));
                    }
                    if i != key_index {
                        value_columns.push((i, name.clone()));
                    }
                }

                Ok(ResolvedSchema {
                    key_index,
                    value_columns,
                })
            }
            SchemaLayout::Positional {
                value_prefix,
                total_name,
            } => {
                if header.len() < 3 {
                    return Err(mismatch(format!(
                        "expected at least 3 columns, found {}",
                        header.len()
                    )));
                }
                let last = header.len() - 1;
                let mut value_columns: Vec<(usize, String)> = (1..last)
                    .map(|i| (i, format!("{}_{}", value_prefix, i)))
                    .collect();
                value_columns.push((last, total_name.clone()));

                Ok(ResolvedSchema {
                    key_index: 0,
                    value_columns,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionRecord {
    pub region: String,
    pub values: Vec<f64>,
}

/// An ordered, immutable table of regions. Row order is the input order and is
/// the tie-break order for every ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTable {
    columns: Vec<String>,
    records: Vec<RegionRecord>,
}

impl RegionTable {
    /// Build a table, rejecting ragged rows and duplicate region names.
    pub fn new(source_name: &str, columns: Vec<String>, records: Vec<RegionRecord>) -> Result<Self> {
        let mut seen = HashSet::new();
        for record in &records {
            if record.values.len() != columns.len() {
                return Err(AnalysisError::SchemaMismatch {
                    source_name: source_name.to_string(),
                    schema: "table".to_string(),
                    version: 1,
                    reason: format!(
                        "region '{}' has {} values for {} columns",
                        record.region,
                        record.values.len(),
                        columns.len()
                    ),
                });
            }
            if !seen.insert(record.region.as_str()) {
                return Err(AnalysisError::DuplicateRegion {
                    region: record.region.clone(),
                    source_name: source_name.to_string(),
                });
            }
        }
        Ok(Self { columns, records })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[RegionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| AnalysisError::MissingColumn(name.to_string()))
    }

    pub fn find(&self, region: &str) -> Option<&RegionRecord> {
        self.records.iter().find(|r| r.region == region)
    }

    /// Full region name for a user-supplied name. An exact match wins;
    /// otherwise the name is compared with each region's short name (without
    /// the administrative code). `None` when nothing matches.
    pub fn resolve_region(&self, name: &str) -> Result<Option<String>> {
        if self.find(name).is_some() {
            return Ok(Some(name.to_string()));
        }
        let matches: Vec<&str> = self
            .records
            .iter()
            .filter(|r| short_region_name(&r.region) == name)
            .map(|r| r.region.as_str())
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(single.to_string())),
            _ => Err(AnalysisError::AmbiguousRegion {
                name: name.to_string(),
                candidates: matches.join(", "),
            }),
        }
    }

    /// (region, value) pairs for one column, in row order
    pub fn column_values(&self, name: &str) -> Result<Vec<RegionValue>> {
        let idx = self.column_index(name)?;
        Ok(self
            .records
            .iter()
            .map(|r| RegionValue {
                region: r.region.clone(),
                value: r.values[idx],
            })
            .collect())
    }

    /// A new table holding only the rows that satisfy `keep`.
    pub fn filtered<F>(&self, keep: F) -> RegionTable
    where
        F: Fn(&RegionRecord) -> bool,
    {
        RegionTable {
            columns: self.columns.clone(),
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// A new table with one extra column appended.
    pub fn with_column(&self, name: &str, values: Vec<f64>) -> Result<RegionTable> {
        if values.len() != self.records.len() {
            return Err(AnalysisError::SchemaMismatch {
                source_name: name.to_string(),
                schema: "derived".to_string(),
                version: 1,
                reason: format!("{} values for {} rows", values.len(), self.records.len()),
            });
        }
        let mut columns = self.columns.clone();
        columns.push(name.to_string());
        let records = self
            .records
            .iter()
            .zip(values)
            .map(|(r, v)| {
                let mut values = r.values.clone();
                values.push(v);
                RegionRecord {
                    region: r.region.clone(),
                    values,
                }
            })
            .collect();
        Ok(RegionTable { columns, records })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionValue {
    pub region: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarRegion {
    pub region: String,
    pub value: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Total,
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Total, Gender::Male, Gender::Female];

    pub fn label(&self) -> &'static str {
        match self {
            Gender::Total => "합산",
            Gender::Male => "남성",
            Gender::Female => "여성",
        }
    }

    /// Infix used by the source count columns
    pub fn code(&self) -> &'static str {
        match self {
            Gender::Total => "계",
            Gender::Male => "남",
            Gender::Female => "여",
        }
    }

    pub fn ratio_column(&self) -> String {
        format!("{} 1인 세대 비율(%)", self.label())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "total" | "all" | "합산" => Ok(Gender::Total),
            "male" | "남성" => Ok(Gender::Male),
            "female" | "여성" => Ok(Gender::Female),
            other => Err(format!("unknown group '{}' (expected total, male or female)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionScope {
    Nationwide,
    /// Keep regions whose name contains the text
    Contains(String),
}

impl RegionScope {
    pub fn label(&self) -> String {
        match self {
            RegionScope::Nationwide => "전국".to_string(),
            RegionScope::Contains(text) => text.clone(),
        }
    }
}

impl FromStr for RegionScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "" => Err("empty region scope".to_string()),
            "nationwide" | "전국" => Ok(RegionScope::Nationwide),
            "seoul" | "서울특별시" => Ok(RegionScope::Contains("서울".to_string())),
            _ => Ok(RegionScope::Contains(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBand {
    All,
    Years(u32),
}

impl fmt::Display for AgeBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeBand::All => write!(f, "전체"),
            AgeBand::Years(age) => write!(f, "{}세", age),
        }
    }
}

impl FromStr for AgeBand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") || s == "전체" {
            return Ok(AgeBand::All);
        }
        s.trim_end_matches('세')
            .parse::<u32>()
            .map(AgeBand::Years)
            .map_err(|_| format!("invalid age band '{}' (expected 'all' or an age like 20)", s))
    }
}

/// Trim a region name and collapse inner whitespace runs
pub fn normalize_region(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

static REGION_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(\d+\)\s*$").expect("region code pattern is valid"));

/// Drop the trailing administrative code, e.g. "서울특별시 종로구 (1111000000)"
/// becomes "서울특별시 종로구".
pub fn short_region_name(name: &str) -> String {
    REGION_CODE.replace(name, "").to_string()
}
