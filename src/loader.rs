use crate::error::{AnalysisError, Result};
use crate::models::{normalize_region, DataFile, EncodingChoice, RegionRecord, RegionTable, SchemaDescriptor};
use encoding_rs::{Encoding, EUC_KR, UTF_8};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;
use tracing::{debug, info};

/// What makes two loads interchangeable: same file contents on disk, read
/// through the same schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileIdentity {
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
    schema: String,
    version: u32,
}

impl FileIdentity {
    fn of(path: &Path, schema: &SchemaDescriptor) -> Result<Self> {
        let path = fs::canonicalize(path)?;
        let meta = fs::metadata(&path)?;
        Ok(Self {
            path,
            len: meta.len(),
            modified: meta.modified().ok(),
            schema: schema.name.clone(),
            version: schema.version,
        })
    }
}

/// Loads region tables and memoizes them for the lifetime of the process.
/// Tables are never mutated after loading, so handing out shared handles is
/// enough.
pub struct TableLoader {
    cache: HashMap<FileIdentity, Rc<RegionTable>>,
}

impl TableLoader {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    pub fn load(&mut self, file: &DataFile, schema: &SchemaDescriptor) -> Result<Rc<RegionTable>> {
        let path = Path::new(&file.path);
        let identity = FileIdentity::of(path, schema)?;

        if let Some(table) = self.cache.get(&identity) {
            debug!("cache hit for {}", file.path);
            return Ok(Rc::clone(table));
        }

        let table = Rc::new(load_table(path, file.encoding, schema)?);
        self.cache.insert(identity, Rc::clone(&table));
        Ok(table)
    }

    pub fn cached_tables(&self) -> usize {
        self.cache.len()
    }
}

/// Read, decode and parse one file without touching any cache.
pub fn load_table(path: &Path, encoding: EncodingChoice, schema: &SchemaDescriptor) -> Result<RegionTable> {
    let source_name = path.display().to_string();
    let bytes = fs::read(path)?;
    let text = decode_bytes(&bytes, encoding, &source_name)?;
    let table = parse_table(&text, schema, &source_name)?;
    info!(
        "📄 Loaded {} regions x {} columns from {}",
        table.len(),
        table.columns().len(),
        source_name
    );
    Ok(table)
}

/// Decode raw file bytes. `Auto` tries UTF-8 first and falls back to EUC-KR,
/// which covers the exports seen in practice.
pub fn decode_bytes(bytes: &[u8], encoding: EncodingChoice, source_name: &str) -> Result<String> {
    match encoding {
        EncodingChoice::Utf8 => decode_with(bytes, UTF_8, source_name),
        EncodingChoice::EucKr => decode_with(bytes, EUC_KR, source_name),
        EncodingChoice::Auto => match decode_with(bytes, UTF_8, source_name) {
            Ok(text) => Ok(text),
            Err(_) => {
                debug!("{} is not valid UTF-8, retrying as EUC-KR", source_name);
                decode_with(bytes, EUC_KR, source_name)
            }
        },
    }
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding, source_name: &str) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(AnalysisError::Decode {
            path: source_name.to_string(),
            encoding: encoding.name().to_string(),
        });
    }
    Ok(text.into_owned())
}

/// Parse decoded CSV text into a table, validating the header against the
/// schema before any row is read.
pub fn parse_table(text: &str, schema: &SchemaDescriptor, source_name: &str) -> Result<RegionTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let resolved = schema.resolve(&header, source_name)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let region = normalize_region(row.get(resolved.key_index).unwrap_or(""));
        if region.is_empty() {
            debug!("skipping row without region name in {}", source_name);
            continue;
        }
        let values = resolved
            .value_columns
            .iter()
            .map(|(idx, _)| parse_count(row.get(*idx).unwrap_or("")))
            .collect();
        records.push(RegionRecord { region, values });
    }

    if records.is_empty() {
        return Err(AnalysisError::EmptyData(format!("no data rows in {}", source_name)));
    }

    let columns = resolved.value_columns.into_iter().map(|(_, name)| name).collect();
    RegionTable::new(source_name, columns, records)
}

/// Strip thousands separators and coerce to a number; anything unparsable
/// counts as zero.
pub fn parse_count(raw: &str) -> f64 {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::HouseholdAnalyzer;
    use crate::models::{Config, PopulationLayout, SchemaLayout};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SINGLE: &str = "행정구역,2025년01월_계_총세대수,2025년01월_남_총세대수,2025년01월_여_총세대수\n\
        서울특별시 종로구,\"1,200\",700,500\n\
        서울특별시  중구 ,900,,450\n\
        부산광역시 중구,abc,300,200\n";

    fn write_temp(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1,234,567"), 1_234_567.0);
        assert_eq!(parse_count(" 42 "), 42.0);
        assert_eq!(parse_count(""), 0.0);
        assert_eq!(parse_count("-"), 0.0);
        assert_eq!(parse_count("NaN"), 0.0);
        assert_eq!(parse_count("12.5"), 12.5);
    }

    #[test]
    fn test_parse_table_cleans_values_and_names() {
        let schema = Config::default().single_household_schema();
        let table = parse_table(SINGLE, &schema, "single.csv").unwrap();

        assert_eq!(table.len(), 3);
        let jongno = table.find("서울특별시 종로구").unwrap();
        assert_eq!(jongno.values, vec![1200.0, 700.0, 500.0]);

        let junggu = table.find("서울특별시 중구").unwrap();
        assert_eq!(junggu.values, vec![900.0, 0.0, 450.0]);

        let busan = table.find("부산광역시 중구").unwrap();
        assert_eq!(busan.values[0], 0.0);
    }

    #[test]
    fn test_parse_table_rejects_wrong_header() {
        let schema = Config::default().total_households_schema();
        let err = parse_table("행정구역,세대수\nA,1\n", &schema, "total.csv").unwrap_err();
        assert!(matches!(err, AnalysisError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_parse_table_rejects_duplicate_regions_after_cleaning() {
        let schema = Config::default().total_households_schema();
        let text = "행정구역,2025년01월_세대수\n서울  중구,1\n서울 중구,2\n";
        let err = parse_table(text, &schema, "total.csv").unwrap_err();
        assert!(matches!(err, AnalysisError::DuplicateRegion { .. }));
    }

    #[test]
    fn test_parse_table_rejects_header_only_file() {
        let schema = Config::default().total_households_schema();
        let err = parse_table("행정구역,2025년01월_세대수\n", &schema, "total.csv").unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyData(_)));
    }

    #[test]
    fn test_ragged_rows_are_csv_errors() {
        let schema = Config::default().population_schema();
        let err = parse_table("a,b,c\nX,1,2\nY,1\n", &schema, "pop.csv").unwrap_err();
        assert!(matches!(err, AnalysisError::Csv(_)));
    }

    #[test]
    fn test_decode_euc_kr_and_auto_fallback() {
        let (encoded, _, _) = EUC_KR.encode("행정구역,값\n종로구,1\n");
        let bytes = encoded.into_owned();

        assert!(decode_bytes(&bytes, EncodingChoice::Utf8, "x.csv").is_err());
        let text = decode_bytes(&bytes, EncodingChoice::EucKr, "x.csv").unwrap();
        assert!(text.starts_with("행정구역"));
        let auto = decode_bytes(&bytes, EncodingChoice::Auto, "x.csv").unwrap();
        assert_eq!(auto, text);
    }

    #[test]
    fn test_decode_strips_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("행정구역".as_bytes());
        assert_eq!(decode_bytes(&bytes, EncodingChoice::Auto, "x.csv").unwrap(), "행정구역");
    }

    #[test]
    fn test_positional_population_file() {
        let (encoded, _, _) = EUC_KR.encode("행정구역,0~9세,10~19세,총인구수\n종로구,\"1,000\",2000,3000\n중구,10,20,30\n");
        let file = write_temp(&encoded);
        let schema = Config::default().population_schema();

        let table = load_table(file.path(), EncodingChoice::EucKr, &schema).unwrap();
        assert_eq!(table.columns(), &["인구_1".to_string(), "인구_2".to_string(), "총인구".to_string()]);
        assert_eq!(table.find("종로구").unwrap().values, vec![1000.0, 2000.0, 3000.0]);
    }

    #[test]
    fn test_header_population_file() {
        let config = Config {
            population_layout: PopulationLayout::Header,
            ..Config::default()
        };
        let schema = config.population_schema();
        assert_eq!(schema.version, 2);
        assert_eq!(config.population_total_name(), "2025년01월_계_총인구수");

        let (encoded, _, _) = EUC_KR.encode(
            r#"행정구역,2025년01월_계_총인구수,2025년01월_계_0~9세,2025년01월_계_10~19세
             서울특별시 종로구 (1111000000),"3,000","1,000",2000
             서울특별시 중구 (1114000000),30,10,20
"#,
        );
        let file = write_temp(&encoded);
        let table = load_table(file.path(), EncodingChoice::Auto, &schema).unwrap();
        assert_eq!(table.len(), 2);

        let summary = HouseholdAnalyzer::new(&config)
            .population(&table, Some("서울특별시 종로구"), 1)
            .unwrap();
        assert_eq!(
            summary.trend,
            vec![
                ("2025년01월_계_0~9세".to_string(), 505.0),
                ("2025년01월_계_10~19세".to_string(), 1010.0),
            ]
        );
        assert_eq!(summary.top.len(), 1);
        assert_eq!(summary.top[0].region, "서울특별시 종로구 (1111000000)");
        assert_eq!(summary.top[0].value, 3000.0);
        let (region, profile) = summary.profile.unwrap();
        assert_eq!(region, "서울특별시 종로구 (1111000000)");
        assert_eq!(profile[0], ("2025년01월_계_0~9세".to_string(), 1000.0));
    }

    #[test]
    fn test_header_population_file_requires_total_column() {
        let config = Config {
            population_layout: PopulationLayout::Header,
            population_total_column: Some("총인구수".to_string()),
            ..Config::default()
        };
        let err = parse_table(
            "행정구역,2025년01월_계_총인구수
A,1
",
            &config.population_schema(),
            "pop.csv",
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::SchemaMismatch { version: 2, .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let schema = SchemaDescriptor {
            name: "x".to_string(),
            version: 1,
            key: "k".to_string(),
            layout: SchemaLayout::Header { required: vec![] },
        };
        let err = load_table(Path::new("/nonexistent/data.csv"), EncodingChoice::Auto, &schema).unwrap_err();
        assert!(matches!(err, AnalysisError::Io(_)));
    }

    #[test]
    fn test_loader_memoizes_by_file_identity() {
        let file = write_temp(SINGLE.as_bytes());
        let data_file = DataFile {
            path: file.path().to_string_lossy().to_string(),
            encoding: EncodingChoice::Utf8,
        };
        let schema = Config::default().single_household_schema();

        let mut loader = TableLoader::new();
        let first = loader.load(&data_file, &schema).unwrap();
        let second = loader.load(&data_file, &schema).unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(loader.cached_tables(), 1);
    }
}
