use crate::analyzer::{PopulationSummary, RatioExtremes, SimilarityView, ViewFilter};
use crate::charts::{sanitize_file_name, ChartWriter};
use crate::models::{short_region_name, Config, RegionValue};
use anyhow::{Context, Result};
use plotters::style::RGBColor;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const EMPTY_STATE: &str = "❓ 선택한 조건에 해당하는 데이터가 없습니다.";

const TOP_COLOR: RGBColor = RGBColor(49, 130, 189);
const BOTTOM_COLOR: RGBColor = RGBColor(222, 45, 38);
const SIMILAR_COLOR: RGBColor = RGBColor(42, 157, 143);

#[derive(Debug, Serialize)]
struct RankedRow<'a> {
    rank: usize,
    region: &'a str,
    value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f64>,
}

/// Numbered listing, one region per line. Percentages get one decimal,
/// head counts none.
pub fn format_listing(title: &str, rows: &[RegionValue], percent: bool) -> String {
    let mut content = String::new();
    content.push_str(&format!("{}\n", title));
    content.push_str(&format!("{}\n", "=".repeat(title.chars().count())));
    if rows.is_empty() {
        content.push_str(&format!("   {}\n", EMPTY_STATE));
        return content;
    }
    for (i, row) in rows.iter().enumerate() {
        let value = if percent {
            format!("{:.1}%", row.value)
        } else {
            format!("{:.0}", row.value)
        };
        content.push_str(&format!("   {}. {} - {}\n", i + 1, short_region_name(&row.region), value));
    }
    content
}

/// Plain-text table of the first rows, counts without decimals
pub fn format_preview(columns: &[String], rows: &[crate::models::RegionRecord]) -> String {
    let mut content = String::new();
    content.push_str("지역명");
    for name in columns {
        content.push_str(&format!(" | {}", name));
    }
    content.push('\n');
    for row in rows {
        content.push_str(&short_region_name(&row.region));
        for value in &row.values {
            content.push_str(&format!(" | {:.0}", value));
        }
        content.push('\n');
    }
    content
}

/// Numbered list of selectable region names, printed in full so any of them
/// can be passed back as a reference.
pub fn format_region_list(title: &str, names: &[String]) -> String {
    let mut content = format!("{} ({}곳)\n", title, names.len());
    if names.is_empty() {
        content.push_str(&format!("   {}\n", EMPTY_STATE));
        return content;
    }
    for (i, name) in names.iter().enumerate() {
        content.push_str(&format!("   {}. {}\n", i + 1, name));
    }
    content
}

fn filter_suffix(filter: &ViewFilter) -> String {
    format!("{}_{}_{}", filter.scope.label(), filter.gender.label(), filter.age)
}

pub struct ReportWriter {
    output_dir: PathBuf,
    charts: Option<ChartWriter>,
}

impl ReportWriter {
    pub fn new(config: &Config, charts_enabled: bool) -> Result<Self> {
        let output_dir = PathBuf::from(config.output_directory.as_deref().unwrap_or("output"));
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

        let charts = if charts_enabled && config.charts.enabled {
            Some(ChartWriter::new(&output_dir, config.charts.width, config.charts.height))
        } else {
            None
        };

        Ok(Self { output_dir, charts })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn ratio_extremes(&self, extremes: &RatioExtremes, filter: &ViewFilter) -> Result<()> {
        let suffix = filter_suffix(filter);
        println!(
            "\n📍 {} / 👥 {} / 🎯 {} - {} ({} regions)",
            filter.scope.label(),
            filter.gender.label(),
            filter.age,
            extremes.column,
            extremes.candidates
        );

        let views = [
            ("top", "🔼 1인 세대 비율 상위", &extremes.top, TOP_COLOR),
            ("bottom", "🔽 1인 세대 비율 하위", &extremes.bottom, BOTTOM_COLOR),
        ];
        for (kind, heading, rows, color) in views {
            let title = format!("{} {}개 지역 ({})", heading, rows.len(), filter.gender.label());
            print!("{}", format_listing(&title, rows, true));
            if rows.is_empty() {
                continue;
            }

            let stem = format!("{}_{}", kind, suffix);
            let ranked: Vec<RankedRow> = rows
                .iter()
                .enumerate()
                .map(|(i, r)| RankedRow {
                    rank: i + 1,
                    region: &r.region,
                    value: r.value,
                    distance: None,
                })
                .collect();
            self.write_csv(&stem, &ranked)?;
            self.bar_chart(&stem, &title, rows.iter().map(|r| (r.region.clone(), r.value)).collect(), color);
        }
        Ok(())
    }

    pub fn similarity(&self, view: &SimilarityView, filter: &ViewFilter) -> Result<()> {
        let title = format!(
            "🔍 {}과 가장 비슷한 1인 세대 비율 지역 {}곳 ({})",
            short_region_name(&view.reference),
            view.regions.len(),
            filter.gender.label()
        );

        let reference_value = match view.reference_value {
            Some(value) => value,
            None => {
                println!("\n{}\n   {}", title, EMPTY_STATE);
                return Ok(());
            }
        };

        println!(
            "\n📌 기준 지역: {} - {} {:.1}%",
            short_region_name(&view.reference),
            view.column,
            reference_value
        );
        let rows: Vec<RegionValue> = view
            .regions
            .iter()
            .map(|r| RegionValue {
                region: r.region.clone(),
                value: r.value,
            })
            .collect();
        print!("{}", format_listing(&title, &rows, true));
        if rows.is_empty() {
            return Ok(());
        }

        let stem = format!("similar_{}_{}", sanitize_file_name(&view.reference), filter_suffix(filter));
        let ranked: Vec<RankedRow> = view
            .regions
            .iter()
            .enumerate()
            .map(|(i, r)| RankedRow {
                rank: i + 1,
                region: &r.region,
                value: r.value,
                distance: Some(r.distance),
            })
            .collect();
        self.write_csv(&stem, &ranked)?;
        self.bar_chart(&stem, &title, rows.into_iter().map(|r| (r.region, r.value)).collect(), SIMILAR_COLOR);
        Ok(())
    }

    pub fn regions(&self, title: &str, names: &[String]) {
        print!("\n{}", format_region_list(title, names));
    }

    pub fn age_bands(&self, ages: &[u32]) {
        if ages.is_empty() {
            println!("❓ 연령대 데이터가 없습니다.");
            return;
        }
        let labels: Vec<String> = ages.iter().map(|a| format!("{}세", a)).collect();
        println!("🎯 연령 선택: 전체, {}", labels.join(", "));
    }

    pub fn population(&self, summary: &PopulationSummary, columns: &[String], requested_region: Option<&str>) -> Result<()> {
        println!("\n🔄 인구 트렌드 (전체 지역 평균)");
        if summary.trend.is_empty() {
            println!("   ❓ 연령대 데이터가 없습니다.");
        } else {
            for (band, mean) in &summary.trend {
                println!("   {} - {:.1}", band, mean);
            }
            if let Some(charts) = &self.charts {
                if let Err(e) = charts.line("population_trend", "전체 지역 평균 인구 트렌드", "연령대", "평균 인구 수", &summary.trend) {
                    warn!("⚠️  Could not render trend chart: {}", e);
                }
            }
        }

        match (&summary.profile, requested_region) {
            (Some((region, profile)), _) => {
                println!("\n📍 {} 연령별 인구 분포", short_region_name(region));
                for (band, count) in profile {
                    println!("   {} - {:.0}", band, count);
                }
                if let Some(charts) = &self.charts {
                    let stem = format!("population_{}", region);
                    let title = format!("{} 연령별 인구 분포", short_region_name(region));
                    if let Err(e) = charts.vertical_bars(&stem, &title, "연령대", "인구 수", profile) {
                        warn!("⚠️  Could not render region chart: {}", e);
                    }
                }
            }
            (None, Some(region)) => {
                println!("\n📍 {} 연령별 인구 분포\n   {}", region, EMPTY_STATE);
            }
            (None, None) => {}
        }

        let title = format!("🏆 지역별 총인구 순위 (Top {})", summary.top.len());
        print!("\n{}", format_listing(&title, &summary.top, false));
        if !summary.top.is_empty() {
            if let Some(charts) = &self.charts {
                let items: Vec<(String, f64)> = summary.top.iter().map(|r| (r.region.clone(), r.value)).collect();
                if let Err(e) = charts.vertical_bars("population_top", "지역별 총인구 Top", "지역명", "총인구", &items) {
                    warn!("⚠️  Could not render top population chart: {}", e);
                }
            }
        }

        println!("\n📄 원본 데이터 샘플 (상위 {}개 지역)", summary.preview.len());
        print!("{}", format_preview(columns, &summary.preview));
        Ok(())
    }

    fn write_csv<T: Serialize>(&self, stem: &str, rows: &[T]) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{}.csv", sanitize_file_name(stem)));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(path)
    }

    /// Chart failures are reported but never abort the view
    fn bar_chart(&self, stem: &str, title: &str, items: Vec<(String, f64)>, color: RGBColor) {
        if let Some(charts) = &self.charts {
            if let Err(e) = charts.horizontal_bars(stem, title, "1인 세대 비율 (%)", &items, Some(100.0), color) {
                warn!("⚠️  Could not render chart {}: {}", stem, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgeBand, Gender, RegionRecord, RegionScope, SimilarRegion};

    fn config_in(dir: &Path) -> Config {
        Config {
            output_directory: Some(dir.to_string_lossy().to_string()),
            ..Config::default()
        }
    }

    fn seoul_filter() -> ViewFilter {
        ViewFilter {
            scope: RegionScope::Contains("서울".to_string()),
            gender: Gender::Total,
            age: AgeBand::All,
        }
    }

    #[test]
    fn test_format_listing() {
        let rows = vec![
            RegionValue { region: "서울특별시 종로구 (1111000000)".to_string(), value: 45.26 },
            RegionValue { region: "서울특별시 중구".to_string(), value: 40.0 },
        ];
        let text = format_listing("상위", &rows, true);
        assert!(text.contains("1. 서울특별시 종로구 - 45.3%"));
        assert!(text.contains("2. 서울특별시 중구 - 40.0%"));
    }

    #[test]
    fn test_format_listing_empty_state() {
        assert!(format_listing("상위", &[], true).contains(EMPTY_STATE));
    }

    #[test]
    fn test_format_listing_counts() {
        let rows = vec![RegionValue { region: "경기도".to_string(), value: 13_600_000.0 }];
        assert!(format_listing("총인구", &rows, false).contains("1. 경기도 - 13600000\n"));
    }

    #[test]
    fn test_format_region_list() {
        let names = vec!["서울특별시 종로구 (1111000000)".to_string(), "서울특별시 중구".to_string()];
        let text = format_region_list("📍 선택 가능한 지역", &names);
        assert!(text.starts_with("📍 선택 가능한 지역 (2곳)\n"));
        assert!(text.contains("   1. 서울특별시 종로구 (1111000000)\n"));
        assert!(text.contains("   2. 서울특별시 중구\n"));
        assert!(format_region_list("x", &[]).contains(EMPTY_STATE));
    }

    #[test]
    fn test_format_preview() {
        let rows = vec![RegionRecord { region: "A".to_string(), values: vec![1.0, 2500.0] }];
        let text = format_preview(&["인구_1".to_string(), "총인구".to_string()], &rows);
        assert_eq!(text, "지역명 | 인구_1 | 총인구\nA | 1 | 2500\n");
    }

    #[test]
    fn test_ratio_extremes_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(&config_in(dir.path()), false).unwrap();
        let extremes = RatioExtremes {
            column: Gender::Total.ratio_column(),
            candidates: 2,
            top: vec![RegionValue { region: "서울특별시 중구".to_string(), value: 30.0 }],
            bottom: vec![],
        };
        writer.ratio_extremes(&extremes, &seoul_filter()).unwrap();

        let csv_path = dir.path().join(format!("top_{}.csv", sanitize_file_name("서울_합산_전체")));
        let content = fs::read_to_string(csv_path).unwrap();
        assert!(content.starts_with("rank,region,value"));
        assert!(content.contains("1,서울특별시 중구,30.0"));
        assert!(!dir.path().join(format!("bottom_{}.csv", sanitize_file_name("서울_합산_전체"))).exists());
    }

    #[test]
    fn test_similarity_without_reference_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(&config_in(dir.path()), false).unwrap();
        let view = SimilarityView {
            column: Gender::Total.ratio_column(),
            reference: "서울특별시 중구".to_string(),
            reference_value: None,
            regions: vec![],
        };
        writer.similarity(&view, &seoul_filter()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_similarity_csv_has_distance() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(&config_in(dir.path()), false).unwrap();
        let view = SimilarityView {
            column: Gender::Total.ratio_column(),
            reference: "C".to_string(),
            reference_value: Some(50.0),
            regions: vec![
                SimilarRegion { region: "B".to_string(), value: 30.0, distance: 20.0 },
                SimilarRegion { region: "D".to_string(), value: 70.0, distance: 20.0 },
            ],
        };
        writer.similarity(&view, &seoul_filter()).unwrap();

        let csv_file = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with("similar_C"))
            .unwrap();
        let content = fs::read_to_string(csv_file.path()).unwrap();
        assert!(content.starts_with("rank,region,value,distance"));
        assert!(content.contains("1,B,30.0,20.0"));
        assert!(content.contains("2,D,70.0,20.0"));
    }
}
