mod analyzer;
mod charts;
mod error;
mod loader;
mod models;
mod report;

use analyzer::{HouseholdAnalyzer, ViewFilter};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use loader::TableLoader;
use models::{AgeBand, Config, Gender, RegionScope, RegionTable};
use report::ReportWriter;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};

/// Filter arguments shared by every household view
fn with_view_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("scope")
                .short('s')
                .long("scope")
                .value_name("SCOPE")
                .help("Region scope: nationwide, seoul, or any text the region name must contain")
                .value_parser(|s: &str| s.parse::<RegionScope>())
                .default_value("nationwide"),
        )
        .arg(
            Arg::new("gender")
                .short('g')
                .long("gender")
                .value_name("GROUP")
                .help("Demographic group: total, male or female")
                .value_parser(|s: &str| s.parse::<Gender>())
                .default_value("total"),
        )
        .arg(
            Arg::new("age")
                .short('a')
                .long("age")
                .value_name("AGE")
                .help("Age band (e.g. 20) or 'all'")
                .value_parser(|s: &str| s.parse::<AgeBand>())
                .default_value("all"),
        )
        .arg(top_arg())
}

fn top_arg() -> Arg {
    Arg::new("top")
        .short('n')
        .long("top")
        .value_name("N")
        .help("Number of regions per view (defaults to top_n from the config)")
        .value_parser(clap::value_parser!(usize))
}

/// Commands that render one view; available both from the shell and inside `explore`
fn view_commands() -> Vec<Command> {
    vec![
        with_view_args(Command::new("ratios").about("Top and bottom regions by single-person household ratio")),
        with_view_args(
            Command::new("similar")
                .about("Regions whose ratio is closest to a reference region")
                .arg(
                    Arg::new("reference")
                        .short('r')
                        .long("reference")
                        .value_name("REGION")
                        .help("Region name to compare against, with or without its administrative code")
                        .required(true),
                ),
        ),
        with_view_args(
            Command::new("regions")
                .about("List the region names left after the scope and age selections")
                .arg(
                    Arg::new("population")
                        .short('p')
                        .long("population")
                        .help("List the regions of the age-band population file instead")
                        .action(ArgAction::SetTrue),
                ),
        ),
        Command::new("ages").about("List the age bands present in the single-person household file"),
        Command::new("population")
            .about("Age-band population trend, region profile, top regions and preview")
            .arg(
                Arg::new("region")
                    .short('r')
                    .long("region")
                    .value_name("REGION")
                    .help("Region whose age distribution should be shown"),
            )
            .arg(top_arg()),
    ]
}

fn build_cli() -> Command {
    Command::new("household-analyzer")
        .version("1.0")
        .about("Analyzes single-person household ratios across administrative regions")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true)
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level when RUST_LOG is not set")
                .global(true)
                .default_value("warn"),
        )
        .arg(
            Arg::new("no-charts")
                .long("no-charts")
                .help("Skip SVG chart rendering")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommands(view_commands())
        .subcommand(Command::new("explore").about("Keep the data loaded and answer one view per input line"))
}

fn explore_cli() -> Command {
    Command::new("explore")
        .no_binary_name(true)
        .subcommand_required(true)
        .disable_version_flag(true)
        .subcommands(view_commands())
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Split an input line into arguments; double quotes group words so region
/// names with spaces survive.
fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

fn view_filter(matches: &ArgMatches) -> ViewFilter {
    ViewFilter {
        scope: matches
            .get_one::<RegionScope>("scope")
            .cloned()
            .unwrap_or(RegionScope::Nationwide),
        gender: matches.get_one::<Gender>("gender").copied().unwrap_or(Gender::Total),
        age: matches.get_one::<AgeBand>("age").copied().unwrap_or(AgeBand::All),
    }
}

/// Everything one process keeps between views. Source tables come from the
/// loader cache; the combined table is rebuilt only when a source changes.
struct Session {
    config: Config,
    loader: TableLoader,
    reports: ReportWriter,
    combined_cache: Option<(Rc<RegionTable>, Rc<RegionTable>, Rc<RegionTable>)>,
}

impl Session {
    fn new(config: Config, charts_enabled: bool) -> Result<Self> {
        let reports = ReportWriter::new(&config, charts_enabled)?;
        Ok(Self {
            config,
            loader: TableLoader::new(),
            reports,
            combined_cache: None,
        })
    }

    fn single_household(&mut self) -> Result<Rc<RegionTable>> {
        let schema = self.config.single_household_schema();
        self.loader
            .load(&self.config.single_household, &schema)
            .with_context(|| format!("Failed to load {}", self.config.single_household.path))
    }

    fn combined(&mut self) -> Result<Rc<RegionTable>> {
        let single = self.single_household()?;
        let schema = self.config.total_households_schema();
        let totals = self
            .loader
            .load(&self.config.total_households, &schema)
            .with_context(|| format!("Failed to load {}", self.config.total_households.path))?;

        if let Some((s, t, combined)) = &self.combined_cache {
            if Rc::ptr_eq(s, &single) && Rc::ptr_eq(t, &totals) {
                debug!("reusing combined table");
                return Ok(Rc::clone(combined));
            }
        }

        let combined = Rc::new(HouseholdAnalyzer::new(&self.config).combine(&single, &totals)?);
        info!("🔗 Combined table has {} regions", combined.len());
        self.combined_cache = Some((single, totals, Rc::clone(&combined)));
        Ok(combined)
    }

    fn population(&mut self) -> Result<Rc<RegionTable>> {
        let file = self
            .config
            .population
            .clone()
            .context("No population file configured")?;
        let schema = self.config.population_schema();
        self.loader
            .load(&file, &schema)
            .with_context(|| format!("Failed to load {}", file.path))
    }

    fn run(&mut self, name: &str, matches: &ArgMatches) -> Result<()> {
        let top = matches
            .try_get_one::<usize>("top")
            .ok()
            .flatten()
            .copied()
            .unwrap_or(self.config.top_n);

        match name {
            "ratios" => {
                let combined = self.combined()?;
                let filter = view_filter(matches);
                let extremes = HouseholdAnalyzer::new(&self.config).ratio_extremes(&combined, &filter, top)?;
                self.reports.ratio_extremes(&extremes, &filter)
            }
            "similar" => {
                let combined = self.combined()?;
                let filter = view_filter(matches);
                let reference = matches
                    .get_one::<String>("reference")
                    .map(|r| models::normalize_region(r))
                    .unwrap_or_default();
                let view = HouseholdAnalyzer::new(&self.config).similar(&combined, &filter, &reference, top)?;
                self.reports.similarity(&view, &filter)
            }
            "regions" => {
                let filter = view_filter(matches);
                if matches.get_flag("population") {
                    let table = self.population()?;
                    let names: Vec<String> = analyzer::filter_scope(&table, &filter.scope)
                        .records()
                        .iter()
                        .map(|r| r.region.clone())
                        .collect();
                    self.reports.regions("📍 인구 데이터 지역", &names);
                } else {
                    let combined = self.combined()?;
                    let names = HouseholdAnalyzer::new(&self.config).region_names(&combined, &filter);
                    self.reports.regions("📍 선택 가능한 지역", &names);
                }
                Ok(())
            }
            "ages" => {
                let single = self.single_household()?;
                let ages = HouseholdAnalyzer::new(&self.config).age_bands(&single);
                self.reports.age_bands(&ages);
                Ok(())
            }
            "population" => {
                let table = self.population()?;
                let region = matches.get_one::<String>("region").map(|r| models::normalize_region(r));
                let summary = HouseholdAnalyzer::new(&self.config).population(&table, region.as_deref(), top)?;
                let columns: Vec<String> = table.columns().to_vec();
                self.reports.population(&summary, &columns, region.as_deref())
            }
            other => Err(anyhow::anyhow!("Unknown command: {}", other)),
        }
    }

    fn explore(&mut self) -> Result<()> {
        println!("🧭 Interactive mode. Type a command (ratios, similar, regions, ages, population), 'help' or 'quit'.");
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        loop {
            print!("> ");
            io::stdout().flush()?;

            let line = match lines.next() {
                Some(line) => line?,
                None => break,
            };
            let args = split_args(&line);
            match args.first().map(|a| a.as_str()) {
                None => continue,
                Some("quit") | Some("exit") => break,
                Some("help") => {
                    explore_cli().print_help()?;
                    println!();
                    continue;
                }
                Some(_) => {}
            }

            let matches = match explore_cli().try_get_matches_from(&args) {
                Ok(matches) => matches,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };
            if let Some((name, sub)) = matches.subcommand() {
                if let Err(e) = self.run(name, sub) {
                    println!("❌ Error: {:#}", e);
                }
            }
        }

        println!("👋 {} tables cached this session", self.loader.cached_tables());
        Ok(())
    }
}

fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(|s| s.as_str())
        .unwrap_or("warn");
    init_logging(log_level);

    let config_file = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    // Load or create configuration
    let config = if Path::new(config_file).exists() {
        info!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to read configuration {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        Config::default().save_to_file(config_file)?;
        println!("⚠️  Please edit {} and point it at your data files, then run the program again.", config_file);
        return Ok(());
    };

    let charts_enabled = !matches.get_flag("no-charts");
    let mut session = Session::new(config, charts_enabled)?;

    match matches.subcommand() {
        Some(("explore", _)) => session.explore()?,
        Some((name, sub)) => {
            if let Err(e) = session.run(name, sub) {
                println!("❌ Error: {:#}", e);
                return Ok(());
            }
            println!("\n📂 Results written to {}", session.reports.output_dir().display());
        }
        None => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        build_cli().debug_assert();
        explore_cli().debug_assert();
    }

    #[test]
    fn test_split_args_keeps_quoted_names() {
        assert_eq!(
            split_args(r#"similar -r "서울특별시 종로구" --top 5"#),
            vec!["similar", "-r", "서울특별시 종로구", "--top", "5"]
        );
        assert_eq!(split_args("   "), Vec::<String>::new());
        assert_eq!(split_args(r#"x """#), vec!["x", ""]);
    }

    #[test]
    fn test_view_args_parse_into_selectors() {
        let matches = explore_cli()
            .try_get_matches_from(["ratios", "--scope", "seoul", "-g", "female", "-a", "30", "-n", "3"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "ratios");

        let filter = view_filter(sub);
        assert_eq!(filter.scope, RegionScope::Contains("서울".to_string()));
        assert_eq!(filter.gender, Gender::Female);
        assert_eq!(filter.age, AgeBand::Years(30));
        assert_eq!(sub.get_one::<usize>("top").copied(), Some(3));
    }

    #[test]
    fn test_invalid_gender_is_rejected() {
        assert!(explore_cli()
            .try_get_matches_from(["ratios", "--gender", "unknown"])
            .is_err());
    }

    #[test]
    fn test_regions_takes_view_filters() {
        let matches = explore_cli()
            .try_get_matches_from(["regions", "-s", "seoul", "-a", "20", "--population"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "regions");
        assert!(sub.get_flag("population"));
        assert_eq!(view_filter(sub).age, AgeBand::Years(20));
    }

    #[test]
    fn test_similar_requires_reference() {
        assert!(explore_cli().try_get_matches_from(["similar"]).is_err());
    }

    #[test]
    fn test_session_runs_views_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("single.csv");
        let totals = dir.path().join("totals.csv");
        std::fs::write(
            &single,
            "행정구역,2025년01월_계_총세대수,2025년01월_남_총세대수,2025년01월_여_총세대수\n\
             서울특별시 종로구,\"1,000\",600,400\n\
             서울특별시 중구,500,200,300\n\
             부산광역시 중구,100,50,50\n",
        )
        .unwrap();
        std::fs::write(
            &totals,
            "행정구역,2025년01월_세대수\n서울특별시 종로구,\"2,000\"\n서울특별시 중구,2000\n부산광역시 중구,0\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.single_household.path = single.to_string_lossy().to_string();
        config.total_households.path = totals.to_string_lossy().to_string();
        config.population = None;
        config.output_directory = Some(dir.path().join("out").to_string_lossy().to_string());

        let mut session = Session::new(config, false).unwrap();
        let combined = session.combined().unwrap();
        assert_eq!(combined.len(), 3);
        assert!(Rc::ptr_eq(&combined, &session.combined().unwrap()));

        let matches = explore_cli()
            .try_get_matches_from(["similar", "-r", "서울특별시 중구"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        session.run(name, sub).unwrap();

        let matches = explore_cli().try_get_matches_from(["regions", "-s", "서울"]).unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        session.run(name, sub).unwrap();

        let matches = explore_cli().try_get_matches_from(["population"]).unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert!(session.run(name, sub).is_err());

        let matches = explore_cli().try_get_matches_from(["regions", "--population"]).unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert!(session.run(name, sub).is_err());
    }
}
