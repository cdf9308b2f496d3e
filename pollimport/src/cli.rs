//! Définition et implémentation des commandes CLI
//!
//! - `import`: juridictions → PostGIS (défaut)
//! - `check`: import à blanc dans un store en mémoire, avec empreinte du contenu
//! - `to-geojson`: bureaux et secteurs d'une juridiction → GeoJSON (sans DB)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use futures::stream;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{error, info};

use pollimport::config::{load_all, JurisdictionConfig};
use pollimport::export::{export_districts, export_stations};
use pollimport::geocode::{Geocoder, HttpGeocoder};
use pollimport::locate::DataRoots;
use pollimport::pipeline::Pipeline;
use pollimport::report::{JsonFileReporter, QualityReporter, RunReport};
use pollimport::store::{DatabaseConfig, MemoryStore, PgQualityReporter, PgStore, Store};
use pollimport::PipelineError;

#[derive(Subcommand)]
pub enum Commands {
    /// Import jurisdictions into PostGIS (replace-all per jurisdiction)
    Import(ImportArgs),

    /// Run jurisdictions against an in-memory store and print reports and digests
    Check {
        /// Jurisdiction config files (JSON)
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Export a jurisdiction's stations and districts to GeoJSON (no database required)
    ToGeojson {
        /// Jurisdiction config file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        source: SourceArgs,

        /// Output directory for GeoJSON files
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Emplacement des sources
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Root directory holding one `<jurisdiction_id>-*` directory per jurisdiction
    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    /// Root directory for jurisdictions marked private
    #[arg(long)]
    pub private_data_root: Option<PathBuf>,

    /// Postcode API used when a jurisdiction allows station points from postcodes
    #[arg(long)]
    pub geocoder_url: Option<String>,
}

impl SourceArgs {
    fn roots(&self) -> DataRoots {
        let roots = DataRoots::new(&self.data_root);
        match &self.private_data_root {
            Some(private) => roots.with_private(private),
            None => roots,
        }
    }

    fn geocoder(&self, client: &reqwest::Client) -> Option<Arc<dyn Geocoder>> {
        self.geocoder_url
            .as_deref()
            .map(|url| Arc::new(HttpGeocoder::new(client.clone(), url)) as Arc<dyn Geocoder>)
    }
}

/// Arguments de la commande import
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Jurisdiction config files (JSON)
    #[arg(required = true)]
    pub configs: Vec<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Maximum number of jurisdictions imported concurrently
    #[arg(long, alias = "threads")]
    pub jobs: Option<usize>,

    /// Also write each report as `<dir>/<jurisdiction_id>.json`
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Create schema, extension and tables before importing
    #[arg(long)]
    pub init_schema: bool,

    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL database name (défaut : env PGDATABASE / polling_stations)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    pub ssl: Option<String>,
}

/// Collaborateurs partagés par les imports d'un lot
struct RunContext {
    store: Arc<dyn Store>,
    roots: DataRoots,
    client: reqwest::Client,
    geocoder: Option<Arc<dyn Geocoder>>,
    reporters: Vec<Arc<dyn QualityReporter>>,
}

impl RunContext {
    fn new(store: Arc<dyn Store>, source: &SourceArgs) -> Self {
        let client = reqwest::Client::new();
        Self {
            geocoder: source.geocoder(&client),
            store,
            roots: source.roots(),
            client,
            reporters: Vec::new(),
        }
    }

    fn pipeline(&self, config: JurisdictionConfig) -> Result<Pipeline, PipelineError> {
        let mut builder = Pipeline::builder(config)
            .store(Arc::clone(&self.store))
            .roots(self.roots.clone())
            .client(self.client.clone());
        if let Some(geocoder) = &self.geocoder {
            builder = builder.geocoder(Arc::clone(geocoder));
        }
        for reporter in &self.reporters {
            builder = builder.reporter(Arc::clone(reporter));
        }
        builder.build()
    }

    /// Exécute un import; une erreur est rapportée, jamais propagée au lot
    async fn run(&self, config: JurisdictionConfig) -> RunReport {
        let jurisdiction_id = config.jurisdiction_id.clone();
        let pipeline = match self.pipeline(config) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(jurisdiction = %jurisdiction_id, error = %e, "Invalid pipeline");
                let mut report = RunReport::new(&jurisdiction_id);
                report.record_failure(pollimport::pipeline::Stage::Init, e.to_string());
                report.finalize();
                return report;
            }
        };

        match pipeline.run().await {
            Ok(report) => report,
            Err(failure) => failure.report,
        }
    }
}

/// Exécute la commande import
pub async fn cmd_import(args: ImportArgs) -> Result<()> {
    let configs = load_all(&args.configs)?;
    let jobs = args.jobs.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });

    println!("=== Import ===");
    println!("Jurisdictions: {}", configs.len());
    println!("Data root: {}", args.source.data_root.display());
    println!("Jobs: {}", jobs);

    let db_config = DatabaseConfig::from_env().with_overrides(
        args.host,
        args.database,
        args.user,
        args.password,
        args.port,
        args.ssl,
    )?;
    println!(
        "Database: {} (schema: {}, SSL: {:?})",
        db_config.target(),
        db_config.schema,
        db_config.ssl_mode
    );

    let store = PgStore::connect(&db_config).await?;
    println!("Connected to PostgreSQL");

    if args.init_schema {
        store.create_schema().await?;
        println!("Schema ready");
    }

    let mut context = RunContext::new(Arc::new(store.clone()), &args.source);
    context
        .reporters
        .push(Arc::new(PgQualityReporter::new(store)));
    if let Some(dir) = &args.report_dir {
        context.reporters.push(Arc::new(JsonFileReporter::new(dir)));
    }

    let started = Instant::now();
    let context = Arc::new(context);
    let reports = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(AtomicUsize::new(0));

    stream::iter(configs.into_values())
        .for_each_concurrent(jobs, |config| {
            let context = Arc::clone(&context);
            let reports = Arc::clone(&reports);
            let failed = Arc::clone(&failed);

            async move {
                let report = context.run(config).await;
                if report.error.is_some() {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                reports.lock().await.push(report);
            }
        })
        .await;

    let mut reports = std::mem::take(&mut *reports.lock().await);
    reports.sort_by(|a, b| a.jurisdiction_id.cmp(&b.jurisdiction_id));
    let failed = failed.load(Ordering::Relaxed);

    print_summary(&reports, started.elapsed());

    info!(
        "Import complete: {} jurisdictions, {} failed",
        reports.len(),
        failed
    );
    if failed > 0 {
        anyhow::bail!("{failed} of {} jurisdictions failed", reports.len());
    }
    Ok(())
}

/// Exécute la commande check
pub async fn cmd_check(configs: &[PathBuf], source: &SourceArgs) -> Result<()> {
    let configs = load_all(configs)?;
    let memory = Arc::new(MemoryStore::new());
    let context = RunContext::new(Arc::clone(&memory) as Arc<dyn Store>, source);

    let started = Instant::now();
    let mut reports = Vec::with_capacity(configs.len());
    for config in configs.into_values() {
        let report = context.run(config).await;
        report.display();
        let digest = memory.digest(&report.jurisdiction_id)?;
        println!("Digest: {digest}");
        reports.push(report);
    }

    print_summary(&reports, started.elapsed());

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} jurisdictions failed", reports.len());
    }
    Ok(())
}

/// Exécute la commande to-geojson
pub async fn cmd_export(config_path: &Path, source: &SourceArgs, output: &Path) -> Result<()> {
    let config = JurisdictionConfig::load(config_path)?;
    let jurisdiction_id = config.jurisdiction_id.clone();

    let memory = Arc::new(MemoryStore::new());
    let context = RunContext::new(Arc::clone(&memory) as Arc<dyn Store>, source);

    let report = context.run(config).await;
    if let Some(error) = &report.error {
        anyhow::bail!("Import of {jurisdiction_id} failed: {error}");
    }

    std::fs::create_dir_all(output)
        .context(format!("Failed to create directory: {}", output.display()))?;

    let stations = memory.stations(&jurisdiction_id).await?;
    let districts = memory.districts(&jurisdiction_id).await?;

    let stations_path = output.join("stations.geojson");
    let districts_path = output.join("districts.geojson");
    let num_stations = export_stations(&stations, &stations_path)?;
    let num_districts = export_districts(&districts, &districts_path)?;

    println!(
        "Exported {} stations to {} and {} districts to {}",
        num_stations,
        stations_path.display(),
        num_districts,
        districts_path.display()
    );
    Ok(())
}

fn print_summary(reports: &[RunReport], duration: std::time::Duration) {
    println!("\n=== Summary ===");
    println!("Duration: {:.2?}", duration);
    for report in reports {
        println!("- {}", report.summary());
    }

    let (stations, districts, addresses) = reports
        .iter()
        .filter(|r| r.error.is_none())
        .map(RunReport::counts)
        .fold((0, 0, 0), |acc, c| (acc.0 + c.0, acc.1 + c.1, acc.2 + c.2));
    println!(
        "Total: {} stations, {} districts, {} addresses",
        stations, districts, addresses
    );
}
