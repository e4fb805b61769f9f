use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use cohort_labeler::cohort::{AdmissionCohort, AdmissionFilteredCohort};
use cohort_labeler::materialize::DEFAULT_COMBINE_EVERY;
use cohort_labeler::sql::FlowsheetExtraction;
use cohort_labeler::utils::logging::log_warning;
use cohort_labeler::{
    BigQueryClient, Cohort, ConfigOverrides, LabelerRegistry, ParquetBatchWriter, ResolvedConfig,
    StreamOptions, Warehouse, create_cohort_table, export_records, label_plan, stream_query,
    verify_admission_cohort,
};

#[derive(Parser)]
#[command(name = "cohort-labeler")]
#[command(about = "Admission cohorts and clinical labels over an OMOP warehouse", long_about = None)]
struct Args {
    /// YAML file with configuration overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Credentials file (authorized user or service account JSON)
    #[arg(long, global = true, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,
    /// Billing project
    #[arg(long, global = true, env = "GCLOUD_PROJECT")]
    project: Option<String>,
    /// Print the SQL instead of running it
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the admission cohort table
    Cohort {
        /// Also create the one-admission-per-patient table
        #[arg(long, default_value_t = false)]
        filtered: bool,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        min_stay_hours: Option<u32>,
    },
    /// Compare the cohort table with an in-process reconstruction
    VerifyCohort {
        /// Write admissions missing from the table to this Parquet file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Create the label table for the cohort
    Label {
        /// Labelers to run, in order (default: all)
        #[arg(long, value_delimiter = ',')]
        include: Option<Vec<String>>,
        /// Labelers to skip
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
        /// Extract flowsheets before labeling
        #[arg(long, default_value_t = false)]
        extract_flowsheets: bool,
    },
    /// List available labelers
    ListLabelers {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Stream a query result into a directory of Parquet files
    Stream {
        /// Query text
        #[arg(conflicts_with = "sql_file", required_unless_present = "sql_file")]
        sql: Option<String>,
        /// Read the query from a file
        #[arg(long)]
        sql_file: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        /// Number of pages combined into one file
        #[arg(long, default_value_t = DEFAULT_COMBINE_EVERY)]
        combine_every: usize,
    },
    /// Flatten flowsheet observations into a table
    ExtractFlowsheets {
        /// Replace an existing flowsheet table
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
}

fn load_config(args: &Args, extra: ConfigOverrides) -> anyhow::Result<ResolvedConfig> {
    let file = match &args.config {
        Some(path) => ConfigOverrides::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ConfigOverrides::default(),
    };
    let cli = ConfigOverrides {
        credentials_path: args.credentials.clone(),
        billing_project: args.project.clone(),
        ..Default::default()
    };
    let config = ResolvedConfig::from_overrides(file.merge(cli).merge(extra))
        .context("Invalid configuration")?;
    info!("{config}");
    Ok(config)
}

fn connect(config: &ResolvedConfig) -> anyhow::Result<BigQueryClient> {
    BigQueryClient::from_config(config).with_context(|| {
        format!(
            "Failed to create warehouse client from {}",
            config.credentials_path.display()
        )
    })
}

fn read_sql(sql: Option<String>, sql_file: Option<&Path>) -> anyhow::Result<String> {
    match (sql, sql_file) {
        (Some(sql), _) => Ok(sql),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read query from {}", path.display())),
        (None, None) => anyhow::bail!("Either a query or --sql-file is required"),
    }
}

fn main() -> anyhow::Result<()> {
    // Setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let dry_run = args.dry_run;

    match &args.command {
        Command::Cohort {
            filtered,
            limit,
            min_stay_hours,
        } => {
            let extra = ConfigOverrides {
                limit: *limit,
                min_stay_hours: *min_stay_hours,
                ..Default::default()
            };
            let config = load_config(&args, extra)?;
            if dry_run {
                println!("{};", AdmissionCohort.create_query(&config)?);
                if *filtered {
                    println!("\n{};", AdmissionFilteredCohort.create_query(&config)?);
                }
                return Ok(());
            }
            let client = connect(&config)?;
            create_cohort_table(&client, &config, *filtered)
                .context("Failed to create cohort table")?;
        }
        Command::VerifyCohort { output } => {
            let config = load_config(&args, ConfigOverrides::default())?;
            let client = connect(&config)?;
            let check = verify_admission_cohort(&client, &config)
                .context("Failed to verify cohort table")?;
            println!(
                "{} visits, {} reconstructed admissions, {} cohort rows",
                check.visits, check.expected, check.actual
            );
            if let Some(path) = output {
                export_records(&check.missing, path, &ParquetBatchWriter::default())?;
            }
            if !check.is_consistent() {
                anyhow::bail!(
                    "Cohort table differs from reconstruction: {} missing, {} unexpected",
                    check.missing.len(),
                    check.unexpected.len()
                );
            }
        }
        Command::Label {
            include,
            exclude,
            extract_flowsheets,
        } => {
            let extra = ConfigOverrides {
                extract_flowsheets: extract_flowsheets.then_some(true),
                ..Default::default()
            };
            let config = load_config(&args, extra)?;
            let registry = LabelerRegistry::default();
            let plan = label_plan(&registry, &config, include.as_deref(), exclude.as_slice())?;
            if dry_run {
                print!("{}", plan.to_script());
                return Ok(());
            }
            info!(
                "Creating label table {} with labelers: {}",
                config.target_table_path(),
                plan.labeler_ids().join(", ")
            );
            let client = connect(&config)?;
            plan.execute(&client)
                .context("Label plan failed; earlier steps were not rolled back")?;
        }
        Command::ListLabelers { json } => {
            let labelers = LabelerRegistry::default().list();
            if *json {
                println!("{}", serde_json::to_string_pretty(&labelers)?);
            } else {
                for labeler in labelers {
                    println!("{:<22} {}", labeler.id, labeler.description);
                }
            }
        }
        Command::Stream {
            sql,
            sql_file,
            output,
            overwrite,
            combine_every,
        } => {
            let config = load_config(&args, ConfigOverrides::default())?;
            let sql = read_sql(sql.clone(), sql_file.as_deref())?;
            if dry_run {
                println!("{sql}");
                return Ok(());
            }
            let options = StreamOptions::new(output)
                .with_overwrite(*overwrite)
                .with_combine_every(*combine_every)
                .with_page_size(config.page_size)
                .with_progress(true);
            let client = connect(&config)?;
            let summary = stream_query(&client, &sql, &options, &ParquetBatchWriter::default())
                .context("Failed to stream query results")?;
            if summary.files.is_empty() {
                log_warning("Query returned no rows; nothing written to", Some(&output.display()));
            }
        }
        Command::ExtractFlowsheets { overwrite } => {
            let config = load_config(&args, ConfigOverrides::default())?;
            let extraction = FlowsheetExtraction::from_config(&config).with_overwrite(*overwrite);
            let sql = extraction.to_sql();
            if dry_run {
                println!("{sql};");
                return Ok(());
            }
            let client = connect(&config)?;
            info!("Extracting flowsheets into {}", extraction.target_path());
            client
                .execute(&sql)
                .context("Failed to extract flowsheets")?;
        }
    }

    Ok(())
}
