mod config;
mod logging;
mod output;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use common_properties::db::models::CaseInfo;
use common_properties::db::postgres::{PgCaseStore, PgCorrelationStore};
use common_properties::{
    CorrelationStore, ResultView, SearchParams, available_target_cases, run_search,
};
use config::AppConfig;
use correlation_types::FILES_TYPE_ID;
use logging::{init_logging, run_span};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "common-properties-search",
    version,
    about = "Find attribute values shared across data sources and cases"
)]
struct Cli {
    #[arg(long, env = "COMMON_PROPERTIES_CONFIG")]
    config: PathBuf,
    #[arg(long, env = "CASE_DATABASE_URL")]
    case_database_url: Option<String>,
    #[arg(long, env = "CENTRAL_REPOSITORY_URL")]
    central_repository_url: Option<String>,
    /// Result grouping.
    #[arg(long, value_enum, default_value_t = ViewArg::Count)]
    by: ViewArg,
    /// Only pictures and videos.
    #[arg(long, default_value_t = false)]
    media: bool,
    /// Only documents.
    #[arg(long, default_value_t = false)]
    documents: bool,
    /// Prevalence threshold in percent; 0 disables filtering.
    #[arg(long)]
    threshold: Option<u32>,
    #[arg(long, default_value_t = false)]
    validate_config: bool,
    /// More log detail; repeat for more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ViewArg {
    Count,
    Case,
}

impl ViewArg {
    fn as_str(self) -> &'static str {
        match self {
            ViewArg::Count => "count",
            ViewArg::Case => "case",
        }
    }
}

impl From<ViewArg> for ResultView {
    fn from(view: ViewArg) -> Self {
        match view {
            ViewArg::Count => ResultView::ByCount,
            ViewArg::Case => ResultView::ByCase,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search the data sources of the open case.
    Intra {
        #[arg(long)]
        data_source: Option<i64>,
    },
    /// Search the central repository.
    Inter {
        /// Correlation type id; 0 is files.
        #[arg(long, default_value_t = FILES_TYPE_ID)]
        correlation_type: i32,
        /// Central repository id of the only other case to match against.
        #[arg(long)]
        target_case: Option<i64>,
    },
    /// List the cases an inter-case search can target.
    Cases,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!(
        stage = "startup",
        event = "startup.begin",
        config_path = %cli.config.display(),
        "common-properties-search starting"
    );

    let load_start = Instant::now();
    let mut cfg = match AppConfig::load(&cli.config).context("failed to load search config") {
        Ok(cfg) => {
            info!(
                stage = "startup",
                event = "config.load.end",
                result = "ok",
                config_path = %cli.config.display(),
                duration_ms = load_start.elapsed().as_millis(),
                "configuration loaded"
            );
            cfg
        }
        Err(err) => {
            error!(
                stage = "startup",
                event = "config.load.end",
                result = "fail",
                config_path = %cli.config.display(),
                duration_ms = load_start.elapsed().as_millis(),
                error = %format!("{err:#}"),
                "configuration load failed"
            );
            return Err(err);
        }
    };
    cfg.apply_overrides(cli.case_database_url.clone(), cli.central_repository_url.clone());

    if let Err(err) = cfg.validate_config() {
        error!(
            stage = "startup",
            event = "config.validate.end",
            result = "fail",
            error = %format!("{err:#}"),
            "configuration validation failed"
        );
        return Err(err);
    }

    let case_pool = connect(&cfg, &cfg.case.database_url)
        .await
        .context("failed to connect to case database")?;
    let repo_pool = match &cfg.central_repository {
        Some(repo) => Some(
            connect(&cfg, &repo.database_url)
                .await
                .context("failed to connect to central repository")?,
        ),
        None => None,
    };

    if cli.validate_config {
        info!(
            stage = "startup",
            event = "startup.validate_only.exit",
            result = "ok",
            central_repository = repo_pool.is_some(),
            "configuration and connections validated"
        );
        return Ok(());
    }

    let case_store = PgCaseStore::new(
        case_pool,
        CaseInfo::new(cfg.case.case_uuid.as_str(), cfg.case.display_name.as_str()),
    );
    let repo_store = repo_pool.map(PgCorrelationStore::new);
    let repo: Option<&dyn CorrelationStore> =
        repo_store.as_ref().map(|store| store as &dyn CorrelationStore);

    let command = cli.command.unwrap_or(Command::Intra { data_source: None });
    let scope = match &command {
        Command::Inter { .. } => "inter",
        _ => "intra",
    };
    let mut params = match command {
        Command::Cases => {
            let repo = repo.ok_or_else(|| anyhow!("listing cases needs a central repository"))?;
            let cases = available_target_cases(repo, &cfg.case.case_uuid)
                .await
                .context("failed to list cases")?;
            serde_json::to_writer_pretty(std::io::stdout().lock(), &cases)
                .context("failed to write case list")?;
            println!();
            return Ok(());
        }
        Command::Intra { data_source } => SearchParams::intra_case(data_source),
        Command::Inter {
            correlation_type,
            target_case,
        } => {
            let repo = repo.ok_or_else(|| anyhow!("inter-case search needs a central repository"))?;
            let types = repo
                .defined_types()
                .await
                .context("failed to load correlation types")?;
            let Some(correlation_type) = types.into_iter().find(|t| t.id == correlation_type) else {
                bail!("unknown correlation type id {correlation_type}");
            };
            if !correlation_type.enabled {
                warn!(
                    stage = "startup",
                    event = "search.type.disabled",
                    correlation_type = %correlation_type.display_name,
                    "correlation type is disabled in the central repository"
                );
            }
            SearchParams::inter_case(correlation_type, target_case)
        }
    };
    params = params
        .with_filters(cli.media, cli.documents)
        .with_threshold(
            cli.threshold
                .unwrap_or(cfg.search.default_percentage_threshold),
        )
        .with_batch_size(cfg.search.batch_size);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let span = run_span(&cfg.case.case_uuid, scope, cli.by.as_str());
    let outcome = match run_search(&params, cli.by.into(), &case_store, repo, &cancel)
        .instrument(span)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) if err.is_fatal() => {
            error!(
                stage = "search",
                event = "search.notify",
                result = "fail",
                error = %err,
                "search could not reach its data"
            );
            return Err(anyhow!(err).context("search failed"));
        }
        Err(err) => return Err(anyhow!(err).context("search did not complete")),
    };

    let tree = output::build_tree(outcome, &case_store).await?;
    output::write_json(&tree, std::io::stdout().lock())?;
    Ok(())
}

async fn connect(cfg: &AppConfig, url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.search.max_connections)
        .acquire_timeout(cfg.search.acquire_timeout)
        .connect(url)
        .await?;
    Ok(pool)
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(?err, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!(stage = "search", event = "search.cancel", "interrupt received; cancelling search");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}
