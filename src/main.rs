//! Prediction-market trading bot
//!
//! `run` drives the scan/resolution loops and the health endpoint; the
//! management subcommands mutate learning state transactionally.

use chrono::Utc;
use clap::{Parser, Subcommand};
use prophet_bot::config::Settings;
use prophet_bot::learning::{handle_model_swap, recalculate_learning, void_trade, LearningState};
use prophet_bot::llm::LmClient;
use prophet_bot::market::PolymarketSource;
use prophet_bot::monitor::HealthState;
use prophet_bot::notify::{format_lifecycle_alert, Notifier};
use prophet_bot::scheduler::Scheduler;
use prophet_bot::signals::{load_feeds, NewsCollector, SocialCollector, SourceRegistry};
use prophet_bot::state::load_shared_state;
use prophet_bot::storage::Database;
use prophet_bot::types::ExperimentRun;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "prophet-bot")]
#[command(about = "Automated prediction-market trading bot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading bot
    Run,
    /// Swap the active model: close the current experiment run, reset
    /// calibration, dampen market-type memory
    ModelSwap {
        #[arg(long)]
        old_model: String,
        #[arg(long)]
        new_model: String,
        #[arg(long)]
        reason: String,
    },
    /// Void a trade and rebuild learning from the surviving records
    VoidTrade {
        #[arg(long)]
        trade_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Start a new experiment run
    StartExperiment {
        #[arg(long)]
        description: String,
        #[arg(long)]
        model: String,
    },
    /// End an experiment run
    EndExperiment {
        #[arg(long)]
        run_id: String,
    },
    /// Rebuild all learning layers from non-void resolved records
    RecalculateLearning,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Run => run_bot(settings).await,
        Commands::ModelSwap {
            old_model,
            new_model,
            reason,
        } => {
            let (db, mut learning) = init_manage(&settings).await?;
            let run_id = handle_model_swap(&old_model, &new_model, &reason, &mut learning, &db).await?;
            println!("Model swap complete: {} -> {} (run {})", old_model, new_model, run_id);
            Ok(())
        }
        Commands::VoidTrade { trade_id, reason } => {
            let (db, mut learning) = init_manage(&settings).await?;
            void_trade(&trade_id, &reason, &mut learning, &db, Utc::now()).await?;
            println!("Trade voided: {}", trade_id);
            Ok(())
        }
        Commands::StartExperiment { description, model } => {
            let (db, _) = init_manage(&settings).await?;
            let now = Utc::now();
            if let Some(current) = db.current_experiment().await? {
                let stats = db.run_stats(&current.run_id).await?;
                db.end_experiment(&current.run_id, &stats, now).await?;
                println!("Ended previous run: {}", current.run_id);
            }
            let run_id = format!("exp_{}_{}", model, now.format("%Y%m%d_%H%M%S"));
            db.save_experiment(&ExperimentRun {
                run_id: run_id.clone(),
                started_at: now,
                ended_at: None,
                config_snapshot: settings.safe_snapshot(),
                description,
                model_used: model,
                include_in_learning: true,
                total_trades: 0,
                total_pnl: 0.0,
                avg_brier: 0.0,
                sharpe_ratio: 0.0,
            })
            .await?;
            println!("Experiment started: {}", run_id);
            Ok(())
        }
        Commands::EndExperiment { run_id } => {
            let (db, _) = init_manage(&settings).await?;
            let stats = db.run_stats(&run_id).await?;
            db.end_experiment(&run_id, &stats, Utc::now()).await?;
            println!("Experiment ended: {}", run_id);
            Ok(())
        }
        Commands::RecalculateLearning => {
            let (db, mut learning) = init_manage(&settings).await?;
            recalculate_learning(&mut learning, &db, Utc::now()).await?;
            println!("Learning recalculated from resolved records.");
            Ok(())
        }
    }
}

async fn open_database(settings: &Settings) -> anyhow::Result<Database> {
    if let Some(dir) = Path::new(&settings.db_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(Database::connect(&settings.db_path).await?)
}

async fn init_manage(settings: &Settings) -> anyhow::Result<(Database, LearningState)> {
    let db = open_database(settings).await?;
    let learning = LearningState::load(&db).await?;
    Ok((db, learning))
}

async fn run_bot(settings: Settings) -> anyhow::Result<()> {
    tracing::info!(environment = settings.environment.as_str(), "starting up");

    let db = open_database(&settings).await?;

    // An active experiment run must exist before any trade record is written
    if db.current_experiment().await?.is_none() {
        let now = Utc::now();
        let run_id = format!("run_{}", now.format("%Y%m%d_%H%M%S"));
        db.save_experiment(&ExperimentRun {
            run_id: run_id.clone(),
            started_at: now,
            ended_at: None,
            config_snapshot: settings.safe_snapshot(),
            description: "Auto-created on startup".to_string(),
            model_used: settings.lm_model.clone(),
            include_in_learning: true,
            total_trades: 0,
            total_pnl: 0.0,
            avg_brier: 0.0,
            sharpe_ratio: 0.0,
        })
        .await?;
        tracing::info!(run_id = %run_id, "experiment run created");
    }

    // Config documents
    let config_dir = Path::new(&settings.config_dir);
    let registry = Arc::new(SourceRegistry::load(&config_dir.join("known_sources.yaml"))?);
    let feeds = load_feeds(&config_dir.join("news_feeds.yaml"))?;

    // Shared (portfolio, learning) pair; persist the portfolio row on first run
    let shared = load_shared_state(&db, &settings).await?;
    db.save_portfolio(&shared.read().await.portfolio).await?;

    // Components
    let source = Arc::new(PolymarketSource::new(
        settings.market_api_key.clone(),
        settings.tier1_fee_rate,
        settings.tier2_fee_rate,
    ));
    let news = NewsCollector::new(feeds, Arc::clone(&registry));
    let social = SocialCollector::new(settings.social_api_key.clone(), registry, db.clone());
    let lm = Arc::new(LmClient::new(
        settings.lm_api_key.clone(),
        settings.lm_base_url.clone(),
        settings.lm_model.clone(),
        db.clone(),
    ));
    let notifier = if settings.telegram_bot_token.is_empty() {
        tracing::warn!("telegram not configured; alerts disabled");
        Notifier::disabled()
    } else {
        Notifier::new(settings.telegram_bot_token.clone(), settings.telegram_chat_id.clone())
    };

    let health = HealthState::new(db.clone());
    let health_port = settings.health_port;
    let environment = settings.environment;

    let scheduler = Arc::new(Scheduler::new(
        settings,
        db,
        source,
        news,
        social,
        lm,
        notifier.clone(),
        shared,
        Arc::clone(&health.last_scan),
        Arc::clone(&health.mode),
    ));
    let handles = scheduler.spawn_tasks();

    tokio::spawn(async move {
        if let Err(e) = prophet_bot::monitor::serve(health, health_port).await {
            tracing::error!(error = %e, "health endpoint stopped");
        }
    });

    notifier
        .send(&format_lifecycle_alert("STARTED", environment.as_str()))
        .await;
    tracing::info!("startup complete");

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    notifier
        .send(&format_lifecycle_alert("STOPPING", environment.as_str()))
        .await;
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
