use anyhow::{Context, Result, bail};
use clap::Parser;

use pharmacy_intel::config::{PipelineConfig, StoragePaths};
use pharmacy_intel::model::ContactUpdate;
use pharmacy_intel::score::{self, ScoringConfig};
use pharmacy_intel::store::{Page, PharmacyFilter, Store};
use pharmacy_intel::{cli, pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = cli::Args::parse();
    match args.cmd {
        cli::Command::Run(cmd) => run(cmd).await.context("run failed"),
        cli::Command::Rescore(cmd) => rescore(cmd).context("rescore failed"),
        cli::Command::Status(cmd) => status(cmd).context("status failed"),
        cli::Command::Search(cmd) => search(cmd).context("search failed"),
        cli::Command::Export(cmd) => export(cmd).context("export failed"),
        cli::Command::Changes(cmd) => changes(cmd).context("changes failed"),
        cli::Command::Annotate(cmd) => annotate(cmd).context("annotate failed"),
    }
}

async fn run(cmd: cli::RunArgs) -> Result<()> {
    let config = PipelineConfig {
        paths: StoragePaths::new(&cmd.data_dir),
        registry_csv: cmd.registry_csv,
        registry_url: cmd.registry_url,
        offline: cmd.offline,
        batch_size: cmd.batch_size,
        scoring_profile: cmd.profile,
        deactivation_policy: cmd.deactivation,
    };

    let runner = pipeline::Runner::new();
    let handle = runner.trigger(config)?;
    let summary = handle.await.context("pipeline task panicked")??;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn rescore(cmd: cli::RescoreArgs) -> Result<()> {
    let paths = StoragePaths::new(&cmd.data_dir);
    let mut store = Store::open(&paths.db_path)?;
    let config = ScoringConfig::new(cmd.profile);
    let scored = score::rescore_all(&mut store, &config)?;
    println!("Rescored {scored} records");
    Ok(())
}

fn status(cmd: cli::StatusArgs) -> Result<()> {
    let paths = StoragePaths::new(&cmd.data_dir);
    let store = Store::open(&paths.db_path)?;
    match store.latest_run()? {
        Some(run) => {
            let stats = store.stats()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "run": run,
                    "store": stats,
                }))?
            );
        }
        None => println!("{}", serde_json::json!({ "status": "never_run" })),
    }
    Ok(())
}

fn search(cmd: cli::SearchArgs) -> Result<()> {
    let paths = StoragePaths::new(&cmd.data_dir);
    let store = Store::open(&paths.db_path)?;
    let filter = PharmacyFilter {
        search: cmd.search,
        state: cmd.state,
        city: cmd.city,
        zip_prefix: cmd.zip,
        independent_only: cmd.independent_only,
        min_score: cmd.min_score,
    };
    let page = Page {
        page: cmd.page,
        per_page: cmd.per_page,
    };
    let (rows, total) = store.search_pharmacies(&filter, cmd.sort, page)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "total": total,
            "page": page.page,
            "per_page": page.per_page,
            "data": rows,
        }))?
    );
    Ok(())
}

fn export(cmd: cli::ExportArgs) -> Result<()> {
    let paths = StoragePaths::new(&cmd.data_dir);
    let store = Store::open(&paths.db_path)?;
    let filter = PharmacyFilter {
        search: cmd.search,
        state: cmd.state,
        independent_only: cmd.independent_only,
        min_score: cmd.min_score,
        ..Default::default()
    };
    let exported = store.export_csv(&filter, &cmd.output)?;
    println!("Exported {exported} records to {}", cmd.output.display());
    Ok(())
}

fn changes(cmd: cli::ChangesArgs) -> Result<()> {
    let paths = StoragePaths::new(&cmd.data_dir);
    let store = Store::open(&paths.db_path)?;
    let events = store.list_changes(cmd.kind, cmd.limit)?;
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

fn annotate(cmd: cli::AnnotateArgs) -> Result<()> {
    let paths = StoragePaths::new(&cmd.data_dir);
    let store = Store::open(&paths.db_path)?;
    let update = ContactUpdate {
        contact_email: cmd.contact_email,
        notes: cmd.notes,
        deal_status: cmd.deal_status,
    };
    if !store.update_contact(&cmd.npi, &update)? {
        bail!("No pharmacy found with NPI {}", cmd.npi);
    }
    println!("Updated {}", cmd.npi);
    Ok(())
}
