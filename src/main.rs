use anyhow::{Context, Result};
use sateval::cli::commands::{
    EvaluationsCommand, MethodsCommand, ResultsCommand, RunCommand, TemplateCommand,
    ValidateCommand, ValidateStepCommand,
};
use sateval::cli::output::*;
use sateval::cli::{Cli, Command};
use sateval::core::config::load_document;
use sateval::persistence::{evaluation_fields, evaluation_ids, ResultStore};
use sateval::providers::list_dataset_dirs;
use sateval::{
    default_registry, validate_pipeline, validate_step, CapabilityRegistry, EngineSettings,
    ExecutionStatus, PipelineConfig, PipelineExecutor, RunContext, StepConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let settings = cli.settings();

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli, &settings).await?,
        Command::Validate(cmd) => check_pipeline(cmd, &cli, &settings).await?,
        Command::ValidateStep(cmd) => check_step(cmd, &cli, &settings).await?,
        Command::Template(cmd) => print_template(cmd)?,
        Command::Modules => list_modules(&cli, &settings).await?,
        Command::Methods(cmd) => describe_module(cmd, &cli, &settings).await?,
        Command::Datasets => list_datasets(&cli, &settings).await?,
        Command::Runs => list_runs(&cli, &settings).await?,
        Command::Evaluations(cmd) => list_evaluations(cmd, &cli, &settings).await?,
        Command::Results(cmd) => show_results(cmd, &cli, &settings).await?,
        Command::Fields => list_fields(&cli)?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_store(settings: &EngineSettings) -> Result<Arc<dyn ResultStore>> {
    let store = sateval::persistence::SqliteResultStore::new(&settings.database_path)
        .await
        .with_context(|| format!("Failed to open {}", settings.database_path.display()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_settings: &EngineSettings) -> Result<Arc<dyn ResultStore>> {
    tracing::warn!("Built without sqlite; results are kept in memory for this process only");
    Ok(Arc::new(sateval::InMemoryResultStore::new()))
}

async fn open_registry(settings: &EngineSettings) -> Result<CapabilityRegistry> {
    let store = open_store(settings).await?;
    default_registry(settings, store).context("Failed to build capability registry")
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli, settings: &EngineSettings) -> Result<()> {
    let document = load_document(&cmd.file).context("Failed to load pipeline")?;
    let registry = Arc::new(open_registry(settings).await?);
    let executor = PipelineExecutor::from_settings(registry, settings);

    let run = match &cmd.run_id {
        Some(run_id) => RunContext::new(run_id.clone()),
        None => RunContext::generate(),
    };
    info!("Loaded pipeline from {} as run {}", cmd.file.display(), run);

    let summary = if cli.json {
        executor
            .execute(run, document, |event| println!("{}", event.to_json_line()))
            .await
    } else {
        let mut display = RunDisplay::new();
        let summary = executor
            .execute(run, document, |event| display.handle(event))
            .await;
        display.finish_bar();
        println!("\n{}", format_summary(&summary));
        summary
    };

    if summary.status == ExecutionStatus::Rejected {
        if !cli.json {
            println!(
                "{} Pipeline was not run; check it with {}",
                CROSS,
                style("sateval validate").bold()
            );
        }
        std::process::exit(1);
    }

    Ok(())
}

fn report_validation(cli: &Cli, subject: &str, outcome: Result<bool, sateval::ParameterShapeError>) -> Result<()> {
    let (valid, error) = match &outcome {
        Ok(valid) => (*valid, None),
        Err(err) => (false, Some(err.to_string())),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&json!({ "valid": valid, "error": error }))?);
    } else {
        match (valid, error) {
            (true, _) => println!("{} {} is valid", CHECK, subject),
            (false, Some(error)) => {
                println!("{} {} has parameter errors:", WARN, subject);
                println!("  {}", style(error).red());
            }
            (false, None) => println!(
                "{} {} is malformed or references an unknown operation",
                CROSS, subject
            ),
        }
    }

    if !valid {
        std::process::exit(1);
    }
    Ok(())
}

async fn check_pipeline(cmd: &ValidateCommand, cli: &Cli, settings: &EngineSettings) -> Result<()> {
    let document = load_document(&cmd.file).context("Failed to load pipeline")?;
    let registry = open_registry(settings).await?;
    report_validation(cli, "Pipeline", validate_pipeline(&document, &registry))
}

async fn check_step(cmd: &ValidateStepCommand, cli: &Cli, settings: &EngineSettings) -> Result<()> {
    let step: Value = match (&cmd.step, &cmd.file) {
        (Some(step), _) => step.clone(),
        (None, Some(file)) => load_document(file).context("Failed to load step")?,
        (None, None) => anyhow::bail!("Either --step or --file is required"),
    };
    let registry = open_registry(settings).await?;
    report_validation(cli, "Step", validate_step(&step, &registry))
}

fn print_template(cmd: &TemplateCommand) -> Result<()> {
    let value = if cmd.step {
        serde_json::to_value(StepConfig::template())?
    } else {
        PipelineConfig::template().to_value()
    };

    if cmd.yaml {
        print!("{}", serde_yaml::to_string(&value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

async fn list_modules(cli: &Cli, settings: &EngineSettings) -> Result<()> {
    let registry = open_registry(settings).await?;
    let modules = registry.list_modules();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    println!("{} Registered modules:", INFO);
    for module in modules {
        let operations = registry.list_operations(module)?;
        println!("  {} ({})", style(module).bold(), style(operations.join(", ")).dim());
    }
    Ok(())
}

async fn describe_module(cmd: &MethodsCommand, cli: &Cli, settings: &EngineSettings) -> Result<()> {
    let registry = open_registry(settings).await?;
    let shapes = registry.describe_operations(&cmd.module)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&shapes)?);
        return Ok(());
    }

    println!("{} Operations of {}:", INFO, style(&cmd.module).bold());
    for (operation, params) in &shapes {
        let params: Vec<String> = params
            .iter()
            .map(|(name, kind)| format!("{}: {}", name, style(kind).dim()))
            .collect();
        println!("  {}({})", style(operation).cyan(), params.join(", "));
    }
    Ok(())
}

async fn list_datasets(cli: &Cli, settings: &EngineSettings) -> Result<()> {
    let directories = list_dataset_dirs(&settings.data_dir)
        .with_context(|| format!("Failed to read {}", settings.data_dir.display()))?;
    let store = open_store(settings).await?;
    let downloads = store.list_datasets().await?;
    let extractions = store.list_extractions().await?;

    if cli.json {
        let data = json!({
            "directories": directories,
            "downloads": downloads,
            "extractions": extractions,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if directories.is_empty() && downloads.is_empty() && extractions.is_empty() {
        println!("{} No datasets under {}", INFO, settings.data_dir.display());
        return Ok(());
    }

    println!("{} Dataset directories:", INFO);
    for dir in &directories {
        println!(
            "  {} {} ({} files)",
            style(&dir.name).bold(),
            style(dir.path.display()).dim(),
            dir.files.len()
        );
    }

    if !downloads.is_empty() {
        println!("{} Downloads:", INFO);
        for download in &downloads {
            println!(
                "  {} {} {}",
                style(&download.name).bold(),
                style(&download.path).dim(),
                style(download.recorded_at.to_rfc3339()).dim()
            );
        }
    }

    if !extractions.is_empty() {
        println!("{} Extracted archives:", INFO);
        for extraction in &extractions {
            println!(
                "  {} -> {} {}",
                style(&extraction.zip_file_path).bold(),
                extraction.destination_folder,
                style(extraction.recorded_at.to_rfc3339()).dim()
            );
        }
    }
    Ok(())
}

fn list_fields(cli: &Cli) -> Result<()> {
    let fields = evaluation_fields();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&fields)?);
    } else {
        println!("{} Evaluation fields:", INFO);
        println!("{}", format_fields(&fields));
    }
    Ok(())
}

async fn list_runs(cli: &Cli, settings: &EngineSettings) -> Result<()> {
    let run_ids = open_store(settings).await?.list_run_ids().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&run_ids)?);
    } else if run_ids.is_empty() {
        println!("{} No runs recorded", INFO);
    } else {
        println!("{} Runs:", INFO);
        for run_id in &run_ids {
            println!("  {}", run_id);
        }
    }
    Ok(())
}

async fn list_evaluations(cmd: &EvaluationsCommand, cli: &Cli, settings: &EngineSettings) -> Result<()> {
    let rows = open_store(settings).await?.images_for_run(&cmd.run_id).await?;
    let ids = evaluation_ids(&rows);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&ids)?);
    } else if ids.is_empty() {
        println!("{} No evaluations for run {}", INFO, style(&cmd.run_id).bold());
    } else {
        println!("{} Evaluations of {}:", INFO, style(&cmd.run_id).bold());
        for id in &ids {
            println!("  {}", id);
        }
    }
    Ok(())
}

async fn show_results(cmd: &ResultsCommand, cli: &Cli, settings: &EngineSettings) -> Result<()> {
    let rows = open_store(settings).await?.images_for_run(&cmd.run_id).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("{} No images recorded for run {}", WARN, style(&cmd.run_id).bold());
        return Ok(());
    }

    println!("{} Results of {} ({} images):", INFO, style(&cmd.run_id).bold(), rows.len());
    for row in &rows {
        println!("{}", format_image_record(row, cmd.evaluation_id.as_deref()));
    }
    Ok(())
}
