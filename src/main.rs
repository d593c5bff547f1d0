use anyhow::Context;
use clap::Parser;
use mp_twin::core::engine::{EngineOutput, RunRequest, TwinEngine};
use mp_twin::utils::error::{ErrorSeverity, TwinError};
use mp_twin::utils::{logger, validation::Validate};
use mp_twin::{CliConfig, SurveyDataset, TwinConfig, TwinPipeline};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;

fn main() {
    let cli = CliConfig::parse();

    if cli.log_json {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting mp-twin CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = cli.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    if let Err(err) = run(&cli) {
        let Some(e) = err.downcast_ref::<TwinError>() else {
            tracing::error!("❌ Run failed: {:#}", err);
            eprintln!("❌ {:#}", err);
            std::process::exit(1);
        };

        tracing::error!(
            "❌ Run failed: {:#} (Category: {:?}, Severity: {:?})",
            err,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

fn run(cli: &CliConfig) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => TwinConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => TwinConfig::default(),
    };
    if let Some(weights) = &cli.weights {
        config.detection.weights_path = Some(weights.clone());
    }
    if let Some(threshold) = cli.threshold {
        config.comparison.close_match_threshold = threshold;
    }
    config.validate()?;

    let file = File::open(&cli.data)
        .map_err(TwinError::IoError)
        .with_context(|| format!("opening survey data {}", cli.data))?;
    let dataset = SurveyDataset::from_reader(file)?;

    let pipeline = TwinPipeline::from_config(&config)?;
    let engine = TwinEngine::new_with_monitoring(pipeline, cli.monitor);
    if cli.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => {
            tracing::info!("No --seed given, participant selection is not reproducible");
            StdRng::from_entropy()
        }
    };

    let request = RunRequest {
        participant: cli.participant,
        organ: cli.organ.clone(),
        human_count: cli.human_count,
    };
    let EngineOutput { report, image } = engine.run(&dataset, &request, &mut rng)?;

    if let Some(path) = &cli.save_image {
        std::fs::write(path, image.to_png()?)
            .map_err(TwinError::IoError)
            .with_context(|| format!("saving image to {}", path))?;
        tracing::info!("📁 Image saved to: {}", path);
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Participant {}", report.participant_id);
    for (route, total) in &report.exposure {
        println!("  {:<12} {:>10} particles", route.as_str(), total);
    }
    println!();
    println!("{:<8} {:>20}", "Organ", "Microplastic_Count");
    for row in &report.burdens {
        println!("{:<8} {:>20.2}", row.organ.as_str(), row.microplastic_count);
    }
    println!();
    println!("{} [{}]", report.caption, report.organ);
    if let Some(result) = &report.comparison {
        println!(
            "Human: {}  Detector ({}): {}  Difference: {}",
            result.human_count, report.detector, result.automated_count, result.absolute_difference
        );
        println!("{}", result.verdict.message());
    }

    Ok(())
}
