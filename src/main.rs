use clap::Parser;
use takeoff_engine::adapters::read_price_list_file;
use takeoff_engine::config::LogFormat;
use takeoff_engine::core::diagnostics::DiagnosticLevel;
use takeoff_engine::domain::model::TakeoffModel;
use takeoff_engine::domain::ports::ModelStore;
use takeoff_engine::domain::value::format_number;
use takeoff_engine::utils::{logger, validation::Validate};
use takeoff_engine::{
    CliConfig, EngineConfig, EngineError, JsonFileStore, RunOutcome, RunRequest, TakeoffEngine,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CliConfig::parse();

    let settings = match config.settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    // 初始化日誌
    match settings.logging.format {
        LogFormat::Json => logger::init_json_logger(),
        LogFormat::Compact => logger::init_cli_logger(config.verbose),
    }

    tracing::info!("Starting takeoff CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
        tracing::debug!("Settings: {:?}", settings);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    match run(&config, &settings).await {
        Ok(outcome) => {
            if config.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            if !outcome.is_success() {
                std::process::exit(4);
            }
        }
        Err(e) => {
            // 記錄詳細錯誤信息
            tracing::error!(
                "❌ Takeoff run failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            // 輸出用戶友好的錯誤信息
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            std::process::exit(e.severity().exit_code());
        }
    }

    Ok(())
}

async fn run(config: &CliConfig, settings: &EngineConfig) -> Result<RunOutcome, EngineError> {
    let store = JsonFileStore::new(&settings.storage.data_dir);

    let script = match &config.script {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };

    if config.create {
        match store.load_model(&config.model).await {
            Err(EngineError::ModelNotFound { .. }) => {
                let code = script.clone().unwrap_or_default();
                store.save_model(&TakeoffModel::new(config.model.clone(), code)).await?;
                tracing::info!("🆕 Created model '{}'", config.model);
            }
            other => {
                other?;
            }
        }
    }

    let mut request = RunRequest::new(config.model.clone());
    request.script = script;
    request.catalog_ids = config.catalog_ids.clone();
    request.overrides = config.overrides()?;
    for path in &config.catalogs {
        let entries = read_price_list_file(path)?;
        tracing::info!("📄 Loaded {} prices from {}", entries.len(), path);
        request.prices.extend(entries);
    }
    if config.dry_run {
        request = request.dry_run();
    }

    let engine = TakeoffEngine::from_config(store, settings);
    engine.run(request).await
}

fn print_outcome(outcome: &RunOutcome) {
    for section in &outcome.sections {
        println!("📦 {}", section.name);
        for part in &section.parts {
            println!(
                "   {:<32} {:>10} x {:>10} = {:>12} {}",
                part.name,
                format_number(part.quantity),
                format_number(part.unit_price),
                format_number(part.total),
                part.currency
            );
        }
    }

    for diagnostic in &outcome.diagnostics {
        match diagnostic.level {
            DiagnosticLevel::Warn => println!("⚠️  {}", diagnostic),
            DiagnosticLevel::Error => println!("❌ {}", diagnostic),
            DiagnosticLevel::Info => println!("ℹ️  {}", diagnostic),
            DiagnosticLevel::Debug => {}
        }
    }

    if outcome.is_success() {
        println!(
            "✅ {} rows, total {} ({} ms){}",
            outcome.rows.len(),
            format_number(outcome.grand_total()),
            outcome.duration.as_millis(),
            if outcome.committed { "" } else { " [not committed]" }
        );
    } else if let Some(error) = &outcome.error {
        println!("❌ {}", error);
    }
}
