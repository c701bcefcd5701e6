use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use llmslot::cli::{Cli, Commands};
use llmslot::commands;
use llmslot::error::SlotError;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_file = cli.global.config_file.as_deref();

    let result = match cli.command {
        Commands::Launch { service } => commands::lifecycle::run_launch(config_file, &service).await,
        Commands::Stop { service, all } => {
            commands::lifecycle::run_stop(config_file, service.as_deref(), all).await
        }
        Commands::Switch { service } => commands::lifecycle::run_switch(config_file, &service).await,
        Commands::Status => commands::status::run_status(config_file).await,
        Commands::Current => commands::status::run_current(config_file).await,
        Commands::List { verbose } => commands::list::run(config_file, verbose),
        Commands::Logs { service, lines } => commands::logs::run(config_file, &service, lines).await,
        Commands::ResourceStats => commands::status::run_resource_stats(config_file).await,
        Commands::TestApi { service, timeout } => {
            commands::test_api::run(config_file, &service, timeout).await
        }
        Commands::Validate => commands::validate::run(config_file),
        Commands::Init => commands::init::run(),
        Commands::Doctor => commands::doctor::run(config_file),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "llmslot", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        match e.downcast::<SlotError>() {
            // Typed failures carry help text; render them the way config
            // diagnostics are rendered.
            Ok(slot_err) => eprintln!("{:?}", miette::Report::new(slot_err)),
            Err(e) => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}
