use clap::Parser;
use dialogctl::{
    Application, Config,
    cli::{self, Command},
    telemetry,
};

/// Resolves on the first of Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!(signal = "ctrl_c", "draining connections before exit");
        },
        _ = terminate => {
            tracing::info!(signal = "sigterm", "draining connections before exit");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before anything else that might build a TLS client
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = dialogctl::config::Args::parse();

    // Signing a widget token needs nothing from the config file
    if let Some(Command::WidgetToken(token_args)) = &args.command {
        println!("{}", cli::widget_token(token_args)?);
        return Ok(());
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) if matches!(args.command, Some(Command::PaymentHealthcheck)) => {
            eprintln!("Payment healthcheck failed: invalid configuration: {e}");
            std::process::exit(cli::EXIT_CONFIG_ERROR);
        }
        Err(e) => return Err(e.into()),
    };

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;

    tracing::debug!("{:?}", args);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let shutdown = shutdown_signal();
            Application::new(config).await?.serve(shutdown).await
        }
        command => {
            let code = cli::run(command, &config).await;
            telemetry::shutdown_telemetry();
            match code? {
                0 => Ok(()),
                code => std::process::exit(code),
            }
        }
    }
}
