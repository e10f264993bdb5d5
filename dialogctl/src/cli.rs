//! Subcommands beyond `serve`: schema management, widget tokens and payment operations.

use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::{
    Config,
    api::handlers::payments::describe_outcome,
    auth::widget_token::{WidgetClaims, create_widget_token, normalize_domain},
    db,
    migrations::{DowngradeTarget, MigrationReport, Migrator, UpgradeTarget},
    payment_providers,
    services::settlement,
};

/// Exit code for a missing or invalid payment configuration.
pub const EXIT_CONFIG_ERROR: i32 = 2;

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Inspect or change the database schema revision
    Migrate {
        #[command(subcommand)]
        action: MigrateCommand,
    },
    /// Print a widget token for an assistant
    WidgetToken(WidgetTokenArgs),
    /// Reconcile a payment with the provider and settle it if it was paid
    ReprocessPayment {
        order_id: String,
        /// Settle without asking the provider
        #[arg(long)]
        force: bool,
    },
    /// Check that the payment provider is reachable and accepts our credentials.
    ///
    /// Exit codes: 0 ok, 2 configuration error, 3 HTTP 401, 4 HTTP 403, 5 HTTP 404, 6 HTTP 5xx,
    /// 7 other HTTP status, 8 transport error.
    PaymentHealthcheck,
}

#[derive(Debug, Clone, Subcommand)]
pub enum MigrateCommand {
    /// Apply pending revisions (all heads by default)
    Up {
        /// Upgrade to this revision and its ancestors only
        #[arg(long, conflicts_with = "steps")]
        to: Option<String>,
        /// Apply the next N pending revisions
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Revert applied revisions (one step by default)
    Down {
        /// Keep this revision and its ancestors; `base` reverts everything
        #[arg(long, conflicts_with = "steps")]
        to: Option<String>,
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Show the revisions the database is at
    Current,
    /// List every revision and whether it is applied
    History,
    /// Show the heads of the revision graph
    Heads,
    /// Record revisions as current without running their SQL
    Stamp {
        #[arg(required = true)]
        revisions: Vec<String>,
    },
    /// Empty the revision table without touching the schema
    Clear,
}

#[derive(Debug, Clone, Args)]
pub struct WidgetTokenArgs {
    /// Secret the token is signed with (the service's `secret_key`)
    pub secret: String,
    /// Comma-separated domains the widget may be embedded on
    pub domains: String,
    #[arg(long)]
    pub assistant_id: Uuid,
    #[arg(long)]
    pub owner_id: Uuid,
    #[arg(long, default_value_t = 1)]
    pub widget_version: i32,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "365days")]
    pub ttl: Duration,
}

impl MigrateCommand {
    fn upgrade_target(to: Option<String>, steps: Option<usize>) -> UpgradeTarget {
        match (to, steps) {
            (Some(rev), _) => UpgradeTarget::Revision(rev),
            (None, Some(n)) => UpgradeTarget::Steps(n),
            (None, None) => UpgradeTarget::Heads,
        }
    }

    fn downgrade_target(to: Option<String>, steps: Option<usize>) -> DowngradeTarget {
        match (to, steps) {
            (Some(rev), _) if rev == "base" => DowngradeTarget::Base,
            (Some(rev), _) => DowngradeTarget::Revision(rev),
            (None, Some(n)) => DowngradeTarget::Steps(n),
            (None, None) => DowngradeTarget::Steps(1),
        }
    }
}

/// Split and normalize a comma-separated domain list. At least one domain must survive.
pub fn parse_domains(input: &str) -> anyhow::Result<Vec<String>> {
    let domains: Vec<String> = input.split(',').filter_map(normalize_domain).collect();
    if domains.is_empty() {
        bail!("no valid domains in {input:?}");
    }
    Ok(domains)
}

pub fn widget_token(args: &WidgetTokenArgs) -> anyhow::Result<String> {
    if args.secret.is_empty() {
        bail!("secret must not be empty");
    }
    let domains = parse_domains(&args.domains)?;
    let claims = WidgetClaims::new(args.assistant_id, args.owner_id, domains, args.widget_version, args.ttl);
    Ok(create_widget_token(&claims, &args.secret)?)
}

fn print_report(report: &MigrationReport) {
    for id in &report.applied {
        println!("Applied {id}");
    }
    for id in &report.reverted {
        println!("Reverted {id}");
    }
    if report.applied.is_empty() && report.reverted.is_empty() {
        println!("Nothing to do");
    }
    println!("Heads: {}", format_revisions(&report.heads));
}

fn format_revisions(ids: &[&str]) -> String {
    if ids.is_empty() { "(base)".to_string() } else { ids.join(", ") }
}

pub async fn migrate(config: &Config, action: MigrateCommand) -> anyhow::Result<()> {
    let pool = db::connect(&config.database).await.context("connecting to the database")?;
    let migrator = Migrator::new(pool.clone())?;

    match action {
        MigrateCommand::Up { to, steps } => {
            print_report(&migrator.upgrade(MigrateCommand::upgrade_target(to, steps)).await?);
        }
        MigrateCommand::Down { to, steps } => {
            print_report(&migrator.downgrade(MigrateCommand::downgrade_target(to, steps)).await?);
        }
        MigrateCommand::Current => {
            println!("{}", format_revisions(&migrator.current().await?));
        }
        MigrateCommand::History => {
            for status in migrator.history().await? {
                let marker = if status.applied { "*" } else { " " };
                let head = if status.is_head { " (head)" } else { "" };
                println!(
                    "[{marker}] {} <- {}{head}  {}",
                    status.id,
                    format_revisions(&status.down_revisions),
                    status.description
                );
            }
        }
        MigrateCommand::Heads => {
            println!("{}", format_revisions(&migrator.graph().heads()));
        }
        MigrateCommand::Stamp { revisions } => {
            let heads = migrator.stamp(&revisions).await?;
            println!("Stamped; heads now {}", format_revisions(&heads));
        }
        MigrateCommand::Clear => {
            let removed = migrator.clear().await?;
            println!("Removed {removed} revision record(s)");
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn reprocess_payment(config: &Config, order_id: &str, force: bool) -> anyhow::Result<String> {
    let payment = config.payment.as_ref().context("no payment provider is configured")?;
    let provider = payment_providers::create_provider(&payment.provider)?;
    let pool = db::connect(&config.database).await.context("connecting to the database")?;

    let outcome = settlement::reconcile_payment(&pool, provider.as_ref(), order_id, force).await;
    pool.close().await;
    Ok(describe_outcome(&outcome?))
}

/// Run the provider healthcheck and return the process exit code.
pub async fn payment_healthcheck(config: &Config) -> i32 {
    let Some(payment) = config.payment.as_ref() else {
        eprintln!("Payment healthcheck failed: no payment provider is configured");
        return EXIT_CONFIG_ERROR;
    };
    let provider = match payment_providers::create_provider(&payment.provider) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Payment healthcheck failed: invalid payment configuration: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    match provider.healthcheck().await {
        Ok(()) => {
            println!("Payment provider {} is healthy", provider.name());
            0
        }
        Err(failure) => {
            eprintln!("Payment healthcheck failed: {failure}");
            failure.exit_code()
        }
    }
}

/// Run a non-serve subcommand and return the process exit code.
pub async fn run(command: Command, config: &Config) -> anyhow::Result<i32> {
    match command {
        Command::Serve => bail!("serve is handled by the binary entry point"),
        Command::Migrate { action } => migrate(config, action).await.map(|()| 0),
        Command::WidgetToken(args) => {
            println!("{}", widget_token(&args)?);
            Ok(0)
        }
        Command::ReprocessPayment { order_id, force } => {
            println!("{}", reprocess_payment(config, &order_id, force).await?);
            Ok(0)
        }
        Command::PaymentHealthcheck => Ok(payment_healthcheck(config).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::widget_token::verify_widget_token,
        config::{CashierConfig, PaymentProviderConfig},
        test_utils::create_test_config,
    };
    use clap::Parser;
    use url::Url;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> Command {
        TestCli::try_parse_from(std::iter::once("dialogctl").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_migrate_targets() {
        let Command::Migrate {
            action: MigrateCommand::Up { to, steps },
        } = parse(&["migrate", "up", "--steps", "2"])
        else {
            panic!("expected migrate up");
        };
        assert_eq!(MigrateCommand::upgrade_target(to, steps), UpgradeTarget::Steps(2));
        assert_eq!(MigrateCommand::upgrade_target(None, None), UpgradeTarget::Heads);

        let Command::Migrate {
            action: MigrateCommand::Down { to, steps },
        } = parse(&["migrate", "down", "--to", "base"])
        else {
            panic!("expected migrate down");
        };
        assert_eq!(MigrateCommand::downgrade_target(to, steps), DowngradeTarget::Base);
        assert_eq!(MigrateCommand::downgrade_target(None, None), DowngradeTarget::Steps(1));
        assert_eq!(
            MigrateCommand::downgrade_target(Some("5a8c4e2d7f35".to_string()), None),
            DowngradeTarget::Revision("5a8c4e2d7f35".to_string())
        );

        assert!(TestCli::try_parse_from(["dialogctl", "migrate", "up", "--to", "x", "--steps", "1"]).is_err());
        assert!(TestCli::try_parse_from(["dialogctl", "migrate", "stamp"]).is_err());
    }

    #[test]
    fn test_widget_token_command() {
        let assistant_id = Uuid::new_v4();
        let Command::WidgetToken(args) = parse(&[
            "widget-token",
            "cli-secret",
            "https://Shop.example.com, www.other.org ,",
            "--assistant-id",
            &assistant_id.to_string(),
            "--owner-id",
            &Uuid::new_v4().to_string(),
            "--widget-version",
            "3",
            "--ttl",
            "2h",
        ]) else {
            panic!("expected widget-token");
        };
        assert_eq!(args.ttl, Duration::from_secs(2 * 3600));

        let token = widget_token(&args).unwrap();
        let claims = verify_widget_token(&token, "cli-secret").unwrap();
        assert_eq!(claims.sub, assistant_id);
        assert_eq!(claims.widget_version, 3);
        assert_eq!(claims.domains, vec!["shop.example.com", "other.org"]);

        assert!(parse_domains(" , ,").is_err());
    }

    #[tokio::test]
    async fn test_healthcheck_exit_codes() {
        let mut config = create_test_config();
        config.payment = None;
        assert_eq!(payment_healthcheck(&config).await, EXIT_CONFIG_ERROR);

        // Dummy provider is always healthy
        assert_eq!(payment_healthcheck(&create_test_config()).await, 0);

        for (status, expected) in [(401, 3), (403, 4), (404, 5), (502, 6), (418, 7)] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let mut config = create_test_config();
            if let Some(payment) = config.payment.as_mut() {
                payment.provider = PaymentProviderConfig::Cashier(CashierConfig {
                    base_url: Url::parse(&server.uri()).unwrap(),
                    shop_id: "shop-1".to_string(),
                    secret_key: "s3cret".to_string(),
                    timeout: Duration::from_secs(2),
                });
            }
            assert_eq!(payment_healthcheck(&config).await, expected, "HTTP {status}");
        }
    }
}
