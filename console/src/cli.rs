//! # CLI Interface
//!
//! Command-line structure for `iap-console` using `clap` derive. Each
//! subcommand maps onto one inbound engine operation, run against the
//! sandbox storefront kept in the data directory.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use iap_engine::orchestrator::HandoffPurpose;

/// Developer console for the in-app purchase engine.
///
/// Drives purchases, receipt refreshes and authentication recovery against
/// a local sandbox storefront. Everything persistent lives in the data
/// directory: configuration, the storefront key and the sled database.
#[derive(Parser, Debug)]
#[command(
    name = "iap-console",
    about = "In-app purchase engine developer console",
    version,
    propagate_version = true
)]
pub struct IapConsoleCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Data directory holding config.toml, storefront.key and the database.
    #[arg(long, short = 'd', env = "IAP_DATA_DIR", default_value = ".iap", global = true)]
    pub data_dir: PathBuf,

    /// Configuration file. Defaults to `<data-dir>/config.toml`.
    #[arg(long, short = 'c', env = "IAP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, env = "IAP_LOG_FORMAT", default_value_t = LogFormatArg::Pretty, global = true)]
    pub log_format: LogFormatArg,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "iap_console=info,iap_engine=info", global = true)]
    pub log_level: String,

    /// How long the storefront task waits for more work before stopping.
    #[arg(long, default_value_t = 250, global = true)]
    pub idle_ms: u64,

    /// Print Prometheus metrics after the command finishes.
    #[arg(long, global = true)]
    pub metrics: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate client and storefront keys and write a fresh config.
    Init(InitArgs),
    /// Buy a product.
    Purchase(PurchaseArgs),
    /// Report the outcome of an authentication hand-off.
    Resume(ResumeArgs),
    /// Fetch the signed-in account's gamer UUID.
    GamerUuid(GamerUuidArgs),
    /// Refresh and print the account's receipts.
    Receipts,
    /// Refresh and print the product catalog.
    Products,
    /// Show recovery state and ledger size.
    Status,
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Product ids to offer.
    #[arg(long, value_delimiter = ',', default_value = "sword,axe,shield")]
    pub products: Vec<String>,

    /// Mark purchases as real rather than test purchases.
    #[arg(long)]
    pub live: bool,

    /// Overwrite an existing configuration.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct PurchaseArgs {
    /// Product id to buy.
    pub product: String,

    /// Make the storefront demand re-authentication first.
    #[arg(long)]
    pub require_auth: bool,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Which request sent the player to authenticate.
    #[arg(long = "for", value_enum, default_value_t = HandoffArg::Purchase)]
    pub purpose: HandoffArg,

    /// The player cancelled or failed authentication.
    #[arg(long)]
    pub cancel: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffArg {
    Purchase,
    GamerUuid,
}

impl From<HandoffArg> for HandoffPurpose {
    fn from(arg: HandoffArg) -> Self {
        match arg {
            HandoffArg::Purchase => HandoffPurpose::Purchase,
            HandoffArg::GamerUuid => HandoffPurpose::GamerUuid,
        }
    }
}

#[derive(Args, Debug)]
pub struct GamerUuidArgs {
    /// Make the storefront demand re-authentication first.
    #[arg(long)]
    pub require_auth: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        IapConsoleCli::command().debug_assert();
    }

    #[test]
    fn purchase_parses_flags() {
        let cli = IapConsoleCli::try_parse_from([
            "iap-console",
            "--data-dir",
            "/tmp/iap",
            "purchase",
            "sword",
            "--require-auth",
        ])
        .unwrap();
        assert_eq!(cli.global.data_dir, PathBuf::from("/tmp/iap"));
        match cli.command {
            Commands::Purchase(args) => {
                assert_eq!(args.product, "sword");
                assert!(args.require_auth);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn resume_defaults_to_purchase_handoff() {
        let cli = IapConsoleCli::try_parse_from(["iap-console", "resume"]).unwrap();
        match cli.command {
            Commands::Resume(args) => {
                assert_eq!(HandoffPurpose::from(args.purpose), HandoffPurpose::Purchase);
                assert!(!args.cancel);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = IapConsoleCli::try_parse_from([
            "iap-console",
            "resume",
            "--for",
            "gamer-uuid",
            "--cancel",
        ])
        .unwrap();
        match cli.command {
            Commands::Resume(args) => {
                assert_eq!(args.purpose, HandoffArg::GamerUuid);
                assert!(args.cancel);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn init_splits_product_list() {
        let cli =
            IapConsoleCli::try_parse_from(["iap-console", "init", "--products", "a,b"]).unwrap();
        match cli.command {
            Commands::Init(args) => assert_eq!(args.products, vec!["a", "b"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
