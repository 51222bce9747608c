// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # IAP Developer Console
//!
//! Entry point for the `iap-console` binary. Parses CLI arguments,
//! initializes logging, loads configuration and runs one engine operation
//! against the sandbox storefront in the data directory.
//!
//! - `init`     : generate keys and write `config.toml`
//! - `purchase` : buy a product, optionally forcing re-authentication
//! - `resume`   : report an authentication hand-off outcome
//! - `gamer-uuid`: fetch the signed-in account's gamer UUID
//! - `receipts` : refresh and print receipts
//! - `products` : refresh and print the catalog
//! - `status`   : show recovery state
//! - `version`  : print build version information

mod cli;
mod driver;
mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use iap_engine::config::{
    EngineConfig, ENGINE_VERSION, KEY_WRAP_ALGORITHM, SYMMETRIC_ALGORITHM,
};
use iap_engine::crypto::EnvelopeKeypair;
use iap_engine::recovery::{RecoveryState, ResumeOutcome, SuspensionStore};
use iap_engine::sandbox::SandboxStorefront;
use iap_engine::orchestrator::HandoffOutcome;
use iap_engine::{BridgeEvent, HandoffToken};

use cli::{Commands, GlobalArgs, IapConsoleCli};
use driver::{render_event, Session};

const CONFIG_FILE: &str = "config.toml";
const STOREFRONT_KEY_FILE: &str = "storefront.key";
const DB_DIR: &str = "db";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = IapConsoleCli::parse();
    logging::init_logging(&cli.global.log_level, cli.global.log_format.into());

    match cli.command {
        Commands::Init(args) => init(&cli.global, args),
        Commands::Version => {
            print_version();
            Ok(())
        }
        command => run(&cli.global, command).await,
    }
}

/// Generates client and storefront keys and writes the configuration.
fn init(global: &GlobalArgs, args: cli::InitArgs) -> Result<()> {
    let data_dir = &global.data_dir;
    let config_path = config_path(global);
    if config_path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            config_path.display()
        );
    }

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let client = EnvelopeKeypair::generate();
    let storefront = EnvelopeKeypair::generate();

    let config = EngineConfig {
        storefront_public_key: storefront.public_key().to_hex(),
        client_secret_key: client.secret_hex(),
        testing: !args.live,
        product_ids: args.products,
        data_dir: None,
    };
    config.validate().context("generated configuration is invalid")?;

    let rendered = config.to_toml_string()?;
    write_secret(&config_path, &rendered)?;
    let key_path = data_dir.join(STOREFRONT_KEY_FILE);
    write_secret(&key_path, &storefront.secret_hex())?;

    tracing::info!(
        config = %config_path.display(),
        storefront_public_key = %storefront.public_key().to_hex(),
        "console initialized"
    );

    println!("Console initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", config_path.display());
    println!("  Storefront key : {}", key_path.display());
    println!("  Products       : {}", config.product_ids.join(", "));
    println!("  Testing        : {}", config.testing);
    Ok(())
}

/// Writes `contents` to `path`, readable by the owner only on Unix.
fn write_secret(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn config_path(global: &GlobalArgs) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(|| global.data_dir.join(CONFIG_FILE))
}

/// Opens the session for every command that talks to the engine.
fn open_session(global: &GlobalArgs) -> Result<Session> {
    let config_path = config_path(global);
    let config = EngineConfig::from_file(&config_path).with_context(|| {
        format!(
            "failed to load {} (run `iap-console init` first)",
            config_path.display()
        )
    })?;

    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| global.data_dir.clone());
    let db_path = data_dir.join(DB_DIR);
    let store = SuspensionStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let key_path = data_dir.join(STOREFRONT_KEY_FILE);
    let storefront_secret = std::fs::read_to_string(&key_path)
        .with_context(|| format!("failed to read {}", key_path.display()))?;
    let storefront_keys = EnvelopeKeypair::from_secret_hex(storefront_secret.trim())
        .context("storefront key is invalid")?;
    let client_public = config.client_keypair()?.public_key();

    let storefront = SandboxStorefront::with_store(
        storefront_keys,
        client_public,
        SandboxStorefront::default_catalog(),
        &store,
    )?;

    tracing::debug!(db = %db_path.display(), "session opened");
    Ok(Session::open(&config, store, storefront)?)
}

async fn run(global: &GlobalArgs, command: Commands) -> Result<()> {
    let mut session = open_session(global)?;
    let idle = Duration::from_millis(global.idle_ms);

    match command {
        Commands::Purchase(args) => {
            if args.require_auth {
                let token = format!("signin-{}", chrono::Utc::now().timestamp_millis());
                session
                    .storefront
                    .require_authentication(HandoffToken::new(token));
            }
            if let Err(e) = session.engine.purchase(&args.product) {
                tracing::warn!(error = %e, product_id = %args.product, "purchase not issued");
            }
        }
        Commands::Resume(args) => {
            match session
                .engine
                .on_activity_resume(args.purpose.into(), !args.cancel)?
            {
                HandoffOutcome::Purchase(ResumeOutcome::NothingSuspended) => {
                    println!("nothing to resume")
                }
                HandoffOutcome::Purchase(ResumeOutcome::Reissue { product_id }) => {
                    println!("resuming purchase: {product_id}")
                }
                HandoffOutcome::Purchase(ResumeOutcome::Abandoned { product_id }) => {
                    println!("abandoned purchase: {product_id}")
                }
                HandoffOutcome::GamerUuid { refetching: true } => {
                    println!("fetching gamer uuid again")
                }
                HandoffOutcome::GamerUuid { refetching: false } => {
                    println!("gamer uuid sign-in abandoned")
                }
            }
        }
        Commands::GamerUuid(args) => {
            if args.require_auth {
                let token = format!("signin-{}", chrono::Utc::now().timestamp_millis());
                session
                    .storefront
                    .require_authentication(HandoffToken::new(token));
            }
            session.engine.request_gamer_uuid()?;
        }
        Commands::Receipts => {
            session.engine.request_receipts()?;
        }
        Commands::Products => {
            session.engine.request_products()?;
        }
        Commands::Status => {
            print_status(&session)?;
        }
        // Handled before a session is opened.
        Commands::Init(_) | Commands::Version => {}
    }

    let events = session.settle(idle).await;
    for event in &events {
        println!("{}", render_event(event));
    }

    if global.metrics {
        println!("{}", session.engine.metrics().encode()?);
    }

    let failed = events.iter().any(|e| {
        matches!(
            e,
            BridgeEvent::PurchaseFailed { .. } | BridgeEvent::GamerUuidFailed { .. }
        )
    });
    if failed {
        bail!("request did not complete");
    }
    Ok(())
}

fn print_status(session: &Session) -> Result<()> {
    match session.engine.recovery_state() {
        RecoveryState::Idle => println!("recovery       : idle"),
        RecoveryState::Suspended { product_id } => {
            println!("recovery       : suspended ({product_id}), awaiting authentication")
        }
        RecoveryState::Resuming { product_id } => {
            println!("recovery       : resuming ({product_id})")
        }
    }
    let ledger = session.storefront.receipts()?;
    println!("ledger         : {} receipt(s)", ledger.len());
    println!(
        "auth required  : {}",
        session.storefront.requires_authentication()
    );
    Ok(())
}

fn print_version() {
    println!("iap-console {}", env!("CARGO_PKG_VERSION"));
    println!("engine      {}", ENGINE_VERSION);
    println!("key wrap    {}", KEY_WRAP_ALGORITHM);
    println!("payload     {}", SYMMETRIC_ALGORITHM);
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cli::{InitArgs, LogFormatArg};
    use iap_engine::orchestrator::HandoffPurpose;

    fn global(dir: &Path) -> GlobalArgs {
        GlobalArgs {
            data_dir: dir.to_path_buf(),
            config: None,
            log_format: LogFormatArg::Pretty,
            log_level: "off".into(),
            idle_ms: 50,
            metrics: false,
        }
    }

    fn init_args(force: bool) -> InitArgs {
        InitArgs {
            products: vec!["sword".into(), "axe".into()],
            live: false,
            force,
        }
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path());
        init(&g, init_args(false)).unwrap();
        assert!(init(&g, init_args(false)).is_err());
        init(&g, init_args(true)).unwrap();
    }

    #[tokio::test]
    async fn gamer_uuid_signin_resumes_in_next_session() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path());
        init(&g, init_args(false)).unwrap();

        {
            let mut session = open_session(&g).unwrap();
            session
                .storefront
                .require_authentication(HandoffToken::new("signin"));
            session.engine.request_gamer_uuid().unwrap();
            let events = session.settle(Duration::from_millis(50)).await;
            assert!(matches!(
                &events[..],
                [BridgeEvent::AuthenticationRequired {
                    purpose: HandoffPurpose::GamerUuid,
                    ..
                }]
            ));
        }

        let mut session = open_session(&g).unwrap();
        assert_eq!(session.engine.recovery_state(), RecoveryState::Idle);
        assert_eq!(
            session
                .engine
                .on_activity_resume(HandoffPurpose::GamerUuid, true)
                .unwrap(),
            HandoffOutcome::GamerUuid { refetching: true }
        );
        let events = session.settle(Duration::from_millis(50)).await;
        assert!(matches!(&events[..], [BridgeEvent::GamerUuidFetched { .. }]));
        assert!(session.storefront.receipts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn suspended_purchase_resumes_in_next_session() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path());
        init(&g, init_args(false)).unwrap();

        {
            let mut session = open_session(&g).unwrap();
            session
                .storefront
                .require_authentication(HandoffToken::new("signin"));
            session.engine.purchase("sword").unwrap();
            let events = session.settle(Duration::from_millis(50)).await;
            assert!(matches!(
                &events[..],
                [BridgeEvent::AuthenticationRequired { .. }]
            ));
        }

        let mut session = open_session(&g).unwrap();
        assert_eq!(
            session.engine.recovery_state(),
            RecoveryState::Suspended {
                product_id: "sword".into()
            }
        );
        session
            .engine
            .on_activity_resume(HandoffPurpose::Purchase, true)
            .unwrap();
        let events = session.settle(Duration::from_millis(50)).await;
        assert_eq!(
            events[0],
            BridgeEvent::PurchaseCompleted {
                product_id: "sword".into()
            }
        );
        assert_eq!(session.storefront.receipts().unwrap().len(), 1);
    }
}
