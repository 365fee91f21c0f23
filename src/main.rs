use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use draw_core::{
    CollaboratorError, Collaborators, DrawError, DrawService, DrawStore, PaymentStatus, StoreError,
};
use draw_ledger::FileJournal;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod notify;
mod payments;
mod receipt;

use config::{ConfigError, EngineConfig};
use notify::TracingSink;
use payments::PaymentBook;
use receipt::{parse_signing_key, parse_verifying_key, DrawReceipt, ReceiptCore, ReceiptError};

/// voyage-draw - referral-weighted monthly draw
#[derive(Parser, Debug)]
#[command(name = "voyage-draw", version, about)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(short, long, default_value = "voyage.toml", global = true)]
    config: PathBuf,

    /// Log filter, overriding the configured one (RUST_LOG wins over both).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a participant, optionally through a referrer's code.
    Register {
        id: String,
        referral_code: String,
        #[arg(long)]
        referred_by: Option<String>,
    },
    /// Record that `referrer` brought in `referee`.
    Link { referrer: String, referee: String },
    /// Write a payment status into the payment book.
    SetPayment {
        participant: String,
        cycle: String,
        #[arg(value_enum)]
        status: PaymentArg,
    },
    /// Open a cycle accepting entries in [opens_at, closes_at), unix seconds.
    OpenCycle {
        id: String,
        #[arg(long)]
        opens_at: u64,
        #[arg(long)]
        closes_at: u64,
    },
    IssueTicket { participant: String, cycle: String },
    LockCycle { cycle: String },
    /// Lock every open cycle whose window has passed.
    LockDue,
    /// Draw the winner of a locked cycle.
    Draw {
        cycle: String,
        /// File holding a hex Ed25519 secret key; signs a receipt when given.
        #[arg(long)]
        sign_key: Option<PathBuf>,
        /// Where to write the receipt; printed when omitted.
        #[arg(long)]
        receipt_out: Option<PathBuf>,
    },
    /// Tier reached with `count` referrals.
    Tier { count: u32 },
    /// Distance from `count` referrals to the next tier.
    Progress { count: u32 },
    Standing { participant: String },
    /// List every registered participant.
    Participants,
    History { participant: String },
    Winners,
    Audit { cycle: String },
    /// Re-run a drawn cycle from its recorded seed.
    Verify { cycle: String },
    /// Check the journal hash chain end to end.
    VerifyJournal,
    /// Generate an Ed25519 keypair for signing receipts.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    VerifyReceipt {
        receipt: PathBuf,
        /// File holding the hex public key the receipt must be signed with.
        #[arg(long)]
        pubkey: Option<PathBuf>,
        /// Also compare the receipt with the draw recorded in the journal.
        #[arg(long)]
        check_journal: bool,
    },
    /// Print the effective configuration.
    ShowConfig,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PaymentArg {
    Unpaid,
    Pending,
    Paid,
}

impl From<PaymentArg> for PaymentStatus {
    fn from(arg: PaymentArg) -> Self {
        match arg {
            PaymentArg::Unpaid => PaymentStatus::Unpaid,
            PaymentArg::Pending => PaymentStatus::Pending,
            PaymentArg::Paid => PaymentStatus::Paid,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Draw(#[from] DrawError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
    #[error(transparent)]
    Payments(#[from] CollaboratorError),
    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("verification failed: {0}")]
    Verification(String),
}

struct Engine {
    service: DrawService,
    journal: Arc<FileJournal>,
}

fn engine(config: &EngineConfig) -> Result<Engine, CliError> {
    let journal = Arc::new(FileJournal::open_waiting(&config.journal_path)?);
    let payments = Arc::new(PaymentBook::new(&config.payments_path));
    let collaborators = Collaborators::new(payments)
        .with_store(Arc::clone(&journal) as Arc<dyn DrawStore>)
        .with_notifier(Arc::new(TracingSink))
        .with_eligibility_timeout(config.eligibility_timeout());
    let service = DrawService::restore(config.tiers.clone(), collaborators)?;
    Ok(Engine { service, journal })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_text(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::File {
        path: path.to_path_buf(),
        source,
    })
}

fn write_text(path: &Path, text: &str) -> Result<(), CliError> {
    let io = |source: std::io::Error| CliError::File {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io)?;
    }
    fs::write(path, text).map_err(io)
}

fn run(cli: Cli, config: EngineConfig) -> Result<(), CliError> {
    match cli.command {
        Command::Register {
            id,
            referral_code,
            referred_by,
        } => {
            let engine = engine(&config)?;
            match referred_by {
                Some(referrer_code) => {
                    print_json(&engine.service.register_with_code(&id, &referral_code, &referrer_code)?)?
                }
                None => print_json(&engine.service.register_participant(&id, &referral_code)?)?,
            }
            let link = engine.service.referral_link(&config.referral_base_url, &id)?;
            println!("referral link: {link}");
        }
        Command::Link { referrer, referee } => {
            let engine = engine(&config)?;
            print_json(&engine.service.register_edge(&referrer, &referee)?)?;
        }
        Command::SetPayment {
            participant,
            cycle,
            status,
        } => {
            PaymentBook::new(&config.payments_path).set_status(&participant, &cycle, status.into())?;
        }
        Command::OpenCycle {
            id,
            opens_at,
            closes_at,
        } => {
            let engine = engine(&config)?;
            print_json(&engine.service.open_cycle(&id, opens_at, closes_at)?)?;
        }
        Command::IssueTicket { participant, cycle } => {
            let engine = engine(&config)?;
            print_json(&engine.service.issue_ticket(&participant, &cycle)?)?;
        }
        Command::LockCycle { cycle } => {
            let engine = engine(&config)?;
            let locked = engine.service.lock_cycle(&cycle)?;
            println!("{} locked with {} tickets", locked.id, locked.tickets.len());
        }
        Command::LockDue => {
            let engine = engine(&config)?;
            print_json(&engine.service.lock_due_cycles()?)?;
        }
        Command::Draw {
            cycle,
            sign_key,
            receipt_out,
        } => {
            let engine = engine(&config)?;
            let outcome = match engine.service.close_cycle_with_winner(&cycle) {
                Ok(outcome) => outcome,
                Err(DrawError::EmptyTicketPool { cycle }) => {
                    print_json(&json!({ "cycle": cycle, "winner": null }))?;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            print_json(&outcome)?;
            if let Some(key_path) = sign_key {
                let key = parse_signing_key(&read_text(&key_path)?)?;
                let core = ReceiptCore::from_audit(
                    &engine.service.audit(&cycle)?,
                    engine.journal.head()?.digest,
                )?;
                let receipt = DrawReceipt::sign(core, &key);
                let text = serde_json::to_string_pretty(&receipt)?;
                match receipt_out {
                    Some(path) => {
                        write_text(&path, &text)?;
                        info!(cycle = %cycle, path = %path.display(), "draw receipt written");
                    }
                    None => println!("{text}"),
                }
            }
        }
        Command::Tier { count } => print_json(config.tiers.tier_for(count))?,
        Command::Progress { count } => print_json(&config.tiers.progress_to_next(count))?,
        Command::Standing { participant } => {
            let engine = engine(&config)?;
            let standing = engine.service.standing(&participant)?;
            let link = engine
                .service
                .referral_link(&config.referral_base_url, &participant)?;
            print_json(&json!({ "standing": standing, "referral_link": link }))?;
        }
        Command::Participants => {
            let engine = engine(&config)?;
            print_json(&engine.service.participants()?)?;
        }
        Command::History { participant } => {
            let engine = engine(&config)?;
            print_json(&engine.service.history_for(&participant)?)?;
        }
        Command::Winners => {
            let engine = engine(&config)?;
            print_json(&engine.service.winners()?)?;
        }
        Command::Audit { cycle } => {
            let engine = engine(&config)?;
            print_json(&engine.service.audit(&cycle)?)?;
        }
        Command::Verify { cycle } => {
            let engine = engine(&config)?;
            if !engine.service.verify_draw(&cycle)? {
                return Err(CliError::Verification(format!(
                    "{cycle} has no reproducible draw"
                )));
            }
            println!("{cycle}: recorded winner reproduced from its seed");
        }
        Command::VerifyJournal => {
            let journal = FileJournal::open_waiting(&config.journal_path)?;
            let head = journal.head()?;
            println!(
                "journal ok: {} entries, head {}",
                head.len,
                hex::encode(head.digest)
            );
        }
        Command::Keygen { out_dir } => {
            let key = SigningKey::generate(&mut OsRng);
            write_text(&out_dir.join("sk.hex"), &hex::encode(key.to_bytes()))?;
            write_text(
                &out_dir.join("pk.hex"),
                &hex::encode(key.verifying_key().as_bytes()),
            )?;
            println!("keypair written → {}", out_dir.display());
        }
        Command::VerifyReceipt {
            receipt,
            pubkey,
            check_journal,
        } => {
            let receipt: DrawReceipt = serde_json::from_str(&read_text(&receipt)?)?;
            match pubkey {
                Some(path) => receipt.verify_from(&parse_verifying_key(&read_text(&path)?)?)?,
                None => {
                    receipt.verify()?;
                }
            }
            if check_journal {
                let engine = engine(&config)?;
                let cycle = &receipt.core.cycle;
                let recorded = ReceiptCore::from_audit(
                    &engine.service.audit(cycle)?,
                    engine.journal.head()?.digest,
                )?;
                if !recorded.same_draw(&receipt.core) {
                    return Err(CliError::Verification(format!(
                        "receipt for {cycle} does not match the journaled draw"
                    )));
                }
                if !engine.service.verify_draw(cycle)? {
                    return Err(CliError::Verification(format!(
                        "{cycle} has no reproducible draw"
                    )));
                }
            }
            println!(
                "receipt ok: {} won {} (signer {})",
                receipt.core.winner.participant, receipt.core.cycle, receipt.signer
            );
        }
        Command::ShowConfig => print!("{}", config.to_toml()?),
    }
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config);
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_tracing(&level);

    let result = config.map_err(CliError::from).and_then(|config| run(cli, config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
