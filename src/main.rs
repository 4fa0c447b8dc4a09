use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use tracing_subscriber::EnvFilter;

use custody_core::{Amount, Identity, Role, VaultConfig, UNIT};

mod auth;
mod rail;
mod script;
mod state;

use auth::{identity_of, parse_signing_key, SignedCall};
use script::{run_script, ScriptStep, VaultAction};
use state::Session;

const DECIMALS: usize = 18;

#[derive(Parser)]
#[command(name = "custody", version, about = "Operate a custodial balance ledger")]
struct Cli {
    /// State file holding the ledger, roles, simulated wallets and records.
    #[arg(long, global = true, default_value = "custody.state.json")]
    state: PathBuf,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new state file.
    Init {
        #[arg(long)]
        admin: Option<Identity>,
        /// Minimum deposit in units, e.g. 0.01
        #[arg(long)]
        min: Option<String>,
        /// Maximum deposit in units, e.g. 100
        #[arg(long)]
        max: Option<String>,
        /// JSON file with initial_admin / min_deposit / max_deposit (smallest units).
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Credit an external wallet on the simulated rail.
    Fund { identity: Identity, amount: String },
    Deposit {
        #[arg(long)]
        caller: Identity,
        amount: String,
    },
    Withdraw {
        #[arg(long)]
        caller: Identity,
        amount: String,
    },
    WithdrawAll {
        #[arg(long)]
        caller: Identity,
    },
    /// Admin-only: move everything held to RECIPIENT.
    Sweep {
        #[arg(long)]
        caller: Identity,
        recipient: Identity,
    },
    Pause {
        #[arg(long)]
        caller: Identity,
    },
    Unpause {
        #[arg(long)]
        caller: Identity,
    },
    Grant {
        #[arg(long)]
        caller: Identity,
        identity: Identity,
        role: Role,
    },
    Revoke {
        #[arg(long)]
        caller: Identity,
        identity: Identity,
        role: Role,
    },
    Renounce {
        #[arg(long)]
        caller: Identity,
        role: Role,
    },
    /// Admin-only: change the deposit floor and ceiling (units).
    Limits {
        #[arg(long)]
        caller: Identity,
        min: String,
        max: String,
    },
    Balance { identity: Identity },
    Status,
    Records {
        /// Only the last N records.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Apply a JSON array of {caller, action} steps.
    Run { script: PathBuf },
    /// Write a fresh ed25519 key pair (sk.hex, pk.hex) and print its identity.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Sign an action JSON file into a call envelope.
    Sign {
        #[arg(long)]
        sk_hex: String,
        /// Defaults to the last accepted nonce for this key plus one.
        #[arg(long)]
        nonce: Option<u64>,
        #[arg(long)]
        out: Option<PathBuf>,
        action: PathBuf,
    },
    /// Verify a signed envelope and apply it as its signer.
    Submit { envelope: PathBuf },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// "1.5" -> 1.5 units in smallest denomination. At most 18 fractional digits.
fn parse_units(input: &str) -> Result<Amount> {
    let input = input.trim();
    let (whole, frac) = input.split_once('.').unwrap_or((input, ""));
    if whole.is_empty() && frac.is_empty() {
        bail!("empty amount");
    }
    if frac.len() > DECIMALS {
        bail!("{input}: more than {DECIMALS} decimal places");
    }
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !digits_only(whole) || !digits_only(frac) {
        bail!("{input}: not a decimal amount");
    }
    let whole: Amount = if whole.is_empty() { 0 } else { whole.parse()? };
    let frac: Amount = if frac.is_empty() {
        0
    } else {
        format!("{:0<width$}", frac, width = DECIMALS).parse()?
    };
    whole
        .checked_mul(UNIT)
        .and_then(|w| w.checked_add(frac))
        .with_context(|| format!("{input}: amount too large"))
}

fn format_units(amount: Amount) -> String {
    let whole = amount / UNIT;
    let frac = amount % UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac, width = DECIMALS);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

fn load_config(
    path: Option<&Path>,
    admin: Option<Identity>,
    min: Option<&str>,
    max: Option<&str>,
) -> Result<VaultConfig> {
    let mut config = match path {
        Some(path) => {
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_slice::<VaultConfig>(&bytes)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => {
            let admin = admin.clone().context("--admin is required without --config")?;
            VaultConfig::new(admin)
        }
    };
    if let Some(admin) = admin {
        config.initial_admin = admin;
    }
    if let Some(min) = min {
        config.min_deposit = parse_units(min)?;
    }
    if let Some(max) = max {
        config.max_deposit = parse_units(max)?;
    }
    Ok(config)
}

/// Apply one action, persist whatever happened, then surface the outcome.
fn execute(session: &Session, caller: &Identity, action: VaultAction) -> Result<()> {
    let outcome = action.apply(&session.vault, caller);
    session.save()?;
    match outcome {
        Ok(outcome) => {
            println!("{outcome}");
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("{caller}: {action:?}")),
    }
}

fn status(session: &Session) {
    let vault = &session.vault;
    let snap = vault.snapshot();
    let limits = snap.limits;
    println!("state:        {:?}", vault.status());
    println!("reserve:      {}", format_units(snap.reserve_total));
    println!("held by rail: {}", format_units(vault.rail().book().held));
    println!(
        "limits:       {} .. {}",
        format_units(limits.min_deposit),
        format_units(limits.max_deposit)
    );
    for (identity, roles) in snap.roles.entries() {
        let roles: Vec<&str> = roles.iter().map(Role::as_str).collect();
        println!("role          {identity}: {}", roles.join(","));
    }
    for (identity, amount) in vault.accounts() {
        println!("balance       {identity}: {}", format_units(amount));
    }
    if snap.swept {
        println!("note:         emergency sweep performed; balances exceed reserve");
    }
    println!("state root:   {}", snap.state_root);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let path = cli.state.as_path();

    match cli.command {
        Command::Init {
            admin,
            min,
            max,
            config,
            force,
        } => {
            let config = load_config(config.as_deref(), admin, min.as_deref(), max.as_deref())?;
            let session = Session::create(path, config, force)?;
            session.save()?;
            println!("Initialised → {}", path.display());
        }
        Command::Fund { identity, amount } => {
            let session = Session::open(path)?;
            let wallet = session.vault.rail().fund(&identity, parse_units(&amount)?)?;
            session.save()?;
            println!("{identity} wallet: {}", format_units(wallet));
        }
        Command::Deposit { caller, amount } => {
            let amount = parse_units(&amount)?;
            execute(&Session::open(path)?, &caller, VaultAction::Deposit { amount })?;
        }
        Command::Withdraw { caller, amount } => {
            let amount = parse_units(&amount)?;
            execute(&Session::open(path)?, &caller, VaultAction::Withdraw { amount })?;
        }
        Command::WithdrawAll { caller } => {
            execute(&Session::open(path)?, &caller, VaultAction::WithdrawAll)?;
        }
        Command::Sweep { caller, recipient } => {
            execute(
                &Session::open(path)?,
                &caller,
                VaultAction::EmergencySweep { recipient },
            )?;
        }
        Command::Pause { caller } => execute(&Session::open(path)?, &caller, VaultAction::Pause)?,
        Command::Unpause { caller } => execute(&Session::open(path)?, &caller, VaultAction::Unpause)?,
        Command::Grant {
            caller,
            identity,
            role,
        } => execute(
            &Session::open(path)?,
            &caller,
            VaultAction::GrantRole { identity, role },
        )?,
        Command::Revoke {
            caller,
            identity,
            role,
        } => execute(
            &Session::open(path)?,
            &caller,
            VaultAction::RevokeRole { identity, role },
        )?,
        Command::Renounce { caller, role } => execute(
            &Session::open(path)?,
            &caller,
            VaultAction::RenounceRole { role },
        )?,
        Command::Limits { caller, min, max } => {
            let action = VaultAction::SetDepositLimits {
                min_deposit: parse_units(&min)?,
                max_deposit: parse_units(&max)?,
            };
            execute(&Session::open(path)?, &caller, action)?;
        }
        Command::Balance { identity } => {
            let session = Session::open(path)?;
            println!(
                "{identity}: {} (wallet {})",
                format_units(session.vault.balance_of(&identity)),
                format_units(session.vault.rail().wallet(&identity))
            );
        }
        Command::Status => status(&Session::open(path)?),
        Command::Records { tail } => {
            let records = Session::open(path)?.records();
            let skip = tail.map_or(0, |n| records.len().saturating_sub(n));
            for record in &records[skip..] {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        Command::Run { script } => {
            let bytes = fs::read(&script).with_context(|| format!("reading {}", script.display()))?;
            let steps: Vec<ScriptStep> = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", script.display()))?;
            let session = Session::open(path)?;
            let reports = run_script(&session.vault, &steps);
            session.save()?;
            let mut failed = 0usize;
            for report in &reports {
                match &report.outcome {
                    Ok(outcome) => println!("[{}] {} {:?}: {outcome}", report.index, report.caller, report.action),
                    Err(err) => {
                        failed += 1;
                        println!("[{}] {} {:?}: error: {err}", report.index, report.caller, report.action);
                    }
                }
            }
            println!("{} steps, {failed} failed", reports.len());
        }
        Command::Keygen { out_dir } => {
            fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
            let mut secret = [0u8; 32];
            OsRng.fill_bytes(&mut secret);
            let key = SigningKey::from_bytes(&secret);
            let public = key.verifying_key();
            fs::write(out_dir.join("sk.hex"), hex::encode(secret))?;
            fs::write(out_dir.join("pk.hex"), hex::encode(public.as_bytes()))?;
            println!("identity {} → {}", identity_of(&public), out_dir.display());
        }
        Command::Sign {
            sk_hex,
            nonce,
            out,
            action,
        } => {
            let key = parse_signing_key(&sk_hex)?;
            let bytes = fs::read(&action).with_context(|| format!("reading {}", action.display()))?;
            let action: VaultAction = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", action.display()))?;
            let nonce = match nonce {
                Some(nonce) => nonce,
                None if path.exists() => {
                    Session::open(path)?.last_nonce(&identity_of(&key.verifying_key())) + 1
                }
                None => 1,
            };
            let call = SignedCall::sign(&key, action, nonce)?;
            let json = serde_json::to_string_pretty(&call)?;
            match out {
                Some(out) => {
                    fs::write(&out, json).with_context(|| format!("writing {}", out.display()))?;
                    println!("signed (nonce {nonce}) → {}", out.display());
                }
                None => println!("{json}"),
            }
        }
        Command::Submit { envelope } => {
            let bytes = fs::read(&envelope).with_context(|| format!("reading {}", envelope.display()))?;
            let call: SignedCall = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", envelope.display()))?;
            let caller = call.verify()?;
            let mut session = Session::open(path)?;
            session.accept_nonce(&caller, call.nonce)?;
            tracing::info!(%caller, nonce = call.nonce, "signed call accepted");
            execute(&session, &caller, call.action)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_units() {
        assert_eq!(parse_units("1").unwrap(), UNIT);
        assert_eq!(parse_units("0.4").unwrap(), UNIT * 4 / 10);
        assert_eq!(parse_units(".5").unwrap(), UNIT / 2);
        assert_eq!(parse_units("0.000000000000000001").unwrap(), 1);
        assert!(parse_units("0.0000000000000000001").is_err());
        assert!(parse_units("-1").is_err());
        assert!(parse_units("1e3").is_err());
        assert!(parse_units(".").is_err());
    }

    #[test]
    fn formats_units_without_trailing_zeros() {
        assert_eq!(format_units(UNIT), "1");
        assert_eq!(format_units(UNIT * 6 / 10), "0.6");
        assert_eq!(format_units(1), "0.000000000000000001");
        assert_eq!(format_units(0), "0");
    }

    #[test]
    fn config_flags_override_file_defaults() {
        let config = load_config(None, Some("root".into()), Some("0.5"), None).unwrap();
        assert_eq!(config.initial_admin, "root");
        assert_eq!(config.min_deposit, UNIT / 2);
        assert!(load_config(None, None, None, None).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
