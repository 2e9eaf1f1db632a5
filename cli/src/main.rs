// cli/src/main.rs
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use region_vault_core::{memory_locking_available, RegionVault};
use tracing::debug;

mod commands;
mod types;
mod utils;


use commands::RegionSpec;
use types::CommandOutput;
use utils::ConfigOverrides;

/// RegionVault - decrypt password-protected regions of container files
#[derive(Parser)]
#[command(name = "regionvault")]
#[command(version)]
#[command(author = "Mason Parle")]
#[command(about = "Seal, inspect and open encrypted regions inside container files")]
#[command(
    long_about = "Blobs are stored as [16-byte salt][16-byte IV][AES-256-CBC ciphertext] at any offset \
                  of a container file. Keys are derived with PBKDF2-HMAC-SHA256 (65536 rounds). \
                  Plaintext is held in wiped, memory-locked buffers until released."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Enable JSON output for programmatic usage
    #[arg(long, global = true)]
    json: bool,

    /// JSON file with vault settings
    #[arg(long, global = true, value_hint = ValueHint::FilePath, env = "REGIONVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum number of regions open at once
    #[arg(long, global = true, env = "REGIONVAULT_REGISTRY_CAPACITY")]
    registry_capacity: Option<usize>,

    /// PBKDF2 rounds; only the default opens blobs sealed elsewhere
    #[arg(long, global = true, env = "REGIONVAULT_KDF_ITERATIONS")]
    kdf_iterations: Option<u32>,

    /// Largest accepted region length in bytes
    #[arg(long, global = true, env = "REGIONVAULT_MAX_REGION_LEN")]
    max_region_len: Option<u64>,

    /// Do not request memory locking for keys and plaintext
    #[arg(long, global = true, env = "REGIONVAULT_NO_LOCK")]
    no_lock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file into a blob inside a container
    Seal(SealArgs),

    /// Decrypt a region and write the plaintext out
    Open(OpenArgs),

    /// Show a region's salt, IV and ciphertext size without decrypting
    Inspect(RegionArgs),

    /// Run self-tests to verify the decrypt and release pipeline
    SelfTest,
}

#[derive(Args, Clone)]
struct PasswordArgs {
    /// Password (prompted for when omitted)
    #[arg(short, long, env = "REGIONVAULT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Non-interactive mode (don't prompt for missing values)
    #[arg(short, long)]
    non_interactive: bool,
}

#[derive(Args, Clone)]
struct SealArgs {
    /// Input file to seal
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Container file to write the blob to
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Append to the container instead of replacing it
    #[arg(short, long)]
    append: bool,

    /// Force overwrite if the container exists
    #[arg(short, long, conflicts_with = "append")]
    force: bool,

    #[command(flatten)]
    password: PasswordArgs,
}

#[derive(Args, Clone)]
struct RegionArgs {
    /// Container file holding the blob
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Byte offset of the blob
    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Blob length in bytes, header included
    #[arg(short, long)]
    length: u64,
}

#[derive(Args, Clone)]
struct OpenArgs {
    #[command(flatten)]
    region: RegionArgs,

    /// Output file for the plaintext (stdout when omitted)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Force overwrite if the output file exists
    #[arg(short, long)]
    force: bool,

    #[command(flatten)]
    password: PasswordArgs,
}

impl From<RegionArgs> for RegionSpec {
    fn from(args: RegionArgs) -> Self {
        Self {
            input: args.input,
            offset: args.offset,
            length: args.length,
        }
    }
}

fn build_vault(cli: &Cli) -> Result<RegionVault> {
    let overrides = ConfigOverrides {
        registry_capacity: cli.registry_capacity,
        kdf_iterations: cli.kdf_iterations,
        max_region_len: cli.max_region_len,
        no_lock: cli.no_lock,
    };
    let config = utils::load_config(cli.config.as_deref(), &overrides)?;
    debug!(?config, "Loaded configuration");

    if config.lock_memory && !memory_locking_available() && cli.verbose > 0 {
        eprintln!("Warning: memory locking is not available; plaintext may be swapped to disk");
    }

    Ok(RegionVault::new(config)?)
}

fn run(cli: &Cli) -> Result<Option<CommandOutput>> {
    let vault = build_vault(cli)?;

    match &cli.command {
        Commands::Seal(args) => {
            let password = utils::resolve_password(
                args.password.password.clone(),
                true,
                args.password.non_interactive,
            )?;
            commands::seal_file(
                &vault,
                &args.input,
                &args.output,
                &password,
                args.append,
                args.force,
            )
            .map(Some)
        }
        Commands::Open(args) => {
            let password = utils::resolve_password(
                args.password.password.clone(),
                false,
                args.password.non_interactive,
            )?;
            commands::open_region(
                &vault,
                &args.region.clone().into(),
                password,
                args.output.as_deref(),
                args.force,
                cli.json,
            )
        }
        Commands::Inspect(args) => commands::inspect_region(&args.clone().into()).map(Some),
        Commands::SelfTest => commands::run_self_test(&vault, cli.verbose).map(Some),
    }
}

fn main() {
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose);

    match run(&cli) {
        Ok(Some(output)) => utils::output_result(&output, cli.json),
        Ok(None) => {}
        Err(e) => {
            utils::output_result(&CommandOutput::failure(&e), cli.json);
            process::exit(1);
        }
    }
}
