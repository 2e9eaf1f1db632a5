use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use region_vault_core::RegionConfig;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use crate::types::CommandOutput;

/// Values given on the command line or through `REGIONVAULT_*` variables
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub registry_capacity: Option<usize>,
    pub kdf_iterations: Option<u32>,
    pub max_region_len: Option<u64>,
    pub no_lock: bool,
}

/// Install the stderr subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Defaults, then the JSON file, then overrides
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<RegionConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config file '{}'", path.display()))?
        }
        None => RegionConfig::default(),
    };

    if let Some(capacity) = overrides.registry_capacity {
        config.registry_capacity = capacity;
    }
    if let Some(iterations) = overrides.kdf_iterations {
        config.kdf_iterations = iterations;
    }
    if let Some(max) = overrides.max_region_len {
        config.max_region_len = max;
    }
    if overrides.no_lock {
        config.lock_memory = false;
    }

    config.validate()?;
    Ok(config)
}

/// Take the password from the argument, or prompt for it without echo.
///
/// `confirm` asks twice and requires both entries to match.
pub fn resolve_password(
    given: Option<String>,
    confirm: bool,
    non_interactive: bool,
) -> Result<Zeroizing<String>> {
    if let Some(password) = given {
        let password = Zeroizing::new(password);
        if password.is_empty() {
            bail!("Password cannot be empty");
        }
        return Ok(password);
    }

    if non_interactive {
        bail!("Password is required in non-interactive mode (use --password or REGIONVAULT_PASSWORD)");
    }

    let password = Zeroizing::new(
        rpassword::prompt_password("Enter password: ").context("Failed to read password")?,
    );
    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    if confirm {
        let again = Zeroizing::new(
            rpassword::prompt_password("Confirm password: ")
                .context("Failed to read password confirmation")?,
        );
        if *again != *password {
            bail!("Passwords do not match");
        }
    }

    Ok(password)
}

/// Refuse to clobber an existing file unless forced
pub fn check_output_file(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Output file '{}' already exists. Use --force to overwrite.",
            path.display()
        );
    }
    Ok(())
}

/// Output result in JSON or text format
pub fn output_result(result: &CommandOutput, json_format: bool) {
    if json_format {
        match serde_json::to_string_pretty(result) {
            Ok(json) => println!("{}", json),
            Err(_) => eprintln!("Error serializing JSON output"),
        }
        return;
    }

    if !result.success {
        eprintln!("✗ Error: {}", result.message);
        if let Some(details) = &result.error {
            if details != &result.message {
                eprintln!("  Details: {}", details);
            }
        }
        return;
    }

    println!("✓ {}", result.message);

    if let Some(input) = &result.input_path {
        println!("  Input: {}", input);
    }
    if let Some(output) = &result.output_path {
        println!("  Output: {}", output);
    }
    if let Some(offset) = result.offset {
        println!("  Offset: {}", offset);
    }
    if let Some(length) = result.length {
        println!("  Length: {}", length);
    }
    if let Some(len) = result.plaintext_len {
        println!("  Plaintext: {} bytes", len);
    }
    if let Some(header) = &result.header {
        println!("  Salt: {}", header.salt);
        println!("  IV: {}", header.iv);
        println!("  Ciphertext: {} bytes", header.ciphertext_len);
        if !header.block_aligned {
            println!("  Warning: ciphertext is not a whole number of blocks");
        }
    }
    if let Some(checks) = &result.checks {
        for check in checks {
            let mark = if check.passed { "✓" } else { "✗" };
            match &check.detail {
                Some(detail) => println!("  {} {} ({})", mark, check.name, detail),
                None => println!("  {} {}", mark, check.name),
            }
        }
    }
}
