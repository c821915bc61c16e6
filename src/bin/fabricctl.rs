//! Feature-flag admin CLI.

use std::process::ExitCode;
use std::sync::Arc;

use agent_fabric::config::FabricConfig;
use agent_fabric::flags::{FeatureFlags, FlagSetting, FlagStore, InProcessFlagChannel, SqliteFlagStore};
use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser)]
#[command(name = "fabricctl")]
#[command(about = "Inspect and mutate feature flags")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a flag's boolean and optional percentage for a tenant.
    Get {
        flag: String,
        #[arg(long, default_value = "default")]
        tenant: String,
    },
    /// Persist a flag's boolean value for a tenant.
    Set {
        flag: String,
        #[arg(long)]
        value: bool,
        #[arg(long, default_value = "default")]
        tenant: String,
    },
    /// Set a flag's rollout percentage (0-100) for a tenant.
    SetPercentage {
        flag: String,
        #[arg(long)]
        percentage: u8,
        #[arg(long, default_value = "default")]
        tenant: String,
    },
    /// Remove both the boolean and percentage entries for a flag/tenant.
    Clear {
        flag: String,
        #[arg(long, default_value = "default")]
        tenant: String,
    },
    /// List all flags, optionally scoped to one tenant.
    List {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Print the per-user resolution of a flag for a tenant.
    TestUser {
        flag: String,
        #[arg(long)]
        user_id: String,
        #[arg(long, default_value = "default")]
        tenant: String,
    },
}

fn open_flags() -> Result<FeatureFlags, String> {
    let cfg = FabricConfig::from_env();
    let store: Arc<dyn FlagStore> = match cfg.store_url {
        Some(path) => Arc::new(SqliteFlagStore::open(&path).map_err(|e| e.to_string())?),
        None => Arc::new(SqliteFlagStore::open("fabricctl_flags.db").map_err(|e| e.to_string())?),
    };
    Ok(FeatureFlags::new(store, Arc::new(InProcessFlagChannel::new())))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let flags = match open_flags() {
        Ok(flags) => flags,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match run(&cli.command, &flags) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(command: &Command, flags: &FeatureFlags) -> Result<(), String> {
    let rt = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;

    match command {
        Command::Get { flag, tenant } => {
            let enabled = flags.is_enabled(flag, tenant);
            let percentage = flags.list_all(Some(tenant)).into_iter().find(|(f, _, _)| f == flag).and_then(|(_, _, s)| s.percentage);
            match percentage {
                Some(p) => println!("{flag} = {enabled} ({p}%)"),
                None => println!("{flag} = {enabled}"),
            }
            Ok(())
        }
        Command::Set { flag, value, tenant } => {
            rt.block_on(flags.set(flag, tenant, FlagSetting { enabled: *value, percentage: None }));
            println!("{} {flag}={value} for tenant {tenant}", "set".green());
            Ok(())
        }
        Command::SetPercentage { flag, percentage, tenant } => {
            if *percentage > 100 {
                return Err(format!("percentage must be 0..=100, got {percentage}"));
            }
            rt.block_on(flags.set(flag, tenant, FlagSetting::rollout(*percentage)));
            println!("{} {flag} percentage={percentage} for tenant {tenant}", "set".green());
            Ok(())
        }
        Command::Clear { flag, tenant } => {
            rt.block_on(flags.clear(flag, tenant));
            println!("{} {flag} for tenant {tenant}", "cleared".yellow());
            Ok(())
        }
        Command::List { tenant } => {
            let entries = flags.list_all(tenant.as_deref());
            if entries.is_empty() {
                println!("(no flags)");
            }
            for (flag, tenant, setting) in entries {
                match setting.percentage {
                    Some(p) => println!("{flag}\t{tenant}\t{}\t{p}%", setting.enabled),
                    None => println!("{flag}\t{tenant}\t{}", setting.enabled),
                }
            }
            Ok(())
        }
        Command::TestUser { flag, user_id, tenant } => {
            let resolved = flags.is_enabled_for_user(flag, tenant, user_id);
            println!("{flag} for user {user_id} in tenant {tenant} = {resolved}");
            Ok(())
        }
    }
}
