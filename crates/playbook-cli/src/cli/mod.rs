use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::sync::watch;

use playbook_addon_evm::solc::DEFAULT_SOLC;
use playbook_addon_evm::{EvmConnector, KeystoreCache, SolcCompiler};
use playbook_core::executor::Executor;
use playbook_core::manifest::PlaybookFile;
use playbook_core::spec::{EntryKind, Invocation, Spec, ValidationContext, DEFAULT_NODE_GROUP};
use playbook_core::Context;

mod errors;
mod output;

use errors::CliError;

#[derive(Parser, PartialEq, Clone, Debug)]
#[clap(author, version, about = "Runs commands and targets of an Ethereum playbook", long_about = None)]
pub struct Opts {
    /// Path to the playbook
    #[arg(long = "file", short = 'f', default_value = "ethereum-playbook.yml")]
    pub spec_path: String,
    /// Path to the Solidity compiler
    #[arg(long = "solc", short = 's', default_value = DEFAULT_SOLC)]
    pub solc_path: String,
    /// Inventory group to pick a node from
    #[arg(long = "group", short = 'g', default_value = DEFAULT_NODE_GROUP)]
    pub node_group: String,
    /// List commands and targets with the number of arguments they take
    #[arg(long = "list")]
    pub list: bool,
    /// Command or target to run. Without it the playbook is only validated
    pub name: Option<String>,
    /// Arguments of the command or target
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

pub fn main() {
    let logger = hiro_system_kit::log::setup_logger();
    let _guard = hiro_system_kit::log::setup_global_logger(logger.clone());
    let ctx = Context::new(logger);

    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            println!("{}", e);
            process::exit(1);
        }
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let handler = ctrlc::set_handler(move || {
        // a second interrupt gives up on the wait altogether
        if *cancel_tx.borrow() {
            process::exit(130);
        }
        let _ = cancel_tx.send(true);
    });
    if let Err(e) = handler {
        ctx.try_log(|logger| warn!(logger, "unable to install interrupt handler: {}", e));
    }

    match hiro_system_kit::nestable_block_on(handle_command(opts, cancel_rx, &ctx)) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            ctx.try_log(|logger| error!(logger, "{e}"));
            std::thread::sleep(std::time::Duration::from_millis(500));
            process::exit(1);
        }
    }
}

/// Returns whether every result succeeded.
async fn handle_command(
    opts: Opts,
    cancel: watch::Receiver<bool>,
    ctx: &Context,
) -> Result<bool, CliError> {
    let spec_path = PathBuf::from(&opts.spec_path);
    let file = PlaybookFile::from_path(&spec_path).map_err(|e| CliError::ManifestLoad {
        path: spec_path.clone(),
        message: errors::describe(&e),
    })?;
    let base_dir = match spec_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };

    let invocation = Invocation {
        name: if opts.list { None } else { opts.name.clone() },
        args: opts.args.clone(),
        node_group: opts.node_group.clone(),
    };
    let key_cache = Arc::new(KeystoreCache::new(ctx.clone()));
    let compiler = SolcCompiler::new(&opts.solc_path);
    let connector = EvmConnector;
    let vctx = ValidationContext {
        invocation: &invocation,
        base_dir: &base_dir,
        key_cache: key_cache.as_ref(),
        compiler: Some(&compiler),
        connector: &connector,
        ctx,
    };
    let validated = Spec::validate(&file, &vctx).await.map_err(|e| CliError::validation(&e))?;

    if opts.list {
        print_entries(&validated.spec);
        return Ok(true);
    }
    let Some(name) = invocation.name else {
        ctx.try_log(|logger| info!(logger, "playbook {} is valid", spec_path.display()));
        return Ok(true);
    };

    let expected =
        validated.spec.arg_count(&name).ok_or_else(|| CliError::UnknownCommand(name.clone()))?;
    if invocation.args.len() != expected {
        return Err(CliError::ArgumentCount { name, expected, given: invocation.args.len() });
    }
    let client = validated
        .client
        .ok_or_else(|| CliError::Execution("no node was selected to run against".into()))?;
    let is_target = validated.spec.targets.contains_key(&name);
    let mut executor =
        Executor::new(validated.spec, client, key_cache, ctx.clone()).with_cancel(cancel);

    if !is_target {
        let results =
            executor.run_command(&name, &invocation.args).await.map_err(|e| CliError::execution(&e))?;
        for result in results.iter() {
            println!("{}", output::result_line(result));
        }
        return Ok(results.iter().all(|r| r.is_ok()));
    }

    let mut all_ok = true;
    let outcome = executor
        .run_target(&name, &invocation.args, |step| {
            for result in step.results.iter() {
                all_ok &= result.is_ok();
                println!("{}", output::result_line(result));
            }
        })
        .await
        .map_err(|e| CliError::execution(&e))?;
    if let Some(halt) = &outcome.halt {
        let message = format!("stopped at step #{} ({}): {}", halt.step, halt.command, errors::describe(&halt.reason));
        println!("{}", output::error_line(&name, &message));
        return Ok(false);
    }
    Ok(all_ok)
}

fn print_entries(spec: &Spec) {
    for entry in spec.entries() {
        let kind = match &entry.kind {
            EntryKind::Command(kind) => kind.to_string(),
            EntryKind::Target => "target".to_string(),
        };
        println!(
            "{:<24} {:<6} {} arg(s)  {}",
            entry.name,
            kind,
            entry.arg_count,
            entry.description.as_deref().unwrap_or_default()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: Vec<&str>) -> Opts {
        Opts::parse_from(args)
    }

    #[test]
    fn test_default_values() {
        let opts = parse_args(vec!["ethereum-playbook"]);
        assert_eq!(opts.spec_path, "ethereum-playbook.yml");
        assert_eq!(opts.solc_path, "solc");
        assert_eq!(opts.node_group, "genesis");
        assert!(!opts.list);
        assert_eq!(opts.name, None);
        assert!(opts.args.is_empty());
    }

    #[test]
    fn test_name_and_arguments() {
        let opts = parse_args(vec!["ethereum-playbook", "-f", "deploy.yml", "-g", "testnet", "pay", "@bob", "-5"]);
        assert_eq!(opts.spec_path, "deploy.yml");
        assert_eq!(opts.node_group, "testnet");
        assert_eq!(opts.name.as_deref(), Some("pay"));
        assert_eq!(opts.args, vec!["@bob", "-5"]);
    }

    #[test]
    fn test_list_flag() {
        let opts = parse_args(vec!["ethereum-playbook", "--list", "-s", "/usr/bin/solc-0.8"]);
        assert!(opts.list);
        assert_eq!(opts.solc_path, "/usr/bin/solc-0.8");
    }
}
