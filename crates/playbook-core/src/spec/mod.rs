//! The validated playbook.
//!
//! Validation runs in a fixed order: config, inventory, wallets, contracts,
//! then call, read and write commands, then targets. Every stage only sees
//! what earlier stages produced, and nothing touches the network except the
//! live node check on the inventory.

pub mod commands;
pub mod config;
pub mod contracts;
pub mod inventory;
pub mod registry;
pub mod targets;
pub mod wallets;

use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::client::{Compiler, EthClient, KeyCache, NodeConnector};
use crate::errors::{PlaybookError, PlaybookErrorExt, PlaybookResult};
use crate::manifest::PlaybookFile;
use crate::playbook_error;
use crate::Context;

pub use commands::{CallCommand, CommandKind, ReadCommand, Recipient, WriteCommand};
pub use config::Config;
pub use contracts::{ContractInstance, ContractType, Contracts, InstanceId};
pub use registry::NameRegistry;
pub use targets::{Target, TargetStep};
pub use wallets::{StickySelector, WalletRecord, Wallets};

pub const DEFAULT_NODE_GROUP: &str = "genesis";

/// What the operator asked to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Command or target name. `None` only validates the playbook.
    pub name: Option<String>,
    pub args: Vec<String>,
    pub node_group: String,
}

impl Invocation {
    pub fn validate_only() -> Invocation {
        Invocation { name: None, args: vec![], node_group: DEFAULT_NODE_GROUP.to_string() }
    }
}

pub struct ValidationContext<'a> {
    pub invocation: &'a Invocation,
    /// Directory relative paths in the playbook are resolved against.
    pub base_dir: &'a Path,
    pub key_cache: &'a dyn KeyCache,
    pub compiler: Option<&'a dyn Compiler>,
    pub connector: &'a dyn NodeConnector,
    pub ctx: &'a Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Command(CommandKind),
    Target,
}

/// One runnable name, for listings.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub arg_count: usize,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Spec {
    pub config: Config,
    /// URL of the node selected during validation.
    pub node: Option<String>,
    pub wallets: Wallets,
    pub contracts: Contracts,
    pub call_cmds: IndexMap<String, CallCommand>,
    pub read_cmds: IndexMap<String, ReadCommand>,
    pub write_cmds: IndexMap<String, WriteCommand>,
    pub targets: IndexMap<String, Target>,
}

pub struct Validated {
    pub spec: Spec,
    /// Client for the selected node; `None` when nothing is going to run.
    pub client: Option<Arc<dyn EthClient>>,
}

impl Spec {
    pub async fn validate(
        file: &PlaybookFile,
        vctx: &ValidationContext<'_>,
    ) -> PlaybookResult<Validated> {
        let ctx = vctx.ctx;
        let args = &vctx.invocation.args;
        let mut spec = Spec::default();

        spec.config = Config::from_section(file.config.as_ref()).with_site("CONFIG", "CONFIG")?;

        let mut client = None;
        if vctx.invocation.name.is_some() {
            let node = inventory::select_live_node(
                file.inventory.as_ref(),
                &vctx.invocation.node_group,
                vctx.connector,
                ctx,
            )
            .await?;
            spec.node = Some(node.url);
            client = Some(node.client);
        }

        if file.read.is_none() && file.write.is_none() && file.call.is_none() {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "playbook must contain at least one of READ, WRITE or CALL sections"
            ));
        }
        if file.wallets.is_none() && (file.write.is_some() || file.call.is_some()) {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "playbook must contain the WALLETS section if WRITE or CALL sections are provided"
            ));
        }

        spec.wallets = Wallets::validate(file.wallets.as_ref(), vctx.base_dir, vctx.key_cache, ctx)?;
        spec.contracts =
            Contracts::validate(file.contracts.as_ref(), vctx.base_dir, vctx.compiler, ctx)?;

        let mut registry = NameRegistry::default();
        let mut sticky = StickySelector::default();

        for (name, decl) in file.call.iter().flatten() {
            registry.claim("CALL", name)?;
            let command = CallCommand::validate(name, decl, &spec.wallets, args)
                .with_site("CALL", name.clone())?;
            spec.call_cmds.insert(name.clone(), command);
        }
        for (name, decl) in file.read.iter().flatten() {
            registry.claim("READ", name)?;
            let command = ReadCommand::validate(name, decl, &spec.wallets, &mut spec.contracts, args)
                .with_site("READ", name.clone())?;
            spec.read_cmds.insert(name.clone(), command);
        }
        for (name, decl) in file.write.iter().flatten() {
            registry.claim("WRITE", name)?;
            let command = WriteCommand::validate(
                name,
                decl,
                &spec.wallets,
                &mut spec.contracts,
                &mut sticky,
                args,
            )
            .with_site("WRITE", name.clone())?;
            ctx.try_log(|logger| {
                info!(logger, "write command {} is sent by wallet {}", name, command.wallet)
            });
            spec.write_cmds.insert(name.clone(), command);
        }
        for (name, steps) in file.targets.iter().flatten() {
            registry.claim("TARGETS", name)?;
            let target = Target::validate(name, steps, |command| spec.command_kind(command))
                .with_site("TARGETS", name.clone())?;
            spec.targets.insert(name.clone(), target);
        }

        if let Some(name) = &vctx.invocation.name {
            if !registry.contains(name) {
                return Err(playbook_error!(
                    PlaybookError::Validation,
                    "no command or target named '{}'",
                    name
                ));
            }
        }
        Ok(Validated { spec, client })
    }

    pub fn command_kind(&self, name: &str) -> Option<CommandKind> {
        if self.call_cmds.contains_key(name) {
            Some(CommandKind::Call)
        } else if self.read_cmds.contains_key(name) {
            Some(CommandKind::Read)
        } else if self.write_cmds.contains_key(name) {
            Some(CommandKind::Write)
        } else {
            None
        }
    }

    /// Argument indices a command references.
    pub fn command_arg_indices(&self, name: &str) -> Vec<usize> {
        if let Some(command) = self.call_cmds.get(name) {
            command.arg_indices()
        } else if let Some(command) = self.read_cmds.get(name) {
            command.arg_indices()
        } else if let Some(command) = self.write_cmds.get(name) {
            command.arg_indices()
        } else {
            vec![]
        }
    }

    /// Number of positional arguments a command or target expects.
    pub fn arg_count(&self, name: &str) -> Option<usize> {
        if let Some(target) = self.targets.get(name) {
            return Some(target.arg_count(|command| self.command_arg_indices(command)));
        }
        self.command_kind(name)?;
        let indices: BTreeSet<usize> = self.command_arg_indices(name).into_iter().collect();
        Some(indices.iter().next_back().map_or(0, |max| max + 1))
    }

    pub fn entries(&self) -> Vec<Entry> {
        let mut entries = vec![];
        let mut push = |name: &String, kind: EntryKind, description: &Option<String>| {
            entries.push(Entry {
                name: name.clone(),
                arg_count: self.arg_count(name).unwrap_or_default(),
                kind,
                description: description.clone(),
            })
        };
        for (name, command) in self.call_cmds.iter() {
            push(name, EntryKind::Command(CommandKind::Call), &command.description);
        }
        for (name, command) in self.read_cmds.iter() {
            push(name, EntryKind::Command(CommandKind::Read), &command.description);
        }
        for (name, command) in self.write_cmds.iter() {
            push(name, EntryKind::Command(CommandKind::Write), &command.description);
        }
        for name in self.targets.keys() {
            push(name, EntryKind::Target, &None);
        }
        entries
    }
}
