use super::commands::CommandKind;
use crate::errors::{PlaybookError, PlaybookResult};
use crate::manifest::TargetStepDecl;
use crate::playbook_error;
use crate::types::params::arg_indices;

const DEFERRED_MARKER: char = '&';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStep {
    pub command: String,
    pub kind: CommandKind,
    /// Skip waiting for the transaction receipt.
    pub deferred: bool,
    /// Step arguments; `$N` tokens refer to the target's own arguments.
    /// `None` passes the target's arguments through unchanged.
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub steps: Vec<TargetStep>,
}

impl Target {
    pub fn validate(
        name: &str,
        steps: &[TargetStepDecl],
        lookup: impl Fn(&str) -> Option<CommandKind>,
    ) -> PlaybookResult<Target> {
        let mut validated = Vec::with_capacity(steps.len());
        for (position, step) in steps.iter().enumerate() {
            let (command, deferred, args) = match step {
                TargetStepDecl::Short(text) => {
                    let text = text.trim();
                    match text.strip_suffix(DEFERRED_MARKER) {
                        Some(command) => (command.trim().to_string(), true, None),
                        None => (text.to_string(), false, None),
                    }
                }
                TargetStepDecl::Detailed { command, args, deferred } => (
                    command.trim().to_string(),
                    *deferred,
                    Some(args.iter().map(|a| a.to_string()).collect::<Vec<_>>()),
                ),
            };
            let kind = lookup(&command).ok_or_else(|| {
                playbook_error!(
                    PlaybookError::Validation,
                    "step #{} references unknown command '{}'",
                    position,
                    command
                )
            })?;
            if deferred && kind != CommandKind::Write {
                return Err(playbook_error!(
                    PlaybookError::Validation,
                    "step #{} defers {} command '{}', only write commands can be deferred",
                    position,
                    kind,
                    command
                ));
            }
            validated.push(TargetStep { command, kind, deferred, args });
        }
        if validated.is_empty() {
            return Err(playbook_error!(PlaybookError::Validation, "target '{}' has no steps", name));
        }
        Ok(Target { name: name.to_string(), steps: validated })
    }

    /// Highest target argument index used plus one.
    pub fn arg_count(&self, command_indices: impl Fn(&str) -> Vec<usize>) -> usize {
        self.steps
            .iter()
            .flat_map(|step| match &step.args {
                Some(args) => args.iter().flat_map(|a| arg_indices(a)).collect::<Vec<_>>(),
                None => command_indices(&step.command),
            })
            .max()
            .map_or(0, |max| max + 1)
    }
}
