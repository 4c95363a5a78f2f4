use error_stack::Report;

use super::{await_confirmation, CommandResult, Executor};
use crate::client::ReceiptSummary;
use crate::errors::{PlaybookError, PlaybookResult};
use crate::playbook_error;
use crate::spec::{CommandKind, TargetStep};
use crate::types::params::substitute_args;

#[derive(Debug)]
pub struct StepOutcome {
    pub command: String,
    pub results: Vec<CommandResult>,
    /// Receipt of a confirmed write step.
    pub receipt: Option<ReceiptSummary>,
}

/// Why a target stopped before its last step.
#[derive(Debug)]
pub struct Halt {
    pub step: usize,
    pub command: String,
    pub reason: Report<PlaybookError>,
}

#[derive(Debug)]
pub struct TargetOutcome {
    pub target: String,
    pub steps: Vec<StepOutcome>,
    pub halt: Option<Halt>,
}

impl TargetOutcome {
    pub fn results(&self) -> impl Iterator<Item = &CommandResult> {
        self.steps.iter().flat_map(|step| step.results.iter())
    }
}

impl Executor {
    /// Runs the steps of a target in order. `on_step` sees each step as soon as it is done.
    ///
    /// A write step that fails to submit or confirm stops the target, as does an
    /// unresolvable reference in any step.
    pub async fn run_target(
        &mut self,
        name: &str,
        args: &[String],
        mut on_step: impl FnMut(&StepOutcome),
    ) -> PlaybookResult<TargetOutcome> {
        let target = self.spec.targets.get(name).cloned().ok_or_else(|| {
            playbook_error!(PlaybookError::Validation, "no target named '{}'", name)
        })?;
        let mut outcome = TargetOutcome { target: name.to_string(), steps: vec![], halt: None };

        for (position, step) in target.steps.iter().enumerate() {
            self.ctx.try_log(|logger| {
                info!(logger, "target {}: step #{} runs {}", name, position, step.command)
            });
            let (step_outcome, halt) = self.run_step(step, args).await;
            on_step(&step_outcome);
            outcome.steps.push(step_outcome);
            if let Some(reason) = halt {
                self.ctx.try_log(|logger| {
                    error!(
                        logger,
                        "stopping target {} at step #{} ({}): {}",
                        name,
                        position,
                        step.command,
                        reason
                    )
                });
                outcome.halt = Some(Halt { step: position, command: step.command.clone(), reason });
                break;
            }
        }
        Ok(outcome)
    }

    async fn run_step(
        &mut self,
        step: &TargetStep,
        target_args: &[String],
    ) -> (StepOutcome, Option<Report<PlaybookError>>) {
        let mut outcome = StepOutcome { command: step.command.clone(), results: vec![], receipt: None };

        let args = match step_args(step, target_args) {
            Ok(args) => args,
            Err(reason) => {
                let summary = playbook_error!(
                    PlaybookError::Resolution,
                    "step {} could not resolve its arguments",
                    step.command
                );
                outcome.results.push(CommandResult::new(&step.command, Err(reason)));
                return (outcome, Some(summary));
            }
        };
        outcome.results = match self.run_command(&step.command, &args).await {
            Ok(results) => results,
            Err(e) => {
                let summary = Report::new(*e.current_context())
                    .attach_printable(format!("step {} could not run", step.command));
                outcome.results.push(CommandResult::new(&step.command, Err(e)));
                return (outcome, Some(summary));
            }
        };

        if step.kind != CommandKind::Write {
            let unresolved = outcome.results.iter().any(|r| {
                matches!(&r.result, Err(e) if e.current_context() == &PlaybookError::Resolution)
            });
            let halt = unresolved.then(|| {
                playbook_error!(
                    PlaybookError::Resolution,
                    "step {} could not resolve its parameters",
                    step.command
                )
            });
            return (outcome, halt);
        }

        let submitted = outcome.results.first().and_then(|r| r.result.as_ref().ok().and(r.tx_hash));
        let Some(hash) = submitted else {
            let kind = outcome
                .results
                .first()
                .and_then(|r| r.result.as_ref().err().map(|e| *e.current_context()))
                .unwrap_or(PlaybookError::Network);
            let summary = Report::new(kind)
                .attach_printable(format!("transaction of {} was not sent", step.command));
            return (outcome, Some(summary));
        };
        if step.deferred {
            self.ctx.try_log(|logger| info!(logger, "not waiting for deferred step {}", step.command));
            return (outcome, None);
        }

        self.ctx.try_log(|logger| {
            info!(
                logger,
                "awaiting transaction {:#x} of {} (timeout {:?})",
                hash,
                step.command,
                self.policy.timeout
            )
        });
        let cancel = self.cancel.clone();
        match await_confirmation(self.client.as_ref(), hash, &self.policy, cancel, &self.ctx).await {
            Ok(receipt) => {
                if let Some(deployed) = receipt.contract_address {
                    self.confirm_deployment(&step.command, deployed);
                }
                outcome.receipt = Some(receipt);
                (outcome, None)
            }
            Err(e) => (outcome, Some(e)),
        }
    }
}

/// Arguments a step passes to its command.
fn step_args(step: &TargetStep, target_args: &[String]) -> PlaybookResult<Vec<String>> {
    let Some(templates) = &step.args else {
        return Ok(target_args.to_vec());
    };
    templates
        .iter()
        .map(|template| {
            substitute_args(template, target_args).map_err(|index| {
                playbook_error!(
                    PlaybookError::Resolution,
                    "insufficient arguments: step {} needs ${} but {} were supplied",
                    step.command,
                    index,
                    target_args.len()
                )
            })
        })
        .collect()
}
