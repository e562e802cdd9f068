use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{error, info, warn};

use super::{CompiledStep, StepFlowController};
use crate::content::ParameterValue;
use crate::helper::{BoundParameter, BoundValue};
use crate::host::FlowHost;
use crate::target::{DuplicateTarget, TargetHandle, TargetRegistry};

/// Where an unresolved reference was authored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Target,
    Operation,
    Parameter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub step_index: usize,
    pub step_id: String,
    pub kind: ReferenceKind,
    pub reference: String,
}

/// Authoring defects found while compiling. None of them abort compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub step_count: usize,
    pub target_count: usize,
    /// Step ids seen more than once; the first occurrence is indexed
    pub duplicate_steps: Vec<String>,
    pub duplicate_targets: Vec<DuplicateTarget>,
    pub unresolved: Vec<UnresolvedReference>,
    /// (step index, helper name) pairs with no registered factory
    pub unknown_helpers: Vec<(usize, String)>,
    /// Disabled ids that match no step
    pub unknown_disabled: Vec<String>,
    /// Step indices whose elapse time is not a representable duration;
    /// those steps hold for zero seconds
    pub invalid_holds: Vec<usize>,
}

impl CompileReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_steps.is_empty()
            && self.duplicate_targets.is_empty()
            && self.unresolved.is_empty()
            && self.unknown_helpers.is_empty()
            && self.unknown_disabled.is_empty()
            && self.invalid_holds.is_empty()
    }

    pub fn problem_count(&self) -> usize {
        self.duplicate_steps.len()
            + self.duplicate_targets.len()
            + self.unresolved.len()
            + self.unknown_helpers.len()
            + self.unknown_disabled.len()
            + self.invalid_holds.len()
    }
}

impl<H: FlowHost> StepFlowController<H> {
    /// Compile with every step runtime-enabled
    pub fn compile(&mut self) -> CompileReport {
        self.compile_with_disabled(std::iter::empty::<&str>())
    }

    /// Scan the scene, rebuild index tables and resolve every reference.
    ///
    /// Steps named in `disabled_ids` are runtime-disabled for this run. A
    /// running flow is ended first.
    pub fn compile_with_disabled<I, S>(&mut self, disabled_ids: I) -> CompileReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.running {
            warn!(target: "compile", "Compiling while running; ending the current flow");
            self.end();
        }
        self.scheduler.cancel_active();
        self.skip_sequence = None;
        self.helper = None;
        self.current = None;
        self.running = false;
        self.paused = false;
        self.executing = false;

        let mut report = CompileReport {
            duplicate_targets: self.targets.compile(&self.host),
            target_count: self.targets.len(),
            step_count: self.content.steps.len(),
            ..CompileReport::default()
        };

        self.index_by_id.clear();
        for (index, step) in self.content.steps.iter().enumerate() {
            if let Some(first) = self.index_by_id.get(&step.id) {
                warn!(target: "compile",
                    "Duplicate step id '{}' at index {} (first defined at index {})",
                    step.id, index, first
                );
                report.duplicate_steps.push(step.id.clone());
                continue;
            }
            self.index_by_id.insert(step.id.clone(), index);
        }

        let disabled: HashSet<String> = disabled_ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();
        for id in &disabled {
            if !self.index_by_id.contains_key(id) {
                warn!(target: "compile", "Disabled step id '{}' matches no step", id);
                report.unknown_disabled.push(id.clone());
            }
        }
        report.unknown_disabled.sort();

        let mut steps = Vec::with_capacity(self.content.steps.len());
        for (index, step) in self.content.steps.iter().enumerate() {
            let mut resolver = Resolver {
                targets: &self.targets,
                report: &mut report,
                step_index: index,
                step_id: &step.id,
                step_name: step.display_name(),
            };

            let target = step
                .target
                .as_deref()
                .and_then(|id| resolver.resolve(id, ReferenceKind::Target));
            let operations = step
                .operations
                .iter()
                .map(|id| resolver.resolve(id, ReferenceKind::Operation))
                .collect();
            let parameters = step
                .parameters
                .iter()
                .map(|param| BoundParameter {
                    name: param.name.clone(),
                    value: match &param.value {
                        ParameterValue::Bool(value) => BoundValue::Bool(*value),
                        ParameterValue::Int(value) => BoundValue::Int(*value),
                        ParameterValue::Float(value) => BoundValue::Float(*value),
                        ParameterValue::String(value) => BoundValue::String(value.clone()),
                        ParameterValue::Target(id) => {
                            BoundValue::Target(resolver.resolve(id, ReferenceKind::Parameter))
                        }
                    },
                })
                .collect();

            if let Some(helper) = step.helper_name() {
                if !self.helpers.contains(helper) {
                    error!(target: "compile",
                        "Step {} '{}': helper type '{}' is not registered",
                        index,
                        step.display_name(),
                        helper
                    );
                    report.unknown_helpers.push((index, helper.to_string()));
                }
            }

            let hold = match Duration::try_from_secs_f32(step.hold_seconds()) {
                Ok(hold) => hold,
                Err(_) => {
                    error!(target: "compile",
                        "Step {} '{}': elapse time {} is out of range; holding 0s",
                        index,
                        step.display_name(),
                        step.elapse_time
                    );
                    report.invalid_holds.push(index);
                    Duration::ZERO
                }
            };

            steps.push(CompiledStep {
                target,
                operations,
                parameters,
                hold,
                runtime_enabled: !disabled.contains(&step.id),
            });
        }
        self.steps = steps;

        self.seed_authored_order();
        self.compiled = true;

        if report.is_clean() {
            info!(target: "compile",
                "Compiled {} step(s) against {} target(s)",
                report.step_count, report.target_count
            );
        } else {
            warn!(target: "compile",
                "Compiled {} step(s) against {} target(s) with {} problem(s)",
                report.step_count,
                report.target_count,
                report.problem_count()
            );
        }
        report
    }

    /// Authored `next` links; runtime edges added with `add_custom_order`
    /// take precedence.
    fn seed_authored_order(&mut self) {
        let authored: HashMap<String, String> = self
            .content
            .steps
            .iter()
            .filter_map(|step| step.next.clone().map(|next| (step.id.clone(), next)))
            .collect();

        for (from, to) in authored {
            if !self.index_by_id.contains_key(&to) {
                warn!(target: "compile", "Step '{}' links to unknown step '{}'", from, to);
                continue;
            }
            self.custom_order.entry(from).or_insert(to);
        }
    }
}

struct Resolver<'a> {
    targets: &'a TargetRegistry,
    report: &'a mut CompileReport,
    step_index: usize,
    step_id: &'a str,
    step_name: &'a str,
}

impl Resolver<'_> {
    fn resolve(&mut self, id: &str, kind: ReferenceKind) -> Option<TargetHandle> {
        let handle = self.targets.resolve(id);
        if handle.is_none() {
            error!(target: "compile",
                "Step {} '{}': unresolved {:?} reference '{}'",
                self.step_index, self.step_name, kind, id
            );
            self.report.unresolved.push(UnresolvedReference {
                step_index: self.step_index,
                step_id: self.step_id.to_string(),
                kind,
                reference: id.to_string(),
            });
        }
        handle
    }
}
