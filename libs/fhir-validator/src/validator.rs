//! Reusable validator and per-call execution.

use crate::cancel::CancellationToken;
use crate::constraints::{ConstraintEvaluator, ExpressionCache};
use crate::issue::{IssuePool, IssueSeverity, ValidationIssue, ValidationOutcome, ValidationStats};
use crate::messages::MessageId;
use crate::plan::{Step, ValidationPlan};
use crate::steps::primitive::RegexCache;
use crate::steps::{self, StepContext};
use crate::terminology::TerminologyProvider;
use crate::walker::{self, WalkControl};
use crate::{ConfigError, ValidatorConfig};
use funke_models::StructureDefinition;
use funke_registry::StructureRegistry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Reusable validator: owns the plan, the registry, and the optional
/// collaborators. Heavy initialization happens once; each `validate()`
/// call creates a short-lived [`ValidationRun`].
pub struct Validator {
    plan: ValidationPlan,
    registry: Arc<StructureRegistry>,
    terminology: Option<Arc<dyn TerminologyProvider>>,
    evaluator: Option<Arc<dyn ConstraintEvaluator>>,
    expressions: ExpressionCache,
    regexes: RegexCache,
    pool: IssuePool,
}

impl Validator {
    pub fn new(plan: ValidationPlan, registry: Arc<StructureRegistry>) -> Self {
        Self {
            plan,
            registry,
            terminology: None,
            evaluator: None,
            expressions: ExpressionCache::new(),
            regexes: RegexCache::new(),
            pool: IssuePool::new(16),
        }
    }

    pub fn from_config(
        config: &ValidatorConfig,
        registry: Arc<StructureRegistry>,
    ) -> Result<Self, ConfigError> {
        let mut validator = Self::new(config.compile()?, registry);
        validator.expressions = ExpressionCache::with_capacity(config.caches.expression);
        Ok(validator)
    }

    pub fn with_terminology(mut self, provider: Arc<dyn TerminologyProvider>) -> Self {
        self.terminology = Some(provider);
        self
    }

    pub fn with_constraint_evaluator(mut self, evaluator: Arc<dyn ConstraintEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn plan(&self) -> &ValidationPlan {
        &self.plan
    }

    pub fn registry(&self) -> &Arc<StructureRegistry> {
        &self.registry
    }

    /// Validate raw bytes; a parse failure yields a single structural
    /// error and no further phases run.
    pub fn validate_bytes(&self, bytes: &[u8]) -> ValidationOutcome {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(resource) => self.validate(&resource),
            Err(err) => {
                let mut issues = self.pool.acquire();
                issues.push(
                    ValidationIssue::new(MessageId::ParseError, &[("detail", &err.to_string())])
                        .at("Resource"),
                );
                ValidationOutcome {
                    resource_type: None,
                    valid: false,
                    issues,
                    stats: None,
                }
            }
        }
    }

    pub fn validate(&self, resource: &Value) -> ValidationOutcome {
        self.validate_with_cancellation(resource, &CancellationToken::new())
    }

    pub fn validate_with_cancellation(
        &self,
        resource: &Value,
        cancel: &CancellationToken,
    ) -> ValidationOutcome {
        ValidationRun {
            validator: self,
            cancel,
            issues: self.pool.acquire(),
            stats: ValidationStats::default(),
        }
        .execute(resource)
    }

    pub fn validate_batch(&self, resources: &[Value]) -> Vec<ValidationOutcome> {
        resources.iter().map(|r| self.validate(r)).collect()
    }

    /// Return an outcome's issue buffer to the pool. The buffer is
    /// cleared; callers must not retain references into it.
    pub fn recycle(&self, outcome: ValidationOutcome) {
        self.pool.release(outcome.issues);
    }
}

/// Short-lived execution over one resource.
struct ValidationRun<'a> {
    validator: &'a Validator,
    cancel: &'a CancellationToken,
    issues: Vec<ValidationIssue>,
    stats: ValidationStats,
}

impl ValidationRun<'_> {
    fn execute(mut self, resource: &Value) -> ValidationOutcome {
        let started = Instant::now();
        let registry = self.validator.registry.clone();

        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .map(String::from);

        let Some(root_type) = resource_type.as_deref() else {
            self.issues
                .push(ValidationIssue::new(MessageId::ResourceTypeMissing, &[]).at("Resource"));
            return self.finish(None, started);
        };

        // The walker resolves every sub-resource through the base type
        // map, the root included; an unknown root type ends the run.
        if registry.get_by_type(root_type).is_none() {
            self.issues.push(
                ValidationIssue::new(MessageId::ResourceTypeUnknown, &[("type", root_type)])
                    .at(root_type),
            );
            return self.finish(resource_type, started);
        }

        // The root resource validates against the override, else each
        // declared profile, else the base definition for its type.
        let root_profiles = match self.select_root_profiles(resource, root_type) {
            Some(profiles) => profiles,
            None => return self.finish(resource_type, started),
        };

        let mut at_root = true;
        walker::walk(&registry, resource, root_type, &mut |visit| {
            let profiles: Vec<Arc<StructureDefinition>> = if at_root {
                at_root = false;
                root_profiles.clone()
            } else {
                self.select_nested_profiles(visit.data, &visit.sd)
            };

            self.stats.resources_visited += 1;
            for sd in &profiles {
                self.stats.profiles_applied += 1;
                self.run_phases(visit.data, sd, &visit.path);
                if self.at_capacity() {
                    return WalkControl::Stop;
                }
            }
            if self.cancel.is_cancelled() {
                return WalkControl::Stop;
            }
            WalkControl::Continue
        });

        if self.cancel.is_cancelled() {
            self.issues
                .push(ValidationIssue::new(MessageId::Cancelled, &[]).at(root_type));
        }

        self.finish(resource_type, started)
    }

    /// Profile set for the root resource. `None` means validation cannot
    /// proceed (the issue is already recorded).
    fn select_root_profiles(
        &mut self,
        resource: &Value,
        root_type: &str,
    ) -> Option<Vec<Arc<StructureDefinition>>> {
        let plan = &self.validator.plan;
        let registry = &self.validator.registry;

        if let Some(url) = plan.profile_override.as_deref() {
            return match registry.get(url) {
                Some(sd) => Some(vec![sd.clone()]),
                None => {
                    self.issues.push(
                        ValidationIssue::new(MessageId::ProfileNotFound, &[("profile", url)])
                            .at(root_type),
                    );
                    None
                }
            };
        }

        let mut profiles = Vec::new();
        if plan.validate_meta_profiles {
            for url in walker::declared_profiles(resource) {
                match registry.get(url) {
                    Some(sd) => profiles.push(sd.clone()),
                    None => {
                        self.issues.push(
                            ValidationIssue::new(MessageId::ProfileNotFound, &[("profile", url)])
                                .at(root_type),
                        );
                    }
                }
            }
        }
        if !profiles.is_empty() {
            return Some(profiles);
        }

        if plan.require_profile {
            self.issues.push(
                ValidationIssue::new(
                    MessageId::ProfileNotFound,
                    &[("profile", "<declared profile required>")],
                )
                .at(root_type),
            );
            return None;
        }

        match registry.get_by_type(root_type) {
            Some(sd) => Some(vec![sd.clone()]),
            None => {
                self.issues.push(
                    ValidationIssue::new(MessageId::ResourceTypeUnknown, &[("type", root_type)])
                        .at(root_type),
                );
                None
            }
        }
    }

    /// Profile set for a nested resource: declared profiles, else its
    /// base definition (which the walker already resolved).
    fn select_nested_profiles(
        &mut self,
        resource: &Value,
        base: &Arc<StructureDefinition>,
    ) -> Vec<Arc<StructureDefinition>> {
        let plan = &self.validator.plan;
        let registry = &self.validator.registry;

        if plan.validate_meta_profiles {
            let declared: Vec<Arc<StructureDefinition>> = walker::declared_profiles(resource)
                .filter_map(|url| registry.get(url).cloned())
                .collect();
            if !declared.is_empty() {
                return declared;
            }
        }
        vec![base.clone()]
    }

    fn run_phases(&mut self, data: &Value, sd: &Arc<StructureDefinition>, base_path: &str) {
        let validator = self.validator;
        let cancel = self.cancel;

        if validator.plan.parallel_phases && validator.plan.worker_count > 1 {
            // Phases only read the registry and the instance; give each
            // its own buffer and merge afterwards. The phase count is
            // small, so one thread per phase stays within any sane
            // worker budget.
            let mut buffers: Vec<(usize, Vec<ValidationIssue>)> = std::thread::scope(|scope| {
                let handles: Vec<_> = validator
                    .plan
                    .steps
                    .iter()
                    .enumerate()
                    .map(|(i, step)| {
                        scope.spawn(move || {
                            let mut buffer = Vec::new();
                            run_phase(validator, cancel, step, data, sd, base_path, &mut buffer);
                            (i, buffer)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("validation phase panicked"))
                    .collect()
            });
            buffers.sort_by_key(|(i, _)| *i);
            for (_, buffer) in buffers {
                self.issues.extend(buffer);
                if self.at_capacity() {
                    break;
                }
            }
        } else {
            for step in &validator.plan.steps {
                let mut buffer = Vec::new();
                run_phase(validator, cancel, step, data, sd, base_path, &mut buffer);
                self.issues.extend(buffer);
                if self.at_capacity() {
                    break;
                }
            }
        }
    }

    fn at_capacity(&self) -> bool {
        let max = self.validator.plan.max_issues;
        max > 0 && self.issues.len() >= max
    }
}

/// Execute one phase into its own buffer. Free of the run's mutable
/// state so parallel fan-out can share it across threads.
fn run_phase(
    validator: &Validator,
    cancel: &CancellationToken,
    step: &Step,
    data: &Value,
    sd: &Arc<StructureDefinition>,
    base_path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let deadline = validator
        .plan
        .phase_timeout
        .map(|timeout| Instant::now() + timeout);
    let ctx = StepContext {
        registry: &validator.registry,
        regexes: &validator.regexes,
        terminology: validator.terminology.as_deref(),
        evaluator: validator.evaluator.as_deref(),
        expressions: &validator.expressions,
        cancel,
        deadline,
    };

    match step {
        Step::Structure(plan) => steps::structure::run(&ctx, data, sd, base_path, plan, issues),
        Step::Cardinality => steps::cardinality::run(&ctx, data, sd, base_path, issues),
        Step::PrimitiveType => steps::primitive::run(&ctx, data, sd, base_path, issues),
        Step::FixedPattern => steps::fixed_pattern::run(&ctx, data, sd, base_path, issues),
        Step::Slicing => steps::slicing::run(&ctx, data, sd, base_path, issues),
        Step::Extension => steps::extension::run(&ctx, data, sd, base_path, issues),
        Step::Binding => steps::binding::run(&ctx, data, sd, base_path, issues),
        Step::Constraints => steps::constraints::run(&ctx, data, sd, base_path, issues),
    }

    // An elapsed deadline means the phase bailed out early.
    if deadline.is_some_and(|d| Instant::now() >= d) {
        issues.push(
            ValidationIssue::new(MessageId::PhaseTimeout, &[("phase", step.name())]).at(base_path),
        );
    }
}

impl ValidationRun<'_> {
    fn finish(mut self, resource_type: Option<String>, started: Instant) -> ValidationOutcome {
        let plan = &self.validator.plan;

        if plan.max_issues > 0 && self.issues.len() > plan.max_issues {
            self.issues.truncate(plan.max_issues);
        }
        if plan.strict_mode {
            for issue in &mut self.issues {
                if issue.severity == IssueSeverity::Warning {
                    issue.severity = IssueSeverity::Error;
                }
            }
        }

        self.stats.duration = started.elapsed();
        let valid = !self.issues.iter().any(ValidationIssue::is_error);
        ValidationOutcome {
            resource_type,
            valid,
            issues: self.issues,
            stats: Some(self.stats),
        }
    }
}
