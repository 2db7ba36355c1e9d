//! Plan/diff engine: turns a base snapshot and a desired graph into an
//! ordered, dependency-linked set of steps.
//!
//! Every step lists the steps that must succeed before it may start:
//!
//! - a step producing a resource waits for the steps producing its parent and
//!   its dependencies (for a replaced dependency, the create half);
//! - a step deleting a resource waits for every step whose old state still
//!   references it, so dependents are updated or torn down first;
//! - the halves of a replacement are ordered by their [`ReplaceStrategy`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use futures::stream::{self, StreamExt};
use keel_core::{ResourceState, Snapshot, Urn, UrnIndex, property::changed_keys};
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{EngineError, PlanError, ProviderError};
use crate::goal::{DesiredGraph, ResourceGoal};
use crate::provider::{DiffKind, DiffResult, resolve_reference};
use crate::step::{ReplaceStrategy, Step, StepId, StepOp};
use crate::summary::ChangeCounts;

/// What kind of run a plan is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Plan and preview an update, never apply it.
    Preview,
    /// Converge the stack to the desired graph.
    Update,
    /// Re-read every resource from its provider; changes only the snapshot.
    Refresh,
    /// Delete every resource in the stack.
    Destroy,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preview => "preview",
            Self::Update => "update",
            Self::Refresh => "refresh",
            Self::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// A resource whose diff failed locally. It and its descendants were left
/// out of the plan and keep their old state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanDiagnostic {
    pub urn: Urn,
    pub error: ProviderError,
    /// Every resource left out because of this failure, the failed one first.
    pub excluded: Vec<Urn>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub kind: UpdateKind,
    /// Producing steps in registration order, then deletes with dependents
    /// before their dependencies.
    pub steps: Vec<Step>,
    pub diagnostics: Vec<PlanDiagnostic>,
}

impl Plan {
    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id.0)
    }

    /// Counts of what the plan intends to do, with local diff failures
    /// counted as failed.
    pub fn planned_changes(&self) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        for step in &self.steps {
            counts.record(step.op);
        }
        counts.failed = self.diagnostics.len();
        counts
    }

    pub fn has_changes(&self) -> bool {
        self.planned_changes().has_changes()
    }

    /// Reverse edges: for each step, the steps waiting on it.
    pub fn dependents(&self) -> Vec<Vec<StepId>> {
        dependents_of(&self.steps)
    }

    /// The operations this plan commits to, for constraining a later run.
    pub fn expectations(&self) -> PlanExpectations {
        let mut resources: BTreeMap<Urn, Vec<StepOp>> = BTreeMap::new();
        for step in &self.steps {
            resources.entry(step.urn.clone()).or_default().push(step.op);
        }
        PlanExpectations { resources }
    }
}

/// Operations a previously computed plan committed to, per resource.
///
/// Checking a new plan against it consumes the matched operations, so keep a
/// clone if the same expectations must constrain more than one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ExpectationsDoc")]
pub struct PlanExpectations {
    resources: BTreeMap<Urn, Vec<StepOp>>,
}

/// Wire shape of [`PlanExpectations`], checked before it is accepted.
#[derive(Deserialize)]
struct ExpectationsDoc {
    resources: BTreeMap<Urn, Vec<StepOp>>,
}

impl TryFrom<ExpectationsDoc> for PlanExpectations {
    type Error = String;

    fn try_from(doc: ExpectationsDoc) -> Result<Self, Self::Error> {
        if let Some((urn, _)) = doc.resources.iter().find(|(_, ops)| ops.is_empty()) {
            return Err(format!("no operations expected for {urn}"));
        }
        Ok(Self {
            resources: doc.resources,
        })
    }
}

impl PlanExpectations {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Number of operations not yet matched.
    pub fn remaining(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    /// Match `step` against the expected operations and consume it.
    pub fn check(&mut self, step: &Step) -> Result<(), PlanError> {
        let Some(ops) = self.resources.get_mut(&step.urn) else {
            return Err(PlanError::Divergence {
                urn: step.urn.clone(),
                expected: "no operation".to_string(),
                actual: step.op,
            });
        };
        let Some(pos) = ops.iter().position(|op| *op == step.op) else {
            let expected = ops
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(PlanError::Divergence {
                urn: step.urn.clone(),
                expected,
                actual: step.op,
            });
        };
        ops.remove(pos);
        if ops.is_empty() {
            self.resources.remove(&step.urn);
        }
        Ok(())
    }

    /// Fail if any expected operation was never matched.
    pub fn finish(&self) -> Result<(), PlanError> {
        let leftover = self
            .resources
            .iter()
            .find_map(|(urn, ops)| ops.first().map(|op| (urn, *op)));
        match leftover {
            Some((urn, expected)) => Err(PlanError::MissingPlannedStep {
                urn: urn.clone(),
                expected,
            }),
            None => Ok(()),
        }
    }
}

/// Compute the plan for converging `base` to `desired`.
///
/// `base` is integrity-checked first; corruption aborts planning. When
/// `expectations` are given, every computed step must match one of them and
/// none may be left over.
pub async fn plan(
    ctx: &RunContext,
    kind: UpdateKind,
    base: &Snapshot,
    desired: &DesiredGraph,
    expectations: Option<&mut PlanExpectations>,
) -> Result<Plan, EngineError> {
    base.verify_integrity()?;

    let (steps, diagnostics) = match kind {
        UpdateKind::Refresh => (plan_refresh(base), Vec::new()),
        UpdateKind::Destroy => (plan_deletes(base, &HashSet::new())?, Vec::new()),
        UpdateKind::Preview | UpdateKind::Update => plan_update(ctx, base, desired).await?,
    };
    let steps = link(steps)?;

    if let Some(expectations) = expectations {
        for step in &steps {
            expectations.check(step)?;
        }
        expectations.finish()?;
    }

    let plan = Plan {
        kind,
        steps,
        diagnostics,
    };
    let counts = plan.planned_changes();
    tracing::info!(
        kind = %kind,
        steps = plan.steps.len(),
        creates = counts.created,
        updates = counts.updated,
        replaces = counts.replaced,
        deletes = counts.deleted,
        failed = counts.failed,
        "plan computed"
    );
    Ok(plan)
}

async fn plan_update(
    ctx: &RunContext,
    base: &Snapshot,
    desired: &DesiredGraph,
) -> Result<(Vec<Step>, Vec<PlanDiagnostic>), PlanError> {
    let goals = validate(desired)?;
    let base_index = base.index();
    let old_live = |urn: &Urn| {
        base_index
            .position(urn)
            .and_then(|pos| base.resources.get(pos))
    };
    let awaiting_successor: HashMap<&Urn, &ResourceState> = base
        .resources
        .iter()
        .filter(|r| r.pending_replacement)
        .map(|r| (&r.urn, r))
        .collect();

    let mut news = Vec::with_capacity(goals.len());
    for (urn, goal) in &goals {
        let provider = if goal.custom {
            let reference = resolve_reference(goal.provider.as_deref(), &goal.type_token);
            if ctx.providers.get(&reference).is_none() {
                return Err(PlanError::UnknownProvider {
                    urn: urn.clone(),
                    reference,
                });
            }
            Some(reference)
        } else {
            None
        };
        news.push(desired_state(urn, goal, provider));
    }

    // Diff every resource that has a live predecessor. Calls run
    // concurrently; `buffered` keeps results in registration order.
    let diffs: Vec<Option<Result<DiffResult, ProviderError>>> =
        stream::iter(goals.iter().zip(&news).map(|((urn, goal), new)| {
            let old = old_live(urn);
            async move {
                match old {
                    Some(old) if goal.read_id.is_none() => Some(diff_resource(ctx, old, new).await),
                    _ => None,
                }
            }
        }))
        .buffered(ctx.config.parallel.max(1))
        .collect()
        .await;

    let news_index = UrnIndex::build_all(&news);
    let mut excluded: HashSet<Urn> = HashSet::new();
    let mut diagnostics = Vec::new();
    for ((urn, _), diff) in goals.iter().zip(&diffs) {
        let Some(Err(err)) = diff else {
            continue;
        };
        if excluded.contains(urn) {
            continue;
        }
        let subtree = subtree_of(&news, &news_index, urn);
        let members: HashSet<&Urn> = subtree.iter().collect();
        let required_downstream = goals.iter().any(|(other, goal)| {
            !members.contains(other) && goal.dependencies.iter().any(|d| members.contains(d))
        });
        if required_downstream {
            return Err(PlanError::DiffFailed {
                urn: urn.clone(),
                source: err.clone(),
            });
        }
        tracing::warn!(
            urn = %urn,
            error = %err,
            excluded = subtree.len(),
            "diff failed, leaving subtree out of the plan"
        );
        diagnostics.push(PlanDiagnostic {
            urn: urn.clone(),
            error: err.clone(),
            excluded: subtree.clone(),
        });
        excluded.extend(subtree);
    }

    let mut steps = Vec::new();
    for (((urn, goal), new), diff) in goals.iter().zip(news).zip(diffs) {
        if excluded.contains(urn) {
            continue;
        }
        let old = old_live(urn);

        if let Some(id) = &goal.read_id {
            let mut new = new;
            new.id = id.clone();
            new.external = true;
            steps.push(with_provider(
                Step::new(StepOp::Read, urn.clone(), old.cloned(), Some(new.clone())),
                new.provider,
            ));
            continue;
        }

        let Some(old) = old else {
            let predecessor = awaiting_successor.get(urn).map(|s| (*s).clone());
            let provider = new.provider.clone();
            steps.push(with_provider(
                Step::new(StepOp::Create, urn.clone(), predecessor, Some(new)),
                provider,
            ));
            continue;
        };
        let Some(Ok(diff)) = diff else {
            continue;
        };

        let provider = new.provider.clone();
        match diff.kind {
            DiffKind::Same | DiffKind::UpdateInPlace => {
                let op = if diff.kind == DiffKind::Same {
                    StepOp::Same
                } else {
                    StepOp::Update
                };
                let mut step = with_provider(
                    Step::new(op, urn.clone(), Some(old.clone()), Some(new)),
                    provider,
                );
                step.changed_keys = diff.changed_keys;
                steps.push(step);
            }
            DiffKind::RequireReplacement => {
                if old.protect {
                    return Err(PlanError::Protected {
                        urn: urn.clone(),
                        action: "replaced",
                    });
                }
                let strategy = match goal.delete_before_replace {
                    Some(true) => ReplaceStrategy::DeleteBeforeCreate,
                    Some(false) => ReplaceStrategy::CreateBeforeDelete,
                    None => ctx.config.replace_strategy,
                };

                let mut create = with_provider(
                    Step::new(StepOp::CreateReplacement, urn.clone(), Some(old.clone()), Some(new)),
                    provider,
                );
                create.strategy = Some(strategy);
                create.changed_keys = diff.changed_keys.clone();

                let mut delete = with_provider(
                    Step::new(StepOp::DeleteReplaced, urn.clone(), Some(old.clone()), None),
                    old.provider.clone(),
                );
                delete.strategy = Some(strategy);
                delete.changed_keys = diff.changed_keys;

                match strategy {
                    ReplaceStrategy::CreateBeforeDelete => steps.extend([create, delete]),
                    ReplaceStrategy::DeleteBeforeCreate => steps.extend([delete, create]),
                }
            }
        }
    }

    let keep: HashSet<&Urn> = goals.iter().map(|(urn, _)| urn).collect();
    let mut deletes = plan_deletes(base, &keep)?;

    // Old states of excluded resources stay in the snapshot, so nothing they
    // reference may be deleted underneath them.
    if !excluded.is_empty() {
        let mut retained: Vec<&ResourceState> = base
            .live_resources()
            .filter(|r| excluded.contains(&r.urn))
            .collect();
        let mut kept = Vec::with_capacity(deletes.len());
        for step in deletes {
            if retained.iter().any(|r| r.references(&step.urn)) {
                tracing::warn!(
                    urn = %step.urn,
                    "delete held back, still referenced by an excluded resource"
                );
                if let Some(old) = base
                    .resources
                    .iter()
                    .find(|r| Some(*r) == step.old.as_ref())
                {
                    retained.push(old);
                }
            } else {
                kept.push(step);
            }
        }
        deletes = kept;
    }

    steps.extend(deletes);
    Ok((steps, diagnostics))
}

/// Check registration order and URN uniqueness, returning each goal with
/// its URN.
fn validate(desired: &DesiredGraph) -> Result<Vec<(Urn, &ResourceGoal)>, PlanError> {
    let mut seen: HashSet<Urn> = HashSet::with_capacity(desired.resources.len());
    let mut goals = Vec::with_capacity(desired.resources.len());

    for goal in &desired.resources {
        let urn = desired.urn_of(goal);
        if let Some(parent) = &goal.parent {
            if !seen.contains(parent) {
                return Err(PlanError::MissingParent {
                    urn,
                    parent: parent.clone(),
                });
            }
        }
        if let Some(dependency) = goal.dependencies.iter().find(|d| !seen.contains(*d)) {
            return Err(PlanError::MissingDependency {
                urn,
                dependency: dependency.clone(),
            });
        }
        if !seen.insert(urn.clone()) {
            return Err(PlanError::DuplicateUrn { urn });
        }
        goals.push((urn, goal));
    }

    Ok(goals)
}

fn desired_state(urn: &Urn, goal: &ResourceGoal, provider: Option<String>) -> ResourceState {
    let mut state = ResourceState::new(urn.clone(), goal.inputs.clone());
    state.custom = goal.custom;
    state.parent = goal.parent.clone();
    state.dependencies = goal.dependencies.clone();
    state.protect = goal.protect;
    state.provider = provider;
    state
}

fn with_provider(mut step: Step, provider: Option<String>) -> Step {
    step.provider = provider;
    step
}

async fn diff_resource(
    ctx: &RunContext,
    old: &ResourceState,
    new: &ResourceState,
) -> Result<DiffResult, ProviderError> {
    if old.custom != new.custom || old.provider != new.provider {
        return Ok(DiffResult::replace(Vec::new()));
    }
    if !new.custom {
        let changed = changed_keys(&old.inputs, &new.inputs);
        return Ok(if changed.is_empty() {
            DiffResult::same()
        } else {
            DiffResult::update(changed)
        });
    }

    let reference = new.provider.as_deref().unwrap_or_default();
    let provider = ctx.providers.get(reference).ok_or_else(|| {
        ProviderError::DiffFailed(format!("provider {reference} is not registered"))
    })?;
    provider
        .diff(&new.urn, &old.id, &old.inputs, &new.inputs)
        .await
        .map_err(|e| e.with_resource(&new.urn))
}

/// `root` and every desired state below it by parent, in registration order.
fn subtree_of(news: &[ResourceState], index: &UrnIndex, root: &Urn) -> Vec<Urn> {
    news.iter()
        .filter(|r| &r.urn == root || index.is_descendant(news, &r.urn, root))
        .map(|r| r.urn.clone())
        .collect()
}

/// Delete steps for every record not kept, dependents first.
///
/// Live records are condemned when their URN is not in `keep`. Leftovers of
/// an interrupted replacement are cleaned up too: records pending deletion
/// always, records awaiting a successor only when no successor is coming.
fn plan_deletes(base: &Snapshot, keep: &HashSet<&Urn>) -> Result<Vec<Step>, PlanError> {
    let mut deletes = Vec::new();
    for old in base.resources.iter().rev() {
        let condemned = if old.is_live() {
            !keep.contains(&old.urn)
        } else {
            old.pending_deletion || (old.pending_replacement && !keep.contains(&old.urn))
        };
        if !condemned {
            continue;
        }
        if old.is_live() && old.protect {
            return Err(PlanError::Protected {
                urn: old.urn.clone(),
                action: "deleted",
            });
        }
        deletes.push(with_provider(
            Step::new(StepOp::Delete, old.urn.clone(), Some(old.clone()), None),
            old.provider.clone(),
        ));
    }
    Ok(deletes)
}

/// One refresh per live provider-managed resource. Refreshes are independent.
fn plan_refresh(base: &Snapshot) -> Vec<Step> {
    base.live_resources()
        .filter(|r| r.custom && !r.id.is_empty())
        .map(|r| {
            with_provider(
                Step::new(StepOp::Refresh, r.urn.clone(), Some(r.clone()), Some(r.clone())),
                r.provider.clone(),
            )
        })
        .collect()
}

/// Number the steps and compute their prerequisites.
fn link(mut steps: Vec<Step>) -> Result<Vec<Step>, PlanError> {
    for (i, step) in steps.iter_mut().enumerate() {
        step.id = StepId(i);
    }

    let edges = step_edges(&steps);
    for (step, deps) in steps.iter_mut().zip(edges) {
        step.depends_on = deps;
    }
    check_acyclic(&steps)?;
    Ok(steps)
}

fn step_edges(steps: &[Step]) -> Vec<Vec<StepId>> {
    let producers: HashMap<&Urn, StepId> = steps
        .iter()
        .filter(|s| s.op.produces_state())
        .map(|s| (&s.urn, s.id))
        .collect();
    let halves: HashMap<(&Urn, StepOp), StepId> = steps
        .iter()
        .filter(|s| s.op.is_replace())
        .map(|s| ((&s.urn, s.op), s.id))
        .collect();
    let mut referencing: HashMap<&Urn, Vec<&Step>> = HashMap::new();
    for step in steps {
        if let Some(old) = &step.old {
            for target in old.parent.iter().chain(&old.dependencies) {
                referencing.entry(target).or_default().push(step);
            }
        }
    }

    let mut edges: Vec<Vec<StepId>> = Vec::with_capacity(steps.len());
    for step in steps {
        let mut deps = Vec::new();

        if step.op.produces_state() {
            if let Some(new) = &step.new {
                for target in new.parent.iter().chain(&new.dependencies) {
                    if let Some(&producer) = producers.get(target) {
                        deps.push(producer);
                    }
                }
            }
        }

        match (step.op, step.strategy) {
            (StepOp::CreateReplacement, Some(ReplaceStrategy::DeleteBeforeCreate)) => {
                deps.extend(halves.get(&(&step.urn, StepOp::DeleteReplaced)).copied());
            }
            (StepOp::DeleteReplaced, Some(ReplaceStrategy::CreateBeforeDelete)) => {
                deps.extend(halves.get(&(&step.urn, StepOp::CreateReplacement)).copied());
            }
            _ => {}
        }

        if step.op.is_delete() {
            // A delete-before-create resource goes away before its successor
            // exists, so only dependents that are themselves torn down first
            // can be waited on; waiting on their updates would be circular.
            let early = step.strategy == Some(ReplaceStrategy::DeleteBeforeCreate);
            for other in referencing.get(&step.urn).into_iter().flatten() {
                if other.id == step.id {
                    continue;
                }
                let tears_down_first = other.op == StepOp::Delete
                    || (other.op == StepOp::DeleteReplaced
                        && other.strategy == Some(ReplaceStrategy::DeleteBeforeCreate));
                if !early || tears_down_first {
                    deps.push(other.id);
                }
            }
        }

        deps.retain(|d| *d != step.id);
        deps.sort();
        deps.dedup();
        edges.push(deps);
    }
    edges
}

fn dependents_of(steps: &[Step]) -> Vec<Vec<StepId>> {
    let mut dependents = vec![Vec::new(); steps.len()];
    for step in steps {
        for dep in &step.depends_on {
            if let Some(list) = dependents.get_mut(dep.0) {
                list.push(step.id);
            }
        }
    }
    dependents
}

/// Kahn's algorithm over the step graph.
fn check_acyclic(steps: &[Step]) -> Result<(), PlanError> {
    let dependents = dependents_of(steps);
    let mut in_degree: Vec<usize> = steps.iter().map(|s| s.depends_on.len()).collect();
    let mut queue: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;

    while let Some(i) = queue.pop_front() {
        visited += 1;
        for dependent in &dependents[i] {
            let degree = &mut in_degree[dependent.0];
            *degree = degree.saturating_sub(1);
            if *degree == 0 {
                queue.push_back(dependent.0);
            }
        }
    }

    if visited == steps.len() {
        return Ok(());
    }
    let stuck = in_degree.iter().position(|&d| d > 0).unwrap_or_default();
    Err(PlanError::Cycle {
        urn: steps[stuck].urn.clone(),
    })
}
