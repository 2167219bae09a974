use std::rc::Rc;

use crate::engine::Blast;
use crate::expr::{BinderKind, ExprData, ExprId, HypothesisId, Terms};
use crate::state::{ProofStep, ProofStepFn, State};
use crate::type_context::AssignmentScope;

/// What an action did with the current branch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionResult {
    /// The action does not apply here.
    NoAction,
    /// The State was advanced; keep searching.
    Continue,
    /// The current subgoal is proved by the carried term.
    ClosedBranch(ExprId),
}

/// The extension point for additional actions. Implementations must be
/// deterministic for equal inputs, and must push a choice point (via
/// `Blast::push_choice_point`) before committing to any
/// non-deterministic choice so the driver can backtrack over them.
pub trait Action {
    fn name(&self) -> &'static str;
    fn apply(&self, blast: &mut Blast) -> ActionResult;
}

/// The proof step pushed by `intros_action`: once the body is proved,
/// re-abstract the proof over the hypotheses that were introduced.
struct IntrosStep {
    introduced: Vec<(HypothesisId, BinderKind)>,
}

impl ProofStepFn for IntrosStep {
    fn resolve(&self, state: &mut State, terms: &mut Terms, pr: ExprId) -> Option<ExprId> {
        let mut pr = pr;
        for (h, bk) in self.introduced.iter().rev() {
            let hyp = state.get_hypothesis_decl(*h);
            let (name, ty) = (hyp.name.clone(), hyp.ty);
            let href = terms.mk_href(*h);
            let body = terms.abstract_over(pr, &[href]);
            pr = terms.mk_lambda(name, ty, body, *bk);
        }
        Some(pr)
    }
}

/// Introduces every leading Pi binder of the target as a fresh
/// hypothesis and replaces the target by the instantiated body.
/// Returns false when the target has nothing to introduce.
pub fn intros_action(blast: &mut Blast) -> bool {
    let Some(target) = blast.curr_state.target() else {
        return false;
    };
    let mut t = blast.type_context().whnf(target);
    let mut introduced = vec![];
    loop {
        let (name, domain, body, bk) = match blast.terms.get(t).clone() {
            ExprData::Pi(name, domain, body, bk) => (name, domain, body, bk),
            _ => break,
        };
        let h = blast.curr_state.mk_hypothesis(name, domain, None);
        let href = blast.terms.mk_href(h);
        t = blast.terms.instantiate(body, &[href]);
        t = blast.type_context().whnf(t);
        introduced.push((h, bk));
    }
    if introduced.is_empty() {
        return false;
    }
    blast.curr_state.set_target(t);
    blast
        .curr_state
        .push_proof_step(ProofStep::new(Rc::new(IntrosStep { introduced })));
    true
}

/// Discharges the target with an active hypothesis whose type is
/// definitionally equal to it. Each attempt runs in its own assignment
/// scope; only the successful one is kept.
pub fn assumption_action(blast: &mut Blast) -> Option<ExprId> {
    let target = blast.curr_state.target()?;
    let candidates: Vec<HypothesisId> = blast.curr_state.active_hypotheses().collect();
    for h in candidates {
        let ty = blast.curr_state.get_hypothesis_decl(h).ty;
        let proved = {
            let mut ctx = blast.type_context();
            let mut scope = AssignmentScope::new(&mut ctx);
            if scope.ctx().is_def_eq(ty, target) {
                scope.commit();
                true
            } else {
                false
            }
        };
        if proved {
            return Some(blast.terms.mk_href(h));
        }
    }
    None
}
