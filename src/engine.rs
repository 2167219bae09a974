use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::actions::{assumption_action, intros_action, Action, ActionResult};
use crate::display::DisplayExpr;
use crate::environment::{Environment, Reducibility};
use crate::expr::{ExprData, ExprId, MetavarId, Name, Terms, UnivMetaId};
use crate::externalize::Externalizer;
use crate::internalize::Internalizer;
use crate::state::State;
use crate::type_context::TypeContext;

/// The two failures that escape the engine. Everything else is
/// absorbed into backtracking or reported as a negative search result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BlastError {
    /// The input goal contains a metavariable application outside the
    /// higher-order-pattern fragment.
    UnsupportedMetavarOcc(String),

    /// A free local constant outside any recognized binding, or a goal
    /// that does not type-check far enough to internalize.
    IllFormedGoal(String),
}

impl fmt::Display for BlastError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlastError::UnsupportedMetavarOcc(message) => {
                write!(f, "blast failed, {}", message)
            }
            BlastError::IllFormedGoal(message) => write!(f, "blast failed, {}", message),
        }
    }
}

impl From<BlastError> for String {
    fn from(error: BlastError) -> String {
        error.to_string()
    }
}

/// Search configuration. The depth options drive iterative deepening
/// and are also recognized by their external names through `set`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlastOptions {
    /// Upper bound on the iterative-deepening series.
    pub max_depth: u32,
    /// First depth tried.
    pub init_depth: u32,
    /// Step added between iterations.
    pub inc_depth: u32,
    /// Best-effort search tracing on stderr.
    pub verbose: bool,
}

impl Default for BlastOptions {
    fn default() -> BlastOptions {
        BlastOptions {
            max_depth: 128,
            init_depth: 1,
            inc_depth: 5,
            verbose: false,
        }
    }
}

impl BlastOptions {
    /// Sets a depth option by its registered name. Returns false for
    /// unrecognized names.
    pub fn set(&mut self, name: &str, value: u32) -> bool {
        match name {
            "blast.max_depth" => self.max_depth = value,
            "blast.init_depth" => self.init_depth = value,
            "blast.inc_depth" => self.inc_depth = value,
            _ => return false,
        }
        true
    }
}

/// A proof obligation in the caller's representation: local-constant
/// hypotheses and a target proposition.
#[derive(Clone, Debug)]
pub struct Goal {
    pub hypotheses: Vec<ExprId>,
    pub target: ExprId,
}

impl Goal {
    pub fn new(hypotheses: Vec<ExprId>, target: ExprId) -> Goal {
        Goal { hypotheses, target }
    }
}

/// The engine. It owns the current State, the choice-point stack, and
/// the internalization memo tables, and borrows the environment and
/// the expression arena from the caller. Every operation takes the
/// engine explicitly; there is no ambient installation.
pub struct Blast<'a> {
    pub(crate) env: &'a Environment,
    pub(crate) terms: &'a mut Terms,
    pub(crate) options: BlastOptions,
    pub(crate) lemma_hints: HashSet<Name>,
    pub(crate) unfold_hints: HashSet<Name>,
    uvar2uref: HashMap<Name, UnivMetaId>,
    uref2uvar: HashMap<UnivMetaId, Name>,
    mvar2meta_mref: HashMap<Name, (ExprId, MetavarId)>,
    mref2meta: HashMap<MetavarId, ExprId>,
    pub(crate) curr_state: State,
    choice_points: Vec<State>,
    extra_actions: Vec<Rc<dyn Action>>,
}

impl<'a> Blast<'a> {
    pub fn new(
        env: &'a Environment,
        terms: &'a mut Terms,
        options: BlastOptions,
        lemma_hints: Vec<Name>,
        unfold_hints: Vec<Name>,
    ) -> Blast<'a> {
        Blast {
            env,
            terms,
            options,
            lemma_hints: lemma_hints.into_iter().collect(),
            unfold_hints: unfold_hints.into_iter().collect(),
            uvar2uref: HashMap::new(),
            uref2uvar: HashMap::new(),
            mvar2meta_mref: HashMap::new(),
            mref2meta: HashMap::new(),
            curr_state: State::new(),
            choice_points: vec![],
            extra_actions: vec![],
        }
    }

    pub fn env(&self) -> &Environment {
        self.env
    }

    pub fn curr_state(&self) -> &State {
        &self.curr_state
    }

    pub fn options(&self) -> &BlastOptions {
        &self.options
    }

    /// Registers an extension action, consulted after the baseline
    /// actions in registration order.
    pub fn add_action(&mut self, action: Rc<dyn Action>) {
        self.extra_actions.push(action);
    }

    /// A unification/whnf façade over the current State.
    pub fn type_context(&mut self) -> TypeContext<'_> {
        TypeContext::new(
            &mut *self.terms,
            self.env,
            &mut self.curr_state,
            &self.unfold_hints,
        )
    }

    /// Reducibility as the engine sees it: irreducible constants and
    /// projections are not unfolded.
    pub fn is_reducible(&self, name: &Name) -> bool {
        self.env.reducibility(name) != Reducibility::Irreducible && !self.env.is_projection(name)
    }

    pub fn is_lemma_hint(&self, name: &Name) -> bool {
        self.lemma_hints.contains(name)
    }

    /// Converts an external expression against the current State. The
    /// local map starts empty, so this is only suitable for expressions
    /// with no free local constants; it exists for diagnostics.
    pub fn internalize(&mut self, e: ExprId) -> Result<ExprId, BlastError> {
        let mut local2href = HashMap::new();
        let mut internalizer = Internalizer::new(
            &mut *self.terms,
            self.env,
            &mut self.curr_state,
            &self.unfold_hints,
            &mut self.uvar2uref,
            &mut self.uref2uvar,
            &mut self.mvar2meta_mref,
            &mut self.mref2meta,
            &mut local2href,
        );
        internalizer.internalize(e)
    }

    /// Builds a fresh State from the goal: each hypothesis type and the
    /// target are normalized unfolding reducible definitions only, then
    /// rewritten into the internal representation.
    fn to_state(&mut self, goal: &Goal) -> Result<State, BlastError> {
        let mut state = State::new();
        let mut local2href = HashMap::new();
        for hyp in &goal.hypotheses {
            let (unique, pretty, ty) = match self.terms.get(*hyp).clone() {
                ExprData::Local(unique, pretty, ty) => (unique, pretty, ty),
                _ => {
                    return Err(BlastError::IllFormedGoal(
                        "goal hypothesis is not a local constant".to_string(),
                    ))
                }
            };
            let ty = {
                let mut tctx = TypeContext::new(
                    &mut *self.terms,
                    self.env,
                    &mut state,
                    &self.unfold_hints,
                );
                tctx.normalize(ty)
            };
            let ty = {
                let mut internalizer = Internalizer::new(
                    &mut *self.terms,
                    self.env,
                    &mut state,
                    &self.unfold_hints,
                    &mut self.uvar2uref,
                    &mut self.uref2uvar,
                    &mut self.mvar2meta_mref,
                    &mut self.mref2meta,
                    &mut local2href,
                );
                internalizer.internalize(ty)?
            };
            let h = state.mk_hypothesis(pretty, ty, Some(*hyp));
            let href = self.terms.mk_href(h);
            local2href.insert(unique, href);
        }
        let target = {
            let mut tctx = TypeContext::new(
                &mut *self.terms,
                self.env,
                &mut state,
                &self.unfold_hints,
            );
            tctx.normalize(goal.target)
        };
        let target = {
            let mut internalizer = Internalizer::new(
                &mut *self.terms,
                self.env,
                &mut state,
                &self.unfold_hints,
                &mut self.uvar2uref,
                &mut self.uref2uvar,
                &mut self.mvar2meta_mref,
                &mut self.mref2meta,
                &mut local2href,
            );
            internalizer.internalize(target)?
        };
        state.set_target(target);
        debug_assert!(state.check_invariant(self.terms));
        Ok(state)
    }

    /// Saves the current State so an extension action can commit to a
    /// non-deterministic choice and still be backtracked over.
    pub fn push_choice_point(&mut self) {
        self.choice_points.push(self.curr_state.clone());
    }

    fn next_choice_point(&mut self) -> bool {
        match self.choice_points.pop() {
            Some(state) => {
                self.curr_state = state;
                true
            }
            None => false,
        }
    }

    /// Consults the actions in their fixed priority order.
    fn next_action(&mut self) -> ActionResult {
        if intros_action(self) {
            return ActionResult::Continue;
        }
        if self.curr_state.activate_hypothesis(self.terms).is_some() {
            return ActionResult::Continue;
        }
        if let Some(pr) = assumption_action(self) {
            return ActionResult::ClosedBranch(pr);
        }
        let actions = self.extra_actions.clone();
        for action in actions {
            match action.apply(self) {
                ActionResult::NoAction => continue,
                result => return result,
            }
        }
        ActionResult::NoAction
    }

    /// Pops proof steps while they accept the accumulated proof. An
    /// emptied stack means the whole goal is closed; a step that still
    /// needs subgoals stays put and the search continues.
    fn resolve(&mut self, pr: ExprId) -> Option<ExprId> {
        let mut pr = pr;
        while let Some(step) = self.curr_state.top_proof_step() {
            match step.resolve(&mut self.curr_state, self.terms, pr) {
                Some(new_pr) => {
                    pr = new_pr;
                    self.curr_state.pop_proof_step();
                }
                None => return None,
            }
        }
        Some(pr)
    }

    fn search_upto(&mut self, depth: u32) -> Option<ExprId> {
        loop {
            if self.options.verbose {
                self.display_curr_state(depth);
            }
            if self.curr_state.get_proof_depth() > depth {
                if !self.next_choice_point() {
                    return None;
                }
                continue;
            }
            match self.next_action() {
                ActionResult::NoAction => {
                    if !self.next_choice_point() {
                        return None;
                    }
                }
                ActionResult::ClosedBranch(pr) => {
                    if let Some(pr) = self.resolve(pr) {
                        return Some(pr);
                    }
                }
                ActionResult::Continue => {}
            }
        }
    }

    fn search(&mut self) -> Option<ExprId> {
        let initial = self.curr_state.clone();
        // a zero increment would never terminate
        let inc = self.options.inc_depth.max(1);
        let mut depth = self.options.init_depth;
        while depth <= self.options.max_depth {
            if let Some(pr) = self.search_upto(depth) {
                return Some(pr);
            }
            depth = match depth.checked_add(inc) {
                Some(next) => next,
                None => break,
            };
            self.curr_state = initial.clone();
            self.choice_points.clear();
        }
        None
    }

    fn to_external_proof(&mut self, pr: ExprId) -> ExprId {
        let mut externalizer = Externalizer::new(
            &mut *self.terms,
            &self.curr_state,
            &self.mref2meta,
            &self.uref2uvar,
        );
        externalizer.externalize(pr)
    }

    /// Internalize, search, externalize. `Ok(None)` means the depth
    /// budget was consumed without finding a proof.
    pub fn run(&mut self, goal: &Goal) -> Result<Option<ExprId>, BlastError> {
        self.curr_state = self.to_state(goal)?;
        self.choice_points.clear();
        match self.search() {
            Some(pr) => {
                debug_assert!(self.curr_state.check_invariant(self.terms));
                Ok(Some(self.to_external_proof(pr)))
            }
            None => Ok(None),
        }
    }

    fn display_curr_state(&self, depth: u32) {
        let target = match self.curr_state.target() {
            Some(t) => format!("{}", DisplayExpr::new(self.terms, t)),
            None => "<no target>".to_string(),
        };
        eprintln!(
            "blast: depth {}/{} | {} hypotheses | {} proof steps | target {}",
            self.curr_state.get_proof_depth(),
            depth,
            self.curr_state.num_hypotheses(),
            self.curr_state.num_proof_steps(),
            target
        );
    }
}

/// The engine entry point: proves `goal` under `env`, returning the
/// proof in the caller's representation, `Ok(None)` when the search is
/// exhausted, and an error only for goals the engine cannot represent.
pub fn blast_goal(
    env: &Environment,
    terms: &mut Terms,
    options: BlastOptions,
    lemma_hints: &[Name],
    unfold_hints: &[Name],
    goal: &Goal,
) -> Result<Option<ExprId>, BlastError> {
    let mut blast = Blast::new(
        env,
        terms,
        options,
        lemma_hints.to_vec(),
        unfold_hints.to_vec(),
    );
    blast.run(goal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = BlastOptions::default();
        assert_eq!(options.max_depth, 128);
        assert_eq!(options.init_depth, 1);
        assert_eq!(options.inc_depth, 5);
        assert!(!options.verbose);
    }

    #[test]
    fn test_options_set_by_name() {
        let mut options = BlastOptions::default();
        assert!(options.set("blast.max_depth", 16));
        assert!(options.set("blast.init_depth", 2));
        assert!(options.set("blast.inc_depth", 3));
        assert!(!options.set("blast.unknown", 1));
        assert_eq!(options.max_depth, 16);
        assert_eq!(options.init_depth, 2);
        assert_eq!(options.inc_depth, 3);
    }

    #[test]
    fn test_error_display() {
        let e = BlastError::IllFormedGoal("free local constant 'x'".to_string());
        let s: String = e.into();
        assert!(s.contains("blast failed"));
        assert!(s.contains("free local constant"));
    }
}
