use std::collections::HashSet;

use crate::engine::BlastError;
use crate::environment::{Declaration, Environment, Reducibility};
use crate::expr::{BinderKind, ExprData, ExprId, MetavarId, Name, Terms};
use crate::level::Level;
use crate::state::{AssignmentSnapshot, State};

/// Which definitions conversion may unfold. The internalizer
/// normalizes with `ReducibleOnly`; definitional equality during the
/// search uses `NonOpaque`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum UnfoldMode {
    ReducibleOnly,
    NonOpaque,
}

/// The unification and whnf service. It bridges the generic
/// type-checking operations to the State: hypothesis and metavariable
/// types live there, and so do the assignment maps it reads and writes.
/// Snapshot control (`push`/`pop`/`commit`) is LIFO and perfectly
/// nestable.
pub struct TypeContext<'a> {
    terms: &'a mut Terms,
    env: &'a Environment,
    state: &'a mut State,
    unfold_hints: &'a HashSet<Name>,
    snapshots: Vec<AssignmentSnapshot>,
}

impl<'a> TypeContext<'a> {
    pub fn new(
        terms: &'a mut Terms,
        env: &'a Environment,
        state: &'a mut State,
        unfold_hints: &'a HashSet<Name>,
    ) -> TypeContext<'a> {
        TypeContext {
            terms,
            env,
            state,
            unfold_hints,
            snapshots: vec![],
        }
    }

    pub fn terms(&mut self) -> &mut Terms {
        self.terms
    }

    pub fn state(&mut self) -> &mut State {
        self.state
    }

    /// The only levels the engine solves for.
    pub fn is_uvar(l: &Level) -> bool {
        matches!(l, Level::Uref(_))
    }

    /// The only expressions the engine solves for.
    pub fn is_mvar(&self, e: ExprId) -> bool {
        matches!(self.terms.get(e), ExprData::Mref(_))
    }

    pub fn mk_uvar(&mut self) -> Level {
        Level::Uref(self.state.mk_uref())
    }

    pub fn mk_mvar(&mut self, ty: ExprId) -> ExprId {
        let m = self.state.mk_metavar(None, ty);
        self.terms.mk_mref(m)
    }

    fn can_unfold(&self, decl: &Declaration, mode: UnfoldMode) -> bool {
        if decl.value.is_none() || self.env.is_projection(&decl.name) {
            return false;
        }
        match mode {
            UnfoldMode::NonOpaque => decl.reducibility != Reducibility::Irreducible,
            UnfoldMode::ReducibleOnly => {
                decl.reducibility == Reducibility::Reducible
                    || (decl.reducibility == Reducibility::Semireducible
                        && self.unfold_hints.contains(&decl.name))
            }
        }
    }

    /// A constant the conversion will never look inside.
    pub fn is_opaque(&self, name: &Name) -> bool {
        self.env.reducibility(name) == Reducibility::Irreducible || self.env.is_projection(name)
    }

    fn unfold_const(&mut self, name: &Name, levels: &[Level], mode: UnfoldMode) -> Option<ExprId> {
        let env = self.env;
        let decl = env.get_declaration(name)?;
        if !self.can_unfold(decl, mode) || decl.univ_params.len() != levels.len() {
            return None;
        }
        let value = decl.value?;
        Some(
            self.terms
                .instantiate_univ_params(value, &decl.univ_params, levels),
        )
    }

    /// Replaces an assigned metavariable at the head of the spine.
    fn instantiate_head(&mut self, e: ExprId) -> ExprId {
        let (f, args) = self.terms.get_app_args(e);
        if let ExprData::Mref(m) = self.terms.get(f) {
            if self.state.get_mref_assignment(*m).is_some() {
                let v = self.state.instantiate_urefs_mrefs(self.terms, f);
                return self.terms.mk_app_many(v, &args);
            }
        }
        e
    }

    pub fn whnf(&mut self, e: ExprId) -> ExprId {
        self.whnf_with(e, UnfoldMode::NonOpaque)
    }

    fn whnf_with(&mut self, e: ExprId, mode: UnfoldMode) -> ExprId {
        let mut e = e;
        loop {
            e = self.instantiate_head(e);
            let (f, args) = self.terms.get_app_args(e);
            match self.terms.get(f).clone() {
                ExprData::Lambda(_, _, _, _) if !args.is_empty() => {
                    e = self.beta_reduce(f, &args);
                }
                ExprData::Const(name, levels) => match self.unfold_const(&name, &levels, mode) {
                    Some(v) => e = self.terms.mk_app_many(v, &args),
                    None => return e,
                },
                _ => return e,
            }
        }
    }

    fn beta_reduce(&mut self, f: ExprId, args: &[ExprId]) -> ExprId {
        let mut f = f;
        let mut consumed = 0;
        while consumed < args.len() {
            match self.terms.get(f).clone() {
                ExprData::Lambda(_, _, body, _) => {
                    f = self.terms.instantiate(body, &[args[consumed]]);
                    consumed += 1;
                }
                _ => break,
            }
        }
        self.terms.mk_app_many(f, &args[consumed..])
    }

    /// Full normalization unfolding reducible definitions only: the
    /// internalizer's normalization mode.
    pub fn normalize(&mut self, e: ExprId) -> ExprId {
        let e = self.whnf_with(e, UnfoldMode::ReducibleOnly);
        match self.terms.get(e).clone() {
            ExprData::App(f, a) => {
                let f = self.normalize(f);
                let a = self.normalize(a);
                self.terms.mk_app(f, a)
            }
            ExprData::Lambda(n, d, b, bk) => {
                let d = self.normalize(d);
                let b = self.normalize(b);
                self.terms.mk_lambda(n, d, b, bk)
            }
            ExprData::Pi(n, d, b, bk) => {
                let d = self.normalize(d);
                let b = self.normalize(b);
                self.terms.mk_pi(n, d, b, bk)
            }
            ExprData::Macro(n, args) => {
                let args = args.iter().map(|a| self.normalize(*a)).collect();
                self.terms.mk(ExprData::Macro(n, args))
            }
            _ => e,
        }
    }

    /// Infers the type of a closed expression. Hypothesis references
    /// and engine metavariables take their types from the State rather
    /// than from the expression itself.
    pub fn infer(&mut self, e: ExprId) -> Result<ExprId, BlastError> {
        match self.terms.get(e).clone() {
            ExprData::Var(_) => Err(BlastError::IllFormedGoal(
                "type inference reached an unbound variable".to_string(),
            )),
            ExprData::Sort(l) => Ok(self.terms.mk_sort(l.succ())),
            ExprData::Const(n, ls) => {
                let env = self.env;
                let decl = env.get_declaration(&n).ok_or_else(|| {
                    BlastError::IllFormedGoal(format!("unknown constant '{}'", n))
                })?;
                if decl.univ_params.len() != ls.len() {
                    return Err(BlastError::IllFormedGoal(format!(
                        "constant '{}' applied to {} universe levels, expected {}",
                        n,
                        ls.len(),
                        decl.univ_params.len()
                    )));
                }
                Ok(self
                    .terms
                    .instantiate_univ_params(decl.ty, &decl.univ_params, &ls))
            }
            ExprData::Local(_, _, ty) => Ok(ty),
            ExprData::Meta(_, ty) => Ok(ty),
            ExprData::Href(h) => Ok(self.state.get_hypothesis_decl(h).ty),
            ExprData::Mref(m) => Ok(self.state.get_metavar_decl(m).ty),
            ExprData::App(f, a) => {
                let f_ty = self.infer(f)?;
                let f_ty = self.whnf(f_ty);
                match self.terms.get(f_ty).clone() {
                    ExprData::Pi(_, _, body, _) => Ok(self.terms.instantiate(body, &[a])),
                    _ => Err(BlastError::IllFormedGoal(
                        "application of a non-function".to_string(),
                    )),
                }
            }
            ExprData::Lambda(n, d, b, bk) => {
                let local = self.terms.fresh_local(n.as_str(), d);
                let b_open = self.terms.instantiate(b, &[local]);
                let b_ty = self.infer(b_open)?;
                let b_ty = self.terms.abstract_over(b_ty, &[local]);
                Ok(self.terms.mk_pi(n, d, b_ty, bk))
            }
            ExprData::Pi(n, d, b, _) => {
                let s1 = self.sort_of(d)?;
                let local = self.terms.fresh_local(n.as_str(), d);
                let b_open = self.terms.instantiate(b, &[local]);
                let s2 = self.sort_of(b_open)?;
                Ok(self.terms.mk_sort(Level::imax(s1, s2)))
            }
            ExprData::Macro(n, _) => Err(BlastError::IllFormedGoal(format!(
                "cannot infer the type of macro '{}'",
                n
            ))),
        }
    }

    fn sort_of(&mut self, e: ExprId) -> Result<Level, BlastError> {
        let ty = self.infer(e)?;
        let ty = self.whnf(ty);
        match self.terms.get(ty) {
            ExprData::Sort(l) => Ok(l.clone()),
            _ => Err(BlastError::IllFormedGoal("expected a sort".to_string())),
        }
    }

    pub fn is_prop(&mut self, e: ExprId) -> bool {
        match self.infer(e) {
            Ok(ty) => {
                let ty = self.whnf(ty);
                match self.terms.get(ty) {
                    ExprData::Sort(l) => self.state.instantiate_level(l).is_zero(),
                    _ => false,
                }
            }
            Err(_) => false,
        }
    }

    /// The four assignment validity checks. Before `m := v` is
    /// recorded: every hypothesis reference in `v` must be admissible
    /// for `m`; every non-temporary local constant must be among
    /// `locals`; `m` must not occur in `v`; and the context of every
    /// other metavariable in `v` is narrowed to a subset of `m`'s
    /// (a side effect that sticks even if a later check fails the
    /// assignment — the narrowing is itself sound).
    pub fn validate_assignment(&mut self, m: MetavarId, locals: &[ExprId], v: ExprId) -> bool {
        let mut ok = true;
        let mut inner_mrefs = vec![];
        {
            let terms = &*self.terms;
            let decl = self.state.get_metavar_decl(m);
            terms.for_each(v, &mut |e| {
                if !ok {
                    return false;
                }
                match terms.get(e) {
                    ExprData::Href(h) => {
                        if !decl.contains_href(*h) {
                            ok = false;
                        }
                    }
                    ExprData::Local(_, _, _) => {
                        if !terms.is_tmp_local(e) && !locals.contains(&e) {
                            ok = false;
                        }
                    }
                    ExprData::Mref(m2) => {
                        if *m2 == m {
                            ok = false;
                        } else {
                            inner_mrefs.push(*m2);
                        }
                        return false;
                    }
                    _ => {}
                }
                ok
            });
        }
        if !ok {
            return false;
        }
        for m2 in inner_mrefs {
            if !self.state.restrict_mref_context_using(self.terms, m2, m) {
                return false;
            }
        }
        true
    }

    pub fn push(&mut self) {
        self.snapshots.push(self.state.save_assignment());
    }

    pub fn pop(&mut self) {
        debug_assert!(!self.snapshots.is_empty());
        if let Some(snapshot) = self.snapshots.pop() {
            self.state.restore_assignment(snapshot);
        }
    }

    pub fn commit(&mut self) {
        debug_assert!(!self.snapshots.is_empty());
        self.snapshots.pop();
    }

    /// Runs `f` inside a snapshot scope: kept on success, reverted on
    /// failure.
    fn in_scope(&mut self, f: impl FnOnce(&mut Self) -> bool) -> bool {
        self.push();
        if f(self) {
            self.commit();
            true
        } else {
            self.pop();
            false
        }
    }

    pub fn is_def_eq_level(&mut self, l1: &Level, l2: &Level) -> bool {
        let l1 = self.state.instantiate_level(l1);
        let l2 = self.state.instantiate_level(l2);
        if l1 == l2 {
            return true;
        }
        match (&l1, &l2) {
            (Level::Uref(u), _) => {
                if l2.occurs_uref(*u) {
                    false
                } else {
                    self.state.assign_uref(*u, l2.clone());
                    true
                }
            }
            (_, Level::Uref(u)) => {
                if l1.occurs_uref(*u) {
                    false
                } else {
                    self.state.assign_uref(*u, l1.clone());
                    true
                }
            }
            (Level::Succ(a), Level::Succ(b)) => self.is_def_eq_level(a, b),
            (Level::Max(a1, b1), Level::Max(a2, b2)) => {
                self.is_def_eq_level(a1, a2) && self.is_def_eq_level(b1, b2)
            }
            (Level::Imax(a1, b1), Level::Imax(a2, b2)) => {
                self.is_def_eq_level(a1, a2) && self.is_def_eq_level(b1, b2)
            }
            _ => false,
        }
    }

    fn head_unassigned_mref(&self, e: ExprId) -> Option<MetavarId> {
        match self.terms.get(self.terms.get_app_fn(e)) {
            ExprData::Mref(m) if self.state.get_mref_assignment(*m).is_none() => Some(*m),
            _ => None,
        }
    }

    /// Tries to solve `lhs := rhs` where the head of `lhs` is an
    /// unassigned metavariable. Only the higher-order-pattern fragment
    /// is solved: the arguments must be distinct admissible hypothesis
    /// references, and the solution abstracts them away.
    fn try_solve_mref(&mut self, m: MetavarId, lhs: ExprId, rhs: ExprId) -> bool {
        let (_, args) = self.terms.get_app_args(lhs);
        let mut hrefs = vec![];
        for a in &args {
            match self.terms.get(*a) {
                ExprData::Href(h)
                    if self.state.get_metavar_decl(m).contains_href(*h)
                        && !hrefs.contains(a) =>
                {
                    hrefs.push(*a)
                }
                _ => return false,
            }
        }
        let mut v = self.state.instantiate_urefs_mrefs(self.terms, rhs);
        for a in hrefs.iter().rev() {
            let h = match self.terms.get(*a) {
                ExprData::Href(h) => *h,
                _ => unreachable!(),
            };
            let hyp = self.state.get_hypothesis_decl(h);
            let (name, ty) = (hyp.name.clone(), hyp.ty);
            let body = self.terms.abstract_over(v, &[*a]);
            v = self.terms.mk_lambda(name, ty, body, BinderKind::Explicit);
        }
        if !self.validate_assignment(m, &[], v) {
            return false;
        }
        self.state.assign_mref(m, v);
        true
    }

    /// Definitional equality with unification: assignments made along
    /// the way stick only if the overall comparison succeeds at each
    /// congruence scope. A `false` answer reports failure to the
    /// caller, which backtracks; nothing is propagated.
    pub fn is_def_eq(&mut self, e1: ExprId, e2: ExprId) -> bool {
        if e1 == e2 {
            return true;
        }
        let e1 = self.whnf(e1);
        let e2 = self.whnf(e2);
        if e1 == e2 {
            return true;
        }
        if let Some(m) = self.head_unassigned_mref(e1) {
            if self.in_scope(|ctx| ctx.try_solve_mref(m, e1, e2)) {
                return true;
            }
        }
        if let Some(m) = self.head_unassigned_mref(e2) {
            if self.in_scope(|ctx| ctx.try_solve_mref(m, e2, e1)) {
                return true;
            }
        }
        match (self.terms.get(e1).clone(), self.terms.get(e2).clone()) {
            (ExprData::Sort(l1), ExprData::Sort(l2)) => {
                self.in_scope(|ctx| ctx.is_def_eq_level(&l1, &l2))
            }
            (ExprData::Const(n1, ls1), ExprData::Const(n2, ls2)) => {
                if n1 != n2 || ls1.len() != ls2.len() {
                    return false;
                }
                self.in_scope(|ctx| {
                    ls1.iter()
                        .zip(ls2.iter())
                        .all(|(l1, l2)| ctx.is_def_eq_level(l1, l2))
                })
            }
            (ExprData::App(f1, a1), ExprData::App(f2, a2)) => {
                self.in_scope(|ctx| ctx.is_def_eq(f1, f2) && ctx.is_def_eq(a1, a2))
            }
            (ExprData::Pi(n1, d1, b1, _), ExprData::Pi(_, d2, b2, _))
            | (ExprData::Lambda(n1, d1, b1, _), ExprData::Lambda(_, d2, b2, _)) => {
                self.in_scope(|ctx| {
                    if !ctx.is_def_eq(d1, d2) {
                        return false;
                    }
                    let local = ctx.terms.fresh_local(n1.as_str(), d1);
                    let b1 = ctx.terms.instantiate(b1, &[local]);
                    let b2 = ctx.terms.instantiate(b2, &[local]);
                    ctx.is_def_eq(b1, b2)
                })
            }
            (ExprData::Macro(n1, args1), ExprData::Macro(n2, args2)) => {
                if n1 != n2 || args1.len() != args2.len() {
                    return false;
                }
                self.in_scope(|ctx| {
                    args1
                        .iter()
                        .zip(args2.iter())
                        .all(|(a1, a2)| ctx.is_def_eq(*a1, *a2))
                })
            }
            _ => false,
        }
    }

    /// Instance search: the first registered instance (in name order,
    /// for determinism) whose declared type unifies with `ty`.
    /// Universe-polymorphic instances are not attempted.
    pub fn mk_class_instance(&mut self, ty: ExprId) -> Option<ExprId> {
        let env = self.env;
        let mut names: Vec<&Name> = env.instance_names().collect();
        names.sort();
        for name in names {
            let decl = match env.get_declaration(name) {
                Some(decl) if decl.univ_params.is_empty() => decl,
                _ => continue,
            };
            let decl_ty = decl.ty;
            if self.in_scope(|ctx| ctx.is_def_eq(decl_ty, ty)) {
                return Some(self.terms.mk_const(name.clone(), vec![]));
            }
        }
        None
    }
}

/// Scopes a tentative unification block: acquired before, then either
/// `commit()` to keep its assignments or drop to revert them.
/// Reverting is the default.
pub struct AssignmentScope<'s, 'a> {
    ctx: &'s mut TypeContext<'a>,
    committed: bool,
}

impl<'s, 'a> AssignmentScope<'s, 'a> {
    pub fn new(ctx: &'s mut TypeContext<'a>) -> AssignmentScope<'s, 'a> {
        ctx.push();
        AssignmentScope {
            ctx,
            committed: false,
        }
    }

    pub fn ctx(&mut self) -> &mut TypeContext<'a> {
        self.ctx
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for AssignmentScope<'_, '_> {
    fn drop(&mut self) {
        if self.committed {
            self.ctx.commit();
        } else {
            self.ctx.pop();
        }
    }
}
