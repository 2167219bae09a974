use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::level::Level;

/// A hierarchical-name stand-in. Uniqueness is by full string; the
/// internalizer and the fresh-local generator rely on that.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Name(String);

impl Name {
    pub fn new(s: &str) -> Name {
        Name(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Name {
        Name::new(s)
    }
}

/// Stable index of a hypothesis in the State's hypothesis table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct HypothesisId(u32);

impl HypothesisId {
    pub const fn new(id: u32) -> HypothesisId {
        HypothesisId(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HypothesisId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Stable index of a term metavariable declared in the State.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MetavarId(u32);

impl MetavarId {
    pub const fn new(id: u32) -> MetavarId {
        MetavarId(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MetavarId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "?m{}", self.0)
    }
}

/// Stable index of a universe metavariable allocated by the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UnivMetaId(u32);

impl UnivMetaId {
    pub const fn new(id: u32) -> UnivMetaId {
        UnivMetaId(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for UnivMetaId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "?u{}", self.0)
    }
}

/// Binder annotation, carried through introduction and re-abstraction
/// but otherwise inert to the search.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
pub enum BinderKind {
    #[default]
    Explicit,
    Implicit,
    StrictImplicit,
    InstImplicit,
}

/// An interned expression. Equal ids denote structurally equal terms,
/// so equality and hashing are id operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The expression constructors. `Var` is a de Bruijn index. `Local` and
/// `Meta` are the caller's local constants and metavariables (unique
/// name, pretty name where applicable, type). `Href` and `Mref` are the
/// engine's own leaves; they carry no type because the State owns their
/// declarations.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ExprData {
    Var(u32),
    Sort(Level),
    Const(Name, Vec<Level>),
    Local(Name, Name, ExprId),
    Meta(Name, ExprId),
    App(ExprId, ExprId),
    Lambda(Name, ExprId, ExprId, BinderKind),
    Pi(Name, ExprId, ExprId, BinderKind),
    Macro(Name, Vec<ExprId>),
    Href(HypothesisId),
    Mref(MetavarId),
}

/// The hash-consed expression arena. Append-only: interning the same
/// data twice yields the same id, and nothing is ever removed, so
/// engine snapshots never have to copy it.
pub struct Terms {
    data: Vec<ExprData>,
    intern: HashMap<ExprData, ExprId>,
    next_fresh: u32,
}

impl Terms {
    pub fn new() -> Terms {
        Terms {
            data: vec![],
            intern: HashMap::new(),
            next_fresh: 0,
        }
    }

    pub fn mk(&mut self, e: ExprData) -> ExprId {
        if let Some(id) = self.intern.get(&e) {
            return *id;
        }
        let id = ExprId(self.data.len() as u32);
        self.data.push(e.clone());
        self.intern.insert(e, id);
        id
    }

    pub fn get(&self, id: ExprId) -> &ExprData {
        &self.data[id.index()]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn mk_var(&mut self, idx: u32) -> ExprId {
        self.mk(ExprData::Var(idx))
    }

    pub fn mk_sort(&mut self, l: Level) -> ExprId {
        self.mk(ExprData::Sort(l))
    }

    pub fn mk_const(&mut self, name: Name, levels: Vec<Level>) -> ExprId {
        self.mk(ExprData::Const(name, levels))
    }

    pub fn mk_app(&mut self, f: ExprId, a: ExprId) -> ExprId {
        self.mk(ExprData::App(f, a))
    }

    pub fn mk_app_many(&mut self, f: ExprId, args: &[ExprId]) -> ExprId {
        let mut e = f;
        for a in args {
            e = self.mk_app(e, *a);
        }
        e
    }

    pub fn mk_lambda(&mut self, name: Name, domain: ExprId, body: ExprId, bk: BinderKind) -> ExprId {
        self.mk(ExprData::Lambda(name, domain, body, bk))
    }

    pub fn mk_pi(&mut self, name: Name, domain: ExprId, body: ExprId, bk: BinderKind) -> ExprId {
        self.mk(ExprData::Pi(name, domain, body, bk))
    }

    pub fn mk_local(&mut self, unique: Name, pretty: Name, ty: ExprId) -> ExprId {
        self.mk(ExprData::Local(unique, pretty, ty))
    }

    pub fn mk_meta(&mut self, name: Name, ty: ExprId) -> ExprId {
        self.mk(ExprData::Meta(name, ty))
    }

    pub fn mk_href(&mut self, h: HypothesisId) -> ExprId {
        self.mk(ExprData::Href(h))
    }

    pub fn mk_mref(&mut self, m: MetavarId) -> ExprId {
        self.mk(ExprData::Mref(m))
    }

    /// A local constant with a generated unique name. Used when a
    /// traversal needs to cross a binder; such locals must never leak
    /// into assignments visible to the caller.
    pub fn fresh_local(&mut self, pretty: &str, ty: ExprId) -> ExprId {
        let unique = Name::new(&format!("_fresh.{}.{}", pretty, self.next_fresh));
        self.next_fresh += 1;
        self.mk_local(unique, Name::new(pretty), ty)
    }

    pub fn is_tmp_local(&self, e: ExprId) -> bool {
        match self.get(e) {
            ExprData::Local(unique, _, _) => unique.as_str().starts_with("_fresh."),
            _ => false,
        }
    }

    /// Strips a curried application down to its head and arguments.
    pub fn get_app_args(&self, e: ExprId) -> (ExprId, Vec<ExprId>) {
        let mut args = vec![];
        let mut f = e;
        while let ExprData::App(g, a) = self.get(f) {
            args.push(*a);
            f = *g;
        }
        args.reverse();
        (f, args)
    }

    pub fn get_app_fn(&self, e: ExprId) -> ExprId {
        let mut f = e;
        while let ExprData::App(g, _) = self.get(f) {
            f = *g;
        }
        f
    }

    /// True when the head of the application spine is an external
    /// metavariable.
    pub fn is_meta_app(&self, e: ExprId) -> bool {
        matches!(self.get(self.get_app_fn(e)), ExprData::Meta(_, _))
    }

    /// True when `e` has no free de Bruijn variables.
    pub fn closed(&self, e: ExprId) -> bool {
        self.closed_from(e, 0)
    }

    fn closed_from(&self, e: ExprId, depth: u32) -> bool {
        match self.get(e) {
            ExprData::Var(i) => *i < depth,
            ExprData::Sort(_)
            | ExprData::Const(_, _)
            | ExprData::Href(_)
            | ExprData::Mref(_) => true,
            ExprData::Local(_, _, ty) => self.closed_from(*ty, depth),
            ExprData::Meta(_, ty) => self.closed_from(*ty, depth),
            ExprData::App(f, a) => self.closed_from(*f, depth) && self.closed_from(*a, depth),
            ExprData::Lambda(_, d, b, _) | ExprData::Pi(_, d, b, _) => {
                self.closed_from(*d, depth) && self.closed_from(*b, depth + 1)
            }
            ExprData::Macro(_, args) => args.iter().all(|a| self.closed_from(*a, depth)),
        }
    }

    /// True when a binder body uses the variable the binder would
    /// capture. Used to print non-dependent Pis as arrows.
    pub fn has_free_var_zero(&self, e: ExprId) -> bool {
        self.has_var_at(e, 0)
    }

    fn has_var_at(&self, e: ExprId, depth: u32) -> bool {
        match self.get(e) {
            ExprData::Var(i) => *i == depth,
            ExprData::Sort(_)
            | ExprData::Const(_, _)
            | ExprData::Href(_)
            | ExprData::Mref(_) => false,
            ExprData::Local(_, _, ty) | ExprData::Meta(_, ty) => self.has_var_at(*ty, depth),
            ExprData::App(f, a) => self.has_var_at(*f, depth) || self.has_var_at(*a, depth),
            ExprData::Lambda(_, d, b, _) | ExprData::Pi(_, d, b, _) => {
                self.has_var_at(*d, depth) || self.has_var_at(*b, depth + 1)
            }
            ExprData::Macro(_, args) => args.iter().any(|a| self.has_var_at(*a, depth)),
        }
    }

    /// Pre-order traversal. `f` returns whether to descend into the
    /// children of the visited subterm.
    pub fn for_each(&self, e: ExprId, f: &mut impl FnMut(ExprId) -> bool) {
        if !f(e) {
            return;
        }
        match self.get(e) {
            ExprData::Var(_)
            | ExprData::Sort(_)
            | ExprData::Const(_, _)
            | ExprData::Href(_)
            | ExprData::Mref(_) => {}
            ExprData::Local(_, _, ty) | ExprData::Meta(_, ty) => self.for_each(*ty, f),
            ExprData::App(g, a) => {
                let (g, a) = (*g, *a);
                self.for_each(g, f);
                self.for_each(a, f);
            }
            ExprData::Lambda(_, d, b, _) | ExprData::Pi(_, d, b, _) => {
                let (d, b) = (*d, *b);
                self.for_each(d, f);
                self.for_each(b, f);
            }
            ExprData::Macro(_, args) => {
                for a in args.clone() {
                    self.for_each(a, f);
                }
            }
        }
    }

    /// True when `key` occurs as a subterm of `e`.
    pub fn occurs(&self, e: ExprId, key: ExprId) -> bool {
        let mut found = false;
        self.for_each(e, &mut |x| {
            if x == key {
                found = true;
            }
            !found
        });
        found
    }

    /// Shifts the free de Bruijn variables of `e` up by `amount`.
    pub fn lift(&mut self, e: ExprId, amount: u32) -> ExprId {
        if amount == 0 {
            return e;
        }
        let mut memo = HashMap::new();
        self.lift_from(e, 0, amount, &mut memo)
    }

    fn lift_from(
        &mut self,
        e: ExprId,
        depth: u32,
        amount: u32,
        memo: &mut HashMap<(ExprId, u32), ExprId>,
    ) -> ExprId {
        if self.closed_from(e, depth) {
            return e;
        }
        if let Some(r) = memo.get(&(e, depth)) {
            return *r;
        }
        let r = match self.get(e).clone() {
            // closed_from already dealt with bound occurrences
            ExprData::Var(i) => self.mk_var(i + amount),
            ExprData::Local(u, p, ty) => {
                let ty = self.lift_from(ty, depth, amount, memo);
                self.mk_local(u, p, ty)
            }
            ExprData::Meta(n, ty) => {
                let ty = self.lift_from(ty, depth, amount, memo);
                self.mk_meta(n, ty)
            }
            ExprData::App(f, a) => {
                let f = self.lift_from(f, depth, amount, memo);
                let a = self.lift_from(a, depth, amount, memo);
                self.mk_app(f, a)
            }
            ExprData::Lambda(n, d, b, bk) => {
                let d = self.lift_from(d, depth, amount, memo);
                let b = self.lift_from(b, depth + 1, amount, memo);
                self.mk_lambda(n, d, b, bk)
            }
            ExprData::Pi(n, d, b, bk) => {
                let d = self.lift_from(d, depth, amount, memo);
                let b = self.lift_from(b, depth + 1, amount, memo);
                self.mk_pi(n, d, b, bk)
            }
            ExprData::Macro(n, args) => {
                let args = args
                    .iter()
                    .map(|a| self.lift_from(*a, depth, amount, memo))
                    .collect();
                self.mk(ExprData::Macro(n, args))
            }
            ExprData::Sort(_) | ExprData::Const(_, _) | ExprData::Href(_) | ExprData::Mref(_) => e,
        };
        memo.insert((e, depth), r);
        r
    }

    /// Substitutes the outermost bound variables of an open term.
    /// `subst[0]` replaces `Var(0)` (the innermost binder), `subst[1]`
    /// replaces `Var(1)`, and so on; variables beyond the substitution
    /// are shifted down. Open substituted values are lifted past the
    /// binders they cross.
    pub fn instantiate(&mut self, e: ExprId, subst: &[ExprId]) -> ExprId {
        if subst.is_empty() || self.closed(e) {
            return e;
        }
        let mut memo = HashMap::new();
        self.instantiate_at(e, subst, 0, &mut memo)
    }

    fn instantiate_at(
        &mut self,
        e: ExprId,
        subst: &[ExprId],
        depth: u32,
        memo: &mut HashMap<(ExprId, u32), ExprId>,
    ) -> ExprId {
        if self.closed_from(e, depth) {
            return e;
        }
        if let Some(r) = memo.get(&(e, depth)) {
            return *r;
        }
        let r = match self.get(e).clone() {
            ExprData::Var(i) => {
                if i < depth {
                    e
                } else {
                    let k = (i - depth) as usize;
                    if k < subst.len() {
                        self.lift(subst[k], depth)
                    } else {
                        self.mk_var(i - subst.len() as u32)
                    }
                }
            }
            ExprData::Local(u, p, ty) => {
                let ty = self.instantiate_at(ty, subst, depth, memo);
                self.mk_local(u, p, ty)
            }
            ExprData::Meta(n, ty) => {
                let ty = self.instantiate_at(ty, subst, depth, memo);
                self.mk_meta(n, ty)
            }
            ExprData::App(f, a) => {
                let f = self.instantiate_at(f, subst, depth, memo);
                let a = self.instantiate_at(a, subst, depth, memo);
                self.mk_app(f, a)
            }
            ExprData::Lambda(n, d, b, bk) => {
                let d = self.instantiate_at(d, subst, depth, memo);
                let b = self.instantiate_at(b, subst, depth + 1, memo);
                self.mk_lambda(n, d, b, bk)
            }
            ExprData::Pi(n, d, b, bk) => {
                let d = self.instantiate_at(d, subst, depth, memo);
                let b = self.instantiate_at(b, subst, depth + 1, memo);
                self.mk_pi(n, d, b, bk)
            }
            ExprData::Macro(n, args) => {
                let args = args
                    .iter()
                    .map(|a| self.instantiate_at(*a, subst, depth, memo))
                    .collect();
                self.mk(ExprData::Macro(n, args))
            }
            ExprData::Sort(_) | ExprData::Const(_, _) | ExprData::Href(_) | ExprData::Mref(_) => e,
        };
        memo.insert((e, depth), r);
        r
    }

    /// Replaces each occurrence of `keys[i]` (a `Local` or `Href` leaf)
    /// by the bound variable that a subsequent binder chain over the
    /// keys, outermost first, would capture: `keys[n-1]` becomes
    /// `Var(0)` at depth zero.
    pub fn abstract_over(&mut self, e: ExprId, keys: &[ExprId]) -> ExprId {
        if keys.is_empty() {
            return e;
        }
        let mut memo = HashMap::new();
        self.abstract_at(e, keys, 0, &mut memo)
    }

    fn abstract_at(
        &mut self,
        e: ExprId,
        keys: &[ExprId],
        depth: u32,
        memo: &mut HashMap<(ExprId, u32), ExprId>,
    ) -> ExprId {
        if let Some(pos) = keys.iter().position(|k| *k == e) {
            return self.mk_var(depth + (keys.len() - 1 - pos) as u32);
        }
        if let Some(r) = memo.get(&(e, depth)) {
            return *r;
        }
        let r = match self.get(e).clone() {
            ExprData::Var(_)
            | ExprData::Sort(_)
            | ExprData::Const(_, _)
            | ExprData::Href(_)
            | ExprData::Mref(_) => e,
            ExprData::Local(u, p, ty) => {
                let ty = self.abstract_at(ty, keys, depth, memo);
                self.mk_local(u, p, ty)
            }
            ExprData::Meta(n, ty) => {
                let ty = self.abstract_at(ty, keys, depth, memo);
                self.mk_meta(n, ty)
            }
            ExprData::App(f, a) => {
                let f = self.abstract_at(f, keys, depth, memo);
                let a = self.abstract_at(a, keys, depth, memo);
                self.mk_app(f, a)
            }
            ExprData::Lambda(n, d, b, bk) => {
                let d = self.abstract_at(d, keys, depth, memo);
                let b = self.abstract_at(b, keys, depth + 1, memo);
                self.mk_lambda(n, d, b, bk)
            }
            ExprData::Pi(n, d, b, bk) => {
                let d = self.abstract_at(d, keys, depth, memo);
                let b = self.abstract_at(b, keys, depth + 1, memo);
                self.mk_pi(n, d, b, bk)
            }
            ExprData::Macro(n, args) => {
                let args = args
                    .iter()
                    .map(|a| self.abstract_at(*a, keys, depth, memo))
                    .collect();
                self.mk(ExprData::Macro(n, args))
            }
        };
        memo.insert((e, depth), r);
        r
    }

    /// Substitutes universe parameters throughout an expression, used
    /// when unfolding a universe-polymorphic constant.
    pub fn instantiate_univ_params(
        &mut self,
        e: ExprId,
        params: &[Name],
        levels: &[Level],
    ) -> ExprId {
        if params.is_empty() {
            return e;
        }
        match self.get(e).clone() {
            ExprData::Var(_) | ExprData::Href(_) | ExprData::Mref(_) => e,
            ExprData::Sort(l) => {
                let l = l.instantiate_params(params, levels);
                self.mk_sort(l)
            }
            ExprData::Const(n, ls) => {
                let ls = ls
                    .iter()
                    .map(|l| l.instantiate_params(params, levels))
                    .collect();
                self.mk_const(n, ls)
            }
            ExprData::Local(u, p, ty) => {
                let ty = self.instantiate_univ_params(ty, params, levels);
                self.mk_local(u, p, ty)
            }
            ExprData::Meta(n, ty) => {
                let ty = self.instantiate_univ_params(ty, params, levels);
                self.mk_meta(n, ty)
            }
            ExprData::App(f, a) => {
                let f = self.instantiate_univ_params(f, params, levels);
                let a = self.instantiate_univ_params(a, params, levels);
                self.mk_app(f, a)
            }
            ExprData::Lambda(n, d, b, bk) => {
                let d = self.instantiate_univ_params(d, params, levels);
                let b = self.instantiate_univ_params(b, params, levels);
                self.mk_lambda(n, d, b, bk)
            }
            ExprData::Pi(n, d, b, bk) => {
                let d = self.instantiate_univ_params(d, params, levels);
                let b = self.instantiate_univ_params(b, params, levels);
                self.mk_pi(n, d, b, bk)
            }
            ExprData::Macro(n, args) => {
                let args = args
                    .iter()
                    .map(|a| self.instantiate_univ_params(*a, params, levels))
                    .collect();
                self.mk(ExprData::Macro(n, args))
            }
        }
    }

    /// True when `e` contains an `Href`, `Mref`, or `Uref` leaf.
    pub fn has_engine_refs(&self, e: ExprId) -> bool {
        let mut found = false;
        self.for_each(e, &mut |x| {
            match self.get(x) {
                ExprData::Href(_) | ExprData::Mref(_) => found = true,
                ExprData::Sort(l) => {
                    if l.has_uref() {
                        found = true;
                    }
                }
                ExprData::Const(_, ls) => {
                    if ls.iter().any(|l| l.has_uref()) {
                        found = true;
                    }
                }
                _ => {}
            }
            !found
        });
        found
    }
}

impl Default for Terms {
    fn default() -> Terms {
        Terms::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_gives_stable_ids() {
        let mut terms = Terms::new();
        let a = terms.mk_var(0);
        let b = terms.mk_var(0);
        assert_eq!(a, b);
        let c = terms.mk_var(1);
        assert_ne!(a, c);
    }

    #[test]
    fn test_get_app_args() {
        let mut terms = Terms::new();
        let f = terms.mk_const(Name::new("f"), vec![]);
        let x = terms.mk_const(Name::new("x"), vec![]);
        let y = terms.mk_const(Name::new("y"), vec![]);
        let app = terms.mk_app_many(f, &[x, y]);
        let (head, args) = terms.get_app_args(app);
        assert_eq!(head, f);
        assert_eq!(args, vec![x, y]);
    }

    #[test]
    fn test_instantiate_then_abstract_round_trip() {
        let mut terms = Terms::new();
        let prop = terms.mk_sort(Level::Zero);
        let body = terms.mk_var(0);
        // fun (x : Prop) => x, applied at the body level
        let local = terms.fresh_local("x", prop);
        let opened = terms.instantiate(body, &[local]);
        assert_eq!(opened, local);
        let closed = terms.abstract_over(opened, &[local]);
        assert_eq!(closed, body);
    }

    #[test]
    fn test_abstract_over_two_keys() {
        let mut terms = Terms::new();
        let h0 = terms.mk_href(HypothesisId::new(0));
        let h1 = terms.mk_href(HypothesisId::new(1));
        let pair = terms.mk_app(h0, h1);
        let abstracted = terms.abstract_over(pair, &[h0, h1]);
        // outermost key h0 gets the larger index
        let v1 = terms.mk_var(1);
        let v0 = terms.mk_var(0);
        let expected = terms.mk_app(v1, v0);
        assert_eq!(abstracted, expected);
    }

    #[test]
    fn test_closed() {
        let mut terms = Terms::new();
        let v = terms.mk_var(0);
        assert!(!terms.closed(v));
        let prop = terms.mk_sort(Level::Zero);
        let id_fn = terms.mk_lambda(Name::new("x"), prop, v, BinderKind::Explicit);
        assert!(terms.closed(id_fn));
    }

    #[test]
    fn test_has_engine_refs() {
        let mut terms = Terms::new();
        let c = terms.mk_const(Name::new("c"), vec![]);
        assert!(!terms.has_engine_refs(c));
        let h = terms.mk_href(HypothesisId::new(3));
        let app = terms.mk_app(c, h);
        assert!(terms.has_engine_refs(app));
    }
}
