use std::collections::HashMap;

use crate::expr::{ExprData, ExprId, MetavarId, Name, Terms, UnivMetaId};
use crate::level::Level;
use crate::state::State;

/// Rewrites a proof found by the search into the caller's
/// representation. Hypothesis references become the original local
/// constants (definitional values are inlined), assigned metavariables
/// are instantiated to a fixed point, and anything still unassigned is
/// reconstituted as the external metavariable application it came from.
/// Expressions without engine leaves come back unchanged.
pub struct Externalizer<'a> {
    terms: &'a mut Terms,
    state: &'a State,
    mref2meta: &'a HashMap<MetavarId, ExprId>,
    uref2uvar: &'a HashMap<UnivMetaId, Name>,
}

impl<'a> Externalizer<'a> {
    pub fn new(
        terms: &'a mut Terms,
        state: &'a State,
        mref2meta: &'a HashMap<MetavarId, ExprId>,
        uref2uvar: &'a HashMap<UnivMetaId, Name>,
    ) -> Externalizer<'a> {
        Externalizer {
            terms,
            state,
            mref2meta,
            uref2uvar,
        }
    }

    pub fn externalize(&mut self, e: ExprId) -> ExprId {
        match self.terms.get(e).clone() {
            ExprData::Href(h) => {
                let hyp = self.state.get_hypothesis_decl(h);
                if let Some(v) = hyp.value {
                    return self.externalize(v);
                }
                match hyp.source {
                    Some(source) => source,
                    // a search-introduced hypothesis leaking out of its
                    // abstraction; nothing external to map it to
                    None => e,
                }
            }
            ExprData::Mref(m) => {
                let v = self.state.instantiate_urefs_mrefs(self.terms, e);
                if v != e {
                    return self.externalize(v);
                }
                match self.mref2meta.get(&m) {
                    Some(original) => *original,
                    None => e,
                }
            }
            ExprData::Sort(l) => {
                let l = self.externalize_level(&l);
                self.terms.mk_sort(l)
            }
            ExprData::Const(n, ls) => {
                let ls = ls.iter().map(|l| self.externalize_level(l)).collect();
                self.terms.mk_const(n, ls)
            }
            ExprData::Var(_) | ExprData::Local(_, _, _) | ExprData::Meta(_, _) => e,
            ExprData::App(f, a) => {
                let f = self.externalize(f);
                let a = self.externalize(a);
                self.terms.mk_app(f, a)
            }
            ExprData::Lambda(n, d, b, bk) => {
                let d = self.externalize(d);
                let b = self.externalize(b);
                self.terms.mk_lambda(n, d, b, bk)
            }
            ExprData::Pi(n, d, b, bk) => {
                let d = self.externalize(d);
                let b = self.externalize(b);
                self.terms.mk_pi(n, d, b, bk)
            }
            ExprData::Macro(n, args) => {
                let args = args.iter().map(|a| self.externalize(*a)).collect();
                self.terms.mk(ExprData::Macro(n, args))
            }
        }
    }

    fn externalize_level(&self, l: &Level) -> Level {
        match l {
            Level::Zero | Level::Param(_) | Level::Global(_) | Level::Meta(_) => l.clone(),
            Level::Succ(inner) => self.externalize_level(inner).succ(),
            Level::Max(a, b) => {
                Level::max(self.externalize_level(a), self.externalize_level(b))
            }
            Level::Imax(a, b) => {
                Level::imax(self.externalize_level(a), self.externalize_level(b))
            }
            Level::Uref(u) => match self.state.get_uref_assignment(*u) {
                Some(v) => {
                    let v = v.clone();
                    self.externalize_level(&v)
                }
                None => match self.uref2uvar.get(u) {
                    Some(name) => Level::Meta(name.clone()),
                    None => l.clone(),
                },
            },
        }
    }
}
