use std::collections::{HashMap, HashSet};

use crate::engine::BlastError;
use crate::environment::Environment;
use crate::expr::{ExprData, ExprId, HypothesisId, MetavarId, Name, Terms, UnivMetaId};
use crate::level::Level;
use crate::state::State;
use crate::type_context::TypeContext;

/// Rewrites an external expression into the State's representation:
/// local constants become hypothesis references, universe metavariables
/// become urefs, and metavariable applications become mref applications
/// under the higher-order-pattern restriction.
///
/// The uvar/mvar memo tables outlive a single rewrite; they are owned
/// by the engine so that the same external metavariable maps to the
/// same mref across the hypotheses and the target, and so that the
/// externalizer can later reconstitute whatever stayed unassigned.
pub struct Internalizer<'a> {
    terms: &'a mut Terms,
    env: &'a Environment,
    state: &'a mut State,
    unfold_hints: &'a HashSet<Name>,
    uvar2uref: &'a mut HashMap<Name, UnivMetaId>,
    uref2uvar: &'a mut HashMap<UnivMetaId, Name>,
    mvar2meta_mref: &'a mut HashMap<Name, (ExprId, MetavarId)>,
    mref2meta: &'a mut HashMap<MetavarId, ExprId>,
    local2href: &'a mut HashMap<Name, ExprId>,
}

impl<'a> Internalizer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        terms: &'a mut Terms,
        env: &'a Environment,
        state: &'a mut State,
        unfold_hints: &'a HashSet<Name>,
        uvar2uref: &'a mut HashMap<Name, UnivMetaId>,
        uref2uvar: &'a mut HashMap<UnivMetaId, Name>,
        mvar2meta_mref: &'a mut HashMap<Name, (ExprId, MetavarId)>,
        mref2meta: &'a mut HashMap<MetavarId, ExprId>,
        local2href: &'a mut HashMap<Name, ExprId>,
    ) -> Internalizer<'a> {
        Internalizer {
            terms,
            env,
            state,
            unfold_hints,
            uvar2uref,
            uref2uvar,
            mvar2meta_mref,
            mref2meta,
            local2href,
        }
    }

    fn unsupported(&self, e: ExprId) -> BlastError {
        BlastError::UnsupportedMetavarOcc(format!(
            "goal contains a metavariable application that is not supported: {}",
            crate::display::DisplayExpr::new(self.terms, e)
        ))
    }

    pub fn to_level(&mut self, l: &Level) -> Level {
        match l {
            Level::Zero | Level::Param(_) | Level::Global(_) | Level::Uref(_) => l.clone(),
            Level::Succ(inner) => self.to_level(inner).succ(),
            Level::Max(a, b) => Level::max(self.to_level(a), self.to_level(b)),
            Level::Imax(a, b) => Level::imax(self.to_level(a), self.to_level(b)),
            Level::Meta(n) => {
                if let Some(u) = self.uvar2uref.get(n) {
                    return Level::Uref(*u);
                }
                let u = self.state.mk_uref();
                self.uvar2uref.insert(n.clone(), u);
                self.uref2uvar.insert(u, n.clone());
                Level::Uref(u)
            }
        }
    }

    pub fn internalize(&mut self, e: ExprId) -> Result<ExprId, BlastError> {
        match self.terms.get(e).clone() {
            ExprData::Var(_) | ExprData::Href(_) | ExprData::Mref(_) => Ok(e),
            ExprData::Sort(l) => {
                let l = self.to_level(&l);
                Ok(self.terms.mk_sort(l))
            }
            ExprData::Const(n, ls) => {
                let ls = ls.iter().map(|l| self.to_level(l)).collect();
                Ok(self.terms.mk_const(n, ls))
            }
            ExprData::Macro(n, args) => {
                let mut new_args = Vec::with_capacity(args.len());
                for a in args {
                    new_args.push(self.internalize(a)?);
                }
                Ok(self.terms.mk(ExprData::Macro(n, new_args)))
            }
            ExprData::Local(unique, _, _) => match self.local2href.get(&unique) {
                Some(href) => Ok(*href),
                None => Err(BlastError::IllFormedGoal(format!(
                    "ill-formed input goal, free local constant '{}'",
                    unique
                ))),
            },
            ExprData::Meta(_, _) => self.visit_meta_app(e),
            ExprData::App(_, _) => {
                if self.terms.is_meta_app(e) {
                    self.visit_meta_app(e)
                } else {
                    let (f, a) = match self.terms.get(e) {
                        ExprData::App(f, a) => (*f, *a),
                        _ => unreachable!(),
                    };
                    let f = self.internalize(f)?;
                    let a = self.internalize(a)?;
                    Ok(self.terms.mk_app(f, a))
                }
            }
            ExprData::Lambda(n, d, b, bk) => {
                let d = self.internalize(d)?;
                let b = self.internalize(b)?;
                Ok(self.terms.mk_lambda(n, d, b, bk))
            }
            ExprData::Pi(n, d, b, bk) => {
                let d = self.internalize(d)?;
                let b = self.internalize(b)?;
                Ok(self.terms.mk_pi(n, d, b, bk))
            }
        }
    }

    /// A metavariable application `?m a1 ... an`. The longest closed
    /// prefix of the arguments is the pattern and must consist of
    /// distinct local constants, each already mapped to a hypothesis;
    /// those hypotheses become the admissible context of the fresh
    /// mref. On a reoccurrence the prefix must match the recorded one
    /// positionally. Everything past the prefix is rewritten into
    /// ordinary application arguments.
    fn visit_meta_app(&mut self, e: ExprId) -> Result<ExprId, BlastError> {
        let (mvar, args) = self.terms.get_app_args(e);
        let mvar_name = match self.terms.get(mvar) {
            ExprData::Meta(n, _) => n.clone(),
            _ => return Err(self.unsupported(e)),
        };
        if let Some((recorded, mref)) = self.mvar2meta_mref.get(&mvar_name).cloned() {
            let (_, decl_args) = self.terms.get_app_args(recorded);
            if decl_args.len() > args.len() {
                return Err(self.unsupported(e));
            }
            for i in 0..decl_args.len() {
                let matches = match (self.terms.get(decl_args[i]), self.terms.get(args[i])) {
                    (ExprData::Local(u1, _, _), ExprData::Local(u2, _, _)) => u1 == u2,
                    _ => decl_args[i] == args[i],
                };
                if !matches {
                    return Err(self.unsupported(e));
                }
            }
            let rest = self.internalize_all(&args[decl_args.len()..])?;
            let mref_e = self.terms.mk_mref(mref);
            return Ok(self.terms.mk_app_many(mref_e, &rest));
        }

        // First encounter: determine the pattern prefix.
        let mut context: Vec<HypothesisId> = vec![];
        let mut prefix_sz = 0;
        while prefix_sz < args.len() {
            let a = args[prefix_sz];
            if !self.terms.closed(a) {
                break;
            }
            let unique = match self.terms.get(a) {
                ExprData::Local(unique, _, _) => unique.clone(),
                _ => return Err(self.unsupported(e)),
            };
            let duplicate = args[..prefix_sz].iter().any(|prev| {
                matches!(self.terms.get(*prev), ExprData::Local(u2, _, _) if *u2 == unique)
            });
            if duplicate {
                return Err(self.unsupported(e));
            }
            let href = match self.local2href.get(&unique) {
                Some(href) => *href,
                None => return Err(self.unsupported(e)),
            };
            match self.terms.get(href) {
                ExprData::Href(h) => context.push(*h),
                _ => return Err(self.unsupported(e)),
            }
            prefix_sz += 1;
        }

        let aux = self.terms.mk_app_many(mvar, &args[..prefix_sz]);
        let ty = {
            let mut tctx = TypeContext::new(
                &mut *self.terms,
                self.env,
                &mut *self.state,
                self.unfold_hints,
            );
            tctx.infer(aux)?
        };
        let ty = self.internalize(ty)?;
        let mref = self.state.mk_metavar(Some(context), ty);
        self.mvar2meta_mref.insert(mvar_name, (aux, mref));
        self.mref2meta.insert(mref, aux);
        let rest = self.internalize_all(&args[prefix_sz..])?;
        let mref_e = self.terms.mk_mref(mref);
        Ok(self.terms.mk_app_many(mref_e, &rest))
    }

    fn internalize_all(&mut self, args: &[ExprId]) -> Result<Vec<ExprId>, BlastError> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            out.push(self.internalize(*a)?);
        }
        Ok(out)
    }
}
