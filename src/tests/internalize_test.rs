use std::collections::{HashMap, HashSet};

use crate::engine::BlastError;
use crate::expr::{ExprData, ExprId, MetavarId, Name, UnivMetaId};
use crate::externalize::Externalizer;
use crate::internalize::Internalizer;
use crate::level::Level;
use crate::state::State;
use crate::tests::common::Fixture;

/// The internalizer's working maps, bundled so the tests can drive a
/// rewrite and then hand the leftovers to the externalizer.
struct Session {
    state: State,
    uvar2uref: HashMap<Name, UnivMetaId>,
    uref2uvar: HashMap<UnivMetaId, Name>,
    mvar2meta_mref: HashMap<Name, (ExprId, MetavarId)>,
    mref2meta: HashMap<MetavarId, ExprId>,
    local2href: HashMap<Name, ExprId>,
    unfold_hints: HashSet<Name>,
}

impl Session {
    fn new() -> Session {
        Session {
            state: State::new(),
            uvar2uref: HashMap::new(),
            uref2uvar: HashMap::new(),
            mvar2meta_mref: HashMap::new(),
            mref2meta: HashMap::new(),
            local2href: HashMap::new(),
            unfold_hints: HashSet::new(),
        }
    }

    /// Registers `local` as a goal hypothesis, the way `to_state` does.
    fn add_hypothesis(&mut self, fx: &mut Fixture, local: ExprId) {
        let (unique, pretty, ty) = match fx.terms.get(local) {
            ExprData::Local(unique, pretty, ty) => (unique.clone(), pretty.clone(), *ty),
            _ => panic!("hypothesis must be a local"),
        };
        let h = self.state.mk_hypothesis(pretty, ty, Some(local));
        let href = fx.terms.mk_href(h);
        self.local2href.insert(unique, href);
    }

    fn internalize(&mut self, fx: &mut Fixture, e: ExprId) -> Result<ExprId, BlastError> {
        let mut internalizer = Internalizer::new(
            &mut fx.terms,
            &fx.env,
            &mut self.state,
            &self.unfold_hints,
            &mut self.uvar2uref,
            &mut self.uref2uvar,
            &mut self.mvar2meta_mref,
            &mut self.mref2meta,
            &mut self.local2href,
        );
        internalizer.internalize(e)
    }

    fn externalize(&mut self, fx: &mut Fixture, e: ExprId) -> ExprId {
        let mut externalizer = Externalizer::new(
            &mut fx.terms,
            &self.state,
            &self.mref2meta,
            &self.uref2uvar,
        );
        externalizer.externalize(e)
    }
}

#[test]
fn test_local_becomes_href_and_back() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let x = fx.local("x", p);
    session.add_hypothesis(&mut fx, x);
    let p_imp_p = fx.arrow(p, p);
    let f = fx.local("f", p_imp_p);
    session.add_hypothesis(&mut fx, f);

    let f_x = fx.terms.mk_app(f, x);
    let internal = session.internalize(&mut fx, f_x).unwrap();
    let (head, args) = fx.terms.get_app_args(internal);
    assert!(matches!(fx.terms.get(head), ExprData::Href(_)));
    assert_eq!(args.len(), 1);
    assert!(matches!(fx.terms.get(args[0]), ExprData::Href(_)));

    let back = session.externalize(&mut fx, internal);
    assert_eq!(back, f_x);
}

#[test]
fn test_unmapped_local_is_ill_formed() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let stray = fx.local("stray", p);
    match session.internalize(&mut fx, stray) {
        Err(BlastError::IllFormedGoal(_)) => {}
        other => panic!("expected an ill-formed-goal error, got {:?}", other),
    }
}

#[test]
fn test_universe_metavariable_is_memoized() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let u = Level::Meta(Name::new("u"));
    let sort_u = fx.terms.mk_sort(u.clone());
    let first = session.internalize(&mut fx, sort_u).unwrap();
    let second = session.internalize(&mut fx, sort_u).unwrap();
    // both occurrences map to the same uref
    assert_eq!(first, second);
    match fx.terms.get(first) {
        ExprData::Sort(Level::Uref(_)) => {}
        other => panic!("expected a uref sort, got {:?}", other),
    }
}

#[test]
fn test_unassigned_uref_externalizes_to_the_original_uvar() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let u = Level::Meta(Name::new("u"));
    let sort_u = fx.terms.mk_sort(u);
    let internal = session.internalize(&mut fx, sort_u).unwrap();
    let back = session.externalize(&mut fx, internal);
    assert_eq!(back, sort_u);
}

#[test]
fn test_meta_app_prefix_becomes_the_context() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let prop = fx.prop();
    let x = fx.local("x", p);
    session.add_hypothesis(&mut fx, x);

    let m_ty = fx.arrow(p, prop);
    let m = fx.meta("m", m_ty);
    let m_x = fx.terms.mk_app(m, x);
    let internal = session.internalize(&mut fx, m_x).unwrap();

    // ?m x becomes a bare mref whose context is exactly [x's hypothesis]
    let mref = match fx.terms.get(internal) {
        ExprData::Mref(mref) => *mref,
        other => panic!("expected an mref, got {:?}", other),
    };
    let decl = session.state.get_metavar_decl(mref);
    assert_eq!(decl.context().len(), 1);
    assert_eq!(decl.ty, prop);
}

#[test]
fn test_meta_reoccurrence_with_matching_prefix() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let prop = fx.prop();
    let x = fx.local("x", p);
    session.add_hypothesis(&mut fx, x);

    let m_ty = fx.arrow(p, prop);
    let m = fx.meta("m", m_ty);
    let m_x = fx.terms.mk_app(m, x);
    let first = session.internalize(&mut fx, m_x).unwrap();
    let second = session.internalize(&mut fx, m_x).unwrap();
    assert_eq!(first, second);
    assert_eq!(session.state.num_metavars(), 1);
}

#[test]
fn test_meta_reoccurrence_mismatch_is_unsupported() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let prop = fx.prop();
    let x = fx.local("x", p);
    let y = fx.local("y", p);
    session.add_hypothesis(&mut fx, x);
    session.add_hypothesis(&mut fx, y);

    let m_ty = fx.arrow(p, prop);
    let m = fx.meta("m", m_ty);
    let m_x = fx.terms.mk_app(m, x);
    let m_y = fx.terms.mk_app(m, y);
    session.internalize(&mut fx, m_x).unwrap();
    match session.internalize(&mut fx, m_y) {
        Err(BlastError::UnsupportedMetavarOcc(_)) => {}
        other => panic!("expected an unsupported-metavariable error, got {:?}", other),
    }
}

#[test]
fn test_meta_app_with_non_local_prefix_is_unsupported() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let prop = fx.prop();
    let x = fx.local("x", p);
    session.add_hypothesis(&mut fx, x);
    let p_imp_p = fx.arrow(p, p);
    let f = fx.local("f", p_imp_p);
    session.add_hypothesis(&mut fx, f);

    let p_to_prop = fx.arrow(p, prop);
    let m_ty = fx.arrow(p, p_to_prop);
    let m = fx.meta("m", m_ty);
    let f_x = fx.terms.mk_app(f, x);
    let bad = fx.terms.mk_app_many(m, &[f_x, x]);
    match session.internalize(&mut fx, bad) {
        Err(BlastError::UnsupportedMetavarOcc(_)) => {}
        other => panic!("expected an unsupported-metavariable error, got {:?}", other),
    }
}

#[test]
fn test_unassigned_mref_reconstitutes_the_original_application() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let prop = fx.prop();
    let x = fx.local("x", p);
    session.add_hypothesis(&mut fx, x);

    let m_ty = fx.arrow(p, prop);
    let m = fx.meta("m", m_ty);
    let m_x = fx.terms.mk_app(m, x);
    let internal = session.internalize(&mut fx, m_x).unwrap();
    let back = session.externalize(&mut fx, internal);
    assert_eq!(back, m_x);
}

#[test]
fn test_assigned_mref_externalizes_to_its_value() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let prop = fx.prop();
    let m_ty = prop;
    let m = fx.meta("m", m_ty);
    let internal = session.internalize(&mut fx, m).unwrap();
    let mref = match fx.terms.get(internal) {
        ExprData::Mref(mref) => *mref,
        other => panic!("expected an mref, got {:?}", other),
    };
    session.state.assign_mref(mref, p);
    let back = session.externalize(&mut fx, internal);
    assert_eq!(back, p);
}

#[test]
fn test_externalization_is_idempotent_without_engine_refs() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let q = fx.konst("Q");
    let p_imp_q = fx.arrow(p, q);
    let v0 = fx.terms.mk_var(0);
    let lam = fx
        .terms
        .mk_lambda(Name::new("h"), p_imp_q, v0, Default::default());
    assert!(!fx.terms.has_engine_refs(lam));
    let once = session.externalize(&mut fx, lam);
    assert_eq!(once, lam);
    let twice = session.externalize(&mut fx, once);
    assert_eq!(twice, lam);
}

#[test]
fn test_hypothesis_value_is_inlined() {
    let mut fx = Fixture::new();
    let mut session = Session::new();
    let p = fx.konst("P");
    let hp = fx.local("hp", p);
    session.add_hypothesis(&mut fx, hp);
    // a let-like hypothesis whose value is the first hypothesis
    let h0 = fx.terms.mk_href(crate::expr::HypothesisId::new(0));
    let h1 = session
        .state
        .mk_hypothesis_with_value(Name::new("alias"), p, Some(h0), None);
    let h1_ref = fx.terms.mk_href(h1);
    let back = session.externalize(&mut fx, h1_ref);
    assert_eq!(back, hp);
}
