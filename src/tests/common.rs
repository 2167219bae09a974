use crate::engine::{blast_goal, BlastError, BlastOptions, Goal};
use crate::environment::Environment;
use crate::expr::{BinderKind, ExprId, Name, Terms};
use crate::level::Level;

/// A small environment with a few propositional axioms, enough for the
/// search scenarios. Hypotheses are built as external local constants.
pub struct Fixture {
    pub terms: Terms,
    pub env: Environment,
    next_local: u32,
}

impl Fixture {
    pub fn new() -> Fixture {
        let mut terms = Terms::new();
        let mut env = Environment::new();
        let prop = terms.mk_sort(Level::Zero);
        for name in ["P", "Q", "A", "B", "Tricky", "Dead"] {
            env.add_axiom(Name::new(name), vec![], prop);
        }
        let prop_to_prop = terms.mk_pi(Name::new("p"), prop, prop, BinderKind::Explicit);
        env.add_axiom(Name::new("Wrap"), vec![], prop_to_prop);
        Fixture {
            terms,
            env,
            next_local: 0,
        }
    }

    pub fn prop(&mut self) -> ExprId {
        self.terms.mk_sort(Level::Zero)
    }

    pub fn konst(&mut self, name: &str) -> ExprId {
        self.terms.mk_const(Name::new(name), vec![])
    }

    /// An external local constant with a distinct unique name.
    pub fn local(&mut self, pretty: &str, ty: ExprId) -> ExprId {
        let unique = Name::new(&format!("{}.{}", pretty, self.next_local));
        self.next_local += 1;
        self.terms.mk_local(unique, Name::new(pretty), ty)
    }

    pub fn arrow(&mut self, from: ExprId, to: ExprId) -> ExprId {
        self.terms
            .mk_pi(Name::new("h"), from, to, BinderKind::Explicit)
    }

    /// An external metavariable `?name : ty`.
    pub fn meta(&mut self, name: &str, ty: ExprId) -> ExprId {
        self.terms.mk_meta(Name::new(name), ty)
    }

    pub fn prove(&mut self, goal: &Goal) -> Option<ExprId> {
        self.prove_with(BlastOptions::default(), goal)
            .expect("goal should internalize")
    }

    pub fn prove_with(
        &mut self,
        options: BlastOptions,
        goal: &Goal,
    ) -> Result<Option<ExprId>, BlastError> {
        blast_goal(&self.env, &mut self.terms, options, &[], &[], goal)
    }
}
