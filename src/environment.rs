use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::expr::{ExprId, Name};

/// How aggressively conversion may unfold a definition.
/// `Reducible` definitions unfold everywhere, including during the
/// internalizer's normalization pass. `Semireducible` definitions
/// unfold during conversion only. `Irreducible` definitions never
/// unfold.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
pub enum Reducibility {
    Reducible,
    #[default]
    Semireducible,
    Irreducible,
}

/// A constant declaration: axioms have no value, definitions do.
#[derive(Clone, Debug)]
pub struct Declaration {
    pub name: Name,
    pub univ_params: Vec<Name>,
    pub ty: ExprId,
    pub value: Option<ExprId>,
    pub reducibility: Reducibility,
}

/// Structure-projection metadata. Projections are treated as opaque by
/// the engine's conversion even when their definitions are reducible.
#[derive(Clone, Debug)]
pub struct ProjectionInfo {
    /// The constructor whose field this projection extracts.
    pub constructor: Name,
    /// Number of structure parameters preceding the field.
    pub num_params: u32,
    /// Field index.
    pub index: u32,
}

/// The ambient logical environment. The engine only reads it: constant
/// lookup, reducibility classification, projection classification, and
/// the class/instance predicates reserved for instance-aware actions.
pub struct Environment {
    declarations: HashMap<Name, Declaration>,
    projections: HashMap<Name, ProjectionInfo>,
    classes: HashSet<Name>,
    instances: HashSet<Name>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment {
            declarations: HashMap::new(),
            projections: HashMap::new(),
            classes: HashSet::new(),
            instances: HashSet::new(),
        }
    }

    pub fn add_declaration(&mut self, decl: Declaration) {
        self.declarations.insert(decl.name.clone(), decl);
    }

    /// Convenience for declarations with no body.
    pub fn add_axiom(&mut self, name: Name, univ_params: Vec<Name>, ty: ExprId) {
        self.add_declaration(Declaration {
            name,
            univ_params,
            ty,
            value: None,
            reducibility: Reducibility::Semireducible,
        });
    }

    pub fn add_definition(
        &mut self,
        name: Name,
        univ_params: Vec<Name>,
        ty: ExprId,
        value: ExprId,
        reducibility: Reducibility,
    ) {
        self.add_declaration(Declaration {
            name,
            univ_params,
            ty,
            value: Some(value),
            reducibility,
        });
    }

    pub fn get_declaration(&self, name: &Name) -> Option<&Declaration> {
        self.declarations.get(name)
    }

    pub fn reducibility(&self, name: &Name) -> Reducibility {
        match self.declarations.get(name) {
            Some(d) => d.reducibility,
            None => Reducibility::Semireducible,
        }
    }

    pub fn add_projection(&mut self, name: Name, info: ProjectionInfo) {
        self.projections.insert(name, info);
    }

    pub fn get_projection_info(&self, name: &Name) -> Option<&ProjectionInfo> {
        self.projections.get(name)
    }

    pub fn is_projection(&self, name: &Name) -> bool {
        self.projections.contains_key(name)
    }

    pub fn mark_class(&mut self, name: Name) {
        self.classes.insert(name);
    }

    pub fn is_class(&self, name: &Name) -> bool {
        self.classes.contains(name)
    }

    pub fn mark_instance(&mut self, name: Name) {
        self.instances.insert(name);
    }

    pub fn is_instance(&self, name: &Name) -> bool {
        self.instances.contains(name)
    }

    pub fn instance_names(&self) -> impl Iterator<Item = &Name> {
        self.instances.iter()
    }
}

impl Default for Environment {
    fn default() -> Environment {
        Environment::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Terms;
    use crate::level::Level;

    #[test]
    fn test_reducibility_defaults_to_semireducible() {
        let mut terms = Terms::new();
        let mut env = Environment::new();
        let prop = terms.mk_sort(Level::Zero);
        env.add_axiom(Name::new("P"), vec![], prop);
        assert_eq!(env.reducibility(&Name::new("P")), Reducibility::Semireducible);
        assert_eq!(env.reducibility(&Name::new("missing")), Reducibility::Semireducible);
    }

    #[test]
    fn test_projection_lookup() {
        let mut env = Environment::new();
        env.add_projection(
            Name::new("pair.fst"),
            ProjectionInfo {
                constructor: Name::new("pair.mk"),
                num_params: 2,
                index: 0,
            },
        );
        assert!(env.is_projection(&Name::new("pair.fst")));
        assert!(!env.is_projection(&Name::new("pair.snd")));
    }
}
