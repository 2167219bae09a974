use std::fmt;

use crate::expr::{ExprData, ExprId, Terms};

/// Pairs an expression id with the arena that can read it, for error
/// messages and verbose tracing. The output is diagnostic, not
/// re-parseable: de Bruijn variables print as `#i`.
pub struct DisplayExpr<'a> {
    terms: &'a Terms,
    id: ExprId,
}

impl<'a> DisplayExpr<'a> {
    pub fn new(terms: &'a Terms, id: ExprId) -> DisplayExpr<'a> {
        DisplayExpr { terms, id }
    }

    fn child(&self, id: ExprId) -> DisplayExpr<'a> {
        DisplayExpr {
            terms: self.terms,
            id,
        }
    }
}

impl fmt::Display for DisplayExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.terms.get(self.id) {
            ExprData::Var(i) => write!(f, "#{}", i),
            ExprData::Sort(l) => {
                if l.is_zero() {
                    write!(f, "Prop")
                } else {
                    write!(f, "Sort {}", l)
                }
            }
            ExprData::Const(n, ls) => {
                write!(f, "{}", n)?;
                if !ls.is_empty() {
                    write!(f, ".{{")?;
                    for (i, l) in ls.iter().enumerate() {
                        if i > 0 {
                            write!(f, " ")?;
                        }
                        write!(f, "{}", l)?;
                    }
                    write!(f, "}}")?;
                }
                Ok(())
            }
            ExprData::Local(_, pretty, _) => write!(f, "{}", pretty),
            ExprData::Meta(n, _) => write!(f, "?{}", n),
            ExprData::Href(h) => write!(f, "{}", h),
            ExprData::Mref(m) => write!(f, "{}", m),
            ExprData::App(_, _) => {
                let (head, args) = self.terms.get_app_args(self.id);
                write!(f, "({}", self.child(head))?;
                for a in args {
                    write!(f, " {}", self.child(a))?;
                }
                write!(f, ")")
            }
            ExprData::Lambda(n, d, b, _) => {
                write!(f, "(fun ({} : {}) => {})", n, self.child(*d), self.child(*b))
            }
            ExprData::Pi(n, d, b, _) => {
                // print non-dependent Pis as arrows
                if self.terms.has_free_var_zero(*b) {
                    write!(f, "(Pi ({} : {}), {})", n, self.child(*d), self.child(*b))
                } else {
                    write!(f, "({} -> {})", self.child(*d), self.child(*b))
                }
            }
            ExprData::Macro(n, args) => {
                write!(f, "[{}", n)?;
                for a in args {
                    write!(f, " {}", self.child(*a))?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Convenience for error messages.
pub fn show(terms: &Terms, id: ExprId) -> String {
    format!("{}", DisplayExpr::new(terms, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinderKind, Name};
    use crate::level::Level;

    #[test]
    fn test_display_app_spine() {
        let mut terms = Terms::new();
        let p = terms.mk_const(Name::new("f"), vec![]);
        let x = terms.mk_const(Name::new("x"), vec![]);
        let y = terms.mk_const(Name::new("y"), vec![]);
        let app = terms.mk_app_many(p, &[x, y]);
        assert_eq!(show(&terms, app), "(f x y)");
    }

    #[test]
    fn test_display_arrow() {
        let mut terms = Terms::new();
        let p = terms.mk_const(Name::new("P"), vec![]);
        let arrow = terms.mk_pi(Name::new("h"), p, p, BinderKind::Explicit);
        assert_eq!(show(&terms, arrow), "(P -> P)");
    }

    #[test]
    fn test_display_dependent_pi() {
        let mut terms = Terms::new();
        let prop = terms.mk_sort(Level::Zero);
        let v0 = terms.mk_var(0);
        let pi = terms.mk_pi(Name::new("p"), prop, v0, BinderKind::Explicit);
        assert_eq!(show(&terms, pi), "(Pi (p : Prop), #0)");
    }
}
