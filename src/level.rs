use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::{Name, UnivMetaId};

/// A universe level in the ambient calculus, extended with `Uref`,
/// the engine's own universe metavariable leaf. External universe
/// metavariables (`Meta`) survive only until internalization maps them
/// to urefs; they reappear when a proof is externalized.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Level {
    Zero,
    Succ(Box<Level>),
    Max(Box<Level>, Box<Level>),
    Imax(Box<Level>, Box<Level>),
    Param(Name),
    Global(Name),
    Meta(Name),
    Uref(UnivMetaId),
}

impl Level {
    pub fn succ(self) -> Level {
        Level::Succ(Box::new(self))
    }

    pub fn max(lhs: Level, rhs: Level) -> Level {
        if lhs == rhs {
            return lhs;
        }
        match (&lhs, &rhs) {
            (Level::Zero, _) => rhs,
            (_, Level::Zero) => lhs,
            _ => Level::Max(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// The impredicative max: `imax l 0 = 0`, used for Pi sorts.
    pub fn imax(lhs: Level, rhs: Level) -> Level {
        match &rhs {
            Level::Zero => Level::Zero,
            _ if lhs == rhs => rhs,
            Level::Succ(_) => Level::max(lhs, rhs),
            _ => Level::Imax(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Level::Zero)
    }

    /// Replaces universe parameters by the given levels, positionally.
    /// Parameters without a binding are left alone.
    pub fn instantiate_params(&self, params: &[Name], args: &[Level]) -> Level {
        match self {
            Level::Zero | Level::Global(_) | Level::Meta(_) | Level::Uref(_) => self.clone(),
            Level::Succ(l) => l.instantiate_params(params, args).succ(),
            Level::Max(a, b) => Level::max(
                a.instantiate_params(params, args),
                b.instantiate_params(params, args),
            ),
            Level::Imax(a, b) => Level::imax(
                a.instantiate_params(params, args),
                b.instantiate_params(params, args),
            ),
            Level::Param(n) => match params.iter().position(|p| p == n) {
                Some(i) => args[i].clone(),
                None => self.clone(),
            },
        }
    }

    /// Replaces assigned urefs throughout, chasing chained assignments
    /// until a fixed point.
    pub fn instantiate_urefs(&self, lookup: &impl Fn(UnivMetaId) -> Option<Level>) -> Level {
        match self {
            Level::Zero | Level::Param(_) | Level::Global(_) | Level::Meta(_) => self.clone(),
            Level::Succ(l) => l.instantiate_urefs(lookup).succ(),
            Level::Max(a, b) => {
                Level::max(a.instantiate_urefs(lookup), b.instantiate_urefs(lookup))
            }
            Level::Imax(a, b) => {
                Level::imax(a.instantiate_urefs(lookup), b.instantiate_urefs(lookup))
            }
            Level::Uref(u) => match lookup(*u) {
                Some(v) => v.instantiate_urefs(lookup),
                None => self.clone(),
            },
        }
    }

    pub fn occurs_uref(&self, uref: UnivMetaId) -> bool {
        match self {
            Level::Zero | Level::Param(_) | Level::Global(_) | Level::Meta(_) => false,
            Level::Succ(l) => l.occurs_uref(uref),
            Level::Max(a, b) | Level::Imax(a, b) => a.occurs_uref(uref) || b.occurs_uref(uref),
            Level::Uref(u) => *u == uref,
        }
    }

    pub fn has_uref(&self) -> bool {
        match self {
            Level::Zero | Level::Param(_) | Level::Global(_) | Level::Meta(_) => false,
            Level::Succ(l) => l.has_uref(),
            Level::Max(a, b) | Level::Imax(a, b) => a.has_uref() || b.has_uref(),
            Level::Uref(_) => true,
        }
    }

    pub fn has_meta(&self) -> bool {
        match self {
            Level::Zero | Level::Param(_) | Level::Global(_) => false,
            Level::Succ(l) => l.has_meta(),
            Level::Max(a, b) | Level::Imax(a, b) => a.has_meta() || b.has_meta(),
            Level::Meta(_) => true,
            Level::Uref(_) => false,
        }
    }

    /// Splits off the trailing successor offset: `Succ(Succ(Max(a, b)))`
    /// becomes `(Max(a, b), 2)`.
    pub fn to_offset(&self) -> (&Level, u32) {
        let mut l = self;
        let mut k = 0;
        while let Level::Succ(inner) = l {
            l = inner;
            k += 1;
        }
        (l, k)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (base, k) = self.to_offset();
        if k > 0 {
            if base.is_zero() {
                return write!(f, "{}", k);
            }
            return write!(f, "{}+{}", base, k);
        }
        match self {
            Level::Zero => write!(f, "0"),
            Level::Succ(_) => unreachable!(),
            Level::Max(a, b) => write!(f, "(max {} {})", a, b),
            Level::Imax(a, b) => write!(f, "(imax {} {})", a, b),
            Level::Param(n) => write!(f, "{}", n),
            Level::Global(n) => write!(f, "{}", n),
            Level::Meta(n) => write!(f, "?{}", n),
            Level::Uref(u) => write!(f, "{}", u),
        }
    }
}
