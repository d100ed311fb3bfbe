//! Substitutions: finite mappings from variables to terms.
//!
//! Bindings are stored in triangular form (a bound value may mention other
//! bound variables); `apply` resolves chains recursively. Unification's
//! occurs-check guarantees no binding chain ever loops back on itself.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::term::{Term, Variable};

/// A mapping from variables to terms. The empty substitution is the identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Substitution {
    bindings: BTreeMap<Variable, Term>,
}

impl Substitution {
    /// The identity substitution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a substitution from explicit bindings.
    ///
    /// The caller is responsible for not introducing cycles; use
    /// [`crate::unify::unify`] to build substitutions from terms.
    pub fn from_bindings(bindings: impl IntoIterator<Item = (Variable, Term)>) -> Self {
        Self {
            bindings: bindings.into_iter().collect(),
        }
    }

    /// True for the identity substitution.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Direct binding of `var`, without resolving chains.
    #[must_use]
    pub fn get(&self, var: &Variable) -> Option<&Term> {
        self.bindings.get(var)
    }

    /// Fully resolved value of `var`, if bound.
    #[must_use]
    pub fn resolve(&self, var: &Variable) -> Option<Term> {
        self.bindings.get(var).map(|t| self.apply(t))
    }

    /// Bindings in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Term)> {
        self.bindings.iter()
    }

    /// Follows variable bindings until reaching an unbound variable or a
    /// non-variable term. Only the outermost layer is resolved.
    #[must_use]
    pub fn walk<'a>(&'a self, term: &'a Term) -> &'a Term {
        let mut current = term;
        while let Term::Variable(v) = current {
            match self.bindings.get(v) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    pub(crate) fn bind(&mut self, var: Variable, term: Term) {
        self.bindings.insert(var, term);
    }

    /// Applies this substitution recursively.
    #[must_use]
    pub fn apply(&self, term: &Term) -> Term {
        if self.bindings.is_empty() {
            return term.clone();
        }
        let walked = self.walk(term);
        match walked {
            Term::Variable(v) => Term::Variable(v.clone()),
            Term::Constant(c) => Term::Constant(c.clone()),
            Term::Compound { functor, args } => {
                if walked.is_ground() {
                    return walked.clone();
                }
                Term::Compound {
                    functor: functor.clone(),
                    args: args.iter().map(|a| self.apply(a)).collect(),
                }
            }
        }
    }

    /// Composition: `apply(s1.compose(s2), t) == apply(s2, apply(s1, t))`.
    ///
    /// The result is idempotent (every binding fully resolved).
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        let mut bindings = BTreeMap::new();
        for var in self.bindings.keys() {
            let resolved = other.apply(&self.apply(&Term::Variable(var.clone())));
            if resolved != Term::Variable(var.clone()) {
                bindings.insert(var.clone(), resolved);
            }
        }
        for (var, term) in &other.bindings {
            if !self.bindings.contains_key(var) {
                let resolved = other.apply(term);
                if resolved != Term::Variable(var.clone()) {
                    bindings.insert(var.clone(), resolved);
                }
            }
        }
        Self { bindings }
    }

    /// Restricts this substitution to `vars`, fully resolving every value.
    ///
    /// Variables left unbound in the answer (fresh proof variables) are
    /// renamed `_0`, `_1`, ... in order of first appearance, so the same
    /// proof always yields the same answer regardless of renaming stamps.
    #[must_use]
    pub fn project(&self, vars: &[Variable]) -> Self {
        let mut renames: BTreeMap<Variable, Variable> = BTreeMap::new();
        let mut bindings = BTreeMap::new();
        for var in vars {
            let value = self.apply(&Term::Variable(var.clone()));
            for free in value.variables_in_order() {
                let next = renames.len();
                renames
                    .entry(free)
                    .or_insert_with(|| Variable::new(format!("_{next}")));
            }
            bindings.insert(var.clone(), rename(&value, &renames));
        }
        Self { bindings }
    }
}

/// Single-pass variable renaming; unlike `apply` it never follows chains.
fn rename(term: &Term, renames: &BTreeMap<Variable, Variable>) -> Term {
    match term {
        Term::Variable(v) => Term::Variable(renames.get(v).cloned().unwrap_or_else(|| v.clone())),
        Term::Constant(_) => term.clone(),
        Term::Compound { functor, args } => Term::Compound {
            functor: functor.clone(),
            args: args.iter().map(|a| rename(a, renames)).collect(),
        },
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (v, t)) in self.bindings.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v} -> {t}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Variable {
        Variable::new("X")
    }

    fn y() -> Variable {
        Variable::new("Y")
    }

    #[test]
    fn test_identity() {
        let s = Substitution::new();
        let t = Term::compound("f", [Term::var("X")]);
        assert_eq!(s.apply(&t), t);
    }

    #[test]
    fn test_apply_follows_chains() {
        let s = Substitution::from_bindings([
            (x(), Term::var("Y")),
            (y(), Term::compound("g", [Term::constant("a")])),
        ]);
        let t = Term::compound("f", [Term::var("X")]);
        assert_eq!(s.apply(&t).to_string(), "f(g(a))");
        assert_eq!(s.resolve(&x()).unwrap().to_string(), "g(a)");
    }

    #[test]
    fn test_compose_matches_sequential_application() {
        let s1 = Substitution::from_bindings([(x(), Term::compound("f", [Term::var("Y")]))]);
        let s2 = Substitution::from_bindings([(y(), Term::constant("b"))]);
        let t = Term::compound("p", [Term::var("X"), Term::var("Y")]);
        let composed = s1.compose(&s2);
        assert_eq!(composed.apply(&t), s2.apply(&s1.apply(&t)));
        assert_eq!(composed.apply(&t).to_string(), "p(f(b), b)");
    }

    #[test]
    fn test_compose_with_identity() {
        let s = Substitution::from_bindings([(x(), Term::constant("a"))]);
        assert_eq!(s.compose(&Substitution::new()), s);
        assert_eq!(Substitution::new().compose(&s), s);
    }

    #[test]
    fn test_project_canonicalizes_free_variables() {
        let s = Substitution::from_bindings([(x(), Term::compound("f", [Term::var("Z#12")]))]);
        let p = s.project(&[x(), y()]);
        assert_eq!(p.get(&x()).unwrap().to_string(), "f(_0)");
        assert_eq!(p.get(&y()).unwrap().to_string(), "_1");
    }

    #[test]
    fn test_project_rename_does_not_chain() {
        let s = Substitution::from_bindings([(x(), Term::compound("f", [Term::var("_1"), Term::var("_0")]))]);
        let p = s.project(&[x()]);
        assert_eq!(p.get(&x()).unwrap().to_string(), "f(_0, _1)");
    }

    #[test]
    fn test_display() {
        let s = Substitution::from_bindings([(x(), Term::constant("a"))]);
        assert_eq!(s.to_string(), "{X -> a}");
    }
}
