//! Unification engine.
//!
//! `unify(t1, t2, σ)` extends `σ` so that both terms become structurally
//! equal, or reports failure. Failure is a plain `None`: the caller's
//! substitution is never touched because all work happens on a private copy.
//!
//! The occurs-check is always on. Skipping it is the classical speed trick,
//! but it admits cyclic bindings such as `X = f(X)`, which would make
//! resolution unsound.

use crate::substitution::Substitution;
use crate::term::{Atom, Term, Variable};

/// Computes the most general unifier of `t1` and `t2` extending `subst`.
///
/// Variable/variable pairs bind the lexicographically larger name to the
/// smaller one, so results are deterministic.
///
/// # Examples
///
/// ```
/// use kyrolog::{unify, Substitution, Term};
///
/// let t1 = Term::compound("f", [Term::var("X"), Term::constant("b")]);
/// let t2 = Term::compound("f", [Term::constant("a"), Term::var("Y")]);
/// let s = unify(&t1, &t2, &Substitution::new()).unwrap();
/// assert_eq!(s.apply(&t1), s.apply(&t2));
/// ```
#[must_use]
pub fn unify(t1: &Term, t2: &Term, subst: &Substitution) -> Option<Substitution> {
    let mut work = subst.clone();
    if unify_into(t1, t2, &mut work) {
        Some(work)
    } else {
        None
    }
}

/// Unifies two atoms. Atoms of different polarity never unify.
#[must_use]
pub fn unify_atoms(a1: &Atom, a2: &Atom, subst: &Substitution) -> Option<Substitution> {
    if a1.is_negated() != a2.is_negated() {
        return None;
    }
    unify(a1.term(), a2.term(), subst)
}

/// Returns true if `var` occurs in `term` under `subst`.
#[must_use]
pub fn occurs(var: &Variable, term: &Term, subst: &Substitution) -> bool {
    match subst.walk(term) {
        Term::Variable(v) => v == var,
        Term::Constant(_) => false,
        Term::Compound { args, .. } => args.iter().any(|a| occurs(var, a, subst)),
    }
}

fn unify_into(t1: &Term, t2: &Term, subst: &mut Substitution) -> bool {
    let a = subst.walk(t1).clone();
    let b = subst.walk(t2).clone();

    match (&a, &b) {
        (Term::Variable(x), Term::Variable(y)) => {
            if x != y {
                if x > y {
                    subst.bind(x.clone(), b.clone());
                } else {
                    subst.bind(y.clone(), a.clone());
                }
            }
            true
        }
        (Term::Variable(x), t) | (t, Term::Variable(x)) => {
            if occurs(x, t, subst) {
                return false;
            }
            subst.bind(x.clone(), t.clone());
            true
        }
        (Term::Constant(c1), Term::Constant(c2)) => c1 == c2,
        (
            Term::Compound {
                functor: f1,
                args: a1,
            },
            Term::Compound {
                functor: f2,
                args: a2,
            },
        ) => {
            if f1 != f2 || a1.len() != a2.len() {
                return false;
            }
            a1.iter().zip(a2.iter()).all(|(x, y)| unify_into(x, y, subst))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(args: impl IntoIterator<Item = Term>) -> Term {
        Term::compound("f", args)
    }

    #[test]
    fn test_constants() {
        let s = Substitution::new();
        assert!(unify(&Term::constant("a"), &Term::constant("a"), &s).is_some());
        assert!(unify(&Term::constant("a"), &Term::constant("b"), &s).is_none());
    }

    #[test]
    fn test_variable_tie_break_binds_larger_name() {
        let s = unify(&Term::var("A"), &Term::var("B"), &Substitution::new()).unwrap();
        assert_eq!(s.get(&Variable::new("B")), Some(&Term::var("A")));
        assert!(s.get(&Variable::new("A")).is_none());

        // Symmetric call produces the same binding.
        let s2 = unify(&Term::var("B"), &Term::var("A"), &Substitution::new()).unwrap();
        assert_eq!(s, s2);
    }

    #[test]
    fn test_occurs_check_rejects_cycle() {
        let x = Term::var("X");
        assert!(unify(&x, &f([x.clone()]), &Substitution::new()).is_none());
        assert!(unify(&f([x.clone()]), &x, &Substitution::new()).is_none());
    }

    #[test]
    fn test_occurs_check_through_bindings() {
        // X -> Y already; unifying Y with f(X) must fail.
        let s = Substitution::from_bindings([(Variable::new("X"), Term::var("Y"))]);
        assert!(unify(&Term::var("Y"), &f([Term::var("X")]), &s).is_none());
    }

    #[test]
    fn test_failure_does_not_leak_partial_bindings() {
        let start = Substitution::from_bindings([(Variable::new("Z"), Term::constant("z"))]);
        let t1 = f([Term::var("X"), Term::constant("a")]);
        let t2 = f([Term::constant("b"), Term::constant("c")]);
        assert!(unify(&t1, &t2, &start).is_none());
        assert_eq!(start.len(), 1);
        assert!(start.get(&Variable::new("X")).is_none());
    }

    #[test]
    fn test_arity_and_functor_mismatch() {
        let s = Substitution::new();
        assert!(unify(&f([Term::constant("a")]), &Term::compound("g", [Term::constant("a")]), &s).is_none());
        assert!(unify(&f([Term::constant("a")]), &f([Term::constant("a"), Term::constant("b")]), &s).is_none());
    }

    #[test]
    fn test_threads_bindings_left_to_right() {
        let t1 = f([Term::var("X"), Term::var("X")]);
        let t2 = f([Term::constant("a"), Term::constant("b")]);
        assert!(unify(&t1, &t2, &Substitution::new()).is_none());

        let t3 = f([Term::constant("a"), Term::var("Y")]);
        let s = unify(&t1, &t3, &Substitution::new()).unwrap();
        assert_eq!(s.apply(&Term::var("Y")), Term::constant("a"));
    }

    #[test]
    fn test_polarity_mismatch() {
        let p = Atom::new("P", [Term::constant("a")]).unwrap();
        assert!(unify_atoms(&p, &p.negate(), &Substitution::new()).is_none());
        assert!(unify_atoms(&p.negate(), &p.negate(), &Substitution::new()).is_some());
    }
}
