//! Property tests for unification and substitution.

use proptest::prelude::*;
use kyrolog::unify::occurs;
use kyrolog::{unify, Substitution, Term, Variable};

/// Small alphabets so that generated pairs unify often enough to matter.
fn arb_term() -> impl Strategy<Value = Term> {
    let leaf = prop_oneof![
        prop::sample::select(vec!["X", "Y", "Z"]).prop_map(Term::var),
        prop::sample::select(vec!["a", "b"]).prop_map(Term::constant),
    ];
    leaf.prop_recursive(3, 24, 2, |inner| {
        (
            prop::sample::select(vec!["f", "g"]),
            prop::collection::vec(inner, 1..=2),
        )
            .prop_map(|(functor, args)| Term::compound(functor, args))
    })
}

fn arb_ground() -> impl Strategy<Value = Term> {
    let leaf = prop::sample::select(vec!["a", "b"]).prop_map(Term::constant);
    leaf.prop_recursive(3, 24, 2, |inner| {
        (
            prop::sample::select(vec!["f", "g"]),
            prop::collection::vec(inner, 1..=2),
        )
            .prop_map(|(functor, args)| Term::compound(functor, args))
    })
}

proptest! {
    #[test]
    fn unifier_makes_terms_equal(t1 in arb_term(), t2 in arb_term()) {
        if let Some(s) = unify(&t1, &t2, &Substitution::new()) {
            prop_assert_eq!(s.apply(&t1), s.apply(&t2));
        }
    }

    #[test]
    fn success_is_symmetric(t1 in arb_term(), t2 in arb_term()) {
        let forward = unify(&t1, &t2, &Substitution::new());
        let backward = unify(&t2, &t1, &Substitution::new());
        prop_assert_eq!(forward.is_some(), backward.is_some());
    }

    #[test]
    fn term_unifies_with_itself(t in arb_term()) {
        prop_assert!(unify(&t, &t, &Substitution::new()).is_some());
    }

    #[test]
    fn ground_terms_unify_iff_equal(t1 in arb_ground(), t2 in arb_ground()) {
        let s = unify(&t1, &t2, &Substitution::new());
        prop_assert_eq!(s.is_some(), t1 == t2);
        if let Some(s) = s {
            prop_assert!(s.is_empty());
        }
    }

    #[test]
    fn applying_unifier_is_idempotent(t1 in arb_term(), t2 in arb_term()) {
        if let Some(s) = unify(&t1, &t2, &Substitution::new()) {
            let once = s.apply(&t1);
            prop_assert_eq!(s.apply(&once), once);
        }
    }

    #[test]
    fn variable_never_unifies_with_term_containing_it(t in arb_term()) {
        let x = Variable::new("X");
        let wrapped = Term::compound("h", [t.clone(), Term::var("X")]);
        prop_assert!(occurs(&x, &wrapped, &Substitution::new()));
        prop_assert!(unify(&Term::var("X"), &wrapped, &Substitution::new()).is_none());
    }
}

#[test]
fn occurs_check_sees_through_bindings() {
    // Y ↦ f(X), then X against g(Y) must fail.
    let s = unify(&Term::var("Y"), &Term::compound("f", [Term::var("X")]), &Substitution::new()).unwrap();
    let g = Term::compound("g", [Term::var("Y")]);
    assert!(unify(&Term::var("X"), &g, &s).is_none());
}
