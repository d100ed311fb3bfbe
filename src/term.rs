//! Term model: variables, constants, compound terms and atoms.
//!
//! Terms are immutable and structurally shared (`Arc`), so cloning a term is
//! cheap and substitution always builds new terms instead of mutating.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::substitution::Substitution;

/// Separator used when freshening variables. User-supplied variable names
/// may not contain it, so renamed variables can never capture user ones.
pub(crate) const FRESH_SEPARATOR: char = '#';

/// A logic variable, identified by name.
///
/// Variables order lexicographically by name; unification relies on this
/// to pick a canonical binding direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variable(Arc<str>);

impl Variable {
    /// Creates a variable. Names must not contain `#`.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The variable's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Returns a renamed copy of this variable for proof branch `stamp`.
    #[must_use]
    pub(crate) fn freshen(&self, stamp: u64) -> Self {
        let base = self
            .0
            .split_once(FRESH_SEPARATOR)
            .map_or(&*self.0, |(base, _)| base);
        Self(Arc::from(format!("{base}{FRESH_SEPARATOR}{stamp}")))
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logical term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// A logic variable.
    Variable(Variable),
    /// An atomic constant.
    Constant(Arc<str>),
    /// A functor applied to ordered arguments.
    Compound {
        /// Function or predicate name.
        functor: Arc<str>,
        /// Arguments in order.
        args: Arc<[Term]>,
    },
}

impl Term {
    /// Shorthand for `Term::Variable(Variable::new(name))`.
    pub fn var(name: impl AsRef<str>) -> Self {
        Self::Variable(Variable::new(name))
    }

    /// A constant term.
    pub fn constant(value: impl AsRef<str>) -> Self {
        Self::Constant(Arc::from(value.as_ref()))
    }

    /// A compound term `functor(args...)`.
    pub fn compound(functor: impl AsRef<str>, args: impl IntoIterator<Item = Term>) -> Self {
        Self::Compound {
            functor: Arc::from(functor.as_ref()),
            args: args.into_iter().collect(),
        }
    }

    /// Returns true if the term contains no variables.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        match self {
            Self::Variable(_) => false,
            Self::Constant(_) => true,
            Self::Compound { args, .. } => args.iter().all(Term::is_ground),
        }
    }

    /// Returns true if `var` appears anywhere in this term.
    #[must_use]
    pub fn contains(&self, var: &Variable) -> bool {
        match self {
            Self::Variable(v) => v == var,
            Self::Constant(_) => false,
            Self::Compound { args, .. } => args.iter().any(|a| a.contains(var)),
        }
    }

    /// Collects the variables of this term into `out`.
    pub fn collect_variables(&self, out: &mut BTreeSet<Variable>) {
        match self {
            Self::Variable(v) => {
                out.insert(v.clone());
            }
            Self::Constant(_) => {}
            Self::Compound { args, .. } => {
                for a in args.iter() {
                    a.collect_variables(out);
                }
            }
        }
    }

    /// Variables of this term in first-occurrence order.
    #[must_use]
    pub fn variables_in_order(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        self.push_variables(&mut out);
        out
    }

    fn push_variables(&self, out: &mut Vec<Variable>) {
        match self {
            Self::Variable(v) => {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Self::Constant(_) => {}
            Self::Compound { args, .. } => {
                for a in args.iter() {
                    a.push_variables(out);
                }
            }
        }
    }

    /// Number of nodes in the term tree. Walks with an explicit stack, so
    /// it is safe on terms too deep for the recursive operations.
    #[must_use]
    pub fn size(&self) -> usize {
        let mut stack = vec![self];
        let mut size = 0;
        while let Some(term) = stack.pop() {
            size += 1;
            if let Self::Compound { args, .. } = term {
                stack.extend(args.iter());
            }
        }
        size
    }

    /// Renames every variable for proof branch `stamp`.
    #[must_use]
    pub(crate) fn freshen(&self, stamp: u64) -> Self {
        match self {
            Self::Variable(v) => Self::Variable(v.freshen(stamp)),
            Self::Constant(_) => self.clone(),
            Self::Compound { functor, args } => {
                if self.is_ground() {
                    return self.clone();
                }
                Self::Compound {
                    functor: Arc::clone(functor),
                    args: args.iter().map(|a| a.freshen(stamp)).collect(),
                }
            }
        }
    }

    /// Checks names and rejects reserved characters.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MalformedTerm` for empty names or variable
    /// names containing the reserved freshening separator, and
    /// `ValidationError::EmptyFunctor` for compounds without a functor.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut stack = vec![self];
        while let Some(term) = stack.pop() {
            match term {
                Self::Variable(v) => {
                    if v.name().trim().is_empty() {
                        return Err(ValidationError::MalformedTerm {
                            reason: "variable name cannot be empty".to_string(),
                        });
                    }
                    if v.name().contains(FRESH_SEPARATOR) {
                        return Err(ValidationError::MalformedTerm {
                            reason: format!(
                                "variable '{}' uses reserved character '{FRESH_SEPARATOR}'",
                                v.name()
                            ),
                        });
                    }
                }
                Self::Constant(c) => {
                    if c.trim().is_empty() {
                        return Err(ValidationError::MalformedTerm {
                            reason: "constant cannot be empty".to_string(),
                        });
                    }
                }
                Self::Compound { functor, args } => {
                    if functor.trim().is_empty() {
                        return Err(ValidationError::EmptyFunctor);
                    }
                    stack.extend(args.iter().rev());
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(v) => write!(f, "{v}"),
            Self::Constant(c) => f.write_str(c),
            Self::Compound { functor, args } => {
                write!(f, "{functor}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Index partition key for atoms: functor, arity and polarity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Signature {
    /// Predicate name.
    pub functor: Arc<str>,
    /// Number of arguments.
    pub arity: usize,
    /// True for the partition of explicit negations.
    pub negated: bool,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negated { "¬" } else { "" };
        write!(f, "{sign}{}/{}", self.functor, self.arity)
    }
}

/// A proposition: a compound term with a polarity.
///
/// `¬P(a)` is the explicit negation of `P(a)`; both live in separate index
/// partitions and are unified only with atoms of the same polarity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Atom {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    negated: bool,
    term: Term,
}

impl Atom {
    /// Builds a positive atom `functor(args...)`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the functor is empty or an argument is
    /// malformed.
    pub fn new(
        functor: impl AsRef<str>,
        args: impl IntoIterator<Item = Term>,
    ) -> Result<Self, ValidationError> {
        Self::from_term(Term::compound(functor, args))
    }

    /// Wraps an existing term as a positive atom.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MalformedTerm` if the term is not compound.
    pub fn from_term(term: Term) -> Result<Self, ValidationError> {
        if !matches!(term, Term::Compound { .. }) {
            return Err(ValidationError::MalformedTerm {
                reason: format!("atom must be a compound term, got '{term}'"),
            });
        }
        term.validate()?;
        Ok(Self {
            negated: false,
            term,
        })
    }

    /// Returns the explicit negation of this atom.
    #[must_use]
    pub fn negate(&self) -> Self {
        Self {
            negated: !self.negated,
            term: self.term.clone(),
        }
    }

    /// True for an explicit negation `¬P(...)`.
    #[must_use]
    pub const fn is_negated(&self) -> bool {
        self.negated
    }

    /// Checks that the atom wraps a well-formed compound term. Atoms built
    /// through `new` always pass; deserialized ones may not.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MalformedTerm` or `EmptyFunctor`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !matches!(self.term, Term::Compound { .. }) {
            return Err(ValidationError::MalformedTerm {
                reason: format!("atom must be a compound term, got '{}'", self.term),
            });
        }
        self.term.validate()
    }

    /// The underlying compound term (polarity not included).
    #[must_use]
    pub const fn term(&self) -> &Term {
        &self.term
    }

    /// The predicate name.
    #[must_use]
    pub fn functor(&self) -> &str {
        match &self.term {
            Term::Compound { functor, .. } => functor,
            _ => "",
        }
    }

    /// The arguments in order.
    #[must_use]
    pub fn args(&self) -> &[Term] {
        match &self.term {
            Term::Compound { args, .. } => args,
            _ => &[],
        }
    }

    /// Index partition key of this atom.
    #[must_use]
    pub fn signature(&self) -> Signature {
        let (functor, arity) = match &self.term {
            Term::Compound { functor, args } => (Arc::clone(functor), args.len()),
            _ => (Arc::from(""), 0),
        };
        Signature {
            functor,
            arity,
            negated: self.negated,
        }
    }

    /// True if the atom contains no variables.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.term.is_ground()
    }

    /// Applies a substitution, keeping the polarity.
    #[must_use]
    pub fn apply(&self, subst: &Substitution) -> Self {
        Self {
            negated: self.negated,
            term: subst.apply(&self.term),
        }
    }

    #[must_use]
    pub(crate) fn freshen(&self, stamp: u64) -> Self {
        Self {
            negated: self.negated,
            term: self.term.freshen(stamp),
        }
    }

    /// Variables in first-occurrence order.
    #[must_use]
    pub fn variables(&self) -> Vec<Variable> {
        self.term.variables_in_order()
    }

    /// Renames variables to `#0`, `#1`, ... in first-occurrence order, so
    /// every variant of an atom has the same canonical form.
    #[must_use]
    pub(crate) fn canonical(&self) -> Self {
        if self.is_ground() {
            return self.clone();
        }
        let renaming = Substitution::from_bindings(
            self.variables()
                .into_iter()
                .enumerate()
                .map(|(i, var)| (var, Term::var(format!("{FRESH_SEPARATOR}{i}")))),
        );
        self.apply(&renaming)
    }

    /// True if the two atoms are equal up to a consistent renaming of
    /// variables, e.g. `p(X, Y, X)` and `p(A, B, A)`.
    #[must_use]
    pub fn is_variant(&self, other: &Self) -> bool {
        let mut forward = HashMap::new();
        let mut backward = HashMap::new();
        self.negated == other.negated && variant_terms(&self.term, &other.term, &mut forward, &mut backward)
    }
}

fn variant_terms<'a>(
    a: &'a Term,
    b: &'a Term,
    forward: &mut HashMap<&'a Variable, &'a Variable>,
    backward: &mut HashMap<&'a Variable, &'a Variable>,
) -> bool {
    match (a, b) {
        (Term::Variable(x), Term::Variable(y)) => {
            *forward.entry(x).or_insert(y) == y && *backward.entry(y).or_insert(x) == x
        }
        (Term::Constant(x), Term::Constant(y)) => x == y,
        (Term::Compound { functor: f, args: xs }, Term::Compound { functor: g, args: ys }) => {
            f == g
                && xs.len() == ys.len()
                && xs.iter().zip(ys.iter()).all(|(x, y)| variant_terms(x, y, forward, backward))
        }
        _ => false,
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("¬")?;
        }
        write!(f, "{}", self.term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bird(x: Term) -> Atom {
        Atom::new("Bird", [x]).unwrap()
    }

    #[test]
    fn test_ground_detection() {
        assert!(bird(Term::constant("tweety")).is_ground());
        assert!(!bird(Term::var("X")).is_ground());
        let nested = Term::compound("f", [Term::constant("a"), Term::compound("g", [Term::var("Y")])]);
        assert!(!nested.is_ground());
        assert!(nested.contains(&Variable::new("Y")));
        assert_eq!(nested.size(), 4);
    }

    #[test]
    fn test_negation_round_trip() {
        let a = bird(Term::constant("tweety"));
        let n = a.negate();
        assert!(n.is_negated());
        assert_ne!(a.signature(), n.signature());
        assert_eq!(n.negate(), a);
        assert_eq!(n.to_string(), "¬Bird(tweety)");
    }

    #[test]
    fn test_atom_rejects_non_compound() {
        assert!(Atom::from_term(Term::constant("p")).is_err());
        assert!(Atom::from_term(Term::var("X")).is_err());
        assert!(Atom::new("", [Term::constant("a")]).is_err());
    }

    #[test]
    fn test_nullary_atom() {
        let p = Atom::new("P", []).unwrap();
        assert_eq!(p.signature().arity, 0);
        assert_eq!(p.to_string(), "P()");
    }

    #[test]
    fn test_reserved_separator_rejected() {
        let err = Atom::new("P", [Term::var("X#1")]).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedTerm { .. }));
    }

    #[test]
    fn test_freshen_renames_only_variables() {
        let t = Term::compound("f", [Term::var("X"), Term::constant("a")]);
        let fresh = t.freshen(7);
        assert_eq!(fresh.to_string(), "f(X#7, a)");
        // Re-freshening replaces the stamp instead of stacking suffixes.
        assert_eq!(fresh.freshen(9).to_string(), "f(X#9, a)");
    }

    #[test]
    fn test_variant_needs_consistent_renaming() {
        let p = |args: [&str; 3]| Atom::new("p", args.map(Term::var)).unwrap();
        assert!(p(["X", "Y", "X"]).is_variant(&p(["A", "B", "A"])));
        assert!(!p(["X", "Y", "X"]).is_variant(&p(["A", "B", "B"])));
        assert!(!p(["X", "X", "X"]).is_variant(&p(["A", "B", "A"])));
        let a = bird(Term::var("X"));
        assert!(!a.is_variant(&a.negate()));
        assert!(!a.is_variant(&bird(Term::constant("tweety"))));
    }

    #[test]
    fn test_canonical_form_is_shared_by_variants() {
        let a = Atom::new("p", [Term::var("X"), Term::var("Y"), Term::var("X")]).unwrap();
        let b = Atom::new("p", [Term::var("B"), Term::var("A"), Term::var("B")]).unwrap();
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical().to_string(), "p(#0, #1, #0)");
        let ground = bird(Term::constant("tweety"));
        assert_eq!(ground.canonical(), ground);
    }

    #[test]
    fn test_variables_in_order() {
        let a = Atom::new("p", [Term::var("Y"), Term::var("X"), Term::var("Y")]).unwrap();
        let names: Vec<_> = a.variables().iter().map(|v| v.name().to_string()).collect();
        assert_eq!(names, vec!["Y", "X"]);
    }
}
