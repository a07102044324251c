//! Class lattice and objset types.
//!
//! This module implements:
//! - The class inheritance graph with memoized ancestor/descendant closures
//! - Type signatures (canonical class sets) with join/meet/compare
//! - Objset cardinalities and the `ObjsetType` lattice built on top of them

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, BitAnd, BitOr};
use thiserror::Error;

use crate::ir::ClassDecl;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("Unknown class: {0}")]
    UnknownClass(String),

    #[error("Duplicate class: {0}")]
    DuplicateClass(String),

    #[error("Cyclic inheritance through class {0}")]
    CyclicInheritance(String),

    #[error("Incompatible types: {left} and {right}")]
    IncompatibleTypes { left: String, right: String },

    #[error("Relation {relation} not found on {type_name}")]
    RelationNotFound { relation: String, type_name: String },

    #[error("Duplicate relation {class}.{relation}")]
    DuplicateRelation { class: String, relation: String },

    #[error("Relation {relation} is declared as the inverse of {inverse}, which is itself an inverse")]
    InverseOfInverse { relation: String, inverse: String },

    #[error("Relation {relation} cannot be the inverse of {inverse}: {reason}")]
    InverseMismatch {
        relation: String,
        inverse: String,
        reason: String,
    },

    #[error("Invalid cardinality {cardinality} on {context}")]
    InvalidCardinality {
        context: String,
        cardinality: Cardinality,
    },

    #[error("Duplicate {kind}: {name}")]
    DuplicateDeclaration { kind: &'static str, name: String },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown invariant: {0}")]
    UnknownInvariant(String),
}

// =============================================================================
// Class Graph
// =============================================================================

/// Index of a class in the [`ClassGraph`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub usize);

/// The class inheritance graph.
///
/// Built once from the class declarations; closures are computed eagerly so
/// every lattice operation is a set operation over memoized data.
#[derive(Debug, Clone)]
pub struct ClassGraph {
    names: Vec<String>,
    index: HashMap<String, ClassId>,
    parents: Vec<Vec<ClassId>>,
    /// Strict ancestors, per class
    ancestors: Vec<BTreeSet<ClassId>>,
    /// Strict descendants, per class
    descendants: Vec<BTreeSet<ClassId>>,
    /// Connected component of the undirected inheritance graph, per class
    components: Vec<usize>,
    component_count: usize,
}

impl ClassGraph {
    pub fn new(decls: &[ClassDecl]) -> Result<Self, TypeError> {
        let mut index = HashMap::new();
        let mut names = Vec::with_capacity(decls.len());
        for (i, decl) in decls.iter().enumerate() {
            if index.insert(decl.name.clone(), ClassId(i)).is_some() {
                return Err(TypeError::DuplicateClass(decl.name.clone()));
            }
            names.push(decl.name.clone());
        }

        let mut parents = Vec::with_capacity(decls.len());
        for decl in decls {
            let mut ids = Vec::with_capacity(decl.parents.len());
            for parent in &decl.parents {
                let id = index
                    .get(parent)
                    .copied()
                    .ok_or_else(|| TypeError::UnknownClass(parent.clone()))?;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            parents.push(ids);
        }

        let ancestors = Self::compute_ancestors(&names, &parents)?;

        let mut descendants = vec![BTreeSet::new(); names.len()];
        for (child, ancs) in ancestors.iter().enumerate() {
            for anc in ancs {
                descendants[anc.0].insert(ClassId(child));
            }
        }

        let (components, component_count) = Self::compute_components(&parents);

        Ok(Self {
            names,
            index,
            parents,
            ancestors,
            descendants,
            components,
            component_count,
        })
    }

    /// Depth-first closure computation; a grey node on the stack means a cycle
    fn compute_ancestors(
        names: &[String],
        parents: &[Vec<ClassId>],
    ) -> Result<Vec<BTreeSet<ClassId>>, TypeError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        fn visit(
            node: usize,
            names: &[String],
            parents: &[Vec<ClassId>],
            marks: &mut [Mark],
            out: &mut [BTreeSet<ClassId>],
        ) -> Result<(), TypeError> {
            match marks[node] {
                Mark::Black => return Ok(()),
                Mark::Grey => return Err(TypeError::CyclicInheritance(names[node].clone())),
                Mark::White => {}
            }
            marks[node] = Mark::Grey;
            let mut closure = BTreeSet::new();
            for parent in &parents[node] {
                visit(parent.0, names, parents, marks, out)?;
                closure.insert(*parent);
                closure.extend(out[parent.0].iter().copied());
            }
            out[node] = closure;
            marks[node] = Mark::Black;
            Ok(())
        }

        let mut marks = vec![Mark::White; names.len()];
        let mut out = vec![BTreeSet::new(); names.len()];
        for node in 0..names.len() {
            visit(node, names, parents, &mut marks, &mut out)?;
        }
        Ok(out)
    }

    fn compute_components(parents: &[Vec<ClassId>]) -> (Vec<usize>, usize) {
        let n = parents.len();
        let mut link: Vec<usize> = (0..n).collect();

        fn find(link: &mut [usize], mut x: usize) -> usize {
            while link[x] != x {
                link[x] = link[link[x]];
                x = link[x];
            }
            x
        }

        for (child, ps) in parents.iter().enumerate() {
            for p in ps {
                let a = find(&mut link, child);
                let b = find(&mut link, p.0);
                if a != b {
                    link[a.max(b)] = a.min(b);
                }
            }
        }

        let mut numbering = HashMap::new();
        let mut components = Vec::with_capacity(n);
        for i in 0..n {
            let root = find(&mut link, i);
            let next = numbering.len();
            components.push(*numbering.entry(root).or_insert(next));
        }
        let count = numbering.len();
        (components, count)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClassId> {
        (0..self.names.len()).map(ClassId)
    }

    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.index.get(name).copied()
    }

    pub fn id(&self, name: &str) -> Result<ClassId, TypeError> {
        self.lookup(name)
            .ok_or_else(|| TypeError::UnknownClass(name.to_string()))
    }

    pub fn name(&self, id: ClassId) -> &str {
        &self.names[id.0]
    }

    pub fn parents(&self, id: ClassId) -> &[ClassId] {
        &self.parents[id.0]
    }

    /// Strict transitive ancestors
    pub fn all_parents(&self, id: ClassId) -> &BTreeSet<ClassId> {
        &self.ancestors[id.0]
    }

    /// Strict transitive descendants
    pub fn all_children(&self, id: ClassId) -> &BTreeSet<ClassId> {
        &self.descendants[id.0]
    }

    pub fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        sub == sup || self.ancestors[sub.0].contains(&sup)
    }

    /// Objects of classes in the same component share one FOL sort
    pub fn component(&self, id: ClassId) -> usize {
        self.components[id.0]
    }

    pub fn component_count(&self) -> usize {
        self.component_count
    }

    /// Classes of a component, in declaration order
    pub fn component_members(&self, component: usize) -> impl Iterator<Item = ClassId> + '_ {
        self.ids().filter(move |id| self.components[id.0] == component)
    }

    // -------------------------------------------------------------------------
    // Signature algebra
    // -------------------------------------------------------------------------

    /// Ancestors-or-self of every member of the signature
    pub fn closure(&self, sig: &TypeSig) -> BTreeSet<ClassId> {
        let mut out = BTreeSet::new();
        for class in &sig.classes {
            out.insert(*class);
            out.extend(self.ancestors[class.0].iter().copied());
        }
        out
    }

    /// Drop every class that is a strict ancestor of another member
    pub fn canonicalize(&self, classes: impl IntoIterator<Item = ClassId>) -> TypeSig {
        let all: BTreeSet<ClassId> = classes.into_iter().collect();
        let redundant: BTreeSet<ClassId> = all
            .iter()
            .flat_map(|c| self.ancestors[c.0].iter().copied())
            .collect();
        TypeSig {
            classes: all.difference(&redundant).copied().collect(),
        }
    }

    /// Least common supertype.
    ///
    /// Bottom is the identity; two non-bottom signatures without a common
    /// ancestor produce bottom, which is an error when `raise_on_incorrect`.
    pub fn join(
        &self,
        a: &TypeSig,
        b: &TypeSig,
        raise_on_incorrect: bool,
    ) -> Result<TypeSig, TypeError> {
        if a.is_bottom() {
            return Ok(b.clone());
        }
        if b.is_bottom() {
            return Ok(a.clone());
        }
        let left = self.closure(a);
        let right = self.closure(b);
        let joined = self.canonicalize(left.intersection(&right).copied());
        if joined.is_bottom() && raise_on_incorrect {
            return Err(TypeError::IncompatibleTypes {
                left: a.describe(self),
                right: b.describe(self),
            });
        }
        Ok(joined)
    }

    /// Greatest common subtype; bottom when the members cannot share a sort
    pub fn meet(&self, a: &TypeSig, b: &TypeSig) -> TypeSig {
        if a.is_bottom() || b.is_bottom() {
            return TypeSig::bottom();
        }
        let merged = self.canonicalize(a.classes.iter().chain(b.classes.iter()).copied());
        match self.component_of(&merged) {
            Some(_) => merged,
            None => TypeSig::bottom(),
        }
    }

    /// Closure-containment order: a larger closure is a more specific type
    pub fn compare(&self, a: &TypeSig, b: &TypeSig) -> Option<Ordering> {
        let left = self.closure(a);
        let right = self.closure(b);
        if left == right {
            Some(Ordering::Equal)
        } else if left.is_superset(&right) {
            Some(Ordering::Less)
        } else if left.is_subset(&right) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    /// The component all members live in; `None` for bottom or mixed sets
    pub fn component_of(&self, sig: &TypeSig) -> Option<usize> {
        let mut components = sig.classes.iter().map(|c| self.components[c.0]);
        let first = components.next()?;
        components.all(|c| c == first).then_some(first)
    }
}

// =============================================================================
// Type Signatures
// =============================================================================

/// A canonical set of classes; an object of this type belongs to every member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TypeSig {
    classes: BTreeSet<ClassId>,
}

impl TypeSig {
    pub fn bottom() -> Self {
        Self::default()
    }

    pub fn class(id: ClassId) -> Self {
        Self {
            classes: BTreeSet::from([id]),
        }
    }

    pub fn is_bottom(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.classes.iter().copied()
    }

    pub fn describe(&self, graph: &ClassGraph) -> String {
        if self.classes.is_empty() {
            return "<bottom>".to_string();
        }
        let names: Vec<&str> = self.classes.iter().map(|c| graph.name(*c)).collect();
        format!("{{{}}}", names.join(", "))
    }
}

// =============================================================================
// Cardinalities
// =============================================================================

/// Object-count bounds; `max == None` means "many".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cardinality {
    #[serde(default)]
    pub min: u32,
    #[serde(default)]
    pub max: Option<u32>,
}

impl Cardinality {
    pub const fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    pub const fn one() -> Self {
        Self::new(1, Some(1))
    }

    pub const fn optional() -> Self {
        Self::new(0, Some(1))
    }

    pub const fn any() -> Self {
        Self::new(0, None)
    }

    pub const fn empty() -> Self {
        Self::new(0, Some(0))
    }

    pub fn is_valid(&self) -> bool {
        self.max.map_or(true, |max| self.min <= max)
    }

    pub fn is_singleton(&self) -> bool {
        self.min == 1 && self.max == Some(1)
    }

    pub fn at_most_one(&self) -> bool {
        matches!(self.max, Some(m) if m <= 1)
    }

    /// Bounds of a subcollection
    pub fn subset(&self) -> Self {
        Self::new(0, self.max)
    }

    /// Bounds of a union of possibly overlapping collections
    pub fn overlapping_union(&self, other: &Self) -> Self {
        let sum = *self + *other;
        Self::new(self.min.max(other.min), sum.max)
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::any()
    }
}

impl BitOr for Cardinality {
    type Output = Cardinality;

    /// Either-or join: the loosest bounds covering both
    fn bitor(self, rhs: Self) -> Self {
        let max = match (self.max, rhs.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Cardinality::new(self.min.min(rhs.min), max)
    }
}

impl BitAnd for Cardinality {
    type Output = Cardinality;

    fn bitand(self, rhs: Self) -> Self {
        let max = match (self.max, rhs.max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        Cardinality::new(self.min.max(rhs.min), max)
    }
}

impl Add for Cardinality {
    type Output = Cardinality;

    /// Disjoint sum, saturating at "many"
    fn add(self, rhs: Self) -> Self {
        let max = match (self.max, rhs.max) {
            (Some(a), Some(b)) => a.checked_add(b),
            _ => None,
        };
        Cardinality::new(self.min.saturating_add(rhs.min), max)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, many]", self.min),
        }
    }
}

// =============================================================================
// Objset Types
// =============================================================================

/// Static type of an objset expression: class signature plus size bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjsetType {
    pub sig: TypeSig,
    pub card: Cardinality,
}

impl ObjsetType {
    pub fn new(sig: TypeSig, card: Cardinality) -> Self {
        Self { sig, card }
    }

    pub fn of_class(id: ClassId) -> Self {
        Self::new(TypeSig::class(id), Cardinality::any())
    }

    pub fn bottom() -> Self {
        Self::new(TypeSig::bottom(), Cardinality::empty())
    }

    pub fn with_card(&self, card: Cardinality) -> Self {
        Self::new(self.sig.clone(), card)
    }

    /// Pointwise `|`: join the signatures, join the cardinalities
    pub fn join(&self, other: &Self, graph: &ClassGraph) -> Result<Self, TypeError> {
        Ok(Self::new(
            graph.join(&self.sig, &other.sig, true)?,
            self.card | other.card,
        ))
    }

    /// Pointwise `&`: meet the signatures, intersect the cardinalities
    pub fn intersect(&self, other: &Self, graph: &ClassGraph) -> Self {
        Self::new(graph.meet(&self.sig, &other.sig), self.card & other.card)
    }
}
