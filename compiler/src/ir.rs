//! Typed intermediate representation of a data store specification.
//!
//! A [`Spec`] is the plain, serde-friendly form handed over by the external
//! typechecker (or loaded from JSON). [`DataStore`] is the validated form:
//! class graph built, relations resolved and indexed, actions and invariants
//! addressable by name. Everything here is read-only once built.

pub mod expr;
pub mod typing;

pub use expr::{Block, BoolLit, FormulaExpr, LoopKind, ObjsetExpr, QuantVar, Statement};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Cardinality, ClassGraph, ClassId, TypeError, TypeSig};

/// Complete specification as produced by the typechecker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default)]
    pub classes: Vec<ClassDecl>,

    #[serde(default)]
    pub relations: Vec<RelationDecl>,

    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(default)]
    pub invariants: Vec<Invariant>,
}

impl Spec {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,

    /// Direct parents, in declaration order
    #[serde(default)]
    pub parents: Vec<String>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>, parents: &[&str]) -> Self {
        Self {
            name: name.into(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDecl {
    /// Owning (source) class
    pub class: String,

    pub name: String,

    /// Target class
    pub target: String,

    /// Bounds on the number of targets per source object
    #[serde(default)]
    pub cardinality: Cardinality,

    /// Name of a relation on `target` whose edge set this one reads backwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_of: Option<String>,
}

impl RelationDecl {
    pub fn new(class: &str, name: &str, target: &str) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::any(),
            inverse_of: None,
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn inverse_of(mut self, relation: &str) -> Self {
        self.inverse_of = Some(relation.to_string());
        self
    }
}

/// Action parameter: a nondeterministically chosen set of existing objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub class: String,

    #[serde(default = "Cardinality::one")]
    pub cardinality: Cardinality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,

    #[serde(default)]
    pub params: Vec<Param>,

    #[serde(default)]
    pub block: Block,
}

impl Action {
    pub fn new(name: impl Into<String>, statements: Vec<Statement>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            block: Block::new(statements),
        }
    }

    pub fn with_param(mut self, name: &str, class: &str, cardinality: Cardinality) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            class: class.to_string(),
            cardinality,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invariant {
    pub name: String,
    pub formula: FormulaExpr,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Invariant {
    pub fn new(name: impl Into<String>, formula: FormulaExpr) -> Self {
        Self {
            name: name.into(),
            formula,
            description: None,
        }
    }
}

// =============================================================================
// Validated data store
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(pub usize);

/// A resolved relation
#[derive(Debug, Clone)]
pub struct Relation {
    pub id: RelationId,
    pub name: String,
    pub source: ClassId,
    pub target: ClassId,
    pub cardinality: Cardinality,

    /// The relation whose edge set this one traverses in reverse
    pub inverse_of: Option<RelationId>,
}

impl Relation {
    /// The relation owning the edge set, and whether this one reads it backwards
    pub fn base(&self) -> (RelationId, bool) {
        match self.inverse_of {
            Some(base) => (base, true),
            None => (self.id, false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataStore {
    pub graph: ClassGraph,
    relations: Vec<Relation>,
    by_owner: HashMap<(ClassId, String), RelationId>,
    actions: IndexMap<String, Action>,
    invariants: IndexMap<String, Invariant>,
}

impl DataStore {
    pub fn new(spec: Spec) -> Result<Self, TypeError> {
        let graph = ClassGraph::new(&spec.classes)?;

        let mut relations = Vec::with_capacity(spec.relations.len());
        let mut by_owner = HashMap::new();
        for (i, decl) in spec.relations.iter().enumerate() {
            let source = graph.id(&decl.class)?;
            let target = graph.id(&decl.target)?;
            if !decl.cardinality.is_valid() {
                return Err(TypeError::InvalidCardinality {
                    context: format!("{}.{}", decl.class, decl.name),
                    cardinality: decl.cardinality,
                });
            }
            if by_owner
                .insert((source, decl.name.clone()), RelationId(i))
                .is_some()
            {
                return Err(TypeError::DuplicateRelation {
                    class: decl.class.clone(),
                    relation: decl.name.clone(),
                });
            }
            relations.push(Relation {
                id: RelationId(i),
                name: decl.name.clone(),
                source,
                target,
                cardinality: decl.cardinality,
                inverse_of: None,
            });
        }

        // Inverses resolve against the target class, once every relation exists
        for (i, decl) in spec.relations.iter().enumerate() {
            let Some(base_name) = &decl.inverse_of else {
                continue;
            };
            let label = format!("{}.{}", decl.class, decl.name);
            let source = relations[i].source;
            let target = relations[i].target;
            let base = by_owner.get(&(target, base_name.clone())).copied().ok_or_else(|| {
                TypeError::RelationNotFound {
                    relation: base_name.clone(),
                    type_name: decl.target.clone(),
                }
            })?;
            let base_decl = &spec.relations[base.0];
            if base_decl.inverse_of.is_some() {
                return Err(TypeError::InverseOfInverse {
                    relation: label,
                    inverse: format!("{}.{}", base_decl.class, base_decl.name),
                });
            }
            if base == RelationId(i) {
                return Err(TypeError::InverseMismatch {
                    relation: label,
                    inverse: base_name.clone(),
                    reason: "a relation cannot be its own inverse".to_string(),
                });
            }
            let base_target = relations[base.0].target;
            let related = graph.is_subclass_of(source, base_target)
                || graph.is_subclass_of(base_target, source);
            if !related {
                return Err(TypeError::InverseMismatch {
                    relation: label,
                    inverse: base_name.clone(),
                    reason: format!(
                        "{} does not point back to {}",
                        base_name,
                        graph.name(source)
                    ),
                });
            }
            relations[i].inverse_of = Some(base);
        }

        let mut actions = IndexMap::new();
        for action in spec.actions {
            if actions.contains_key(&action.name) {
                return Err(TypeError::DuplicateDeclaration {
                    kind: "action",
                    name: action.name,
                });
            }
            actions.insert(action.name.clone(), action);
        }

        let mut invariants = IndexMap::new();
        for invariant in spec.invariants {
            if invariants.contains_key(&invariant.name) {
                return Err(TypeError::DuplicateDeclaration {
                    kind: "invariant",
                    name: invariant.name,
                });
            }
            invariants.insert(invariant.name.clone(), invariant);
        }

        Ok(Self {
            graph,
            relations,
            by_owner,
            actions,
            invariants,
        })
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let spec = Spec::from_json(text)?;
        Ok(Self::new(spec)?)
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[id.0]
    }

    /// Relations that own an edge set (not declared as an inverse)
    pub fn base_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(|r| r.inverse_of.is_none())
    }

    pub fn owned_relations(&self, class: ClassId) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(move |r| r.source == class)
    }

    pub fn relation_label(&self, id: RelationId) -> String {
        let rel = self.relation(id);
        format!("{}.{}", self.graph.name(rel.source), rel.name)
    }

    /// Find a relation by name on any class of the signature or its ancestors
    pub fn relation_on(&self, sig: &TypeSig, name: &str) -> Result<&Relation, TypeError> {
        self.graph
            .closure(sig)
            .into_iter()
            .find_map(|class| self.by_owner.get(&(class, name.to_string())))
            .map(|id| &self.relations[id.0])
            .ok_or_else(|| TypeError::RelationNotFound {
                relation: name.to_string(),
                type_name: sig.describe(&self.graph),
            })
    }

    /// Base relations whose endpoints share a sort with the signature
    pub fn incident_relations(&self, sig: &TypeSig) -> Vec<RelationId> {
        let Some(component) = self.graph.component_of(sig) else {
            return Vec::new();
        };
        self.base_relations()
            .filter(|r| {
                self.graph.component(r.source) == component
                    || self.graph.component(r.target) == component
            })
            .map(|r| r.id)
            .collect()
    }

    pub fn action(&self, name: &str) -> Result<&Action, TypeError> {
        self.actions
            .get(name)
            .ok_or_else(|| TypeError::UnknownAction(name.to_string()))
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn invariant(&self, name: &str) -> Result<&Invariant, TypeError> {
        self.invariants
            .get(name)
            .ok_or_else(|| TypeError::UnknownInvariant(name.to_string()))
    }

    pub fn invariants(&self) -> impl Iterator<Item = &Invariant> {
        self.invariants.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> Spec {
        Spec {
            classes: vec![
                ClassDecl::new("User", &[]),
                ClassDecl::new("Admin", &["User"]),
                ClassDecl::new("Post", &[]),
            ],
            relations: vec![
                RelationDecl::new("User", "posts", "Post"),
                RelationDecl::new("Post", "author", "User")
                    .with_cardinality(Cardinality::one())
                    .inverse_of("posts"),
            ],
            ..Spec::default()
        }
    }

    #[test]
    fn test_inverse_resolves_to_base() {
        let store = DataStore::new(spec()).unwrap();
        let post = TypeSig::class(store.graph.id("Post").unwrap());
        let author = store.relation_on(&post, "author").unwrap();
        assert_eq!(author.base(), (RelationId(0), true));
        assert_eq!(store.base_relations().count(), 1);
    }

    #[test]
    fn test_relation_lookup_walks_ancestors() {
        let store = DataStore::new(spec()).unwrap();
        let admin = TypeSig::class(store.graph.id("Admin").unwrap());
        assert_eq!(store.relation_on(&admin, "posts").unwrap().name, "posts");
        assert!(matches!(
            store.relation_on(&admin, "author"),
            Err(TypeError::RelationNotFound { .. })
        ));
    }

    #[test]
    fn test_inverse_of_inverse_is_rejected() {
        let mut spec = spec();
        spec.relations
            .push(RelationDecl::new("User", "written", "Post").inverse_of("author"));
        assert!(matches!(
            DataStore::new(spec),
            Err(TypeError::InverseOfInverse { .. })
        ));
    }

    #[test]
    fn test_invalid_cardinality_is_rejected() {
        let mut spec = spec();
        spec.relations[0].cardinality = Cardinality::new(3, Some(1));
        assert!(matches!(
            DataStore::new(spec),
            Err(TypeError::InvalidCardinality { .. })
        ));
    }

    #[test]
    fn test_spec_from_json() {
        let json = serde_json::json!({
            "classes": [{"name": "C"}],
            "actions": [{
                "name": "wipe",
                "block": [{"kind": "delete", "objset": {"kind": "all_of", "class": "C"}}]
            }],
            "invariants": [{
                "name": "empty",
                "formula": {"kind": "is_empty", "objset": {"kind": "all_of", "class": "C"}}
            }]
        });
        let store = DataStore::from_json(&json.to_string()).unwrap();
        assert_eq!(store.action("wipe").unwrap().block.len(), 1);
        assert!(store.invariant("empty").is_ok());
        assert!(store.action("missing").is_err());
    }
}
