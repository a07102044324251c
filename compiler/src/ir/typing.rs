//! Static types of objset expressions.

use std::collections::HashMap;

use super::{DataStore, ObjsetExpr};
use crate::types::{Cardinality, ObjsetType, TypeError, TypeSig};

/// Types of the variables in scope
pub type TypeEnv = HashMap<String, ObjsetType>;

/// Infer the type of an objset expression
pub fn infer(store: &DataStore, expr: &ObjsetExpr, env: &TypeEnv) -> Result<ObjsetType, TypeError> {
    match expr {
        ObjsetExpr::AllOf { class } => Ok(ObjsetType::of_class(store.graph.id(class)?)),
        ObjsetExpr::Var { name } | ObjsetExpr::Iterator { name } => env
            .get(name)
            .cloned()
            .ok_or_else(|| TypeError::UndefinedVariable(name.clone())),
        ObjsetExpr::Subset { of } => {
            let inner = infer(store, of, env)?;
            Ok(inner.with_card(inner.card.subset()))
        }
        ObjsetExpr::OneOf { of } => Ok(infer(store, of, env)?.with_card(Cardinality::one())),
        ObjsetExpr::Union { parts } => {
            let mut acc: Option<ObjsetType> = None;
            for part in parts {
                let ty = infer(store, part, env)?;
                acc = Some(match acc {
                    None => ty,
                    Some(prev) => ObjsetType::new(
                        store.graph.join(&prev.sig, &ty.sig, true)?,
                        prev.card.overlapping_union(&ty.card),
                    ),
                });
            }
            Ok(acc.unwrap_or_else(ObjsetType::bottom))
        }
        ObjsetExpr::Deref { from, relation } => {
            let source = infer(store, from, env)?;
            let rel = store.relation_on(&source.sig, relation)?;
            let card = if source.card.at_most_one() && rel.cardinality.at_most_one() {
                Cardinality::optional()
            } else {
                Cardinality::any()
            };
            Ok(ObjsetType::new(TypeSig::class(rel.target), card))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassDecl, RelationDecl, Spec};

    fn store() -> DataStore {
        DataStore::new(Spec {
            classes: vec![
                ClassDecl::new("Animal", &[]),
                ClassDecl::new("Dog", &["Animal"]),
                ClassDecl::new("Cat", &["Animal"]),
                ClassDecl::new("Owner", &[]),
            ],
            relations: vec![RelationDecl::new("Owner", "pet", "Animal")
                .with_cardinality(Cardinality::optional())],
            ..Spec::default()
        })
        .unwrap()
    }

    #[test]
    fn test_union_joins_signatures() {
        let store = store();
        let expr = ObjsetExpr::union(vec![ObjsetExpr::all_of("Dog"), ObjsetExpr::all_of("Cat")]);
        let ty = infer(&store, &expr, &TypeEnv::new()).unwrap();
        assert_eq!(ty.sig, TypeSig::class(store.graph.id("Animal").unwrap()));
        assert_eq!(ty.card, Cardinality::any());
    }

    #[test]
    fn test_union_of_unrelated_classes_fails() {
        let store = store();
        let expr = ObjsetExpr::union(vec![ObjsetExpr::all_of("Dog"), ObjsetExpr::all_of("Owner")]);
        assert!(matches!(
            infer(&store, &expr, &TypeEnv::new()),
            Err(TypeError::IncompatibleTypes { .. })
        ));
    }

    #[test]
    fn test_one_of_is_singleton() {
        let store = store();
        let expr = ObjsetExpr::one_of(ObjsetExpr::all_of("Owner"));
        let ty = infer(&store, &expr, &TypeEnv::new()).unwrap();
        assert!(ty.card.is_singleton());
    }

    #[test]
    fn test_deref_through_optional_relation() {
        let store = store();
        let mut env = TypeEnv::new();
        env.insert(
            "o".to_string(),
            ObjsetType::of_class(store.graph.id("Owner").unwrap()).with_card(Cardinality::one()),
        );
        let ty = infer(&store, &ObjsetExpr::deref(ObjsetExpr::var("o"), "pet"), &env).unwrap();
        assert_eq!(ty.card, Cardinality::optional());
        assert_eq!(ty.sig.describe(&store.graph), "{Animal}");
    }

    #[test]
    fn test_undefined_variable() {
        let store = store();
        assert_eq!(
            infer(&store, &ObjsetExpr::var("nope"), &TypeEnv::new()).unwrap_err(),
            TypeError::UndefinedVariable("nope".to_string())
        );
    }
}
