//! Algebraic properties of the class lattice and cardinalities

use proptest::prelude::*;
use std::cmp::Ordering;

use dsverify::ir::ClassDecl;
use dsverify::types::{Cardinality, ClassGraph, ClassId, TypeSig};

/// Two components: a diamond under Entity, and a small Tag hierarchy
fn graph() -> ClassGraph {
    ClassGraph::new(&[
        ClassDecl::new("Entity", &[]),
        ClassDecl::new("User", &["Entity"]),
        ClassDecl::new("Resource", &["Entity"]),
        ClassDecl::new("Owner", &["User", "Resource"]),
        ClassDecl::new("Admin", &["User"]),
        ClassDecl::new("Tag", &[]),
        ClassDecl::new("Label", &["Tag"]),
    ])
    .unwrap()
}

fn sig(graph: &ClassGraph, members: &[usize]) -> TypeSig {
    graph.canonicalize(members.iter().map(|i| ClassId(i % graph.len())))
}

fn members() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..7, 0..4)
}

fn cardinality() -> impl Strategy<Value = Cardinality> {
    (0u32..4, prop::option::of(0u32..4)).prop_map(|(min, extra)| {
        Cardinality::new(min, extra.map(|e| min + e))
    })
}

proptest! {
    #[test]
    fn join_is_commutative(a in members(), b in members()) {
        let graph = graph();
        let (a, b) = (sig(&graph, &a), sig(&graph, &b));
        prop_assert_eq!(
            graph.join(&a, &b, false).unwrap(),
            graph.join(&b, &a, false).unwrap()
        );
    }

    #[test]
    fn join_is_idempotent(a in members()) {
        let graph = graph();
        let a = sig(&graph, &a);
        prop_assert_eq!(graph.join(&a, &a, true).unwrap(), a);
    }

    #[test]
    fn canonicalize_is_idempotent(a in members()) {
        let graph = graph();
        let once = sig(&graph, &a);
        let twice = graph.canonicalize(once.classes());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn compare_is_reflexive(a in members()) {
        let graph = graph();
        let a = sig(&graph, &a);
        prop_assert_eq!(graph.compare(&a, &a), Some(Ordering::Equal));
    }

    #[test]
    fn join_is_an_upper_bound(a in members(), b in members()) {
        let graph = graph();
        let (a, b) = (sig(&graph, &a), sig(&graph, &b));
        let joined = graph.join(&a, &b, false).unwrap();
        if !joined.is_bottom() && !a.is_bottom() {
            prop_assert!(matches!(
                graph.compare(&a, &joined),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ));
        }
    }

    #[test]
    fn cardinality_join_and_meet_commute(a in cardinality(), b in cardinality()) {
        prop_assert_eq!(a | b, b | a);
        prop_assert_eq!(a & b, b & a);
        prop_assert_eq!(a | a, a);
        prop_assert_eq!(a & a, a);
    }

    #[test]
    fn any_absorbs_in_join(a in cardinality()) {
        prop_assert_eq!(a | Cardinality::any(), Cardinality::new(0, None));
        prop_assert_eq!(a & Cardinality::any(), a);
    }
}

#[test]
fn test_descendants_are_less() {
    let graph = graph();
    let entity = graph.id("Entity").unwrap();
    for name in ["User", "Resource", "Owner", "Admin"] {
        let class = graph.id(name).unwrap();
        assert_eq!(
            graph.compare(&TypeSig::class(class), &TypeSig::class(entity)),
            Some(Ordering::Less),
            "{} should be below Entity",
            name
        );
        assert_eq!(
            graph.compare(&TypeSig::class(entity), &TypeSig::class(class)),
            Some(Ordering::Greater)
        );
    }
}

#[test]
fn test_unrelated_classes_are_incomparable() {
    let graph = graph();
    let user = TypeSig::class(graph.id("User").unwrap());
    let tag = TypeSig::class(graph.id("Tag").unwrap());
    assert_eq!(graph.compare(&user, &tag), None);
    assert!(graph.join(&user, &tag, true).is_err());
    assert!(graph.join(&user, &tag, false).unwrap().is_bottom());
}

#[test]
fn test_diamond_join() {
    let graph = graph();
    let owner = TypeSig::class(graph.id("Owner").unwrap());
    let admin = TypeSig::class(graph.id("Admin").unwrap());
    let joined = graph.join(&owner, &admin, true).unwrap();
    assert_eq!(joined.describe(&graph), "{User}");
}

#[test]
fn test_cardinality_algebra() {
    assert_eq!(Cardinality::one() | Cardinality::any(), Cardinality::any());
    assert_eq!(Cardinality::one() & Cardinality::any(), Cardinality::one());
    assert_eq!(Cardinality::one() + Cardinality::one(), Cardinality::new(2, Some(2)));
    assert_eq!(Cardinality::one().subset(), Cardinality::optional());
    assert_eq!(Cardinality::new(2, None).to_string(), "[2, many]");
}
