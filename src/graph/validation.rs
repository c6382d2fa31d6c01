//! Structural schema validation.
//!
//! Every rule is a read-only check over buffered graph state producing a
//! list of [`Violation`]s. Declaration checks run synchronously at the
//! mutation site, where a non-empty list rejects the mutation before any
//! state change; the commit pass re-examines relation types so violations
//! arising from interacting mutations are still caught.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::encoding::{Annotations, Kind, VertexId};
use crate::error::Result;
use crate::graph::SchemaGraph;

/// One structural rule violation, carrying the labels involved.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Violation {
    #[error("'{label}' cannot subtype '{supertype}': the hierarchy would become cyclic")]
    CyclicSupertype { label: String, supertype: String },
    #[error("'{label}' declares '{member}' overriding '{overridden}', which is not inherited")]
    LostOverride {
        label: String,
        member: String,
        overridden: String,
    },
    #[error("'{label}' cannot be concrete while its supertype '{supertype}' is abstract")]
    AbstractSupertype { label: String, supertype: String },
    #[error("'{label}' has instances")]
    TypeHasInstances { label: String },
    #[error("'{label}' has subtypes, including '{subtype}'")]
    TypeHasSubtypes { label: String, subtype: String },
    #[error("'{label}' cannot override '{overridden}' through '{member}': it is not inherited")]
    OverrideNotInherited {
        label: String,
        member: String,
        overridden: String,
    },
    #[error("'{overridden}' overridden through '{member}' of '{label}' is not a supertype of it")]
    OverrideNotSupertype {
        label: String,
        member: String,
        overridden: String,
    },
    #[error("'{label}' inherits a role named '{role}', which must be overridden, not redeclared")]
    RoleNameConflict { label: String, role: String },
    #[error("'{member}' of '{label}' is overridden by subtype '{subtype}'")]
    OverriddenInUse {
        label: String,
        member: String,
        subtype: String,
    },
    #[error("'{label}' owns '{attribute}' with weaker annotations than it inherits")]
    OwnsAnnotationConflict { label: String, attribute: String },
    #[error("concrete relation type '{label}' relates no role")]
    RelationWithoutRole { label: String },
    #[error("concrete relation type '{relation}' relates abstract role '{role}'")]
    AbstractRole { relation: String, role: String },
}

#[derive(Clone, Copy)]
enum EdgeFamily {
    Relates,
    Owns,
    Plays,
}

fn declared_pairs(
    graph: &mut SchemaGraph,
    vertex: VertexId,
    family: EdgeFamily,
) -> Result<Vec<(VertexId, Option<VertexId>)>> {
    match family {
        EdgeFamily::Relates => graph.declared_relates(vertex),
        EdgeFamily::Owns => Ok(graph
            .declared_owns(vertex)?
            .into_iter()
            .map(|(attribute, overridden, _)| (attribute, overridden))
            .collect()),
        EdgeFamily::Plays => graph.declared_plays(vertex),
    }
}

/// The member set a descendant would inherit if `pivot`'s supertype chain
/// began at `base`: the closure at the new supertype folded through the
/// declarations between `pivot` and the descendant's parent.
fn inherited_above(
    graph: &mut SchemaGraph,
    descendant: VertexId,
    pivot: VertexId,
    base: &BTreeSet<VertexId>,
    family: EdgeFamily,
) -> Result<BTreeSet<VertexId>> {
    let mut path = vec![descendant];
    let mut current = descendant;
    while current != pivot {
        let Some(parent) = graph.supertype(current)? else {
            break;
        };
        path.push(parent);
        current = parent;
    }
    let mut set = base.clone();
    for &vertex in path.iter().rev() {
        if vertex == descendant {
            break;
        }
        let declared = declared_pairs(graph, vertex, family)?;
        for (_, overridden) in &declared {
            if let Some(overridden) = overridden {
                set.remove(overridden);
            }
        }
        for (member, _) in &declared {
            set.insert(*member);
        }
    }
    Ok(set)
}

/// Supertype replacement: the hierarchy must stay acyclic, and every
/// override declared by the moved type or its subtypes must still resolve
/// against what the new supertype provides.
pub(crate) fn validate_set_supertype(
    graph: &mut SchemaGraph,
    sub: VertexId,
    new_super: VertexId,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let sub_label = graph.label_of(sub)?;
    let super_label = graph.label_of(new_super)?;
    if sub == new_super || graph.supertypes(new_super)?.contains(&sub) {
        violations.push(Violation::CyclicSupertype {
            label: sub_label,
            supertype: super_label,
        });
        return Ok(violations);
    }

    let kind = graph.kind_of(sub)?;
    let mut descendants = vec![sub];
    descendants.extend(graph.subtypes(sub)?.iter().copied());

    if kind == Kind::RelationType {
        let base: BTreeSet<VertexId> = graph
            .related_role_types(new_super)?
            .iter()
            .copied()
            .collect();
        let root_role = graph.roots()?.role;
        for &descendant in &descendants {
            let inherited = inherited_above(graph, descendant, sub, &base, EdgeFamily::Relates)?;
            for (role, overridden) in graph.declared_relates(descendant)? {
                let Some(overridden) = overridden else { continue };
                if overridden == root_role || inherited.contains(&overridden) {
                    continue;
                }
                violations.push(Violation::LostOverride {
                    label: graph.label_of(descendant)?,
                    member: graph.scoped_label_of(role)?,
                    overridden: graph.scoped_label_of(overridden)?,
                });
            }
        }
    }

    if matches!(kind, Kind::EntityType | Kind::RelationType) {
        let owns_base: BTreeSet<VertexId> =
            graph.owns_closure(new_super)?.iter().copied().collect();
        for &descendant in &descendants {
            let inherited = inherited_above(graph, descendant, sub, &owns_base, EdgeFamily::Owns)?;
            for (attribute, overridden, _) in graph.declared_owns(descendant)? {
                let Some(overridden) = overridden else { continue };
                if inherited.contains(&overridden) {
                    continue;
                }
                violations.push(Violation::LostOverride {
                    label: graph.label_of(descendant)?,
                    member: graph.label_of(attribute)?,
                    overridden: graph.label_of(overridden)?,
                });
            }
        }
        for (attribute, _, annotations) in graph.declared_owns(sub)? {
            if let Some(inherited) = graph.effective_owns_annotations(new_super, attribute)? {
                if !annotations.covers(inherited) {
                    violations.push(Violation::OwnsAnnotationConflict {
                        label: graph.label_of(sub)?,
                        attribute: graph.label_of(attribute)?,
                    });
                }
            }
        }

        let plays_base: BTreeSet<VertexId> = graph.plays_closure(new_super)?.into_iter().collect();
        for &descendant in &descendants {
            let inherited =
                inherited_above(graph, descendant, sub, &plays_base, EdgeFamily::Plays)?;
            for (role, overridden) in graph.declared_plays(descendant)? {
                let Some(overridden) = overridden else { continue };
                if inherited.contains(&overridden) {
                    continue;
                }
                violations.push(Violation::LostOverride {
                    label: graph.label_of(descendant)?,
                    member: graph.scoped_label_of(role)?,
                    overridden: graph.scoped_label_of(overridden)?,
                });
            }
        }
    }

    Ok(violations)
}

/// Declaring a role: an inherited role of the same name must be overridden,
/// and a named override target must actually be inherited.
pub(crate) fn validate_relates_add(
    graph: &mut SchemaGraph,
    relation: VertexId,
    role_label: &str,
    overridden_label: Option<&str>,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let relation_label = graph.label_of(relation)?;
    let supertype = graph.supertype(relation)?;

    let inherited: Vec<VertexId> = match supertype {
        Some(supertype) => graph.related_role_types(supertype)?.iter().copied().collect(),
        None => Vec::new(),
    };
    for &role in &inherited {
        let label = graph.label_of(role)?;
        if label == role_label && overridden_label != Some(label.as_str()) {
            violations.push(Violation::RoleNameConflict {
                label: relation_label.clone(),
                role: role_label.to_owned(),
            });
        }
    }
    if let Some(target) = overridden_label {
        let mut found = false;
        for &role in &inherited {
            if graph.label_of(role)? == target {
                found = true;
                break;
            }
        }
        if !found {
            violations.push(Violation::OverrideNotInherited {
                label: relation_label,
                member: role_label.to_owned(),
                overridden: target.to_owned(),
            });
        }
    }
    Ok(violations)
}

/// Undeclaring a role: no subtype may still override it.
pub(crate) fn validate_relates_remove(
    graph: &mut SchemaGraph,
    relation: VertexId,
    role: VertexId,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let subtypes: Vec<VertexId> = graph.subtypes(relation)?.iter().copied().collect();
    for subtype in subtypes {
        for (_, overridden) in graph.declared_relates(subtype)? {
            if overridden == Some(role) {
                violations.push(Violation::OverriddenInUse {
                    label: graph.label_of(relation)?,
                    member: graph.scoped_label_of(role)?,
                    subtype: graph.label_of(subtype)?,
                });
            }
        }
    }
    Ok(violations)
}

/// Declaring an ownership: the override target must be inherited and a
/// supertype of the attribute, and annotations may only tighten what is
/// inherited for the same attribute.
pub(crate) fn validate_owns_add(
    graph: &mut SchemaGraph,
    owner: VertexId,
    attribute: VertexId,
    overridden: Option<VertexId>,
    annotations: Annotations,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let owner_label = graph.label_of(owner)?;
    let attribute_label = graph.label_of(attribute)?;
    let supertype = graph.supertype(owner)?;

    if let Some(target) = overridden {
        let inherited = match supertype {
            Some(supertype) => graph.owns_closure(supertype)?.contains(&target),
            None => false,
        };
        if !inherited {
            violations.push(Violation::OverrideNotInherited {
                label: owner_label.clone(),
                member: attribute_label.clone(),
                overridden: graph.label_of(target)?,
            });
        }
        if target != attribute && !graph.supertypes(attribute)?.contains(&target) {
            violations.push(Violation::OverrideNotSupertype {
                label: owner_label.clone(),
                member: attribute_label.clone(),
                overridden: graph.label_of(target)?,
            });
        }
    }
    if let Some(supertype) = supertype {
        if let Some(inherited) = graph.effective_owns_annotations(supertype, attribute)? {
            if !annotations.covers(inherited) {
                violations.push(Violation::OwnsAnnotationConflict {
                    label: owner_label,
                    attribute: attribute_label,
                });
            }
        }
    }
    Ok(violations)
}

/// Undeclaring an ownership: no subtype may still override it.
pub(crate) fn validate_owns_remove(
    graph: &mut SchemaGraph,
    owner: VertexId,
    attribute: VertexId,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let subtypes: Vec<VertexId> = graph.subtypes(owner)?.iter().copied().collect();
    for subtype in subtypes {
        for (_, overridden, _) in graph.declared_owns(subtype)? {
            if overridden == Some(attribute) {
                violations.push(Violation::OverriddenInUse {
                    label: graph.label_of(owner)?,
                    member: graph.label_of(attribute)?,
                    subtype: graph.label_of(subtype)?,
                });
            }
        }
    }
    Ok(violations)
}

/// Declaring a plays: a named override target must be played by the
/// supertype.
pub(crate) fn validate_plays_add(
    graph: &mut SchemaGraph,
    player: VertexId,
    role: VertexId,
    overridden: Option<VertexId>,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    if let Some(target) = overridden {
        let inherited = match graph.supertype(player)? {
            Some(supertype) => graph.plays_closure(supertype)?.contains(&target),
            None => false,
        };
        if !inherited {
            violations.push(Violation::OverrideNotInherited {
                label: graph.label_of(player)?,
                member: graph.scoped_label_of(role)?,
                overridden: graph.scoped_label_of(target)?,
            });
        }
    }
    Ok(violations)
}

/// Undeclaring a plays: no subtype may still override it.
pub(crate) fn validate_plays_remove(
    graph: &mut SchemaGraph,
    player: VertexId,
    role: VertexId,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let subtypes: Vec<VertexId> = graph.subtypes(player)?.iter().copied().collect();
    for subtype in subtypes {
        for (_, overridden) in graph.declared_plays(subtype)? {
            if overridden == Some(role) {
                violations.push(Violation::OverriddenInUse {
                    label: graph.label_of(player)?,
                    member: graph.scoped_label_of(role)?,
                    subtype: graph.label_of(subtype)?,
                });
            }
        }
    }
    Ok(violations)
}

/// A type with instances cannot become abstract.
pub(crate) fn validate_set_abstract(
    graph: &mut SchemaGraph,
    vertex: VertexId,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    if graph.has_instances(vertex) {
        violations.push(Violation::TypeHasInstances {
            label: graph.label_of(vertex)?,
        });
    }
    Ok(violations)
}

/// An attribute type cannot become concrete under an abstract, non-root
/// supertype.
pub(crate) fn validate_unset_abstract(
    graph: &mut SchemaGraph,
    vertex: VertexId,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    if graph.kind_of(vertex)? == Kind::AttributeType {
        if let Some(supertype) = graph.supertype(vertex)? {
            if !graph.is_root(supertype)? && graph.is_abstract(supertype)? {
                violations.push(Violation::AbstractSupertype {
                    label: graph.label_of(vertex)?,
                    supertype: graph.label_of(supertype)?,
                });
            }
        }
    }
    Ok(violations)
}

/// A type with instances or subtypes cannot be deleted.
pub(crate) fn validate_delete(graph: &mut SchemaGraph, vertex: VertexId) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let label = graph.scoped_label_of(vertex)?;
    if graph.has_instances(vertex) {
        violations.push(Violation::TypeHasInstances {
            label: label.clone(),
        });
    }
    let subtypes = graph.subtypes(vertex)?;
    if let Some(&subtype) = subtypes.first() {
        violations.push(Violation::TypeHasSubtypes {
            label,
            subtype: graph.scoped_label_of(subtype)?,
        });
    }
    Ok(violations)
}

/// Commit pass: every concrete relation type must relate a non-root role,
/// and none of its related roles may be abstract.
pub(crate) fn commit_violations(graph: &mut SchemaGraph) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    for relation in graph.relation_vertices() {
        graph.load_properties(relation)?;
        if graph.vertex(relation)?.is_root() || graph.is_abstract(relation)? {
            continue;
        }
        let label = graph.label_of(relation)?;
        let root_role = graph.roots()?.role;
        let related: Vec<VertexId> = graph
            .related_role_types(relation)?
            .iter()
            .copied()
            .filter(|&role| role != root_role)
            .collect();
        if related.is_empty() {
            violations.push(Violation::RelationWithoutRole { label });
            continue;
        }
        for role in related {
            if graph.is_abstract(role)? {
                violations.push(Violation::AbstractRole {
                    relation: label.clone(),
                    role: graph.scoped_label_of(role)?,
                });
            }
        }
    }
    Ok(violations)
}
