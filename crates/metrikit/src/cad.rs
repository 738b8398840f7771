//! The seam to CAD geometry.
//!
//! The core never evaluates geometry itself. Where an operator needs a
//! point pulled onto the model it goes through the opaque [`Projection`]
//! callback; everything else it needs to know about geometry is derived
//! from the boundary discretization, by counting the distinct face ids
//! around a node.

use crate::error::Result;

/// Lowest-dimensional geometry entity supporting a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomEntity {
    Node(i32),
    Edge(i32),
    Face(i32),
}

/// Opaque projection onto the CAD model.
pub trait Projection: Send {
    /// Pull `xyz` onto `entity`; an error rejects the operator trying it.
    fn project(&self, xyz: &mut [f64; 3], entity: GeomEntity) -> Result<()>;
}

/// Where a node sits in the geometry, judged from the face ids of its
/// boundary triangles: none makes it interior, one puts it on a face,
/// two on a geometry edge, three or more pins it to a geometry node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomClass {
    Interior,
    Face(i32),
    Edge(i32, i32),
    Node,
}

impl GeomClass {
    pub fn from_faceids(ids: &[i32]) -> Self {
        match *ids {
            [] => GeomClass::Interior,
            [face] => GeomClass::Face(face),
            [a, b] => GeomClass::Edge(a, b),
            _ => GeomClass::Node,
        }
    }

    /// True on geometry edges and geometry nodes.
    pub fn on_edge_or_node(self) -> bool {
        matches!(self, GeomClass::Edge(_, _) | GeomClass::Node)
    }

    /// The entity a point supported here projects onto, if any.
    pub fn entity(self) -> Option<GeomEntity> {
        match self {
            GeomClass::Interior => None,
            GeomClass::Face(id) => Some(GeomEntity::Face(id)),
            GeomClass::Edge(a, b) => Some(GeomEntity::Edge(a.min(b))),
            GeomClass::Node => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_by_faceid_count() {
        assert_eq!(GeomClass::from_faceids(&[]), GeomClass::Interior);
        assert_eq!(GeomClass::from_faceids(&[3]), GeomClass::Face(3));
        assert_eq!(GeomClass::from_faceids(&[1, 2]), GeomClass::Edge(1, 2));
        assert_eq!(GeomClass::from_faceids(&[1, 2, 5]), GeomClass::Node);
        assert_eq!(GeomClass::from_faceids(&[1, 2, 5, 9]), GeomClass::Node);
    }

    #[test]
    fn test_entities() {
        assert_eq!(GeomClass::Interior.entity(), None);
        assert_eq!(GeomClass::Face(4).entity(), Some(GeomEntity::Face(4)));
        assert_eq!(GeomClass::Edge(7, 2).entity(), Some(GeomEntity::Edge(2)));
        assert!(GeomClass::Edge(1, 2).on_edge_or_node());
        assert!(!GeomClass::Face(1).on_edge_or_node());
    }
}
