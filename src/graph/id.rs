//! Identity types for pipeline graphs.
//!
//! Nodes, sources and sinks live in three disjoint identifier spaces. Ids
//! are opaque integers minted monotonically by the owning [`Graph`]: a
//! rewrite that introduces new elements always mints ids strictly greater
//! than anything already used, so ids from before a rewrite never collide
//! with ids created by it.
//!
//! [`Graph`]: crate::graph::Graph

use std::fmt;

/// Identifier of a computation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Sentinel standing for the pipeline's external input.
    ///
    /// Lives outside the minted id space and never appears in a graph's
    /// operator table; it may appear in dependency lists, where the
    /// executor resolves it to the value passed to `apply`.
    pub const SOURCE: NodeId = NodeId(u64::MAX);

    /// Whether this id is the external-input sentinel.
    #[inline]
    pub fn is_sentinel(self) -> bool {
        self == Self::SOURCE
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            write!(f, "NodeId(SOURCE)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

/// Identifier of a graph input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

/// Identifier of a graph output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SinkId({})", self.0)
    }
}

/// A dependency reference: the things a node or sink may depend on.
///
/// Sinks name exactly one of these; nodes name an ordered sequence of them
/// (the order is the argument order handed to the operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DepRef {
    /// A computation node (or the [`NodeId::SOURCE`] sentinel).
    Node(NodeId),
    /// A graph input port.
    Source(SourceId),
}

impl DepRef {
    /// The node id, if this reference names a node.
    #[inline]
    pub fn as_node(self) -> Option<NodeId> {
        match self {
            DepRef::Node(n) => Some(n),
            DepRef::Source(_) => None,
        }
    }

    /// The source id, if this reference names a source.
    #[inline]
    pub fn as_source(self) -> Option<SourceId> {
        match self {
            DepRef::Node(_) => None,
            DepRef::Source(s) => Some(s),
        }
    }

    /// Whether this is the external-input sentinel.
    #[inline]
    pub fn is_sentinel(self) -> bool {
        matches!(self, DepRef::Node(n) if n.is_sentinel())
    }
}

impl From<NodeId> for DepRef {
    fn from(id: NodeId) -> Self {
        DepRef::Node(id)
    }
}

impl From<SourceId> for DepRef {
    fn from(id: SourceId) -> Self {
        DepRef::Source(id)
    }
}

impl fmt::Display for DepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepRef::Node(n) => fmt::Display::fmt(n, f),
            DepRef::Source(s) => fmt::Display::fmt(s, f),
        }
    }
}
