use serde::{Deserialize, Serialize};

/// Source-level ordering guarantee, a boundary property reported by
/// `getSourceProperties()`. Configuration tag rather than subtype
/// polymorphism.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceOrdering {
    Ordered,
    Unordered,
}

/// Whether the source assigns a stable per-row identifier, also reported by
/// `getSourceProperties()`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowIdSupport(pub bool);

impl RowIdSupport {
    pub fn is_supported(&self) -> bool {
        self.0
    }
}

/// The four merge-query variants selected by the two orthogonal booleans
/// `sourceRowIdSupported` and `sourceEventOrdering`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeMode {
    pub ordering: SourceOrdering,
    pub row_id: RowIdSupport,
}

impl MergeMode {
    pub fn new(ordering: SourceOrdering, row_id: RowIdSupport) -> Self {
        Self { ordering, row_id }
    }

    pub fn is_unordered(&self) -> bool {
        matches!(self.ordering, SourceOrdering::Unordered)
    }

    pub fn has_row_id(&self) -> bool {
        self.row_id.is_supported()
    }
}
