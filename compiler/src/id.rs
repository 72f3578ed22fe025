// id.rs — Stable identifiers for IR entities.
//
// Index variables, tensor nodes, and loop-nest entries are stored in arenas
// and referenced by these u32 newtypes. Ids are allocated in source order,
// so identical inputs always produce identical id assignments.

use serde::Serialize;
use std::fmt;

/// Stable identifier for a tensor node in the `IrContext` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TensorId(pub u32);

/// Stable identifier for an index variable in the `IrContext` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IndexVarId(pub u32);

/// Index of a loop in the ordered loop-nest arena. The "linking parent"
/// back-reference of a linked loop is a `LoopId`, never an owning pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoopId(pub u32);

impl TensorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl IndexVarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl LoopId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for IndexVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}
