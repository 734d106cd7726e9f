//! Scratchpad usage classification and storage layout.
//!
//! The on-chip scratchpad (VPM) is split into areas with different
//! sharing semantics: scratch and local-memory areas are shared by the
//! whole work-group, register-spill and stack areas exist once per QPU.

use crate::error::{CompilationStage, Error, Result};
use crate::ir::types::{DataType, NATIVE_VECTOR_WIDTH};

/// What a scratchpad area is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VpmUsage {
    /// General staging area for DMA transfers.
    Scratch,
    /// Backing store for work-group local memory.
    LocalMemory,
    /// Spill space of the register allocator.
    RegisterSpilling,
    /// The per-QPU stack frames.
    Stack,
}

/// The sharing semantics of a lowered memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryAccessType {
    /// The area is shared by all QPUs of the work-group.
    VpmSharedAccess,
    /// The area exists once per QPU; accesses add a per-QPU frame offset.
    VpmPerQpu,
}

/// Maps a scratchpad usage to the sharing semantics of accesses into it.
#[must_use]
pub fn to_memory_access_type(usage: VpmUsage) -> MemoryAccessType {
    match usage {
        VpmUsage::Scratch | VpmUsage::LocalMemory => MemoryAccessType::VpmSharedAccess,
        VpmUsage::RegisterSpilling | VpmUsage::Stack => MemoryAccessType::VpmPerQpu,
    }
}

/// Projects a type to its in-scratchpad layout.
///
/// The scratchpad is organized in rows of [`NATIVE_VECTOR_WIDTH`] lanes;
/// a scalar or vector element occupies a full row, arrays occupy one row
/// layout per element.
///
/// # Errors
///
/// [`Error::Unimplemented`] for struct and void types, which have no
/// scratchpad layout.
pub fn vpm_storage_type(ty: &DataType) -> Result<DataType> {
    match ty {
        DataType::Int { bits } | DataType::Vector { bits, .. } => Ok(DataType::Vector {
            bits: *bits,
            width: NATIVE_VECTOR_WIDTH,
        }),
        DataType::Pointer { .. } => Ok(DataType::Vector {
            bits: 32,
            width: NATIVE_VECTOR_WIDTH,
        }),
        DataType::Array { element, length } => Ok(DataType::array_of(
            vpm_storage_type(element)?,
            *length,
        )),
        DataType::Struct(_) | DataType::Void => Err(Error::Unimplemented {
            stage: CompilationStage::Lowering,
            detail: format!("no scratchpad layout for {ty}"),
        }),
    }
}
