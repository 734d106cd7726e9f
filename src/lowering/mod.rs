//! Lowering of symbolic addresses to scratchpad offsets.
//!
//! - [`vpm`] - scratchpad usage classification and storage layout
//! - [`address`] - the address-to-offset lowering entry points

pub mod address;
pub mod vpm;

pub use address::{
    insert_address_to_element_offset, insert_address_to_offset, insert_address_to_stack_offset,
    insert_address_to_work_item_offset,
};
pub use vpm::{to_memory_access_type, vpm_storage_type, MemoryAccessType, VpmUsage};
