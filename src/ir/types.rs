//! The data type system of the kernel IR.
//!
//! Types are structural: two types are equal when their shapes are equal.
//! Aggregates reference their element types through [`Arc`], so cloning a
//! type is cheap and type values can be shared freely between values,
//! locals and methods.
//!
//! # Widths
//!
//! Every type exposes two widths:
//!
//! - **Physical width**: the packed size of the data, with no padding.
//!   Used for index arithmetic on pointers, arrays and vectors.
//! - **In-memory width**: the size the type occupies in RAM or scratchpad,
//!   including alignment padding between struct fields and at the tail.

use std::fmt;
use std::sync::Arc;

/// Number of SIMD lanes of the accelerator.
///
/// All vector values are at most this wide, and the loop vectorizer widens
/// scalar loops to exactly this width.
pub const NATIVE_VECTOR_WIDTH: u8 = 16;

/// The address space a pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// No particular address space, can be any of the others.
    Generic,
    /// Private memory of the single work-item (register file or spilled).
    Private,
    /// Global DMA-backed main memory.
    Global,
    /// Read-only constant memory.
    Constant,
    /// Memory shared by the work-group (on-chip scratchpad).
    Local,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Private => write!(f, "private"),
            Self::Global => write!(f, "global"),
            Self::Constant => write!(f, "constant"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// An ordered collection of named fields with computed byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    /// Name of the struct type, for diagnostics only.
    pub name: String,
    /// The field types, in declaration order.
    pub fields: Vec<DataType>,
}

impl StructType {
    /// Creates a new struct type with the given name and fields.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<DataType>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Returns the byte offset of the field at `index`, including the
    /// alignment padding of all preceding fields.
    #[must_use]
    pub fn field_offset(&self, index: usize) -> Option<u32> {
        let mut offset = 0u32;
        for (i, field) in self.fields.iter().enumerate() {
            offset = offset.next_multiple_of(field.alignment().max(1));
            if i == index {
                return Some(offset);
            }
            offset += field.in_memory_width();
        }
        None
    }

    /// Returns the aligned size of the whole struct, including tail padding.
    #[must_use]
    pub fn in_memory_width(&self) -> u32 {
        let mut offset = 0u32;
        for field in &self.fields {
            offset = offset.next_multiple_of(field.alignment().max(1));
            offset += field.in_memory_width();
        }
        offset.next_multiple_of(self.alignment().max(1))
    }

    /// Returns the packed size of all fields, with no padding.
    #[must_use]
    pub fn physical_width(&self) -> u32 {
        self.fields.iter().map(DataType::physical_width).sum()
    }

    /// Returns the alignment of the struct, the maximum field alignment.
    #[must_use]
    pub fn alignment(&self) -> u32 {
        self.fields
            .iter()
            .map(DataType::alignment)
            .max()
            .unwrap_or(1)
    }
}

/// A type in the kernel IR.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// The unit type, carries no data.
    Void,
    /// A scalar integer of the given bit width (8, 16 or 32).
    Int {
        /// The scalar bit width.
        bits: u8,
    },
    /// A fixed-width SIMD vector of scalar integers.
    Vector {
        /// The bit width of a single lane.
        bits: u8,
        /// The number of lanes.
        width: u8,
    },
    /// A pointer into the given address space.
    Pointer {
        /// The pointed-to type.
        pointee: Arc<DataType>,
        /// The address space the pointer refers to.
        space: AddressSpace,
    },
    /// A fixed-length array.
    Array {
        /// The element type.
        element: Arc<DataType>,
        /// The number of elements.
        length: u32,
    },
    /// An ordered collection of fields with byte offsets.
    Struct(Arc<StructType>),
}

impl DataType {
    /// The 8-bit scalar integer type.
    pub const INT8: DataType = DataType::Int { bits: 8 };
    /// The 16-bit scalar integer type.
    pub const INT16: DataType = DataType::Int { bits: 16 };
    /// The 32-bit scalar integer type.
    pub const INT32: DataType = DataType::Int { bits: 32 };

    /// Creates a pointer type to `pointee` in the given address space.
    #[must_use]
    pub fn pointer_to(pointee: DataType, space: AddressSpace) -> Self {
        DataType::Pointer {
            pointee: Arc::new(pointee),
            space,
        }
    }

    /// Creates an array type of `length` elements.
    #[must_use]
    pub fn array_of(element: DataType, length: u32) -> Self {
        DataType::Array {
            element: Arc::new(element),
            length,
        }
    }

    /// The type of an untyped pointer, used for raw byte offsets.
    #[must_use]
    pub fn void_pointer() -> Self {
        DataType::pointer_to(DataType::Void, AddressSpace::Private)
    }

    /// Widens a scalar type to a vector of `width` lanes.
    ///
    /// A width of 0 or 1 yields the scalar type unchanged; non-scalar
    /// types are returned unchanged.
    #[must_use]
    pub fn to_vector(&self, width: u8) -> Self {
        match (self, width) {
            (DataType::Int { bits }, w) if w > 1 => DataType::Vector { bits: *bits, width: w },
            (DataType::Vector { bits, .. }, w) if w > 1 => DataType::Vector { bits: *bits, width: w },
            (DataType::Vector { bits, .. }, _) => DataType::Int { bits: *bits },
            _ => self.clone(),
        }
    }

    /// Returns the pointed-to type and address space if this is a pointer.
    #[must_use]
    pub fn pointer_type(&self) -> Option<(&DataType, AddressSpace)> {
        match self {
            DataType::Pointer { pointee, space } => Some((pointee, *space)),
            _ => None,
        }
    }

    /// Returns the element type and length if this is an array.
    #[must_use]
    pub fn array_type(&self) -> Option<(&DataType, u32)> {
        match self {
            DataType::Array { element, length } => Some((element, *length)),
            _ => None,
        }
    }

    /// Returns the struct description if this is a struct.
    #[must_use]
    pub fn struct_type(&self) -> Option<&StructType> {
        match self {
            DataType::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` if this is a vector type.
    #[must_use]
    pub fn is_vector(&self) -> bool {
        matches!(self, DataType::Vector { .. })
    }

    /// Returns `true` if this is a scalar integer type.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, DataType::Int { .. })
    }

    /// Projects the element type of a pointer, array or vector.
    ///
    /// For structs, use [`DataType::field_type`] with a field index.
    #[must_use]
    pub fn element_type(&self) -> Option<DataType> {
        match self {
            DataType::Pointer { pointee, .. } => Some((**pointee).clone()),
            DataType::Array { element, .. } => Some((**element).clone()),
            DataType::Vector { bits, .. } => Some(DataType::Int { bits: *bits }),
            _ => None,
        }
    }

    /// Returns the type of the struct field at `index`.
    #[must_use]
    pub fn field_type(&self, index: usize) -> Option<DataType> {
        self.struct_type().and_then(|s| s.fields.get(index).cloned())
    }

    /// Returns the scalar bit count of a scalar or vector type.
    #[must_use]
    pub fn scalar_bit_count(&self) -> Option<u8> {
        match self {
            DataType::Int { bits } | DataType::Vector { bits, .. } => Some(*bits),
            _ => None,
        }
    }

    /// Returns the number of SIMD lanes, 1 for scalars.
    #[must_use]
    pub fn vector_width(&self) -> u8 {
        match self {
            DataType::Vector { width, .. } => *width,
            _ => 1,
        }
    }

    /// Returns the packed size of the data in bytes, with no padding.
    #[must_use]
    pub fn physical_width(&self) -> u32 {
        match self {
            DataType::Void => 0,
            DataType::Int { bits } => u32::from(*bits) / 8,
            DataType::Vector { bits, width } => u32::from(*bits) / 8 * u32::from(*width),
            DataType::Pointer { .. } => 4,
            DataType::Array { element, length } => element.physical_width() * length,
            DataType::Struct(s) => s.physical_width(),
        }
    }

    /// Returns the size the type occupies in memory, including padding.
    #[must_use]
    pub fn in_memory_width(&self) -> u32 {
        match self {
            DataType::Void => 0,
            DataType::Int { bits } => u32::from(*bits) / 8,
            DataType::Vector { bits, width } => u32::from(*bits) / 8 * u32::from(*width),
            DataType::Pointer { .. } => 4,
            DataType::Array { element, length } => element.in_memory_width() * length,
            DataType::Struct(s) => s.in_memory_width(),
        }
    }

    /// Returns the alignment requirement of the type in bytes.
    #[must_use]
    pub fn alignment(&self) -> u32 {
        match self {
            DataType::Void => 1,
            DataType::Int { bits } => u32::from(*bits) / 8,
            DataType::Vector { bits, width } => u32::from(*bits) / 8 * u32::from(*width),
            DataType::Pointer { .. } => 4,
            DataType::Array { element, .. } => element.alignment(),
            DataType::Struct(s) => s.alignment(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Void => write!(f, "void"),
            DataType::Int { bits } => write!(f, "i{bits}"),
            DataType::Vector { bits, width } => write!(f, "<{width} x i{bits}>"),
            DataType::Pointer { pointee, space } => write!(f, "({space}) {pointee}*"),
            DataType::Array { element, length } => write!(f, "{element}[{length}]"),
            DataType::Struct(s) => write!(f, "%{}", s.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_widths() {
        assert_eq!(DataType::INT32.physical_width(), 4);
        assert_eq!(DataType::INT16.physical_width(), 2);
        assert_eq!(DataType::INT8.in_memory_width(), 1);
        assert_eq!(DataType::INT32.scalar_bit_count(), Some(32));
    }

    #[test]
    fn test_vector_widths() {
        let ty = DataType::Vector { bits: 32, width: 16 };
        assert_eq!(ty.physical_width(), 64);
        assert_eq!(ty.in_memory_width(), 64);
        assert_eq!(ty.scalar_bit_count(), Some(32));
        assert_eq!(ty.vector_width(), 16);
        assert_eq!(ty.element_type(), Some(DataType::INT32));
    }

    #[test]
    fn test_pointer_projection() {
        let ty = DataType::pointer_to(DataType::INT32, AddressSpace::Global);
        assert_eq!(ty.physical_width(), 4);
        assert_eq!(ty.element_type(), Some(DataType::INT32));
        assert_eq!(
            ty.pointer_type().map(|(_, s)| s),
            Some(AddressSpace::Global)
        );
    }

    #[test]
    fn test_array_widths() {
        let ty = DataType::array_of(DataType::INT16, 10);
        assert_eq!(ty.physical_width(), 20);
        assert_eq!(ty.in_memory_width(), 20);
        assert_eq!(ty.element_type(), Some(DataType::INT16));
    }

    #[test]
    fn test_struct_field_offsets() {
        // struct { i32, i32, i32 } - third field at offset 8
        let s = StructType::new(
            "s",
            vec![DataType::INT32, DataType::INT32, DataType::INT32],
        );
        assert_eq!(s.field_offset(0), Some(0));
        assert_eq!(s.field_offset(1), Some(4));
        assert_eq!(s.field_offset(2), Some(8));
        assert_eq!(s.field_offset(3), None);
        assert_eq!(s.in_memory_width(), 12);
    }

    #[test]
    fn test_struct_padding() {
        // struct { i8, i32 } - second field aligned to 4
        let s = StructType::new("p", vec![DataType::INT8, DataType::INT32]);
        assert_eq!(s.field_offset(1), Some(4));
        assert_eq!(s.in_memory_width(), 8);
        assert_eq!(s.physical_width(), 5);
    }

    #[test]
    fn test_to_vector() {
        assert_eq!(
            DataType::INT32.to_vector(16),
            DataType::Vector { bits: 32, width: 16 }
        );
        assert_eq!(DataType::INT32.to_vector(1), DataType::INT32);
    }

    #[test]
    fn test_display() {
        assert_eq!(DataType::INT32.to_string(), "i32");
        let v = DataType::Vector { bits: 32, width: 16 };
        assert_eq!(v.to_string(), "<16 x i32>");
        let p = DataType::pointer_to(DataType::INT8, AddressSpace::Local);
        assert_eq!(p.to_string(), "(local) i8*");
    }
}
