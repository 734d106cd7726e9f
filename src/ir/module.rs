//! Modules: the per-compilation container of kernel methods.

use crate::ir::method::Method;

/// A module holding the kernel methods of one compilation unit.
///
/// During optimization the module is shared read-only between worker
/// threads while each kernel method is owned exclusively by its task.
pub struct Module {
    name: String,
    kernels: Vec<Method>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kernels: Vec::new(),
        }
    }

    /// The name of the module.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a kernel method.
    pub fn add_kernel(&mut self, kernel: Method) {
        self.kernels.push(kernel);
    }

    /// The kernel methods.
    #[must_use]
    pub fn kernels(&self) -> &[Method] {
        &self.kernels
    }

    /// Mutable access to the kernel methods.
    pub fn kernels_mut(&mut self) -> &mut Vec<Method> {
        &mut self.kernels
    }

    /// Moves the kernels out of the module, leaving it empty.
    ///
    /// The pass driver detaches the kernels so they can be mutated on
    /// worker threads while the rest of the module stays shared
    /// read-only, and reattaches them afterwards.
    pub fn take_kernels(&mut self) -> Vec<Method> {
        std::mem::take(&mut self.kernels)
    }

    /// Reattaches kernels previously taken with [`Module::take_kernels`].
    pub fn put_kernels(&mut self, kernels: Vec<Method>) {
        self.kernels = kernels;
    }
}
