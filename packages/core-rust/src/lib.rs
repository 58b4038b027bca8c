//! API processor core: values, type descriptors, structural compatibility
//! checking, stage handler contracts and compiled descriptors.

pub mod compat;
pub mod context;
pub mod descriptor;
pub mod model;
pub mod schema;
pub mod traits;
pub mod types;

pub use compat::{CompatibilityChecker, MismatchKind, StructuralChecker, TypeMismatchError, Verdict};
pub use context::InvocationContext;
pub use descriptor::{ParseTypeError, TypeDescriptor};
pub use model::{
    Attributes, Bound, ClassDescriptor, HandlerSet, OperationDescriptor, ParameterDescriptor,
    ResolvedHandlers,
};
pub use schema::{DeclaredTypeSchema, HandlerBindings, OperationSchema, ParameterSchema, TypeKind};
pub use traits::{
    ErrorContext, ErrorHandler, ExecutionHandler, FallbackContext, FallbackHandler,
    RequestHandler, ResponseContext, ResponseHandler, Stage, StageKind, StageTypes,
};
pub use types::Value;
