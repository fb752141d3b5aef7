pub mod assembler;
pub mod cache;
pub mod metrics;
pub mod registry;
pub mod store;
pub mod validator;

pub use assembler::RecordAssembler;
pub use cache::AssemblyCache;
pub use registry::{resolve_kind, FieldSpec, FieldType, KindInfo};
pub use store::{RecordStore, StagedRecord};
pub use validator::{validate, validate_named};
