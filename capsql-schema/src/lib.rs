pub mod errors;
pub mod loader;
pub mod registry;
pub mod typer;

pub use loader::{load_all, CatalogStreams};
pub use registry::{Field, Protocol, SchemaRegistry, ValueString};
pub use typer::{type_value, TypedOutcome};
