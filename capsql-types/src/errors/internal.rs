/// Error type used at trait seams where the concrete error is opaque to the
/// caller, for example the database backend boundary.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
