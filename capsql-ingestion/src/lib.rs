pub mod dissector;
pub mod errors;
pub mod fixups;
pub mod pdml;

pub use dissector::Dissector;
pub use fixups::FixupEngine;
pub use pdml::PacketTransformer;
