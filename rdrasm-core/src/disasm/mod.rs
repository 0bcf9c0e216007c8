pub mod decoder;
pub mod listing;
pub mod opcode;
pub mod resolver;

pub use decoder::{DecodeError, Decoder, Instruction};
pub use listing::Listing;
pub use resolver::{Analysis, Function, ResolveError, Resolver};
