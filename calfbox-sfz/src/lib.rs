//! SFZ opcode model, parser, layer finalization, and region lookup.
//!
//! This crate owns everything in spec §3/§4.3/§4.4/§4.10: the authored
//! opcode model with hierarchical `global -> master -> group -> region`
//! inheritance, the derived ("finalized") per-region state the voice
//! engine actually reads, and the key/velocity/CC lookup structure that
//! routes a note-on to its candidate regions.

pub mod curve;
pub mod layer;
pub mod loader;
pub mod lookup;
pub mod opcodes;
pub mod parser;
pub mod program;

pub use curve::Curve128;
pub use layer::{FinalizedLayer, LayerArena, LayerKind, LayerNode};
pub use loader::SfzLoader;
pub use lookup::RegionLookup;
pub use opcodes::*;
pub use parser::{ParseEvent, SfzTokenizer};
pub use program::Program;
