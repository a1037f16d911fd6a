#![doc = include_str!("../README.md")]

// Supporting modules
pub mod source;

// Input and output languages
pub mod ast;
pub mod schema;

// The translator itself
pub mod translate;

pub use translate::{NodeSet, NodeTranslator, Resolver};

/// Interned strings.
pub type StringId = string_interner::symbol::SymbolU16;

/// String interner.
pub type StringInterner = string_interner::StringInterner<
    string_interner::backend::BucketBackend<StringId>,
    std::hash::BuildHasherDefault<fxhash::FxHasher32>,
>;
