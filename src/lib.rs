pub use {smallvec, smol_str};

pub mod base;
pub mod capture;
pub mod dce;
pub mod graph;
pub mod testing;

/// Retrace uses SmolStr as symbol string so that cloning capture,
/// command and API names while logging stays cheap.
pub type SymbolStr = smol_str::SmolStr;
