//! Small helpers shared by the decoder, reconciler and gem component.

pub mod html;
pub mod nested;

pub use nested::NestedPath;
