pub(crate) mod action;
pub(crate) mod builder;
pub(crate) mod engine;
pub(crate) mod model;
pub(crate) mod step;

pub use action::*;
pub use builder::*;
pub use engine::*;
pub use model::*;
pub use step::*;
