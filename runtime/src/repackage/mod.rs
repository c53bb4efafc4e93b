//! Layer repackaging.
//!
//! Enumerates the build steps of an image, lets the caller decide per step
//! whether to keep it or fold it into the step above, and writes the
//! resulting image.

pub mod editor;
pub mod engine;
pub mod enumerate;
pub mod materialize;
pub mod plan;

pub use editor::edit_plan;
pub use engine::{SquashOptions, Squasher};
pub use enumerate::{layer_records, pair_history, LayerRecord};
pub use materialize::{extract, materialize, ScratchDir};
pub use plan::{parse_plan, render_actions, render_plan, Action, Intent, Plan};
