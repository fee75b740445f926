//! Stepwise Config
//!
//! This crate contains the serializable workflow document types for stepwise.
//! These types describe a workflow as written on disk, after variable
//! substitution has been applied but before any step is materialized into an
//! action by the runtime.
//!
//! A document looks like:
//!
//! ```json
//! {
//!   "id": "caption-images",
//!   "variables": { "prompt": "a marmot", "steps": 20 },
//!   "steps": [
//!     { "name": "images", "task": { "command": "gather_images", "arguments": { "glob": "in/*.png" } } },
//!     { "name": "captioner", "resource": { "model": "blip", "arguments": { "image": "previous_result:images" } } },
//!     { "name": "save", "task": { "command": "gather_inputs", "arguments": { "text": "previous_result:captioner.text" } },
//!       "result": { "content_type": "application/json" } }
//!   ]
//! }
//! ```

mod error;
mod reference;
mod result;
mod step;
mod template;
mod workflow;

pub use error::StepDefError;
pub use reference::{PREVIOUS_RESULT_PREFIX, ResultRef, VARIABLE_PREFIX, variable_name};
pub use result::ResultDef;
pub use step::{ResourceReferenceSpec, ResourceSpec, StepDef, StepKind, TaskSpec, WorkflowRef};
pub use template::ArgumentTemplate;
pub use workflow::WorkflowDef;
