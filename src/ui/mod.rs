//! Terminal output helpers
//!
//! Styled output through `console` and spinners through `indicatif`, with a
//! plain fallback in CI and when output is piped.
//!
//! # Example
//!
//! ```rust,ignore
//! use grab::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Resolving 3 artifact(s)...");
//! // ... do work ...
//! spinner.stop("Resolved 3 artifact(s)");
//!
//! ui::step_ok_detail(&ctx, "com.example:widget:1.0@jar", "downloaded");
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    outro_success, remark, step_error_detail, step_ok, step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::TaskSpinner;
pub use prompts::confirm;
