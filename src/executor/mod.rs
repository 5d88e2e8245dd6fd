#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/*!
Executor module for macrotree.

This module wires together:
- `actions`: the input-injection seam (`InputDriver`) and its Enigo implementation
- `progress`: progress and busy reporting of a run
- `runtime`: depth-first interpretation of an action tree

Typical usage:
- Load a `MacroDocument` and build an `ActionTree` from it.
- Construct a `Runtime` with a driver and, for image searches, a capture and icon library.
- Call `Runtime::run` with the tree and a fresh `VariableStore`.

Example:
```no_run
use std::sync::Arc;
use macrotree::executor::{EnigoDriver, Runtime};
use macrotree::matcher::{DirectoryAssets, XcapCapture};

let doc = macrotree::config::load_from_path("macros/loot.json")?;
let mut rt = Runtime::new(Box::new(EnigoDriver::new(true))) // dry-run mode
    .with_capture(Arc::new(XcapCapture))
    .with_assets(Arc::new(DirectoryAssets::new("icons")));
let _vars = rt.run_document(&doc)?;
# Ok::<(), anyhow::Error>(())
```
*/

pub mod actions;
pub mod progress;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access from `macrotree::executor::*`
pub use actions::{EnigoDriver, InputDriver};
pub use progress::{ProgressSink, TracingProgress};
pub use runtime::Runtime;
