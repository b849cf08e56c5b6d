//! Load/save boundary for VM state
//!
//! The (de)serializer itself lives with the host. This module defines the
//! interfaces it talks to: a [`LoadContext`] that materializes referenced
//! entities on request, and a [`SaveContext`] that assigns stable ids to
//! code objects. A load request answered with `None` is refused (or a
//! forward reference the loader resolves later); helpers turn refusals into
//! `VmError::EntityUnavailable`.

mod load;
mod save;

pub use load::{
    LoadContext, LoadRequest, Loaded, NullLoadContext, ProcessLoadContext, WorldLoadContext,
};
pub use save::{IdentitySaveContext, SaveContext};
