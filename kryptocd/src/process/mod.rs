// SPDX-License-Identifier: AGPL-3.0-only

//! Child-process plumbing: spawning with an explicit fd map, the
//! source/sink-wired specialization used by every filter in the archive
//! pipeline, and the worker-thread abstraction that feeds or drains a
//! filter's name stream.

pub use self::{
    child_filter::{ChildFilter, EXTRA_FD, EXTRA_FD_STRING},
    childprocess::Childprocess,
    worker::Worker,
};

pub(crate) use self::childprocess::ignore_sigpipe_once;

mod child_filter;
mod childprocess;
mod worker;
