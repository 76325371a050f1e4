//! Operator stages. Each submodule adds a family of methods to
//! [`Flow`](crate::flow::Flow); the stage types themselves stay private.

pub(crate) mod collect;
pub(crate) mod combine;
pub(crate) mod recover;
pub(crate) mod slice;
pub(crate) mod time;
pub(crate) mod transform;
