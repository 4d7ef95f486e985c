//! Operation-based synchronization core for the collaborative whiteboard.
//!
//! Each board instance owns a forest of [`tree::Element`]s. Local edits are
//! grouped into stroke-sized batches and sent as [`envelope::Envelope`]s
//! tagged with the process's [`echo::SourceId`]. Envelopes received from
//! peers are checked for echoes and reconciled into the authoritative tree,
//! which is then pushed to the view.
//!
//! The crate performs no I/O. The transport and the drawing surface are
//! supplied by the host through [`session::Transport`] and [`session::View`].
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`tree`] | Element forest addressed by path and by id |
//! | [`op`] | Structural operations and edit-feed classification |
//! | [`envelope`] | Wire envelope codec |
//! | [`collector`] | Stroke segmentation of local edits |
//! | [`reconcile`] | Snapshot-wins batch application |
//! | [`echo`] | Source identity and self-origin filtering |
//! | [`events`] | Listener registries and RAII subscriptions |
//! | [`session`] | Orchestrator: [`session::SessionCore`] and [`session::SyncSession`] |
//! | [`config`] | Session configuration from the environment |

pub mod collector;
pub mod config;
pub mod echo;
pub mod envelope;
pub mod events;
pub mod op;
pub mod reconcile;
pub mod session;
pub mod tree;
