//! Start-page core: feed pages, cached RSS/Atom aggregation, filtered views,
//! user state and persisted widgets.

pub mod app;
pub mod config;
pub mod feed;
pub mod registry;
pub mod storage;
pub mod user_state;
pub mod util;
pub mod widgets;
