pub(crate) mod dispatch;
pub mod event;
