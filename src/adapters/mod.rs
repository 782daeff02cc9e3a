// Adapters layer: concrete storage backends behind the `Storage` port.

pub mod local;
pub mod webdav;
