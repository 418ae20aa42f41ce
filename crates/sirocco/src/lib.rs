#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use sirocco_core as core;

#[doc(inline)]
pub use sirocco_io as io;

#[doc(inline)]
pub use sirocco_models as models;

#[doc(inline)]
pub use sirocco_track as track;
