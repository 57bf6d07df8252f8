pub mod event;

pub use event::{ClickEvent, ConversionEvent, DIRECT_CHANNEL};
