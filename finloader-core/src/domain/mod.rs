//! Domain types for finloader

pub mod bar;
pub mod symbol;
pub mod timeframe;

pub use bar::Bar;
pub use symbol::{currency_name, ForexSymbol, SymbolError};
pub use timeframe::{Timeframe, TimeframeError, TimeframeUnit};
