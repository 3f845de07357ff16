pub mod bar;
pub mod direction;
pub mod option_chain;
pub mod position;

pub use bar::{PriceBand, PriceBar, PriceSeries};
pub use direction::*;
pub use option_chain::{OptionChain, OptionQuote};
pub use position::{contract_key, ExitRecord, Instrument, OptionTerms, Position};
