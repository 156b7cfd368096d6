#[cfg(feature = "browser")]
pub mod browser;
pub mod next_data;
pub mod selector;
pub mod transport;

#[cfg(feature = "browser")]
pub use browser::{BrowserOptions, BrowserTransport};
pub use next_data::NextDataExtractor;
pub use selector::{Recipe, SelectorExtractor};
pub use transport::ReqwestTransport;
