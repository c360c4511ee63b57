pub mod context;
pub mod error;

pub use context::{AppContext, ContextBuilder};
pub use error::{
    BackendError, FeedError, FeedErrorKind, FetchError, FreshetError, HookError, ParseError,
    Result, StoreError,
};
