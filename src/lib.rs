//! Personal vocabulary notebooks: versioned word books with a star rating per
//! word, a filtered navigation cursor, schema migration for older documents,
//! a small JSON-over-HTTP store and a client that keeps both in step.

pub mod api;
pub mod error;
pub mod exchange;
pub mod migrate;
pub mod model;
pub mod search;
pub mod state;
pub mod store;

#[cfg(feature = "sync")]
pub mod client;
#[cfg(feature = "web")]
pub mod web;

pub use error::{DocumentError, ExchangeError, StoreError};
pub use exchange::{export_book, import_book};
pub use migrate::{SpecVersion, normalize};
pub use model::{
    CURRENT_SPEC, MAX_STARS, SPEC_PREFIX, Word, WordBook, WordBookOverview, WordDraft,
};
pub use search::{SearchConfig, SearchHit, WordIndex, search_words};
pub use state::{StateEvent, SubscriptionId, WordBookState};
