//! Content fetching infrastructure adapter.
//!
//! Implements [`pipeline::ContentFetcher`] over HTTP(S) and the local file
//! system, and [`pipeline::FigureExtractor`] over embedded PDF images.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Downloads, content-type sniffing, PDF and HTML text
//! extraction live here. Operators see only the port traits.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`http`] | [`HttpFetcher`], [`FetchConfig`] |
//! | [`text`] | HTML stripping, PDF text extraction |
//! | [`figures`] | [`PdfFigureExtractor`] |

pub mod figures;
pub mod http;
pub mod text;

pub use figures::PdfFigureExtractor;
pub use http::{FetchConfig, HttpFetcher};
pub use text::{document_text, strip_html};
