//! Concrete engine and renderer backends.

mod html;
mod http;

pub use html::HtmlReportRenderer;
pub use http::{HttpAnalysisEngine, HttpReportRenderer};
