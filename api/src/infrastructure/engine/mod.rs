mod yrs_engine;

pub use yrs_engine::{CONTENT_ROOT, YrsDocument, YrsDocumentEngine};
