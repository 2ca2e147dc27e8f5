use thiserror::Error;

/// Failure to turn one simulation's authoring XML into a graph.
///
/// A `ParseError` only ever aborts the simulation it came from; batch
/// callers record it and move on.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("unexpected root element <{found}>, expected <scenario>")]
    UnexpectedRoot { found: String },

    #[error("missing required element {path}")]
    MissingElement { path: &'static str },

    #[error("invalid value '{value}' for attribute '{attribute}' on <{element}>")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },
}
