use halo_abi::{RuntimeModel, Token};

use super::tokenize_with_retry;
use crate::error::Result;

const FRAME_HEAD: &str = "You are a helpful assistant. Reply to the message below in plain, natural sentences. \
Do not repeat these instructions and do not write role labels, tags or template markers.";

/// Replace control characters with spaces and collapse whitespace runs.
pub fn clean_query(query: &str) -> String {
    query
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wrap a cleaned query in the instruction frame.
pub fn frame(query: &str) -> String {
    format!("{FRAME_HEAD}\n\nMessage: {}\n\nAnswer:", clean_query(query))
}

/// Raw prompt tokens; no special tokens are inserted.
pub fn build<M: RuntimeModel>(model: &M, query: &str) -> Result<Vec<Token>> {
    tokenize_with_retry(model, &frame(query), false)
}
