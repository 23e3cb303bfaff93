//! Re-issue a stored operation log and body against a fresh response.

use std::fmt::Write as _;
use std::io::Write as _;

use super::capture::CapturedBody;
use super::operation::Operation;
use crate::response::{HttpResponse, ResponseError};

/// Apply `operations` in order, then write the captured body through the
/// channel it was captured from.
pub fn replay(
    operations: &[Operation],
    body: &CapturedBody,
    response: &mut dyn HttpResponse,
) -> Result<(), ResponseError> {
    for operation in operations {
        operation.apply(response);
    }

    match body {
        CapturedBody::Text(text) => {
            response.writer()?.write_str(text)?;
        }
        CapturedBody::Bytes(bytes) => {
            response.output_stream()?.write_all(bytes)?;
        }
        CapturedBody::Empty => {}
    }
    Ok(())
}
