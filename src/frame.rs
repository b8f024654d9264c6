//! Batch decoding of payloads carrying several messages back to back.
//!
//! Each message is decoded independently with its own context, so limits
//! and diagnostics never leak between them. Recoverable problems stay
//! inside the per-message trees; only a message whose framing cannot be
//! read ends the batch, since without framing there is no next boundary
//! to resynchronize on.

use crate::cursor::DecodeError;
use crate::grammar::{decode, GrammarFn, Limits};
use crate::tree::ElementTree;

/// Result of decoding one payload: decoded messages plus the regions that
/// had to be skipped.
#[derive(Debug)]
pub struct BatchDecodeResult {
    pub messages: Vec<DecodedMessage>,
    pub skipped: Vec<SkippedRegion>,
}

/// One decoded message. Byte ranges inside `tree` are relative to
/// `byte_range.0`.
#[derive(Debug)]
pub struct DecodedMessage {
    pub tree: ElementTree,
    pub byte_range: (usize, usize),
}

/// A region no message could be decoded from.
#[derive(Debug)]
pub struct SkippedRegion {
    pub byte_range: (usize, usize),
    pub reason: String,
}

/// Decode messages from `bytes` until the payload is exhausted. An optional
/// fixed-size transport header is skipped first. Stops on zero progress or
/// unreadable framing, recording the leftover region as skipped.
pub fn decode_batch(
    bytes: &[u8],
    grammar: GrammarFn,
    limits: Limits,
    transport_len: Option<usize>,
) -> Result<BatchDecodeResult, DecodeError> {
    let body = match transport_len {
        Some(n) => {
            if bytes.len() < n {
                return Err(DecodeError::Framing(
                    "payload shorter than transport header".into(),
                ));
            }
            &bytes[n..]
        }
        None => bytes,
    };

    let mut messages = Vec::new();
    let mut skipped = Vec::new();
    let mut offset = 0;
    let base = transport_len.unwrap_or(0);

    while offset < body.len() {
        match decode(&body[offset..], grammar, limits) {
            Ok((tree, consumed)) => {
                if consumed == 0 {
                    skipped.push(SkippedRegion {
                        byte_range: (base + offset, base + body.len()),
                        reason: "no bytes consumed".into(),
                    });
                    break;
                }
                messages.push(DecodedMessage {
                    tree,
                    byte_range: (base + offset, base + offset + consumed),
                });
                offset += consumed;
            }
            Err(e) => {
                skipped.push(SkippedRegion {
                    byte_range: (base + offset, base + body.len()),
                    reason: e.to_string(),
                });
                break;
            }
        }
    }

    Ok(BatchDecodeResult { messages, skipped })
}
