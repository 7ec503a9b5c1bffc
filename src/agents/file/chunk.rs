//! Recursive text chunking for map-reduce summarization.
//!
//! Splits on `["\n\n", "\n", ". ", " ", ""]` in order, targeting ~2000
//! characters per chunk with a 200-character overlap between neighbors.
//! Pieces carry their absolute source offsets through the split, so chunk
//! spans stay correct even in highly repetitive documents. When the
//! document structure exposes a page count the chunk is stamped with an
//! estimated page.

use serde::Serialize;

/// Target chunk size in characters.
pub const CHUNK_SIZE: usize = 2000;

/// Overlap carried from the tail of one chunk into the next.
pub const CHUNK_OVERLAP: usize = 200;

/// Split separators, coarsest first. The empty string is the last resort
/// (hard split at the size limit).
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// One chunk of the source document.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    /// 0-based position in the chunk sequence.
    pub chunk_id: usize,
    pub text: String,
    pub length: usize,
    pub start_char: usize,
    pub end_char: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_page: Option<usize>,
}

/// An intermediate piece with its absolute offset in the source.
struct Piece {
    offset: usize,
    text: String,
}

/// Chunk `text` with the default size and overlap.
pub fn chunk_text(text: &str, total_pages: Option<usize>) -> Vec<Chunk> {
    chunk_text_with(text, CHUNK_SIZE, CHUNK_OVERLAP, total_pages)
}

/// Chunk with explicit parameters (tests use smaller sizes).
pub fn chunk_text_with(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    total_pages: Option<usize>,
) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let mut pieces = Vec::new();
    split_recursive(text, 0, &SEPARATORS, chunk_size, &mut pieces);
    let merged = merge_with_overlap(pieces, chunk_size, overlap);

    let total_chars = text.len().max(1);
    let mut chunks = Vec::with_capacity(merged.len());

    for (chunk_id, (start_char, piece)) in merged.into_iter().enumerate() {
        let end_char = start_char.saturating_add(piece.len());

        // floor(start / (total/pages)) + 1, computed in integers.
        let estimated_page = total_pages.filter(|pages| *pages > 0).map(|pages| {
            let start = u128::try_from(start_char).unwrap_or(u128::MAX);
            let pages_wide = u128::try_from(pages).unwrap_or(1);
            let total = u128::try_from(total_chars).unwrap_or(1);
            let page = start
                .saturating_mul(pages_wide)
                .checked_div(total)
                .unwrap_or(0);
            usize::try_from(page).unwrap_or(usize::MAX).saturating_add(1)
        });

        chunks.push(Chunk {
            chunk_id,
            length: piece.len(),
            start_char,
            end_char,
            text: piece,
            estimated_page,
        });
    }
    chunks
}

/// Split into pieces no larger than `chunk_size`, preferring coarse
/// separators and recursing with finer ones for oversized pieces. Each
/// piece records its absolute offset.
fn split_recursive(
    text: &str,
    base: usize,
    separators: &[&str],
    chunk_size: usize,
    out: &mut Vec<Piece>,
) {
    if text.is_empty() {
        return;
    }
    if text.len() <= chunk_size {
        if !text.trim().is_empty() {
            out.push(Piece {
                offset: base,
                text: text.to_owned(),
            });
        }
        return;
    }

    let Some((separator, rest)) = separators.split_first() else {
        hard_split(text, base, chunk_size, out);
        return;
    };
    if separator.is_empty() {
        hard_split(text, base, chunk_size, out);
        return;
    }
    if !text.contains(separator) {
        split_recursive(text, base, rest, chunk_size, out);
        return;
    }

    // Re-attach the separator to the following piece so pieces stay
    // contiguous in the source.
    let mut cursor = 0usize;
    for (i, raw) in text.split(separator).enumerate() {
        let piece_start = if i == 0 {
            cursor
        } else {
            cursor.saturating_sub(separator.len())
        };
        let piece_end = cursor.saturating_add(raw.len());
        let piece = text.get(piece_start..piece_end).unwrap_or(raw);

        if piece.len() <= chunk_size {
            if !piece.trim().is_empty() {
                out.push(Piece {
                    offset: base.saturating_add(piece_start),
                    text: piece.to_owned(),
                });
            }
        } else {
            split_recursive(piece, base.saturating_add(piece_start), rest, chunk_size, out);
        }
        cursor = piece_end.saturating_add(separator.len());
    }
}

/// Hard character split at size boundaries (last resort).
fn hard_split(text: &str, base: usize, chunk_size: usize, out: &mut Vec<Piece>) {
    let mut current = String::with_capacity(chunk_size);
    let mut start = 0usize;
    let mut consumed = 0usize;
    for c in text.chars() {
        if current.len().saturating_add(c.len_utf8()) > chunk_size && !current.is_empty() {
            out.push(Piece {
                offset: base.saturating_add(start),
                text: std::mem::take(&mut current),
            });
            start = consumed;
        }
        current.push(c);
        consumed = consumed.saturating_add(c.len_utf8());
    }
    if !current.is_empty() {
        out.push(Piece {
            offset: base.saturating_add(start),
            text: current,
        });
    }
}

/// Greedily merge pieces into chunks up to `chunk_size`, carrying an
/// overlap tail from each emitted chunk into the next. Returns
/// `(start_offset, text)` pairs.
fn merge_with_overlap(
    pieces: Vec<Piece>,
    chunk_size: usize,
    overlap: usize,
) -> Vec<(usize, String)> {
    let mut chunks: Vec<(usize, String)> = Vec::new();
    let mut current = String::new();
    let mut current_start = 0usize;

    for piece in pieces {
        if current.is_empty() {
            current_start = piece.offset;
        } else if current.len().saturating_add(piece.text.len()) > chunk_size {
            let tail = overlap_tail(&current, overlap);
            // The tail is a literal suffix, so its offset is exact.
            let tail_start = current_start
                .saturating_add(current.len())
                .saturating_sub(tail.len());
            chunks.push((current_start, std::mem::take(&mut current)));
            current = tail;
            current_start = tail_start;
        }
        current.push_str(&piece.text);
    }
    if !current.trim().is_empty() {
        chunks.push((current_start, current));
    }
    chunks
}

/// The last `overlap` characters of a chunk, snapped to a char boundary.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 || chunk.len() <= overlap {
        return String::new();
    }
    let mut start = chunk.len().saturating_sub(overlap);
    while start < chunk.len() && !chunk.is_char_boundary(start) {
        start = start.saturating_add(1);
    }
    chunk.get(start..).unwrap_or_default().to_owned()
}
