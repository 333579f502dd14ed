//
// rle.rs
// dcmsort
//
// RLE Lossless frame encoder: byte-plane segmentation plus PackBits, assembled
// behind the 64-byte offset header the format prescribes.
//

use thiserror::Error;

// The header is sixteen little-endian u32 values: segment count, then up to
// fifteen offsets measured from the start of the frame.
const MAX_SEGMENTS: usize = 15;
const HEADER_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum RleError {
    #[error("frame needs {0} RLE segments, the format allows at most 15")]
    TooManySegments(usize),
    #[error("empty pixel frame")]
    EmptyFrame,
}

/// Encode one frame of 8-bit samples. Samples are interleaved; one segment is
/// produced per sample plane.
pub fn encode_frame_u8(frame: &[u8], samples: usize) -> Result<Vec<u8>, RleError> {
    if frame.is_empty() || samples == 0 {
        return Err(RleError::EmptyFrame);
    }
    let mut planes = Vec::with_capacity(samples);
    for s in 0..samples {
        planes.push(frame.iter().skip(s).step_by(samples).copied().collect());
    }
    assemble(planes)
}

/// Encode one frame of 16-bit samples. Each sample contributes two segments,
/// most significant byte plane first.
pub fn encode_frame_u16(frame: &[u16], samples: usize) -> Result<Vec<u8>, RleError> {
    if frame.is_empty() || samples == 0 {
        return Err(RleError::EmptyFrame);
    }
    let mut planes = Vec::with_capacity(samples * 2);
    for s in 0..samples {
        planes.push(
            frame
                .iter()
                .skip(s)
                .step_by(samples)
                .map(|w| (w >> 8) as u8)
                .collect(),
        );
        planes.push(
            frame
                .iter()
                .skip(s)
                .step_by(samples)
                .map(|w| (w & 0xff) as u8)
                .collect(),
        );
    }
    assemble(planes)
}

/// Concatenate PackBits-encoded segments behind the offset header. Segments
/// are padded to even length so every offset stays even.
fn assemble(planes: Vec<Vec<u8>>) -> Result<Vec<u8>, RleError> {
    if planes.len() > MAX_SEGMENTS {
        return Err(RleError::TooManySegments(planes.len()));
    }
    let mut segments: Vec<Vec<u8>> = planes.iter().map(|p| pack_bits(p)).collect();
    for segment in &mut segments {
        if segment.len() % 2 != 0 {
            segment.push(0);
        }
    }

    let payload: usize = segments.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(HEADER_LEN + payload);
    out.extend_from_slice(&(segments.len() as u32).to_le_bytes());
    let mut offset = HEADER_LEN as u32;
    for segment in &segments {
        out.extend_from_slice(&offset.to_le_bytes());
        offset += segment.len() as u32;
    }
    out.resize(HEADER_LEN, 0);
    for segment in &segments {
        out.extend_from_slice(segment);
    }
    Ok(out)
}

/// PackBits: control 0..=127 starts a literal of control+1 bytes, control
/// 129..=255 replicates the next byte 257-control times, 128 is a no-op.
/// Replicates are only taken for runs of three or more so short runs do not
/// break up literals.
fn pack_bits(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 128 + 1);
    let n = input.len();
    let mut i = 0;
    while i < n {
        let mut run = 1;
        while i + run < n && run < 128 && input[i + run] == input[i] {
            run += 1;
        }
        if run >= 3 {
            out.push((257 - run) as u8);
            out.push(input[i]);
            i += run;
        } else {
            let start = i;
            i += run;
            while i < n && i - start < 128 && !replicate_ahead(input, i) {
                i += 1;
            }
            out.push((i - start - 1) as u8);
            out.extend_from_slice(&input[start..i]);
        }
    }
    out
}

fn replicate_ahead(input: &[u8], i: usize) -> bool {
    input.len() - i >= 3 && input[i] == input[i + 1] && input[i] == input[i + 2]
}
