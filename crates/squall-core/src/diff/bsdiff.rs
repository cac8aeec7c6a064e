//! Legacy backend: bsdiff over a suffix array.
//!
//! Layout of a delta (all integers little endian):
//!
//! ```text
//! magic      8 bytes  "SQBSDF01"
//! ctrl_len   u64      compressed control block length
//! diff_len   u64      compressed diff block length
//! new_size   u64      length of the reconstructed blob
//! crc32      u32      CRC32 of the reconstructed blob
//! control    zstd     (diff_size: i64, extra_size: i64, seek: i64) triples
//! diff       zstd     bytewise new - old for matched regions
//! extra      zstd     literal bytes, to the end of the delta
//! ```

use super::{DiffError, DiffOptions, code};

const MAGIC: &[u8; 8] = b"SQBSDF01";
const HEADER_LEN: usize = 8 + 8 + 8 + 8 + 4;

/// Control triple: copy `diff_size` bytes adding old content, then
/// `extra_size` literal bytes, then move the old cursor by `seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Control {
    diff_size: i64,
    extra_size: i64,
    seek: i64,
}

struct DiffBlocks {
    control: Vec<Control>,
    diff: Vec<u8>,
    extra: Vec<u8>,
}

pub(super) fn diff(old: &[u8], new: &[u8], options: &DiffOptions) -> Result<Vec<u8>, DiffError> {
    let ceiling = options.legacy_size_ceiling;
    for (label, len) in [("old", old.len()), ("new", new.len())] {
        if len as u64 > ceiling {
            return Err(DiffError::diff(
                code::TOO_LARGE,
                format!("{label} input is {len} bytes, ceiling is {ceiling}"),
            ));
        }
    }
    // divsufsort indexes with i32
    if i32::try_from(old.len()).is_err() {
        return Err(DiffError::diff(code::TOO_LARGE, "old input exceeds i32 range"));
    }

    let blocks = compute_diff(old, new);

    let mut control_raw = Vec::with_capacity(blocks.control.len() * 24);
    for c in &blocks.control {
        control_raw.extend_from_slice(&c.diff_size.to_le_bytes());
        control_raw.extend_from_slice(&c.extra_size.to_le_bytes());
        control_raw.extend_from_slice(&c.seek.to_le_bytes());
    }

    let level = options.zstd_level;
    let compress =
        |data: &[u8]| zstd::encode_all(data, level).map_err(|e| DiffError::diff(code::CODEC, e));
    let control = compress(&control_raw)?;
    let diff = compress(&blocks.diff)?;
    let extra = compress(&blocks.extra)?;

    let mut out = Vec::with_capacity(HEADER_LEN + control.len() + diff.len() + extra.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(control.len() as u64).to_le_bytes());
    out.extend_from_slice(&(diff.len() as u64).to_le_bytes());
    out.extend_from_slice(&(new.len() as u64).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(new).to_le_bytes());
    out.extend_from_slice(&control);
    out.extend_from_slice(&diff);
    out.extend_from_slice(&extra);
    Ok(out)
}

pub(super) fn patch(delta: &[u8], old: &[u8]) -> Result<Vec<u8>, DiffError> {
    let malformed = |reason: &str| DiffError::patch(code::MALFORMED, reason);

    if delta.len() < HEADER_LEN || &delta[..8] != MAGIC {
        return Err(malformed("missing bsdiff header"));
    }
    let read_u64 = |at: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&delta[at..at + 8]);
        u64::from_le_bytes(buf)
    };
    let control_len = usize::try_from(read_u64(8)).map_err(|_| malformed("control length"))?;
    let diff_len = usize::try_from(read_u64(16)).map_err(|_| malformed("diff length"))?;
    let new_size = usize::try_from(read_u64(24)).map_err(|_| malformed("output size"))?;
    let mut crc_buf = [0u8; 4];
    crc_buf.copy_from_slice(&delta[32..36]);
    let expected_crc = u32::from_le_bytes(crc_buf);

    let body = &delta[HEADER_LEN..];
    if control_len
        .checked_add(diff_len)
        .is_none_or(|needed| needed > body.len())
    {
        return Err(malformed("block lengths exceed delta size"));
    }
    let (control, rest) = body.split_at(control_len);
    let (diff, extra) = rest.split_at(diff_len);

    let decompress = |data: &[u8]| zstd::decode_all(data).map_err(|e| DiffError::patch(code::CODEC, e));
    let control = decompress(control)?;
    let diff = decompress(diff)?;
    let extra = decompress(extra)?;

    if control.len() % 24 != 0 {
        return Err(malformed("control block is not a whole number of triples"));
    }

    // Every output byte comes from the diff or extra block
    if new_size > diff.len() + extra.len() {
        return Err(malformed("output size exceeds diff and extra blocks"));
    }

    let mut out = Vec::with_capacity(new_size);
    let mut old_pos: i64 = 0;
    let mut diff_at = 0usize;
    let mut extra_at = 0usize;

    for triple in control.chunks_exact(24) {
        let field = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&triple[i * 8..i * 8 + 8]);
            i64::from_le_bytes(buf)
        };
        let entry = Control {
            diff_size: field(0),
            extra_size: field(1),
            seek: field(2),
        };

        let diff_size = usize::try_from(entry.diff_size).map_err(|_| malformed("negative diff size"))?;
        let extra_size =
            usize::try_from(entry.extra_size).map_err(|_| malformed("negative extra size"))?;
        if out
            .len()
            .checked_add(diff_size)
            .and_then(|n| n.checked_add(extra_size))
            .is_none_or(|end| end > new_size)
        {
            return Err(malformed("control block overruns output size"));
        }

        let diff_bytes = diff
            .get(diff_at..diff_at + diff_size)
            .ok_or_else(|| malformed("diff block exhausted"))?;
        for (i, d) in diff_bytes.iter().enumerate() {
            let old_byte = usize::try_from(old_pos + i as i64)
                .ok()
                .and_then(|idx| old.get(idx).copied())
                .unwrap_or(0);
            out.push(d.wrapping_add(old_byte));
        }
        diff_at += diff_size;
        old_pos += entry.diff_size;

        let extra_bytes = extra
            .get(extra_at..extra_at + extra_size)
            .ok_or_else(|| malformed("extra block exhausted"))?;
        out.extend_from_slice(extra_bytes);
        extra_at += extra_size;

        old_pos += entry.seek;
        if old_pos < 0 {
            return Err(malformed("seek before start of old data"));
        }
    }

    if out.len() != new_size {
        return Err(malformed("output size mismatch"));
    }
    let actual_crc = crc32fast::hash(&out);
    if actual_crc != expected_crc {
        return Err(DiffError::patch(
            code::CHECKSUM,
            format!("CRC32 mismatch: expected {expected_crc:08x}, got {actual_crc:08x}"),
        ));
    }
    Ok(out)
}

/// Count matching prefix bytes between two slices.
fn matchlen(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Binary search on the suffix array for the longest match of `needle` in
/// `old`. Returns `(position_in_old, match_length)`.
fn search(sa: &[i32], old: &[u8], needle: &[u8]) -> (usize, usize) {
    if sa.is_empty() || needle.is_empty() {
        return (0, 0);
    }

    let mut st: usize = 0;
    let mut en: usize = sa.len() - 1;

    while en - st > 1 {
        let pivot = st + (en - st) / 2;
        let pivot_pos = sa[pivot] as usize;
        let pivot_len = matchlen(&old[pivot_pos..], needle);

        if pivot_len == needle.len()
            || (pivot_pos + pivot_len < old.len() && old[pivot_pos + pivot_len] < needle[pivot_len])
        {
            st = pivot;
        } else {
            en = pivot;
        }
    }

    let start_pos = sa[st] as usize;
    let end_pos = sa[en] as usize;
    let start_len = matchlen(&old[start_pos..], needle);
    let end_len = matchlen(&old[end_pos..], needle);

    if start_len > end_len {
        (start_pos, start_len)
    } else {
        (end_pos, end_len)
    }
}

/// Byte of `old` at a drifted index, if in range.
fn old_at(old: &[u8], idx: i64) -> Option<u8> {
    usize::try_from(idx).ok().and_then(|i| old.get(i).copied())
}

// `old[..] == new[..]` comparisons use deliberately different indices into
// the two buffers (old offset drift vs scan position).
#[allow(clippy::suspicious_operation_groupings)]
fn compute_diff(old: &[u8], new: &[u8]) -> DiffBlocks {
    let old_size = old.len();
    let new_size = new.len();

    let sa = if old_size > 0 {
        let mut sa = vec![0i32; old_size];
        divsufsort::sort_in_place(old, &mut sa);
        sa
    } else {
        Vec::new()
    };

    let mut control = Vec::new();
    let mut diff = Vec::new();
    let mut extra = Vec::new();

    let mut scan: usize = 0;
    let mut len: usize = 0;
    let mut pos: usize = 0;
    let mut lastscan: usize = 0;
    let mut lastpos: usize = 0;
    let mut lastoffset: i64 = 0;

    while scan < new_size {
        let mut oldscore: i64 = 0;
        scan += len;
        let mut scsc = scan;

        while scan < new_size {
            let (match_pos, match_len) = search(&sa, old, &new[scan..]);
            pos = match_pos;
            len = match_len;

            // Bytes the previous offset already explains
            while scsc < scan + len {
                if old_at(old, scsc as i64 + lastoffset) == Some(new[scsc]) {
                    oldscore += 1;
                }
                scsc += 1;
            }

            let len_score = len as i64;
            if (len_score == oldscore && len != 0) || len_score > oldscore + 8 {
                break;
            }

            if old_at(old, scan as i64 + lastoffset) == Some(new[scan]) {
                oldscore -= 1;
            }
            scan += 1;
        }

        if len as i64 != oldscore || scan == new_size {
            // Forward extension from the last match
            let mut lenf: usize = 0;
            {
                let mut s: i64 = 0;
                let mut sf: i64 = 0;
                let mut i: usize = 0;
                while lastscan + i < scan && lastpos + i < old_size {
                    if old[lastpos + i] == new[lastscan + i] {
                        s += 1;
                    }
                    i += 1;
                    if s * 2 - i as i64 > sf * 2 - lenf as i64 {
                        sf = s;
                        lenf = i;
                    }
                }
            }

            // Backward extension from the current match
            let mut lenb: usize = 0;
            if scan < new_size {
                let mut s: i64 = 0;
                let mut sb: i64 = 0;
                let mut i: usize = 1;
                while scan >= lastscan + i && pos >= i {
                    if old[pos - i] == new[scan - i] {
                        s += 1;
                    }
                    if s * 2 - i as i64 > sb * 2 - lenb as i64 {
                        sb = s;
                        lenb = i;
                    }
                    i += 1;
                }
            }

            // Resolve overlap between the two extensions
            if lastscan + lenf > scan - lenb {
                let overlap = (lastscan + lenf) - (scan - lenb);
                let mut s: i64 = 0;
                let mut ss: i64 = 0;
                let mut lens: usize = 0;
                for i in 0..overlap {
                    if new[lastscan + lenf - overlap + i] == old[lastpos + lenf - overlap + i] {
                        s += 1;
                    }
                    if new[scan - lenb + i] == old[pos - lenb + i] {
                        s -= 1;
                    }
                    if s > ss {
                        ss = s;
                        lens = i + 1;
                    }
                }
                lenf = lenf + lens - overlap;
                lenb -= lens;
            }

            for i in 0..lenf {
                diff.push(new[lastscan + i].wrapping_sub(old[lastpos + i]));
            }

            let extra_start = lastscan + lenf;
            let extra_end = scan - lenb;
            if extra_end > extra_start {
                extra.extend_from_slice(&new[extra_start..extra_end]);
            }

            control.push(Control {
                diff_size: lenf as i64,
                extra_size: extra_end.saturating_sub(extra_start) as i64,
                seek: (pos as i64 - lenb as i64) - (lastpos as i64 + lenf as i64),
            });

            lastscan = scan - lenb;
            lastpos = pos - lenb;
            lastoffset = pos as i64 - scan as i64;
        }
    }

    DiffBlocks {
        control,
        diff,
        extra,
    }
}
