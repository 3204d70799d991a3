//! Whole-BWT writer: concatenate the piles of a prefix, in pile order,
//! into one segment file of the requested format.

use std::path::Path;

use crate::alphabet::ALPHABET_SIZE;
use crate::builder::pile_path;
use crate::codec::{
    build_index_for, open_reader, open_writer, CodecError, SegmentFormat,
};
use crate::LetterNumber;

/// Concatenate the piles under `prefix` into `output`. With `index_chunk`
/// set, an `.idx` sidecar is built next to the output (run-length formats
/// only).
pub fn write_whole_bwt(
    prefix: &Path,
    output: &Path,
    format: SegmentFormat,
    index_chunk: Option<usize>,
) -> Result<LetterNumber, CodecError> {
    let mut writer = open_writer(output, format)?;
    let mut total: LetterNumber = 0;
    for pile in 0..ALPHABET_SIZE as u8 {
        let mut reader = open_reader(&pile_path(prefix, pile), false)?;
        total += reader.read_and_send(&mut writer, LetterNumber::MAX)?;
    }
    writer.flush()?;
    drop(writer);

    if let Some(chunk_runs) = index_chunk {
        if !matches!(format, SegmentFormat::Ascii) {
            build_index_for(output, chunk_runs)?;
        }
    }
    tracing::info!("wrote {total} characters to {}", output.display());
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildConfig, BwtBuilder};
    use crate::codec::SegmentReader;
    use crate::cycle::MemoryCycles;

    fn decode_all(mut reader: SegmentReader) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 128];
        loop {
            let got = reader.read_bytes(&mut buf).unwrap();
            if got == 0 {
                break;
            }
            out.extend_from_slice(&buf[..got]);
        }
        out
    }

    #[test]
    fn concatenation_crosses_formats_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bwt");
        let mut source = MemoryCycles::new(vec![b"ACGT".to_vec(), b"ACCT".to_vec()]);
        BwtBuilder::new(BuildConfig {
            prefix: prefix.clone(),
            format: SegmentFormat::RleV3,
            generate_end_pos: false,
            generate_sa: false,
        })
        .run(&mut source)
        .unwrap();

        let whole = dir.path().join("whole.bwt");
        let total = write_whole_bwt(&prefix, &whole, SegmentFormat::RleV3, Some(4)).unwrap();
        assert_eq!(total, 10);

        let mut expected = Vec::new();
        for pile in 0..ALPHABET_SIZE as u8 {
            expected.extend(decode_all(
                open_reader(&pile_path(&prefix, pile), false).unwrap(),
            ));
        }
        assert_eq!(decode_all(open_reader(&whole, false).unwrap()), expected);
        assert!(crate::codec::index_sidecar_path(&whole).exists());
    }
}
