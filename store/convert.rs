// ========================================================================================
//
//                     Conversion of PLINK outputs into a permutation store
//
// ========================================================================================
//
// Three inputs make a store:
//   - a `.bim` map (chr, id, cM, pos, a1, a2), giving the marker table;
//   - a `--r2` LD listing (CHR_A BP_A SNP_A CHR_B BP_B SNP_B R2), giving the LD pairs;
//   - a permutation dump, one line per replicate: the replicate number followed by one
//     value per marker. The first line holds the observed data.
//
// Values are 1-df chi-square statistics unless told otherwise, and are stored as
// -log10(p). The dump is streamed row by row into the chunked matrix, so it never has
// to fit in memory.

use super::{ChunkedMatrixWriter, LdPairs, StoreError, StoreTables};
use crate::types::{MarkerIndex, MarkerIndexError};
use flate2::read::MultiGzDecoder;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::f64::consts::{LN_10, PI};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Statistics above this use the asymptotic tail of chi-square(1); the survival
/// function reaches the smallest normal `f64` near 1400.
const CHI_SQUARE_TAIL_CUTOFF: f64 = 1_000.0;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("I/O error reading {input}: {error}")]
    Io { input: String, error: io::Error },
    #[error("{input}, line {line}: expected at least 4 columns, found {found}")]
    ShortBimRecord {
        input: String,
        line: usize,
        found: usize,
    },
    #[error("{input}, line {line}: expected at least 7 columns, found {found}")]
    ShortLdRecord {
        input: String,
        line: usize,
        found: usize,
    },
    #[error("{input}, line {line}: cannot parse '{token}' as a number")]
    Number {
        input: String,
        line: usize,
        token: String,
    },
    #[error(
        "{input}, line {line}: replicate has {found} values but the map lists {expected} markers"
    )]
    ReplicateWidth {
        input: String,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("{0} holds no observed record")]
    MissingObserved(String),
    #[error("could not build the chi-square distribution: {0}")]
    Distribution(String),
    #[error("invalid marker map: {0}")]
    Markers(#[from] MarkerIndexError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConvertError {
    fn io(input: &str, error: io::Error) -> Self {
        Self::Io {
            input: input.to_string(),
            error,
        }
    }

    fn number(input: &str, line: usize, token: &[u8]) -> Self {
        Self::Number {
            input: input.to_string(),
            line,
            token: String::from_utf8_lossy(token).into_owned(),
        }
    }
}

/// How raw values from the permutation dump become stored scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreTransform {
    /// Treat values as 1-df chi-square statistics and store `-log10(p)`.
    ChiSquareLog10P,
    /// Store values unchanged.
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertOptions {
    pub chunk_markers: usize,
    pub chunk_permutations: usize,
    pub compression_level: u32,
    pub transform: ScoreTransform,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            chunk_markers: 50,
            chunk_permutations: 10_000,
            compression_level: 6,
            transform: ScoreTransform::ChiSquareLog10P,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertSummary {
    pub markers: usize,
    pub permutations: usize,
    pub ld_pairs: usize,
}

struct ScoreConverter {
    chi_square: Option<ChiSquared>,
    non_finite: usize,
}

impl ScoreConverter {
    fn new(transform: ScoreTransform) -> Result<Self, ConvertError> {
        let chi_square = match transform {
            ScoreTransform::Raw => None,
            ScoreTransform::ChiSquareLog10P => Some(
                ChiSquared::new(1.0).map_err(|e| ConvertError::Distribution(e.to_string()))?,
            ),
        };
        Ok(Self {
            chi_square,
            non_finite: 0,
        })
    }

    fn convert(&mut self, value: f64) -> f64 {
        let score = match &self.chi_square {
            Some(_) if value.is_nan() => f64::NAN,
            Some(_) if value <= 0.0 => 0.0,
            Some(_) if value > CHI_SQUARE_TAIL_CUTOFF => chi_square_tail_log10(value),
            Some(chi_square) => -chi_square.sf(value).log10(),
            None => value,
        };
        if score.is_finite() {
            score
        } else {
            self.non_finite += 1;
            0.0
        }
    }
}

/// `-log10 P(X > x)` for `X ~ chi-square(1)` and large `x`, from the asymptotic series
/// of `erfc(sqrt(x / 2))`. Stays finite and increasing long after `sf(x)` underflows.
fn chi_square_tail_log10(x: f64) -> f64 {
    let series = 1.0 - 1.0 / x + 3.0 / (x * x) - 15.0 / (x * x * x);
    (x / 2.0 + (PI * x / 2.0).sqrt().ln() - series.ln()) / LN_10
}

/// Opens a file, or stdin when `path` is `None`, transparently inflating gzip input.
pub fn open_input(path: Option<&Path>) -> Result<(Box<dyn BufRead>, String), ConvertError> {
    match path {
        Some(path) => {
            let label = path.display().to_string();
            let file = File::open(path).map_err(|e| ConvertError::io(&label, e))?;
            let reader = maybe_gunzip(file).map_err(|e| ConvertError::io(&label, e))?;
            Ok((reader, label))
        }
        None => {
            let label = "<stdin>".to_string();
            let reader = maybe_gunzip(io::stdin()).map_err(|e| ConvertError::io(&label, e))?;
            Ok((reader, label))
        }
    }
}

fn maybe_gunzip<R: Read + 'static>(reader: R) -> io::Result<Box<dyn BufRead>> {
    let mut buffered = BufReader::new(reader);
    if buffered.fill_buf()?.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(buffered))))
    } else {
        Ok(Box::new(buffered))
    }
}

fn fields(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|b| b.is_ascii_whitespace())
        .filter(|field| !field.is_empty())
}

fn text(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

/// Parses a numeric field. `NA` and `nan` are read as NaN, which later stores as zero.
fn parse_value(field: &[u8]) -> Option<f64> {
    if field.eq_ignore_ascii_case(b"na") || field.eq_ignore_ascii_case(b"nan") {
        return Some(f64::NAN);
    }
    lexical_core::parse::<f64>(field).ok()
}

/// Reads a PLINK `.bim` map into a marker index.
pub fn read_bim<R: BufRead>(mut reader: R, input: &str) -> Result<MarkerIndex, ConvertError> {
    let mut ids = Vec::new();
    let mut chromosomes = Vec::new();
    let mut positions = Vec::new();
    let mut line = Vec::new();
    let mut line_no = 0;
    loop {
        line.clear();
        if reader
            .read_until(b'\n', &mut line)
            .map_err(|e| ConvertError::io(input, e))?
            == 0
        {
            break;
        }
        line_no += 1;
        let cols: Vec<&[u8]> = fields(&line).collect();
        if cols.is_empty() {
            continue;
        }
        if cols.len() < 4 {
            return Err(ConvertError::ShortBimRecord {
                input: input.to_string(),
                line: line_no,
                found: cols.len(),
            });
        }
        let pos = lexical_core::parse::<i32>(cols[3])
            .map_err(|_| ConvertError::number(input, line_no, cols[3]))?;
        chromosomes.push(text(cols[0]));
        ids.push(text(cols[1]));
        positions.push(pos);
    }
    log::info!("{input} lists {} markers", ids.len());
    Ok(MarkerIndex::new(ids, chromosomes, positions)?)
}

/// Reads a PLINK `--r2` listing. A header line, if present, is skipped.
pub fn read_ld<R: BufRead>(mut reader: R, input: &str) -> Result<LdPairs, ConvertError> {
    let mut pairs = LdPairs::default();
    let mut line = Vec::new();
    let mut line_no = 0;
    loop {
        line.clear();
        if reader
            .read_until(b'\n', &mut line)
            .map_err(|e| ConvertError::io(input, e))?
            == 0
        {
            break;
        }
        line_no += 1;
        let cols: Vec<&[u8]> = fields(&line).collect();
        if cols.is_empty() || (line_no == 1 && cols[0] == b"CHR_A") {
            continue;
        }
        if cols.len() < 7 {
            return Err(ConvertError::ShortLdRecord {
                input: input.to_string(),
                line: line_no,
                found: cols.len(),
            });
        }
        let r2 =
            parse_value(cols[6]).ok_or_else(|| ConvertError::number(input, line_no, cols[6]))?;
        pairs.push(text(cols[2]), text(cols[5]), r2);
    }
    log::info!("{input} lists {} LD pairs", pairs.len());
    Ok(pairs)
}

/// Streams a permutation dump into `writer`, returning the observed scores from its
/// first record.
pub fn read_permutations<R: BufRead>(
    mut reader: R,
    input: &str,
    writer: &mut ChunkedMatrixWriter,
    transform: ScoreTransform,
) -> Result<Vec<f64>, ConvertError> {
    let n_markers = writer.n_markers();
    let mut converter = ScoreConverter::new(transform)?;
    let mut observed = None;
    let mut row = Vec::with_capacity(n_markers);
    let mut line = Vec::new();
    let mut line_no = 0;
    loop {
        line.clear();
        if reader
            .read_until(b'\n', &mut line)
            .map_err(|e| ConvertError::io(input, e))?
            == 0
        {
            break;
        }
        line_no += 1;
        let mut cols = fields(&line);
        let Some(replicate) = cols.next() else {
            continue;
        };
        lexical_core::parse::<u64>(replicate)
            .map_err(|_| ConvertError::number(input, line_no, replicate))?;

        row.clear();
        for field in cols {
            let value =
                parse_value(field).ok_or_else(|| ConvertError::number(input, line_no, field))?;
            row.push(converter.convert(value));
        }
        if row.len() != n_markers {
            return Err(ConvertError::ReplicateWidth {
                input: input.to_string(),
                line: line_no,
                expected: n_markers,
                found: row.len(),
            });
        }

        if observed.is_none() {
            observed = Some(row.clone());
        } else {
            writer.append_row(&row)?;
        }
    }
    if converter.non_finite > 0 {
        log::warn!(
            "{} values in {input} were missing or non-finite and were stored as 0",
            converter.non_finite
        );
    }
    observed.ok_or_else(|| ConvertError::MissingObserved(input.to_string()))
}

/// Builds a complete store in `out` from PLINK outputs. `perms` of `None` reads the
/// permutation dump from stdin; `ld` of `None` yields a store without LD pairs.
pub fn convert_to_store(
    bim: &Path,
    ld: Option<&Path>,
    perms: Option<&Path>,
    out: &Path,
    options: &ConvertOptions,
) -> Result<ConvertSummary, ConvertError> {
    let (bim_reader, bim_label) = open_input(Some(bim))?;
    let markers = read_bim(bim_reader, &bim_label)?;

    let ld_pairs = match ld {
        Some(path) => {
            let (reader, label) = open_input(Some(path))?;
            read_ld(reader, &label)?
        }
        None => {
            log::warn!("No LD file given; the store will not prune any marker");
            LdPairs::default()
        }
    };

    fs::create_dir_all(out).map_err(|e| ConvertError::io(&out.display().to_string(), e))?;
    let mut writer = ChunkedMatrixWriter::create(
        out,
        markers.len(),
        options.chunk_permutations,
        options.chunk_markers,
        options.compression_level,
    )?;
    let (perm_reader, perm_label) = open_input(perms)?;
    let observed = read_permutations(perm_reader, &perm_label, &mut writer, options.transform)?;
    let permutations = writer.finish()?;

    let tables = StoreTables::new(markers, observed, ld_pairs)?;
    tables.write(out)?;

    let summary = ConvertSummary {
        markers: tables.markers.len(),
        permutations,
        ld_pairs: tables.ld.len(),
    };
    log::info!(
        "Wrote store {} with {} markers, {} permutations and {} LD pairs",
        out.display(),
        summary.markers,
        summary.permutations,
        summary.ld_pairs
    );
    Ok(summary)
}
