// ========================================================================================
//                                 Scan configuration
// ========================================================================================
//
// Options arrive from two places: an optional TOML file and the command line. Both are
// read into a `PartialScanConfig`, the command line is laid over the file, and the
// merge is validated exactly once by `resolve`. Nothing downstream re-checks it.

use crate::types::Coordinate;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CHUNK_MARKERS: usize = 50;
pub const DEFAULT_CHUNK_PERMUTATIONS: usize = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    Missing(&'static str),
    #[error("window size must be positive, got {0}")]
    WindowSize(Coordinate),
    #[error("jump size must be positive, got {0}")]
    JumpSize(Coordinate),
    #[error("K must be positive")]
    TopK,
    #[error("the window-set size must be positive")]
    WindowSetSize,
    #[error("window sets of {window_set_size} x {jump_size} bp overflow the coordinate axis")]
    SetStride {
        jump_size: Coordinate,
        window_set_size: usize,
    },
    #[error("the LD cutoff must be a number in [0, 1], got {0}")]
    LdCutoff(f64),
    #[error("chunk hint '{0}' must be positive")]
    ChunkHint(&'static str),
    #[error("the permutation count must be positive")]
    PermutationCount,
    #[error("no input stores were given")]
    NoStores,
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Validated parameters of one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub window_size: Coordinate,
    pub jump_size: Coordinate,
    pub top_k: usize,
    pub window_set_size: usize,
    pub ld_cutoff: f64,
    pub chunk_markers: usize,
    pub chunk_permutations: usize,
    /// Caps the permutation rows taken across all stores, in store order.
    pub max_permutations: Option<usize>,
}

/// A fully specified scan: parameters, inputs and destination.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanJob {
    pub config: ScanConfig,
    pub stores: Vec<PathBuf>,
    pub output: PathBuf,
}

/// Scan options as read from a config file or the command line; every field may
/// be absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialScanConfig {
    pub output: Option<PathBuf>,
    pub stores: Option<Vec<PathBuf>>,
    pub window_size: Option<Coordinate>,
    pub jump_size: Option<Coordinate>,
    pub top_k: Option<usize>,
    pub window_set_size: Option<usize>,
    pub ld_cutoff: Option<f64>,
    pub chunk_markers: Option<usize>,
    pub chunk_permutations: Option<usize>,
    pub max_permutations: Option<usize>,
}

impl PartialScanConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Lays `overrides` over `self`: any option set in `overrides` wins.
    pub fn merge(self, overrides: PartialScanConfig) -> PartialScanConfig {
        PartialScanConfig {
            output: overrides.output.or(self.output),
            stores: overrides
                .stores
                .filter(|stores| !stores.is_empty())
                .or(self.stores),
            window_size: overrides.window_size.or(self.window_size),
            jump_size: overrides.jump_size.or(self.jump_size),
            top_k: overrides.top_k.or(self.top_k),
            window_set_size: overrides.window_set_size.or(self.window_set_size),
            ld_cutoff: overrides.ld_cutoff.or(self.ld_cutoff),
            chunk_markers: overrides.chunk_markers.or(self.chunk_markers),
            chunk_permutations: overrides.chunk_permutations.or(self.chunk_permutations),
            max_permutations: overrides.max_permutations.or(self.max_permutations),
        }
    }

    pub fn resolve(self) -> Result<ScanJob, ConfigError> {
        let output = self.output.ok_or(ConfigError::Missing("output"))?;
        let stores = self.stores.unwrap_or_default();
        if stores.is_empty() {
            return Err(ConfigError::NoStores);
        }

        let window_size = self.window_size.ok_or(ConfigError::Missing("window size"))?;
        if window_size <= 0 {
            return Err(ConfigError::WindowSize(window_size));
        }
        let jump_size = self.jump_size.ok_or(ConfigError::Missing("jump size"))?;
        if jump_size <= 0 {
            return Err(ConfigError::JumpSize(jump_size));
        }
        let top_k = self.top_k.ok_or(ConfigError::Missing("K"))?;
        if top_k == 0 {
            return Err(ConfigError::TopK);
        }
        let window_set_size = self
            .window_set_size
            .ok_or(ConfigError::Missing("window-set size"))?;
        if window_set_size == 0 {
            return Err(ConfigError::WindowSetSize);
        }
        if Coordinate::try_from(window_set_size)
            .ok()
            .and_then(|sets| jump_size.checked_mul(sets))
            .is_none()
        {
            return Err(ConfigError::SetStride {
                jump_size,
                window_set_size,
            });
        }
        let ld_cutoff = self.ld_cutoff.ok_or(ConfigError::Missing("LD cutoff"))?;
        if !(0.0..=1.0).contains(&ld_cutoff) {
            return Err(ConfigError::LdCutoff(ld_cutoff));
        }

        let chunk_markers = self.chunk_markers.unwrap_or(DEFAULT_CHUNK_MARKERS);
        if chunk_markers == 0 {
            return Err(ConfigError::ChunkHint("markers per chunk"));
        }
        let chunk_permutations = self.chunk_permutations.unwrap_or(DEFAULT_CHUNK_PERMUTATIONS);
        if chunk_permutations == 0 {
            return Err(ConfigError::ChunkHint("permutations per chunk"));
        }
        if self.max_permutations == Some(0) {
            return Err(ConfigError::PermutationCount);
        }

        Ok(ScanJob {
            config: ScanConfig {
                window_size,
                jump_size,
                top_k,
                window_set_size,
                ld_cutoff,
                chunk_markers,
                chunk_permutations,
                max_permutations: self.max_permutations,
            },
            stores,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn complete() -> PartialScanConfig {
        PartialScanConfig {
            output: Some(PathBuf::from("out.txt")),
            stores: Some(vec![PathBuf::from("store")]),
            window_size: Some(25),
            jump_size: Some(25),
            top_k: Some(2),
            window_set_size: Some(1),
            ld_cutoff: Some(0.5),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_fill_the_chunk_hints() {
        let job = complete().resolve().unwrap();
        assert_eq!(job.config.chunk_markers, DEFAULT_CHUNK_MARKERS);
        assert_eq!(job.config.chunk_permutations, DEFAULT_CHUNK_PERMUTATIONS);
        assert_eq!(job.config.max_permutations, None);
        assert_eq!(job.stores, [PathBuf::from("store")]);
    }

    #[test]
    fn command_line_values_override_the_file() {
        let file = PartialScanConfig {
            top_k: Some(5),
            ld_cutoff: Some(0.2),
            ..complete()
        };
        let cli = PartialScanConfig {
            top_k: Some(3),
            stores: Some(Vec::new()),
            ..Default::default()
        };
        let job = file.merge(cli).resolve().unwrap();
        assert_eq!(job.config.top_k, 3);
        assert_eq!(job.config.ld_cutoff, 0.2);
        assert_eq!(job.stores, [PathBuf::from("store")]);
    }

    #[test]
    fn invalid_values_are_rejected_before_any_work() {
        fn with(edit: impl FnOnce(&mut PartialScanConfig)) -> PartialScanConfig {
            let mut config = complete();
            edit(&mut config);
            config
        }

        let cases = [
            (with(|c| c.window_size = Some(0)), "window size"),
            (with(|c| c.jump_size = Some(-5)), "jump size"),
            (with(|c| c.top_k = Some(0)), "K must"),
            (with(|c| c.window_set_size = Some(0)), "window-set"),
            (with(|c| c.ld_cutoff = Some(1.5)), "LD cutoff"),
            (with(|c| c.ld_cutoff = Some(f64::NAN)), "LD cutoff"),
            (with(|c| c.chunk_markers = Some(0)), "markers per chunk"),
            (with(|c| c.max_permutations = Some(0)), "permutation count"),
            (with(|c| c.stores = None), "no input stores"),
        ];
        for (config, fragment) in cases {
            let message = config.resolve().unwrap_err().to_string();
            assert!(message.contains(fragment), "{message:?} lacks {fragment:?}");
        }
    }

    #[test]
    fn set_strides_past_the_coordinate_range_are_rejected() {
        let config = PartialScanConfig {
            jump_size: Some(Coordinate::MAX / 2),
            window_set_size: Some(3),
            ..complete()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::SetStride {
                window_set_size: 3,
                ..
            })
        ));

        let config = PartialScanConfig {
            window_set_size: Some(usize::MAX),
            ..complete()
        };
        assert!(matches!(config.resolve(), Err(ConfigError::SetStride { .. })));
    }

    #[test]
    fn missing_required_options_are_named() {
        let config = PartialScanConfig {
            top_k: None,
            ..complete()
        };
        assert!(matches!(config.resolve(), Err(ConfigError::Missing("K"))));
    }

    #[test]
    fn toml_files_are_read_and_unknown_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "window_size = 1000\njump_size = 500\ntop_k = 4\nwindow_set_size = 8\nld_cutoff = 0.8\nmax_permutations = 5000"
        )
        .unwrap();
        let partial = PartialScanConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(partial.window_size, Some(1000));
        assert_eq!(partial.max_permutations, Some(5000));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "window = 10").unwrap();
        assert!(matches!(
            PartialScanConfig::from_toml_file(bad.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
