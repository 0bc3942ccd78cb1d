//! Corpus directory: one flat directory, one serialized input per file.
//!
//! Inputs are written as 8-byte little-endian words, enum parameters
//! first. Freshly generated seeds get a provisional `CRASH_` prefix so a
//! crash mid-run leaves the offending input behind; the prefix is dropped
//! once the run produced new coverage, and the file deleted otherwise.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use waypoint_core::{Input, InputSignature};

pub const CRASH_PREFIX: &str = "CRASH_";

/// `time<seconds>_gen<count>` parsed out of a seed filename. Files not
/// matching the scheme are initial seeds supplied by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedStamp {
    pub time: i64,
    pub gen: i64,
}

pub fn parse_seed_stamp(stem: &str) -> Option<SeedStamp> {
    let stem = stem.strip_prefix(CRASH_PREFIX).unwrap_or(stem);
    let (first, second) = stem.split_once('_')?;
    let time = first.strip_prefix("time")?.parse().ok()?;
    let gen = second.strip_prefix("gen")?.parse().ok()?;
    Some(SeedStamp { time, gen })
}

pub struct CorpusStore {
    dir: PathBuf,
    last_seed: Option<String>,
}

impl CorpusStore {
    /// Open (or create) the corpus directory. Without an explicit path a
    /// fresh `waypoint_corpus<N>` is created next to the binary. Passive
    /// modes (replay, single command-line input) never create anything.
    pub fn prepare(dir: Option<PathBuf>, passive: bool) -> std::io::Result<Self> {
        let dir = match dir {
            Some(dir) => dir,
            None if passive => PathBuf::from("waypoint_corpus"),
            None => {
                let mut id = 0;
                loop {
                    let candidate = PathBuf::from(format!("waypoint_corpus{}", id));
                    if !candidate.is_dir() {
                        info!(corpus = %candidate.display(), "corpus name not given; using a new one");
                        break candidate;
                    }
                    id += 1;
                }
            }
        };
        if !passive && !dir.is_dir() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            dir,
            last_seed: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a provisional seed for the input about to run.
    pub fn write_seed(
        &mut self,
        sig: &InputSignature,
        input: &Input,
        elapsed_s: u64,
        gen: u64,
    ) -> std::io::Result<()> {
        let name = format!("{}time{:010}_gen{:010}", CRASH_PREFIX, elapsed_s, gen);
        let path = self.dir.join(&name);
        if path.is_file() {
            warn!(seed = %path.display(), "seed file name collision; overwriting");
        }
        let mut file = fs::File::create(&path)?;
        for value in sig.serialize(input) {
            file.write_all(&value.to_le_bytes())?;
        }
        self.last_seed = Some(name);
        Ok(())
    }

    /// The last seed produced new coverage: strip the provisional prefix.
    pub fn commit_last(&mut self) -> std::io::Result<()> {
        if let Some(name) = self.last_seed.take() {
            debug_assert!(name.starts_with(CRASH_PREFIX));
            let committed = name.trim_start_matches(CRASH_PREFIX);
            fs::rename(self.dir.join(&name), self.dir.join(committed))?;
        }
        Ok(())
    }

    /// The last seed added nothing: remove it.
    pub fn delete_last(&mut self) -> std::io::Result<()> {
        if let Some(name) = self.last_seed.take() {
            fs::remove_file(self.dir.join(name))?;
        }
        Ok(())
    }

    /// All seed files, sorted by name.
    pub fn list_seeds(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut seeds: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        seeds.sort();
        Ok(seeds)
    }

    /// Decode a seed file into its raw i64 words.
    pub fn read_seed(path: &Path) -> std::io::Result<Vec<i64>> {
        let bytes = fs::read(path)?;
        if bytes.len() % 8 != 0 {
            warn!(seed = %path.display(), len = bytes.len(), "seed size not a multiple of 8; tail ignored");
        }
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::Args;

    fn sig() -> InputSignature {
        let mut sig = InputSignature::new();
        sig.add_enum_range("m", 0, 3).unwrap();
        sig.add_numeric("a").unwrap();
        sig
    }

    fn input(m: i64, a: i64) -> Input {
        let enums: Args = [("m".to_string(), m)].into();
        let numerics: Args = [("a".to_string(), a)].into();
        Input::new(enums, numerics)
    }

    #[test]
    fn seed_stamp_parsing() {
        assert_eq!(
            parse_seed_stamp("time0000000012_gen0000000034"),
            Some(SeedStamp { time: 12, gen: 34 })
        );
        assert_eq!(
            parse_seed_stamp("CRASH_time0000000001_gen0000000002"),
            Some(SeedStamp { time: 1, gen: 2 })
        );
        assert_eq!(parse_seed_stamp("my_initial_seed"), None);
        assert_eq!(parse_seed_stamp("plain"), None);
    }

    #[test]
    fn seed_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let sig = sig();
        let mut store = CorpusStore::prepare(Some(tmp.path().to_path_buf()), false).unwrap();

        store.write_seed(&sig, &input(2, -7), 5, 9).unwrap();
        store.commit_last().unwrap();

        let seeds = store.list_seeds().unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(
            seeds[0].file_name().unwrap().to_str().unwrap(),
            "time0000000005_gen0000000009"
        );

        let raw = CorpusStore::read_seed(&seeds[0]).unwrap();
        assert_eq!(raw, vec![2, -7]);
        assert_eq!(sig.deserialize(&raw).unwrap(), input(2, -7));
    }

    #[test]
    fn deleted_seed_leaves_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sig = sig();
        let mut store = CorpusStore::prepare(Some(tmp.path().to_path_buf()), false).unwrap();
        store.write_seed(&sig, &input(0, 0), 1, 1).unwrap();
        store.delete_last().unwrap();
        assert!(store.list_seeds().unwrap().is_empty());
    }

    #[test]
    fn uncommitted_seed_keeps_crash_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let sig = sig();
        let mut store = CorpusStore::prepare(Some(tmp.path().to_path_buf()), false).unwrap();
        store.write_seed(&sig, &input(1, 3), 2, 2).unwrap();
        let seeds = store.list_seeds().unwrap();
        assert!(seeds[0]
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with(CRASH_PREFIX));
    }
}
