//! The external synthesizer subprocess.
//!
//! The backend (duet) is treated as a total function from SyGuS text and a
//! timeout to output text: an empty string means timeout or give-up, an
//! error-prefixed string means the backend rejected the problem. Tests
//! inject [`FnSynthesizer`] instead of spawning anything.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{SynthError, SynthResult};

/// Prefix duet prints when it cannot handle a problem.
pub const SYNTHESIZER_FAIL_PREFIX: &str = "Fatal error: exception";

/// Interface to a SyGuS backend.
pub trait Synthesizer {
    /// Run the backend on one problem. Returns its combined output, or an
    /// empty string on timeout.
    fn run(&self, sygus: &str, timeout: Duration) -> SynthResult<String>;
}

/// Production backend: the duet binary invoked on a temp `.sl` file.
pub struct DuetSynthesizer {
    binary: PathBuf,
    extra_opts: Vec<String>,
}

impl DuetSynthesizer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            // duet needs a search strategy; -all enumerates every component.
            extra_opts: vec!["-all".to_string()],
        }
    }

    pub fn with_opts(binary: impl Into<PathBuf>, extra_opts: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_opts,
        }
    }

    /// Verify the binary exists before the first real synthesis call.
    pub fn probe(&self) -> SynthResult<()> {
        if self.binary.is_file() {
            Ok(())
        } else {
            Err(SynthError::BinaryNotFound(
                self.binary.display().to_string(),
            ))
        }
    }
}

impl Synthesizer for DuetSynthesizer {
    fn run(&self, sygus: &str, timeout: Duration) -> SynthResult<String> {
        if timeout.is_zero() {
            return Ok(String::new());
        }

        let mut file = NamedTempFile::with_suffix(".sl")?;
        file.write_all(sygus.as_bytes())?;
        file.flush()?;

        let mut child = Command::new(&self.binary)
            .args(&self.extra_opts)
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let deadline = Instant::now() + timeout;
        let finished = loop {
            match child.try_wait()? {
                Some(_) => break true,
                None if Instant::now() >= deadline => break false,
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        };

        if !finished {
            debug!(timeout_ms = timeout.as_millis() as u64, "synthesizer timed out");
            child.kill().ok();
            child.wait()?;
            return Ok(String::new());
        }

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_string(&mut output)?;
        }
        // duet reports failures (and sometimes the solution) on stderr.
        if let Some(mut stderr) = child.stderr.take() {
            let mut err = String::new();
            stderr.read_to_string(&mut err)?;
            if !err.is_empty() {
                if output.is_empty() {
                    output = err;
                } else {
                    warn!(stderr = %err.trim_end(), "synthesizer wrote to stderr");
                }
            }
        }
        Ok(output)
    }
}

/// Deterministic backend for tests: answers from a closure.
pub struct FnSynthesizer<F>(pub F);

impl<F> Synthesizer for FnSynthesizer<F>
where
    F: Fn(&str) -> String,
{
    fn run(&self, sygus: &str, _timeout: Duration) -> SynthResult<String> {
        Ok((self.0)(sygus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_synthesizer_answers_from_closure() {
        let synth = FnSynthesizer(|_: &str| "(define-fun f () Bool (= 1 1))".to_string());
        let out = synth.run("(check-synth)", Duration::from_secs(1)).unwrap();
        assert!(out.starts_with("(define-fun"));
    }

    #[test]
    fn zero_timeout_short_circuits() {
        let synth = DuetSynthesizer::new("/nonexistent/duet");
        let out = synth.run("(check-synth)", Duration::ZERO).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn probe_rejects_missing_binary() {
        let synth = DuetSynthesizer::new("/nonexistent/duet");
        assert!(matches!(synth.probe(), Err(SynthError::BinaryNotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_output_is_captured() {
        let synth = DuetSynthesizer::with_opts("/bin/cat", vec![]);
        let out = synth
            .run("(check-synth)", Duration::from_secs(5))
            .unwrap();
        assert_eq!(out, "(check-synth)");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_subprocess() {
        let synth = DuetSynthesizer::with_opts("/bin/sleep", vec!["30".to_string()]);
        let started = Instant::now();
        let out = synth
            .run("ignored", Duration::from_millis(100))
            .unwrap();
        assert_eq!(out, "");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
