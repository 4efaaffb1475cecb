//! External verifier capability
//!
//! The driver only sees the [`Verifier`] trait. [`FlacVerifier`] implements it
//! by running the reference decoder in test mode (`flac --test <file>`).

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::CheckConfig;
use crate::error::IntegrityError;

/// Outcome of verifying one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The audio payload decoded cleanly
    Passed {
        /// Stream MD5 stored in the file header, when it was looked up
        md5: Option<String>,
    },
    /// The decoder reported a problem
    Failed { reason: String },
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed { .. })
    }
}

/// Checks the integrity of a single file.
///
/// `Err` means the check could not be carried out at all, as opposed to a
/// file that failed it.
pub trait Verifier {
    fn verify(&self, path: &Path) -> Result<Verdict, IntegrityError>;
}

/// Verifier backed by the `flac` command line tool
#[derive(Debug, Clone)]
pub struct FlacVerifier {
    flac_path: PathBuf,
    metaflac_path: Option<PathBuf>,
}

impl FlacVerifier {
    pub fn new(flac_path: impl Into<PathBuf>, metaflac_path: Option<PathBuf>) -> Self {
        Self {
            flac_path: flac_path.into(),
            metaflac_path,
        }
    }

    pub fn from_config(config: &CheckConfig) -> Self {
        Self::new(config.flac_path.clone(), config.metaflac_path.clone())
    }

    fn test(&self, file: &Path) -> Result<Verdict, IntegrityError> {
        let output = Command::new(&self.flac_path)
            .arg("--test")
            .arg(file)
            .output()
            .map_err(|e| {
                IntegrityError::verifier_unavailable(
                    self.flac_path.clone(),
                    format!("cannot run flac: {}", e),
                )
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        log::debug!("FLAC exited with code: {:?}", output.status.code());

        Ok(interpret_test_output(
            output.status.success(),
            output.status.code(),
            &stdout,
            &stderr,
        ))
    }

    /// MD5 of the unencoded audio as recorded in the STREAMINFO block
    fn stream_md5(&self, metaflac: &Path, file: &Path) -> Option<String> {
        let output = match Command::new(metaflac).arg("--show-md5sum").arg(file).output() {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Cannot run metaflac {:?}: {}", metaflac, e);
                return None;
            }
        };
        if !output.status.success() {
            log::warn!(
                "METAFLAC exited with error code: {:?}",
                output.status.code()
            );
            return None;
        }
        parse_md5_output(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Verifier for FlacVerifier {
    fn verify(&self, path: &Path) -> Result<Verdict, IntegrityError> {
        let verdict = self.test(path)?;
        match (verdict, &self.metaflac_path) {
            (Verdict::Passed { .. }, Some(metaflac)) => {
                let md5 = self.stream_md5(metaflac, path);
                if let Some(md5) = &md5 {
                    log::debug!("Stream MD5 {} for {:?}", md5, path);
                }
                Ok(Verdict::Passed { md5 })
            }
            (verdict, _) => Ok(verdict),
        }
    }
}

/// Turn the result of `flac --test` into a verdict.
///
/// A pass needs a zero exit status and a final status line ending in `ok`;
/// flac writes that line to stderr.
pub fn interpret_test_output(
    success: bool,
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> Verdict {
    let last_line = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("");

    if !success {
        log::error!("FLAC exited with error code: {:?}", code);
        log::error!("STDOUT:\n{}\nSTDERR: {}", stdout.trim(), stderr.trim());
        return Verdict::Failed {
            reason: format!("flac exited with {:?}: {}", code, last_line),
        };
    }

    if last_line.ends_with("ok") {
        log::debug!("FLAC verification succeed");
        Verdict::Passed { md5: None }
    } else {
        log::error!("{}", last_line);
        log::error!("FLAC '*ok' not found");
        Verdict::Failed {
            reason: format!("unexpected flac status line: {:?}", last_line),
        }
    }
}

/// First token of `metaflac --show-md5sum`, if it looks like an MD5
pub fn parse_md5_output(stdout: &str) -> Option<String> {
    let token = stdout.split_whitespace().next()?;
    (token.len() == 32 && token.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| token.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntegrityErrorKind;

    const FLAC_BANNER: &str = "\nflac 1.4.3\nCopyright (C) 2000-2009  Josh Coalson, 2011-2023  Xiph.Org Foundation\n\n";

    #[test]
    fn test_interpret_ok() {
        let stderr = format!("{}/music/a.flac: ok\n", FLAC_BANNER);
        assert_eq!(
            interpret_test_output(true, Some(0), "", &stderr),
            Verdict::Passed { md5: None }
        );
    }

    #[test]
    fn test_interpret_nonzero_exit() {
        let stderr = format!(
            "{}/music/a.flac: ERROR while decoding data\n   state = FLAC__STREAM_DECODER_READ_FRAME\n",
            FLAC_BANNER
        );
        let verdict = interpret_test_output(false, Some(1), "", &stderr);
        assert!(!verdict.is_passed());
    }

    #[test]
    fn test_interpret_missing_ok_line() {
        let stderr = format!("{}/music/a.flac: WARNING, cannot check MD5 signature\n", FLAC_BANNER);
        let verdict = interpret_test_output(true, Some(0), "", &stderr);
        assert!(matches!(verdict, Verdict::Failed { .. }));

        assert!(!interpret_test_output(true, Some(0), "", "").is_passed());
    }

    #[test]
    fn test_parse_md5_output() {
        assert_eq!(
            parse_md5_output("0123456789ABCDEF0123456789abcdef\n"),
            Some("0123456789abcdef0123456789abcdef".to_string())
        );
        assert_eq!(parse_md5_output("not-a-hash\n"), None);
        assert_eq!(parse_md5_output(""), None);
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let verifier = FlacVerifier::new("/nonexistent/bin/flac", None);
        let err = verifier.verify(Path::new("/music/a.flac")).unwrap_err();
        assert_eq!(err.kind, IntegrityErrorKind::VerifierUnavailable);
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_flac_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let fake_flac = dir.path().join("flac");
        std::fs::write(
            &fake_flac,
            "#!/bin/sh\ncase \"$2\" in\n  *bad*) echo \"$2: ERROR\" >&2; exit 1 ;;\n  *) echo \"$2: ok\" >&2 ;;\nesac\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake_flac, std::fs::Permissions::from_mode(0o755)).unwrap();

        let verifier = FlacVerifier::new(&fake_flac, None);
        assert!(verifier.verify(Path::new("/music/good.flac")).unwrap().is_passed());
        assert!(!verifier.verify(Path::new("/music/bad.flac")).unwrap().is_passed());
    }
}
