//! Terminal-backed biometric capability
//!
//! Hosts without a platform biometric API answer the challenge on the
//! terminal instead: `y` verifies, `n` fails, an empty line or EOF cancels.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use latchkey_core::{BiometricAuthenticator, BiometricPrompt, ChallengeOutcome, Error, Result};

/// Simulated biometric sensor driven from stdin
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalBiometrics;

#[async_trait]
impl BiometricAuthenticator for TerminalBiometrics {
    async fn has_hardware(&self) -> Result<bool> {
        Ok(true)
    }

    async fn is_enrolled(&self) -> Result<bool> {
        Ok(true)
    }

    async fn challenge(&self, prompt: &BiometricPrompt) -> Result<ChallengeOutcome> {
        let question = if prompt.allow_device_fallback {
            format!("{} ({} allowed) [y/n]: ", prompt.message, prompt.fallback_label)
        } else {
            format!("{} [y/n]: ", prompt.message)
        };

        let answer = tokio::task::spawn_blocking(move || read_answer(&question))
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        Ok(parse_answer(answer.as_deref()))
    }
}

fn read_answer(question: &str) -> Result<Option<String>> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{}", question)?;
    stderr.flush()?;

    let mut line = String::new();
    let read = std::io::stdin().lock().read_line(&mut line)?;
    Ok((read > 0).then_some(line))
}

fn parse_answer(answer: Option<&str>) -> ChallengeOutcome {
    match answer.map(|a| a.trim().to_ascii_lowercase()).as_deref() {
        Some("y") | Some("yes") => ChallengeOutcome::Success,
        None | Some("") => ChallengeOutcome::Cancelled,
        Some(_) => ChallengeOutcome::Failed,
    }
}
