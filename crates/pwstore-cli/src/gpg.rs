//! OpenPGP provider backed by the `gpg` command line.
//!
//! Requests first run with `--pinentry-mode error`, so nothing pops up
//! unexpectedly. If gpg then reports it needs a passphrase, the service asks
//! for user interaction; the continuation it hands out lets the retry use the
//! agent's pinentry.

use async_trait::async_trait;
use pwstore_core::{
    Continuation, CryptoRequest, CryptoService, KeyId, Operation, Payload, ServiceResponse,
};
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Continuation that allows pinentry on the retry.
const ALLOW_PINENTRY: &[u8] = b"allow-pinentry";

/// Status line gpg emits when a secret key is locked.
const NEED_PASSPHRASE: &str = "[GNUPG:] NEED_PASSPHRASE";

/// Error code used when gpg could not be run or gave no exit code.
const SPAWN_FAILED: i32 = -1;

pub struct GpgService {
    program: String,
}

impl GpgService {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    async fn decrypt(&self, ciphertext: Vec<u8>, allow_pinentry: bool) -> ServiceResponse {
        let mut command = Command::new(&self.program);
        command.args(["--batch", "--quiet", "--yes", "--status-fd", "2"]);
        if !allow_pinentry {
            command.args(["--pinentry-mode", "error"]);
        }
        command.arg("--decrypt");

        let output = match run(command, Some(ciphertext)).await {
            Ok(output) => output,
            Err(e) => return spawn_error(&self.program, &e),
        };
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            return ServiceResponse::Success(Payload::Plaintext(output.stdout));
        }
        if !allow_pinentry && needs_passphrase(&stderr) {
            tracing::debug!("gpg needs a passphrase");
            return ServiceResponse::NeedsUserInteraction(Continuation::new(ALLOW_PINENTRY));
        }
        ServiceResponse::Error {
            code: output.status.code().unwrap_or(SPAWN_FAILED),
            message: error_message(&stderr),
        }
    }

    async fn key_ids(&self) -> ServiceResponse {
        let mut command = Command::new(&self.program);
        command.args(["--batch", "--with-colons", "--list-secret-keys"]);

        let output = match run(command, None).await {
            Ok(output) => output,
            Err(e) => return spawn_error(&self.program, &e),
        };
        if !output.status.success() {
            return ServiceResponse::Error {
                code: output.status.code().unwrap_or(SPAWN_FAILED),
                message: error_message(&String::from_utf8_lossy(&output.stderr)),
            };
        }

        let ids = parse_key_ids(&String::from_utf8_lossy(&output.stdout));
        if ids.is_empty() {
            return ServiceResponse::Error {
                code: 1,
                message: "No secret keys found".to_string(),
            };
        }
        ServiceResponse::Success(Payload::KeyIds(ids))
    }
}

#[async_trait]
impl CryptoService for GpgService {
    async fn execute(&self, request: CryptoRequest) -> ServiceResponse {
        let allow_pinentry = request
            .continuation()
            .is_some_and(|c| c.as_bytes() == ALLOW_PINENTRY);

        match request.operation() {
            Operation::DecryptVerify => {
                let ciphertext = request.payload().unwrap_or_default().to_vec();
                self.decrypt(ciphertext, allow_pinentry).await
            }
            Operation::GetKeyIds => self.key_ids().await,
        }
    }
}

/// Run `command`, feeding `input` on stdin.
async fn run(mut command: Command, input: Option<Vec<u8>>) -> std::io::Result<Output> {
    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        // written from a task so a full stdout pipe cannot deadlock us
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                tracing::warn!("Failed to write to gpg: {}", e);
            }
        });
    }
    child.wait_with_output().await
}

fn spawn_error(program: &str, error: &std::io::Error) -> ServiceResponse {
    ServiceResponse::Error {
        code: SPAWN_FAILED,
        message: format!("Failed to run {program}: {error}"),
    }
}

fn needs_passphrase(stderr: &str) -> bool {
    stderr.lines().any(|line| line.starts_with(NEED_PASSPHRASE))
}

/// Last human-readable line gpg printed.
fn error_message(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("[GNUPG:]"))
        .last()
        .map(|line| line.strip_prefix("gpg: ").unwrap_or(line).to_string())
        .unwrap_or_else(|| "gpg failed without a message".to_string())
}

/// Key ids of the `sec` records in `--with-colons` output.
fn parse_key_ids(listing: &str) -> Vec<KeyId> {
    listing
        .lines()
        .filter(|line| line.starts_with("sec:"))
        .filter_map(|line| line.split(':').nth(4))
        .filter_map(|id| u64::from_str_radix(id, 16).ok())
        .map(KeyId)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_LOCKED: &str = "\
[GNUPG:] ENC_TO 0123456789ABCDEF 1 0
[GNUPG:] NEED_PASSPHRASE 0123456789ABCDEF 0123456789ABCDEF 1 0
gpg: public key decryption failed: No pinentry
[GNUPG:] ERROR pkdecrypt_failed 67108949
gpg: decryption failed: No secret key
";

    #[test]
    fn detects_locked_key() {
        assert!(needs_passphrase(STATUS_LOCKED));
        assert!(!needs_passphrase("gpg: decryption failed: No secret key\n"));
    }

    #[test]
    fn error_message_is_last_plain_line() {
        assert_eq!(error_message(STATUS_LOCKED), "decryption failed: No secret key");
        assert_eq!(error_message("[GNUPG:] FAILURE\n"), "gpg failed without a message");
    }

    #[test]
    fn parses_secret_key_ids() {
        let listing = "\
sec:u:255:22:0123456789ABCDEF:1600000000:::u:::scESC:::+:::ed25519:::0:
fpr:::::::::AAAA0123456789ABCDEF:
uid:u::::1600000000::HASH::Alice <alice@example.com>::::::::::0:
ssb:u:255:18:FEDCBA9876543210:1600000000::::::e:::+:::cv25519::
sec:e:4096:1:00000000DEADBEEF:1400000000:::u:::sc:::+::::::0:
";
        assert_eq!(
            parse_key_ids(listing),
            vec![KeyId(0x0123_4567_89AB_CDEF), KeyId(0xDEAD_BEEF)]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_service_error() {
        let service = GpgService::new("pwstore-no-such-gpg-binary");
        let response = service.execute(CryptoRequest::get_key_ids()).await;
        assert!(matches!(
            response,
            ServiceResponse::Error { code: SPAWN_FAILED, ref message } if message.contains("Failed to run")
        ));
    }
}
