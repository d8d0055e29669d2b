//! Terminal handling of provider interaction requests.

use async_trait::async_trait;
use pwstore_core::{Continuation, InteractionHandler, InteractionOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Asks on the terminal before letting the provider prompt the user.
pub struct TerminalInteraction;

#[async_trait]
impl InteractionHandler for TerminalInteraction {
    async fn interact(&self, continuation: Continuation) -> InteractionOutcome {
        eprint!("The OpenPGP provider needs your passphrase. Continue? [Y/n] ");

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(0) => InteractionOutcome::Cancelled,
            Ok(_) if is_yes(&line) => InteractionOutcome::Resumed(continuation),
            Ok(_) => InteractionOutcome::Cancelled,
            Err(e) => {
                tracing::warn!("Failed to read answer: {}", e);
                InteractionOutcome::Cancelled
            }
        }
    }
}

/// Empty input counts as yes.
fn is_yes(answer: &str) -> bool {
    matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "" | "y" | "yes"
    )
}
