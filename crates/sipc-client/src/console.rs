//! Line-oriented front end for an initiator.
//!
//! Each input line is submitted as one secure message. Responses are
//! printed in arrival order as they appear in the initiator's log.
//! Submission failures print a short user-facing message; cryptographic
//! drops never reach the console.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, warn};

use sipc_core::{CoreError, InitiatorHandle};

/// Printed for any failure that has no user-facing text of its own.
pub const GENERIC_FAILURE: &str = "Message could not be sent.";

pub struct Console<W> {
    out: W,
    printed: usize,
    submitted: usize,
}

impl<W: AsyncWrite + Unpin> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            submitted: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Read lines until EOF, then wait up to `grace` for outstanding responses.
    pub async fn run<R>(
        &mut self,
        initiator: &InitiatorHandle,
        input: R,
        grace: Duration,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut responses = initiator.responses();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(text) => self.submit(initiator, text.trim_end()).await?,
                    None => break,
                },
                changed = responses.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.flush_responses(&mut responses).await?;
                }
            }
        }

        if self.printed < self.submitted {
            debug!(outstanding = self.submitted - self.printed, "waiting for responses");
            if tokio::time::timeout(grace, initiator.wait_for_responses(self.submitted))
                .await
                .is_err()
            {
                warn!("not every message was answered");
            }
        }
        self.flush_responses(&mut responses).await?;
        self.out.flush().await
    }

    async fn submit(&mut self, initiator: &InitiatorHandle, text: &str) -> std::io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        match initiator.submit(text).await {
            Ok(()) => {
                self.submitted += 1;
                Ok(())
            }
            Err(e) => {
                debug!("submit failed: {}", e);
                self.print_line(failure_text(&e)).await
            }
        }
    }

    async fn flush_responses(
        &mut self,
        responses: &mut watch::Receiver<Vec<String>>,
    ) -> std::io::Result<()> {
        let fresh: Vec<String> = {
            let log = responses.borrow_and_update();
            log.iter().skip(self.printed).cloned().collect()
        };
        for response in fresh {
            self.print_line(&response).await?;
            self.printed += 1;
        }
        Ok(())
    }

    async fn print_line(&mut self, line: &str) -> std::io::Result<()> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await
    }
}

pub fn failure_text(error: &CoreError) -> &'static str {
    error.user_message().unwrap_or(GENERIC_FAILURE)
}
